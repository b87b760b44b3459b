use crate::error::StreamError;
use crate::types::AudioSpec;

/// Background worker with cooperative start/pause/stop.
pub trait Worker {
    fn stop(&mut self);
    fn pause(&mut self);
    fn start(&mut self);
}

/// Blocking writer of interleaved f32 frames to an output device.
///
/// `write` returns only once the device has room for the whole block, which
/// is what paces the audio thread.
pub trait AudioSink {
    fn write(&mut self, samples: &[f32]) -> Result<(), StreamError>;
}

/// Opens a sink on the thread that is going to write to it.
pub trait SinkFactory: Send + Sync {
    fn open(&self, spec: AudioSpec) -> Result<Box<dyn AudioSink>, StreamError>;
}
