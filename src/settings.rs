//! Settings for the streaming engine, the spectrum monitor and the controller.
//!
//! Plain structs with `Default` values and `with_*` builder methods. Nothing
//! here is persisted; the binary maps its command line onto these.

use std::time::Duration;

use crate::types::AudioSpec;

/// Placeholder replaced by the stream URL in [`DecoderCommand::args`].
pub const URL_PLACEHOLDER: &str = "{url}";

/// External program that decodes a URL into raw s16le PCM on stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl DecoderCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// `ffmpeg` configured to emit interleaved s16le at the given spec.
    pub fn ffmpeg(spec: AudioSpec) -> Self {
        Self::new("ffmpeg").args([
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            URL_PLACEHOLDER.to_string(),
            "-vn".to_string(),
            "-f".to_string(),
            "s16le".to_string(),
            "-acodec".to_string(),
            "pcm_s16le".to_string(),
            "-ac".to_string(),
            spec.channels.to_string(),
            "-ar".to_string(),
            spec.sample_rate.to_string(),
            "pipe:1".to_string(),
        ])
    }

    /// Arguments with every `{url}` placeholder substituted.
    pub fn resolved_args(&self, url: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace(URL_PLACEHOLDER, url))
            .collect()
    }
}

impl Default for DecoderCommand {
    fn default() -> Self {
        Self::ffmpeg(AudioSpec::default())
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub decoder: DecoderCommand,
    /// Layout the decoder is asked to produce and the device is opened with.
    pub spec: AudioSpec,
    /// Frames moved through the pipeline per iteration.
    pub chunk_frames: usize,
    /// Opaque output device name; `None` selects the host default.
    pub device_id: Option<String>,
    /// Device ring capacity, in chunks.
    pub device_buffer_chunks: usize,
    /// How long `play` waits for the first chunk before returning.
    pub startup_grace: Duration,
    /// Bound on waiting for the audio thread in `stop`.
    pub join_timeout: Duration,
    /// Bound between a termination request and a forced kill.
    pub terminate_timeout: Duration,
    /// A device that accepts no samples for this long is treated as failed.
    pub stall_timeout: Duration,
    /// Bound on waiting for a previous session to release the output.
    pub lease_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let spec = AudioSpec::default();
        Self {
            decoder: DecoderCommand::ffmpeg(spec),
            spec,
            chunk_frames: 4096, // ~93ms @ 44.1kHz
            device_id: None,
            device_buffer_chunks: 2,
            startup_grace: Duration::from_millis(1500),
            join_timeout: Duration::from_secs(2),
            terminate_timeout: Duration::from_secs(1),
            stall_timeout: Duration::from_secs(2),
            lease_timeout: Duration::from_secs(3),
        }
    }
}

impl EngineSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decoder(mut self, decoder: DecoderCommand) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_chunk_frames(mut self, frames: usize) -> Self {
        self.chunk_frames = frames.max(1);
        self
    }

    pub fn with_device_id(mut self, device_id: Option<String>) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn with_device_buffer_chunks(mut self, chunks: usize) -> Self {
        self.device_buffer_chunks = chunks.max(1);
        self
    }

    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn with_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = timeout;
        self
    }

    /// Raw PCM bytes requested from the decoder per iteration.
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_frames * self.spec.bytes_per_frame()
    }
}

#[derive(Debug, Clone)]
pub struct SpectrumSettings {
    /// Number of logarithmic bands in each snapshot.
    pub bands: usize,
    /// Maximum mono samples fed to the FFT.
    pub window_len: usize,
    pub min_hz: f32,
    pub max_hz: f32,
    /// Analysis cadence, independent of the audio thread.
    pub interval: Duration,
}

impl Default for SpectrumSettings {
    fn default() -> Self {
        Self {
            bands: 9,
            window_len: 4096,
            min_hz: 20.0,
            max_hz: 20_000.0,
            interval: Duration::from_millis(50),
        }
    }
}

impl SpectrumSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bands(mut self, bands: usize) -> Self {
        self.bands = bands.max(1);
        self
    }

    pub fn with_window_len(mut self, len: usize) -> Self {
        self.window_len = len.max(2);
        self
    }

    pub fn with_range(mut self, min_hz: f32, max_hz: f32) -> Self {
        self.min_hz = min_hz;
        self.max_hz = max_hz;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlayerSettings {
    /// Volume (0..=100) the controller starts with.
    pub initial_volume: u8,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self { initial_volume: 50 }
    }
}

impl PlayerSettings {
    pub fn with_initial_volume(mut self, volume: u8) -> Self {
        self.initial_volume = volume.min(100);
        self
    }
}
