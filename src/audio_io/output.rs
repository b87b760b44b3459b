use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::StreamError;
use crate::settings::EngineSettings;
use crate::traits::{AudioSink, SinkFactory};
use crate::types::{AudioSpec, Sample};

const FULL_RING_BACKOFF: Duration = Duration::from_micros(200);

// ============================================================================
//  DEVICES
// ============================================================================

/// Names of every output device on the default host.
pub fn output_device_names() -> Result<Vec<String>, StreamError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| StreamError::Device(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// `None` and `"default"` select the host default; anything else must match a device name.
fn find_output_device(device_id: Option<&str>) -> Result<cpal::Device, StreamError> {
    let host = cpal::default_host();
    match device_id {
        None | Some("default") => host
            .default_output_device()
            .ok_or_else(|| StreamError::Device("no default output device".into())),
        Some(name) => host
            .output_devices()
            .map_err(|e| StreamError::Device(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| StreamError::Device(format!("output device `{name}` not found"))),
    }
}

// ============================================================================
//  SINK
// ============================================================================

/// Opens cpal output streams fed through an rtrb ring.
#[derive(Debug, Clone)]
pub struct CpalSinkFactory {
    device_id: Option<String>,
    ring_chunks: usize,
    chunk_frames: usize,
    stall_timeout: Duration,
}

impl CpalSinkFactory {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            device_id: settings.device_id.clone(),
            ring_chunks: settings.device_buffer_chunks,
            chunk_frames: settings.chunk_frames,
            stall_timeout: settings.stall_timeout,
        }
    }
}

impl SinkFactory for CpalSinkFactory {
    fn open(&self, spec: AudioSpec) -> Result<Box<dyn AudioSink>, StreamError> {
        let device = find_output_device(self.device_id.as_deref())?;
        let supported = device
            .default_output_config()
            .map_err(|e| StreamError::Device(e.to_string()))?;
        let config = cpal::StreamConfig {
            channels: spec.channels,
            sample_rate: cpal::SampleRate(spec.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let capacity = self.ring_chunks * self.chunk_frames * spec.channels as usize;
        let (producer, consumer) = RingBuffer::<Sample>::new(capacity.max(1));
        let failed = Arc::new(AtomicBool::new(false));

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => {
                build_output_stream::<f32>(&device, &config, consumer, failed.clone())?
            }
            cpal::SampleFormat::I16 => {
                build_output_stream::<i16>(&device, &config, consumer, failed.clone())?
            }
            cpal::SampleFormat::U16 => {
                build_output_stream::<u16>(&device, &config, consumer, failed.clone())?
            }
            format => {
                return Err(StreamError::Device(format!(
                    "sample format {format} not supported"
                )));
            }
        };
        stream
            .play()
            .map_err(|e| StreamError::Device(e.to_string()))?;

        log::info!(
            "output opened on `{}`: {} Hz, {} ch, {}",
            device.name().unwrap_or_else(|_| "<unnamed>".into()),
            spec.sample_rate,
            spec.channels,
            supported.sample_format()
        );

        Ok(Box::new(CpalSink {
            _stream: stream,
            ring: RingWriter::new(producer, failed, self.stall_timeout),
        }))
    }
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: Consumer<Sample>,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, StreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                // underrun plays silence
                for out in data.iter_mut() {
                    *out = T::from_sample(consumer.pop().unwrap_or(0.0));
                }
            },
            move |err| {
                log::error!("output stream error: {err}");
                failed.store(true, Ordering::Release);
            },
            None,
        )
        .map_err(|e| StreamError::Device(e.to_string()))
}

/// Keeps the cpal stream alive for as long as the audio thread writes to it.
struct CpalSink {
    _stream: cpal::Stream,
    ring: RingWriter,
}

impl AudioSink for CpalSink {
    fn write(&mut self, samples: &[Sample]) -> Result<(), StreamError> {
        self.ring.write_blocking(samples)
    }
}

/// Producer half of the device ring with blocking, stall-aware writes.
struct RingWriter {
    producer: Producer<Sample>,
    failed: Arc<AtomicBool>,
    stall_timeout: Duration,
}

impl RingWriter {
    fn new(producer: Producer<Sample>, failed: Arc<AtomicBool>, stall_timeout: Duration) -> Self {
        Self {
            producer,
            failed,
            stall_timeout,
        }
    }

    fn write_blocking(&mut self, samples: &[Sample]) -> Result<(), StreamError> {
        let mut written = 0;
        let mut last_progress = Instant::now();
        while written < samples.len() {
            if self.failed.load(Ordering::Acquire) {
                return Err(StreamError::Device("output stream reported an error".into()));
            }
            let n = self.producer.slots().min(samples.len() - written);
            if n == 0 {
                if last_progress.elapsed() >= self.stall_timeout {
                    return Err(StreamError::Device(format!(
                        "output accepted no samples for {:?}",
                        self.stall_timeout
                    )));
                }
                thread::sleep(FULL_RING_BACKOFF);
                continue;
            }
            if let Ok(chunk) = self.producer.write_chunk_uninit(n) {
                written += chunk.fill_from_iter(samples[written..written + n].iter().copied());
                last_progress = Instant::now();
            }
        }
        Ok(())
    }
}
