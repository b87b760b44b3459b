use std::time::Instant;

use crate::error::AudioStreamingError;

pub type Sample = f32;

/// PCM layout shared by the decoder, the engine and the output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioSpec {
    pub const fn stereo(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 2,
        }
    }

    /// Bytes in one frame of s16le PCM.
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * 2
    }
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self::stereo(44_100)
    }
}

#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// interleaved samples, gain already applied
    pub samples: Vec<Sample>,
    pub spec: AudioSpec,
    /// monotonically increasing per engine
    pub sequence: u64,
    pub captured_at: Instant,
}

impl AudioChunk {
    pub fn new(samples: Vec<Sample>, spec: AudioSpec, sequence: u64) -> Self {
        Self {
            samples,
            spec,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.spec.channels.max(1) as usize
    }

    /// Average all channels of each frame into a single mono sample.
    pub fn mono(&self) -> Vec<Sample> {
        let channels = self.spec.channels.max(1) as usize;
        if channels == 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}

/// One normalized magnitude per logarithmic band, each in `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumSnapshot {
    pub bands: Vec<f32>,
    /// Sequence of the chunk this snapshot was computed from (0 for the initial one).
    pub sequence: u64,
}

impl SpectrumSnapshot {
    pub fn silent(bands: usize) -> Self {
        Self {
            bands: vec![0.0; bands],
            sequence: 0,
        }
    }

    pub fn peak(&self) -> f32 {
        self.bands.iter().copied().fold(0.0, f32::max)
    }
}

/// Last failure handed from the audio thread to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub message: String,
    pub url: Option<String>,
}

impl From<&AudioStreamingError> for ErrorRecord {
    fn from(err: &AudioStreamingError) -> Self {
        Self {
            message: err.to_string(),
            url: err.url().map(str::to_owned),
        }
    }
}
