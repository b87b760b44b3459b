//! Log-spaced band magnitudes of a single PCM chunk.
//!
//! The chunk is downmixed to mono, Hann-windowed and transformed with a real
//! FFT. Bin magnitudes are averaged inside each band, compressed with
//! `log10(v + 1)` and scaled so the loudest band reads exactly `1.0`.
//! Chunks shorter than the window are windowed at their own length and
//! zero-padded, so one FFT plan serves every chunk.

use super::fft::FftProcessor;
use crate::settings::SpectrumSettings;
use crate::types::{AudioChunk, SpectrumSnapshot};

/// Symmetric Hann window: both end points are zero.
pub fn hann_window(n: usize) -> Vec<f32> {
    if n < 2 {
        return vec![1.0; n];
    }
    let denom = (n - 1) as f32;
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / denom).cos())
        .collect()
}

/// `bands + 1` geometric edges from `min_hz` to `max_hz`.
pub fn band_edges(min_hz: f32, max_hz: f32, bands: usize) -> Vec<f32> {
    let ratio = max_hz / min_hz;
    (0..=bands)
        .map(|i| min_hz * ratio.powf(i as f32 / bands as f32))
        .collect()
}

pub struct SpectrumAnalyzer {
    settings: SpectrumSettings,
    edges: Vec<f32>,
    fft: FftProcessor,
    window: Vec<f32>,
    frame: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new(settings: SpectrumSettings) -> Self {
        let edges = band_edges(settings.min_hz, settings.max_hz, settings.bands);
        let len = settings.window_len;
        Self {
            settings,
            edges,
            fft: FftProcessor::new(len),
            window: hann_window(len),
            frame: Vec::with_capacity(len),
        }
    }

    pub fn bands(&self) -> usize {
        self.settings.bands
    }

    pub fn analyze(&mut self, chunk: &AudioChunk) -> SpectrumSnapshot {
        let mut mono = chunk.mono();
        mono.truncate(self.settings.window_len);
        let n = mono.len();
        if n < 2 {
            return SpectrumSnapshot {
                bands: vec![0.0; self.settings.bands],
                sequence: chunk.sequence,
            };
        }

        let len = self.fft.len();
        self.frame.clear();
        if n == len {
            self.frame
                .extend(mono.iter().zip(self.window.iter()).map(|(s, w)| s * w));
        } else {
            let window = hann_window(n);
            self.frame
                .extend(mono.iter().zip(window.iter()).map(|(s, w)| s * w));
            self.frame.resize(len, 0.0);
        }

        let spectrum = self.fft.process_forward(&mut self.frame);
        let magnitudes: Vec<f32> = spectrum[..len / 2].iter().map(|c| c.norm()).collect();

        let mut bands = self.band_means(&magnitudes, chunk.spec.sample_rate as f32, len);
        for v in bands.iter_mut() {
            *v = (*v + 1.0).log10();
        }
        let max = bands.iter().copied().fold(0.0f32, f32::max);
        if max > 0.0 {
            for v in bands.iter_mut() {
                *v /= max;
            }
        }

        SpectrumSnapshot {
            bands,
            sequence: chunk.sequence,
        }
    }

    /// Mean magnitude of the bins whose centre falls in `[lo, hi)`; empty bands are zero.
    fn band_means(&self, magnitudes: &[f32], sample_rate: f32, n: usize) -> Vec<f32> {
        let bin_hz = sample_rate / n as f32;
        self.edges
            .windows(2)
            .map(|edge| {
                let (lo, hi) = (edge[0], edge[1]);
                let (sum, count) = magnitudes
                    .iter()
                    .enumerate()
                    .filter(|(k, _)| {
                        let f = *k as f32 * bin_hz;
                        f >= lo && f < hi
                    })
                    .fold((0.0f32, 0usize), |(s, c), (_, m)| (s + m, c + 1));
                if count == 0 { 0.0 } else { sum / count as f32 }
            })
            .collect()
    }
}
