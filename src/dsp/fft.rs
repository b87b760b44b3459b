use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use std::sync::Arc;

/// Planned forward real FFT of a fixed length with reusable buffers.
pub struct FftProcessor {
    fft: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex<f32>>,
    spectrum: Vec<Complex<f32>>,
}

impl FftProcessor {
    pub fn new(len: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(len);
        let scratch = fft.make_scratch_vec();
        let spectrum = fft.make_output_vec();
        Self {
            fft,
            scratch,
            spectrum,
        }
    }

    pub fn len(&self) -> usize {
        self.fft.len()
    }

    /// Transform `windowed` (clobbered) into `len / 2 + 1` complex bins.
    ///
    /// A length mismatch yields an all-zero spectrum.
    pub fn process_forward(&mut self, windowed: &mut [f32]) -> &[Complex<f32>] {
        if let Err(e) = self
            .fft
            .process_with_scratch(windowed, &mut self.spectrum, &mut self.scratch)
        {
            log::warn!("fft failed: {e}");
            self.spectrum.fill(Complex::new(0.0, 0.0));
        }
        &self.spectrum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dc_lands_in_bin_zero() {
        let mut fft = FftProcessor::new(8);
        let mut input = vec![1.0; 8];
        let out = fft.process_forward(&mut input);
        assert_eq!(out.len(), 5);
        assert!((out[0].re - 8.0).abs() < 1e-5);
        assert!(out[1..].iter().all(|c| c.norm() < 1e-5));
    }

    #[test]
    fn wrong_length_is_silent() {
        let mut fft = FftProcessor::new(8);
        let mut input = vec![1.0; 6];
        assert!(fft.process_forward(&mut input).iter().all(|c| c.norm() == 0.0));
    }
}
