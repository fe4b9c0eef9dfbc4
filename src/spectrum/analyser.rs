// Analyser module - byte-scaled magnitude spectrum with temporal smoothing
//
// Mirrors the behaviour of a browser analyser node: Blackman window over the
// most recent fft_size samples, magnitude normalised by fft_size, exponential
// smoothing across frames, then dB mapped linearly onto 0..=255.

use std::collections::VecDeque;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Weight of the previous frame in the smoothed magnitude
pub const SMOOTHING_TIME_CONSTANT: f32 = 0.8;

/// Level mapped to byte 0
pub const MIN_DECIBELS: f32 = -100.0;

/// Level mapped to byte 255
pub const MAX_DECIBELS: f32 = -30.0;

/// Byte frequency analyser over a sliding sample window
pub struct ByteAnalyser {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    /// Blackman window (pre-computed)
    window: Vec<f32>,
    samples: VecDeque<f32>,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl ByteAnalyser {
    /// Create an analyser
    ///
    /// # Arguments
    /// * `fft_size` - Window length; the snapshot holds `fft_size / 2` bins
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        let alpha = 0.16f32;
        let a0 = 0.5 * (1.0 - alpha);
        let a1 = 0.5;
        let a2 = 0.5 * alpha;
        let n = fft_size as f32;
        let window = (0..fft_size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / n;
                a0 - a1 * phase.cos() + a2 * (2.0 * phase).cos()
            })
            .collect();

        Self {
            fft,
            fft_size,
            window,
            samples: VecDeque::from(vec![0.0; fft_size]),
            smoothed: vec![0.0; fft_size / 2],
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Append mono samples, keeping only the most recent `fft_size`
    pub fn push_samples(&mut self, samples: &[f32]) {
        for &sample in samples {
            if self.samples.len() == self.fft_size {
                self.samples.pop_front();
            }
            self.samples.push_back(sample);
        }
    }

    /// Compute the current byte spectrum
    ///
    /// Each call advances the smoothing state by one frame, so repeated calls
    /// without new samples converge on the same spectrum.
    pub fn byte_frequency_data(&mut self) -> Vec<u8> {
        for (slot, (&sample, &weight)) in self
            .scratch
            .iter_mut()
            .zip(self.samples.iter().zip(self.window.iter()))
        {
            *slot = Complex::new(sample * weight, 0.0);
        }

        self.fft.process(&mut self.scratch);

        let scale = 1.0 / self.fft_size as f32;
        let byte_range = 255.0 / (MAX_DECIBELS - MIN_DECIBELS);
        let bins = self.bin_count();
        let mut output = Vec::with_capacity(bins);

        for k in 0..bins {
            let magnitude = self.scratch[k].norm() * scale;
            let smoothed = SMOOTHING_TIME_CONSTANT * self.smoothed[k]
                + (1.0 - SMOOTHING_TIME_CONSTANT) * magnitude;
            self.smoothed[k] = if smoothed.is_finite() { smoothed } else { 0.0 };

            let value = if self.smoothed[k] > 0.0 {
                let db = 20.0 * self.smoothed[k].log10();
                (byte_range * (db - MIN_DECIBELS)).clamp(0.0, 255.0)
            } else {
                0.0
            };
            output.push(value as u8);
        }

        output
    }

    /// Drop buffered samples and smoothing history
    pub fn reset(&mut self) {
        self.samples.iter_mut().for_each(|s| *s = 0.0);
        self.smoothed.iter_mut().for_each(|s| *s = 0.0);
    }
}
