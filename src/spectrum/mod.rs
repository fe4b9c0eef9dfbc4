// Spectrum module - audio acquisition behind a single source interface
//
// A SpectrumSource owns the capture device (or synthetic generator) and
// hands out byte-scaled frequency snapshots on demand. Only one session may
// hold a source open at a time; callers enforce that by disabling one mode
// before enabling the other.

pub mod analyser;
pub mod constraints;
pub mod microphone;
pub mod synthetic;

pub use analyser::{ByteAnalyser, SMOOTHING_TIME_CONSTANT};
pub use constraints::CaptureConstraints;
pub use microphone::MicrophoneSource;
pub use synthetic::{SimulatedPattern, SimulatedReading, SyntheticSource};

use serde::{Deserialize, Serialize};

use crate::config::DetectorConfiguration;
use crate::error::{AcquisitionError, AnalysisError};

/// One frequency-domain snapshot: `fft_size / 2` amplitudes in `[0, 255]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyBins {
    amplitudes: Vec<u8>,
    sample_rate: u32,
}

impl FrequencyBins {
    pub fn new(amplitudes: Vec<u8>, sample_rate: u32) -> Self {
        Self {
            amplitudes,
            sample_rate,
        }
    }

    /// All-zero snapshot for an analyser of `fft_size`
    pub fn silent(fft_size: usize, sample_rate: u32) -> Self {
        Self::new(vec![0; fft_size / 2], sample_rate)
    }

    pub fn amplitudes(&self) -> &[u8] {
        &self.amplitudes
    }

    pub fn len(&self) -> usize {
        self.amplitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amplitudes.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn nyquist(&self) -> f64 {
        self.sample_rate as f64 / 2.0
    }

    /// Frequency of bin `index`: `round(index * nyquist / len)`
    pub fn bin_frequency(&self, index: usize) -> u32 {
        if self.amplitudes.is_empty() {
            return 0;
        }
        (index as f64 * self.nyquist() / self.amplitudes.len() as f64).round() as u32
    }

    /// Nearest bin index for a frequency, clamped to the snapshot
    pub fn bin_for_frequency(&self, frequency_hz: f64) -> usize {
        if self.amplitudes.is_empty() {
            return 0;
        }
        let index = (frequency_hz * self.amplitudes.len() as f64 / self.nyquist()).round();
        (index.max(0.0) as usize).min(self.amplitudes.len() - 1)
    }
}

/// Description of an opened source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub fft_size: usize,
    /// Constraint step that was accepted; `None` for generated spectra
    pub constraints: Option<CaptureConstraints>,
}

/// Trait implemented by every audio acquisition backend
///
/// `open` requests exclusive access; `snapshot` returns the current spectrum
/// (attempting one in-place re-acquisition on a failed read); `close` is
/// idempotent and never fails.
pub trait SpectrumSource: Send {
    fn open(&mut self, config: &DetectorConfiguration) -> Result<StreamInfo, AcquisitionError>;
    fn snapshot(&mut self) -> Result<FrequencyBins, AnalysisError>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
    /// True for generated spectra (no device behind the source)
    fn is_simulated(&self) -> bool {
        false
    }
}

impl<S: SpectrumSource + ?Sized> SpectrumSource for Box<S> {
    fn open(&mut self, config: &DetectorConfiguration) -> Result<StreamInfo, AcquisitionError> {
        (**self).open(config)
    }

    fn snapshot(&mut self) -> Result<FrequencyBins, AnalysisError> {
        (**self).snapshot()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn is_simulated(&self) -> bool {
        (**self).is_simulated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_frequency_uses_bin_count_as_divisor() {
        let bins = FrequencyBins::silent(4096, 44_100);
        assert_eq!(bins.len(), 2048);
        assert_eq!(bins.bin_frequency(0), 0);
        // 40 * 22050 / 2048 = 430.66
        assert_eq!(bins.bin_frequency(40), 431);
        assert_eq!(bins.bin_frequency(49), 528);
    }

    #[test]
    fn bin_for_frequency_round_trips_nearest_bin() {
        let bins = FrequencyBins::silent(4096, 44_100);
        assert_eq!(bins.bin_for_frequency(528.0), 49);
        assert_eq!(bins.bin_for_frequency(-20.0), 0);
        assert_eq!(bins.bin_for_frequency(1_000_000.0), 2047);
    }
}
