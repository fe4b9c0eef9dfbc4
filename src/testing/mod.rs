//! Testability harness utilities.
//!
//! Deterministic stand-ins for live hardware: a scripted spectrum source
//! whose snapshots, open results, and call counts are controlled through a
//! shared handle, and builders for bin arrays with spikes at chosen places.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{DetectorConfiguration, DEFAULT_SAMPLE_RATE};
use crate::error::{AcquisitionError, AnalysisError};
use crate::spectrum::{FrequencyBins, SpectrumSource, StreamInfo};

/// Bins for an analyser of `fft_size` with spikes at `(bin_index, amplitude)`
///
/// Indices past the end are ignored.
pub fn tone_bins(fft_size: usize, spikes: &[(usize, u8)]) -> FrequencyBins {
    let mut amplitudes = vec![0u8; fft_size / 2];
    for &(index, amplitude) in spikes {
        if let Some(slot) = amplitudes.get_mut(index) {
            *slot = amplitude;
        }
    }
    FrequencyBins::new(amplitudes, DEFAULT_SAMPLE_RATE)
}

/// Bins with one spike at the bin nearest `frequency_hz`
pub fn tone_at(fft_size: usize, frequency_hz: f64, amplitude: u8) -> FrequencyBins {
    let probe = FrequencyBins::silent(fft_size, DEFAULT_SAMPLE_RATE);
    let index = probe.bin_for_frequency(frequency_hz);
    tone_bins(fft_size, &[(index, amplitude)])
}

#[derive(Debug, Default)]
struct ScriptState {
    frames: VecDeque<Result<FrequencyBins, AnalysisError>>,
    /// Returned once the script runs dry
    idle_frame: Option<FrequencyBins>,
    open_results: VecDeque<Result<(), AcquisitionError>>,
    open: bool,
    open_calls: u32,
    close_calls: u32,
    snapshot_calls: u32,
}

/// Shared view of a [`ScriptedSource`], usable after the source moved away
#[derive(Clone, Default)]
pub struct ScriptHandle {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptHandle {
    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_frame(&self, bins: FrequencyBins) {
        self.lock().frames.push_back(Ok(bins));
    }

    pub fn push_frames(&self, bins: FrequencyBins, count: usize) {
        let mut state = self.lock();
        for _ in 0..count {
            state.frames.push_back(Ok(bins.clone()));
        }
    }

    pub fn push_error(&self, err: AnalysisError) {
        self.lock().frames.push_back(Err(err));
    }

    /// Snapshot returned whenever the script is empty (default: silence)
    pub fn set_idle_frame(&self, bins: FrequencyBins) {
        self.lock().idle_frame = Some(bins);
    }

    /// Queue the result of the next `open` call (default: success)
    pub fn push_open_result(&self, result: Result<(), AcquisitionError>) {
        self.lock().open_results.push_back(result);
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn open_calls(&self) -> u32 {
        self.lock().open_calls
    }

    pub fn close_calls(&self) -> u32 {
        self.lock().close_calls
    }

    pub fn snapshot_calls(&self) -> u32 {
        self.lock().snapshot_calls
    }

    pub fn remaining_frames(&self) -> usize {
        self.lock().frames.len()
    }
}

/// Spectrum source replaying queued snapshots and errors
pub struct ScriptedSource {
    handle: ScriptHandle,
    fft_size: usize,
    simulated: bool,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            handle: ScriptHandle::default(),
            fft_size: DetectorConfiguration::default().fft_size(),
            simulated: false,
        }
    }

    /// Report `is_simulated() == true`
    pub fn simulated(mut self) -> Self {
        self.simulated = true;
        self
    }

    pub fn handle(&self) -> ScriptHandle {
        self.handle.clone()
    }
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumSource for ScriptedSource {
    fn open(&mut self, config: &DetectorConfiguration) -> Result<StreamInfo, AcquisitionError> {
        let mut state = self.handle.lock();
        state.open_calls += 1;
        state.open_results.pop_front().unwrap_or(Ok(()))?;
        state.open = true;
        self.fft_size = config.fft_size();
        Ok(StreamInfo {
            sample_rate: DEFAULT_SAMPLE_RATE,
            fft_size: self.fft_size,
            constraints: None,
        })
    }

    fn snapshot(&mut self) -> Result<FrequencyBins, AnalysisError> {
        let mut state = self.handle.lock();
        state.snapshot_calls += 1;
        if !state.open {
            return Err(AnalysisError::NotOpen);
        }
        match state.frames.pop_front() {
            Some(frame) => frame,
            None => Ok(state
                .idle_frame
                .clone()
                .unwrap_or_else(|| FrequencyBins::silent(self.fft_size, DEFAULT_SAMPLE_RATE))),
        }
    }

    fn close(&mut self) {
        let mut state = self.handle.lock();
        state.close_calls += 1;
        state.open = false;
    }

    fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    fn is_simulated(&self) -> bool {
        self.simulated
    }
}
