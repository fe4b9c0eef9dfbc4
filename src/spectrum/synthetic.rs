// Synthetic source - procedurally generated spectra for simulation mode
//
// Two slow sinusoids indexed by wall-clock time pick one of four patterns:
// a tone near a reference frequency, an in-range drift, silence, or a tone
// outside the configured window. The chosen tone is rendered into a byte
// spectrum as a narrow peak over a faint noise floor.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{FrequencyBins, SpectrumSource, StreamInfo};
use crate::analysis::ANGELIC_REFERENCES;
use crate::config::{DetectorConfiguration, FrequencyRange, DEFAULT_SAMPLE_RATE};
use crate::error::{AcquisitionError, AnalysisError};
use crate::random::FallbackGenerator;
use crate::telemetry::{self, MetricEvent};
use crate::time::TimeSource;

/// Noise floor ceiling (exclusive) of generated spectra
const NOISE_CEILING: u32 = 4;

/// Which branch of the generator produced a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulatedPattern {
    Angelic,
    Drift,
    Silence,
    OutOfRange,
}

/// Tone chosen for one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulatedReading {
    pub pattern: SimulatedPattern,
    /// 0 during silence; may fall outside the window for `OutOfRange`
    pub frequency_hz: u32,
    pub amplitude: u8,
}

/// Blend of two slow envelopes, in `[0, 1]`
pub fn pattern_factor(now_ms: u64) -> f64 {
    let t = now_ms as f64;
    let first = (t / 5000.0).sin() * 0.5 + 0.5;
    let second = (t / 3700.0).sin() * 0.5 + 0.5;
    (first + second) / 2.0
}

/// Pick the simulated tone for `now_ms`
pub fn simulated_reading(
    now_ms: u64,
    range: FrequencyRange,
    rng: &mut FallbackGenerator,
) -> SimulatedReading {
    let t = now_ms as f64;
    let factor = pattern_factor(now_ms);

    let (pattern, frequency, amplitude) = if factor > 0.6 {
        let index = ((t / 5000.0) % ANGELIC_REFERENCES.len() as f64).floor() as usize;
        let target = ANGELIC_REFERENCES[index.min(ANGELIC_REFERENCES.len() - 1)].frequency_hz;
        let frequency = target as f64 + (t / 500.0).sin() * 6.0;
        let amplitude = 90.0 + (t / 800.0).sin() * 20.0 + 10.0;
        (SimulatedPattern::Angelic, frequency, amplitude)
    } else if factor > 0.4 {
        let drift = ((t / 6000.0).sin() * 0.5 + 0.5) * range.span() as f64;
        let fluctuation = (t / 300.0).sin() * 15.0 + (t / 700.0).cos() * 8.0;
        let frequency = range.min_hz as f64 + drift + fluctuation;
        let amplitude = 60.0 + (t / 1500.0).sin() * 20.0 + (rng.unit() * 20.0 * factor).floor();
        (SimulatedPattern::Drift, frequency, amplitude)
    } else if factor < 0.2 {
        let amplitude = 5.0 + (rng.unit() * 15.0).floor();
        (SimulatedPattern::Silence, 0.0, amplitude)
    } else {
        let jump = (t / 1500.0).floor();
        let base = if (jump * 1.3).sin() > 0.0 {
            range.min_hz as f64 - 180.0
        } else {
            range.max_hz as f64 + 120.0
        };
        let frequency = base + (jump * 2.3).sin() * 350.0 + (t / 800.0).cos() * 50.0;
        let amplitude =
            35.0 + (t / 1200.0).sin() * 15.0 + (rng.unit() * 25.0 * (1.0 - factor)).floor();
        (SimulatedPattern::OutOfRange, frequency, amplitude)
    };

    SimulatedReading {
        pattern,
        frequency_hz: frequency.round().max(0.0) as u32,
        amplitude: amplitude.round().clamp(0.0, 255.0) as u8,
    }
}

/// Spectrum source that needs no device
pub struct SyntheticSource {
    time: Arc<dyn TimeSource>,
    rng: FallbackGenerator,
    sample_rate: u32,
    range: FrequencyRange,
    fft_size: usize,
    open: bool,
    last_reading: Option<SimulatedReading>,
}

impl SyntheticSource {
    pub fn new(time: Arc<dyn TimeSource>, rng: FallbackGenerator) -> Self {
        let defaults = DetectorConfiguration::default();
        Self {
            time,
            rng,
            sample_rate: DEFAULT_SAMPLE_RATE,
            range: defaults.range(),
            fft_size: defaults.fft_size(),
            open: false,
            last_reading: None,
        }
    }

    /// Reading behind the most recent snapshot
    pub fn last_reading(&self) -> Option<SimulatedReading> {
        self.last_reading
    }

    fn render(&mut self, reading: SimulatedReading) -> FrequencyBins {
        let len = self.fft_size / 2;
        let mut amplitudes: Vec<u8> = (0..len)
            .map(|_| self.rng.below(NOISE_CEILING) as u8)
            .collect();
        if len == 0 {
            return FrequencyBins::new(amplitudes, self.sample_rate);
        }

        let nyquist = self.sample_rate as f64 / 2.0;
        let centre = ((reading.frequency_hz as f64 * len as f64 / nyquist).round() as usize)
            .min(len - 1);
        let peak = reading.amplitude as f32;

        // Narrow triangular peak so top-peak picking sees a local maximum
        for (offset, weight) in [(0usize, 1.0f32), (1, 0.6), (2, 0.3)] {
            let value = (peak * weight).round() as u8;
            let mut raise = |index: usize| {
                if let Some(slot) = amplitudes.get_mut(index) {
                    *slot = (*slot).max(value);
                }
            };
            raise(centre + offset);
            if offset > 0 {
                if let Some(index) = centre.checked_sub(offset) {
                    raise(index);
                }
            }
        }

        FrequencyBins::new(amplitudes, self.sample_rate)
    }
}

impl SpectrumSource for SyntheticSource {
    fn open(&mut self, config: &DetectorConfiguration) -> Result<StreamInfo, AcquisitionError> {
        self.range = config.range();
        self.fft_size = config.fft_size();
        self.open = true;
        log::info!(
            "[SpectrumSource] Synthetic source opened ({}-{} Hz, fft {})",
            self.range.min_hz,
            self.range.max_hz,
            self.fft_size
        );
        telemetry::hub().record(MetricEvent::SourceOpened {
            simulated: true,
            sample_rate: self.sample_rate,
            fft_size: self.fft_size,
        });
        Ok(StreamInfo {
            sample_rate: self.sample_rate,
            fft_size: self.fft_size,
            constraints: None,
        })
    }

    fn snapshot(&mut self) -> Result<FrequencyBins, AnalysisError> {
        if !self.open {
            return Err(AnalysisError::NotOpen);
        }
        let reading = simulated_reading(self.time.now_ms(), self.range, &mut self.rng);
        self.last_reading = Some(reading);
        Ok(self.render(reading))
    }

    fn close(&mut self) {
        self.open = false;
        self.last_reading = None;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn is_simulated(&self) -> bool {
        true
    }
}
