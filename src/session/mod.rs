// Session module - continuous detection state machine
//
// DetectionSession consumes one spectrum snapshot per frame and tracks the
// "current" frequency. A frequency run ends when a new detection differs by
// more than the change tolerance, or when the session is deactivated; runs
// lasting at least the minimum event duration are reported as events.
//
// The state machine is synchronous. `runner` drives it from an async
// polling loop against a SpectrumSource.

pub mod runner;


pub use runner::{run_continuous, SessionRunReport, SessionUpdate};

use serde::{Deserialize, Serialize};

use crate::analysis::{
    boosted_dominant_frequency, dominant_frequency, is_angelic, top_peaks, DominantFrequency,
    FrequencySample, SpectrumStats, DEFAULT_TOP_PEAKS,
};
use crate::config::{DetectorConfiguration, SessionConfig};
use crate::random::FallbackGenerator;
use crate::spectrum::FrequencyBins;
use crate::telemetry::{self, MetricEvent};

/// Status shown while the detector is off
pub const STATUS_INACTIVE: &str = "Detector inactive";
/// Microphone mode, nothing angelic in view
pub const STATUS_MICROPHONE: &str = "Microphone Active - Make some noise!";
/// Microphone mode, current frequency matches a reference
pub const STATUS_MICROPHONE_ANGELIC: &str = "Angelic frequency detected!";
/// Simulation mode, nothing angelic in view
pub const STATUS_SIMULATION: &str = "Simulation Mode - Detecting...";
/// Simulation mode, current frequency matches a reference
pub const STATUS_SIMULATION_ANGELIC: &str = "Simulation: Angelic frequency detected!";

/// Floor of the adaptive threshold
const ADAPTIVE_THRESHOLD_MIN: f32 = 3.0;

/// Fraction of the observed maximum used as the adaptive threshold
const ADAPTIVE_THRESHOLD_RATIO: f32 = 0.9;

/// Spectra whose loudest bin is at or below this count as silent
const SILENT_FRAME_MAX: u8 = 2;

/// A frequency that stayed current for at least the minimum duration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFrequencyEvent {
    pub frequency_hz: u32,
    pub duration_seconds: f64,
    /// Start of the run
    pub timestamp_ms: u64,
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Inactive,
    Active { simulated: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrequencyRun {
    frequency_hz: u32,
    started_ms: u64,
}

/// Public view of the session after a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub active: bool,
    pub current_frequency_hz: u32,
    pub is_angelic: bool,
    pub status: String,
    /// Top peaks of the last frame that fall inside the configured window
    pub dominant_frequencies: Vec<DominantFrequency>,
}

/// Continuous-mode detection state machine
pub struct DetectionSession {
    config: DetectorConfiguration,
    session_config: SessionConfig,
    state: SessionState,
    current_frequency_hz: u32,
    is_angelic: bool,
    status: &'static str,
    run: Option<FrequencyRun>,
    last_sample: Option<FrequencySample>,
    dominant_frequencies: Vec<DominantFrequency>,
    silent_frames: u64,
}

impl DetectionSession {
    pub fn new(config: DetectorConfiguration, session_config: SessionConfig) -> Self {
        Self {
            config,
            session_config,
            state: SessionState::Inactive,
            current_frequency_hz: 0,
            is_angelic: false,
            status: STATUS_INACTIVE,
            run: None,
            last_sample: None,
            dominant_frequencies: Vec::new(),
            silent_frames: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active { .. })
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self.state, SessionState::Active { simulated: true })
    }

    pub fn config(&self) -> &DetectorConfiguration {
        &self.config
    }

    pub fn current_frequency_hz(&self) -> u32 {
        self.current_frequency_hz
    }

    pub fn status(&self) -> &'static str {
        self.status
    }

    /// Dominant estimate of the last processed frame, before thresholding
    pub fn last_sample(&self) -> Option<FrequencySample> {
        self.last_sample
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            active: self.is_active(),
            current_frequency_hz: self.current_frequency_hz,
            is_angelic: self.is_angelic,
            status: self.status.to_string(),
            dominant_frequencies: self.dominant_frequencies.clone(),
        }
    }

    /// Enter `Active`, replacing the configuration for this activation
    pub fn activate(&mut self, config: DetectorConfiguration, simulated: bool) {
        if self.is_active() {
            log::warn!("[DetectionSession] activate() while active; restarting run tracking");
        }
        self.config = config;
        self.reset_transient();
        self.state = SessionState::Active { simulated };
        self.status = idle_status(simulated);
        log::info!(
            "[DetectionSession] Activated ({} mode, {}-{} Hz, {:?})",
            if simulated { "simulation" } else { "microphone" },
            self.config.min_frequency_hz,
            self.config.max_frequency_hz,
            self.config.sensitivity
        );
    }

    /// Amplitude a detection must exceed for this frame
    ///
    /// The sensitivity noise floor, lowered to `max(3, max * 0.9)` in
    /// microphone mode when the loudest bin is nonzero but below the floor.
    pub fn threshold_for(&self, stats: &SpectrumStats) -> f32 {
        let floor = self.config.sensitivity.noise_floor();
        if self.is_simulated() {
            return floor;
        }
        let max = stats.max as f32;
        if max > 0.0 && max < floor {
            (max * ADAPTIVE_THRESHOLD_RATIO).max(ADAPTIVE_THRESHOLD_MIN)
        } else {
            floor
        }
    }

    /// Process one frame
    ///
    /// # Arguments
    /// * `bins` - Snapshot pulled from the source this frame
    /// * `now_ms` - Frame timestamp
    /// * `rng` - Randomness for the simulated no-detection value
    ///
    /// # Returns
    /// The event for a run that ended this frame, if it was long enough
    pub fn tick(
        &mut self,
        bins: &FrequencyBins,
        now_ms: u64,
        rng: &mut FallbackGenerator,
    ) -> Option<DetectedFrequencyEvent> {
        let SessionState::Active { simulated } = self.state else {
            return None;
        };

        let range = self.config.range();
        let stats = SpectrumStats::of(bins);
        if !simulated {
            self.track_silence(&stats);
        }

        let estimate = if simulated {
            dominant_frequency(bins)
        } else {
            boosted_dominant_frequency(bins, range)
        };
        self.last_sample = Some(FrequencySample::from_estimate(estimate, now_ms));

        self.dominant_frequencies = top_peaks(bins, DEFAULT_TOP_PEAKS)
            .into_iter()
            .filter(|peak| range.contains(peak.frequency_hz))
            .collect();

        let threshold = self.threshold_for(&stats);
        let frequency = estimate.frequency_hz;

        if estimate.amplitude as f32 > threshold && range.contains(frequency) {
            self.current_frequency_hz = frequency;
            self.is_angelic = is_angelic(frequency);
            self.status = match (self.is_angelic, simulated) {
                (true, true) => STATUS_SIMULATION_ANGELIC,
                (true, false) => STATUS_MICROPHONE_ANGELIC,
                (false, true) => STATUS_SIMULATION,
                (false, false) => STATUS_MICROPHONE,
            };

            let changed = match self.run {
                Some(run) => {
                    run.frequency_hz.abs_diff(frequency) > self.session_config.change_tolerance_hz
                }
                None => true,
            };
            if changed {
                let finished = self.close_run(now_ms);
                self.run = Some(FrequencyRun {
                    frequency_hz: frequency,
                    started_ms: now_ms,
                });
                return finished;
            }
        } else if simulated {
            let wobble = ((now_ms as f64 / 500.0).sin() * 15.0).round() as i64;
            let value = rng.in_range(range) as i64 + wobble;
            self.current_frequency_hz = value.max(0) as u32;
            self.is_angelic = false;
            self.status = STATUS_SIMULATION;
        } else {
            self.current_frequency_hz = 0;
            self.is_angelic = false;
            self.status = STATUS_MICROPHONE;
        }

        None
    }

    /// Leave `Active`, flushing an in-flight run that lasted long enough
    ///
    /// Idempotent: an inactive session returns `None` and stays unchanged.
    pub fn deactivate(&mut self, now_ms: u64) -> Option<DetectedFrequencyEvent> {
        if !self.is_active() {
            return None;
        }

        let flushed = self.close_run(now_ms);
        self.reset_transient();
        self.state = SessionState::Inactive;
        self.status = STATUS_INACTIVE;
        log::info!("[DetectionSession] Deactivated");
        flushed
    }

    fn close_run(&mut self, now_ms: u64) -> Option<DetectedFrequencyEvent> {
        let run = self.run.take()?;
        if run.frequency_hz == 0 {
            return None;
        }

        let elapsed_ms = now_ms.saturating_sub(run.started_ms);
        if elapsed_ms < self.session_config.min_event_duration_ms {
            return None;
        }

        let event = DetectedFrequencyEvent {
            frequency_hz: run.frequency_hz,
            duration_seconds: elapsed_ms as f64 / 1000.0,
            timestamp_ms: run.started_ms,
        };
        log::info!(
            "[DetectionSession] {} Hz held for {:.2}s",
            event.frequency_hz,
            event.duration_seconds
        );
        telemetry::hub().record(MetricEvent::FrequencyDetected {
            frequency_hz: event.frequency_hz,
            duration_seconds: event.duration_seconds,
        });
        Some(event)
    }

    fn track_silence(&mut self, stats: &SpectrumStats) {
        let every = self.session_config.silent_frame_log_every.max(1);

        if stats.max <= SILENT_FRAME_MAX {
            self.silent_frames += 1;
            if self.silent_frames % every == 0 {
                log::warn!(
                    "[DetectionSession] No audio signal for {} frames (max {}, mean {:.2}); check the microphone",
                    self.silent_frames,
                    stats.max,
                    stats.mean
                );
                telemetry::hub().record(MetricEvent::SilenceWarning {
                    silent_frames: self.silent_frames,
                });
            }
        } else {
            if self.silent_frames >= every {
                log::info!(
                    "[DetectionSession] Audio signal returned after {} silent frames (max {}, {} active bins)",
                    self.silent_frames,
                    stats.max,
                    stats.non_zero
                );
            }
            self.silent_frames = 0;
        }
    }

    fn reset_transient(&mut self) {
        self.current_frequency_hz = 0;
        self.is_angelic = false;
        self.run = None;
        self.last_sample = None;
        self.dominant_frequencies.clear();
        self.silent_frames = 0;
    }
}

/// Status line for an active session with nothing detected yet
pub fn idle_status(simulated: bool) -> &'static str {
    if simulated {
        STATUS_SIMULATION
    } else {
        STATUS_MICROPHONE
    }
}
