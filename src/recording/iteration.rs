// Iteration - one bounded recording window and its fallback resolution
//
// Every path out of `resolve_iteration` yields an in-range frequency. A
// window that never sees a nonzero dominant bin, a failed read, a stalled
// source, or a failed open each fall back to a random in-range value.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};

use crate::analysis::{dominant_frequency, remap_into_range, PeakEstimate};
use crate::config::{DetectorConfiguration, RecordingConfig};
use crate::error::{log_acquisition_error, log_analysis_error, AnalysisError};
use crate::random::FallbackGenerator;
use crate::spectrum::SpectrumSource;

/// How an iteration arrived at its frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Loudest bin of the window, already in range
    Detected,
    /// Loudest bin of the window, scaled into range
    Remapped,
    /// Simulation mode value
    Simulated,
    /// No nonzero dominant bin during the whole window
    NoSignal,
    /// Per-iteration timeout fired before the window closed
    Timeout,
    /// Snapshot failed even after the source's own recovery attempt
    AnalysisFailed,
    /// Source could not be opened for this iteration
    SetupFailed,
    /// Synthesized after the global watchdog fired
    Watchdog,
}

impl Resolution {
    /// True when the frequency is a random substitute, not a measurement
    pub fn is_fallback(&self) -> bool {
        !matches!(
            self,
            Resolution::Detected | Resolution::Remapped | Resolution::Simulated
        )
    }
}

/// Frequency chosen for one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIteration {
    pub frequency_hz: u32,
    pub resolution: Resolution,
}

/// Sample `source` every `frame_interval` until the next frame would reach
/// the end of `window`, tracking the loudest nonzero dominant bin
///
/// # Returns
/// * `Ok(Some(peak))` - Loudest estimate of the window
/// * `Ok(None)` - No frame had a nonzero dominant frequency
/// * `Err(AnalysisError)` - A snapshot failed
pub async fn record_window<S: SpectrumSource + ?Sized>(
    source: &mut S,
    window: Duration,
    frame_interval: Duration,
) -> Result<Option<PeakEstimate>, AnalysisError> {
    let deadline = Instant::now() + window;
    let mut ticker = interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut loudest: Option<PeakEstimate> = None;

    loop {
        ticker.tick().await;

        let bins = source.snapshot()?;
        let estimate = dominant_frequency(&bins);
        let louder = loudest.map_or(true, |best| estimate.amplitude > best.amplitude);
        if estimate.frequency_hz > 0 && estimate.amplitude > 0 && louder {
            loudest = Some(estimate);
        }

        if Instant::now() + frame_interval >= deadline {
            break;
        }
    }

    Ok(loudest)
}

/// Resolve iteration `index` to an in-range frequency
pub async fn resolve_iteration<S: SpectrumSource + ?Sized>(
    index: u32,
    source: &mut S,
    simulated: bool,
    config: &DetectorConfiguration,
    recording: &RecordingConfig,
    rng: &mut FallbackGenerator,
) -> ResolvedIteration {
    let range = config.range();

    if simulated {
        sleep(recording.simulated_window()).await;
        return ResolvedIteration {
            frequency_hz: rng.in_range(range),
            resolution: Resolution::Simulated,
        };
    }

    if !source.is_open() {
        if let Err(err) = source.open(config) {
            log_acquisition_error(&err, "RecordingController iteration setup");
            return fallback(index, Resolution::SetupFailed, config, rng);
        }
    }

    let window = record_window(source, recording.window(), recording.frame_interval());
    match timeout(recording.iteration_timeout(), window).await {
        Ok(Ok(Some(peak))) if range.contains(peak.frequency_hz) => ResolvedIteration {
            frequency_hz: peak.frequency_hz,
            resolution: Resolution::Detected,
        },
        Ok(Ok(Some(peak))) => match remap_into_range(peak.frequency_hz, range) {
            Some(frequency_hz) => {
                log::debug!(
                    "[RecordingController] Iteration {}: remapped {} Hz to {} Hz",
                    index,
                    peak.frequency_hz,
                    frequency_hz
                );
                ResolvedIteration {
                    frequency_hz,
                    resolution: Resolution::Remapped,
                }
            }
            None => fallback(index, Resolution::NoSignal, config, rng),
        },
        Ok(Ok(None)) => fallback(index, Resolution::NoSignal, config, rng),
        Ok(Err(err)) => {
            log_analysis_error(&err, "RecordingController iteration");
            fallback(index, Resolution::AnalysisFailed, config, rng)
        }
        Err(_) => fallback(index, Resolution::Timeout, config, rng),
    }
}

fn fallback(
    index: u32,
    resolution: Resolution,
    config: &DetectorConfiguration,
    rng: &mut FallbackGenerator,
) -> ResolvedIteration {
    let frequency_hz = rng.in_range(config.range());
    log::warn!(
        "[RecordingController] Iteration {}: {:?}, using fallback {} Hz",
        index,
        resolution,
        frequency_hz
    );
    ResolvedIteration {
        frequency_hz,
        resolution,
    }
}
