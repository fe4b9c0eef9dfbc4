// Runner - cooperative polling loop driving a DetectionSession
//
// One snapshot per frame tick. Acquisition faults never end the loop: the
// first failure of a streak triggers a single close/open re-setup, later
// failures in the same streak are only logged. Only the stop signal ends it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, sleep, MissedTickBehavior};

use super::{DetectedFrequencyEvent, DetectionSession, SessionSnapshot};
use crate::error::{log_acquisition_error, log_analysis_error};
use crate::random::FallbackGenerator;
use crate::spectrum::SpectrumSource;
use crate::time::TimeSource;

/// Delay before the automatic re-setup after a failed read
pub const RESETUP_DELAY: Duration = Duration::from_millis(1000);

/// Messages published while the continuous session runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SessionUpdate {
    Frame(SessionSnapshot),
    Detected(DetectedFrequencyEvent),
    SourceLost { reason: String },
    Recovered,
}

/// Totals for one continuous run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRunReport {
    pub frames: u64,
    pub read_failures: u64,
    pub recoveries: u32,
    pub events: Vec<DetectedFrequencyEvent>,
}

/// Poll `source` until `stop` flips to true (or its sender is dropped)
///
/// The session must already be active and the source open. On exit the
/// session is deactivated (flushing any long-enough run) and the source is
/// closed.
#[allow(clippy::too_many_arguments)]
pub async fn run_continuous<S: SpectrumSource + ?Sized>(
    session: &mut DetectionSession,
    source: &mut S,
    frame_interval: Duration,
    time: &dyn TimeSource,
    rng: &mut FallbackGenerator,
    mut stop: watch::Receiver<bool>,
    updates: &broadcast::Sender<SessionUpdate>,
) -> SessionRunReport {
    let mut report = SessionRunReport::default();
    let mut ticker = interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut resetup_attempted = false;

    loop {
        if *stop.borrow() {
            break;
        }

        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        match source.snapshot() {
            Ok(bins) => {
                resetup_attempted = false;
                report.frames += 1;

                if let Some(event) = session.tick(&bins, time.now_ms(), rng) {
                    report.events.push(event.clone());
                    let _ = updates.send(SessionUpdate::Detected(event));
                }
                let _ = updates.send(SessionUpdate::Frame(session.snapshot()));
            }
            Err(err) => {
                report.read_failures += 1;
                if session.is_simulated() {
                    log::debug!("[DetectionSession] Simulated read failed: {}", err);
                    continue;
                }

                log_analysis_error(&err, "DetectionSession frame");
                if resetup_attempted {
                    continue;
                }
                resetup_attempted = true;
                let _ = updates.send(SessionUpdate::SourceLost {
                    reason: err.to_string(),
                });

                // Wait out the device hiccup unless asked to stop meanwhile
                tokio::select! {
                    biased;
                    _ = stop.changed() => continue,
                    _ = sleep(RESETUP_DELAY) => {}
                }

                log::warn!("[DetectionSession] Attempting automatic re-setup");
                source.close();
                match source.open(session.config()) {
                    Ok(info) => {
                        report.recoveries += 1;
                        log::info!(
                            "[DetectionSession] Audio system recovered ({} Hz, fft {})",
                            info.sample_rate,
                            info.fft_size
                        );
                        let _ = updates.send(SessionUpdate::Recovered);
                    }
                    Err(err) => log_acquisition_error(&err, "DetectionSession re-setup"),
                }
            }
        }
    }

    if let Some(event) = session.deactivate(time.now_ms()) {
        report.events.push(event.clone());
        let _ = updates.send(SessionUpdate::Detected(event));
    }
    let _ = updates.send(SessionUpdate::Frame(session.snapshot()));
    source.close();

    log::info!(
        "[DetectionSession] Stopped after {} frames ({} events, {} read failures)",
        report.frames,
        report.events.len(),
        report.read_failures
    );
    report
}
