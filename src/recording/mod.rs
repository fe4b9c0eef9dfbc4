// Recording module - the batch ("N-cycle") detection mode
//
// RecordingController runs a fixed number of bounded recording iterations
// strictly one after another, records one in-range result per iteration,
// and averages them once every iteration has resolved. Iteration failures
// only force a fallback value; the run itself ends on completion, on the
// global watchdog, or on explicit cancellation.

pub mod iteration;
pub mod results;

#[cfg(test)]
mod tests;

pub use iteration::{record_window, resolve_iteration, Resolution, ResolvedIteration};
pub use results::{IterationResult, IterationResults};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;

use crate::analysis::{
    annotate, closest_reference, is_angelic, AngelicReference, ReferenceAnnotation,
};
use crate::config::{DetectorConfiguration, RecordingConfig};
use crate::error::{
    log_acquisition_error, log_recording_error, AcquisitionError, ErrorCode, RecordingError,
};
use crate::random::FallbackGenerator;
use crate::session::DetectedFrequencyEvent;
use crate::spectrum::SpectrumSource;
use crate::telemetry::{self, MetricEvent};
use crate::time::TimeSource;

/// History duration attached to each resolved iteration
pub const ITERATION_EVENT_SECONDS: f64 = 3.0;

/// History duration attached to a completed batch average
pub const AVERAGE_EVENT_SECONDS: f64 = 5.0;

pub const STATUS_TIMED_OUT: &str = "Recording Loop Timed Out";
pub const STATUS_CANCELLED: &str = "Recording Loop Cancelled";
pub const STATUS_NO_VALID: &str = "Recording Loop Complete - No valid frequencies detected";
pub const STATUS_SETUP_FAILED: &str = "Recording Loop Failed - Audio setup failed";

/// Controller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    Idle,
    Running { iteration: u32 },
    Completed,
    Aborted,
}

/// Result of a batch that reached its last iteration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub results: Vec<IterationResult>,
    /// `None` when no result was positive
    pub average_hz: Option<u32>,
    pub is_angelic: bool,
    pub closest: Option<AngelicReference>,
    pub status: String,
}

/// How a `start` call ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordingOutcome {
    Completed(BatchSummary),
    /// Global watchdog fired; missing indices were synthesized
    TimedOut { results: Vec<IterationResult> },
    /// Cancelled mid-run; collected results are kept, no average is computed
    Cancelled { results: Vec<IterationResult> },
    /// The source could not be opened; no iteration ran
    SetupFailed { error: String, code: i32 },
}

/// Progress messages for UI collaborators
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RecordingUpdate {
    Started {
        max_iterations: u32,
    },
    IterationStarted {
        index: u32,
        max_iterations: u32,
        status: String,
    },
    IterationResolved {
        result: IterationResult,
        resolution: Resolution,
        annotation: ReferenceAnnotation,
        /// History entry appended for this iteration
        event: DetectedFrequencyEvent,
    },
    Finished {
        state: ControllerState,
        status: String,
        current_frequency_hz: u32,
    },
}

/// Cancels the batch run of the controller it came from
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation; a no-op when nothing is running
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Clear any earlier cancel and hand out the receiver for the next run
    ///
    /// Arm before the run becomes visible to cancellers: a cancel raised
    /// after arming is kept until the run observes it.
    pub fn arm(&self) -> watch::Receiver<bool> {
        self.tx.send_replace(false);
        self.tx.subscribe()
    }
}

enum Finish {
    Completed,
    Watchdog,
    Cancelled,
}

/// Batch recording state machine
pub struct RecordingController {
    config: DetectorConfiguration,
    recording: RecordingConfig,
    state: ControllerState,
    results: IterationResults,
    current_frequency_hz: u32,
    status: String,
    history: Vec<DetectedFrequencyEvent>,
    cancel: CancelHandle,
    updates: broadcast::Sender<RecordingUpdate>,
    time: Arc<dyn TimeSource>,
    rng: FallbackGenerator,
}

impl RecordingController {
    pub fn new(
        config: DetectorConfiguration,
        recording: RecordingConfig,
        time: Arc<dyn TimeSource>,
        rng: FallbackGenerator,
    ) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            config,
            recording,
            state: ControllerState::Idle,
            results: IterationResults::new(),
            current_frequency_hz: 0,
            status: String::new(),
            history: Vec::new(),
            cancel: CancelHandle::new(),
            updates,
            time,
            rng,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn results(&self) -> &IterationResults {
        &self.results
    }

    pub fn max_iterations(&self) -> u32 {
        self.recording.max_iterations
    }

    /// Index of the iteration in flight, 0 when none is
    pub fn current_iteration(&self) -> u32 {
        match self.state {
            ControllerState::Running { iteration } => iteration,
            _ => 0,
        }
    }

    pub fn current_frequency_hz(&self) -> u32 {
        self.current_frequency_hz
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// History entries produced by the latest run
    pub fn history(&self) -> &[DetectedFrequencyEvent] {
        &self.history
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingUpdate> {
        self.updates.subscribe()
    }

    /// Sender side of the progress channel, for late subscribers
    pub fn update_sender(&self) -> broadcast::Sender<RecordingUpdate> {
        self.updates.clone()
    }

    /// Replace the detector configuration used by the next run
    ///
    /// # Errors
    /// `RecordingError::AlreadyRunning` while a run is in flight
    pub fn set_configuration(
        &mut self,
        config: DetectorConfiguration,
    ) -> Result<(), RecordingError> {
        if matches!(self.state, ControllerState::Running { .. }) {
            return Err(RecordingError::AlreadyRunning);
        }
        self.config = config;
        Ok(())
    }

    /// Run one batch to completion, watchdog, or cancellation
    ///
    /// Valid from `Idle` or a finished state. In simulation mode the source is
    /// never touched; otherwise it is opened up front and closed at the end.
    ///
    /// # Returns
    /// * `Ok(RecordingOutcome)` - How the run ended (setup failure included)
    /// * `Err(RecordingError)` - Already running or invalid configuration
    pub async fn start<S: SpectrumSource + ?Sized>(
        &mut self,
        source: &mut S,
        simulated: bool,
    ) -> Result<RecordingOutcome, RecordingError> {
        let cancel_rx = self.cancel.arm();
        self.start_armed(source, simulated, cancel_rx).await
    }

    /// [`start`](Self::start) with a cancel receiver armed by the caller
    ///
    /// A cancel raised between arming and this call ends the run right after
    /// setup, before any iteration.
    pub async fn start_armed<S: SpectrumSource + ?Sized>(
        &mut self,
        source: &mut S,
        simulated: bool,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> Result<RecordingOutcome, RecordingError> {
        if matches!(self.state, ControllerState::Running { .. }) {
            let err = RecordingError::AlreadyRunning;
            log_recording_error(&err, "RecordingController::start");
            return Err(err);
        }
        self.config
            .validate()
            .inspect_err(|err| log_recording_error(err, "RecordingController::start"))?;

        self.results.clear();
        self.history.clear();
        self.current_frequency_hz = 0;
        self.state = ControllerState::Running { iteration: 0 };

        if !simulated {
            if let Err(err) = source.open(&self.config) {
                return Ok(self.fail_setup(err));
            }
        }

        let max_iterations = self.recording.max_iterations;
        log::info!(
            "[RecordingController] Starting {} iterations ({} mode)",
            max_iterations,
            if simulated { "simulation" } else { "microphone" }
        );
        let _ = self.updates.send(RecordingUpdate::Started { max_iterations });

        let watchdog = self.recording.watchdog();
        let finish = {
            let iterations = self.run_iterations(source, simulated);
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel_rx) => Finish::Cancelled,
                completed = timeout(watchdog, iterations) => match completed {
                    Ok(()) => Finish::Completed,
                    Err(_) => Finish::Watchdog,
                },
            }
        };
        if !simulated {
            source.close();
        }

        let outcome = match finish {
            Finish::Completed => self.complete(),
            Finish::Watchdog => self.abort_on_watchdog(),
            Finish::Cancelled => self.abort_on_cancel(),
        };
        let _ = self.updates.send(RecordingUpdate::Finished {
            state: self.state,
            status: self.status.clone(),
            current_frequency_hz: self.current_frequency_hz,
        });
        Ok(outcome)
    }

    async fn run_iterations<S: SpectrumSource + ?Sized>(
        &mut self,
        source: &mut S,
        simulated: bool,
    ) {
        let max_iterations = self.recording.max_iterations;

        for index in 1..=max_iterations {
            self.state = ControllerState::Running { iteration: index };
            self.status = if index == 1 {
                format!("Recording Loop Started - Round 1/{}", max_iterations)
            } else {
                format!("Recording Loop - Round {}/{}", index, max_iterations)
            };
            let _ = self.updates.send(RecordingUpdate::IterationStarted {
                index,
                max_iterations,
                status: self.status.clone(),
            });

            let resolved = resolve_iteration(
                index,
                source,
                simulated,
                &self.config,
                &self.recording,
                &mut self.rng,
            )
            .await;
            self.record(index, resolved);
        }
    }

    fn record(&mut self, index: u32, resolved: ResolvedIteration) {
        let result = IterationResult {
            iteration_index: index,
            frequency_hz: resolved.frequency_hz,
        };
        self.results.upsert(result);
        self.current_frequency_hz = resolved.frequency_hz;

        let annotation = annotate(resolved.frequency_hz);
        log::info!(
            "[RecordingController] Iteration {}: {} Hz ({:?}), nearest {} Hz, {:.1}% match",
            index,
            resolved.frequency_hz,
            resolved.resolution,
            annotation.nearest.frequency_hz,
            annotation.match_percentage
        );

        let event = DetectedFrequencyEvent {
            frequency_hz: resolved.frequency_hz,
            duration_seconds: ITERATION_EVENT_SECONDS,
            timestamp_ms: self.time.now_ms(),
        };
        self.history.push(event.clone());
        telemetry::hub().record_iteration(index, resolved.frequency_hz, resolved.resolution);
        let _ = self.updates.send(RecordingUpdate::IterationResolved {
            result,
            resolution: resolved.resolution,
            annotation,
            event,
        });
    }

    fn complete(&mut self) -> RecordingOutcome {
        self.state = ControllerState::Completed;
        let average_hz = self.results.average();

        let (is_angelic, closest) = match average_hz {
            Some(average) => {
                let angelic = is_angelic(average);
                self.current_frequency_hz = average;
                self.status = if angelic {
                    format!("Recording Complete - Angelic Frequency Detected ({}Hz)", average)
                } else {
                    format!("Recording Complete - Average Frequency: {}Hz", average)
                };
                self.history.push(DetectedFrequencyEvent {
                    frequency_hz: average,
                    duration_seconds: AVERAGE_EVENT_SECONDS,
                    timestamp_ms: self.time.now_ms(),
                });
                telemetry::hub().record(MetricEvent::BatchCompleted {
                    average_hz: average,
                    is_angelic: angelic,
                });
                (angelic, closest_reference(average).copied())
            }
            None => {
                log::warn!("[RecordingController] No valid frequencies to average");
                self.status = STATUS_NO_VALID.to_string();
                (false, None)
            }
        };

        log::info!("[RecordingController] {}", self.status);
        RecordingOutcome::Completed(BatchSummary {
            results: self.results.to_vec(),
            average_hz,
            is_angelic,
            closest,
            status: self.status.clone(),
        })
    }

    fn abort_on_watchdog(&mut self) -> RecordingOutcome {
        let completed_iterations = self.results.len();
        let synthesized = self.results.fill_missing(
            self.recording.max_iterations,
            self.config.range(),
            &mut self.rng,
        );
        log::warn!(
            "[RecordingController] Watchdog fired after {} iterations; synthesized {}",
            completed_iterations,
            synthesized
        );
        telemetry::hub().record(MetricEvent::WatchdogFired {
            completed_iterations,
            synthesized,
        });

        self.state = ControllerState::Aborted;
        self.status = STATUS_TIMED_OUT.to_string();
        self.current_frequency_hz = 0;
        RecordingOutcome::TimedOut {
            results: self.results.to_vec(),
        }
    }

    fn abort_on_cancel(&mut self) -> RecordingOutcome {
        log::info!(
            "[RecordingController] Cancelled with {} of {} iterations resolved",
            self.results.len(),
            self.recording.max_iterations
        );
        self.state = ControllerState::Idle;
        self.status = STATUS_CANCELLED.to_string();
        self.current_frequency_hz = 0;
        RecordingOutcome::Cancelled {
            results: self.results.to_vec(),
        }
    }

    fn fail_setup(&mut self, err: AcquisitionError) -> RecordingOutcome {
        log_acquisition_error(&err, "RecordingController setup");
        self.state = ControllerState::Idle;
        self.status = STATUS_SETUP_FAILED.to_string();
        let _ = self.updates.send(RecordingUpdate::Finished {
            state: self.state,
            status: self.status.clone(),
            current_frequency_hz: 0,
        });
        RecordingOutcome::SetupFailed {
            code: err.code(),
            error: err.message(),
        }
    }
}

/// Resolves once the cancel flag is raised
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
