//! DetectorEngine: mode orchestration shared by the CLI and embedders.
//!
//! The engine owns both spectrum sources, the batch controller, and the
//! detection history. It enforces that at most one of the continuous
//! session and the batch run holds a source at a time, applies the
//! simulation toggle and demo overrides, and mirrors every change of the
//! current reading onto broadcast channels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::analysis::{is_angelic, DominantFrequency};
use crate::config::{AppConfig, DetectorConfiguration};
use crate::error::{log_acquisition_error, log_recording_error, RecordingError};
use crate::random::FallbackGenerator;
use crate::recording::{CancelHandle, RecordingController, RecordingOutcome, RecordingUpdate};
use crate::session::{
    idle_status, run_continuous, DetectedFrequencyEvent, DetectionSession, SessionRunReport,
    SessionUpdate, STATUS_INACTIVE,
};
use crate::spectrum::{MicrophoneSource, SpectrumSource, StreamInfo, SyntheticSource};
use crate::time::{SystemTimeSource, TimeSource};

use super::channels::EngineChannels;

/// History duration attached to an injected demo frequency
pub const DEMO_EVENT_SECONDS: f64 = 2.0;

type SharedSource = Arc<tokio::sync::Mutex<Box<dyn SpectrumSource>>>;

/// Which mode currently owns the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EngineMode {
    Idle,
    Continuous { simulated: bool },
    Batch,
    Demo,
}

/// Current frequency and status as shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineReading {
    pub mode: EngineMode,
    pub current_frequency_hz: u32,
    pub is_angelic: bool,
    pub status: String,
    pub dominant_frequencies: Vec<DominantFrequency>,
}

impl EngineReading {
    pub fn inactive() -> Self {
        Self {
            mode: EngineMode::Idle,
            current_frequency_hz: 0,
            is_angelic: false,
            status: STATUS_INACTIVE.to_string(),
            dominant_frequencies: Vec::new(),
        }
    }
}

struct ContinuousRun {
    stop: watch::Sender<bool>,
    task: JoinHandle<SessionRunReport>,
}

struct EngineShared {
    config: RwLock<AppConfig>,
    microphone: SharedSource,
    synthetic: SharedSource,
    controller: tokio::sync::Mutex<RecordingController>,
    batch_cancel: CancelHandle,
    channels: EngineChannels,
    mode: Mutex<EngineMode>,
    simulated: AtomicBool,
    reading: Mutex<EngineReading>,
    history: Mutex<Vec<DetectedFrequencyEvent>>,
    continuous: Mutex<Option<ContinuousRun>>,
    time: Arc<dyn TimeSource>,
    rng: Mutex<FallbackGenerator>,
}

/// Cloneable handle to the detector engine
#[derive(Clone)]
pub struct DetectorEngine {
    shared: Arc<EngineShared>,
}

impl DetectorEngine {
    /// Build an engine around explicit sources, clock, and randomness
    pub fn new(
        config: AppConfig,
        microphone: Box<dyn SpectrumSource>,
        synthetic: Box<dyn SpectrumSource>,
        time: Arc<dyn TimeSource>,
        mut rng: FallbackGenerator,
    ) -> Self {
        let controller = RecordingController::new(
            config.detector.clone(),
            config.recording.clone(),
            Arc::clone(&time),
            rng.fork(),
        );
        let batch_cancel = controller.cancel_handle();
        let channels = EngineChannels::new(controller.update_sender());

        Self {
            shared: Arc::new(EngineShared {
                config: RwLock::new(config),
                microphone: Arc::new(tokio::sync::Mutex::new(microphone)),
                synthetic: Arc::new(tokio::sync::Mutex::new(synthetic)),
                controller: tokio::sync::Mutex::new(controller),
                batch_cancel,
                channels,
                mode: Mutex::new(EngineMode::Idle),
                simulated: AtomicBool::new(false),
                reading: Mutex::new(EngineReading::inactive()),
                history: Mutex::new(Vec::new()),
                continuous: Mutex::new(None),
                time,
                rng: Mutex::new(rng),
            }),
        }
    }

    /// Engine backed by the default input device and the wall clock
    pub fn with_defaults(config: AppConfig, mut rng: FallbackGenerator) -> Self {
        let time: Arc<dyn TimeSource> = Arc::new(SystemTimeSource::default());
        let synthetic = SyntheticSource::new(Arc::clone(&time), rng.fork());
        Self::new(
            config,
            Box::new(MicrophoneSource::new()),
            Box::new(synthetic),
            time,
            rng,
        )
    }

    // ========================================================================
    // STATE
    // ========================================================================

    pub fn config(&self) -> AppConfig {
        read(&self.shared.config).clone()
    }

    pub fn detector_config(&self) -> DetectorConfiguration {
        read(&self.shared.config).detector.clone()
    }

    /// Replace the detector configuration for the next activation
    ///
    /// # Errors
    /// * `InvalidConfiguration` - `min >= max` or `min == 0`
    /// * `AlreadyRunning` - a continuous session or batch run is active
    pub fn set_detector_config(&self, detector: DetectorConfiguration) -> Result<(), RecordingError> {
        detector
            .validate()
            .inspect_err(|err| log_recording_error(err, "DetectorEngine::set_detector_config"))?;
        if matches!(
            self.mode(),
            EngineMode::Continuous { .. } | EngineMode::Batch
        ) {
            return Err(RecordingError::AlreadyRunning);
        }
        write(&self.shared.config).detector = detector;
        Ok(())
    }

    pub fn mode(&self) -> EngineMode {
        *lock(&self.shared.mode)
    }

    pub fn reading(&self) -> EngineReading {
        lock(&self.shared.reading).clone()
    }

    pub fn history(&self) -> Vec<DetectedFrequencyEvent> {
        lock(&self.shared.history).clone()
    }

    pub fn clear_history(&self) {
        lock(&self.shared.history).clear();
    }

    pub fn is_simulation_mode(&self) -> bool {
        self.shared.simulated.load(Ordering::SeqCst)
    }

    // ========================================================================
    // SUBSCRIPTIONS
    // ========================================================================

    pub fn subscribe_session(&self) -> broadcast::Receiver<SessionUpdate> {
        self.shared.channels.subscribe_session()
    }

    pub fn subscribe_recording(&self) -> broadcast::Receiver<RecordingUpdate> {
        self.shared.channels.subscribe_recording()
    }

    pub fn subscribe_readings(&self) -> broadcast::Receiver<EngineReading> {
        self.shared.channels.subscribe_readings()
    }

    // ========================================================================
    // CONTINUOUS MODE
    // ========================================================================

    /// Open the active source and start the continuous session
    ///
    /// Uses the synthetic source in simulation mode, the microphone
    /// otherwise. Leaves demo mode if it was on.
    ///
    /// # Errors
    /// * `AlreadyRunning` - another mode holds the detector
    /// * `Acquisition` - the source refused to open
    pub async fn start_continuous(&self) -> Result<StreamInfo, RecordingError> {
        let simulated = self.is_simulation_mode();
        self.shared.claim(EngineMode::Continuous { simulated })?;

        let config = self.config();
        let detector = config.detector.clone();
        let session_config = config.session;

        let source_lock = self.shared.source_for(simulated);
        let mut source = source_lock.lock_owned().await;
        let info = match source.open(&detector) {
            Ok(info) => info,
            Err(err) => {
                log_acquisition_error(&err, "DetectorEngine::start_continuous");
                self.shared.release();
                return Err(err.into());
            }
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut rng = lock(&self.shared.rng).fork();
        let shared = Arc::clone(&self.shared);

        let task = tokio::spawn(async move {
            let mut session = DetectionSession::new(detector.clone(), session_config.clone());
            session.activate(detector, simulated);

            let (run_tx, run_rx) = broadcast::channel(256);
            let run = async {
                let report = run_continuous(
                    &mut session,
                    &mut *source,
                    session_config.frame_interval(),
                    &*shared.time,
                    &mut rng,
                    stop_rx,
                    &run_tx,
                )
                .await;
                drop(run_tx);
                report
            };
            let (report, ()) = tokio::join!(run, shared.mirror_session(run_rx));
            report
        });

        *lock(&self.shared.continuous) = Some(ContinuousRun {
            stop: stop_tx,
            task,
        });
        log::info!(
            "[Engine] Continuous detection started ({} Hz, fft {})",
            info.sample_rate,
            info.fft_size
        );
        Ok(info)
    }

    /// Stop the continuous session, flushing its in-flight run
    ///
    /// # Errors
    /// `NotRunning` when no continuous session is active
    pub async fn stop_continuous(&self) -> Result<SessionRunReport, RecordingError> {
        let Some(run) = lock(&self.shared.continuous).take() else {
            return Err(RecordingError::NotRunning);
        };

        let _ = run.stop.send(true);
        let report = match run.task.await {
            Ok(report) => report,
            Err(err) => {
                log::error!("[Engine] Continuous session task failed: {}", err);
                SessionRunReport::default()
            }
        };

        self.shared.release();
        self.shared.set_reading(EngineReading::inactive());
        log::info!(
            "[Engine] Continuous detection stopped ({} events)",
            report.events.len()
        );
        Ok(report)
    }

    /// Switch between the microphone and the synthetic source
    ///
    /// A running continuous session is restarted on the other source.
    /// Entering simulation seeds an in-range current frequency; leaving it
    /// clears the current frequency.
    pub async fn set_simulation_mode(&self, enabled: bool) -> Result<(), RecordingError> {
        let previous = self.shared.simulated.swap(enabled, Ordering::SeqCst);
        if previous == enabled {
            return Ok(());
        }
        log::info!(
            "[Engine] Simulation mode {}",
            if enabled { "enabled" } else { "disabled" }
        );

        if !matches!(self.mode(), EngineMode::Continuous { .. }) {
            return Ok(());
        }

        self.stop_continuous().await?;
        self.start_continuous().await?;

        let range = self.detector_config().range();
        let seeded = if enabled {
            lock(&self.shared.rng).in_range(range)
        } else {
            0
        };
        self.shared.update_reading(|reading| {
            reading.current_frequency_hz = seeded;
            reading.is_angelic = false;
            reading.status = idle_status(enabled).to_string();
        });
        Ok(())
    }

    // ========================================================================
    // BATCH MODE
    // ========================================================================

    /// Run one batch on the microphone (or on random values in simulation)
    ///
    /// Leaves demo mode if it was on. History receives one entry per
    /// iteration plus the average.
    ///
    /// # Errors
    /// `AlreadyRunning` while a continuous session or another batch is active
    pub async fn run_batch(&self) -> Result<RecordingOutcome, RecordingError> {
        let cancel_rx = self
            .shared
            .claim_with(EngineMode::Batch, || self.shared.batch_cancel.arm())?;
        let simulated = self.is_simulation_mode();
        let detector = self.detector_config();

        let mut controller = self.shared.controller.lock().await;
        let mut updates = controller.subscribe();
        let mut mirrored = 0;
        let outcome = match controller.set_configuration(detector) {
            Ok(()) => {
                let mut source = self.shared.microphone.lock().await;
                let run = controller.start_armed(&mut *source, simulated, cancel_rx);
                tokio::pin!(run);
                loop {
                    tokio::select! {
                        outcome = &mut run => break outcome,
                        update = updates.recv() => match update {
                            Ok(update) => mirrored += self.shared.mirror_recording(&update),
                            Err(RecvError::Lagged(skipped)) => {
                                log::warn!("[Engine] Batch mirror lagged by {} updates", skipped);
                            }
                            Err(RecvError::Closed) => break (&mut run).await,
                        },
                    }
                }
            }
            Err(err) => Err(err),
        };

        // Updates sent in the same poll that finished the run
        loop {
            match updates.try_recv() {
                Ok(update) => mirrored += self.shared.mirror_recording(&update),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        let unmirrored = controller.history().get(mirrored..).unwrap_or_default();
        lock(&self.shared.history).extend_from_slice(unmirrored);
        let frequency = controller.current_frequency_hz();
        let status = controller.status().to_string();
        drop(controller);

        self.shared.release();
        self.shared.update_reading(|reading| {
            reading.mode = EngineMode::Idle;
            reading.current_frequency_hz = frequency;
            reading.is_angelic = frequency > 0 && is_angelic(frequency);
            reading.status = status;
            reading.dominant_frequencies.clear();
        });
        outcome
    }

    /// Cancel the running batch
    ///
    /// # Returns
    /// `true` if a batch was running
    pub fn cancel_batch(&self) -> bool {
        let mode = lock(&self.shared.mode);
        if *mode != EngineMode::Batch {
            return false;
        }
        self.shared.batch_cancel.cancel();
        true
    }

    // ========================================================================
    // DEMO MODE
    // ========================================================================

    /// Show `frequency_hz` as if it had been detected
    ///
    /// During a batch run only the current frequency changes and `false` is
    /// returned. Otherwise a running continuous session is stopped, demo mode
    /// is entered, and a 2 s history entry is added.
    pub async fn inject_demo_frequency(&self, frequency_hz: u32) -> bool {
        let angelic = is_angelic(frequency_hz);

        if self.mode() == EngineMode::Batch {
            log::info!(
                "[Engine] Demo frequency {} Hz ignored during batch run",
                frequency_hz
            );
            self.shared.update_reading(|reading| {
                reading.current_frequency_hz = frequency_hz;
                reading.is_angelic = angelic;
            });
            return false;
        }

        if matches!(self.mode(), EngineMode::Continuous { .. }) {
            let _ = self.stop_continuous().await;
        }
        if self.shared.claim(EngineMode::Demo).is_err() {
            return false;
        }

        let status = if angelic {
            format!(
                "Demo Mode: Simulated {}Hz input (Angelic Frequency)",
                frequency_hz
            )
        } else {
            format!("Demo Mode: Simulated {}Hz input", frequency_hz)
        };
        self.shared.set_reading(EngineReading {
            mode: EngineMode::Demo,
            current_frequency_hz: frequency_hz,
            is_angelic: angelic,
            status,
            dominant_frequencies: Vec::new(),
        });
        lock(&self.shared.history).push(DetectedFrequencyEvent {
            frequency_hz,
            duration_seconds: DEMO_EVENT_SECONDS,
            timestamp_ms: self.shared.time.now_ms(),
        });
        log::info!("[Engine] Demo frequency {} Hz injected", frequency_hz);
        true
    }

    /// Turn off whichever mode is active
    ///
    /// A batch run is cancelled; its own `run_batch` call reports the
    /// collected results.
    pub async fn deactivate(&self) {
        match self.mode() {
            EngineMode::Continuous { .. } => {
                let _ = self.stop_continuous().await;
            }
            EngineMode::Batch => {
                self.cancel_batch();
            }
            EngineMode::Demo => {
                self.shared.release();
                self.shared.set_reading(EngineReading::inactive());
            }
            EngineMode::Idle => {}
        }
    }
}

impl EngineShared {
    fn source_for(&self, simulated: bool) -> SharedSource {
        if simulated {
            Arc::clone(&self.synthetic)
        } else {
            Arc::clone(&self.microphone)
        }
    }

    /// Take the detector for `next`; idle and demo mode yield to any mode
    fn claim(&self, next: EngineMode) -> Result<(), RecordingError> {
        self.claim_with(next, || ())
    }

    /// Claim `next` and run `on_claim` while the mode lock is still held,
    /// so no canceller can observe the new mode before `on_claim` ran
    fn claim_with<T>(
        &self,
        next: EngineMode,
        on_claim: impl FnOnce() -> T,
    ) -> Result<T, RecordingError> {
        let mut mode = lock(&self.mode);
        match *mode {
            EngineMode::Continuous { .. } | EngineMode::Batch => {
                let err = RecordingError::AlreadyRunning;
                log_recording_error(&err, "DetectorEngine mode switch");
                Err(err)
            }
            EngineMode::Idle | EngineMode::Demo => {
                *mode = next;
                let claimed = on_claim();
                drop(mode);
                self.update_reading(|reading| reading.mode = next);
                Ok(claimed)
            }
        }
    }

    fn release(&self) {
        *lock(&self.mode) = EngineMode::Idle;
    }

    fn set_reading(&self, reading: EngineReading) {
        *lock(&self.reading) = reading.clone();
        self.channels.publish_reading(reading);
    }

    fn update_reading(&self, apply: impl FnOnce(&mut EngineReading)) {
        let snapshot = {
            let mut reading = lock(&self.reading);
            apply(&mut reading);
            reading.clone()
        };
        self.channels.publish_reading(snapshot);
    }

    /// Fold one batch update into the reading and history
    ///
    /// Returns the number of history entries appended.
    fn mirror_recording(&self, update: &RecordingUpdate) -> usize {
        match update {
            RecordingUpdate::IterationStarted { status, .. } => {
                self.update_reading(|reading| reading.status = status.clone());
                0
            }
            RecordingUpdate::IterationResolved { result, event, .. } => {
                self.update_reading(|reading| {
                    reading.current_frequency_hz = result.frequency_hz;
                    reading.is_angelic = is_angelic(result.frequency_hz);
                });
                lock(&self.history).push(event.clone());
                1
            }
            RecordingUpdate::Started { .. } | RecordingUpdate::Finished { .. } => 0,
        }
    }

    /// Fold one session's updates into the reading and history, then
    /// republish them; returns when the session's sender is dropped
    async fn mirror_session(&self, mut rx: broadcast::Receiver<SessionUpdate>) {
        loop {
            match rx.recv().await {
                Ok(update) => {
                    match &update {
                        SessionUpdate::Frame(snapshot) => self.update_reading(|reading| {
                            reading.current_frequency_hz = snapshot.current_frequency_hz;
                            reading.is_angelic = snapshot.is_angelic;
                            reading.status = snapshot.status.clone();
                            reading.dominant_frequencies = snapshot.dominant_frequencies.clone();
                        }),
                        SessionUpdate::Detected(event) => lock(&self.history).push(event.clone()),
                        SessionUpdate::SourceLost { .. } | SessionUpdate::Recovered => {}
                    }
                    self.channels.publish_session(update);
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("[Engine] Session mirror lagged by {} updates", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests;
