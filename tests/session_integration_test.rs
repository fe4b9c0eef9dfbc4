//! Integration tests for the continuous detection path

use std::sync::Arc;
use std::time::Duration;

use angelic_detector::config::{AppConfig, DetectorConfiguration};
use angelic_detector::engine::{DetectorEngine, EngineMode};
use angelic_detector::error::AcquisitionError;
use angelic_detector::random::FallbackGenerator;
use angelic_detector::session::{DetectionSession, SessionUpdate, STATUS_INACTIVE};
use angelic_detector::spectrum::SyntheticSource;
use angelic_detector::testing::{tone_at, ScriptedSource};
use angelic_detector::time::{TimeSource, TokioTimeSource};
use angelic_detector::RecordingError;
use tokio::sync::broadcast::error::TryRecvError;

fn engine_with(microphone: ScriptedSource) -> DetectorEngine {
    let time: Arc<dyn TimeSource> = Arc::new(TokioTimeSource::new());
    let synthetic = SyntheticSource::new(Arc::clone(&time), FallbackGenerator::seeded(9));
    DetectorEngine::new(
        AppConfig::default(),
        Box::new(microphone),
        Box::new(synthetic),
        time,
        FallbackGenerator::seeded(9),
    )
}

#[test]
fn test_deactivate_is_idempotent() {
    let mut session = DetectionSession::new(
        DetectorConfiguration::default(),
        Default::default(),
    );
    session.activate(DetectorConfiguration::default(), false);

    assert!(session.deactivate(0).is_none());
    assert!(session.deactivate(10).is_none());
    assert!(!session.is_active());
    assert_eq!(session.status(), STATUS_INACTIVE);
}

#[tokio::test(start_paused = true)]
async fn test_sustained_tone_is_reported_once() {
    let microphone = ScriptedSource::new();
    let handle = microphone.handle();
    handle.set_idle_frame(tone_at(4096, 639.0, 120));
    let engine = engine_with(microphone);
    let mut updates = engine.subscribe_session();

    engine.start_continuous().await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    engine.stop_continuous().await.unwrap();

    let mut detected = Vec::new();
    while let Ok(update) = updates.try_recv() {
        if let SessionUpdate::Detected(event) = update {
            detected.push(event);
        }
    }
    assert_eq!(detected.len(), 1);
    assert_eq!(detected[0].frequency_hz, 635);
    assert_eq!(engine.history(), detected);
    assert_eq!(handle.close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_simulated_session_never_shows_zero() {
    let engine = engine_with(ScriptedSource::new());
    engine.set_simulation_mode(true).await.unwrap();
    let mut readings = engine.subscribe_readings();

    engine.start_continuous().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    engine.stop_continuous().await.unwrap();

    let range = engine.detector_config().range();
    let mut frames = 0;
    loop {
        let reading = match readings.try_recv() {
            Ok(reading) => reading,
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        };
        if matches!(reading.mode, EngineMode::Continuous { simulated: true })
            && reading.current_frequency_hz != 0
        {
            frames += 1;
            assert!(
                reading.current_frequency_hz >= range.min_hz.saturating_sub(15)
                    && reading.current_frequency_hz <= range.max_hz + 15,
                "{}",
                reading.current_frequency_hz
            );
        }
    }
    assert!(frames > 0);
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_surfaces_as_acquisition_error() {
    let microphone = ScriptedSource::new();
    microphone
        .handle()
        .push_open_result(Err(AcquisitionError::PermissionDenied));
    let engine = engine_with(microphone);

    let err = engine.start_continuous().await.unwrap_err();

    assert_eq!(
        err,
        RecordingError::Acquisition(AcquisitionError::PermissionDenied)
    );
    assert_eq!(engine.mode(), EngineMode::Idle);
}
