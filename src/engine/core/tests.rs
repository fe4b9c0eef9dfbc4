use super::*;
use crate::config::{RecordingConfig, Sensitivity};
use crate::recording::STATUS_CANCELLED;
use crate::error::AcquisitionError;
use crate::session::STATUS_SIMULATION;
use crate::testing::{tone_at, ScriptHandle, ScriptedSource};
use crate::time::TokioTimeSource;

use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

const FFT: usize = 4096;

struct Fixture {
    engine: DetectorEngine,
    microphone: ScriptHandle,
    synthetic: ScriptHandle,
}

fn fixture() -> Fixture {
    let microphone = ScriptedSource::new();
    let synthetic = ScriptedSource::new().simulated();
    let microphone_handle = microphone.handle();
    let synthetic_handle = synthetic.handle();

    let config = AppConfig {
        recording: RecordingConfig {
            window_ms: 160,
            ..RecordingConfig::default()
        },
        ..AppConfig::default()
    };
    let engine = DetectorEngine::new(
        config,
        Box::new(microphone),
        Box::new(synthetic),
        Arc::new(TokioTimeSource::new()),
        FallbackGenerator::seeded(11),
    );

    Fixture {
        engine,
        microphone: microphone_handle,
        synthetic: synthetic_handle,
    }
}

#[tokio::test(start_paused = true)]
async fn test_simulated_batch_reports_completion() {
    let fx = fixture();
    fx.engine.set_simulation_mode(true).await.unwrap();

    let outcome = fx.engine.run_batch().await.unwrap();

    let RecordingOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    assert_eq!(summary.results.len(), 5);
    let reading = fx.engine.reading();
    assert!(reading.status.contains("Complete"));
    assert_eq!(Some(reading.current_frequency_hz), summary.average_hz);
    assert_eq!(reading.is_angelic, summary.is_angelic);
    assert_eq!(fx.engine.mode(), EngineMode::Idle);
    assert_eq!(fx.engine.history().len(), 6);
    assert_eq!(fx.microphone.open_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_batch_progress_is_visible_while_running() {
    let fx = fixture();
    fx.engine.set_simulation_mode(true).await.unwrap();
    let engine = fx.engine.clone();

    let (outcome, (reading, history)) = tokio::join!(fx.engine.run_batch(), async move {
        tokio::time::sleep(Duration::from_millis(700)).await;
        (engine.reading(), engine.history())
    });

    assert_eq!(reading.mode, EngineMode::Batch);
    assert_eq!(reading.status, "Recording Loop - Round 3/5");
    let range = fx.engine.detector_config().range();
    assert!(range.contains(reading.current_frequency_hz));
    assert_eq!(reading.is_angelic, is_angelic(reading.current_frequency_hz));
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].frequency_hz, reading.current_frequency_hz);

    assert!(matches!(outcome, Ok(RecordingOutcome::Completed(_))));
    assert_eq!(fx.engine.history().len(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_source_is_acquired_still_cancels() {
    let fx = fixture();
    let held = Arc::clone(&fx.engine.shared.microphone).lock_owned().await;
    let engine = fx.engine.clone();

    let (outcome, cancelled) = tokio::join!(fx.engine.run_batch(), async move {
        let cancelled = engine.cancel_batch();
        drop(held);
        cancelled
    });

    assert!(cancelled);
    let Ok(RecordingOutcome::Cancelled { results }) = outcome else {
        panic!("expected cancellation, got {:?}", outcome);
    };
    assert!(results.is_empty());
    assert_eq!(fx.engine.mode(), EngineMode::Idle);
    assert_eq!(fx.engine.reading().status, STATUS_CANCELLED);
    assert_eq!(fx.microphone.open_calls(), 1);
    assert!(!fx.microphone.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_deactivate_cancels_running_batch() {
    let fx = fixture();
    let engine = fx.engine.clone();

    let (outcome, ()) = tokio::join!(fx.engine.run_batch(), async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        engine.deactivate().await;
    });

    let Ok(RecordingOutcome::Cancelled { results }) = outcome else {
        panic!("expected cancellation, got {:?}", outcome);
    };
    assert!(results.len() < 5);
    assert_eq!(fx.engine.mode(), EngineMode::Idle);
    assert_eq!(fx.engine.reading().status, STATUS_CANCELLED);
    assert!(!fx.microphone.is_open());

    assert!(fx.engine.run_batch().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_batch_is_refused_while_continuous_runs() {
    let fx = fixture();
    fx.microphone.set_idle_frame(tone_at(FFT, 528.0, 100));
    fx.engine.start_continuous().await.unwrap();

    let refused = fx.engine.run_batch().await;
    assert!(matches!(refused, Err(RecordingError::AlreadyRunning)));
    assert_eq!(fx.engine.mode(), EngineMode::Continuous { simulated: false });

    fx.engine.stop_continuous().await.unwrap();
    assert_eq!(fx.engine.mode(), EngineMode::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_continuous_run_lands_in_history_on_stop() {
    let fx = fixture();
    fx.microphone.set_idle_frame(tone_at(FFT, 528.0, 100));
    let mut readings = fx.engine.subscribe_readings();

    let info = fx.engine.start_continuous().await.unwrap();
    assert_eq!(info.fft_size, FFT);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(fx.engine.reading().current_frequency_hz, 528);
    assert!(fx.engine.reading().is_angelic);

    let report = fx.engine.stop_continuous().await.unwrap();

    assert_eq!(report.events.len(), 1);
    let history = fx.engine.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].frequency_hz, 528);
    assert!(history[0].duration_seconds >= 1.9);
    assert_eq!(fx.engine.reading(), EngineReading::inactive());
    assert!(!fx.microphone.is_open());

    let mut saw_angelic = false;
    loop {
        match readings.try_recv() {
            Ok(reading) => saw_angelic |= reading.is_angelic,
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    assert!(saw_angelic);
}

#[tokio::test(start_paused = true)]
async fn test_demo_injection_stops_continuous_and_records_event() {
    let fx = fixture();
    fx.engine.start_continuous().await.unwrap();

    assert!(fx.engine.inject_demo_frequency(639).await);

    assert_eq!(fx.engine.mode(), EngineMode::Demo);
    assert!(!fx.microphone.is_open());
    let reading = fx.engine.reading();
    assert_eq!(reading.current_frequency_hz, 639);
    assert!(reading.is_angelic);
    assert_eq!(
        reading.status,
        "Demo Mode: Simulated 639Hz input (Angelic Frequency)"
    );
    let history = fx.engine.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].duration_seconds, DEMO_EVENT_SECONDS);

    assert!(fx.engine.inject_demo_frequency(500).await);
    assert_eq!(fx.engine.reading().status, "Demo Mode: Simulated 500Hz input");

    fx.engine.deactivate().await;
    assert_eq!(fx.engine.mode(), EngineMode::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_demo_injection_during_batch_only_moves_frequency() {
    let fx = fixture();
    fx.engine.set_simulation_mode(true).await.unwrap();
    let engine = fx.engine.clone();

    let (outcome, injected) = tokio::join!(fx.engine.run_batch(), async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        let injected = engine.inject_demo_frequency(852).await;
        (injected, engine.reading().current_frequency_hz, engine.history().len())
    });

    assert_eq!(injected, (false, 852, 1));
    assert!(matches!(outcome, Ok(RecordingOutcome::Completed(_))));
    assert_eq!(fx.engine.history().len(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_simulation_toggle_restarts_on_synthetic_source() {
    let fx = fixture();
    fx.engine.start_continuous().await.unwrap();
    assert_eq!(fx.microphone.open_calls(), 1);

    fx.engine.set_simulation_mode(true).await.unwrap();

    assert_eq!(fx.engine.mode(), EngineMode::Continuous { simulated: true });
    assert!(!fx.microphone.is_open());
    assert!(fx.synthetic.is_open());
    let reading = fx.engine.reading();
    let range = fx.engine.detector_config().range();
    assert!(range.contains(reading.current_frequency_hz));
    assert_eq!(reading.status, STATUS_SIMULATION);

    fx.engine.set_simulation_mode(false).await.unwrap();
    assert_eq!(fx.engine.reading().current_frequency_hz, 0);
    assert!(fx.microphone.is_open());
    assert!(!fx.synthetic.is_open());

    fx.engine.stop_continuous().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_open_failure_leaves_engine_idle() {
    let fx = fixture();
    fx.microphone.push_open_result(Err(AcquisitionError::NoDevice));

    let result = fx.engine.start_continuous().await;

    assert!(matches!(
        result,
        Err(RecordingError::Acquisition(AcquisitionError::NoDevice))
    ));
    assert_eq!(fx.engine.mode(), EngineMode::Idle);
    assert!(fx.engine.start_continuous().await.is_ok());
    fx.engine.deactivate().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_without_session_is_not_running() {
    let fx = fixture();
    assert!(matches!(
        fx.engine.stop_continuous().await,
        Err(RecordingError::NotRunning)
    ));
    assert!(!fx.engine.cancel_batch());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_detector_config_is_rejected() {
    let fx = fixture();
    let inverted = DetectorConfiguration::new(963, 432, Sensitivity::High);

    assert!(matches!(
        fx.engine.set_detector_config(inverted),
        Err(RecordingError::InvalidConfiguration { .. })
    ));

    let narrow = DetectorConfiguration::new(500, 700, Sensitivity::High);
    fx.engine.set_detector_config(narrow.clone()).unwrap();
    assert_eq!(fx.engine.detector_config(), narrow);
}
