use super::*;
use crate::config::Sensitivity;
use crate::error::AnalysisError;
use crate::spectrum::FrequencyBins;
use crate::testing::{tone_at, ScriptHandle, ScriptedSource};
use crate::time::TokioTimeSource;

use std::time::Duration;

const FFT: usize = 4096;

/// 2 Hz per bin, so every even frequency has an exact bin
const EVEN_RATE: u32 = 8192;

/// Frames sampled by a 160 ms window at the 16 ms frame interval
const FRAMES_PER_SHORT_WINDOW: usize = 10;

fn spike(frequency_hz: u32) -> FrequencyBins {
    let mut amplitudes = vec![0u8; FFT / 2];
    amplitudes[(frequency_hz / 2) as usize] = 120;
    FrequencyBins::new(amplitudes, EVEN_RATE)
}

fn silence() -> FrequencyBins {
    FrequencyBins::silent(FFT, EVEN_RATE)
}

fn short_windows(max_iterations: u32) -> RecordingConfig {
    RecordingConfig {
        max_iterations,
        window_ms: 160,
        ..RecordingConfig::default()
    }
}

fn controller(recording: RecordingConfig) -> RecordingController {
    RecordingController::new(
        DetectorConfiguration::default(),
        recording,
        Arc::new(TokioTimeSource::new()),
        FallbackGenerator::seeded(5),
    )
}

/// One loud frame followed by silence for the rest of the window
fn script_window(handle: &ScriptHandle, frequency_hz: u32) {
    handle.push_frame(spike(frequency_hz));
    handle.push_frames(silence(), FRAMES_PER_SHORT_WINDOW - 1);
}

fn resolutions(rx: &mut broadcast::Receiver<RecordingUpdate>) -> Vec<Resolution> {
    let mut seen = Vec::new();
    while let Ok(update) = rx.try_recv() {
        if let RecordingUpdate::IterationResolved { resolution, .. } = update {
            seen.push(resolution);
        }
    }
    seen
}

#[tokio::test(start_paused = true)]
async fn test_simulated_batch_completes_with_every_index() {
    let mut controller = controller(RecordingConfig::default());
    let mut source = ScriptedSource::new();
    let handle = source.handle();
    let started = tokio::time::Instant::now();

    let outcome = controller.start(&mut source, true).await.unwrap();

    let RecordingOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    let indices: Vec<u32> = summary.results.iter().map(|r| r.iteration_index).collect();
    assert_eq!(indices, vec![1, 2, 3, 4, 5]);
    let range = DetectorConfiguration::default().range();
    assert!(summary.results.iter().all(|r| range.contains(r.frequency_hz)));

    let average = summary.average_hz.expect("positive results");
    assert_eq!(Some(average), controller.results().average());
    assert_eq!(summary.is_angelic, is_angelic(average));
    assert!(controller.status().contains("Complete"));
    assert_eq!(controller.current_frequency_hz(), average);
    assert_eq!(controller.state(), ControllerState::Completed);

    // Five 3 s iteration entries plus the 5 s average
    assert_eq!(controller.history().len(), 6);
    assert_eq!(controller.history()[5].duration_seconds, AVERAGE_EVENT_SECONDS);

    // Simulation never touches the device and takes 5 x 300 ms
    assert_eq!(handle.open_calls(), 0);
    assert_eq!(handle.close_calls(), 0);
    assert_eq!(started.elapsed(), Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn test_microphone_batch_averages_loudest_bins() {
    let mut controller = controller(short_windows(5));
    let mut source = ScriptedSource::new();
    let handle = source.handle();
    for frequency in [432, 432, 528, 432, 528] {
        script_window(&handle, frequency);
    }
    let mut rx = controller.subscribe();

    let outcome = controller.start(&mut source, false).await.unwrap();

    let RecordingOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    let frequencies: Vec<u32> = summary.results.iter().map(|r| r.frequency_hz).collect();
    assert_eq!(frequencies, vec![432, 432, 528, 432, 528]);
    assert_eq!(summary.average_hz, Some(470));
    assert!(!summary.is_angelic);
    assert_eq!(
        controller.status(),
        "Recording Complete - Average Frequency: 470Hz"
    );
    assert_eq!(resolutions(&mut rx), vec![Resolution::Detected; 5]);

    assert_eq!(handle.remaining_frames(), 0);
    assert!(!handle.is_open());
    assert_eq!(handle.open_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_angelic_average_is_reported() {
    let mut controller = controller(short_windows(2));
    let mut source = ScriptedSource::new();
    let handle = source.handle();
    script_window(&handle, 526);
    script_window(&handle, 530);

    let outcome = controller.start(&mut source, false).await.unwrap();

    let RecordingOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    assert_eq!(summary.average_hz, Some(528));
    assert!(summary.is_angelic);
    assert_eq!(summary.closest.map(|r| r.frequency_hz), Some(528));
    assert_eq!(
        summary.status,
        "Recording Complete - Angelic Frequency Detected (528Hz)"
    );
}

#[tokio::test(start_paused = true)]
async fn test_low_detection_is_remapped_into_range() {
    let mut controller = controller(short_windows(1));
    let mut source = ScriptedSource::new();
    script_window(&source.handle(), 200);
    let mut rx = controller.subscribe();

    controller.start(&mut source, false).await.unwrap();

    assert_eq!(controller.results().as_slice()[0].frequency_hz, 600);
    assert_eq!(resolutions(&mut rx), vec![Resolution::Remapped]);
}

#[tokio::test(start_paused = true)]
async fn test_silent_window_falls_back_in_range() {
    let mut controller = controller(short_windows(2));
    let mut source = ScriptedSource::new();
    let mut rx = controller.subscribe();

    controller.start(&mut source, false).await.unwrap();

    let range = DetectorConfiguration::default().range();
    assert_eq!(controller.results().len(), 2);
    assert!(controller
        .results()
        .as_slice()
        .iter()
        .all(|r| range.contains(r.frequency_hz)));
    assert_eq!(resolutions(&mut rx), vec![Resolution::NoSignal; 2]);
}

#[tokio::test(start_paused = true)]
async fn test_read_failure_falls_back_and_run_continues() {
    let mut controller = controller(short_windows(2));
    let mut source = ScriptedSource::new();
    let handle = source.handle();
    handle.push_error(AnalysisError::RecoveryFailed {
        reason: "device vanished".to_string(),
    });
    script_window(&handle, 640);
    let mut rx = controller.subscribe();

    let outcome = controller.start(&mut source, false).await.unwrap();

    assert!(matches!(outcome, RecordingOutcome::Completed(_)));
    assert_eq!(
        resolutions(&mut rx),
        vec![Resolution::AnalysisFailed, Resolution::Detected]
    );
    assert_eq!(controller.results().as_slice()[1].frequency_hz, 640);
}

#[tokio::test(start_paused = true)]
async fn test_iteration_timeout_forces_fallback() {
    let recording = RecordingConfig {
        max_iterations: 1,
        window_ms: 5_000,
        iteration_timeout_ms: 3_000,
        ..RecordingConfig::default()
    };
    let mut controller = controller(recording);
    let mut source = ScriptedSource::new();
    source.handle().set_idle_frame(tone_at(FFT, 741.0, 150));
    let mut rx = controller.subscribe();
    let started = tokio::time::Instant::now();

    controller.start(&mut source, false).await.unwrap();

    assert_eq!(resolutions(&mut rx), vec![Resolution::Timeout]);
    assert!(DetectorConfiguration::default()
        .range()
        .contains(controller.results().as_slice()[0].frequency_hz));
    assert_eq!(started.elapsed(), Duration::from_millis(3_000));
}

#[tokio::test(start_paused = true)]
async fn test_setup_failure_returns_to_idle_without_iterations() {
    let mut controller = controller(RecordingConfig::default());
    let mut source = ScriptedSource::new();
    let handle = source.handle();
    handle.push_open_result(Err(AcquisitionError::PermissionDenied));

    let outcome = controller.start(&mut source, false).await.unwrap();

    assert!(matches!(
        outcome,
        RecordingOutcome::SetupFailed { code: 1001, .. }
    ));
    assert_eq!(controller.state(), ControllerState::Idle);
    assert!(controller.results().is_empty());
    assert_eq!(handle.snapshot_calls(), 0);
    assert_eq!(controller.status(), STATUS_SETUP_FAILED);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_synthesizes_missing_iterations() {
    let recording = RecordingConfig {
        watchdog_ms: 10_000,
        ..RecordingConfig::default()
    };
    let mut controller = controller(recording);
    let mut source = ScriptedSource::new();
    let handle = source.handle();
    handle.set_idle_frame(tone_at(FFT, 639.0, 150));

    let outcome = controller.start(&mut source, false).await.unwrap();

    // Each 3 s window ends at its last frame before the deadline, so three
    // iterations finish before the 10 s watchdog
    let RecordingOutcome::TimedOut { results } = outcome else {
        panic!("expected watchdog abort, got {:?}", outcome);
    };
    assert_eq!(results.len(), 5);
    let range = DetectorConfiguration::default().range();
    for (position, result) in results.iter().enumerate() {
        assert_eq!(result.iteration_index, position as u32 + 1);
        assert!(range.contains(result.frequency_hz));
    }
    assert!(results[..3].iter().all(|r| r.frequency_hz == 635));
    assert_eq!(controller.state(), ControllerState::Aborted);
    assert_eq!(controller.status(), STATUS_TIMED_OUT);
    assert!(!handle.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_keeps_collected_results() {
    let mut controller = controller(RecordingConfig::default());
    let cancel = controller.cancel_handle();
    let mut source = ScriptedSource::new();

    let (outcome, _) = tokio::join!(controller.start(&mut source, true), async {
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        cancel.cancel();
    });

    let RecordingOutcome::Cancelled { results } = outcome.unwrap() else {
        panic!("expected cancellation");
    };
    assert_eq!(results.len(), 3);
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(controller.status(), STATUS_CANCELLED);
    assert_eq!(controller.current_frequency_hz(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_raised_after_arming_is_not_lost() {
    let mut controller = controller(short_windows(5));
    let cancel = controller.cancel_handle();
    let mut source = ScriptedSource::new();
    let handle = source.handle();

    let armed = cancel.arm();
    cancel.cancel();
    let outcome = controller.start_armed(&mut source, false, armed).await;

    let RecordingOutcome::Cancelled { results } = outcome.unwrap() else {
        panic!("expected cancellation");
    };
    assert!(results.is_empty());
    assert_eq!(controller.status(), STATUS_CANCELLED);
    assert_eq!(handle.open_calls(), 1);
    assert!(!handle.is_open());

    // A fresh run re-arms and completes
    let outcome = controller.start(&mut source, false).await.unwrap();
    assert!(matches!(outcome, RecordingOutcome::Completed(_)));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_configuration_is_rejected_before_setup() {
    let mut controller = controller(RecordingConfig::default());
    controller
        .set_configuration(DetectorConfiguration::new(963, 432, Sensitivity::Medium))
        .unwrap();
    let mut source = ScriptedSource::new();
    let handle = source.handle();

    let result = controller.start(&mut source, false).await;

    assert!(matches!(
        result,
        Err(RecordingError::InvalidConfiguration { .. })
    ));
    assert_eq!(handle.open_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_controller_can_run_again_after_completion() {
    let mut controller = controller(RecordingConfig::default());
    let mut source = ScriptedSource::new();

    controller.start(&mut source, true).await.unwrap();
    let again = controller.start(&mut source, true).await.unwrap();

    assert!(matches!(again, RecordingOutcome::Completed(_)));
    assert_eq!(controller.results().len(), 5);
    assert_eq!(controller.history().len(), 6);
}
