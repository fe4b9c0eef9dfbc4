//! Core telemetry event types describing detector lifecycle and fallbacks
//! exposed to the CLI harness.

use serde::{Deserialize, Serialize};

use crate::recording::Resolution;

/// Rich metric events covering acquisition, iteration outcomes, and runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MetricEvent {
    SourceOpened {
        simulated: bool,
        sample_rate: u32,
        fft_size: usize,
    },
    AcquisitionFailed {
        code: i32,
    },
    Recovery {
        succeeded: bool,
    },
    FrequencyDetected {
        frequency_hz: u32,
        duration_seconds: f64,
    },
    SilenceWarning {
        silent_frames: u64,
    },
    IterationResolved {
        index: u32,
        frequency_hz: u32,
        resolution: Resolution,
    },
    FallbackRate {
        ratio: f32,
        sample_count: usize,
    },
    WatchdogFired {
        completed_iterations: usize,
        synthesized: usize,
    },
    BatchCompleted {
        average_hz: u32,
        is_angelic: bool,
    },
}
