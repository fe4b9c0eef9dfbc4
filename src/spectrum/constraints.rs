// Capture constraints - the ordered fallback ladder used when opening a device

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_SAMPLE_RATE;

/// One capability combination requested from the input device
///
/// `MicrophoneSource::open` walks [`CaptureConstraints::ladder`] in order and
/// keeps the first combination the platform accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureConstraints {
    /// Voice processing requested alongside a low-latency fixed buffer
    Enhanced {
        echo_cancellation: bool,
        noise_suppression: bool,
        auto_gain_control: bool,
    },
    /// Device defaults, nothing else requested
    Plain,
    /// Any F32 configuration that supports exactly this rate
    FixedSampleRate { sample_rate: u32 },
}

impl CaptureConstraints {
    /// Fallback order: enhanced, plain, fixed sample rate
    pub fn ladder() -> [CaptureConstraints; 3] {
        [
            CaptureConstraints::Enhanced {
                echo_cancellation: true,
                noise_suppression: true,
                auto_gain_control: true,
            },
            CaptureConstraints::Plain,
            CaptureConstraints::FixedSampleRate {
                sample_rate: DEFAULT_SAMPLE_RATE,
            },
        ]
    }

    /// Fixed callback size in frames, when this step asks for one
    pub fn buffer_frames(&self, fft_size: usize) -> Option<u32> {
        match self {
            CaptureConstraints::Enhanced { .. } => Some((fft_size / 4).max(256) as u32),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CaptureConstraints::Enhanced { .. } => "enhanced",
            CaptureConstraints::Plain => "plain",
            CaptureConstraints::FixedSampleRate { .. } => "fixed-sample-rate",
        }
    }
}
