//! Configuration management for the detector
//!
//! This module provides runtime configuration loading from JSON files so the
//! frequency window, sensitivity, and timing constants can be adjusted without
//! recompilation. Every section falls back to its defaults independently.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::RecordingError;

/// Sample rate used by synthetic sources and as the preferred capture rate
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub detector: DetectorConfiguration,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
}

/// Detection sensitivity
///
/// Higher sensitivity uses a smaller FFT (more responsive, less frequency
/// resolution) and a lower amplitude noise floor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
}

impl Sensitivity {
    /// FFT size used by the analyser for this sensitivity
    pub fn fft_size(&self) -> usize {
        match self {
            Sensitivity::Low => 8192,
            Sensitivity::Medium => 4096,
            Sensitivity::High => 2048,
        }
    }

    /// Baseline amplitude (0-255) a bin must exceed to count as a detection
    pub fn noise_floor(&self) -> f32 {
        match self {
            Sensitivity::Low => 25.0,
            Sensitivity::Medium => 15.0,
            Sensitivity::High => 5.0,
        }
    }
}

impl std::str::FromStr for Sensitivity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Sensitivity::Low),
            "medium" => Ok(Sensitivity::Medium),
            "high" => Ok(Sensitivity::High),
            other => Err(format!("unknown sensitivity '{}'", other)),
        }
    }
}

/// Inclusive frequency window in whole Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyRange {
    pub min_hz: u32,
    pub max_hz: u32,
}

impl FrequencyRange {
    pub fn new(min_hz: u32, max_hz: u32) -> Self {
        Self { min_hz, max_hz }
    }

    pub fn contains(&self, frequency_hz: u32) -> bool {
        frequency_hz >= self.min_hz && frequency_hz <= self.max_hz
    }

    pub fn span(&self) -> u32 {
        self.max_hz.saturating_sub(self.min_hz)
    }
}

/// Detector configuration supplied by the embedding application
///
/// Read at the start of each detection or iteration cycle. Changing it while
/// a session is active is not supported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfiguration {
    pub min_frequency_hz: u32,
    pub max_frequency_hz: u32,
    pub sensitivity: Sensitivity,
}

impl Default for DetectorConfiguration {
    fn default() -> Self {
        Self {
            min_frequency_hz: 432,
            max_frequency_hz: 963,
            sensitivity: Sensitivity::Medium,
        }
    }
}

impl DetectorConfiguration {
    pub fn new(min_frequency_hz: u32, max_frequency_hz: u32, sensitivity: Sensitivity) -> Self {
        Self {
            min_frequency_hz,
            max_frequency_hz,
            sensitivity,
        }
    }

    pub fn range(&self) -> FrequencyRange {
        FrequencyRange::new(self.min_frequency_hz, self.max_frequency_hz)
    }

    pub fn fft_size(&self) -> usize {
        self.sensitivity.fft_size()
    }

    /// Validate the frequency window
    ///
    /// # Returns
    /// * `Ok(())` - `0 < min < max`
    /// * `Err(RecordingError::InvalidConfiguration)` - otherwise
    pub fn validate(&self) -> Result<(), RecordingError> {
        if self.min_frequency_hz == 0 {
            return Err(RecordingError::InvalidConfiguration {
                reason: "minimum frequency must be greater than 0 Hz".to_string(),
            });
        }
        if self.min_frequency_hz >= self.max_frequency_hz {
            return Err(RecordingError::InvalidConfiguration {
                reason: format!(
                    "minimum frequency {} Hz must be below maximum {} Hz",
                    self.min_frequency_hz, self.max_frequency_hz
                ),
            });
        }
        Ok(())
    }
}

/// Continuous detection session parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Interval between cooperative polling ticks
    pub frame_interval_ms: u64,
    /// Minimum time a frequency must stay current before it is reported
    pub min_event_duration_ms: u64,
    /// Frequencies closer than this are treated as the same run
    pub change_tolerance_hz: u32,
    /// Warn once every N consecutive silent frames in microphone mode
    pub silent_frame_log_every: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 16,
            min_event_duration_ms: 1000,
            change_tolerance_hz: 5,
            silent_frame_log_every: 100,
        }
    }
}

impl SessionConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

/// Batch recording ("N-cycle") parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Number of iterations per batch run
    pub max_iterations: u32,
    /// Real-time recording window per iteration
    pub window_ms: u64,
    /// Per-iteration timeout guarding a stalled source
    pub iteration_timeout_ms: u64,
    /// Synthetic delay standing in for the window in simulation mode
    pub simulated_window_ms: u64,
    /// Global watchdog for the whole batch
    pub watchdog_ms: u64,
    /// Sampling interval inside the recording window
    pub frame_interval_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            window_ms: 3000,
            iteration_timeout_ms: 3000,
            simulated_window_ms: 300,
            watchdog_ms: 60_000,
            frame_interval_ms: 16,
        }
    }
}

impl RecordingConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn iteration_timeout(&self) -> Duration {
        Duration::from_millis(self.iteration_timeout_ms)
    }

    pub fn simulated_window(&self) -> Duration {
        Duration::from_millis(self.simulated_window_ms)
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The loaded configuration, or defaults if the file is missing or invalid
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the default asset location
    pub fn load() -> Self {
        Self::load_from_file("assets/detector_config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.detector.min_frequency_hz, 432);
        assert_eq!(config.detector.max_frequency_hz, 963);
        assert_eq!(config.detector.sensitivity, Sensitivity::Medium);
        assert_eq!(config.recording.max_iterations, 5);
        assert_eq!(config.recording.watchdog_ms, 60_000);
        assert_eq!(config.session.min_event_duration_ms, 1000);
    }

    #[test]
    fn test_sensitivity_tables() {
        assert_eq!(Sensitivity::Low.fft_size(), 8192);
        assert_eq!(Sensitivity::Medium.fft_size(), 4096);
        assert_eq!(Sensitivity::High.fft_size(), 2048);

        assert_eq!(Sensitivity::Low.noise_floor(), 25.0);
        assert_eq!(Sensitivity::Medium.noise_floor(), 15.0);
        assert_eq!(Sensitivity::High.noise_floor(), 5.0);
    }

    #[test]
    fn test_sensitivity_from_str() {
        assert_eq!("HIGH".parse::<Sensitivity>(), Ok(Sensitivity::High));
        assert!("loud".parse::<Sensitivity>().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let config = DetectorConfiguration::new(963, 432, Sensitivity::Low);
        assert!(matches!(
            config.validate(),
            Err(RecordingError::InvalidConfiguration { .. })
        ));

        let config = DetectorConfiguration::new(0, 432, Sensitivity::Low);
        assert!(config.validate().is_err());

        assert!(DetectorConfiguration::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_section_defaults() {
        let json = r#"{ "detector": { "sensitivity": "High" } }"#;
        let parsed: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(parsed.detector.sensitivity, Sensitivity::High);
        assert_eq!(parsed.detector.min_frequency_hz, 432);
        assert_eq!(parsed.recording, RecordingConfig::default());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from_file("/nonexistent/detector_config.json");
        assert_eq!(config, AppConfig::default());
    }
}
