// Acquisition and analysis error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Acquisition error code constants
///
/// Error code range: 1001-1004
pub struct AcquisitionErrorCodes {}

impl AcquisitionErrorCodes {
    /// The platform refused access to the input device
    pub const PERMISSION_DENIED: i32 = 1001;

    /// No input device is connected
    pub const NO_DEVICE: i32 = 1002;

    /// The device exists but is held by another application or failed in hardware
    pub const HARDWARE_BUSY: i32 = 1003;

    /// Any other failure reported while opening the device
    pub const UNKNOWN: i32 = 1004;
}

/// Analysis error code constants
///
/// Error code range: 1101-1103
pub struct AnalysisErrorCodes {}

impl AnalysisErrorCodes {
    /// Snapshot requested before the source was opened (or after it was closed)
    pub const NOT_OPEN: i32 = 1101;

    /// The analyser could not produce a snapshot
    pub const READ_FAILED: i32 = 1102;

    /// The in-place re-acquisition after a failed read did not succeed either
    pub const RECOVERY_FAILED: i32 = 1103;
}

/// Log an acquisition error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_acquisition_error(err: &AcquisitionError, context: &str) {
    error!(
        "Acquisition error in {}: code={}, component=SpectrumSource, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Log an analysis error with structured context
pub fn log_analysis_error(err: &AnalysisError, context: &str) {
    error!(
        "Analysis error in {}: code={}, component=SpectrumSource, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised while opening an audio input device
///
/// Surfaced once to the caller of `SpectrumSource::open`, after every
/// capture constraint in the fallback ladder has been tried.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    /// Microphone permission denied
    PermissionDenied,

    /// No input device found
    NoDevice,

    /// Device in use by another application, or a hardware fault
    HardwareBusy,

    /// Unclassified platform error
    Unknown { details: String },
}

impl AcquisitionError {
    /// Classify a platform error message into an acquisition error
    ///
    /// Matching is done on the error text because neither browsers nor the
    /// native audio hosts expose a stable structured reason.
    ///
    /// # Arguments
    /// * `text` - Raw error text reported by the platform
    pub fn classify(text: &str) -> Self {
        let lowered = text.to_ascii_lowercase();

        if text.contains("NotAllowedError") || lowered.contains("permission denied") {
            AcquisitionError::PermissionDenied
        } else if text.contains("NotFoundError")
            || lowered.contains("no input device")
            || lowered.contains("not found")
        {
            AcquisitionError::NoDevice
        } else if text.contains("NotReadableError")
            || lowered.contains("busy")
            || lowered.contains("in use")
        {
            AcquisitionError::HardwareBusy
        } else {
            AcquisitionError::Unknown {
                details: text.to_string(),
            }
        }
    }
}

impl ErrorCode for AcquisitionError {
    fn code(&self) -> i32 {
        match self {
            AcquisitionError::PermissionDenied => AcquisitionErrorCodes::PERMISSION_DENIED,
            AcquisitionError::NoDevice => AcquisitionErrorCodes::NO_DEVICE,
            AcquisitionError::HardwareBusy => AcquisitionErrorCodes::HARDWARE_BUSY,
            AcquisitionError::Unknown { .. } => AcquisitionErrorCodes::UNKNOWN,
        }
    }

    fn message(&self) -> String {
        match self {
            AcquisitionError::PermissionDenied => {
                "Microphone permission denied. Please grant microphone access.".to_string()
            }
            AcquisitionError::NoDevice => {
                "No microphone found. Connect an input device and try again.".to_string()
            }
            AcquisitionError::HardwareBusy => {
                "Microphone is in use by another application or reported a hardware error"
                    .to_string()
            }
            AcquisitionError::Unknown { details } => {
                format!("Failed to access microphone: {}", details)
            }
        }
    }
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AcquisitionError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AcquisitionError {}

/// Transient failures while reading a spectrum snapshot
///
/// Never raised to the UI: sessions recover locally or substitute a value.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// No device handle is held
    NotOpen,

    /// Reading the analyser failed
    ReadFailed { reason: String },

    /// The single re-acquisition attempt failed as well
    RecoveryFailed { reason: String },
}

impl ErrorCode for AnalysisError {
    fn code(&self) -> i32 {
        match self {
            AnalysisError::NotOpen => AnalysisErrorCodes::NOT_OPEN,
            AnalysisError::ReadFailed { .. } => AnalysisErrorCodes::READ_FAILED,
            AnalysisError::RecoveryFailed { .. } => AnalysisErrorCodes::RECOVERY_FAILED,
        }
    }

    fn message(&self) -> String {
        match self {
            AnalysisError::NotOpen => "Spectrum source is not open".to_string(),
            AnalysisError::ReadFailed { reason } => {
                format!("Failed to read frequency data: {}", reason)
            }
            AnalysisError::RecoveryFailed { reason } => {
                format!("Analyser recovery failed: {}", reason)
            }
        }
    }
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AnalysisError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AnalysisError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquisition_error_codes() {
        assert_eq!(
            AcquisitionError::PermissionDenied.code(),
            AcquisitionErrorCodes::PERMISSION_DENIED
        );
        assert_eq!(
            AcquisitionError::NoDevice.code(),
            AcquisitionErrorCodes::NO_DEVICE
        );
        assert_eq!(
            AcquisitionError::HardwareBusy.code(),
            AcquisitionErrorCodes::HARDWARE_BUSY
        );
        assert_eq!(
            AcquisitionError::Unknown {
                details: "test".to_string()
            }
            .code(),
            AcquisitionErrorCodes::UNKNOWN
        );
    }

    #[test]
    fn test_classify_platform_messages() {
        assert_eq!(
            AcquisitionError::classify("NotAllowedError: Permission denied"),
            AcquisitionError::PermissionDenied
        );
        assert_eq!(
            AcquisitionError::classify("NotFoundError: Requested device not found"),
            AcquisitionError::NoDevice
        );
        assert_eq!(
            AcquisitionError::classify("No input device available"),
            AcquisitionError::NoDevice
        );
        assert_eq!(
            AcquisitionError::classify("NotReadableError: Could not start audio source"),
            AcquisitionError::HardwareBusy
        );
        assert_eq!(
            AcquisitionError::classify("Device or resource busy"),
            AcquisitionError::HardwareBusy
        );
        assert!(matches!(
            AcquisitionError::classify("something odd"),
            AcquisitionError::Unknown { details } if details == "something odd"
        ));
    }

    #[test]
    fn test_analysis_error_messages() {
        let err = AnalysisError::ReadFailed {
            reason: "stream closed".to_string(),
        };
        assert_eq!(err.code(), AnalysisErrorCodes::READ_FAILED);
        assert_eq!(err.message(), "Failed to read frequency data: stream closed");

        assert!(AnalysisError::NotOpen.message().contains("not open"));
    }

    #[test]
    fn test_display_includes_code() {
        let err = AcquisitionError::PermissionDenied;
        let display = format!("{}", err);
        assert!(display.contains("AcquisitionError"));
        assert!(display.contains("1001"));
    }
}
