// Recording controller error types and constants

use crate::error::{AcquisitionError, ErrorCode};
use log::error;
use std::fmt;

/// Recording error code constants
///
/// Error code range: 2001-2003
pub struct RecordingErrorCodes {}

impl RecordingErrorCodes {
    /// A batch run or continuous session is already holding the source
    pub const ALREADY_RUNNING: i32 = 2001;

    /// Stop requested while nothing is running
    pub const NOT_RUNNING: i32 = 2002;

    /// Detector configuration failed validation
    pub const INVALID_CONFIGURATION: i32 = 2003;
}

/// Log a recording error with structured context
pub fn log_recording_error(err: &RecordingError, context: &str) {
    error!(
        "Recording error in {}: code={}, component=RecordingController, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors from the detection mode state machines
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingError {
    /// Start requested outside the idle state
    AlreadyRunning,

    /// Stop requested outside a running state
    NotRunning,

    /// Configuration rejected before any device was touched
    InvalidConfiguration { reason: String },

    /// The source refused to open when a mode was started
    Acquisition(AcquisitionError),
}

impl From<AcquisitionError> for RecordingError {
    fn from(err: AcquisitionError) -> Self {
        RecordingError::Acquisition(err)
    }
}

impl ErrorCode for RecordingError {
    fn code(&self) -> i32 {
        match self {
            RecordingError::AlreadyRunning => RecordingErrorCodes::ALREADY_RUNNING,
            RecordingError::NotRunning => RecordingErrorCodes::NOT_RUNNING,
            RecordingError::InvalidConfiguration { .. } => {
                RecordingErrorCodes::INVALID_CONFIGURATION
            }
            RecordingError::Acquisition(err) => err.code(),
        }
    }

    fn message(&self) -> String {
        match self {
            RecordingError::AlreadyRunning => {
                "Detector already running. Stop the active mode first.".to_string()
            }
            RecordingError::NotRunning => "Detector not running".to_string(),
            RecordingError::InvalidConfiguration { reason } => {
                format!("Invalid detector configuration: {}", reason)
            }
            RecordingError::Acquisition(err) => err.message(),
        }
    }
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RecordingError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for RecordingError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_error_codes() {
        assert_eq!(
            RecordingError::AlreadyRunning.code(),
            RecordingErrorCodes::ALREADY_RUNNING
        );
        assert_eq!(
            RecordingError::NotRunning.code(),
            RecordingErrorCodes::NOT_RUNNING
        );
        assert_eq!(
            RecordingError::InvalidConfiguration {
                reason: "test".to_string()
            }
            .code(),
            RecordingErrorCodes::INVALID_CONFIGURATION
        );
    }

    #[test]
    fn test_error_propagation() {
        fn may_fail() -> Result<(), RecordingError> {
            Err(RecordingError::AlreadyRunning)
        }

        fn caller() -> Result<(), RecordingError> {
            may_fail()?;
            Ok(())
        }

        assert!(caller().is_err());
    }

    #[test]
    fn test_acquisition_failure_keeps_its_code() {
        let err: RecordingError = AcquisitionError::NoDevice.into();
        assert_eq!(err.code(), crate::error::AcquisitionErrorCodes::NO_DEVICE);
    }
}
