// Error types for the angelic frequency detector
//
// This module defines custom error types for audio acquisition, spectrum
// analysis, and batch recording, each carrying a stable numeric code so the
// embedding UI can react without string matching.

mod acquisition;
mod recording;

pub use acquisition::{
    log_acquisition_error, log_analysis_error, AcquisitionError, AcquisitionErrorCodes,
    AnalysisError, AnalysisErrorCodes,
};
pub use recording::{log_recording_error, RecordingError, RecordingErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the library boundary.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
