// Angelic Detector Core - dominant-frequency detection engine
// Spectrum acquisition, peak extraction, and reference-tone classification

// Module declarations
pub mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod random;
pub mod recording;
pub mod session;
pub mod spectrum;
pub mod telemetry;
pub mod testing;
pub mod time;

// Re-exports for convenience
pub use analysis::{is_angelic, AngelicReference, ANGELIC_REFERENCES};
pub use config::{AppConfig, DetectorConfiguration, Sensitivity};
pub use engine::{DetectorEngine, EngineMode, EngineReading};
pub use error::{AcquisitionError, AnalysisError, ErrorCode, RecordingError};
pub use recording::{RecordingController, RecordingOutcome};
pub use session::{DetectedFrequencyEvent, DetectionSession};
