// EngineChannels: broadcast channels fanned out to UI collaborators
// Single Responsibility: channel ownership and subscription

use tokio::sync::broadcast;

use crate::recording::RecordingUpdate;
use crate::session::SessionUpdate;

use super::EngineReading;

/// Buffer for per-frame session updates (~4 s at 60 fps)
const SESSION_BUFFER: usize = 256;

/// Buffer for reading changes
const READING_BUFFER: usize = 64;

/// Owns every broadcast channel the engine publishes on
///
/// # Channel Types
/// - Session: frames and detected events of the continuous mode
/// - Recording: progress of the batch mode (shared with the controller)
/// - Readings: current frequency + status whenever either changes
pub struct EngineChannels {
    session: broadcast::Sender<SessionUpdate>,
    recording: broadcast::Sender<RecordingUpdate>,
    readings: broadcast::Sender<EngineReading>,
}

impl EngineChannels {
    /// Create the channels around the controller's progress sender
    pub fn new(recording: broadcast::Sender<RecordingUpdate>) -> Self {
        let (session, _) = broadcast::channel(SESSION_BUFFER);
        let (readings, _) = broadcast::channel(READING_BUFFER);
        Self {
            session,
            recording,
            readings,
        }
    }

    /// Republish a continuous-mode update; dropped when nobody listens
    pub fn publish_session(&self, update: SessionUpdate) {
        let _ = self.session.send(update);
    }

    pub fn publish_reading(&self, reading: EngineReading) {
        let _ = self.readings.send(reading);
    }

    pub fn subscribe_session(&self) -> broadcast::Receiver<SessionUpdate> {
        self.session.subscribe()
    }

    pub fn subscribe_recording(&self) -> broadcast::Receiver<RecordingUpdate> {
        self.recording.subscribe()
    }

    pub fn subscribe_readings(&self) -> broadcast::Receiver<EngineReading> {
        self.readings.subscribe()
    }
}
