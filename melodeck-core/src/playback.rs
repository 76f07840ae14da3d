use crate::track::TrackRef;
use crate::transport::TransportState;
use std::time::Duration;

/// Last known playback status, as assembled from transport events
#[derive(Debug, Clone)]
pub struct PlaybackStatus {
    /// Transport state (playing, paused, stopped)
    pub state: TransportState,
    /// Track currently loaded in the transport
    pub track: Option<TrackRef>,
    /// Current playback position
    pub position: Duration,
    /// Total media duration, zero until the transport reports it
    pub duration: Duration,
    /// Playback rate multiplier
    pub rate: f64,
}

impl Default for PlaybackStatus {
    fn default() -> Self {
        Self {
            state: TransportState::Stopped,
            track: None,
            position: Duration::ZERO,
            duration: Duration::ZERO,
            rate: 1.0,
        }
    }
}

impl PlaybackStatus {
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }

    /// Record a new position reported by the transport
    pub fn set_position(&mut self, position: Duration) {
        self.position = position;
    }
}
