//! Media transport capability: the decoder/output the player drives.

use crate::error::{CoreError, Result};
use crate::track::TrackLocation;
use std::time::Duration;

/// Slowest playback rate the player accepts
pub const MIN_PLAYBACK_RATE: f64 = 0.25;
/// Fastest playback rate the player accepts
pub const MAX_PLAYBACK_RATE: f64 = 4.0;

/// Transport status as reported by the transport itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Category of a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The source could not be opened
    Access,
    /// The media format is not supported
    Format,
    /// Decoding failed mid-stream
    Decode,
    /// Network stream failure
    Network,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Access => "resource error",
            Self::Format => "format error",
            Self::Decode => "decode error",
            Self::Network => "network error",
            Self::Other => "playback error",
        };
        f.write_str(s)
    }
}

/// Notifications from the transport, delivered into the player loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    PositionChanged(Duration),
    DurationChanged(Duration),
    /// The loaded media finished on its own
    EndOfMedia,
    StateChanged(TransportState),
    Error {
        kind: TransportErrorKind,
        message: String,
    },
}

/// Commands the player issues. Implementations report progress through a
/// [`TransportEvent`] channel handed to the player separately.
pub trait MediaTransport: Send {
    /// # Errors
    ///
    /// Returns an error if the source cannot be handed to the transport.
    fn load(&mut self, source: &TrackLocation) -> Result<()>;
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    fn seek(&mut self, position: Duration);
    fn set_playback_rate(&mut self, rate: f64);
}

/// Clamp a requested playback rate into the supported range.
///
/// # Errors
///
/// Returns [`CoreError::InvalidPlaybackRate`] for NaN or infinite input.
pub fn clamp_playback_rate(rate: f64) -> Result<f64> {
    if !rate.is_finite() {
        return Err(CoreError::InvalidPlaybackRate { rate });
    }
    Ok(rate.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE))
}
