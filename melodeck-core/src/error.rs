use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    // Invalid-argument errors (caller bugs, never retried)
    #[error("Index {index} is out of range for a playlist of {len} tracks")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Invalid playback rate: {rate}")]
    InvalidPlaybackRate { rate: f64 },

    // Configuration errors
    #[error("Config file not found at {path}. A template has been created - edit it and restart.")]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid config: {message}")]
    ConfigInvalid { message: String },

    #[error("Failed to parse config file: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    // Lyrics errors
    #[error("Lyrics not found for track: {track} by {artist}")]
    LyricsNotFound { track: String, artist: String },

    // Network errors
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Request to {url} returned status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Network request failed: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Network middleware failed: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    // Runtime errors
    #[error("Player has shut down")]
    PlayerStopped,

    // Persistence errors
    #[error("Failed to persist {path}: {reason}")]
    PersistenceFailed { path: PathBuf, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CoreError {
    /// True for misuse of an API (bad index, bad rate). These indicate a bug in
    /// the caller rather than a missing resource and must not be retried.
    #[must_use]
    pub const fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::IndexOutOfRange { .. } | Self::InvalidPlaybackRate { .. }
        )
    }

    /// True for outcomes that mean "nothing there": no lyrics, no network.
    #[must_use]
    pub const fn is_resource_absent(&self) -> bool {
        matches!(
            self,
            Self::LyricsNotFound { .. }
                | Self::Timeout { .. }
                | Self::HttpStatus { .. }
                | Self::NetworkError(_)
                | Self::Middleware(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_classification() {
        let err = CoreError::IndexOutOfRange { index: 4, len: 2 };
        assert!(err.is_invalid_argument());
        assert!(!err.is_resource_absent());
        assert_eq!(
            err.to_string(),
            "Index 4 is out of range for a playlist of 2 tracks"
        );
    }

    #[test]
    fn test_resource_absent_classification() {
        let err = CoreError::Timeout {
            url: "http://example.invalid".to_string(),
        };
        assert!(err.is_resource_absent());
        assert!(!err.is_invalid_argument());
    }
}
