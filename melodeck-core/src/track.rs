//! Playable item identification.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v"];

/// Kind of media a file holds, as recorded in play history.
///
/// Persisted as `"audio"` / `"video"`; any other stored value reads back as
/// [`MediaKind::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum MediaKind {
    #[default]
    Audio,
    Video,
    Unknown,
}

impl MediaKind {
    /// Guess the kind from a file extension; anything not a known video
    /// container is treated as audio
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let is_video = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                VIDEO_EXTENSIONS
                    .iter()
                    .any(|v| v.eq_ignore_ascii_case(ext))
            });
        if is_video {
            Self::Video
        } else {
            Self::Audio
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Unknown => "",
        }
    }
}

impl From<String> for MediaKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "audio" => Self::Audio,
            "video" => Self::Video,
            _ => Self::Unknown,
        }
    }
}

impl From<MediaKind> for String {
    fn from(value: MediaKind) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a track's media lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackLocation {
    /// A file on the local filesystem
    Local(PathBuf),
    /// A remote stream URL
    Remote(String),
}

impl std::fmt::Display for TrackLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => f.write_str(url),
        }
    }
}

/// One playable item in the playlist. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackRef {
    pub location: TrackLocation,
    pub display_name: String,
    pub kind: MediaKind,
}

impl TrackRef {
    /// A local file; the display name is the file name
    #[must_use]
    pub fn local(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let display_name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        let kind = MediaKind::from_path(&path);
        Self {
            location: TrackLocation::Local(path),
            display_name,
            kind,
        }
    }

    /// A remote stream with an explicit display name
    #[must_use]
    pub fn remote(url: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            location: TrackLocation::Remote(url.into()),
            display_name: display_name.into(),
            kind: MediaKind::Audio,
        }
    }

    /// Local path, if this track is a local file
    #[must_use]
    pub fn local_path(&self) -> Option<&Path> {
        match &self.location {
            TrackLocation::Local(path) => Some(path),
            TrackLocation::Remote(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_track_display_name() {
        let track = TrackRef::local("/music/Artist - Song.mp3");
        assert_eq!(track.display_name, "Artist - Song.mp3");
        assert_eq!(track.kind, MediaKind::Audio);
        assert_eq!(track.local_path(), Some(Path::new("/music/Artist - Song.mp3")));
    }

    #[test]
    fn test_video_kind_from_extension() {
        assert_eq!(MediaKind::from_path(Path::new("a/clip.MKV")), MediaKind::Video);
        assert_eq!(MediaKind::from_path(Path::new("a/clip.flac")), MediaKind::Audio);
        assert_eq!(MediaKind::from_path(Path::new("a/noext")), MediaKind::Audio);
    }

    #[test]
    fn test_remote_track_has_no_local_path() {
        let track = TrackRef::remote("http://example.invalid/1.mp3", "Song");
        assert!(track.local_path().is_none());
        assert_eq!(track.location.to_string(), "http://example.invalid/1.mp3");
    }

    #[test]
    fn test_media_kind_serde() {
        let json = serde_json::to_string(&MediaKind::Video).unwrap_or_default();
        assert_eq!(json, "\"video\"");
        let kind: MediaKind = serde_json::from_str("\"podcast\"").unwrap_or_default();
        assert_eq!(kind, MediaKind::Unknown);
    }
}
