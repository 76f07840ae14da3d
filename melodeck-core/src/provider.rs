use crate::error::CoreError;
use async_trait::async_trait;

/// Query parameters for fetching lyrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricsQuery {
    /// Track name
    pub track_name: String,
    /// Artist name, empty when unknown
    pub artist_name: String,
}

impl LyricsQuery {
    /// Create a new lyrics query
    #[must_use]
    pub fn new(track_name: impl Into<String>, artist_name: impl Into<String>) -> Self {
        Self {
            track_name: track_name.into(),
            artist_name: artist_name.into(),
        }
    }

    /// Free-text search keyword: `"artist title"`, or just the title when the
    /// artist is unknown
    #[must_use]
    pub fn keyword(&self) -> String {
        if self.artist_name.is_empty() {
            self.track_name.clone()
        } else {
            format!("{} {}", self.artist_name, self.track_name)
        }
    }
}

/// Lyrics with provider metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedLyrics {
    /// Raw LRC text as returned by the provider
    pub lrc: String,
    /// Provider-specific ID (e.g. the remote song id)
    pub provider_id: String,
}

/// Trait for lyrics providers
#[async_trait]
pub trait LyricsProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &'static str;

    /// Fetch lyrics for a query
    async fn fetch(&self, query: &LyricsQuery) -> Result<FetchedLyrics, CoreError>;
}
