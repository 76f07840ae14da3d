use async_trait::async_trait;
use melodeck_core::{
    CoreError, FetchedLyrics, LyricsProvider, LyricsQuery, NetworkFetch, TrackRef,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "melodeck::provider::netease";

/// Public NetEase Cloud Music API proxy
pub const DEFAULT_API_BASE_URL: &str = "https://netease-cloud-music-api-psi-drab.vercel.app";

/// Default timeout for each HTTP request (10 seconds)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Songs with these fee codes need a subscription (1) or an album purchase (4)
const UNPLAYABLE_FEES: &[i64] = &[1, 4];

/// NetEase lyrics provider: keyword search for a song id, then lyric by id
pub struct NeteaseProvider {
    fetch: Arc<dyn NetworkFetch>,
    base_url: String,
    timeout: Duration,
}

/// A playable search hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineSong {
    pub id: u64,
    pub name: String,
    /// Artist names joined with ", "
    pub artist: String,
    pub album: String,
    pub duration: Duration,
    /// Direct stream URL
    pub url: String,
}

impl OnlineSong {
    /// Playlist entry for this song, shown as `Artist - Name`
    #[must_use]
    pub fn track_ref(&self) -> TrackRef {
        let display_name = if self.artist.is_empty() {
            self.name.clone()
        } else {
            format!("{} - {}", self.artist, self.name)
        };
        TrackRef::remote(&self.url, display_name)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Option<SearchResult>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResult {
    #[serde(default)]
    songs: Vec<SongEntry>,
}

#[derive(Debug, Deserialize)]
struct SongEntry {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default, alias = "ar")]
    artists: Vec<NamedEntry>,
    #[serde(default, alias = "al")]
    album: Option<NamedEntry>,
    /// Milliseconds
    #[serde(default, alias = "dt")]
    duration: u64,
    #[serde(default)]
    fee: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct NamedEntry {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct LyricResponse {
    #[serde(default)]
    lrc: Option<LyricBody>,
}

#[derive(Debug, Deserialize)]
struct LyricBody {
    #[serde(default)]
    lyric: String,
}

impl SongEntry {
    fn is_playable(&self) -> bool {
        self.fee.map_or(true, |fee| !UNPLAYABLE_FEES.contains(&fee))
    }

    fn into_online_song(self) -> OnlineSong {
        let artist = self
            .artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        OnlineSong {
            url: stream_url(self.id),
            id: self.id,
            name: self.name,
            artist,
            album: self.album.map(|a| a.name).unwrap_or_default(),
            duration: Duration::from_secs(self.duration / 1000),
        }
    }
}

/// Public stream URL for a song id
#[must_use]
pub fn stream_url(id: u64) -> String {
    format!("http://music.163.com/song/media/outer/url?id={id}.mp3")
}

impl NeteaseProvider {
    /// Create a provider using the default API endpoint and timeout
    #[must_use]
    pub fn new(fetch: Arc<dyn NetworkFetch>) -> Self {
        Self {
            fetch,
            base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn search(&self, keyword: &str, limit: usize) -> Result<Vec<SongEntry>, CoreError> {
        let url = format!(
            "{}/search?keywords={}&limit={}",
            self.base_url,
            urlencoding::encode(keyword),
            limit
        );
        debug!(target: LOG_TARGET, "NetEase search URL: {}", url);

        let body = self.fetch.get(&url, self.timeout).await?;
        let response: SearchResponse = serde_json::from_slice(&body)?;
        Ok(response.result.unwrap_or_default().songs)
    }

    async fn lyric_by_id(&self, id: u64) -> Result<String, CoreError> {
        let url = format!("{}/lyric?id={}", self.base_url, id);
        debug!(target: LOG_TARGET, "NetEase lyric URL: {}", url);

        let body = self.fetch.get(&url, self.timeout).await?;
        let response: LyricResponse = serde_json::from_slice(&body)?;
        Ok(response.lrc.map(|l| l.lyric).unwrap_or_default())
    }

    /// Search for playable songs. VIP-only and purchase-only songs are skipped,
    /// so fewer than `limit` results may come back.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is malformed.
    pub async fn search_songs(&self, keyword: &str, limit: usize) -> Result<Vec<OnlineSong>, CoreError> {
        info!(target: LOG_TARGET, "Searching NetEase for: {}", keyword);
        let songs: Vec<_> = self
            .search(keyword, limit)
            .await?
            .into_iter()
            .filter(SongEntry::is_playable)
            .map(SongEntry::into_online_song)
            .collect();
        info!(target: LOG_TARGET, "NetEase returned {} playable songs", songs.len());
        Ok(songs)
    }
}

#[async_trait]
impl LyricsProvider for NeteaseProvider {
    fn name(&self) -> &'static str {
        "netease"
    }

    async fn fetch(&self, query: &LyricsQuery) -> Result<FetchedLyrics, CoreError> {
        info!(
            target: LOG_TARGET,
            "Fetching lyrics from NetEase for: {} - {}", query.artist_name, query.track_name
        );

        let not_found = || CoreError::LyricsNotFound {
            track: query.track_name.clone(),
            artist: query.artist_name.clone(),
        };

        let Some(song) = self.search(&query.keyword(), 1).await?.into_iter().next() else {
            info!(target: LOG_TARGET, "NetEase search found no songs");
            return Err(not_found());
        };

        let lyric = self.lyric_by_id(song.id).await?;
        if lyric.trim().is_empty() {
            warn!(target: LOG_TARGET, "NetEase song {} has no lyrics", song.id);
            return Err(not_found());
        }

        info!(target: LOG_TARGET, "NetEase found lyrics for song id: {}", song.id);
        Ok(FetchedLyrics {
            lrc: lyric,
            provider_id: song.id.to_string(),
        })
    }
}
