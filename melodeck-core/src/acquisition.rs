//! Lyric acquisition: colocated `.lrc` lookup, remote fetch, and save-to-disk.

use crate::error::{CoreError, Result};
use crate::fs::Filesystem;
use crate::lrc::LyricDocument;
use crate::provider::{FetchedLyrics, LyricsProvider, LyricsQuery};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "melodeck::lyrics";

/// Extension of lyric files
pub const LRC_EXTENSION: &str = "lrc";

/// Subdirectories of a track's folder searched after the folder itself
pub const DEFAULT_LYRIC_SUBDIRECTORIES: &[&str] = &["lyrics", "Lyrics"];

/// Default overall deadline for one provider's lookup
pub const DEFAULT_FETCH_DEADLINE: Duration = Duration::from_secs(30);

/// Best-effort title/artist guess from a file name like `Artist - Title.mp3`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongGuess {
    pub title: String,
    /// Empty when the file name carries no artist
    pub artist: String,
}

impl SongGuess {
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_name(&stem)
    }

    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let mut parts = name.split(" - ");
        match (parts.next(), parts.next()) {
            (Some(artist), Some(title)) => Self {
                title: title.trim().to_string(),
                artist: artist.trim().to_string(),
            },
            _ => Self {
                title: name.trim().to_string(),
                artist: String::new(),
            },
        }
    }

    #[must_use]
    pub fn query(&self) -> LyricsQuery {
        LyricsQuery::new(&self.title, &self.artist)
    }
}

/// Finds, fetches and stores lyrics for local tracks
pub struct LyricsAcquisition {
    fs: Arc<dyn Filesystem>,
    subdirectories: Vec<String>,
    providers: Vec<Arc<dyn LyricsProvider>>,
    online_fetch: bool,
    deadline: Duration,
}

impl LyricsAcquisition {
    /// Local lookup only, until providers are added
    #[must_use]
    pub fn new(fs: Arc<dyn Filesystem>) -> Self {
        Self {
            fs,
            subdirectories: DEFAULT_LYRIC_SUBDIRECTORIES
                .iter()
                .map(ToString::to_string)
                .collect(),
            providers: Vec::new(),
            online_fetch: true,
            deadline: DEFAULT_FETCH_DEADLINE,
        }
    }

    #[must_use]
    pub fn with_subdirectories(mut self, subdirectories: Vec<String>) -> Self {
        self.subdirectories = subdirectories;
        self
    }

    /// Providers are tried in the order they were added
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn LyricsProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    #[must_use]
    pub const fn with_online_fetch(mut self, enabled: bool) -> Self {
        self.online_fetch = enabled;
        self
    }

    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Whether a remote lookup would be attempted at all
    #[must_use]
    pub fn can_fetch(&self) -> bool {
        self.online_fetch && !self.providers.is_empty()
    }

    /// Where a lyric file for `track` is written: `<dir>/<stem>.lrc`
    #[must_use]
    pub fn lyric_path(track: &Path) -> Option<PathBuf> {
        let stem = track.file_stem()?;
        let mut name = stem.to_os_string();
        name.push(".");
        name.push(LRC_EXTENSION);
        Some(track.with_file_name(name))
    }

    /// Lookup order: next to the track, then each configured subdirectory
    #[must_use]
    pub fn candidates(&self, track: &Path) -> Vec<PathBuf> {
        let Some(primary) = Self::lyric_path(track) else {
            return Vec::new();
        };
        let Some(file_name) = primary.file_name().map(ToOwned::to_owned) else {
            return Vec::new();
        };
        let dir = primary.parent().map(Path::to_path_buf).unwrap_or_default();

        let mut candidates = vec![primary];
        candidates.extend(
            self.subdirectories
                .iter()
                .map(|sub| dir.join(sub).join(&file_name)),
        );
        candidates
    }

    /// First existing lyric file for `track`
    #[must_use]
    pub fn find_local(&self, track: &Path) -> Option<PathBuf> {
        self.candidates(track)
            .into_iter()
            .find(|candidate| self.fs.exists(candidate))
    }

    /// Parse the first existing lyric file; empty when there is none
    #[must_use]
    pub fn resolve_local(&self, track: &Path) -> LyricDocument {
        let Some(path) = self.find_local(track) else {
            debug!(target: LOG_TARGET, "No local lyrics for {:?}", track);
            return LyricDocument::empty();
        };

        let document = self
            .fs
            .read_text(&path)
            .map(|text| LyricDocument::parse(&text))
            .unwrap_or_default();
        debug!(
            target: LOG_TARGET,
            "Loaded {} lyric lines from {:?}",
            document.len(),
            path
        );
        document
    }

    /// Write fetched lyric text next to `track`, preceded by a metadata header.
    /// An existing lyric file is never replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if `track` has no file name, a lyric file is already
    /// there, or the write fails.
    pub fn save(&self, track: &Path, guess: &SongGuess, lrc: &str) -> Result<PathBuf> {
        let path = Self::lyric_path(track).ok_or_else(|| CoreError::PersistenceFailed {
            path: track.to_path_buf(),
            reason: "track has no file name".to_string(),
        })?;
        if self.fs.exists(&path) {
            return Err(CoreError::PersistenceFailed {
                path,
                reason: "a lyric file already exists".to_string(),
            });
        }

        let mut content = format!("[ti:{}]\n", guess.title);
        if !guess.artist.is_empty() {
            let _ = writeln!(content, "[ar:{}]", guess.artist);
        }
        content.push_str("[by:melodeck]\n\n");
        content.push_str(lrc);

        self.fs.write_text(&path, &content)?;
        info!(target: LOG_TARGET, "Saved lyrics to {:?}", path);
        Ok(path)
    }

    /// Ask each provider in turn; the first one returning usable lyrics wins.
    /// Failures and timeouts are logged and yield `None`.
    pub async fn fetch_remote(&self, query: &LyricsQuery) -> Option<FetchedLyrics> {
        if !self.online_fetch {
            return None;
        }

        for provider in &self.providers {
            debug!(target: LOG_TARGET, "Trying provider: {}", provider.name());
            match tokio::time::timeout(self.deadline, provider.fetch(query)).await {
                Ok(Ok(fetched)) if !LyricDocument::parse(&fetched.lrc).is_empty() => {
                    info!(
                        target: LOG_TARGET,
                        "Found lyrics from {} (provider_id: {})",
                        provider.name(),
                        fetched.provider_id
                    );
                    return Some(fetched);
                }
                Ok(Ok(_)) => {
                    info!(target: LOG_TARGET, "Provider {} returned no timed lyrics", provider.name());
                }
                Ok(Err(e)) if e.is_resource_absent() => {
                    info!(target: LOG_TARGET, "Provider {} has no lyrics: {}", provider.name(), e);
                }
                Ok(Err(e)) => {
                    warn!(target: LOG_TARGET, "Provider {} failed: {}", provider.name(), e);
                }
                Err(_) => {
                    warn!(target: LOG_TARGET, "Provider {} timed out", provider.name());
                }
            }
        }

        info!(
            target: LOG_TARGET,
            "No lyrics found for {} - {}", query.artist_name, query.track_name
        );
        None
    }

    /// Fetch lyrics for a local track, save them beside it and return the
    /// resulting document. Empty when nothing was found.
    pub async fn acquire_remote(&self, track: &Path) -> LyricDocument {
        let guess = SongGuess::from_path(track);
        let Some(fetched) = self.fetch_remote(&guess.query()).await else {
            return LyricDocument::empty();
        };

        if let Err(e) = self.save(track, &guess, &fetched.lrc) {
            warn!(target: LOG_TARGET, "Failed to save lyrics for {:?}: {}", track, e);
            return LyricDocument::parse(&fetched.lrc);
        }

        let document = self.resolve_local(track);
        if document.is_empty() {
            LyricDocument::parse(&fetched.lrc)
        } else {
            document
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFilesystem;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const LRC: &str = "[00:01.00]one\n[00:02.50]two\n[00:04.00][00:06.00]chorus";

    struct ScriptedProvider {
        name: &'static str,
        response: std::result::Result<String, ()>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn ok(name: &'static str, lrc: &str) -> Self {
            Self {
                name,
                response: Ok(lrc.to_string()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(name: &'static str) -> Self {
            Self {
                name,
                response: Err(()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LyricsProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch(&self, query: &LyricsQuery) -> Result<FetchedLyrics> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match &self.response {
                Ok(lrc) => Ok(FetchedLyrics {
                    lrc: lrc.clone(),
                    provider_id: "42".to_string(),
                }),
                Err(()) => Err(CoreError::LyricsNotFound {
                    track: query.track_name.clone(),
                    artist: query.artist_name.clone(),
                }),
            }
        }
    }

    fn acquisition(fs: &Arc<MemoryFilesystem>) -> LyricsAcquisition {
        LyricsAcquisition::new(Arc::clone(fs) as Arc<dyn Filesystem>)
    }

    #[test]
    fn test_song_guess() {
        let guess = SongGuess::from_path(Path::new("/m/Queen - Bohemian Rhapsody.mp3"));
        assert_eq!(guess.artist, "Queen");
        assert_eq!(guess.title, "Bohemian Rhapsody");

        let guess = SongGuess::from_path(Path::new("/m/Untitled.mp3"));
        assert_eq!(guess.artist, "");
        assert_eq!(guess.title, "Untitled");
        assert_eq!(guess.query().keyword(), "Untitled");

        let guess = SongGuess::from_name("A - B - Live");
        assert_eq!((guess.artist.as_str(), guess.title.as_str()), ("A", "B"));
    }

    #[test]
    fn test_candidate_order() {
        let fs = Arc::new(MemoryFilesystem::new());
        let candidates = acquisition(&fs).candidates(Path::new("/m/song.flac"));
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/m/song.lrc"),
                PathBuf::from("/m/lyrics/song.lrc"),
                PathBuf::from("/m/Lyrics/song.lrc"),
            ]
        );
    }

    #[test]
    fn test_first_match_wins() {
        let fs = Arc::new(
            MemoryFilesystem::new()
                .with_file("/m/lyrics/song.lrc", "[00:01.00]from subdir")
                .with_file("/m/Lyrics/song.lrc", "[00:01.00]from other subdir"),
        );
        let acq = acquisition(&fs);
        assert_eq!(acq.find_local(Path::new("/m/song.mp3")), Some(PathBuf::from("/m/lyrics/song.lrc")));
        let doc = acq.resolve_local(Path::new("/m/song.mp3"));
        assert_eq!(doc.get(0).map(|l| l.text.as_str()), Some("from subdir"));

        fs.insert("/m/song.lrc", "[00:01.00]beside");
        let doc = acq.resolve_local(Path::new("/m/song.mp3"));
        assert_eq!(doc.get(0).map(|l| l.text.as_str()), Some("beside"));
    }

    #[test]
    fn test_missing_lyrics_resolve_empty() {
        let fs = Arc::new(MemoryFilesystem::new());
        assert!(acquisition(&fs).resolve_local(Path::new("/m/none.mp3")).is_empty());
    }

    #[test]
    fn test_saved_lyrics_round_trip() -> Result<()> {
        let fs = Arc::new(MemoryFilesystem::new());
        let acq = acquisition(&fs);
        let track = Path::new("/m/Artist - Title.mp3");
        let path = acq.save(track, &SongGuess::from_path(track), LRC)?;
        assert_eq!(path, PathBuf::from("/m/Artist - Title.lrc"));

        let saved = fs.read_text(&path).unwrap_or_default();
        assert!(saved.starts_with("[ti:Title]\n[ar:Artist]\n[by:melodeck]\n"));

        let original = LyricDocument::parse(LRC);
        let reparsed = acq.resolve_local(track);
        assert_eq!(reparsed.len(), original.len());
        let times = |d: &LyricDocument| d.lines().iter().map(|l| l.start_time).collect::<Vec<_>>();
        assert_eq!(times(&reparsed), times(&original));
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_falls_through_failing_provider() {
        let fs = Arc::new(MemoryFilesystem::new());
        let failing = Arc::new(ScriptedProvider::failing("down"));
        let empty = Arc::new(ScriptedProvider::ok("plain", "no timestamps here"));
        let good = Arc::new(ScriptedProvider::ok("good", LRC));
        let acq = acquisition(&fs)
            .with_provider(Arc::clone(&failing) as Arc<dyn LyricsProvider>)
            .with_provider(Arc::clone(&empty) as Arc<dyn LyricsProvider>)
            .with_provider(Arc::clone(&good) as Arc<dyn LyricsProvider>);

        let fetched = acq.fetch_remote(&LyricsQuery::new("Title", "Artist")).await;
        assert_eq!(fetched.map(|f| f.lrc), Some(LRC.to_string()));
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(empty.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_hits_deadline() {
        let fs = Arc::new(MemoryFilesystem::new());
        let mut slow = ScriptedProvider::ok("slow", LRC);
        slow.delay = Duration::from_secs(60);
        let acq = acquisition(&fs)
            .with_provider(Arc::new(slow))
            .with_deadline(Duration::from_secs(10));

        assert!(acq.fetch_remote(&LyricsQuery::new("T", "")).await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_online_fetch() {
        let fs = Arc::new(MemoryFilesystem::new());
        let provider = Arc::new(ScriptedProvider::ok("good", LRC));
        let acq = acquisition(&fs)
            .with_provider(Arc::clone(&provider) as Arc<dyn LyricsProvider>)
            .with_online_fetch(false);

        assert!(!acq.can_fetch());
        assert!(acq.fetch_remote(&LyricsQuery::new("T", "")).await.is_none());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_acquire_remote_saves_and_adopts() {
        let fs = Arc::new(MemoryFilesystem::new());
        let acq = acquisition(&fs).with_provider(Arc::new(ScriptedProvider::ok("good", LRC)));
        let track = Path::new("/m/Artist - Title.mp3");

        let doc = acq.acquire_remote(track).await;
        assert_eq!(doc.len(), 4);
        assert!(fs.exists(Path::new("/m/Artist - Title.lrc")));
    }

    #[tokio::test]
    async fn test_acquire_remote_keeps_existing_lyric_file() {
        let user_text = "plain text lyrics without timestamps";
        let fs = Arc::new(MemoryFilesystem::new().with_file("/m/Artist - Title.lrc", user_text));
        let acq = acquisition(&fs).with_provider(Arc::new(ScriptedProvider::ok("good", LRC)));
        let track = Path::new("/m/Artist - Title.mp3");
        assert!(acq.resolve_local(track).is_empty());

        let doc = acq.acquire_remote(track).await;
        assert_eq!(doc.len(), 4);
        assert_eq!(
            fs.read_text(Path::new("/m/Artist - Title.lrc")).as_deref(),
            Some(user_text)
        );
    }

    #[test]
    fn test_non_utf8_lyric_file_still_resolves() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let track = dir.path().join("Artist - Song.mp3");
        let lyric = dir.path().join("Artist - Song.lrc");
        std::fs::write(&lyric, b"[00:01.00]caf\xe9 line\n[00:02.00]second")?;

        let acq = LyricsAcquisition::new(Arc::new(crate::fs::LocalFilesystem));
        let doc = acq.resolve_local(&track);
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.get(1).map(|l| l.text.as_str()), Some("second"));

        let err = acq.save(&track, &SongGuess::from_path(&track), LRC).err();
        assert!(matches!(err, Some(CoreError::PersistenceFailed { .. })));
        assert_eq!(std::fs::read(&lyric)?, b"[00:01.00]caf\xe9 line\n[00:02.00]second");
        Ok(())
    }
}
