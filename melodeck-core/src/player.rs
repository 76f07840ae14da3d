//! The player: a single task owning the playlist, lyric cursor and history.
//!
//! All state changes happen inside [`Player::run`], which multiplexes user
//! commands, transport notifications and lyric-fetch completions. Observers
//! follow along through a broadcast of [`PlayerEvent`]s.

use crate::acquisition::LyricsAcquisition;
use crate::cursor::{LineWindow, LyricCursor};
use crate::error::{CoreError, Result};
use crate::fs::Filesystem;
use crate::history::HistoryLedger;
use crate::lrc::LyricDocument;
use crate::playback::PlaybackStatus;
use crate::playlist::{Direction, PlayMode, PlaylistEngine, PlaylistSignal};
use crate::track::{TrackLocation, TrackRef};
use crate::transport::{
    clamp_playback_rate, MediaTransport, TransportErrorKind, TransportEvent, TransportState,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const LOG_TARGET: &str = "melodeck::player";

const EVENT_CHANNEL_CAPACITY: usize = 256;
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Requests accepted by the player
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    /// Add tracks to the end of the playlist
    Append(Vec<TrackRef>),
    /// Remove the track at an index
    Remove(usize),
    /// Empty the playlist
    Clear,
    /// Play the track at an index
    Select(usize),
    Previous,
    Next,
    SetMode(PlayMode),
    /// Pause when playing, otherwise (re)start playback
    TogglePause,
    Stop,
    Seek(Duration),
    SetPlaybackRate(f64),
    /// Play a file from history, adding it to the playlist if needed
    PlayFromHistory(PathBuf),
    RemoveFromHistory(PathBuf),
    ClearHistory,
}

/// State changes observers can react to
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// A track was loaded into the transport and started
    TrackActivated { index: usize, track: TrackRef },
    /// The playlist's contents or current index changed
    PlaylistChanged { len: usize, current: Option<usize> },
    ModeChanged(PlayMode),
    /// Playback stopped and no track is loaded
    Stopped,
    StateChanged(TransportState),
    PositionChanged(Duration),
    DurationChanged(Duration),
    PlaybackRateChanged(f64),
    /// A lyric document was adopted for the current track
    LyricsLoaded { lines: usize },
    /// The current track has no lyrics (yet)
    LyricsCleared,
    /// The active lyric line moved
    LyricLineChanged(LineWindow),
    HistoryUpdated,
    /// The transport reported a failure
    TransportError {
        kind: TransportErrorKind,
        message: String,
    },
    /// A command was refused as invalid
    CommandRejected { message: String },
}

/// Cloneable sender of commands into a running player
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    tx: mpsc::Sender<PlayerCommand>,
}

impl PlayerHandle {
    /// # Errors
    ///
    /// Returns [`CoreError::PlayerStopped`] if the player task has exited.
    pub async fn send(&self, command: PlayerCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| CoreError::PlayerStopped)
    }

    /// # Errors
    ///
    /// Returns [`CoreError::PlayerStopped`] if the player task has exited.
    pub async fn append(&self, tracks: Vec<TrackRef>) -> Result<()> {
        self.send(PlayerCommand::Append(tracks)).await
    }

    /// # Errors
    ///
    /// Returns [`CoreError::PlayerStopped`] if the player task has exited.
    pub async fn select(&self, index: usize) -> Result<()> {
        self.send(PlayerCommand::Select(index)).await
    }

    /// # Errors
    ///
    /// Returns [`CoreError::PlayerStopped`] if the player task has exited.
    pub async fn next(&self) -> Result<()> {
        self.send(PlayerCommand::Next).await
    }

    /// # Errors
    ///
    /// Returns [`CoreError::PlayerStopped`] if the player task has exited.
    pub async fn previous(&self) -> Result<()> {
        self.send(PlayerCommand::Previous).await
    }

    /// # Errors
    ///
    /// Returns [`CoreError::PlayerStopped`] if the player task has exited.
    pub async fn toggle_pause(&self) -> Result<()> {
        self.send(PlayerCommand::TogglePause).await
    }

    /// # Errors
    ///
    /// Returns [`CoreError::PlayerStopped`] if the player task has exited.
    pub async fn seek(&self, position: Duration) -> Result<()> {
        self.send(PlayerCommand::Seek(position)).await
    }

    /// # Errors
    ///
    /// Returns [`CoreError::PlayerStopped`] if the player task has exited.
    pub async fn set_mode(&self, mode: PlayMode) -> Result<()> {
        self.send(PlayerCommand::SetMode(mode)).await
    }
}

/// Result of a background lyric lookup, tagged with the activation it
/// belongs to
#[derive(Debug)]
struct FetchOutcome {
    generation: u64,
    location: TrackLocation,
    document: LyricDocument,
}

/// Orchestrates playlist, transport, lyrics and history
pub struct Player {
    transport: Box<dyn MediaTransport>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    playlist: PlaylistEngine,
    cursor: LyricCursor,
    history: Option<HistoryLedger>,
    acquisition: Arc<LyricsAcquisition>,
    fs: Arc<dyn Filesystem>,
    status: PlaybackStatus,
    /// Bumped on every activation and stop; stale fetches carry an old value
    generation: u64,
    event_tx: broadcast::Sender<PlayerEvent>,
    command_tx: mpsc::Sender<PlayerCommand>,
    command_rx: mpsc::Receiver<PlayerCommand>,
    fetch_tx: mpsc::UnboundedSender<FetchOutcome>,
    fetch_rx: mpsc::UnboundedReceiver<FetchOutcome>,
}

impl Player {
    /// Create a player driving `transport`, whose notifications arrive on
    /// `transport_rx`
    #[must_use]
    pub fn new(
        transport: Box<dyn MediaTransport>,
        transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
        acquisition: Arc<LyricsAcquisition>,
        fs: Arc<dyn Filesystem>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();

        Self {
            transport,
            transport_rx,
            playlist: PlaylistEngine::default(),
            cursor: LyricCursor::default(),
            history: None,
            acquisition,
            fs,
            status: PlaybackStatus::default(),
            generation: 0,
            event_tx,
            command_tx,
            command_rx,
            fetch_tx,
            fetch_rx,
        }
    }

    /// Record plays into `history`
    #[must_use]
    pub fn with_history(mut self, history: HistoryLedger) -> Self {
        self.history = Some(history);
        self
    }

    /// Replace the (empty) default playlist, e.g. to pick a mode or seed
    #[must_use]
    pub fn with_playlist(mut self, playlist: PlaylistEngine) -> Self {
        self.playlist = playlist;
        self
    }

    /// Initial playback rate; clamped into the supported range
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPlaybackRate`] for a non-finite rate.
    pub fn with_playback_rate(mut self, rate: f64) -> Result<Self> {
        self.status.rate = clamp_playback_rate(rate)?;
        Ok(self)
    }

    /// Subscribe to player events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.event_tx.subscribe()
    }

    #[must_use]
    pub fn handle(&self) -> PlayerHandle {
        PlayerHandle {
            tx: self.command_tx.clone(),
        }
    }

    #[must_use]
    pub const fn playlist(&self) -> &PlaylistEngine {
        &self.playlist
    }

    #[must_use]
    pub const fn cursor(&self) -> &LyricCursor {
        &self.cursor
    }

    #[must_use]
    pub const fn history(&self) -> Option<&HistoryLedger> {
        self.history.as_ref()
    }

    #[must_use]
    pub const fn status(&self) -> &PlaybackStatus {
        &self.status
    }

    /// Start the player in a background task
    #[must_use]
    pub fn start(self, cancel_token: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(cancel_token))
    }

    /// Run the player loop until cancelled
    pub async fn run(mut self, cancel_token: CancellationToken) {
        info!(target: LOG_TARGET, "Player started");

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!(target: LOG_TARGET, "Player shutting down");
                    break;
                }
                Some(command) = self.command_rx.recv() => {
                    if let Err(e) = self.handle_command(command) {
                        if e.is_invalid_argument() {
                            warn!(target: LOG_TARGET, "Command rejected: {}", e);
                        } else {
                            error!(target: LOG_TARGET, "Command failed: {}", e);
                        }
                        self.emit(PlayerEvent::CommandRejected { message: e.to_string() });
                    }
                }
                Some(event) = self.transport_rx.recv() => {
                    self.handle_transport_event(event);
                }
                Some(outcome) = self.fetch_rx.recv() => {
                    self.handle_fetch_outcome(outcome);
                }
            }
        }

        self.leave_current();
        self.transport.stop();
    }

    /// Apply one command
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error for out-of-range indices and
    /// non-finite playback rates. Nothing changes in that case.
    pub fn handle_command(&mut self, command: PlayerCommand) -> Result<()> {
        debug!(target: LOG_TARGET, "Command: {:?}", command);
        match command {
            PlayerCommand::Append(tracks) => {
                let fs = Arc::clone(&self.fs);
                let signal = self
                    .playlist
                    .append(tracks, self.status.is_playing(), |track| match &track.location {
                        TrackLocation::Local(path) => fs.exists(path),
                        TrackLocation::Remote(_) => true,
                    });
                self.emit_playlist_changed();
                if let Some(signal) = signal {
                    self.apply(signal);
                }
            }
            PlayerCommand::Remove(index) => {
                let (removed, signals) = self.playlist.remove_at(index, self.status.is_playing())?;
                debug!(target: LOG_TARGET, "Removed {} from playlist", removed.display_name);
                self.emit_playlist_changed();
                for signal in signals {
                    self.apply(signal);
                }
                self.unload_if_removed();
            }
            PlayerCommand::Clear => {
                let signal = self.playlist.clear();
                self.emit_playlist_changed();
                self.apply(signal);
                self.apply(PlaylistSignal::NoCurrentTrack);
            }
            PlayerCommand::Select(index) => {
                let signal = self.playlist.select(index)?;
                self.apply(signal);
            }
            PlayerCommand::Previous => self.advance(Direction::Previous),
            PlayerCommand::Next => self.advance(Direction::Next),
            PlayerCommand::SetMode(mode) => {
                self.playlist.set_mode(mode);
                info!(target: LOG_TARGET, "Play mode set to {}", mode);
                self.emit(PlayerEvent::ModeChanged(mode));
            }
            PlayerCommand::TogglePause => self.toggle_pause(),
            PlayerCommand::Stop => {
                self.apply(PlaylistSignal::Stop);
            }
            PlayerCommand::Seek(position) => self.seek(position),
            PlayerCommand::SetPlaybackRate(rate) => {
                let rate = clamp_playback_rate(rate)?;
                self.status.rate = rate;
                self.transport.set_playback_rate(rate);
                self.emit(PlayerEvent::PlaybackRateChanged(rate));
            }
            PlayerCommand::PlayFromHistory(path) => self.play_from_history(path)?,
            PlayerCommand::RemoveFromHistory(path) => {
                if let Some(history) = self.history.as_mut() {
                    if history.remove(&path).is_some() {
                        self.emit(PlayerEvent::HistoryUpdated);
                    }
                }
            }
            PlayerCommand::ClearHistory => {
                if let Some(history) = self.history.as_mut() {
                    history.clear();
                    self.emit(PlayerEvent::HistoryUpdated);
                }
            }
        }
        Ok(())
    }

    /// Apply one transport notification
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PositionChanged(position) => {
                self.status.set_position(position);
                self.emit(PlayerEvent::PositionChanged(position));
                self.resolve_lyric_line();
            }
            TransportEvent::DurationChanged(duration) => {
                self.status.duration = duration;
                self.emit(PlayerEvent::DurationChanged(duration));
                if !duration.is_zero() {
                    self.save_progress();
                }
            }
            TransportEvent::EndOfMedia => {
                debug!(target: LOG_TARGET, "End of media");
                self.leave_current();
                if let Some(signal) = self.playlist.on_track_end() {
                    self.apply(signal);
                }
            }
            TransportEvent::StateChanged(state) => {
                if self.status.state != state {
                    self.status.state = state;
                    self.emit(PlayerEvent::StateChanged(state));
                }
            }
            TransportEvent::Error { kind, message } => {
                error!(target: LOG_TARGET, "Transport {}: {}", kind, message);
                self.emit(PlayerEvent::TransportError { kind, message });
            }
        }
    }

    fn handle_fetch_outcome(&mut self, outcome: FetchOutcome) {
        let current = self.status.track.as_ref().map(|t| &t.location);
        if outcome.generation != self.generation || current != Some(&outcome.location) {
            debug!(
                target: LOG_TARGET,
                "Discarding lyrics for {} (track changed)", outcome.location
            );
            return;
        }

        if outcome.document.is_empty() {
            debug!(target: LOG_TARGET, "No lyrics found online for {}", outcome.location);
            return;
        }
        self.adopt_lyrics(outcome.document);
    }

    fn apply(&mut self, signal: PlaylistSignal) {
        match signal {
            PlaylistSignal::Play(index) => self.activate(index),
            PlaylistSignal::Restart(index) => {
                debug!(target: LOG_TARGET, "Restarting track {}", index);
                self.transport.seek(Duration::ZERO);
                self.transport.play();
                self.status.set_position(Duration::ZERO);
                self.status.state = TransportState::Playing;
                self.resolve_lyric_line();
            }
            PlaylistSignal::Stop => {
                self.leave_current();
                self.transport.stop();
                self.generation += 1;
                self.status.state = TransportState::Stopped;
                self.status.set_position(Duration::ZERO);
                self.emit(PlayerEvent::StateChanged(TransportState::Stopped));
            }
            PlaylistSignal::NoCurrentTrack => {
                self.status.track = None;
                self.status.duration = Duration::ZERO;
                self.clear_lyrics();
                self.emit(PlayerEvent::Stopped);
            }
        }
    }

    fn advance(&mut self, direction: Direction) {
        if let Some(signal) = self.playlist.advance(direction) {
            self.apply(signal);
        }
    }

    /// Load and start the track at `index`, then resolve its lyrics
    fn activate(&mut self, index: usize) {
        let Some(track) = self.playlist.get(index).cloned() else {
            return;
        };
        self.leave_current();
        self.generation += 1;

        info!(target: LOG_TARGET, "Playing [{}] {}", index, track.display_name);
        self.status = PlaybackStatus {
            track: Some(track.clone()),
            rate: self.status.rate,
            ..PlaybackStatus::default()
        };
        self.emit(PlayerEvent::PlaylistChanged {
            len: self.playlist.len(),
            current: Some(index),
        });

        if let Err(e) = self.transport.load(&track.location) {
            error!(target: LOG_TARGET, "Failed to load {}: {}", track.location, e);
            self.emit(PlayerEvent::TransportError {
                kind: TransportErrorKind::Access,
                message: e.to_string(),
            });
            self.status.track = None;
            self.clear_lyrics();
            return;
        }
        self.transport.set_playback_rate(self.status.rate);
        self.transport.play();
        self.status.state = TransportState::Playing;
        self.emit(PlayerEvent::TrackActivated {
            index,
            track: track.clone(),
        });

        self.record_play(&track);
        self.load_lyrics(&track);
    }

    /// Forget a stopped track that is no longer the playlist's current one,
    /// so the next toggle loads the new current track
    fn unload_if_removed(&mut self) {
        let loaded = self.status.track.as_ref().map(|t| &t.location);
        let current = self.playlist.current_track().map(|t| &t.location);
        if loaded.is_none() || loaded == current {
            return;
        }
        self.status.track = None;
        self.status.duration = Duration::ZERO;
        self.clear_lyrics();
    }

    fn toggle_pause(&mut self) {
        if self.status.track.is_none() {
            if let Some(index) = self.playlist.current_index() {
                self.activate(index);
            }
            return;
        }

        if self.status.is_playing() {
            self.transport.pause();
            self.status.state = TransportState::Paused;
        } else {
            self.transport.play();
            self.status.state = TransportState::Playing;
        }
        self.emit(PlayerEvent::StateChanged(self.status.state));
    }

    fn seek(&mut self, position: Duration) {
        if self.status.track.is_none() {
            return;
        }
        self.transport.seek(position);
        self.status.set_position(position);
        self.emit(PlayerEvent::PositionChanged(position));
        self.resolve_lyric_line();
    }

    fn play_from_history(&mut self, path: PathBuf) -> Result<()> {
        if !self.fs.exists(&path) {
            warn!(target: LOG_TARGET, "History entry {:?} no longer exists", path);
            return Ok(());
        }

        let location = TrackLocation::Local(path.clone());
        let index = if let Some(index) = self.playlist.position_of(&location) {
            index
        } else {
            // Appending as if playing keeps the engine from auto-starting index 0
            self.playlist.append([TrackRef::local(path)], true, |_| true);
            self.emit_playlist_changed();
            self.playlist.len().saturating_sub(1)
        };

        let signal = self.playlist.select(index)?;
        self.apply(signal);
        Ok(())
    }

    fn load_lyrics(&mut self, track: &TrackRef) {
        let Some(path) = track.local_path() else {
            self.clear_lyrics();
            return;
        };

        let document = self.acquisition.resolve_local(path);
        if !document.is_empty() {
            self.adopt_lyrics(document);
            return;
        }

        self.clear_lyrics();
        if !self.acquisition.can_fetch() {
            return;
        }

        let acquisition = Arc::clone(&self.acquisition);
        let fetch_tx = self.fetch_tx.clone();
        let generation = self.generation;
        let location = track.location.clone();
        let path = path.to_path_buf();
        debug!(target: LOG_TARGET, "Fetching lyrics online for {:?}", path);
        tokio::spawn(async move {
            let document = acquisition.acquire_remote(&path).await;
            let _ = fetch_tx.send(FetchOutcome {
                generation,
                location,
                document,
            });
        });
    }

    fn adopt_lyrics(&mut self, document: LyricDocument) {
        info!(target: LOG_TARGET, "Loaded {} lyric lines", document.len());
        let lines = document.len();
        self.cursor.set_document(Arc::new(document));
        self.emit(PlayerEvent::LyricsLoaded { lines });
        self.resolve_lyric_line();
    }

    fn clear_lyrics(&mut self) {
        self.cursor.clear();
        self.emit(PlayerEvent::LyricsCleared);
    }

    fn resolve_lyric_line(&mut self) {
        if let Some(window) = self.cursor.resolve(self.status.position) {
            self.emit(PlayerEvent::LyricLineChanged(window));
        }
    }

    fn record_play(&mut self, track: &TrackRef) {
        let (Some(history), Some(path)) = (self.history.as_mut(), track.local_path()) else {
            return;
        };
        if history.record_play(path, track.kind, Duration::ZERO, Duration::ZERO) {
            self.emit(PlayerEvent::HistoryUpdated);
        }
    }

    /// Remember where the loaded track was left
    fn leave_current(&mut self) {
        self.save_progress();
    }

    fn save_progress(&mut self) {
        let Some(path) = self.status.track.as_ref().and_then(TrackRef::local_path) else {
            return;
        };
        if let Some(history) = self.history.as_mut() {
            history.update_progress(path, self.status.position, self.status.duration);
        }
    }

    fn emit_playlist_changed(&self) {
        self.emit(PlayerEvent::PlaylistChanged {
            len: self.playlist.len(),
            current: self.playlist.current_index(),
        });
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFilesystem;
    use crate::provider::{FetchedLyrics, LyricsProvider, LyricsQuery};
    use crate::track::MediaKind;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::{Mutex, PoisonError};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Load(String),
        Play,
        Pause,
        Stop,
        Seek(Duration),
        Rate(f64),
    }

    #[derive(Clone, Default)]
    struct RecordingTransport {
        calls: Arc<Mutex<Vec<Call>>>,
        reject: Option<String>,
    }

    impl RecordingTransport {
        fn push(&self, call: Call) {
            self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
        }

        fn take(&self) -> Vec<Call> {
            std::mem::take(&mut *self.calls.lock().unwrap_or_else(PoisonError::into_inner))
        }
    }

    impl MediaTransport for RecordingTransport {
        fn load(&mut self, source: &TrackLocation) -> Result<()> {
            if self.reject.as_deref() == Some(source.to_string().as_str()) {
                return Err(CoreError::IoError(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "unreadable",
                )));
            }
            self.push(Call::Load(source.to_string()));
            Ok(())
        }
        fn play(&mut self) {
            self.push(Call::Play);
        }
        fn pause(&mut self) {
            self.push(Call::Pause);
        }
        fn stop(&mut self) {
            self.push(Call::Stop);
        }
        fn seek(&mut self, position: Duration) {
            self.push(Call::Seek(position));
        }
        fn set_playback_rate(&mut self, rate: f64) {
            self.push(Call::Rate(rate));
        }
    }

    struct FixedProvider(&'static str);

    #[async_trait]
    impl LyricsProvider for FixedProvider {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn fetch(&self, _query: &LyricsQuery) -> Result<FetchedLyrics> {
            Ok(FetchedLyrics {
                lrc: self.0.to_string(),
                provider_id: "1".to_string(),
            })
        }
    }

    struct Fixture {
        player: Player,
        transport: RecordingTransport,
        fs: Arc<MemoryFilesystem>,
        events: broadcast::Receiver<PlayerEvent>,
    }

    impl Fixture {
        fn new(files: &[&str], provider: Option<&'static str>) -> Self {
            Self::with_transport(files, provider, RecordingTransport::default())
        }

        fn with_transport(
            files: &[&str],
            provider: Option<&'static str>,
            transport: RecordingTransport,
        ) -> Self {
            let fs = Arc::new(MemoryFilesystem::new());
            for file in files {
                fs.insert(*file, "");
            }
            let dyn_fs: Arc<dyn Filesystem> = Arc::clone(&fs) as Arc<dyn Filesystem>;

            let mut acquisition = LyricsAcquisition::new(Arc::clone(&dyn_fs));
            if let Some(lrc) = provider {
                acquisition = acquisition.with_provider(Arc::new(FixedProvider(lrc)));
            }

            let (_transport_tx, transport_rx) = mpsc::unbounded_channel();
            let history = HistoryLedger::new("/cfg/play_history.json", Arc::clone(&dyn_fs), 100);
            let player = Player::new(
                Box::new(transport.clone()),
                transport_rx,
                Arc::new(acquisition),
                dyn_fs,
            )
            .with_history(history)
            .with_playlist(PlaylistEngine::with_seed(PlayMode::ListLoop, 3));
            let events = player.subscribe();

            Self {
                player,
                transport,
                fs,
                events,
            }
        }

        fn command(&mut self, command: PlayerCommand) {
            if let Err(e) = self.player.handle_command(command) {
                unreachable!("command failed: {e}");
            }
        }

        fn drain_events(&mut self) -> Vec<PlayerEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn tracks(paths: &[&str]) -> Vec<TrackRef> {
        paths.iter().map(|p| TrackRef::local(*p)).collect()
    }

    const ABC: [&str; 3] = ["/m/a.mp3", "/m/b.mp3", "/m/c.mp3"];

    #[tokio::test]
    async fn test_append_to_empty_playlist_starts_playback() {
        let mut fx = Fixture::new(&ABC, None);
        fx.command(PlayerCommand::Append(tracks(&ABC)));

        assert_eq!(
            fx.transport.take(),
            vec![Call::Load("/m/a.mp3".into()), Call::Rate(1.0), Call::Play]
        );
        assert!(fx.player.status().is_playing());
        assert_eq!(fx.player.playlist().current_index(), Some(0));

        let events = fx.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            PlayerEvent::TrackActivated { index: 0, track } if track.display_name == "a.mp3"
        )));
        assert!(events.contains(&PlayerEvent::HistoryUpdated));

        let history = fx.player.history().map(HistoryLedger::len);
        assert_eq!(history, Some(1));
    }

    #[tokio::test]
    async fn test_append_skips_missing_files() {
        let mut fx = Fixture::new(&["/m/b.mp3"], None);
        fx.command(PlayerCommand::Append(tracks(&["/m/missing.mp3", "/m/b.mp3"])));
        assert_eq!(fx.player.playlist().len(), 1);
        assert_eq!(fx.transport.take().first(), Some(&Call::Load("/m/b.mp3".into())));
    }

    #[tokio::test]
    async fn test_local_lyrics_follow_position() {
        let mut fx = Fixture::new(&ABC, None);
        fx.fs.insert("/m/a.lrc", "[00:01.00]one\n[00:03.00]two");
        fx.command(PlayerCommand::Append(tracks(&ABC)));
        assert_eq!(fx.player.cursor().document().len(), 2);
        fx.drain_events();

        fx.player
            .handle_transport_event(TransportEvent::PositionChanged(Duration::from_millis(1_500)));
        fx.player
            .handle_transport_event(TransportEvent::PositionChanged(Duration::from_millis(1_700)));
        fx.player
            .handle_transport_event(TransportEvent::PositionChanged(Duration::from_millis(3_000)));

        let lines: Vec<_> = fx
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                PlayerEvent::LyricLineChanged(window) => window.current.map(|l| l.text),
                _ => None,
            })
            .collect();
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn test_seek_backward_re_resolves_line() {
        let mut fx = Fixture::new(&ABC, None);
        fx.fs.insert("/m/a.lrc", "[00:01.00]one\n[00:03.00]two");
        fx.command(PlayerCommand::Append(tracks(&ABC)));
        fx.player
            .handle_transport_event(TransportEvent::PositionChanged(Duration::from_secs(4)));
        fx.drain_events();

        fx.command(PlayerCommand::Seek(Duration::from_millis(500)));
        assert!(fx.transport.take().contains(&Call::Seek(Duration::from_millis(500))));
        let events = fx.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, PlayerEvent::LyricLineChanged(w) if w.is_idle())));
    }

    #[tokio::test]
    async fn test_missing_lyrics_are_fetched_and_saved() {
        let mut fx = Fixture::new(&["/m/Artist - Song.mp3"], Some("[00:01.00]fetched"));
        fx.command(PlayerCommand::Append(tracks(&["/m/Artist - Song.mp3"])));
        assert!(fx.player.cursor().document().is_empty());
        assert!(fx.drain_events().contains(&PlayerEvent::LyricsCleared));

        let outcome = fx.player.fetch_rx.recv().await;
        assert!(outcome.is_some());
        if let Some(outcome) = outcome {
            fx.player.handle_fetch_outcome(outcome);
        }

        assert_eq!(fx.player.cursor().document().len(), 1);
        assert!(fx.fs.exists(Path::new("/m/Artist - Song.lrc")));
        assert!(fx
            .drain_events()
            .contains(&PlayerEvent::LyricsLoaded { lines: 1 }));
    }

    #[tokio::test]
    async fn test_stale_fetch_result_is_discarded() {
        let mut fx = Fixture::new(&["/m/a.mp3", "/m/b.mp3"], Some("[00:01.00]for a"));
        fx.fs.insert("/m/b.lrc", "[00:01.00]b one\n[00:02.00]b two");
        fx.command(PlayerCommand::Append(tracks(&["/m/a.mp3", "/m/b.mp3"])));

        // Switch tracks before the fetch for a.mp3 is handled
        fx.command(PlayerCommand::Select(1));
        assert_eq!(fx.player.cursor().document().len(), 2);

        let outcome = fx.player.fetch_rx.recv().await;
        if let Some(outcome) = outcome {
            fx.player.handle_fetch_outcome(outcome);
        }
        let texts: Vec<_> = fx
            .player
            .cursor()
            .document()
            .lines()
            .iter()
            .map(|l| l.text.clone())
            .collect();
        assert_eq!(texts, vec!["b one".to_string(), "b two".to_string()]);
    }

    #[tokio::test]
    async fn test_end_of_media_advances_in_list_loop() {
        let mut fx = Fixture::new(&ABC, None);
        fx.command(PlayerCommand::Append(tracks(&ABC)));

        let mut seen = Vec::new();
        for _ in 0..3 {
            fx.player.handle_transport_event(TransportEvent::EndOfMedia);
            seen.push(fx.player.playlist().current_index());
        }
        assert_eq!(seen, vec![Some(1), Some(2), Some(0)]);
    }

    #[tokio::test]
    async fn test_end_of_media_restarts_in_single_loop() {
        let mut fx = Fixture::new(&ABC, None);
        fx.command(PlayerCommand::Append(tracks(&ABC)));
        fx.command(PlayerCommand::SetMode(PlayMode::SingleLoop));
        fx.transport.take();

        fx.player.handle_transport_event(TransportEvent::EndOfMedia);
        assert_eq!(fx.transport.take(), vec![Call::Seek(Duration::ZERO), Call::Play]);
        assert_eq!(fx.player.playlist().current_index(), Some(0));
        assert_eq!(fx.player.history().map(|h| h.all()[0].play_count), Some(1));
    }

    #[tokio::test]
    async fn test_remove_playing_track_moves_to_successor() {
        let files = ["/m/a.mp3", "/m/b.mp3", "/m/c.mp3", "/m/d.mp3"];
        let mut fx = Fixture::new(&files, None);
        fx.command(PlayerCommand::Append(tracks(&files)));
        fx.command(PlayerCommand::Select(1));
        fx.transport.take();

        fx.command(PlayerCommand::Remove(1));
        let calls = fx.transport.take();
        assert_eq!(calls[0], Call::Stop);
        assert_eq!(calls[1], Call::Load("/m/c.mp3".into()));
        assert_eq!(fx.player.playlist().current_index(), Some(1));
    }

    #[tokio::test]
    async fn test_remove_paused_track_does_not_resume() {
        let mut fx = Fixture::new(&ABC, None);
        fx.command(PlayerCommand::Append(tracks(&ABC)));
        fx.command(PlayerCommand::TogglePause);
        fx.transport.take();

        fx.command(PlayerCommand::Remove(0));
        assert_eq!(fx.transport.take(), vec![Call::Stop]);
    }

    #[tokio::test]
    async fn test_toggle_after_removing_paused_track_loads_new_current() {
        let mut fx = Fixture::new(&ABC, None);
        fx.fs.insert("/m/b.lrc", "[00:01.00]b line");
        fx.command(PlayerCommand::Append(tracks(&ABC)));
        fx.command(PlayerCommand::Select(1));
        fx.command(PlayerCommand::TogglePause);
        assert_eq!(fx.player.cursor().document().len(), 1);
        fx.transport.take();
        fx.drain_events();

        fx.command(PlayerCommand::Remove(1));
        assert_eq!(fx.transport.take(), vec![Call::Stop]);
        assert!(fx.player.status().track.is_none());
        assert!(fx.player.cursor().document().is_empty());
        assert!(fx.drain_events().contains(&PlayerEvent::LyricsCleared));

        fx.command(PlayerCommand::TogglePause);
        let calls = fx.transport.take();
        assert_eq!(calls.first(), Some(&Call::Load("/m/c.mp3".to_string())));
        assert!(calls.contains(&Call::Play));
        assert_eq!(fx.player.playlist().current_index(), Some(1));
        assert_eq!(
            fx.player.status().track.as_ref().map(|t| t.display_name.as_str()),
            Some("c.mp3")
        );
    }

    #[tokio::test]
    async fn test_clear_stops_and_forgets_track() {
        let mut fx = Fixture::new(&ABC, None);
        fx.command(PlayerCommand::Append(tracks(&ABC)));
        fx.drain_events();

        fx.command(PlayerCommand::Clear);
        assert!(fx.player.playlist().is_empty());
        assert!(fx.player.status().track.is_none());
        assert!(fx.drain_events().contains(&PlayerEvent::Stopped));
    }

    #[tokio::test]
    async fn test_invalid_commands_are_rejected_without_side_effects() {
        let mut fx = Fixture::new(&ABC, None);
        fx.command(PlayerCommand::Append(tracks(&ABC)));
        fx.transport.take();

        let err = fx.player.handle_command(PlayerCommand::Select(9)).err();
        assert!(err.is_some_and(|e| e.is_invalid_argument()));
        let err = fx.player.handle_command(PlayerCommand::SetPlaybackRate(f64::NAN)).err();
        assert!(err.is_some_and(|e| e.is_invalid_argument()));
        assert!(fx.transport.take().is_empty());
        assert_eq!(fx.player.playlist().current_index(), Some(0));
    }

    #[tokio::test]
    async fn test_playback_rate_is_clamped() {
        let mut fx = Fixture::new(&ABC, None);
        fx.command(PlayerCommand::SetPlaybackRate(8.0));
        assert_eq!(fx.transport.take(), vec![Call::Rate(4.0)]);
        assert!(fx
            .drain_events()
            .contains(&PlayerEvent::PlaybackRateChanged(4.0)));
    }

    #[tokio::test]
    async fn test_transport_error_keeps_state_and_allows_advance() {
        let transport = RecordingTransport {
            reject: Some("/m/b.mp3".to_string()),
            ..RecordingTransport::default()
        };
        let mut fx = Fixture::with_transport(&ABC, None, transport);
        fx.command(PlayerCommand::Append(tracks(&ABC)));
        fx.player.handle_transport_event(TransportEvent::Error {
            kind: TransportErrorKind::Decode,
            message: "bad frame".to_string(),
        });
        assert_eq!(fx.player.playlist().len(), 3);

        fx.command(PlayerCommand::Next);
        assert!(fx
            .drain_events()
            .iter()
            .any(|e| matches!(e, PlayerEvent::TransportError { kind: TransportErrorKind::Access, .. })));

        fx.command(PlayerCommand::Next);
        assert_eq!(fx.player.playlist().current_index(), Some(2));
        assert!(fx.transport.take().contains(&Call::Load("/m/c.mp3".into())));
    }

    #[tokio::test]
    async fn test_play_from_history_appends_and_selects() {
        let mut fx = Fixture::new(&["/m/a.mp3", "/m/old.mkv"], None);
        fx.command(PlayerCommand::Append(tracks(&["/m/a.mp3"])));
        fx.transport.take();

        fx.command(PlayerCommand::PlayFromHistory(PathBuf::from("/m/old.mkv")));
        assert_eq!(fx.player.playlist().len(), 2);
        assert_eq!(fx.player.playlist().current_index(), Some(1));
        assert_eq!(fx.transport.take().first(), Some(&Call::Load("/m/old.mkv".into())));

        let kinds = fx.player.history().map(|h| h.all()[0].kind);
        assert_eq!(kinds, Some(MediaKind::Video));

        // Already in the playlist: no duplicate
        fx.command(PlayerCommand::PlayFromHistory(PathBuf::from("/m/a.mp3")));
        assert_eq!(fx.player.playlist().len(), 2);
        assert_eq!(fx.player.playlist().current_index(), Some(0));
    }

    #[tokio::test]
    async fn test_leaving_a_track_saves_progress() {
        let mut fx = Fixture::new(&ABC, None);
        fx.command(PlayerCommand::Append(tracks(&ABC)));
        fx.player
            .handle_transport_event(TransportEvent::DurationChanged(Duration::from_secs(200)));
        fx.player
            .handle_transport_event(TransportEvent::PositionChanged(Duration::from_secs(42)));
        fx.command(PlayerCommand::Next);

        let item = fx.player.history().and_then(|h| h.get(Path::new("/m/a.mp3")));
        assert!(item.is_some_and(|i| i.last_position() == Duration::from_secs(42)
            && i.duration() == Duration::from_secs(200)));
    }

    #[tokio::test]
    async fn test_run_loop_processes_handle_commands() {
        let fx = Fixture::new(&ABC, None);
        let mut events = fx.player.subscribe();
        let handle = fx.player.handle();
        let cancel = CancellationToken::new();
        let task = fx.player.start(cancel.clone());

        assert!(handle.append(tracks(&ABC)).await.is_ok());
        assert!(handle.select(5).await.is_ok());

        let mut activated = false;
        let mut rejected = false;
        while !(activated && rejected) {
            match events.recv().await {
                Ok(PlayerEvent::TrackActivated { index: 0, .. }) => activated = true,
                Ok(PlayerEvent::CommandRejected { .. }) => rejected = true,
                Ok(_) => {}
                Err(e) => unreachable!("event stream ended: {e}"),
            }
        }

        cancel.cancel();
        assert!(task.await.is_ok());
        assert!(fx.transport.take().contains(&Call::Stop));
        assert!(handle.next().await.is_err());
    }
}
