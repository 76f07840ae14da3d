mod clock;
mod control;

use crate::clock::ClockTransport;
use clap::{Parser, Subcommand, ValueEnum};
use melodeck_core::config::LyricsProviderType;
use melodeck_core::{
    paths, CoreError, DurationExt, Filesystem, HistoryLedger, HttpFetcher, LocalFilesystem,
    LyricCursor, LyricDocument, LyricsAcquisition, LyricsProvider, MediaKind, MelodeckConfig,
    NetworkFetch, PlayMode, Player, PlayerEvent, PlaylistEngine, Result, TrackRef,
};
use melodeck_lyrics_netease::NeteaseProvider;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Blocking stdin reads are abandoned after this long on exit
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(200);

/// What the history listing shows when no count is given
const HISTORY_LIST_LEN: usize = 50;

#[derive(Debug, Parser)]
#[command(
    name = "melodeck",
    version,
    about = "Headless media player with synchronized LRC lyrics and play history"
)]
struct Cli {
    /// Override config file path.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the timed lines of an LRC file.
    Lyrics {
        file: PathBuf,
        /// Show the lines around this position (seconds) instead.
        #[arg(long, value_parser = parse_seconds)]
        at: Option<Duration>,
        /// Print the document back out as canonical LRC.
        #[arg(long, conflicts_with = "at")]
        normalize: bool,
    },
    /// List or edit the play history.
    History {
        /// Only show entries of this kind.
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
        /// Number of entries to show, most recent first.
        #[arg(long, default_value_t = HISTORY_LIST_LEN)]
        recent: usize,

        #[command(subcommand)]
        action: Option<HistoryAction>,
    },
    /// Find lyrics for a track, downloading them if none are stored locally.
    FetchLyrics { track: PathBuf },
    /// Search for playable songs online.
    Search {
        keyword: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Play files or stream URLs against a simulated clock.
    Play {
        #[arg(required = true)]
        tracks: Vec<String>,
        /// Play mode (defaults to the configured one).
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        /// Playback rate (defaults to the configured one).
        #[arg(long)]
        rate: Option<f64>,
        /// Simulated length of every track, in seconds.
        #[arg(long, value_parser = parse_seconds, default_value = "30")]
        track_length: Duration,
    },
}

#[derive(Debug, Subcommand)]
enum HistoryAction {
    /// Forget one file.
    Remove { path: PathBuf },
    /// Forget everything.
    Clear,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Audio,
    Video,
}

impl From<KindArg> for MediaKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Audio => Self::Audio,
            KindArg::Video => Self::Video,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    SingleLoop,
    Random,
    ListLoop,
}

impl From<ModeArg> for PlayMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::SingleLoop => Self::SingleLoop,
            ModeArg::Random => Self::Random,
            ModeArg::ListLoop => Self::ListLoop,
        }
    }
}

fn parse_seconds(value: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("`{value}` is not a number of seconds"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("`{value}`: {e}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(paths::config_path);

    // Check config for logging.enabled before full config load
    init_tracing(check_file_logging_enabled(&config_path));

    let config = match MelodeckConfig::load_or_create_at(&config_path) {
        Ok(config) => config,
        Err(CoreError::ConfigNotFound { path }) => {
            info!("Created a configuration template at {}", path.display());
            MelodeckConfig::default()
        }
        Err(CoreError::ConfigParseError(parse_error)) => {
            error!(
                "Config file {} has a syntax error: {parse_error}",
                config_path.display()
            );
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cli.command, config));
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: MelodeckConfig) -> Result<()> {
    match command {
        Command::Lyrics {
            file,
            at,
            normalize,
        } => show_lyrics(&file, at, normalize),
        Command::History {
            kind,
            recent,
            action,
        } => {
            edit_history(&config, kind.map(MediaKind::from), recent, action);
            Ok(())
        }
        Command::FetchLyrics { track } => fetch_lyrics(&config, &track).await,
        Command::Search { keyword, limit } => search(&config, &keyword, limit).await,
        Command::Play {
            tracks,
            mode,
            rate,
            track_length,
        } => play(&config, &tracks, mode.map(PlayMode::from), rate, track_length).await,
    }
}

fn show_lyrics(file: &Path, at: Option<Duration>, normalize: bool) -> Result<()> {
    let text = std::fs::read_to_string(file)?;
    let document = LyricDocument::parse(&text);

    if document.is_empty() {
        println!("No timed lyrics in {}", file.display());
        return Ok(());
    }

    if normalize {
        print!("{}", document.to_lrc());
        return Ok(());
    }

    let Some(position) = at else {
        for line in document.lines() {
            println!("[{}] {}", line.start_time.to_clock(), line.text);
        }
        return Ok(());
    };

    let window = LyricCursor::new(Arc::new(document)).window_at(position);
    if window.is_idle() {
        println!("{}: before the first line", position.to_clock());
        return Ok(());
    }
    for (marker, line) in [
        ("  ", window.previous),
        ("> ", window.current),
        ("  ", window.next),
    ] {
        if let Some(line) = line {
            println!("{marker}[{}] {}", line.start_time.to_clock(), line.text);
        }
    }
    Ok(())
}

fn edit_history(
    config: &MelodeckConfig,
    kind: Option<MediaKind>,
    recent: usize,
    action: Option<HistoryAction>,
) {
    let fs: Arc<dyn Filesystem> = Arc::new(LocalFilesystem);
    let mut ledger = HistoryLedger::load(paths::history_path(), fs, config.history.max_entries);

    match action {
        Some(HistoryAction::Remove { path }) => match ledger.remove(&path) {
            Some(item) => println!("Removed {}", item.display_name()),
            None => println!("{} is not in the history", path.display()),
        },
        Some(HistoryAction::Clear) => {
            ledger.clear();
            println!("History cleared");
        }
        None => {
            let items: Vec<_> = match kind {
                Some(kind) => ledger.by_kind(kind).into_iter().take(recent).collect(),
                None => ledger.recent(recent).iter().collect(),
            };
            if items.is_empty() {
                println!("No play history");
            }
            for item in items {
                println!(
                    "{}  {:>3}x  {}/{}  {}",
                    item.last_play_time
                        .with_timezone(&chrono::Local)
                        .format("%Y-%m-%d %H:%M"),
                    item.play_count,
                    item.last_position().to_clock(),
                    item.duration().to_clock(),
                    item.display_name(),
                );
            }
        }
    }
}

async fn fetch_lyrics(config: &MelodeckConfig, track: &Path) -> Result<()> {
    let acquisition = create_acquisition(config, Arc::new(LocalFilesystem))?;

    let mut document = acquisition.resolve_local(track);
    if document.is_empty() {
        if !acquisition.can_fetch() {
            println!("No local lyrics for {} and online fetch is disabled", track.display());
            return Ok(());
        }
        info!("No local lyrics for {}, searching online", track.display());
        document = acquisition.acquire_remote(track).await;
    }

    if document.is_empty() {
        println!("No lyrics found for {}", track.display());
        return Ok(());
    }

    if let Some(path) = acquisition.find_local(track) {
        info!("Lyrics stored at {}", path.display());
    }
    print!("{}", document.to_lrc());
    Ok(())
}

async fn search(config: &MelodeckConfig, keyword: &str, limit: usize) -> Result<()> {
    let fetch: Arc<dyn NetworkFetch> = Arc::new(HttpFetcher::new()?);
    let provider = create_netease_provider(config, fetch);

    let songs = provider.search_songs(keyword, limit).await?;
    if songs.is_empty() {
        println!("No playable songs found for \"{keyword}\"");
    }
    for song in songs {
        println!(
            "{}  {} - {}  [{}]\n       {}",
            song.duration.to_clock(),
            song.artist,
            song.name,
            song.album,
            song.url
        );
    }
    Ok(())
}

async fn play(
    config: &MelodeckConfig,
    tracks: &[String],
    mode: Option<PlayMode>,
    rate: Option<f64>,
    track_length: Duration,
) -> Result<()> {
    let fs: Arc<dyn Filesystem> = Arc::new(LocalFilesystem);

    let tracks: Vec<TrackRef> = tracks
        .iter()
        .filter_map(|arg| {
            let track = track_from_arg(arg);
            match track.local_path() {
                Some(path) if !fs.exists(path) => {
                    warn!("Skipping {}: file not found", path.display());
                    None
                }
                _ => Some(track),
            }
        })
        .collect();
    if tracks.is_empty() {
        println!("Nothing to play");
        return Ok(());
    }

    let acquisition = Arc::new(create_acquisition(config, Arc::clone(&fs))?);

    // Create shared cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();
    let ctrlc_token = cancel_token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, shutting down gracefully...");
        ctrlc_token.cancel();
    }) {
        error!("Failed to set Ctrl+C handler: {}", e);
    }

    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let transport = ClockTransport::start(
        Arc::clone(&fs),
        transport_tx,
        track_length,
        cancel_token.clone(),
    );

    let mode = mode.unwrap_or(config.playback.mode);
    let mut player = Player::new(Box::new(transport), transport_rx, acquisition, Arc::clone(&fs))
        .with_playlist(PlaylistEngine::new(mode))
        .with_playback_rate(rate.unwrap_or(config.playback.playback_rate))?;
    if config.history.enabled {
        player = player.with_history(HistoryLedger::load(
            paths::history_path(),
            Arc::clone(&fs),
            config.history.max_entries,
        ));
    }

    let events = player.subscribe();
    let handle = player.handle();
    info!("Playing {} track(s) in {} mode", tracks.len(), mode);

    let player_task = player.start(cancel_token.clone());
    let logger = tokio::spawn(log_player_events(events));
    tokio::spawn(control::read_controls(handle.clone(), cancel_token.clone()));
    println!("{}", control::HELP);

    handle.append(tracks).await?;

    let _ = player_task.await;
    let _ = logger.await;
    Ok(())
}

/// `http(s)://` arguments are streams, everything else a local path
fn track_from_arg(arg: &str) -> TrackRef {
    if arg.starts_with("http://") || arg.starts_with("https://") {
        let name = arg.rsplit('/').next().unwrap_or(arg);
        TrackRef::remote(arg, name)
    } else {
        TrackRef::local(arg)
    }
}

fn create_acquisition(
    config: &MelodeckConfig,
    fs: Arc<dyn Filesystem>,
) -> Result<LyricsAcquisition> {
    let mut acquisition = LyricsAcquisition::new(fs)
        .with_subdirectories(config.lyrics.subdirectories.clone())
        .with_online_fetch(config.lyrics.online_fetch);

    if config.lyrics.online_fetch {
        let fetch: Arc<dyn NetworkFetch> = Arc::new(HttpFetcher::new()?);
        let providers = create_providers(config, &fetch);
        let provider_names: Vec<_> = providers.iter().map(|p| p.name()).collect();
        info!(
            "Initialized {} lyrics provider(s): {:?}",
            providers.len(),
            provider_names
        );
        for provider in providers {
            acquisition = acquisition.with_provider(provider);
        }
    }
    Ok(acquisition)
}

fn create_providers(
    config: &MelodeckConfig,
    fetch: &Arc<dyn NetworkFetch>,
) -> Vec<Arc<dyn LyricsProvider>> {
    config
        .lyrics
        .providers
        .iter()
        .map(|provider_type| -> Arc<dyn LyricsProvider> {
            match provider_type {
                LyricsProviderType::Netease => {
                    Arc::new(create_netease_provider(config, Arc::clone(fetch)))
                }
            }
        })
        .collect()
}

fn create_netease_provider(config: &MelodeckConfig, fetch: Arc<dyn NetworkFetch>) -> NeteaseProvider {
    NeteaseProvider::new(fetch)
        .with_base_url(config.lyrics.api_base_url.as_str())
        .with_timeout(config.lyrics.request_timeout())
}

/// Log player events; lyric lines go to stdout as they become active
async fn log_player_events(mut rx: broadcast::Receiver<PlayerEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match event {
                PlayerEvent::TrackActivated { index, track } => {
                    info!("Now playing [{}] {}", index, track.display_name);
                }
                PlayerEvent::PlaylistChanged { len, current } => {
                    info!("Playlist: {} track(s), current {:?}", len, current);
                }
                PlayerEvent::ModeChanged(mode) => info!("Play mode: {}", mode),
                PlayerEvent::Stopped => info!("Playback stopped"),
                PlayerEvent::StateChanged(state) => info!("State: {:?}", state),
                PlayerEvent::DurationChanged(duration) => {
                    info!("Duration: {}", duration.to_clock());
                }
                PlayerEvent::PlaybackRateChanged(rate) => info!("Playback rate: {}x", rate),
                PlayerEvent::LyricsLoaded { lines } => info!("Lyrics loaded: {} lines", lines),
                PlayerEvent::LyricsCleared => info!("No lyrics for current track"),
                PlayerEvent::LyricLineChanged(window) => {
                    if let Some(line) = window.current {
                        println!("[{}] {}", line.start_time.to_clock(), line.text);
                    }
                }
                PlayerEvent::PositionChanged(_) | PlayerEvent::HistoryUpdated => {}
                PlayerEvent::TransportError { kind, message } => {
                    error!("Playback {}: {}", kind, message);
                }
                PlayerEvent::CommandRejected { message } => warn!("{}", message),
            },
            Err(broadcast::error::RecvError::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                info!("Missed {} player events", n);
            }
        }
    }
}

/// Check if file logging is enabled by reading the config file.
/// This is done before full config loading to set up tracing first.
/// Returns `false` if config doesn't exist or can't be parsed.
fn check_file_logging_enabled(config_path: &Path) -> bool {
    // Minimal structs to parse just the logging.enabled field
    #[derive(serde::Deserialize)]
    struct PartialConfig {
        #[serde(default)]
        logging: PartialLoggingConfig,
    }
    #[derive(serde::Deserialize, Default)]
    struct PartialLoggingConfig {
        #[serde(default)]
        enabled: bool,
    }

    let Ok(content) = std::fs::read_to_string(config_path) else {
        return false;
    };

    toml::from_str::<PartialConfig>(&content)
        .map(|c| c.logging.enabled)
        .unwrap_or(false)
}

/// Initialize tracing with console output and optional file logging
fn init_tracing(file_logging_enabled: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reqwest_retry=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if file_logging_enabled {
        let log_path = paths::log_file_path();

        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        match File::create(&log_path) {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt_layer)
                    .with(file_layer)
                    .init();

                return;
            }
            Err(e) => {
                eprintln!("Failed to create log file at {}: {e}", log_path.display());
            }
        }
    }

    // Fallback: console only
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use melodeck_core::TrackLocation;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["melodeck", "lyrics", "song.lrc", "--at", "12.5"]);
        assert!(matches!(
            cli,
            Ok(Cli { command: Command::Lyrics { at: Some(at), normalize: false, .. }, .. })
                if at == Duration::from_millis(12_500)
        ));

        let cli = Cli::try_parse_from(["melodeck", "play", "a.mp3", "b.mp3", "--mode", "single-loop"]);
        assert!(matches!(
            cli,
            Ok(Cli { command: Command::Play { ref tracks, mode: Some(ModeArg::SingleLoop), .. }, .. })
                if tracks.len() == 2
        ));

        let cli = Cli::try_parse_from(["melodeck", "history", "clear"]);
        assert!(matches!(
            cli,
            Ok(Cli { command: Command::History { action: Some(HistoryAction::Clear), recent: HISTORY_LIST_LEN, .. }, .. })
        ));
    }

    #[test]
    fn test_cli_rejects_bad_arguments() {
        assert!(Cli::try_parse_from(["melodeck", "play"]).is_err());
        assert!(Cli::try_parse_from(["melodeck", "lyrics", "a.lrc", "--at", "soon"]).is_err());
        assert!(Cli::try_parse_from(["melodeck", "lyrics", "a.lrc", "--at", "1", "--normalize"]).is_err());
    }

    #[test]
    fn test_track_from_arg() {
        let stream = track_from_arg("https://music.example.com/song/media/outer/url?id=42.mp3");
        assert_eq!(stream.display_name, "url?id=42.mp3");
        assert!(matches!(stream.location, TrackLocation::Remote(_)));

        let local = track_from_arg("/music/Artist - Song.flac");
        assert_eq!(local.display_name, "Artist - Song.flac");
        assert_eq!(local.local_path(), Some(Path::new("/music/Artist - Song.flac")));
    }

    #[test]
    fn test_partial_logging_config() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");

        assert!(!check_file_logging_enabled(&path));
        std::fs::write(&path, "[logging]\nenabled = true\n")?;
        assert!(check_file_logging_enabled(&path));
        std::fs::write(&path, "not [valid toml")?;
        assert!(!check_file_logging_enabled(&path));
        Ok(())
    }
}
