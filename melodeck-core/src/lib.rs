pub mod acquisition;
pub mod config;
pub mod cursor;
pub mod error;
pub mod fs;
pub mod history;
pub mod lrc;
pub mod net;
pub mod paths;
pub mod playback;
pub mod player;
pub mod playlist;
pub mod provider;
pub mod time;
pub mod track;
pub mod transport;

pub use acquisition::{LyricsAcquisition, SongGuess};
pub use config::{
    HistoryConfig, LoggingConfig, LyricsConfig, LyricsProviderType, MelodeckConfig,
    PlaybackConfig,
};

/// Re-export toml error type for config parsing error handling
pub use toml::de::Error as TomlParseError;
pub use cursor::{LineWindow, LyricCursor};
pub use error::{CoreError, Result};
pub use fs::{Filesystem, LocalFilesystem, MemoryFilesystem};
pub use history::{HistoryItem, HistoryLedger};
pub use lrc::{LyricDocument, LyricLine};
pub use net::{HttpFetcher, NetworkFetch};
pub use paths::{
    config_dir, config_path, history_path, log_file_path, CONFIG_DIR_NAME, CONFIG_FILE_NAME,
    HISTORY_FILE_NAME, LOG_FILE_NAME,
};
pub use playback::PlaybackStatus;
pub use player::{Player, PlayerCommand, PlayerEvent, PlayerHandle};
pub use playlist::{Direction, PlayMode, PlaylistEngine, PlaylistSignal};
pub use provider::{FetchedLyrics, LyricsProvider, LyricsQuery};
pub use time::DurationExt;
pub use track::{MediaKind, TrackLocation, TrackRef};
pub use transport::{
    MediaTransport, TransportErrorKind, TransportEvent, TransportState, MAX_PLAYBACK_RATE,
    MIN_PLAYBACK_RATE,
};
