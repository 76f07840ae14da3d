use crate::error::{CoreError, Result};
use crate::history::DEFAULT_MAX_ENTRIES;
use crate::playlist::PlayMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MelodeckConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub lyrics: LyricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default)]
    pub mode: PlayMode,
    /// Clamped to `[0.25, 4.0]` when applied
    #[serde(default = "default_playback_rate")]
    pub playback_rate: f64,
}

const fn default_playback_rate() -> f64 {
    1.0
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            mode: PlayMode::default(),
            playback_rate: default_playback_rate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

const fn default_true() -> bool {
    true
}

const fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_max_entries(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricsConfig {
    /// Fetch missing lyrics online
    #[serde(default = "default_true")]
    pub online_fetch: bool,
    /// Provider priority: providers are tried in order
    #[serde(default = "default_providers")]
    pub providers: Vec<LyricsProviderType>,
    /// Timeout applied to each network request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Folders next to a track searched for `.lrc` files
    #[serde(default = "default_subdirectories")]
    pub subdirectories: Vec<String>,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

fn default_providers() -> Vec<LyricsProviderType> {
    vec![LyricsProviderType::Netease]
}

const fn default_request_timeout() -> u64 {
    10
}

fn default_subdirectories() -> Vec<String> {
    vec!["lyrics".to_string(), "Lyrics".to_string()]
}

fn default_api_base_url() -> String {
    "https://netease-cloud-music-api-psi-drab.vercel.app".to_string()
}

impl Default for LyricsConfig {
    fn default() -> Self {
        Self {
            online_fetch: true,
            providers: default_providers(),
            request_timeout_secs: default_request_timeout(),
            subdirectories: default_subdirectories(),
            api_base_url: default_api_base_url(),
        }
    }
}

impl LyricsConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LyricsProviderType {
    Netease,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to a file in the config directory
    #[serde(default)]
    pub enabled: bool,
}

impl MelodeckConfig {
    /// Load config from file or create template on first run
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigNotFound`] after writing the template, or an
    /// error if the config file cannot be read, parsed or validated.
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_at(&crate::paths::config_path())
    }

    /// [`Self::load_or_create`] for an explicit path
    ///
    /// # Errors
    ///
    /// Same as [`Self::load_or_create`].
    pub fn load_or_create_at(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                fs::create_dir_all(parent)?;
            }

            fs::write(config_path, CONFIG_TEMPLATE)?;

            return Err(CoreError::ConfigNotFound {
                path: config_path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(config_path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or a value is out of range.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.playback.playback_rate.is_finite() || self.playback.playback_rate <= 0.0 {
            return Err(CoreError::ConfigInvalid {
                message: format!(
                    "playback.playback_rate must be a positive number, got {}",
                    self.playback.playback_rate
                ),
            });
        }
        if self.history.max_entries == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "history.max_entries must be at least 1".to_string(),
            });
        }
        if self.lyrics.request_timeout_secs == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "lyrics.request_timeout_secs must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

const CONFIG_TEMPLATE: &str = r##"# Melodeck Configuration
# ~/.config/melodeck/config.toml

[playback]
# Play mode: "single_loop", "random" or "list_loop"
mode = "list_loop"
# Playback speed, clamped to 0.25 - 4.0
playback_rate = 1.0

[history]
enabled = true
# Oldest entries are dropped beyond this many
max_entries = 100

[lyrics]
# Look up missing lyrics online and save them next to the track
online_fetch = true
# Providers are tried in order; first successful result wins
providers = ["netease"]
request_timeout_secs = 10
# Searched (in order) after the track's own folder
subdirectories = ["lyrics", "Lyrics"]
api_base_url = "https://netease-cloud-music-api-psi-drab.vercel.app"

[logging]
# Write logs to ~/.config/melodeck/melodeck.log in addition to the console
enabled = false
"##;
