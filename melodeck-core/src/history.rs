//! Persistent, recency-ordered play history.
//!
//! The ledger keeps at most one entry per path, most recently played first,
//! bounded by a configurable maximum. Every mutation is written through to the
//! history file immediately; write failures are logged and the in-memory
//! ledger stays authoritative for the rest of the session.

use crate::error::Result;
use crate::fs::Filesystem;
use crate::time::DurationExt;
use crate::track::MediaKind;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "melodeck::history";

/// Version tag written at the root of the history file
pub const HISTORY_FILE_VERSION: &str = "1.0";

/// Default ledger capacity
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// One remembered media file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    #[serde(default)]
    pub file_path: PathBuf,
    /// Display name, the file name at the time it was first played
    #[serde(default)]
    pub file_name: String,
    #[serde(default = "unknown_kind", rename = "fileType")]
    pub kind: MediaKind,
    #[serde(default = "epoch", deserialize_with = "lenient_timestamp")]
    pub last_play_time: DateTime<Utc>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub play_count: u32,
    /// Last playback position in milliseconds
    #[serde(default, rename = "lastPosition", deserialize_with = "lenient_millis")]
    pub last_position_ms: u64,
    /// Last known duration in milliseconds
    #[serde(default, rename = "duration", deserialize_with = "lenient_millis")]
    pub duration_ms: u64,
}

impl HistoryItem {
    fn new(path: &Path, kind: MediaKind, position: Duration, duration: Duration) -> Self {
        Self {
            file_path: path.to_path_buf(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            kind,
            last_play_time: Utc::now(),
            play_count: 1,
            last_position_ms: position.as_millis_u64(),
            duration_ms: duration.as_millis_u64(),
        }
    }

    /// Name to show in a history list; falls back to the path
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.file_name.is_empty() {
            self.file_path.display().to_string()
        } else {
            self.file_name.clone()
        }
    }

    #[must_use]
    pub const fn last_position(&self) -> Duration {
        Duration::from_millis(self.last_position_ms)
    }

    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

#[derive(Debug, Serialize)]
struct HistoryFile<'a> {
    version: &'a str,
    history: &'a [HistoryItem],
}

#[derive(Debug, Default, Deserialize)]
struct StoredHistoryFile {
    #[serde(default)]
    history: Vec<Value>,
}

/// Capacity-bounded play history with write-through persistence
pub struct HistoryLedger {
    items: Vec<HistoryItem>,
    max_entries: usize,
    path: PathBuf,
    fs: Arc<dyn Filesystem>,
}

impl std::fmt::Debug for HistoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryLedger")
            .field("items", &self.items.len())
            .field("max_entries", &self.max_entries)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl HistoryLedger {
    /// An empty ledger backed by `path`. Nothing is read or written yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, fs: Arc<dyn Filesystem>, max_entries: usize) -> Self {
        Self {
            items: Vec::new(),
            max_entries,
            path: path.into(),
            fs,
        }
    }

    /// Load the ledger from `path`.
    ///
    /// Entries whose file no longer exists are dropped, and only the first
    /// entry for each path is kept. A missing, unreadable
    /// or corrupt history file yields an empty ledger.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>, fs: Arc<dyn Filesystem>, max_entries: usize) -> Self {
        let mut ledger = Self::new(path, fs, max_entries);

        let Some(content) = ledger.fs.read_text(&ledger.path) else {
            debug!(target: LOG_TARGET, "No history file at {:?}", ledger.path);
            return ledger;
        };

        let stored: StoredHistoryFile = match serde_json::from_str(&content) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(target: LOG_TARGET, "Failed to parse history file {:?}: {}", ledger.path, e);
                return ledger;
            }
        };

        let total = stored.history.len();
        let mut seen = HashSet::new();
        ledger.items = stored
            .history
            .into_iter()
            .filter_map(|value| serde_json::from_value::<HistoryItem>(value).ok())
            .filter(|item| !item.file_path.as_os_str().is_empty())
            .filter(|item| ledger.fs.exists(&item.file_path))
            .filter(|item| seen.insert(item.file_path.clone()))
            .collect();
        ledger.items.truncate(ledger.max_entries);

        info!(
            target: LOG_TARGET,
            "Loaded {} of {} history entries from {:?}",
            ledger.items.len(),
            total,
            ledger.path
        );
        ledger
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Change the capacity, evicting the oldest entries if needed
    pub fn set_max_entries(&mut self, max_entries: usize) {
        self.max_entries = max_entries;
        if self.items.len() > max_entries {
            self.items.truncate(max_entries);
            self.persist();
        }
    }

    /// Record a play of `path`.
    ///
    /// No-op when the file does not exist. A replay bumps the count, refreshes
    /// the timestamp, moves the entry to the front and keeps a previously known
    /// duration when `duration` is zero. Returns whether the ledger changed.
    pub fn record_play(
        &mut self,
        path: &Path,
        kind: MediaKind,
        position: Duration,
        duration: Duration,
    ) -> bool {
        if !self.fs.exists(path) {
            debug!(target: LOG_TARGET, "Not recording missing file {:?}", path);
            return false;
        }

        if let Some(index) = self.index_of(path) {
            let mut item = self.items.remove(index);
            item.play_count = item.play_count.saturating_add(1);
            item.last_play_time = Utc::now();
            item.last_position_ms = position.as_millis_u64();
            if !duration.is_zero() {
                item.duration_ms = duration.as_millis_u64();
            }
            debug!(target: LOG_TARGET, "Replayed {:?} (count {})", path, item.play_count);
            self.items.insert(0, item);
        } else {
            debug!(target: LOG_TARGET, "First play of {:?}", path);
            self.items.insert(0, HistoryItem::new(path, kind, position, duration));
        }

        self.items.truncate(self.max_entries);
        self.persist();
        true
    }

    /// Update the remembered position (and duration, if known) of an existing
    /// entry without touching its play count or recency
    pub fn update_progress(&mut self, path: &Path, position: Duration, duration: Duration) -> bool {
        let Some(index) = self.index_of(path) else {
            return false;
        };

        let item = &mut self.items[index];
        item.last_position_ms = position.as_millis_u64();
        if !duration.is_zero() {
            item.duration_ms = duration.as_millis_u64();
        }
        self.persist();
        true
    }

    /// Every entry, most recent first
    #[must_use]
    pub fn all(&self) -> &[HistoryItem] {
        &self.items
    }

    /// Entries of one kind, preserving recency order
    #[must_use]
    pub fn by_kind(&self, kind: MediaKind) -> Vec<&HistoryItem> {
        self.items.iter().filter(|item| item.kind == kind).collect()
    }

    /// The `n` most recent entries (fewer if the ledger is smaller)
    #[must_use]
    pub fn recent(&self, n: usize) -> &[HistoryItem] {
        &self.items[..n.min(self.items.len())]
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&HistoryItem> {
        self.items.iter().find(|item| item.file_path == path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Forget one path. Returns the removed entry, if any.
    pub fn remove(&mut self, path: &Path) -> Option<HistoryItem> {
        let index = self.index_of(path)?;
        let item = self.items.remove(index);
        self.persist();
        Some(item)
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.persist();
    }

    /// Write the ledger to its history file
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self) -> Result<()> {
        let file = HistoryFile {
            version: HISTORY_FILE_VERSION,
            history: &self.items,
        };
        let content = serde_json::to_string_pretty(&file)?;
        self.fs.write_text(&self.path, &content)
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            warn!(target: LOG_TARGET, "Failed to save history to {:?}: {}", self.path, e);
        }
    }

    fn index_of(&self, path: &Path) -> Option<usize> {
        self.items.iter().position(|item| item.file_path == path)
    }
}

const fn unknown_kind() -> MediaKind {
    MediaKind::Unknown
}

const fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

/// Accepts RFC 3339, or a naive `YYYY-MM-DDTHH:MM:SS[.fff]` taken as local time
fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_str().and_then(parse_timestamp).unwrap_or_else(epoch))
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Numbers, numeric strings and anything else (as zero)
fn lenient_millis<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn lenient_count<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = lenient_millis(deserializer)?;
    Ok(u32::try_from(millis).unwrap_or(u32::MAX))
}
