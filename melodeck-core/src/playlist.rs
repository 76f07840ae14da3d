//! Ordered playlist with a current index and playback-mode driven advancing.

use crate::error::{CoreError, Result};
use crate::track::{TrackLocation, TrackRef};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// How the playlist advances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayMode {
    /// Repeat the current track when it ends
    SingleLoop,
    /// Pick any track (possibly the same one) on advance
    Random,
    /// Advance sequentially, wrapping at both ends
    #[default]
    ListLoop,
}

impl PlayMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SingleLoop => "single_loop",
            Self::Random => "random",
            Self::ListLoop => "list_loop",
        }
    }
}

impl std::fmt::Display for PlayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Navigation direction for explicit previous/next requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Previous,
    Next,
}

/// What the transport should do after a playlist mutation.
///
/// The engine never drives the transport itself; it only reports intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistSignal {
    /// Load and play the track at this index from the start
    Play(usize),
    /// Replay the track at this index from position zero
    Restart(usize),
    /// Stop the transport
    Stop,
    /// The playlist no longer has a current track
    NoCurrentTrack,
}

/// Playlist state machine.
///
/// `current` is `None` whenever the list is empty; otherwise it is either
/// `None` (nothing selected yet) or a valid index.
#[derive(Debug, Clone)]
pub struct PlaylistEngine {
    tracks: Vec<TrackRef>,
    current: Option<usize>,
    mode: PlayMode,
    rng: StdRng,
}

impl PlaylistEngine {
    #[must_use]
    pub fn new(mode: PlayMode) -> Self {
        Self::with_rng(mode, StdRng::from_os_rng())
    }

    /// Deterministic random mode, for reproducible shuffles
    #[must_use]
    pub fn with_seed(mode: PlayMode, seed: u64) -> Self {
        Self::with_rng(mode, StdRng::seed_from_u64(seed))
    }

    fn with_rng(mode: PlayMode, rng: StdRng) -> Self {
        Self {
            tracks: Vec::new(),
            current: None,
            mode,
            rng,
        }
    }

    #[must_use]
    pub fn tracks(&self) -> &[TrackRef] {
        &self.tracks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    #[must_use]
    pub const fn current_index(&self) -> Option<usize> {
        self.current
    }

    #[must_use]
    pub fn current_track(&self) -> Option<&TrackRef> {
        self.current.and_then(|i| self.tracks.get(i))
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&TrackRef> {
        self.tracks.get(index)
    }

    #[must_use]
    pub const fn mode(&self) -> PlayMode {
        self.mode
    }

    /// Index of the first track at `location`
    #[must_use]
    pub fn position_of(&self, location: &TrackLocation) -> Option<usize> {
        self.tracks.iter().position(|t| &t.location == location)
    }

    /// Change the mode; only affects future advance/end-of-track decisions
    pub fn set_mode(&mut self, mode: PlayMode) {
        self.mode = mode;
    }

    /// Append tracks in order, skipping those `accept` rejects.
    ///
    /// When the playlist was empty and nothing is playing, the first track
    /// becomes current and a [`PlaylistSignal::Play`] is returned.
    pub fn append<I, F>(&mut self, tracks: I, is_playing: bool, accept: F) -> Option<PlaylistSignal>
    where
        I: IntoIterator<Item = TrackRef>,
        F: Fn(&TrackRef) -> bool,
    {
        let was_empty = self.tracks.is_empty();
        self.tracks.extend(tracks.into_iter().filter(|t| accept(t)));

        if was_empty && !is_playing && !self.tracks.is_empty() {
            self.current = Some(0);
            return Some(PlaylistSignal::Play(0));
        }
        None
    }

    /// Remove the track at `index`, re-normalizing the current index.
    ///
    /// Removing the current track yields `Stop`, then either `Play` of the
    /// track that slid into its place (only if `is_playing`) or
    /// `NoCurrentTrack` when the list became empty.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `index >= len`.
    pub fn remove_at(
        &mut self,
        index: usize,
        is_playing: bool,
    ) -> Result<(TrackRef, Vec<PlaylistSignal>)> {
        self.check_index(index)?;
        let removed = self.tracks.remove(index);
        let mut signals = Vec::new();

        match self.current {
            Some(current) if index < current => {
                self.current = Some(current - 1);
            }
            Some(current) if index == current => {
                signals.push(PlaylistSignal::Stop);
                if self.tracks.is_empty() {
                    self.current = None;
                    signals.push(PlaylistSignal::NoCurrentTrack);
                } else {
                    let replacement = if current >= self.tracks.len() { 0 } else { current };
                    self.current = Some(replacement);
                    if is_playing {
                        signals.push(PlaylistSignal::Play(replacement));
                    }
                }
            }
            _ => {}
        }

        Ok((removed, signals))
    }

    /// Remove everything
    pub fn clear(&mut self) -> PlaylistSignal {
        self.tracks.clear();
        self.current = None;
        PlaylistSignal::Stop
    }

    /// Explicit user selection of a track
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `index >= len`.
    pub fn select(&mut self, index: usize) -> Result<PlaylistSignal> {
        self.check_index(index)?;
        self.current = Some(index);
        Ok(PlaylistSignal::Play(index))
    }

    /// Explicit previous/next navigation. No-op on an empty playlist.
    ///
    /// `Next` in random mode may land on the current index again.
    pub fn advance(&mut self, direction: Direction) -> Option<PlaylistSignal> {
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }

        let index = match direction {
            Direction::Previous => match self.current {
                Some(current) if current > 0 => current - 1,
                _ => len - 1,
            },
            Direction::Next if self.mode == PlayMode::Random => self.rng.random_range(0..len),
            Direction::Next => match self.current {
                Some(current) if current + 1 < len => current + 1,
                _ => 0,
            },
        };

        self.current = Some(index);
        Some(PlaylistSignal::Play(index))
    }

    /// The active track finished on its own
    pub fn on_track_end(&mut self) -> Option<PlaylistSignal> {
        match self.mode {
            PlayMode::SingleLoop => self.current.map(PlaylistSignal::Restart),
            PlayMode::Random | PlayMode::ListLoop => self.advance(Direction::Next),
        }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.tracks.len() {
            Ok(())
        } else {
            Err(CoreError::IndexOutOfRange {
                index,
                len: self.tracks.len(),
            })
        }
    }
}

impl Default for PlaylistEngine {
    fn default() -> Self {
        Self::new(PlayMode::default())
    }
}
