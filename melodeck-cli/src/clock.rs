//! Simulated media transport: a clock that "plays" every track for a fixed
//! length and reports progress like a real decoder would.

use melodeck_core::{
    CoreError, Filesystem, MediaTransport, Result, TrackLocation, TransportEvent, TransportState,
};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const LOG_TARGET: &str = "melodeck::clock";

/// How often position updates are emitted while playing
pub const TICK_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq)]
enum ClockCommand {
    Load(Duration),
    Play,
    Pause,
    Stop,
    Seek(Duration),
    SetRate(f64),
}

/// [`MediaTransport`] backed by a background clock task
pub struct ClockTransport {
    fs: Arc<dyn Filesystem>,
    commands: mpsc::UnboundedSender<ClockCommand>,
    track_length: Duration,
}

impl ClockTransport {
    /// Spawn the clock task. Notifications go to `events` until
    /// `cancel_token` fires or the transport is dropped.
    #[must_use]
    pub fn start(
        fs: Arc<dyn Filesystem>,
        events: mpsc::UnboundedSender<TransportEvent>,
        track_length: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(Clock::new(events).run(rx, cancel_token));
        Self {
            fs,
            commands,
            track_length,
        }
    }

    fn send(&self, command: ClockCommand) {
        if self.commands.send(command).is_err() {
            debug!(target: LOG_TARGET, "Clock has stopped, dropping {:?}", command);
        }
    }
}

impl MediaTransport for ClockTransport {
    fn load(&mut self, source: &TrackLocation) -> Result<()> {
        if let TrackLocation::Local(path) = source {
            if !self.fs.exists(path) {
                return Err(CoreError::IoError(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} does not exist", path.display()),
                )));
            }
        }
        debug!(target: LOG_TARGET, "Loading {}", source);
        self.send(ClockCommand::Load(self.track_length));
        Ok(())
    }

    fn play(&mut self) {
        self.send(ClockCommand::Play);
    }

    fn pause(&mut self) {
        self.send(ClockCommand::Pause);
    }

    fn stop(&mut self) {
        self.send(ClockCommand::Stop);
    }

    fn seek(&mut self, position: Duration) {
        self.send(ClockCommand::Seek(position));
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.send(ClockCommand::SetRate(rate));
    }
}

struct Clock {
    events: mpsc::UnboundedSender<TransportEvent>,
    state: TransportState,
    position: Duration,
    length: Duration,
    rate: f64,
}

impl Clock {
    const fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            events,
            state: TransportState::Stopped,
            position: Duration::ZERO,
            length: Duration::ZERO,
            rate: 1.0,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ClockCommand>,
        cancel_token: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => break,
                },
                _ = ticker.tick() => self.tick(),
            }
        }
        debug!(target: LOG_TARGET, "Clock stopped");
    }

    fn apply(&mut self, command: ClockCommand) {
        match command {
            ClockCommand::Load(length) => {
                self.length = length;
                self.position = Duration::ZERO;
                self.set_state(TransportState::Stopped);
                self.emit(TransportEvent::DurationChanged(length));
                self.emit(TransportEvent::PositionChanged(Duration::ZERO));
            }
            ClockCommand::Play => {
                if self.length.is_zero() {
                    return;
                }
                if self.position >= self.length {
                    self.position = Duration::ZERO;
                }
                self.set_state(TransportState::Playing);
            }
            ClockCommand::Pause => {
                if self.state == TransportState::Playing {
                    self.set_state(TransportState::Paused);
                }
            }
            ClockCommand::Stop => {
                self.position = Duration::ZERO;
                self.set_state(TransportState::Stopped);
            }
            ClockCommand::Seek(position) => {
                self.position = position.min(self.length);
                self.emit(TransportEvent::PositionChanged(self.position));
            }
            ClockCommand::SetRate(rate) => self.rate = rate,
        }
    }

    fn tick(&mut self) {
        if self.state != TransportState::Playing {
            return;
        }

        self.position = (self.position + TICK_INTERVAL.mul_f64(self.rate)).min(self.length);
        self.emit(TransportEvent::PositionChanged(self.position));

        if self.position >= self.length {
            self.set_state(TransportState::Stopped);
            self.emit(TransportEvent::EndOfMedia);
        }
    }

    fn set_state(&mut self, state: TransportState) {
        if self.state != state {
            self.state = state;
            self.emit(TransportEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: TransportEvent) {
        // Receiver gone means the player has shut down
        let _ = self.events.send(event);
    }
}
