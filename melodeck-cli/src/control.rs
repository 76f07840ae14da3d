//! Keyboard control of a running player: one command per stdin line.

use melodeck_core::{PlayMode, PlayerCommand, PlayerHandle};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const LOG_TARGET: &str = "melodeck::control";

pub const HELP: &str = "\
Controls (type a command and press Enter):
  <Enter> / p      pause or resume
  n / next         next track
  b / prev         previous track
  s <secs>         seek to position
  r <rate>         playback rate (0.25 - 4.0)
  m <mode>         single_loop | random | list_loop
  g <index>        play playlist entry
  x / stop         stop playback
  q / quit         exit";

/// What a line of input asks for
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Player(PlayerCommand),
    Quit,
}

/// Parse one line of input. Returns `None` for anything unrecognized.
#[must_use]
pub fn parse_control(line: &str) -> Option<Control> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Some(Control::Player(PlayerCommand::TogglePause));
    };
    let arg = parts.next();

    let command = match (word, arg) {
        ("p" | "pause", None) => PlayerCommand::TogglePause,
        ("n" | "next", None) => PlayerCommand::Next,
        ("b" | "prev", None) => PlayerCommand::Previous,
        ("x" | "stop", None) => PlayerCommand::Stop,
        ("q" | "quit", None) => return Some(Control::Quit),
        ("s" | "seek", Some(secs)) => {
            let secs: f64 = secs.parse().ok()?;
            PlayerCommand::Seek(Duration::try_from_secs_f64(secs).ok()?)
        }
        ("r" | "rate", Some(rate)) => PlayerCommand::SetPlaybackRate(rate.parse().ok()?),
        ("m" | "mode", Some(mode)) => PlayerCommand::SetMode(parse_mode(mode)?),
        ("g" | "go", Some(index)) => PlayerCommand::Select(index.parse().ok()?),
        _ => return None,
    };
    Some(Control::Player(command))
}

fn parse_mode(mode: &str) -> Option<PlayMode> {
    match mode {
        "single_loop" | "single" => Some(PlayMode::SingleLoop),
        "random" => Some(PlayMode::Random),
        "list_loop" | "list" => Some(PlayMode::ListLoop),
        _ => None,
    }
}

/// Forward stdin commands to the player until quit, EOF or cancellation
pub async fn read_controls(handle: PlayerHandle, cancel_token: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            () = cancel_token.cancelled() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(target: LOG_TARGET, "Stdin closed, controls disabled");
                break;
            }
            Err(e) => {
                warn!(target: LOG_TARGET, "Failed to read stdin: {}", e);
                break;
            }
        };

        match parse_control(&line) {
            Some(Control::Player(command)) => {
                if handle.send(command).await.is_err() {
                    break;
                }
            }
            Some(Control::Quit) => {
                cancel_token.cancel();
                break;
            }
            None => println!("{HELP}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_commands() {
        assert_eq!(
            parse_control(""),
            Some(Control::Player(PlayerCommand::TogglePause))
        );
        assert_eq!(
            parse_control("  n "),
            Some(Control::Player(PlayerCommand::Next))
        );
        assert_eq!(
            parse_control("prev"),
            Some(Control::Player(PlayerCommand::Previous))
        );
        assert_eq!(parse_control("q"), Some(Control::Quit));
    }

    #[test]
    fn test_commands_with_arguments() {
        assert_eq!(
            parse_control("s 12.5"),
            Some(Control::Player(PlayerCommand::Seek(Duration::from_millis(12_500))))
        );
        assert_eq!(
            parse_control("m random"),
            Some(Control::Player(PlayerCommand::SetMode(PlayMode::Random)))
        );
        assert_eq!(
            parse_control("g 3"),
            Some(Control::Player(PlayerCommand::Select(3)))
        );
        assert_eq!(
            parse_control("r 1.5"),
            Some(Control::Player(PlayerCommand::SetPlaybackRate(1.5)))
        );
    }

    #[test]
    fn test_malformed_input() {
        assert_eq!(parse_control("s"), None);
        assert_eq!(parse_control("s -4"), None);
        assert_eq!(parse_control("g first"), None);
        assert_eq!(parse_control("m shuffle"), None);
        assert_eq!(parse_control("n 2"), None);
        assert_eq!(parse_control("dance"), None);
    }
}
