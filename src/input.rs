//! Console input
//!
//! Stands in for hardware keys and UI buttons when running from a terminal.
//! Each stdin line is either a key name (`volume_up`, `key volume_down`) or
//! a command (`start`, `stop`, `toggle`, `pause`, `cancel`, `wake`, `quit`).

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::signal::{Signal, SignalSender};

/// Map one console line to a signal
///
/// Key names that are not in `monitored_keys` are dropped, the same way the
/// platform filters key events before they reach the press detector.
#[must_use]
pub fn parse_line(line: &str, monitored_keys: &[String]) -> Option<Signal> {
    let line = line.trim().to_lowercase();
    let mut words = line.split_whitespace();
    let first = words.next()?;

    let signal = match first {
        "start" => Signal::StartTurn,
        "stop" => Signal::StopRecording,
        "toggle" => Signal::ToggleRecording,
        "pause" | "resume" => Signal::TogglePause,
        "cancel" => Signal::CancelTurn,
        "wake" => Signal::WakeWordDetected,
        "quit" | "exit" => Signal::Shutdown,
        "key" => return words.next().and_then(|key| key_press(key, monitored_keys)),
        key => return key_press(key, monitored_keys),
    };
    Some(signal)
}

fn key_press(key: &str, monitored_keys: &[String]) -> Option<Signal> {
    if monitored_keys.iter().any(|k| k == key) {
        Some(Signal::ButtonPressed)
    } else {
        tracing::debug!(key, "ignoring unmonitored key");
        None
    }
}

/// Forward stdin lines to the service until EOF or until it stops
pub async fn forward_stdin(signals: SignalSender, monitored_keys: Vec<String>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(signal) = parse_line(&line, &monitored_keys) {
                    if !signals.send(signal) {
                        break;
                    }
                } else if !line.trim().is_empty() {
                    tracing::debug!(line = %line.trim(), "unrecognized input");
                }
            }
            Ok(None) => {
                tracing::debug!("stdin closed");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read stdin");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> Vec<String> {
        vec!["volume_up".to_string(), "volume_down".to_string()]
    }

    #[test]
    fn commands_parse() {
        assert!(matches!(parse_line("start", &keys()), Some(Signal::StartTurn)));
        assert!(matches!(parse_line("  STOP ", &keys()), Some(Signal::StopRecording)));
        assert!(matches!(parse_line("toggle", &keys()), Some(Signal::ToggleRecording)));
        assert!(matches!(parse_line("pause", &keys()), Some(Signal::TogglePause)));
        assert!(matches!(parse_line("cancel", &keys()), Some(Signal::CancelTurn)));
        assert!(matches!(parse_line("wake", &keys()), Some(Signal::WakeWordDetected)));
        assert!(matches!(parse_line("quit", &keys()), Some(Signal::Shutdown)));
    }

    #[test]
    fn monitored_keys_become_presses() {
        assert!(matches!(parse_line("volume_up", &keys()), Some(Signal::ButtonPressed)));
        assert!(matches!(parse_line("key volume_down", &keys()), Some(Signal::ButtonPressed)));
    }

    #[test]
    fn other_input_is_dropped() {
        assert!(parse_line("power", &keys()).is_none());
        assert!(parse_line("key", &keys()).is_none());
        assert!(parse_line("", &keys()).is_none());
    }
}
