//! Scripted command replay
//!
//! The replay clock is not wall-clock based. [`TickClock`] is decremented by
//! the poll interval once per loop iteration, whether or not any descriptor
//! was ready. A loop woken early by I/O therefore advances the clock faster
//! than real time; replay is deterministic in loop iterations, not seconds.

use std::path::Path;
use std::time::Duration;

use log::{info, warn};
use perfagent_common::{Command, CommandMessage};
use serde_json::Value;

use super::{CommandSource, SourceMessage};
use crate::domain::ScriptError;

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Countdown measured in poll ticks
#[derive(Debug, Clone)]
pub struct TickClock {
    remaining_ms: i64,
    reload_ms: i64,
    step_ms: i64,
}

impl TickClock {
    /// Start a countdown of `interval`, advanced by `step` per tick
    #[must_use]
    pub fn new(interval: Duration, step: Duration) -> Self {
        let reload_ms = millis(interval);
        Self { remaining_ms: reload_ms, reload_ms, step_ms: millis(step) }
    }

    /// Advance one tick; returns true once the countdown has expired
    pub fn tick(&mut self) -> bool {
        self.remaining_ms = self.remaining_ms.saturating_sub(self.step_ms);
        self.remaining_ms <= 0
    }

    pub fn reload(&mut self) {
        self.remaining_ms = self.reload_ms;
    }

    #[must_use]
    pub fn remaining_ms(&self) -> i64 {
        self.remaining_ms
    }
}

/// Pre-parsed commands replayed in order, one per countdown expiry
pub struct ScriptedSource {
    label: String,
    commands: Vec<Command>,
    cursor: usize,
    clock: TickClock,
}

impl ScriptedSource {
    #[must_use]
    pub fn new(commands: Vec<Command>, clock: TickClock) -> Self {
        Self { label: "commandFile".to_string(), commands, cursor: 0, clock }
    }

    /// Load a JSON array of command objects
    ///
    /// Elements that are not valid commands are reported and skipped.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a JSON array.
    pub fn load(path: impl AsRef<Path>, clock: TickClock) -> Result<Self, ScriptError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| ScriptError::Read { path: path.to_path_buf(), source })?;
        let entries: Vec<Value> = serde_json::from_str(&content)
            .map_err(|source| ScriptError::NotArray { path: path.to_path_buf(), source })?;

        let mut commands = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let parsed = serde_json::from_value::<CommandMessage>(entry)
                .map_err(perfagent_common::CommandError::from)
                .and_then(Command::try_from);
            match parsed {
                Ok(command) => commands.push(command),
                Err(e) => warn!("{}: skipping entry {index}: {e}", path.display()),
            }
        }

        info!("Loaded {} scripted commands from {}", commands.len(), path.display());
        Ok(Self::new(commands, clock))
    }

    /// Commands not yet replayed
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.commands.len() - self.cursor
    }
}

impl CommandSource for ScriptedSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn descriptor(&self) -> Option<std::os::fd::RawFd> {
        None
    }

    fn poll(&mut self, _readable: bool) -> Option<SourceMessage> {
        if !self.clock.tick() {
            return None;
        }
        let command = self.commands.get(self.cursor)?.clone();
        self.cursor += 1;
        self.clock.reload();
        Some(SourceMessage::Parsed(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfagent_common::Action;
    use std::io::Write;

    fn action(message: Option<SourceMessage>) -> Action {
        match message {
            Some(SourceMessage::Parsed(command)) => command.action,
            other => panic!("expected a parsed command, got {other:?}"),
        }
    }

    fn start_stop() -> Vec<Command> {
        vec![
            Command::parse(r#"{"functionality":"x","command":"start"}"#).unwrap(),
            Command::parse(r#"{"functionality":"x","command":"stop"}"#).unwrap(),
        ]
    }

    #[test]
    fn test_clock_counts_down_by_step() {
        let mut clock = TickClock::new(Duration::from_millis(300), Duration::from_millis(100));
        assert!(!clock.tick());
        assert!(!clock.tick());
        assert!(clock.tick());
        assert_eq!(clock.remaining_ms(), 0);
        clock.reload();
        assert_eq!(clock.remaining_ms(), 300);
    }

    #[test]
    fn test_one_command_per_countdown() {
        let clock = TickClock::new(Duration::from_millis(200), Duration::from_millis(100));
        let mut source = ScriptedSource::new(start_stop(), clock);

        assert!(source.poll(false).is_none());
        assert_eq!(action(source.poll(false)), Action::Start);
        assert!(source.poll(true).is_none());
        assert_eq!(action(source.poll(false)), Action::Stop);
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn test_interval_shorter_than_tick_fires_every_tick() {
        // COMMAND_INTERVAL = 2 ms against a 100 ms poll wait
        let clock = TickClock::new(Duration::from_millis(2), Duration::from_millis(100));
        let mut source = ScriptedSource::new(start_stop(), clock);

        assert_eq!(action(source.poll(false)), Action::Start);
        assert_eq!(action(source.poll(false)), Action::Stop);
        for _ in 0..50 {
            assert!(source.poll(false).is_none());
        }
    }

    #[test]
    fn test_load_skips_invalid_entries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"functionality":"x","command":"start"}},{{"bogus":1}},{{"functionality":"x","command":"stop"}}]"#
        )
        .unwrap();

        let clock = TickClock::new(Duration::from_millis(1), Duration::from_millis(1));
        let source = ScriptedSource::load(file.path(), clock).unwrap();
        assert_eq!(source.remaining(), 2);
    }

    #[test]
    fn test_load_rejects_non_array() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"functionality":"x","command":"start"}}"#).unwrap();
        let clock = TickClock::new(Duration::from_millis(1), Duration::from_millis(1));
        assert!(matches!(
            ScriptedSource::load(file.path(), clock),
            Err(ScriptError::NotArray { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let clock = TickClock::new(Duration::from_millis(1), Duration::from_millis(1));
        assert!(matches!(
            ScriptedSource::load("/nonexistent/commands.json", clock),
            Err(ScriptError::Read { .. })
        ));
    }
}
