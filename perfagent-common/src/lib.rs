//! # Shared Data Structures (Server ↔ Producers)
//!
//! Defines the state and wire types shared between the multiplexing server
//! and the instrumentation producers that run on host-runtime threads.
//!
//! ## Key Types
//!
//! - [`SampleGate`] - Per-category atomic sampling policy (count, rate, backtrace)
//! - [`GateRegistry`] - The fixed set of gates, one per known category
//! - [`ProducerControl`] - `setEnabled` / `setRate` control surface
//! - [`Command`] - A parsed operator command, see [`Command::parse`]
//!
//! ## Concurrency
//!
//! Every gate field is an independent atomic. No compound invariant across
//! `count`, `rate` and `backtrace` is enforced atomically, so concurrent
//! producers on one category may see the effective sampling period drift
//! from exactly `rate`. That drift is accepted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Protocol Constants
// ============================================================================

/// Default TCP port the server listens on
pub const DEFAULT_PORT: u16 = 9003;

/// Default host the client connects to
pub const DEFAULT_HOST: &str = "localhost";

/// Maximum number of concurrently connected network clients
pub const NUM_CLIENTS: usize = 8;

/// Poll wait interval of the server loop, in milliseconds
///
/// Also the decrement applied to the scripted command countdown on every
/// loop iteration (one tick).
pub const POLL_INTERVAL_MS: u64 = 100;

/// Countdown reload value between two scripted commands, in milliseconds
pub const COMMAND_INTERVAL_MS: u64 = 3000;

/// Size of the receive buffer of one network client
///
/// A command must fit in a single read of this size.
pub const RECEIVE_BUFFER_SIZE: usize = 255;

/// Session length used when a `perf` start command carries no `time` field
pub const DEFAULT_SESSION_SECS: u64 = 10;

/// Functionality name that addresses the background sampling session
pub const SESSION_FUNCTIONALITY: &str = "perf";

// ============================================================================
// Producer Categories
// ============================================================================

/// Exception probe
pub const EXCEPTION_EVENTS: &str = "exceptionEvents";

/// Method-entry probe
pub const METHOD_ENTRY_EVENTS: &str = "methodEntryEvents";

/// Object allocation probe
pub const OBJECT_ALLOC_EVENTS: &str = "objectAllocEvents";

/// Lock-contention (monitor) probe
pub const MONITOR_EVENTS: &str = "monitorEvents";

/// Alias that toggles only the backtrace flag of [`MONITOR_EVENTS`]
pub const MONITOR_STACK_TRACE: &str = "monitorStackTrace";

/// All categories with a gate of their own, in registration order
pub const CATEGORIES: [&str; 4] =
    [EXCEPTION_EVENTS, METHOD_ENTRY_EVENTS, OBJECT_ALLOC_EVENTS, MONITOR_EVENTS];

// ============================================================================
// Sample Gate
// ============================================================================

/// Atomic sampling policy of one producer category
///
/// Producers call [`SampleGate::sample`] once per host-runtime event; the
/// server mutates the gate from its dispatch path.
#[derive(Debug)]
pub struct SampleGate {
    name: &'static str,
    count: AtomicU64,
    /// Always ≥ 1
    rate: AtomicU64,
    backtrace: AtomicBool,
    active: AtomicBool,
}

impl SampleGate {
    /// Create a gate with rate 1, backtrace capture on and event delivery off
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            count: AtomicU64::new(0),
            rate: AtomicU64::new(1),
            backtrace: AtomicBool::new(true),
            active: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of events counted while backtrace capture was enabled
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn rate(&self) -> u64 {
        self.rate.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn backtrace_enabled(&self) -> bool {
        self.backtrace.load(Ordering::Relaxed)
    }

    /// Whether the producer should deliver events at all
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn set_backtrace(&self, enabled: bool) {
        self.backtrace.store(enabled, Ordering::Relaxed);
    }

    /// Store a new rate. Zero is never stored; returns false if ignored.
    pub fn store_rate(&self, rate: u64) -> bool {
        if rate == 0 {
            return false;
        }
        self.rate.store(rate, Ordering::Relaxed);
        true
    }

    /// Apply a sample rate the way producers interpret it
    ///
    /// A positive rate is stored and enables backtrace capture. A rate of
    /// zero or below clears backtrace capture and leaves the stored rate
    /// untouched.
    pub fn configure(&self, rate: i64) {
        match u64::try_from(rate) {
            Ok(rate) if rate > 0 => {
                self.store_rate(rate);
                self.set_backtrace(true);
            }
            _ => self.set_backtrace(false),
        }
    }

    /// Count one event and decide whether it should carry detail
    ///
    /// Returns the event's sequence number when backtrace capture is on and
    /// the sequence falls on the sampling period. Nothing is counted while
    /// backtrace capture is off.
    pub fn sample(&self) -> Option<u64> {
        if !self.backtrace_enabled() {
            return None;
        }
        let seq = self.count.fetch_add(1, Ordering::Relaxed);
        let rate = self.rate().max(1);
        (seq % rate == 0).then_some(seq)
    }
}

// ============================================================================
// Gate Registry
// ============================================================================

/// How a category name maps onto a gate
#[derive(Debug, Clone, Copy)]
pub enum GateTarget<'a> {
    /// The full gate of a category
    Gate(&'a SampleGate),
    /// Only the backtrace flag of another category's gate
    BacktraceOnly(&'a SampleGate),
}

/// The gates of all known producer categories
///
/// Created once at server start and shared with producers for the whole
/// process lifetime.
#[derive(Debug)]
pub struct GateRegistry {
    gates: Vec<SampleGate>,
}

impl Default for GateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GateRegistry {
    /// Registry with one gate per entry of [`CATEGORIES`]
    #[must_use]
    pub fn new() -> Self {
        Self { gates: CATEGORIES.iter().map(|&name| SampleGate::new(name)).collect() }
    }

    /// Look up a gate by exact, case-sensitive category name
    #[must_use]
    pub fn get(&self, category: &str) -> Option<&SampleGate> {
        self.gates.iter().find(|g| g.name == category)
    }

    /// Resolve a command target, including backtrace-only aliases
    #[must_use]
    pub fn resolve(&self, category: &str) -> Option<GateTarget<'_>> {
        if category == MONITOR_STACK_TRACE {
            return self.get(MONITOR_EVENTS).map(GateTarget::BacktraceOnly);
        }
        self.get(category).map(GateTarget::Gate)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SampleGate> {
        self.gates.iter()
    }
}

/// Control surface exposed to producers and consumed by dispatch
///
/// Unknown category names are a no-op; the return value reports whether a
/// gate was found.
pub trait ProducerControl {
    fn set_enabled(&self, category: &str, enabled: bool) -> bool;
    fn set_rate(&self, category: &str, rate: i64) -> bool;
}

impl ProducerControl for GateRegistry {
    fn set_enabled(&self, category: &str, enabled: bool) -> bool {
        match self.get(category) {
            Some(gate) => {
                gate.set_active(enabled);
                true
            }
            None => false,
        }
    }

    fn set_rate(&self, category: &str, rate: i64) -> bool {
        match self.get(category) {
            Some(gate) => {
                gate.configure(rate);
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

/// What a command asks the server to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Configure,
    /// Start a time-bounded background sampling session
    ServerStart { duration: Duration },
    /// Stop the background sampling session
    ServerStop,
}

/// A parsed operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub category: String,
    pub action: Action,
    /// Signed on purpose: negative rates are rejected at dispatch
    pub rate: Option<i64>,
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Malformed command: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown command '{command}' for functionality '{functionality}'")]
    UnknownAction { functionality: String, command: String },
}

/// Command object as it appears on the wire and in command files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandMessage {
    pub functionality: String,
    pub command: String,
    #[serde(rename = "sampleRate", default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<i64>,
    /// Sampling session length in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
}

impl Command {
    /// Parse one newline-stripped JSON command object
    ///
    /// # Errors
    /// Returns an error if the text is not a command object or names an
    /// unknown command.
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        let message: CommandMessage = serde_json::from_str(text.trim())?;
        Self::try_from(message)
    }

    /// The wire form of this command
    #[must_use]
    pub fn to_message(&self) -> CommandMessage {
        let (command, time) = match self.action {
            Action::Start => ("start", None),
            Action::ServerStart { duration } => ("start", Some(duration.as_secs())),
            Action::Stop | Action::ServerStop => ("stop", None),
            Action::Configure => ("configure", None),
        };
        CommandMessage {
            functionality: self.category.clone(),
            command: command.to_string(),
            sample_rate: self.rate,
            time,
        }
    }
}

impl TryFrom<CommandMessage> for Command {
    type Error = CommandError;

    fn try_from(message: CommandMessage) -> Result<Self, Self::Error> {
        let session = message.functionality == SESSION_FUNCTIONALITY;
        let action = match (session, message.command.as_str()) {
            (true, "start") => Action::ServerStart {
                duration: Duration::from_secs(message.time.unwrap_or(DEFAULT_SESSION_SECS)),
            },
            (true, "stop") => Action::ServerStop,
            (false, "start") => Action::Start,
            (false, "stop") => Action::Stop,
            (false, "configure") => Action::Configure,
            _ => {
                return Err(CommandError::UnknownAction {
                    functionality: message.functionality,
                    command: message.command,
                })
            }
        };
        Ok(Self { category: message.functionality, action, rate: message.sample_rate })
    }
}
