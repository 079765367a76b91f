//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep roster slots, process IDs and plain indices
//! apart in function signatures.

use std::fmt;

/// Stable roster slot of one network client
///
/// A slot id stays valid for the lifetime of the connection and is reused
/// only after the slot has been tombstoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub usize);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Process ID
///
/// Target of the external sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub u32);

impl Pid {
    /// PID of the current process
    #[must_use]
    pub fn current() -> Self {
        Pid(std::process::id())
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

impl From<u32> for Pid {
    fn from(pid: u32) -> Self {
        Pid(pid)
    }
}

/// Lifecycle of one network client connection
///
/// `Connected → Closing → Closed`. A failed send or read moves the client to
/// `Closing`; the server loop evicts `Closing` clients and closes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connected = 0,
    Closing = 1,
    Closed = 2,
}

impl ConnectionState {
    /// Decode the value stored in an `AtomicU8`
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connected,
            1 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Lifecycle of the server
///
/// `Created → Listening → (Running ⇄ Dispatching)* → ShuttingDown → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Listening,
    /// Waiting in poll
    Running,
    /// Handling one ready descriptor
    Dispatching,
    ShuttingDown,
    Closed,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Created => "CREATED",
            ServerState::Listening => "LISTENING",
            ServerState::Running => "RUNNING",
            ServerState::Dispatching => "DISPATCHING",
            ServerState::ShuttingDown => "SHUTTING_DOWN",
            ServerState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}
