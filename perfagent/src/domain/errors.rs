//! Structured error types for perfagent
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Only [`ServerError`] is ever fatal; everything else is reported and the
//! affected client, command or feature is dropped.

use std::path::PathBuf;

use thiserror::Error;

use super::types::{Pid, SlotId};

/// Socket-level failure of one network client
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Peer closed the connection")]
    Eof,

    #[error("Connection already closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("Client roster full ({capacity} slots)")]
    Full { capacity: usize },

    #[error("No client in slot {0}")]
    UnknownSlot(SlotId),
}

#[derive(Error, Debug)]
pub enum LogSinkError {
    #[error("Failed to open log file {}: {source}", .path.display())]
    Open { path: PathBuf, source: std::io::Error },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Failure to load a scripted command file
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Failed to read command file {}: {source}", .path.display())]
    Read { path: PathBuf, source: std::io::Error },

    #[error("Command file {} is not a JSON array: {source}", .path.display())]
    NotArray { path: PathBuf, source: serde_json::Error },
}

/// Reasons a command had no effect
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid function '{0}'")]
    UnknownCategory(String),

    #[error("Invalid rate {rate} for '{category}'")]
    NegativeRate { category: String, rate: i64 },

    #[error("'configure' for '{0}' carries no sampleRate")]
    MissingRate(String),

    #[error("A sampling session is already running")]
    SessionActive,

    #[error("No sampling session is running")]
    NoSession,

    #[error("No sampler available on this host")]
    SamplerUnavailable,

    #[error("Failed to start sampling session: {0}")]
    SessionSpawn(#[source] std::io::Error),

    #[error(transparent)]
    Parse(#[from] perfagent_common::CommandError),

    #[error("Server is shutting down")]
    ShuttingDown,
}

/// Failure of one background sampling session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to spawn sampler {program}: {source}")]
    Spawn { program: String, source: std::io::Error },

    #[error("Failed to signal sampler {pid}: {source}")]
    Terminate { pid: Pid, source: std::io::Error },

    #[error("Sampler {pid} did not exit after SIGTERM")]
    StuckChild { pid: Pid },

    #[error("Sampler report failed: {0}")]
    Report(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Fatal server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to listen on port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
