//! Domain model for perfagent
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Explicit connection and server lifecycle states
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{ConnectionState, Pid, ServerState, SlotId};

pub use errors::{
    DispatchError, LogSinkError, RosterError, ScriptError, ServerError, SessionError,
    TransportError,
};
