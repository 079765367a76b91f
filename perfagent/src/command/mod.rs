//! Command sources feeding the server loop
//!
//! Two variants share one capability, [`CommandSource::poll`]:
//!
//! - [`InteractiveSource`]: reads operator input from a descriptor (stdin in
//!   the server binary); yields at most one message per readable event,
//!   as raw text that goes through the same path as client messages.
//! - [`ScriptedSource`]: replays a pre-parsed command file on a countdown
//!   driven by the server's poll interval (see [`TickClock`]).
//!
//! A source never fails the loop.

pub mod interactive;
pub mod scripted;

use std::os::fd::RawFd;

use perfagent_common::Command;

pub use interactive::InteractiveSource;
pub use scripted::{ScriptedSource, TickClock};

/// One message produced by a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceMessage {
    /// Text as received; logged verbatim, then parsed by the server
    Raw(String),
    /// A command that was already validated when the source was loaded
    Parsed(Command),
}

/// A source of commands polled once per server loop iteration
pub trait CommandSource: Send {
    /// Source tag recorded in the log for commands from this source
    fn label(&self) -> &str;

    /// Descriptor to include in the poll set, if the source has one
    fn descriptor(&self) -> Option<RawFd>;

    /// Produce the next message, if any
    ///
    /// Called on every loop iteration; `readable` reports whether the
    /// source's descriptor was ready in this iteration.
    fn poll(&mut self, readable: bool) -> Option<SourceMessage>;
}
