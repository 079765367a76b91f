//! Socket plumbing shared by the server loop and the operator client
//!
//! - `poll_set`: readiness multiplexing over raw descriptors via `poll(2)`
//! - `client`: one accepted observer/operator connection

pub mod client;
pub mod poll_set;

use std::fs::File;
use std::io;
use std::os::fd::AsFd;

pub use client::{strip_line_terminator, NetworkClient};
pub use poll_set::PollSet;

/// Standard input as an unbuffered file
///
/// `io::Stdin` reads ahead into a private buffer, so bytes it has pulled in
/// no longer show up as readable to `poll(2)`. Reading a duplicate of the
/// descriptor keeps every pending byte visible to the poll set.
///
/// # Errors
/// Returns the error from duplicating the descriptor.
pub fn unbuffered_stdin() -> io::Result<File> {
    Ok(File::from(io::stdin().as_fd().try_clone_to_owned()?))
}
