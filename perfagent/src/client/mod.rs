//! # Operator Client
//!
//! Connects to a running server, forwards operator lines from an input
//! descriptor and prints every message the server sends back. Both sides
//! are multiplexed on one thread with `poll(2)`.
//!
//! The session ends when the server hangs up or sends a message ending in
//! `done`. The sentinel is matched on the bytes actually received, after
//! one trailing line terminator is stripped; a message shorter than four
//! bytes never matches.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::time::Duration;

use log::{debug, info};
use perfagent_common::POLL_INTERVAL_MS;

use crate::net::{strip_line_terminator, PollSet};

/// Suffix of the message that ends a client session
pub const DONE_SENTINEL: &[u8] = b"done";

const READ_BUFFER_SIZE: usize = 4096;

/// Whether a received message ends the session
#[must_use]
pub fn is_terminal_message(message: &[u8]) -> bool {
    let message = strip_line_terminator(message);
    message.len() >= DONE_SENTINEL.len() && message.ends_with(DONE_SENTINEL)
}

/// Why a client session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The server sent the `done` sentinel
    Done,
    /// The server closed the connection
    ServerClosed,
}

/// Connect to `host:port`
///
/// # Errors
/// Returns the connection error.
pub fn connect(host: &str, port: u16) -> io::Result<TcpStream> {
    let stream = TcpStream::connect((host, port))?;
    info!("Connected to {}", stream.peer_addr()?);
    Ok(stream)
}

/// Run one client session
///
/// With `input` set, every chunk read from it is forwarded to the server
/// unchanged; once it reaches end of file the session continues in
/// listen-only mode. `input` is read only after `poll(2)` reports it ready,
/// so it must not buffer internally (see [`crate::net::unbuffered_stdin`]).
///
/// # Errors
/// Returns the first socket or output error.
pub fn run<I, W>(stream: &TcpStream, mut input: Option<I>, out: &mut W) -> io::Result<SessionEnd>
where
    I: Read + AsRawFd,
    W: Write,
{
    let mut poll_set = PollSet::with_capacity(2);
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let interval = Duration::from_millis(POLL_INTERVAL_MS);

    loop {
        poll_set.clear();
        let socket_idx = poll_set.register(stream.as_raw_fd());
        let input_idx = input.as_ref().map(|i| poll_set.register(i.as_raw_fd()));

        poll_set.wait(interval)?;

        if poll_set.is_ready(socket_idx) {
            let n = match (&*stream).read(&mut buffer) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                return Ok(SessionEnd::ServerClosed);
            }
            out.write_all(&buffer[..n])?;
            out.flush()?;
            if is_terminal_message(&buffer[..n]) {
                return Ok(SessionEnd::Done);
            }
        }

        if !input_idx.is_some_and(|idx| poll_set.is_ready(idx)) {
            continue;
        }
        if let Some(reader) = input.as_mut() {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                debug!("Input closed; listening only");
                input = None;
            } else {
                (&*stream).write_all(&buffer[..n])?;
            }
        }
    }
}
