//! One accepted observer/operator connection
//!
//! Reads are single-shot: one `read()` into a fixed buffer per readable
//! event, with no reassembly of partial messages. A command longer than
//! [`RECEIVE_BUFFER_SIZE`] arrives truncated and fails to parse.
//!
//! Writes come from producer threads and the server loop concurrently, so
//! the write half sits behind its own lock; one record is always written in
//! full before the next one starts.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};

use log::debug;
use perfagent_common::RECEIVE_BUFFER_SIZE;

use crate::domain::{ConnectionState, SlotId, TransportError};

/// Strip exactly one trailing line terminator (`\n` or `\r\n`)
#[must_use]
pub fn strip_line_terminator(bytes: &[u8]) -> &[u8] {
    match bytes.strip_suffix(b"\n") {
        Some(rest) => rest.strip_suffix(b"\r").unwrap_or(rest),
        None => bytes,
    }
}

/// A connected network client owned by the server roster
#[derive(Debug)]
pub struct NetworkClient {
    id: SlotId,
    peer: Option<SocketAddr>,
    reader: TcpStream,
    writer: Mutex<TcpStream>,
    state: AtomicU8,
}

impl NetworkClient {
    /// Wrap an accepted stream
    ///
    /// The socket is switched to non-blocking mode: reads never stall the
    /// server loop and writes never stall a producer beyond the kernel send
    /// buffer.
    ///
    /// # Errors
    /// Returns an error if the socket cannot be configured or duplicated.
    pub fn new(id: SlotId, stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;
        Ok(Self {
            id,
            peer: stream.peer_addr().ok(),
            reader: stream,
            writer: Mutex::new(writer),
            state: AtomicU8::new(ConnectionState::Connected as u8),
        })
    }

    #[must_use]
    pub fn id(&self) -> SlotId {
        self.id
    }

    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Descriptor to register with the poll set
    #[must_use]
    pub fn descriptor(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    /// Read one message
    ///
    /// Returns the text with one trailing line terminator removed, or an
    /// empty string if nothing was available.
    ///
    /// # Errors
    /// [`TransportError::Eof`] when the peer hung up, [`TransportError::Io`]
    /// on a read failure. Both leave the client `Closing`.
    pub fn receive(&self) -> Result<String, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }

        let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];
        match (&self.reader).read(&mut buffer) {
            Ok(0) => {
                self.mark_closing();
                Err(TransportError::Eof)
            }
            Ok(n) => Ok(String::from_utf8_lossy(strip_line_terminator(&buffer[..n])).into_owned()),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(String::new())
            }
            Err(e) => {
                self.mark_closing();
                Err(TransportError::Io(e))
            }
        }
    }

    /// Best-effort write of one complete payload
    ///
    /// # Errors
    /// Returns an error if the client is no longer connected or the write
    /// fails; a failed write leaves the client `Closing`.
    pub fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writer.write_all(payload) {
            self.mark_closing();
            return Err(TransportError::Io(e));
        }
        Ok(())
    }

    /// Move a connected client to `Closing`
    pub fn mark_closing(&self) {
        let _ = self.state.compare_exchange(
            ConnectionState::Connected as u8,
            ConnectionState::Closing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Release the connection; idempotent
    pub fn close(&self) {
        let previous = self.state.swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        if ConnectionState::from_u8(previous) != ConnectionState::Closed {
            debug!("Closing {} ({:?})", self.id, self.peer);
            let _ = self.reader.shutdown(Shutdown::Both);
        }
    }
}
