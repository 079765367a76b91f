//! Interactive command feed

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};

use log::{info, warn};
use perfagent_common::RECEIVE_BUFFER_SIZE;

use super::{CommandSource, SourceMessage};
use crate::net::{strip_line_terminator, unbuffered_stdin};

/// Commands typed by an operator on a readable descriptor
///
/// The reader must not buffer: every read is issued only after `poll(2)`
/// reported the descriptor ready, so bytes held back in a userspace buffer
/// would never be delivered.
pub struct InteractiveSource<R> {
    label: String,
    input: R,
    exhausted: bool,
}

impl<R: Read + AsRawFd + Send> InteractiveSource<R> {
    pub fn new(label: impl Into<String>, input: R) -> Self {
        Self { label: label.into(), input, exhausted: false }
    }

    /// Whether the input reached end of file
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl InteractiveSource<File> {
    /// Operator commands from the server's standard input
    ///
    /// # Errors
    /// Returns the error from duplicating the stdin descriptor.
    pub fn stdin() -> io::Result<Self> {
        Ok(Self::new("stdin", unbuffered_stdin()?))
    }
}

impl<R: Read + AsRawFd + Send> CommandSource for InteractiveSource<R> {
    fn label(&self) -> &str {
        &self.label
    }

    fn descriptor(&self) -> Option<RawFd> {
        (!self.exhausted).then(|| self.input.as_raw_fd())
    }

    fn poll(&mut self, readable: bool) -> Option<SourceMessage> {
        if !readable || self.exhausted {
            return None;
        }

        let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];
        let n = match self.input.read(&mut buffer) {
            Ok(0) => {
                info!("{}: end of input, no further commands", self.label);
                self.exhausted = true;
                return None;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => {
                return None;
            }
            Err(e) => {
                warn!("{}: read failed ({e}), disabling source", self.label);
                self.exhausted = true;
                return None;
            }
        };

        let text = String::from_utf8_lossy(strip_line_terminator(&buffer[..n]));
        if text.trim().is_empty() {
            return None;
        }
        Some(SourceMessage::Raw(text.into_owned()))
    }
}
