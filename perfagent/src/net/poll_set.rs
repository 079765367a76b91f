//! Readiness multiplexing via `poll(2)`
//!
//! The set is rebuilt on every loop iteration: callers `clear()` it,
//! `register()` each descriptor they care about (keeping the returned
//! index), `wait()`, then query `is_ready(index)`.

#![allow(unsafe_code)] // poll() requires unsafe

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Descriptors waited on for readability
pub struct PollSet {
    fds: Vec<libc::pollfd>,
}

impl PollSet {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { fds: Vec::with_capacity(capacity) }
    }

    pub fn clear(&mut self) {
        self.fds.clear();
    }

    /// Add a descriptor and return its index in the set
    pub fn register(&mut self, fd: RawFd) -> usize {
        self.fds.push(libc::pollfd { fd, events: libc::POLLIN, revents: 0 });
        self.fds.len() - 1
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fds.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Block until a descriptor is ready or `timeout` elapses
    ///
    /// Returns the number of ready descriptors. An interrupted wait counts
    /// as a wait with nothing ready.
    ///
    /// # Errors
    /// Returns the OS error of a failed `poll()` call.
    pub fn wait(&mut self, timeout: Duration) -> io::Result<usize> {
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        #[allow(clippy::cast_possible_truncation)]
        let nfds = self.fds.len() as libc::nfds_t;

        // SAFETY: `fds` is a live Vec of `nfds` initialized pollfd structs and
        // is not touched by anything else for the duration of the call.
        let rc = unsafe { libc::poll(self.fds.as_mut_ptr(), nfds, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }

        #[allow(clippy::cast_sign_loss)]
        Ok(rc as usize)
    }

    /// Whether the descriptor at `index` is readable, hung up or in error
    #[must_use]
    pub fn is_ready(&self, index: usize) -> bool {
        self.fds
            .get(index)
            .is_some_and(|p| p.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
    }
}
