//! # Background Sampling Session
//!
//! Drives the external sampling profiler for a bounded time on a dedicated
//! worker thread, entirely outside the server's poll loop:
//!
//! 1. spawn the record process against the target PID
//! 2. wait for the requested duration, or until cancelled
//! 3. send `SIGTERM`, then reap with a bounded grace period; a child that
//!    is still alive is killed and reaped, and the session fails
//! 4. run the report step, let the sampler remove its data file, and
//!    broadcast one record per parsed sample
//! 5. broadcast a final `perfSession` status record
//!
//! Any failure ends that session only and is reported through the status
//! record; the server keeps running.

#![allow(unsafe_code)] // kill() requires unsafe

pub mod report;
pub mod sampler;

use std::io;
use std::process::{Child, ExitStatus};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{info, warn};
use serde_json::{json, Value};

use crate::domain::{Pid, SessionError};
use crate::telemetry::TelemetrySink;

pub use report::{parse_report, PerfSample};
pub use sampler::{PerfSampler, Sampler};

/// How long a terminated sampler may take to exit before the session fails
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);

const REAP_POLL: Duration = Duration::from_millis(20);

/// Parameters of one session
#[derive(Debug, Clone, Copy)]
pub struct SessionParams {
    pub target: Pid,
    pub duration: Duration,
    pub terminate_grace: Duration,
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed { samples: usize },
    Cancelled { samples: usize },
    Failed(String),
}

impl SessionOutcome {
    /// Status record broadcast when the session ends
    #[must_use]
    pub fn to_record(&self) -> Value {
        match self {
            SessionOutcome::Completed { samples } => {
                json!({ "perfSession": { "status": "completed", "samples": samples } })
            }
            SessionOutcome::Cancelled { samples } => {
                json!({ "perfSession": { "status": "cancelled", "samples": samples } })
            }
            SessionOutcome::Failed(error) => {
                json!({ "perfSession": { "status": "failed", "samples": 0, "error": error } })
            }
        }
    }
}

/// The one in-flight session of a server
pub struct SessionHandle {
    cancel: Sender<()>,
    thread: JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    /// Start a session on its own thread
    ///
    /// # Errors
    /// Returns an error if the worker thread cannot be spawned.
    pub fn spawn(
        sampler: Arc<dyn Sampler>,
        params: SessionParams,
        sink: Arc<dyn TelemetrySink>,
    ) -> io::Result<Self> {
        let (cancel, cancelled) = bounded(1);
        let thread = thread::Builder::new().name("perf-session".to_string()).spawn(move || {
            let outcome = run_session(sampler.as_ref(), &params, &cancelled, sink.as_ref());
            sink.publish(&outcome.to_record());
            outcome
        })?;
        Ok(Self { cancel, thread })
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the session to end on its own
    #[must_use]
    pub fn join(self) -> SessionOutcome {
        self.thread
            .join()
            .unwrap_or_else(|_| SessionOutcome::Failed("session thread panicked".to_string()))
    }

    /// Cut the wait short and wait for the session to wind down
    #[must_use]
    pub fn stop(self) -> SessionOutcome {
        let _ = self.cancel.try_send(());
        self.join()
    }
}

fn run_session(
    sampler: &dyn Sampler,
    params: &SessionParams,
    cancelled: &Receiver<()>,
    sink: &dyn TelemetrySink,
) -> SessionOutcome {
    info!("Sampling {} with {} for {:?}", params.target, sampler.name(), params.duration);

    let mut child = match sampler.spawn_record(params.target) {
        Ok(child) => child,
        Err(e) => return fail(&e),
    };
    let child_pid = Pid(child.id());

    // A dropped handle disconnects the channel; treat that as a cancel too
    let was_cancelled =
        !matches!(cancelled.recv_timeout(params.duration), Err(RecvTimeoutError::Timeout));

    let stopped = terminate(child_pid).and_then(|()| reap(&mut child, child_pid, params.terminate_grace));
    match stopped {
        Ok(status) => info!("Sampler {child_pid} exited with {status}"),
        Err(e) => {
            discard(&mut child, child_pid);
            sampler.cleanup();
            return fail(&e);
        }
    }

    let report = sampler.report();
    sampler.cleanup();
    let report = match report {
        Ok(report) => report,
        Err(e) => return fail(&e),
    };

    let samples = parse_report(&report);
    for sample in &samples {
        sink.publish(&sample.to_record());
    }

    if was_cancelled {
        SessionOutcome::Cancelled { samples: samples.len() }
    } else {
        SessionOutcome::Completed { samples: samples.len() }
    }
}

fn fail(err: &SessionError) -> SessionOutcome {
    warn!("Sampling session failed: {err}");
    SessionOutcome::Failed(err.to_string())
}

fn terminate(pid: Pid) -> Result<(), SessionError> {
    let raw = libc::pid_t::try_from(pid.0).map_err(|_| SessionError::Terminate {
        pid,
        source: io::Error::from(io::ErrorKind::InvalidInput),
    })?;

    // SAFETY: kill() has no memory-safety preconditions; `raw` is the PID of
    // a child we spawned and have not reaped, so it cannot have been reused.
    let rc = unsafe { libc::kill(raw, libc::SIGTERM) };
    if rc != 0 {
        return Err(SessionError::Terminate { pid, source: io::Error::last_os_error() });
    }
    Ok(())
}

/// Kill and reap a child that could not be stopped with `SIGTERM`
fn discard(child: &mut Child, pid: Pid) {
    if let Err(e) = child.kill() {
        warn!("Failed to kill sampler {pid}: {e}");
    }
    match child.wait() {
        Ok(status) => info!("Sampler {pid} killed ({status})"),
        Err(e) => warn!("Failed to reap sampler {pid}: {e}"),
    }
}

fn reap(child: &mut Child, pid: Pid, grace: Duration) -> Result<ExitStatus, SessionError> {
    let deadline = Instant::now() + grace;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            return Err(SessionError::StuckChild { pid });
        }
        thread::sleep(REAP_POLL);
    }
}
