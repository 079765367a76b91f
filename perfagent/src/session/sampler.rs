//! External sampling profiler
//!
//! A sampler has two steps: a long-running record process attached to the
//! target PID, and a report step run after the record process was stopped.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use log::{debug, warn};

use crate::domain::{Pid, SessionError};

/// The external profiler driven by a sampling session
pub trait Sampler: Send + Sync {
    /// Program name used in diagnostics
    fn name(&self) -> &str;

    /// Start recording `target`
    ///
    /// # Errors
    /// Returns an error if the record process cannot be started.
    fn spawn_record(&self, target: Pid) -> Result<Child, SessionError>;

    /// Produce the text report of the last recording
    ///
    /// # Errors
    /// Returns an error if the report step fails.
    fn report(&self) -> Result<String, SessionError>;

    /// Remove whatever the recording left behind
    ///
    /// Called once per session after the report step, whether or not it
    /// succeeded.
    fn cleanup(&self) {}
}

/// `perf record` / `perf script`
#[derive(Debug, Clone)]
pub struct PerfSampler {
    program: PathBuf,
    data_file: PathBuf,
}

impl PerfSampler {
    /// Sampler writing its data file into `output_dir`
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        let data_file = output_dir.into().join(format!("perfagent-{}.data", std::process::id()));
        Self { program: program.into(), data_file }
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

impl Sampler for PerfSampler {
    fn name(&self) -> &str {
        self.program.to_str().unwrap_or("perf")
    }

    fn spawn_record(&self, target: Pid) -> Result<Child, SessionError> {
        debug!("Starting {} record for {target}", self.program.display());
        Command::new(&self.program)
            .arg("record")
            .arg("-p")
            .arg(target.0.to_string())
            .arg("-o")
            .arg(&self.data_file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SessionError::Spawn { program: self.program_name(), source })
    }

    fn report(&self) -> Result<String, SessionError> {
        let output = Command::new(&self.program)
            .arg("script")
            .arg("-i")
            .arg(&self.data_file)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| SessionError::Spawn { program: self.program_name(), source })?;

        if !output.status.success() {
            return Err(SessionError::Report(format!(
                "{} script exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn cleanup(&self) {
        match fs::remove_file(&self.data_file) {
            Ok(()) => debug!("Removed {}", self.data_file.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {e}", self.data_file.display()),
        }
    }
}
