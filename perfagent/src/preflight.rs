//! Pre-flight checks for perfagent
//!
//! Optional features (sampling sessions, scripted commands, the durable log)
//! are validated before the server starts. A failed check disables the
//! feature with a warning instead of aborting; only an explicitly requested
//! sampling target that does not exist is fatal.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Context, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::config::{CommandInput, ServerConfig};
use crate::domain::Pid;

const PERF_EVENT_PARANOID: &str = "/proc/sys/kernel/perf_event_paranoid";

/// Check every optional feature, disabling those that cannot work
pub fn run_preflight_checks(config: &mut ServerConfig, quiet: bool) {
    if let Some(sampler) = &config.sampler {
        match check_sampler(sampler) {
            Ok(()) => {
                if !quiet {
                    check_perf_permissions();
                }
            }
            Err(e) => {
                eprintln!("warning: {e:#}\nSampling sessions are disabled.");
                config.sampler = None;
            }
        }
    }

    if let CommandInput::Script(path) = &config.commands {
        if let Err(e) = check_command_file(path) {
            eprintln!("warning: {e:#}\nScripted commands are disabled.");
            config.commands = CommandInput::None;
        }
    }

    if let Some(log_file) = &config.log_file {
        if let Err(e) = check_log_dir(log_file) {
            eprintln!("warning: {e:#}\nThe telemetry log is disabled.");
            config.log_file = None;
        }
    }
}

/// Check that the sampler binary exists and is executable
fn check_sampler(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Sampler not found: {}", path.display()))?;
    if !metadata.is_file() {
        bail!("Not a file: {}", path.display());
    }
    if metadata.permissions().mode() & 0o111 == 0 {
        bail!("Sampler is not executable: {}", path.display());
    }
    Ok(())
}

/// Warn when the kernel will refuse to let perf attach to another process
fn check_perf_permissions() {
    // SAFETY: geteuid() has no preconditions and always succeeds.
    if unsafe { libc::geteuid() } == 0 {
        return;
    }
    let level = std::fs::read_to_string(PERF_EVENT_PARANOID)
        .ok()
        .and_then(|s| s.trim().parse::<i32>().ok());
    if let Some(level) = level.filter(|level| *level > 1) {
        eprintln!(
            "warning: perf_event_paranoid is {level}; sampling sessions may fail.\n\
             Run as root or lower {PERF_EVENT_PARANOID}."
        );
    }
}

fn check_command_file(path: &Path) -> Result<()> {
    std::fs::File::open(path)
        .with_context(|| format!("Cannot read command file {}", path.display()))?;
    Ok(())
}

fn check_log_dir(log_file: &Path) -> Result<()> {
    let dir = match log_file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => return Ok(()),
    };
    if !dir.is_dir() {
        bail!("Log directory does not exist: {}", dir.display());
    }
    Ok(())
}

/// Check that the sampling target process exists
///
/// # Errors
/// Returns an error if `/proc/<pid>` is missing.
pub fn check_process_exists(pid: Pid) -> Result<()> {
    let proc_path = format!("/proc/{}", pid.0);
    if !Path::new(&proc_path).exists() {
        bail!(
            "Process {} not found.\n\n\
             Is the process still running? Check with: ps -p {}",
            pid.0,
            pid.0
        );
    }
    Ok(())
}
