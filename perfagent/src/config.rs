//! Server configuration
//!
//! Plain settings struct; the binary fills it from [`crate::cli::ServerArgs`]
//! and tests build it directly.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use perfagent_common::{COMMAND_INTERVAL_MS, DEFAULT_PORT, NUM_CLIENTS, POLL_INTERVAL_MS};

use crate::domain::Pid;
use crate::session::DEFAULT_TERMINATE_GRACE;

/// Where the server takes operator commands from besides the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandInput {
    None,
    /// Operator commands typed on the server's stdin
    Interactive,
    /// JSON array of commands replayed on the tick countdown
    Script(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    /// `0` picks an ephemeral port
    pub port: u16,
    pub max_clients: usize,
    pub poll_interval: Duration,
    /// Countdown between two scripted commands, in poll-interval steps
    pub command_interval: Duration,
    pub commands: CommandInput,
    /// `None` disables the durable log
    pub log_file: Option<PathBuf>,
    /// `None` disables sampling sessions
    pub sampler: Option<PathBuf>,
    pub sampler_target: Pid,
    pub session_dir: PathBuf,
    pub terminate_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_clients: NUM_CLIENTS,
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
            command_interval: Duration::from_millis(COMMAND_INTERVAL_MS),
            commands: CommandInput::None,
            log_file: None,
            sampler: None,
            sampler_target: Pid::current(),
            session_dir: std::env::temp_dir(),
            terminate_grace: DEFAULT_TERMINATE_GRACE,
        }
    }
}
