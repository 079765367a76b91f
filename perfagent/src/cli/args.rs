//! CLI argument definitions

use clap::Parser;
use perfagent_common::{
    COMMAND_INTERVAL_MS, DEFAULT_HOST, DEFAULT_PORT, NUM_CLIENTS, POLL_INTERVAL_MS,
};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{CommandInput, ServerConfig};
use crate::domain::Pid;

#[derive(Parser, Debug)]
#[command(
    name = "perfagent",
    about = "Multiplex profiling telemetry to network observers",
    after_help = "\
EXAMPLES:
    perfagent                                   Listen on port 9003, log to logs.txt
    perfagent 9100 --interactive                Take commands from stdin as well
    perfagent --commands session.json           Replay a command file every 3s
    perfagent --sampler-pid 1234                Sample PID 1234 on {\"functionality\":\"perf\"}"
)]
pub struct ServerArgs {
    /// TCP port to listen on
    #[arg(value_name = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// JSON array of commands to replay
    #[arg(short, long, value_name = "FILE", conflicts_with = "interactive")]
    pub commands: Option<PathBuf>,

    /// Read operator commands from stdin
    #[arg(short, long)]
    pub interactive: bool,

    /// Telemetry log file
    #[arg(long, value_name = "FILE", default_value = "logs.txt")]
    pub log_file: PathBuf,

    /// Do not write a telemetry log
    #[arg(long, conflicts_with = "log_file")]
    pub no_log: bool,

    /// Maximum number of connected clients
    #[arg(long, default_value_t = NUM_CLIENTS)]
    pub max_clients: usize,

    /// Poll timeout in milliseconds
    #[arg(long, default_value_t = POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// Countdown between scripted commands in milliseconds
    #[arg(long, default_value_t = COMMAND_INTERVAL_MS)]
    pub command_interval_ms: u64,

    /// Sampling profiler binary
    #[arg(long, value_name = "PATH", default_value = "/usr/bin/perf")]
    pub sampler: PathBuf,

    /// Process to sample (defaults to the server itself)
    #[arg(long, value_name = "PID")]
    pub sampler_pid: Option<u32>,

    /// Directory for sampler data files
    #[arg(long, value_name = "DIR")]
    pub session_dir: Option<PathBuf>,

    /// Skip non-essential preflight warnings
    #[arg(short, long)]
    pub quiet: bool,
}

impl ServerArgs {
    /// Server settings described by these arguments
    #[must_use]
    pub fn to_config(&self) -> ServerConfig {
        let commands = match (&self.commands, self.interactive) {
            (Some(path), _) => CommandInput::Script(path.clone()),
            (None, true) => CommandInput::Interactive,
            (None, false) => CommandInput::None,
        };
        let defaults = ServerConfig::default();
        ServerConfig {
            port: self.port,
            max_clients: self.max_clients,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            command_interval: Duration::from_millis(self.command_interval_ms),
            commands,
            log_file: (!self.no_log).then(|| self.log_file.clone()),
            sampler: Some(self.sampler.clone()),
            sampler_target: self.sampler_pid.map_or(defaults.sampler_target, Pid),
            session_dir: self.session_dir.clone().unwrap_or_else(|| defaults.session_dir.clone()),
            ..defaults
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "perfagent-client",
    about = "Send commands to a perfagent server and print its telemetry"
)]
pub struct ClientArgs {
    /// Server host
    #[arg(value_name = "HOSTNAME", default_value = DEFAULT_HOST)]
    pub hostname: String,

    /// Server port
    #[arg(value_name = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Only print telemetry; do not read commands from stdin
    #[arg(short, long)]
    pub listen_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let args = ServerArgs::parse_from(["perfagent"]);
        let config = args.to_config();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.max_clients, NUM_CLIENTS);
        assert_eq!(config.commands, CommandInput::None);
        assert_eq!(config.log_file, Some(PathBuf::from("logs.txt")));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.sampler_target, Pid::current());
    }

    #[test]
    fn test_script_and_interactive_conflict() {
        let result =
            ServerArgs::try_parse_from(["perfagent", "--commands", "c.json", "--interactive"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_server_overrides() {
        let args = ServerArgs::parse_from([
            "perfagent",
            "9100",
            "--commands",
            "c.json",
            "--no-log",
            "--sampler-pid",
            "42",
        ]);
        let config = args.to_config();
        assert_eq!(config.port, 9100);
        assert_eq!(config.commands, CommandInput::Script(PathBuf::from("c.json")));
        assert_eq!(config.log_file, None);
        assert_eq!(config.sampler_target, Pid(42));
    }

    #[test]
    fn test_client_positionals() {
        let args = ClientArgs::parse_from(["perfagent-client"]);
        assert_eq!(args.hostname, "localhost");
        assert_eq!(args.port, 9003);

        let args = ClientArgs::parse_from(["perfagent-client", "example.org", "9100", "-l"]);
        assert_eq!(args.hostname, "example.org");
        assert_eq!(args.port, 9100);
        assert!(args.listen_only);
    }
}
