//! Synthetic producer load
//!
//! Runs a server with one producer thread per category emitting fake
//! host-runtime events, so the command surface can be exercised with
//! `perfagent-client` without a real runtime attached.
//!
//! ```bash
//! RUST_LOG=info cargo run --example synthetic-load -- 9003
//! perfagent-client localhost 9003
//! {"functionality":"exceptionEvents","command":"start","sampleRate":10}
//! ```

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use perfagent::config::ServerConfig;
use perfagent::probe::Probe;
use perfagent::server::Server;
use perfagent::telemetry::TelemetryRecord;
use perfagent_common::{CATEGORIES, DEFAULT_PORT};
use serde_json::json;

#[derive(Parser)]
struct Args {
    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Events per second per category
    #[arg(long, default_value_t = 50)]
    rate: u64,
}

fn produce(probe: &Probe, period: Duration) {
    let mut seq: u64 = 0;
    loop {
        thread::sleep(period);
        seq += 1;
        if !probe.is_active() {
            continue;
        }
        let mut fields = TelemetryRecord::new();
        fields.insert("event".to_string(), json!(seq));
        if let Some(sample) = probe.sample() {
            fields.insert("sample".to_string(), json!(sample));
            fields.insert("stackTrace".to_string(), json!(["main", "run", "work"]));
        }
        probe.record_event(fields);
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = ServerConfig { port: args.port, ..ServerConfig::default() };
    let mut server = Server::new(config).context("Failed to start server")?;
    let handle = server.handle();

    let period = Duration::from_millis(1000 / args.rate.max(1));
    for category in CATEGORIES {
        let probe = Probe::new(handle.clone(), category);
        thread::Builder::new()
            .name(format!("producer-{category}"))
            .spawn(move || produce(&probe, period))?;
    }

    ctrlc::set_handler(move || handle.shutdown()).context("Failed to set Ctrl+C handler")?;
    server.run()?;
    Ok(())
}
