//! # perfagent - Main Entry Point
//!
//! Parses arguments, runs preflight checks, then runs the server loop on
//! the main thread until Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use perfagent::cli::ServerArgs;
use perfagent::domain::Pid;
use perfagent::preflight::{check_process_exists, run_preflight_checks};
use perfagent::server::Server;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = err.to_string().to_lowercase();
    if msg.contains("not found") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

fn run() -> Result<()> {
    let args = ServerArgs::parse();
    if let Some(pid) = args.sampler_pid {
        check_process_exists(Pid(pid))?;
    }

    let mut config = args.to_config();
    run_preflight_checks(&mut config, args.quiet);

    let mut server = Server::new(config).context("Failed to start server")?;
    let handle = server.handle();
    ctrlc::set_handler(move || {
        info!("Interrupted, shutting down");
        handle.shutdown();
    })
    .context("Failed to set Ctrl+C handler")?;

    server.run().context("Server loop failed")?;
    Ok(())
}
