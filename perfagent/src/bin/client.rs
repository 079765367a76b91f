//! # perfagent-client - Operator Client
//!
//! `perfagent-client [HOSTNAME] [PORT] [--listen-only]`

use anyhow::{Context, Result};
use clap::Parser;

use perfagent::cli::ClientArgs;
use perfagent::client::{self, SessionEnd};
use perfagent::net::unbuffered_stdin;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

fn run() -> Result<()> {
    let args = ClientArgs::parse();
    let stream = client::connect(&args.hostname, args.port)
        .with_context(|| format!("Failed to connect to {}:{}", args.hostname, args.port))?;

    let input = if args.listen_only {
        None
    } else {
        Some(unbuffered_stdin().context("Failed to read standard input")?)
    };
    let mut stdout = std::io::stdout().lock();
    match client::run(&stream, input, &mut stdout).context("Connection failed")? {
        SessionEnd::Done => {}
        SessionEnd::ServerClosed => eprintln!("Server closed the connection"),
    }
    Ok(())
}
