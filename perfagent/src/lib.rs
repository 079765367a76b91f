//! # perfagent - Profiling Telemetry Multiplexer
//!
//! perfagent sits between in-process instrumentation producers and any
//! number of network observers. Producers ask a per-category sampling gate
//! whether an event should carry detail and publish JSON records; the server
//! fans every record out to all connected clients and appends it to a
//! durable JSON-array log. Operators steer the producers with small JSON
//! commands sent over the network, typed on stdin, or replayed from a file.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Host Runtime (producer threads)                │
//! │        Probe::sample ──▶ SampleGate      Probe::record_event    │
//! └───────────────────────┬─────────────────────────────┬───────────┘
//!                         │ gate reads (atomics)        │ records
//!                         ▼                             ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Server (this crate)                        │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │ GateRegistry │◀──│   Dispatch   │   │  broadcast   │──▶ log  │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘         │
//! │                            ▲                  │                 │
//! │  ┌──────────────┐   ┌──────┴───────┐          ▼                 │
//! │  │ CommandSource│──▶│  poll loop   │◀──▶ NetworkClients          │
//! │  └──────────────┘   └──────┬───────┘                            │
//! │                            │ serverStart / serverStop           │
//! │                            ▼                                    │
//! │                     ┌──────────────┐                            │
//! │                     │   Session    │── perf record / script     │
//! │                     └──────────────┘                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`server`]: the poll loop, the client roster, command dispatch and the
//!   cloneable [`server::ServerHandle`] producers publish through
//! - [`net`]: `poll(2)` wrapper and the per-connection [`net::NetworkClient`]
//! - [`command`]: interactive and scripted command sources
//! - [`log_sink`]: the append-only JSON-array log
//! - [`session`]: the background sampling session and its report parser
//! - [`probe`]: producer-side helper binding a category to its gate
//! - [`client`]: the operator client used by `perfagent-client`
//! - [`cli`], [`config`], [`preflight`]: binary plumbing
//! - [`domain`]: newtypes, lifecycle states and error types
//!
//! Gate types and the command wire format live in `perfagent_common`.
//!
//! ## Typical Usage
//!
//! ```bash
//! # Start the server, replaying a command file
//! perfagent --commands session.json
//!
//! # Watch telemetry and type commands
//! perfagent-client localhost 9003
//! {"functionality":"methodEntryEvents","command":"start","sampleRate":3}
//! ```

pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod domain;
pub mod log_sink;
pub mod net;
pub mod preflight;
pub mod probe;
pub mod server;
pub mod session;
pub mod telemetry;
