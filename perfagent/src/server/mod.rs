//! # Multiplexing Server
//!
//! One thread runs a `poll(2)` loop over the listening socket, every
//! connected client, the command source and a wake descriptor. Everything
//! else talks to the server through a cloneable [`ServerHandle`]:
//!
//! ```text
//!  producers ──publish──▶ ServerHandle::broadcast ──▶ every client + LogSink
//!                                 ▲
//!  clients / stdin / script ──▶ handle_client_command ──▶ log ─▶ parse ─▶ dispatch
//!                                                                    │
//!                                     GateRegistry ◀─────────────────┤
//!                                     SessionHandle ◀────────────────┘
//! ```
//!
//! Locks are never held across socket I/O except a client's own write lock,
//! which keeps concurrent broadcasts from interleaving on one connection.

pub mod dispatch;
pub mod roster;

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use perfagent_common::{Action, Command, GateRegistry, ProducerControl};
use serde_json::Value;

use crate::command::{CommandSource, InteractiveSource, ScriptedSource, SourceMessage, TickClock};
use crate::config::{CommandInput, ServerConfig};
use crate::domain::{DispatchError, Pid, ServerError, ServerState};
use crate::log_sink::LogSink;
use crate::net::{NetworkClient, PollSet};
use crate::session::{PerfSampler, Sampler, SessionHandle, SessionParams};
use crate::telemetry::TelemetrySink;

pub use roster::Roster;

/// Source tag of records produced by the agent itself
pub const AGENT_SOURCE: &str = "agent";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the loop, producers and the session thread
struct Shared {
    gates: GateRegistry,
    roster: Mutex<Roster>,
    listener: Mutex<Option<TcpListener>>,
    log: Mutex<Option<LogSink>>,
    session: Mutex<Option<SessionHandle>>,
    sampler: Option<Arc<dyn Sampler>>,
    sampler_target: Pid,
    terminate_grace: Duration,
    state: Mutex<ServerState>,
    terminating: AtomicBool,
    waker: UnixStream,
}

impl Shared {
    /// Once shutdown has begun only `ShuttingDown` and `Closed` are accepted,
    /// so a loop iteration racing the shutdown cannot revive the state.
    fn set_state(&self, state: ServerState) {
        let mut current = lock(&self.state);
        if self.terminating.load(Ordering::Acquire)
            && !matches!(state, ServerState::ShuttingDown | ServerState::Closed)
        {
            return;
        }
        if *current != state {
            debug!("Server {} -> {state}", *current);
            *current = state;
        }
    }

    fn append_log(&self, body: Value, from: &str) {
        if let Some(log) = lock(&self.log).as_mut() {
            if let Err(e) = log.append_value(body, from) {
                warn!("Failed to append to {}: {e}", log.path().display());
            }
        }
    }

    fn wake(&self) {
        // A full socket buffer already guarantees a pending wakeup
        let _ = (&self.waker).write(&[1]);
    }
}

/// Cloneable reference to a running server
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl ServerHandle {
    /// Send one record to every connected client and the log
    ///
    /// The record is serialized once and written newline-terminated under
    /// each client's write lock. Clients whose write fails are evicted on
    /// the next loop iteration. No-op once shutdown has begun.
    pub fn broadcast(&self, record: &Value) {
        if self.is_terminating() {
            return;
        }

        let mut payload = match serde_json::to_vec(record) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Dropping unserializable record: {e}");
                return;
            }
        };
        payload.push(b'\n');

        let clients = lock(&self.shared.roster).snapshot();
        for client in clients {
            if let Err(e) = client.send(&payload) {
                debug!("Write to {} failed: {e}", client.id());
            }
        }

        self.shared.append_log(record.clone(), AGENT_SOURCE);
    }

    /// Log, parse and dispatch one raw command message
    ///
    /// The raw text is logged before it is parsed, so malformed input still
    /// leaves a trace in the log.
    ///
    /// # Errors
    /// Returns the reason the command had no effect; it has already been
    /// reported.
    pub fn handle_client_command(&self, text: &str, from: &str) -> Result<(), DispatchError> {
        let body =
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()));
        self.shared.append_log(body, from);

        let result = Command::parse(text).map_err(DispatchError::from).and_then(|c| self.dispatch(&c));
        if let Err(e) = &result {
            warn!("{from}: {e}");
        }
        result
    }

    /// Log and dispatch a command that was parsed by its source
    ///
    /// # Errors
    /// Returns the reason the command had no effect; it has already been
    /// reported.
    pub fn handle_command(&self, command: &Command, from: &str) -> Result<(), DispatchError> {
        match serde_json::to_value(command.to_message()) {
            Ok(body) => self.shared.append_log(body, from),
            Err(e) => warn!("{from}: failed to log command: {e}"),
        }

        let result = self.dispatch(command);
        if let Err(e) = &result {
            warn!("{from}: {e}");
        }
        result
    }

    /// Apply a parsed command
    ///
    /// # Errors
    /// Returns the reason the command had no effect.
    pub fn dispatch(&self, command: &Command) -> Result<(), DispatchError> {
        if self.is_terminating() {
            return Err(DispatchError::ShuttingDown);
        }
        match command.action {
            Action::ServerStart { duration } => self.start_session(duration),
            Action::ServerStop => self.stop_session(),
            Action::Start | Action::Stop | Action::Configure => {
                dispatch::apply(&self.shared.gates, command)?;
                info!(
                    "{} {:?}{}",
                    command.category,
                    command.action,
                    command.rate.map(|r| format!(" (rate {r})")).unwrap_or_default()
                );
                Ok(())
            }
        }
    }

    fn start_session(&self, duration: Duration) -> Result<(), DispatchError> {
        let sampler = self.shared.sampler.clone().ok_or(DispatchError::SamplerUnavailable)?;

        let mut slot = lock(&self.shared.session);
        if let Some(previous) = slot.take() {
            if !previous.is_finished() {
                *slot = Some(previous);
                return Err(DispatchError::SessionActive);
            }
            debug!("Previous sampling session ended: {:?}", previous.join());
        }

        let params = SessionParams {
            target: self.shared.sampler_target,
            duration,
            terminate_grace: self.shared.terminate_grace,
        };
        let sink: Arc<dyn TelemetrySink> = Arc::new(self.clone());
        let session =
            SessionHandle::spawn(sampler, params, sink).map_err(DispatchError::SessionSpawn)?;
        *slot = Some(session);
        info!("Sampling session started for {duration:?}");
        Ok(())
    }

    fn stop_session(&self) -> Result<(), DispatchError> {
        let session = lock(&self.shared.session).take().ok_or(DispatchError::NoSession)?;
        info!("Sampling session stopped: {:?}", session.stop());
        Ok(())
    }

    /// The gates producers consult
    #[must_use]
    pub fn gates(&self) -> &GateRegistry {
        &self.shared.gates
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        *lock(&self.shared.state)
    }

    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.shared.terminating.load(Ordering::Acquire)
    }

    /// Number of connected clients
    #[must_use]
    pub fn client_count(&self) -> usize {
        lock(&self.shared.roster).snapshot().len()
    }

    /// Whether a sampling session is in flight
    #[must_use]
    pub fn session_running(&self) -> bool {
        lock(&self.shared.session).as_ref().is_some_and(|s| !s.is_finished())
    }

    /// Stop the server; idempotent and callable from any thread
    ///
    /// Closes every client, terminates the log array (waiting out any
    /// in-flight append), cancels the sampling session and closes the
    /// listener. Producers may keep publishing; their records are dropped.
    pub fn shutdown(&self) {
        if self.shared.terminating.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.set_state(ServerState::ShuttingDown);
        self.shared.wake();

        for client in lock(&self.shared.roster).drain() {
            client.close();
        }

        let log = lock(&self.shared.log).take();
        if let Some(log) = log {
            let path = log.path().to_path_buf();
            match log.close() {
                Ok(()) => info!("Log written to {}", path.display()),
                Err(e) => warn!("Failed to close {}: {e}", path.display()),
            }
        }

        let session = lock(&self.shared.session).take();
        if let Some(session) = session {
            info!("Sampling session cancelled: {:?}", session.stop());
        }

        drop(lock(&self.shared.listener).take());
        self.shared.set_state(ServerState::Closed);
        info!("Server closed");
    }
}

impl TelemetrySink for ServerHandle {
    fn publish(&self, record: &Value) {
        self.broadcast(record);
    }
}

impl ProducerControl for ServerHandle {
    fn set_enabled(&self, category: &str, enabled: bool) -> bool {
        self.shared.gates.set_enabled(category, enabled)
    }

    fn set_rate(&self, category: &str, rate: i64) -> bool {
        self.shared.gates.set_rate(category, rate)
    }
}

/// The server and its poll loop
pub struct Server {
    handle: ServerHandle,
    local_addr: SocketAddr,
    source: Option<Box<dyn CommandSource>>,
    poll_interval: Duration,
    wake_rx: UnixStream,
}

impl Server {
    /// Bind the listener and set up the log, command source and sampler
    ///
    /// The log file and command file are optional features: if either
    /// cannot be opened the server starts without it.
    ///
    /// # Errors
    /// Returns [`ServerError::Bind`] if the port cannot be bound.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let sampler = config.sampler.as_ref().map(|program| {
            Arc::new(PerfSampler::new(program, &config.session_dir)) as Arc<dyn Sampler>
        });
        Self::build(config, sampler)
    }

    /// Like [`Server::new`], with `sampler` serving `serverStart` commands
    /// in place of the one named by the configuration
    ///
    /// # Errors
    /// Returns [`ServerError::Bind`] if the port cannot be bound.
    pub fn with_sampler(config: ServerConfig, sampler: Arc<dyn Sampler>) -> Result<Self, ServerError> {
        Self::build(config, Some(sampler))
    }

    fn build(config: ServerConfig, sampler: Option<Arc<dyn Sampler>>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind((config.bind_address, config.port))
            .map_err(|source| ServerError::Bind { port: config.port, source })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let (wake_rx, waker) = UnixStream::pair()?;
        wake_rx.set_nonblocking(true)?;
        waker.set_nonblocking(true)?;

        let log = config.log_file.as_ref().and_then(|path| match LogSink::create(path) {
            Ok(log) => Some(log),
            Err(e) => {
                warn!("{e}; continuing without a log");
                None
            }
        });

        let source: Option<Box<dyn CommandSource>> = match &config.commands {
            CommandInput::None => None,
            CommandInput::Interactive => match InteractiveSource::stdin() {
                Ok(stdin) => Some(Box::new(stdin)),
                Err(e) => {
                    warn!("Cannot read standard input ({e}); continuing without interactive commands");
                    None
                }
            },
            CommandInput::Script(path) => {
                let clock = TickClock::new(config.command_interval, config.poll_interval);
                match ScriptedSource::load(path, clock) {
                    Ok(script) => Some(Box::new(script)),
                    Err(e) => {
                        warn!("{e}; continuing without scripted commands");
                        None
                    }
                }
            }
        };

        let shared = Shared {
            gates: GateRegistry::new(),
            roster: Mutex::new(Roster::with_capacity(config.max_clients)),
            listener: Mutex::new(Some(listener)),
            log: Mutex::new(log),
            session: Mutex::new(None),
            sampler,
            sampler_target: config.sampler_target,
            terminate_grace: config.terminate_grace,
            state: Mutex::new(ServerState::Created),
            terminating: AtomicBool::new(false),
            waker,
        };
        shared.set_state(ServerState::Listening);
        info!("Listening on {local_addr} ({} client slots)", config.max_clients);

        Ok(Self {
            handle: ServerHandle { shared: Arc::new(shared) },
            local_addr,
            source,
            poll_interval: config.poll_interval,
            wake_rx,
        })
    }

    /// Replace the command source chosen from the configuration
    #[must_use]
    pub fn with_command_source(mut self, source: Box<dyn CommandSource>) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        self.handle.state()
    }

    /// Run the loop until [`ServerHandle::shutdown`] is called
    ///
    /// Shuts the server down on the way out, including on error.
    ///
    /// # Errors
    /// Returns an error if `poll()` fails.
    pub fn run(&mut self) -> Result<(), ServerError> {
        let result = self.serve();
        self.handle.shutdown();
        result
    }

    fn serve(&mut self) -> Result<(), ServerError> {
        let shared = Arc::clone(&self.handle.shared);
        let mut poll_set = PollSet::with_capacity(shared_capacity(&shared) + 3);
        let mut polled: Vec<(usize, Arc<NetworkClient>)> = Vec::new();

        while !self.handle.is_terminating() {
            for client in lock(&shared.roster).reap() {
                info!("{} disconnected", client.id());
                client.close();
            }

            let Some(listener_fd) = lock(&shared.listener).as_ref().map(AsRawFd::as_raw_fd) else {
                break;
            };

            poll_set.clear();
            polled.clear();
            let listener_idx = poll_set.register(listener_fd);
            let wake_idx = poll_set.register(self.wake_rx.as_raw_fd());
            for client in lock(&shared.roster).snapshot() {
                polled.push((poll_set.register(client.descriptor()), client));
            }
            let source_idx = self
                .source
                .as_ref()
                .and_then(|source| source.descriptor())
                .map(|fd: RawFd| poll_set.register(fd));

            shared.set_state(ServerState::Running);
            poll_set.wait(self.poll_interval)?;
            if self.handle.is_terminating() {
                break;
            }
            shared.set_state(ServerState::Dispatching);

            if poll_set.is_ready(wake_idx) {
                self.drain_wake();
            }
            if poll_set.is_ready(listener_idx) {
                self.accept_pending();
            }
            for (idx, client) in &polled {
                if poll_set.is_ready(*idx) {
                    self.service_client(client);
                }
            }
            let source_ready = source_idx.is_some_and(|idx| poll_set.is_ready(idx));
            self.poll_source(source_ready);
        }
        Ok(())
    }

    fn drain_wake(&self) {
        let mut buf = [0u8; 64];
        while matches!((&self.wake_rx).read(&mut buf), Ok(n) if n > 0) {}
    }

    /// Accept every pending connection
    ///
    /// A connection beyond capacity is accepted and closed at once, so the
    /// peer sees end of file instead of hanging in the backlog.
    fn accept_pending(&self) {
        let shared = &self.handle.shared;
        loop {
            let accepted = match lock(&shared.listener).as_ref() {
                Some(listener) => listener.accept(),
                None => return,
            };
            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("accept failed: {e}");
                    return;
                }
            };

            let mut roster = lock(&shared.roster);
            let slot = match roster.vacant() {
                Ok(slot) => slot,
                Err(e) => {
                    warn!("Rejecting {peer}: {e}");
                    continue;
                }
            };
            let inserted = NetworkClient::new(slot, stream)
                .map_err(|e| e.to_string())
                .and_then(|client| roster.insert(client).map_err(|e| e.to_string()));
            match inserted {
                Ok(client) => info!("{} connected from {peer}", client.id()),
                Err(e) => warn!("Rejecting {peer}: {e}"),
            }
        }
    }

    /// Handle one readable event on a client
    fn service_client(&self, client: &Arc<NetworkClient>) {
        match client.receive() {
            Ok(text) if text.is_empty() => {}
            Ok(text) => {
                let from = client.id().to_string();
                let _ = self.handle.handle_client_command(&text, &from);
            }
            Err(e) => {
                info!("{} disconnected: {e}", client.id());
                if let Ok(client) = lock(&self.handle.shared.roster).remove(client.id()) {
                    client.close();
                }
            }
        }
    }

    fn poll_source(&mut self, readable: bool) {
        let Some(source) = self.source.as_mut() else {
            return;
        };
        let Some(message) = source.poll(readable) else {
            return;
        };
        let from = source.label().to_string();
        let _ = match message {
            SourceMessage::Raw(text) => self.handle.handle_client_command(&text, &from),
            SourceMessage::Parsed(command) => self.handle.handle_command(&command, &from),
        };
    }
}

fn shared_capacity(shared: &Shared) -> usize {
    lock(&shared.roster).capacity()
}
