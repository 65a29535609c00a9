//! SessionManager: owns the single session and drives discovery around it.
//!
//! The manager is the only owner of the connection state.  Everything that
//! happens to the session arrives as a call on this type, always from the
//! one event-loop task:
//!
//! - collaborator operations (`connect`, `find_server`, property setters)
//! - discovery datagrams and the discovery deadline
//! - transport events (connected, disconnected, error, text frame)
//!
//! Nothing here awaits.  Sockets and the WebSocket connection sit behind the
//! [`ProbeSocketPool`] and [`SessionTransport`] seams, which only *start*
//! work; the results come back later as further calls.
//!
//! # Recovery
//!
//! A lost connection is never left idle.  On a transport disconnect or error
//! the manager clears the known server URL and starts a fresh discovery cycle
//! straight away (the pool is rebuilt and the attempt counter starts at 0).
//! A disconnect requested by a collaborator does *not* rediscover.

use std::sync::Arc;

use hotwatch_core::domain::url_from_host;
use hotwatch_core::protocol::discovery::PROBE_PAYLOAD;
use hotwatch_core::{ConnectionState, EndpointError, PathMapping, ServerEndpoint};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use super::discovery_scheduler::{
    DiscoveryConfig, DiscoveryError, DiscoveryScheduler, TimeoutOutcome,
};
use super::message_router::{CacheInvalidator, MessageRouter, RoutedFrame};

/// Capacity of the collaborator event channel.  Slow subscribers lag rather
/// than block the event loop.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// ── Seams ─────────────────────────────────────────────────────────────────────

/// The set of UDP sockets discovery probes go out on.
///
/// Implementations deliver inbound datagrams back to the event loop on their
/// own; this trait only covers what the manager triggers.
#[cfg_attr(test, mockall::automock)]
pub trait ProbeSocketPool: Send {
    /// Closes every socket, re-enumerates interfaces and binds afresh.
    ///
    /// Returns the number of sockets in the new pool.
    fn rebuild(&mut self) -> usize;

    /// Sends `payload` from every socket to its broadcast targets on `port`.
    ///
    /// Returns the number of successful sends.
    fn broadcast(&mut self, payload: &[u8], port: u16) -> usize;
}

/// The persistent text-frame connection to the server.
#[cfg_attr(test, mockall::automock)]
pub trait SessionTransport: Send {
    /// Starts connecting to `url`, closing any previous connection first.
    fn open(&mut self, url: &Url);

    /// Closes the connection.  Events from the closed connection are stale
    /// from this point on.
    fn close(&mut self);

    /// Queues a text frame.  Returns `false` when no connection can take it.
    fn send_text(&mut self, frame: String) -> bool;

    /// `true` when no connection is open or opening.
    fn is_unconnected(&self) -> bool;

    /// Identifier of the current connection attempt.
    fn generation(&self) -> u64;
}

/// What happened on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    Connected,
    Disconnected,
    Error(String),
    Text(String),
}

/// A transport event tagged with the connection attempt it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub generation: u64,
    pub kind: TransportEventKind,
}

// ── Observable surface ────────────────────────────────────────────────────────

/// Change notifications for collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    ServerUrlChanged(String),
    ConnectedChanged(bool),
    /// A watched source changed; carries the local path.  The component
    /// cache is already invalidated when this is delivered.
    FileChanged(String),
    Error(String),
    SourceFileChanged,
    DefaultHostChanged,
}

/// Read-only view of the session properties.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    /// Base URL of the server; empty when unknown.
    pub server_url: String,
    pub connected: bool,
    pub source_file: String,
    pub default_host: String,
    pub watch_dir: String,
    pub state: ConnectionState,
}

/// Initial values of the writable properties.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSettings {
    pub server_url: String,
    pub default_host: String,
    pub watch_dir: String,
    pub source_file: String,
}

/// Errors surfaced to collaborators as [`ClientEvent::Error`].
///
/// None of them is fatal; the manager keeps running after reporting one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No usable server URL.
    #[error(transparent)]
    Configuration(#[from] EndpointError),

    /// Discovery could not send or gave up.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// The transport reported an error; carries its text.
    #[error("{0}")]
    Transport(String),
}

// ── SessionManager ────────────────────────────────────────────────────────────

/// Owner of the session state.  See the module docs.
pub struct SessionManager {
    pool: Box<dyn ProbeSocketPool>,
    transport: Box<dyn SessionTransport>,
    router: MessageRouter,
    scheduler: DiscoveryScheduler,
    endpoint: Option<ServerEndpoint>,
    snapshot: SessionSnapshot,
    events: broadcast::Sender<ClientEvent>,
    state_tx: watch::Sender<SessionSnapshot>,
}

impl SessionManager {
    /// Creates an idle manager.  Nothing is started until a collaborator
    /// calls an operation.
    pub fn new(
        settings: SessionSettings,
        discovery: DiscoveryConfig,
        pool: Box<dyn ProbeSocketPool>,
        transport: Box<dyn SessionTransport>,
        invalidator: Arc<dyn CacheInvalidator>,
    ) -> Self {
        let paths = PathMapping::new(settings.watch_dir);
        let snapshot = SessionSnapshot {
            server_url: settings.server_url,
            connected: false,
            source_file: settings.source_file,
            default_host: settings.default_host,
            watch_dir: paths.watch_root().to_string(),
            state: ConnectionState::Idle,
        };
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, _) = watch::channel(snapshot.clone());

        Self {
            pool,
            transport,
            router: MessageRouter::new(paths, invalidator),
            scheduler: DiscoveryScheduler::new(discovery),
            endpoint: None,
            snapshot,
            events,
            state_tx,
        }
    }

    // ── Observation ──────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot.state
    }

    pub fn scheduler(&self) -> &DiscoveryScheduler {
        &self.scheduler
    }

    pub fn paths(&self) -> &PathMapping {
        self.router.paths()
    }

    /// The endpoint of the current or pending connection.
    pub fn endpoint(&self) -> Option<&ServerEndpoint> {
        self.endpoint.as_ref()
    }

    /// When the event loop must call [`Self::on_discovery_timeout`].
    pub fn discovery_deadline(&self) -> Option<Instant> {
        self.scheduler.deadline()
    }

    /// A sender collaborators can subscribe to for [`ClientEvent`]s.
    pub fn event_sender(&self) -> broadcast::Sender<ClientEvent> {
        self.events.clone()
    }

    /// A receiver that always holds the latest [`SessionSnapshot`].
    pub fn watch_snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.state_tx.subscribe()
    }

    // ── Collaborator operations ──────────────────────────────────────────────

    /// Opens the session to the current server URL.
    pub fn connect(&mut self) {
        let endpoint = match ServerEndpoint::parse(&self.snapshot.server_url) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.report(SessionError::from(e));
                return;
            }
        };

        if self.scheduler.is_active() {
            debug!("abandoning discovery round for {}", endpoint.base_url());
        }
        self.scheduler.reset();

        info!("connecting to {}", endpoint.session_url());
        self.mark_connected(false);
        self.set_state(ConnectionState::Connecting);
        self.transport.open(endpoint.session_url());
        self.endpoint = Some(endpoint);
    }

    /// Closes the session and ends any discovery round without starting
    /// another.
    pub fn disconnect(&mut self) {
        debug!("closing session");
        self.scheduler.reset();
        self.transport.close();
        self.mark_connected(false);
        self.set_state(ConnectionState::Idle);
    }

    /// Starts a fresh discovery cycle.
    pub fn find_server(&mut self) {
        self.start_discovery_cycle();
    }

    /// Invalidates the component cache.
    pub fn clear_cache(&self) {
        self.router.clear_cache();
    }

    /// Re-establishes the session from the current properties.
    ///
    /// In order of preference: the server URL, the default host, discovery.
    pub fn update_connection(&mut self) {
        if self.snapshot.connected || self.snapshot.state == ConnectionState::Connecting {
            self.disconnect();
        }

        if !self.snapshot.server_url.is_empty() {
            self.connect();
        } else if !self.snapshot.default_host.is_empty() {
            let url = url_from_host(&self.snapshot.default_host);
            info!("using default host {url}");
            self.set_server_url(url);
        } else {
            self.start_discovery_cycle();
        }
    }

    pub fn set_server_url(&mut self, url: impl Into<String>) {
        let url = url.into();
        if url == self.snapshot.server_url {
            return;
        }
        info!("server URL set to {url:?}");
        self.snapshot.server_url = url.clone();
        self.endpoint = None;
        self.emit(ClientEvent::ServerUrlChanged(url));
        self.update_connection();
    }

    pub fn set_default_host(&mut self, host: impl Into<String>) {
        let host = host.into();
        if host == self.snapshot.default_host {
            return;
        }
        info!("default host set to {host:?}");
        self.snapshot.default_host = host;
        self.emit(ClientEvent::DefaultHostChanged);
        self.update_connection();
    }

    pub fn set_source_file(&mut self, file: impl Into<String>) {
        let file = file.into();
        if file == self.snapshot.source_file {
            return;
        }
        debug!("source file set to {file:?}");
        self.snapshot.source_file = file;
        self.emit(ClientEvent::SourceFileChanged);
    }

    /// Sends a formatted log record to the server.
    ///
    /// Dropped when not connected.  Must not log: this runs on the path of
    /// every forwarded record.
    pub fn send_diagnostic(&mut self, record: &str) {
        if !self.snapshot.connected {
            return;
        }
        if let Some(frame) = self.router.diagnostic_frame(record) {
            self.transport.send_text(frame);
        }
    }

    /// Closes the transport and abandons discovery.  Called when the event
    /// loop stops.
    pub fn shutdown(&mut self) {
        info!("session shutting down");
        self.disconnect();
    }

    // ── Discovery ────────────────────────────────────────────────────────────

    /// Handles expiry of the discovery deadline.
    pub fn on_discovery_timeout(&mut self) {
        match self.scheduler.on_timeout() {
            TimeoutOutcome::Retry { attempt } => {
                info!(
                    "no server answered; discovery attempt {attempt}/{}",
                    self.scheduler.config().max_attempts
                );
                self.broadcast_discovery();
            }
            TimeoutOutcome::Exhausted(e) => {
                self.set_state(ConnectionState::Idle);
                self.report(SessionError::from(e));
            }
            TimeoutOutcome::Ignored => {}
        }
    }

    /// Handles a datagram received on any pooled socket.
    pub fn on_datagram(&mut self, from: std::net::SocketAddr, payload: &[u8]) {
        if let Some(url) = self.scheduler.on_datagram(payload) {
            info!("server {url} answered from {from}");
            self.resolve(url);
        }
    }

    fn start_discovery_cycle(&mut self) {
        info!("discovering server");
        self.scheduler.reset();
        let bound = self.pool.rebuild();
        debug!("discovery pool holds {bound} socket(s)");
        self.set_state(ConnectionState::Discovering);
        self.broadcast_discovery();
    }

    fn broadcast_discovery(&mut self) {
        self.scheduler.begin_broadcast();
        let port = self.scheduler.config().port;
        let sent = self.pool.broadcast(PROBE_PAYLOAD, port);

        match self.scheduler.broadcast_sent(sent, Instant::now()) {
            Ok(_) => debug!("sent {sent} discovery probe(s) to port {port}"),
            Err(e) => {
                self.set_state(ConnectionState::Idle);
                self.report(SessionError::from(e));
            }
        }
    }

    fn resolve(&mut self, url: String) {
        if url == self.snapshot.server_url {
            if !self.snapshot.connected {
                self.connect();
            }
        } else {
            self.set_server_url(url);
        }
    }

    // ── Transport ────────────────────────────────────────────────────────────

    /// Handles an event from the transport.  Events from a closed connection
    /// are dropped.
    pub fn on_transport_event(&mut self, event: TransportEvent) {
        let current = self.transport.generation();
        if event.generation != current {
            debug!(
                "dropping transport event from connection {} (current {current})",
                event.generation
            );
            return;
        }

        match event.kind {
            TransportEventKind::Connected => self.on_connected(),
            TransportEventKind::Disconnected => {
                info!("session disconnected");
                self.on_connection_lost();
            }
            TransportEventKind::Error(message) => {
                warn!("session error: {message}");
                self.report(SessionError::Transport(message));
                if !self.transport.is_unconnected() {
                    self.transport.close();
                }
                self.on_connection_lost();
            }
            TransportEventKind::Text(frame) => {
                if let RoutedFrame::FileChanged { local_path } = self.router.route(&frame) {
                    self.emit(ClientEvent::FileChanged(local_path));
                }
            }
        }
    }

    fn on_connected(&mut self) {
        match &self.endpoint {
            Some(endpoint) => info!("session open to {}", endpoint.session_url()),
            None => info!("session open"),
        }
        self.set_state(ConnectionState::Connected);
        self.mark_connected(true);

        if let Some(frame) = self.router.handshake_frame() {
            if !self.transport.send_text(frame) {
                warn!("failed to send handshake");
            }
        }
    }

    fn on_connection_lost(&mut self) {
        self.mark_connected(false);
        self.set_state(ConnectionState::Disconnected);
        self.endpoint = None;
        if !self.snapshot.server_url.is_empty() {
            self.snapshot.server_url.clear();
            self.emit(ClientEvent::ServerUrlChanged(String::new()));
        }
        self.start_discovery_cycle();
    }

    // ── State publication ────────────────────────────────────────────────────

    fn set_state(&mut self, state: ConnectionState) {
        if self.snapshot.state == state {
            return;
        }
        debug!("session state {} -> {state}", self.snapshot.state);
        self.snapshot.state = state;
        self.publish();
    }

    fn mark_connected(&mut self, connected: bool) {
        if self.snapshot.connected == connected {
            return;
        }
        self.snapshot.connected = connected;
        self.emit(ClientEvent::ConnectedChanged(connected));
    }

    fn report(&self, error: SessionError) {
        warn!("{error}");
        self.emit(ClientEvent::Error(error.to_string()));
    }

    /// Publishes the snapshot first so subscribers reacting to `event` read
    /// the new values.
    fn emit(&self, event: ClientEvent) {
        self.publish();
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.snapshot.clone());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
