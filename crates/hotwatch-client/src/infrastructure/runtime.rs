//! The client's event loop and the handle collaborators hold.
//!
//! One task owns the [`SessionManager`] and waits on four sources at once:
//!
//! | Source              | Produced by                         | Handled by                          |
//! |---------------------|-------------------------------------|-------------------------------------|
//! | commands            | [`HotWatchClient`] methods          | the matching manager operation      |
//! | datagrams           | socket pool reader tasks            | `SessionManager::on_datagram`       |
//! | transport events    | the WebSocket connection task       | `SessionManager::on_transport_event`|
//! | discovery deadline  | the scheduler's armed timeout       | `SessionManager::on_discovery_timeout` |
//!
//! Handlers never await, so each event is processed to completion before the
//! next is looked at.  Run the loop on a `current_thread` runtime to keep
//! every task on one OS thread.
//!
//! The loop ends on [`HotWatchClient::shutdown`] or when every handle is
//! dropped; it then closes the session.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use hotwatch_core::{ConnectionState, PathMapping, ServerEndpoint};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::application::discovery_scheduler::DiscoveryConfig;
use crate::application::message_router::CacheInvalidator;
use crate::application::session_manager::{
    ClientEvent, SessionManager, SessionSettings, SessionSnapshot, TransportEvent,
};
use crate::infrastructure::diagnostics::DiagnosticSink;
use crate::infrastructure::network::session_transport::WsTransport;
use crate::infrastructure::network::socket_pool::{Datagram, DiscoverySocketPool};

/// Operations a [`HotWatchClient`] asks the loop to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect,
    Disconnect,
    FindServer,
    ClearCache,
    UpdateConnection,
    SetServerUrl(String),
    SetDefaultHost(String),
    SetSourceFile(String),
    SendDiagnostic(String),
    Shutdown,
}

/// Startup options for [`spawn_client`].
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub settings: SessionSettings,
    pub discovery: DiscoveryConfig,
    /// Run `update_connection` as soon as the loop starts.
    pub auto_start: bool,
}

/// Builds the UDP pool and WebSocket transport, then spawns the loop.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_client(
    options: ClientOptions,
    invalidator: Arc<dyn CacheInvalidator>,
) -> (HotWatchClient, JoinHandle<()>) {
    let (datagram_tx, datagram_rx) = mpsc::unbounded_channel();
    let (transport_tx, transport_rx) = mpsc::unbounded_channel();

    let manager = SessionManager::new(
        options.settings,
        options.discovery,
        Box::new(DiscoverySocketPool::new(datagram_tx)),
        Box::new(WsTransport::new(transport_tx)),
        invalidator,
    );
    EventLoop::new(manager, datagram_rx, transport_rx).spawn(options.auto_start)
}

// ── Event loop ────────────────────────────────────────────────────────────────

/// The single cooperative loop around a [`SessionManager`].
pub struct EventLoop {
    manager: SessionManager,
    datagrams: mpsc::UnboundedReceiver<Datagram>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl EventLoop {
    /// Wires a manager to the channels its pool and transport report on.
    pub fn new(
        manager: SessionManager,
        datagrams: mpsc::UnboundedReceiver<Datagram>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self {
            manager,
            datagrams,
            transport_events,
        }
    }

    /// Spawns the loop and returns a handle to it.
    pub fn spawn(self, auto_start: bool) -> (HotWatchClient, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let client = HotWatchClient {
            commands: command_tx,
            snapshot: self.manager.watch_snapshot(),
            events: self.manager.event_sender(),
        };
        let task = tokio::spawn(self.run(command_rx, auto_start));
        (client, task)
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, auto_start: bool) {
        info!("session loop started");
        if auto_start {
            self.manager.update_connection();
        }

        loop {
            let deadline = self.manager.discovery_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.dispatch(command),
                },
                Some(datagram) = self.datagrams.recv() => {
                    self.manager.on_datagram(datagram.from, &datagram.payload);
                }
                Some(event) = self.transport_events.recv() => {
                    self.manager.on_transport_event(event);
                }
                () = sleep_until(deadline) => self.manager.on_discovery_timeout(),
            }
        }

        self.manager.shutdown();
        info!("session loop stopped");
    }

    fn dispatch(&mut self, command: Command) {
        let m = &mut self.manager;
        match command {
            Command::Connect => m.connect(),
            Command::Disconnect => m.disconnect(),
            Command::FindServer => m.find_server(),
            Command::ClearCache => m.clear_cache(),
            Command::UpdateConnection => m.update_connection(),
            Command::SetServerUrl(url) => m.set_server_url(url),
            Command::SetDefaultHost(host) => m.set_default_host(host),
            Command::SetSourceFile(file) => m.set_source_file(file),
            Command::SendDiagnostic(record) => m.send_diagnostic(&record),
            Command::Shutdown => {}
        }
    }
}

/// Completes at `deadline`, or never when there is none.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Cloneable handle to a running session loop.
///
/// Operations are queued and run in order on the loop; property getters read
/// the latest published snapshot.
#[derive(Clone)]
pub struct HotWatchClient {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<ClientEvent>,
}

impl HotWatchClient {
    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("session loop has stopped; command dropped");
        }
    }

    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    pub fn find_server(&self) {
        self.send(Command::FindServer);
    }

    pub fn clear_cache(&self) {
        self.send(Command::ClearCache);
    }

    pub fn update_connection(&self) {
        self.send(Command::UpdateConnection);
    }

    pub fn set_server_url(&self, url: impl Into<String>) {
        self.send(Command::SetServerUrl(url.into()));
    }

    pub fn set_default_host(&self, host: impl Into<String>) {
        self.send(Command::SetDefaultHost(host.into()));
    }

    pub fn set_source_file(&self, file: impl Into<String>) {
        self.send(Command::SetSourceFile(file.into()));
    }

    /// Stops the loop.  The session is closed before the loop task ends.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    pub fn server_url(&self) -> String {
        self.snapshot.borrow().server_url.clone()
    }

    pub fn connected(&self) -> bool {
        self.snapshot.borrow().connected
    }

    pub fn watch_dir(&self) -> String {
        self.snapshot.borrow().watch_dir.clone()
    }

    pub fn source_file(&self) -> String {
        self.snapshot.borrow().source_file.clone()
    }

    pub fn default_host(&self) -> String {
        self.snapshot.borrow().default_host.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// A receiver notified on every property change.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// URL the viewer loads the source file from, with a fresh cache buster.
    ///
    /// `None` while the server URL or the source file is unknown.
    pub fn file_url(&self) -> Option<Url> {
        file_url_for(&self.snapshot(), epoch_millis())
    }
}

impl DiagnosticSink for HotWatchClient {
    fn is_connected(&self) -> bool {
        self.snapshot.borrow().connected
    }

    fn forward(&self, record: String) {
        // Silently dropped once the loop is gone.
        let _ = self.commands.send(Command::SendDiagnostic(record));
    }
}

/// Builds the source file URL for `snapshot`.
pub fn file_url_for(snapshot: &SessionSnapshot, cache_buster: u64) -> Option<Url> {
    if snapshot.server_url.is_empty() || snapshot.source_file.is_empty() {
        return None;
    }
    let endpoint = match ServerEndpoint::parse(&snapshot.server_url) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            warn!("cannot build file URL: {e}");
            return None;
        }
    };
    let server_path =
        PathMapping::new(snapshot.watch_dir.as_str()).to_server_path(&snapshot.source_file);
    match endpoint.file_url(&server_path, cache_buster) {
        Ok(url) => Some(url),
        Err(e) => {
            warn!("cannot build file URL: {e}");
            None
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::message_router::MockCacheInvalidator;
    use crate::application::session_manager::{MockProbeSocketPool, MockSessionTransport};
    use std::time::Duration;
    use tokio_test::{assert_pending, task};

    fn snapshot(server_url: &str, watch_dir: &str, source_file: &str) -> SessionSnapshot {
        SessionSnapshot {
            server_url: server_url.to_string(),
            watch_dir: watch_dir.to_string(),
            source_file: source_file.to_string(),
            ..SessionSnapshot::default()
        }
    }

    /// Spawns a loop around mocks.  The transport accepts `close` on
    /// shutdown.
    fn spawn_with(
        pool: MockProbeSocketPool,
        mut transport: MockSessionTransport,
        invalidator: MockCacheInvalidator,
        auto_start: bool,
    ) -> (HotWatchClient, JoinHandle<()>) {
        transport.expect_close().return_const(());
        let manager = SessionManager::new(
            SessionSettings {
                watch_dir: "/home/dev/proj".to_string(),
                ..SessionSettings::default()
            },
            DiscoveryConfig::default(),
            Box::new(pool),
            Box::new(transport),
            Arc::new(invalidator),
        );
        let (_datagram_tx, datagram_rx) = mpsc::unbounded_channel();
        let (_transport_tx, transport_rx) = mpsc::unbounded_channel();
        EventLoop::new(manager, datagram_rx, transport_rx).spawn(auto_start)
    }

    #[test]
    fn test_absent_discovery_deadline_never_fires() {
        let mut sleep = task::spawn(sleep_until(None));

        assert_pending!(sleep.poll());
        assert_pending!(sleep.poll());
    }

    #[test]
    fn test_file_url_joins_translated_source_file_and_cache_buster() {
        let snap = snapshot("http://10.0.0.5:8080", "/home/dev/proj", "file:///home/dev/proj/ui/main.qml");

        let url = file_url_for(&snap, 1_700_000_000_000);

        assert_eq!(
            url.map(|u| u.to_string()).as_deref(),
            Some("http://10.0.0.5:8080/ui/main.qml?v=1700000000000")
        );
    }

    #[test]
    fn test_file_url_tolerates_legacy_leading_separator() {
        let snap = snapshot(":http://10.0.0.5:8080", "/w", "/w/main.qml");

        let url = file_url_for(&snap, 1).unwrap();

        assert_eq!(url.as_str(), "http://10.0.0.5:8080/main.qml?v=1");
    }

    #[test]
    fn test_file_url_is_none_without_server_or_source() {
        assert_eq!(file_url_for(&snapshot("", "/w", "/w/main.qml"), 1), None);
        assert_eq!(file_url_for(&snapshot("http://h:1", "/w", ""), 1), None);
        assert_eq!(file_url_for(&snapshot("not a url", "/w", "/w/a.qml"), 1), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_exhausts_after_three_timed_out_rounds() {
        // Arrange
        let mut pool = MockProbeSocketPool::new();
        pool.expect_rebuild().times(1).return_const(1usize);
        pool.expect_broadcast().times(3).return_const(1usize);
        let (client, task) = spawn_with(
            pool,
            MockSessionTransport::new(),
            MockCacheInvalidator::new(),
            false,
        );
        let mut events = client.subscribe();
        let started = Instant::now();

        // Act
        client.find_server();
        let event = events.recv().await.unwrap();

        // Assert
        assert_eq!(
            event,
            ClientEvent::Error("failed to discover server after 3 attempts".into())
        );
        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert_eq!(client.state(), ConnectionState::Idle);

        client.shutdown();
        assert!(task.await.is_ok(), "mock expectations must hold");
    }

    #[tokio::test]
    async fn test_set_default_host_opens_session() {
        // Arrange
        let mut transport = MockSessionTransport::new();
        transport
            .expect_open()
            .withf(|url| url.as_str() == "ws://192.168.1.20:8080/ws")
            .times(1)
            .return_const(());
        let (client, task) = spawn_with(
            MockProbeSocketPool::new(),
            transport,
            MockCacheInvalidator::new(),
            false,
        );
        let mut watch = client.watch();

        // Act
        client.set_default_host("192.168.1.20:8080");
        watch
            .wait_for(|s| s.state == ConnectionState::Connecting)
            .await
            .unwrap();

        // Assert
        assert_eq!(client.server_url(), "http://192.168.1.20:8080");
        assert_eq!(client.default_host(), "192.168.1.20:8080");
        assert!(!client.connected());

        client.shutdown();
        assert!(task.await.is_ok());
    }

    #[tokio::test]
    async fn test_auto_start_without_url_or_host_discovers() {
        // Arrange
        let mut pool = MockProbeSocketPool::new();
        pool.expect_rebuild().times(1).return_const(1usize);
        pool.expect_broadcast().return_const(1usize);
        let (client, task) = spawn_with(
            pool,
            MockSessionTransport::new(),
            MockCacheInvalidator::new(),
            true,
        );
        let mut watch = client.watch();

        // Act
        watch
            .wait_for(|s| s.state == ConnectionState::Discovering)
            .await
            .unwrap();

        // Assert
        assert!(client.server_url().is_empty());

        client.shutdown();
        assert!(task.await.is_ok());
    }

    #[tokio::test]
    async fn test_clear_cache_reaches_invalidator() {
        let mut invalidator = MockCacheInvalidator::new();
        invalidator.expect_invalidate().times(1).return_const(());
        let (client, task) = spawn_with(
            MockProbeSocketPool::new(),
            MockSessionTransport::new(),
            invalidator,
            false,
        );

        client.clear_cache();
        client.shutdown();

        assert!(task.await.is_ok());
    }

    #[tokio::test]
    async fn test_loop_stops_when_every_handle_is_dropped() {
        let (client, task) = spawn_with(
            MockProbeSocketPool::new(),
            MockSessionTransport::new(),
            MockCacheInvalidator::new(),
            false,
        );

        drop(client);

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_properties_reflect_setters() {
        let (client, task) = spawn_with(
            MockProbeSocketPool::new(),
            MockSessionTransport::new(),
            MockCacheInvalidator::new(),
            false,
        );
        let mut events = client.subscribe();

        client.set_source_file("/home/dev/proj/main.qml");
        let event = events.recv().await.unwrap();

        assert_eq!(event, ClientEvent::SourceFileChanged);
        assert_eq!(client.source_file(), "/home/dev/proj/main.qml");
        assert_eq!(client.watch_dir(), "/home/dev/proj");
        assert_eq!(client.file_url(), None, "no server URL yet");

        client.shutdown();
        assert!(task.await.is_ok());
    }

    #[tokio::test]
    async fn test_diagnostics_are_not_forwarded_while_disconnected() {
        let mut transport = MockSessionTransport::new();
        transport.expect_send_text().times(0);
        let (client, task) = spawn_with(
            MockProbeSocketPool::new(),
            transport,
            MockCacheInvalidator::new(),
            false,
        );

        assert!(!client.is_connected());
        client.forward("Info: hello (a.rs:1)".to_string());
        client.shutdown();

        assert!(task.await.is_ok());
    }
}
