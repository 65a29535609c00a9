//! hotwatch-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does hotwatch-client do?
//!
//! The client runs next to a viewer that renders UI sources served by a
//! HotWatch server somewhere on the LAN.  It:
//!
//! 1. Broadcasts a UDP probe on every usable interface and waits for the
//!    server's advertisement (or uses a configured URL or host).
//! 2. Opens a WebSocket session to the advertised server and says hello.
//! 3. On every `fileChanged` notice, invalidates the viewer's component cache
//!    and reports the changed file in the local namespace.
//! 4. Forwards the process's log records to the server while connected.
//! 5. Rediscovers the server whenever the session drops.
//!
//! Collaborators drive it through a [`HotWatchClient`] handle obtained from
//! [`spawn_client`].

/// Application layer: discovery, message routing and session state.
pub mod application;

/// Infrastructure layer: sockets, WebSocket, logging relay, event loop, config.
pub mod infrastructure;

pub use application::message_router::CacheInvalidator;
pub use application::session_manager::{ClientEvent, SessionSettings, SessionSnapshot};
pub use infrastructure::runtime::{spawn_client, ClientOptions, HotWatchClient};
