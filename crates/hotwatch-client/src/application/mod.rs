//! Application layer of the client.
//!
//! # What lives here?
//!
//! - **`discovery_scheduler`** – The bounded-retry probe state machine.  Pure:
//!   it is told when probes went out, when the deadline expired and what
//!   datagrams arrived.
//!
//! - **`message_router`** – Decodes inbound session frames, translates paths
//!   and invalidates the component cache through the injected
//!   `CacheInvalidator`.
//!
//! - **`session_manager`** – Owns the connection state and ties the other two
//!   together.  Sockets and the WebSocket connection are reached through the
//!   `ProbeSocketPool` and `SessionTransport` traits, implemented in the
//!   infrastructure layer.

pub mod discovery_scheduler;
pub mod message_router;
pub mod session_manager;
