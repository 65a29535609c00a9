//! Infrastructure layer for the client.
//!
//! Contains the OS- and network-facing adapters plus the event loop that
//! wires them to the application layer.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `hotwatch_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`network`** – Interface enumeration, the discovery socket pool and the
//!   WebSocket session transport.
//!
//! - **`diagnostics`** – A `tracing` layer forwarding log records to the
//!   server while the session is connected.
//!
//! - **`runtime`** – The single event loop owning the session manager, and
//!   the `HotWatchClient` handle collaborators use.
//!
//! - **`storage`** – The TOML configuration file.

pub mod diagnostics;
pub mod network;
pub mod runtime;
pub mod storage;
