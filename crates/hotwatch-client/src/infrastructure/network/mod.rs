//! Network infrastructure for the client.
//!
//! # Sub-modules
//!
//! - **`interfaces`** – Lists the local IPv4 addresses discovery can broadcast
//!   from (up, broadcast-capable, not loopback).
//!
//! - **`socket_pool`** – One UDP socket per address with a wildcard fallback.
//!   Sends probes and forwards inbound datagrams to the event loop.
//!
//! - **`session_transport`** – The WebSocket connection to the server,
//!   reporting connection events tagged with a generation number.

pub mod interfaces;
pub mod session_transport;
pub mod socket_pool;
