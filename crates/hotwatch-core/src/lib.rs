//! # hotwatch-core
//!
//! Shared library for the HotWatch hot-reload client containing the discovery
//! and session wire protocols, the server endpoint model, and the path
//! translator between the server's namespace and the local watch root.
//!
//! This crate has zero dependencies on sockets, timers, or async runtimes.
//! Everything here is a pure function or a plain value type, so it can be
//! tested exhaustively without a network.
//!
//! # Architecture overview
//!
//! A viewer process renders UI sources that live on a development machine.
//! The development machine runs a *source server* that watches the sources
//! and announces itself on the LAN.  The client side:
//!
//! 1. Broadcasts a UDP probe and waits for an advertisement carrying the
//!    server's base URL (see [`protocol::discovery`]).
//! 2. Opens a WebSocket session derived from that URL (see
//!    [`domain::endpoint`]).
//! 3. Receives `fileChanged` notices (see [`protocol::messages`]) and maps the
//!    server-relative paths into the local namespace (see [`domain::paths`]).
//!
//! - **`protocol`** – Bytes and text frames on the wire.
//! - **`domain`** – Value types with no I/O: endpoints, paths, connection state.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `hotwatch_core::PathMapping` instead of `hotwatch_core::domain::paths::PathMapping`.
pub use domain::endpoint::{EndpointError, ServerEndpoint};
pub use domain::paths::PathMapping;
pub use domain::state::ConnectionState;
pub use protocol::discovery::{parse_advertisement, AdvertisementError, DISCOVERY_PORT};
pub use protocol::messages::{decode_inbound, encode_outbound, InboundMessage, OutboundMessage, ProtocolError};
