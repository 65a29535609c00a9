//! Domain layer: value types with no I/O.
//!
//! - [`endpoint`] – the resolved server base URL and the URLs derived from it.
//! - [`paths`] – translation between server-relative and local paths.
//! - [`state`] – the session's connection state.

pub mod endpoint;
pub mod paths;
pub mod state;

pub use endpoint::{url_from_host, EndpointError, ServerEndpoint};
pub use paths::PathMapping;
pub use state::ConnectionState;
