//! MessageRouter: decodes inbound session frames and dispatches their effects.
//!
//! The router sits between the transport and the viewer.  For a
//! `fileChanged` notice it:
//!
//! 1. Translates the server-relative path into the local namespace.
//! 2. Invalidates the viewer's component cache through the injected
//!    [`CacheInvalidator`].
//! 3. Returns [`RoutedFrame::FileChanged`] so the session manager can emit the
//!    change event.
//!
//! Step 2 completes before the router returns, so every subscriber of the
//! change event observes an already-invalidated cache.
//!
//! Frames that cannot be decoded are logged and dropped; the router never
//! escalates a protocol error.

use std::sync::Arc;

use hotwatch_core::protocol::messages::ProtocolError;
use hotwatch_core::{decode_inbound, encode_outbound, InboundMessage, OutboundMessage, PathMapping};
use tracing::{debug, info, warn};

/// Capability to invalidate the viewer's cached UI components.
///
/// Implemented by whatever hosts the UI runtime.  `invalidate` must finish
/// its work before returning; callers read dependent state immediately after.
#[cfg_attr(test, mockall::automock)]
pub trait CacheInvalidator: Send + Sync {
    /// Drops every cached component so the next load re-fetches sources.
    fn invalidate(&self);
}

/// Effect of routing one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedFrame {
    /// A source changed; carries the translated local path.
    FileChanged { local_path: String },
    /// Informational frame (hello, connected ack).
    Informational,
    /// Frame with a tag this client does not handle.
    Ignored,
    /// Frame that failed to decode.
    Dropped(ProtocolError),
}

/// Decodes inbound frames and builds outbound ones.
pub struct MessageRouter {
    paths: PathMapping,
    invalidator: Arc<dyn CacheInvalidator>,
}

impl MessageRouter {
    /// Creates a router for the given watch root mapping.
    pub fn new(paths: PathMapping, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        Self { paths, invalidator }
    }

    /// The path mapping used for translation.
    pub fn paths(&self) -> &PathMapping {
        &self.paths
    }

    /// Routes one inbound text frame.
    pub fn route(&self, frame: &str) -> RoutedFrame {
        let message = match decode_inbound(frame) {
            Ok(m) => m,
            Err(e) => {
                warn!("dropping inbound frame: {e}");
                return RoutedFrame::Dropped(e);
            }
        };

        match message {
            InboundMessage::FileChanged { path } => {
                let local_path = self.paths.to_local_path(&path);
                debug!("file changed: server={path} local={local_path}");
                self.invalidator.invalidate();
                RoutedFrame::FileChanged { local_path }
            }
            InboundMessage::ConnectedAck => {
                info!("server confirmed the session");
                RoutedFrame::Informational
            }
            InboundMessage::Hello => {
                debug!("server sent hello");
                RoutedFrame::Informational
            }
            InboundMessage::Unknown { tag } => {
                debug!("ignoring frame with unhandled type {tag:?}");
                RoutedFrame::Ignored
            }
        }
    }

    /// Invalidates the cache on request of a collaborator.
    pub fn clear_cache(&self) {
        info!("clearing component cache");
        self.invalidator.invalidate();
    }

    /// The handshake frame sent when the session opens.
    pub fn handshake_frame(&self) -> Option<String> {
        encode(&OutboundMessage::hello())
    }

    /// A diagnostic frame carrying `message`.
    pub fn diagnostic_frame(&self, message: &str) -> Option<String> {
        encode(&OutboundMessage::diagnostic(message))
    }
}

fn encode(message: &OutboundMessage) -> Option<String> {
    match encode_outbound(message) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!("failed to encode outbound frame: {e}");
            None
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
