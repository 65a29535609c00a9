//! Connection state of the single session.

use std::fmt;

/// Where the session is in its lifecycle.
///
/// Owned exclusively by the session manager; everything else observes it.
///
/// ```text
/// Idle ──► Discovering ──► Connecting ──► Connected
///   ▲           ▲                │             │
///   │           └── Disconnected ◄─────────────┘
///   └────────── (explicit disconnect)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Nothing in progress: never started, explicitly disconnected, or
    /// discovery gave up.
    #[default]
    Idle,
    /// Broadcasting probes and waiting for an advertisement.
    Discovering,
    /// Transport open requested, not yet confirmed.
    Connecting,
    /// Transport confirmed open; handshake sent.
    Connected,
    /// Transport lost or failed.  Transient: discovery restarts immediately.
    Disconnected,
}

impl ConnectionState {
    /// `true` only in [`ConnectionState::Connected`].
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    /// Lower-case name used in log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Discovering => "discovering",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_idle() {
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
    }

    #[test]
    fn test_only_connected_reports_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Disconnected.is_connected());
    }

    #[test]
    fn test_display_uses_lowercase_name() {
        assert_eq!(ConnectionState::Discovering.to_string(), "discovering");
    }
}
