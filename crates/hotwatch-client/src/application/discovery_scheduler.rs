//! DiscoveryScheduler: bounded-retry probe rounds with a response timeout.
//!
//! The scheduler is a pure state machine.  It never touches a socket or a
//! timer itself; the session manager tells it what happened (a broadcast went
//! out, the deadline expired, a datagram arrived) and acts on what it returns.
//! This keeps every retry rule testable without a network or a clock.
//!
//! ```text
//! Idle ─► Broadcasting ─► WaitingResponse ─┬─► Resolved   (valid advertisement)
//!              ▲                            ├─► Retrying   (timeout, attempts < max)
//!              └────────────────────────────┘
//!                                           └─► Failed     (timeout, attempts == max,
//!                                                           or nothing could be sent)
//! ```
//!
//! # Attempt counter
//!
//! The counter starts at 0 and is incremented on each timeout.  Below
//! `max_attempts` the round is retried; on reaching it the scheduler reports
//! [`DiscoveryError::Exhausted`] and resets the counter to 0 so a later
//! discovery starts cleanly.  Resolution and [`DiscoveryScheduler::reset`]
//! also zero it.
//!
//! `Retrying` only lasts from the timeout until the caller starts the next
//! broadcast with [`DiscoveryScheduler::begin_broadcast`].

use std::time::Duration;

use hotwatch_core::protocol::discovery::DISCOVERY_PORT;
use hotwatch_core::{parse_advertisement, ServerEndpoint};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Number of probe rounds before discovery gives up.
pub const MAX_DISCOVERY_ATTEMPTS: u32 = 3;

/// How long each round waits for an advertisement.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Errors reported by the scheduler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// Not a single probe could be sent (empty pool or every send failed).
    #[error("failed to send discovery broadcast")]
    SendFailed,

    /// Every round timed out.
    #[error("failed to discover server after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

/// Tunables for discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// UDP port probes are sent to.
    pub port: u16,
    /// Per-round response timeout.
    pub timeout: Duration,
    /// Rounds before giving up.
    pub max_attempts: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: DISCOVERY_PORT,
            timeout: DISCOVERY_TIMEOUT,
            max_attempts: MAX_DISCOVERY_ATTEMPTS,
        }
    }
}

/// Where the scheduler is in the current discovery session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryState {
    #[default]
    Idle,
    Broadcasting,
    WaitingResponse,
    Resolved,
    /// Between a timeout and the next broadcast.
    Retrying,
    Failed,
}

/// What the caller must do after a timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// Broadcast again.  `attempt` is the 1-based number of the next round.
    Retry { attempt: u32 },
    /// Give up and report the error.
    Exhausted(DiscoveryError),
    /// No round was waiting (stale timer); nothing to do.
    Ignored,
}

/// The bounded-retry state machine.
#[derive(Debug)]
pub struct DiscoveryScheduler {
    config: DiscoveryConfig,
    state: DiscoveryState,
    attempts: u32,
    deadline: Option<Instant>,
}

impl DiscoveryScheduler {
    /// Creates an idle scheduler.
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            state: DiscoveryState::Idle,
            attempts: 0,
            deadline: None,
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    /// Number of timed-out rounds in the current session.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// When the current round times out, if one is waiting.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `true` while a round is in flight.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            DiscoveryState::Broadcasting | DiscoveryState::WaitingResponse
        )
    }

    /// Abandons any round in flight and zeroes the attempt counter.
    pub fn reset(&mut self) {
        self.state = DiscoveryState::Idle;
        self.attempts = 0;
        self.deadline = None;
    }

    /// Marks the start of a broadcast.  Any previous deadline is cancelled.
    pub fn begin_broadcast(&mut self) {
        self.state = DiscoveryState::Broadcasting;
        self.deadline = None;
    }

    /// Records how many probes went out.
    ///
    /// With at least one successful send the round starts waiting and the
    /// deadline is armed at `now + timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::SendFailed`] when `sent == 0`.
    pub fn broadcast_sent(&mut self, sent: usize, now: Instant) -> Result<Instant, DiscoveryError> {
        if sent == 0 {
            self.state = DiscoveryState::Failed;
            self.deadline = None;
            return Err(DiscoveryError::SendFailed);
        }
        let deadline = now + self.config.timeout;
        self.state = DiscoveryState::WaitingResponse;
        self.deadline = Some(deadline);
        Ok(deadline)
    }

    /// Handles expiry of the round deadline.
    pub fn on_timeout(&mut self) -> TimeoutOutcome {
        if self.state != DiscoveryState::WaitingResponse {
            return TimeoutOutcome::Ignored;
        }
        self.deadline = None;
        self.attempts += 1;

        if self.attempts < self.config.max_attempts {
            self.state = DiscoveryState::Retrying;
            TimeoutOutcome::Retry {
                attempt: self.attempts + 1,
            }
        } else {
            let attempts = self.attempts;
            self.state = DiscoveryState::Failed;
            self.attempts = 0;
            TimeoutOutcome::Exhausted(DiscoveryError::Exhausted { attempts })
        }
    }

    /// Handles an inbound datagram.
    ///
    /// Returns the advertised URL for the first valid advertisement of a
    /// waiting round.  Anything else (no round waiting, a round already
    /// resolved, a non-advertisement, an advertised URL no session can be
    /// opened to) returns `None` and leaves the round waiting.
    pub fn on_datagram(&mut self, payload: &[u8]) -> Option<String> {
        if self.state != DiscoveryState::WaitingResponse {
            debug!(
                "discovery datagram ignored in state {:?} ({} bytes)",
                self.state,
                payload.len()
            );
            return None;
        }

        match parse_advertisement(payload) {
            Ok(url) => {
                if let Err(e) = ServerEndpoint::parse(&url) {
                    debug!("ignoring advertisement: {e}");
                    return None;
                }
                self.deadline = None;
                self.attempts = 0;
                self.state = DiscoveryState::Resolved;
                Some(url)
            }
            Err(e) => {
                debug!("ignoring discovery datagram: {e}");
                None
            }
        }
    }
}

impl Default for DiscoveryScheduler {
    fn default() -> Self {
        Self::new(DiscoveryConfig::default())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
