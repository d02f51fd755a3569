//! Connection Lifecycle
//!
//! The reconnection state machine, expressed as a single pure transition
//! function. The machine performs no I/O and owns no timers: every input
//! yields at most one [`Directive`] that the session driver carries out.
//!
//! ```text
//!                 connect()
//!  Disconnected ───────────► Connecting ──open──► Open
//!       ▲                      │    ▲               │
//!       │ disconnect()    fail │    │ retry elapsed │ close
//!       │ (any state)          ▼    │               │
//!       │               ClosedPendingRetry ◄────────┘
//!       │                      │
//!       │                      │ attempts exhausted
//!       │                      ▼
//!       └──────────────── ClosedPermanent
//! ```

mod backoff;

use std::fmt;
use std::time::Duration;

use serde::Serialize;

pub use backoff::{ReconnectConfig, ReconnectPolicy};

// =============================================================================
// States, Inputs, Directives
// =============================================================================

/// Connection lifecycle state. Exactly one per client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session; nothing scheduled.
    #[default]
    Disconnected,
    /// A transport open is in flight.
    Connecting,
    /// Transport is live and subscriptions have been replayed.
    Open,
    /// Transport was lost; a retry is scheduled.
    ClosedPendingRetry {
        /// Retry number (1-indexed) that is scheduled.
        attempt: u32,
        /// Delay before that retry.
        #[serde(serialize_with = "serialize_millis")]
        delay: Duration,
    },
    /// Retries exhausted. Only an explicit `connect()` leaves this state.
    ClosedPermanent,
}

impl ConnectionState {
    /// Short lowercase name, for logs and status output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::ClosedPendingRetry { .. } => "closed_pending_retry",
            Self::ClosedPermanent => "closed_permanent",
        }
    }

    /// Whether frames can be sent right now.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Whether a session is active (connecting, open, or waiting to retry).
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Open | Self::ClosedPendingRetry { .. }
        )
    }

    /// Numeric code for the connection-state gauge.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Open => 2,
            Self::ClosedPendingRetry { .. } => 3,
            Self::ClosedPermanent => 4,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn serialize_millis<S: serde::Serializer>(delay: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX))
}

/// Something that happened to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionInput {
    /// Caller asked to connect.
    Connect,
    /// The transport finished opening.
    TransportOpened,
    /// The transport failed to open, errored, or closed.
    TransportClosed,
    /// The backoff delay ran out.
    RetryElapsed,
    /// Caller asked to disconnect.
    Disconnect,
}

/// What the driver must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Open a new transport.
    OpenTransport,
    /// Send a subscribe intent for every registered symbol.
    ReplaySubscriptions,
    /// Sleep for `delay`, then feed [`ConnectionInput::RetryElapsed`].
    ScheduleRetry {
        /// Retry number (1-indexed).
        attempt: u32,
        /// Backoff delay.
        delay: Duration,
    },
    /// Stop retrying; the session is over.
    GiveUp {
        /// Retries that were attempted.
        attempts: u32,
    },
    /// Close the live transport and cancel any pending retry.
    CloseTransport,
}

// =============================================================================
// Machine
// =============================================================================

/// The reconnection state machine.
///
/// # Example
///
/// ```rust
/// use market_stream_client::{
///     ConnectionInput, ConnectionMachine, ConnectionState, Directive, ReconnectConfig,
/// };
///
/// let mut machine = ConnectionMachine::new(ReconnectConfig::default());
///
/// assert_eq!(machine.apply(ConnectionInput::Connect), Some(Directive::OpenTransport));
/// assert_eq!(machine.apply(ConnectionInput::Connect), None);
/// assert_eq!(
///     machine.apply(ConnectionInput::TransportOpened),
///     Some(Directive::ReplaySubscriptions)
/// );
/// assert_eq!(machine.state(), ConnectionState::Open);
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    policy: ReconnectPolicy,
}

impl ConnectionMachine {
    /// Create a machine in `Disconnected`.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy: ReconnectPolicy::new(config),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failed attempts since the last successful open.
    #[must_use]
    pub const fn retry_attempts(&self) -> u32 {
        self.policy.attempt_count()
    }

    /// The single transition function.
    ///
    /// Inputs that make no sense in the current state (a stale open after
    /// a disconnect, a second connect while connecting) are ignored and
    /// return `None`.
    pub fn apply(&mut self, input: ConnectionInput) -> Option<Directive> {
        use ConnectionInput as In;
        use ConnectionState as S;

        let (next, directive) = match (self.state, input) {
            (S::Disconnected | S::ClosedPermanent, In::Connect) => {
                self.policy.reset();
                (S::Connecting, Some(Directive::OpenTransport))
            }

            (S::Connecting, In::TransportOpened) => {
                self.policy.reset();
                (S::Open, Some(Directive::ReplaySubscriptions))
            }

            (S::Connecting | S::Open, In::TransportClosed) => match self.policy.next_delay() {
                Some(delay) => {
                    let attempt = self.policy.attempt_count();
                    (
                        S::ClosedPendingRetry { attempt, delay },
                        Some(Directive::ScheduleRetry { attempt, delay }),
                    )
                }
                None => (
                    S::ClosedPermanent,
                    Some(Directive::GiveUp {
                        attempts: self.policy.attempt_count(),
                    }),
                ),
            },

            // An explicit connect skips the remaining delay but keeps the
            // failure count.
            (S::ClosedPendingRetry { .. }, In::RetryElapsed | In::Connect) => {
                (S::Connecting, Some(Directive::OpenTransport))
            }

            (state, In::Disconnect) => {
                self.policy.reset();
                let directive = state.is_active().then_some(Directive::CloseTransport);
                (S::Disconnected, directive)
            }

            (state, _) => (state, None),
        };

        if next != self.state {
            tracing::debug!(from = %self.state, to = %next, ?input, "Connection state transition");
        }
        self.state = next;
        directive
    }
}
