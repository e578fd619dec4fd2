//! Connection lifecycle as a sans-IO state machine.
//!
//! [`Connection`] never touches a socket or a clock. The transport loop
//! feeds it callbacks (`on_open`, `on_close`, `on_frame`,
//! `on_reconnect_due`) and executes the [`ConnectionAction`]s it returns.
//! Retry counting and terminal conditions can therefore be exercised
//! without a network.
//!
//! ```text
//! Idle ─connect─▶ Connecting ─open─▶ Open ─disconnect─▶ Closing ─▶ Closed
//!                     │               │
//!                     └──abnormal─────┴─▶ Reconnecting{n} ─open─▶ Open
//!                                               │
//!                                  n > max_attempts ─▶ Closed (connection_failed)
//! ```

use std::time::Duration;

use pokerroom_shared::{Envelope, FailureCause, ServerEvent, SyncError};

use crate::config::RoomEndpoint;

mod transport;

pub use transport::TransportLoop;

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_AUTH_FAILED: u16 = 4401;
pub const CLOSE_ROOM_NOT_FOUND: u16 = 4404;

pub const ROOM_NOT_FOUND_REASON: &str = "Room not found.";
pub const AUTH_FAILED_REASON: &str = "Authentication failed. Please log in again.";
pub const CONNECTION_LOST_REASON: &str = "Connection lost. Please refresh the page.";

/// Connection state for a room session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Reconnecting { attempt: u32 },
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }

    fn label(&self) -> String {
        match self {
            ConnectionState::Idle => "idle".to_string(),
            ConnectionState::Connecting => "connecting".to_string(),
            ConnectionState::Open => "open".to_string(),
            ConnectionState::Closing => "closing".to_string(),
            ConnectionState::Reconnecting { attempt } => format!("reconnecting (attempt {attempt})"),
            ConnectionState::Closed => "closed".to_string(),
        }
    }
}

/// How the delay between reconnection attempts grows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed,
    Linear,
    Exponential { multiplier: f32 },
}

impl Backoff {
    pub const DEFAULT_MULTIPLIER: f32 = 1.5;
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Reconnection attempts after a connection is lost (0 = give up at once)
    pub max_attempts: u32,
    /// Delay before the first attempt, in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound for growing delays, in milliseconds
    pub max_delay_ms: u64,
    pub backoff: Backoff,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2000,
            max_delay_ms: 30000,
            backoff: Backoff::Fixed,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnection attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            Backoff::Fixed => self.initial_delay_ms,
            Backoff::Linear => self.initial_delay_ms.saturating_mul(u64::from(attempt)),
            Backoff::Exponential { multiplier } => {
                let factor = f64::from(multiplier.max(1.0)).powi((attempt - 1).min(1024) as i32);
                let delay = self.initial_delay_ms as f64 * factor;
                if delay >= self.max_delay_ms as f64 {
                    self.max_delay_ms
                } else {
                    delay as u64
                }
            }
        };
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Why the transport went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// Deliberate close from either side.
    Normal,
    /// The room does not exist. `reason` is the server's wording, if any.
    NotFound { reason: Option<String> },
    AuthenticationFailed { reason: Option<String> },
    Abnormal { code: Option<u16>, reason: String },
}

impl CloseCause {
    /// Classify a close frame (or its absence).
    pub fn from_close_code(code: Option<u16>, reason: &str) -> Self {
        let server_reason = || {
            let trimmed = reason.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        };
        match code {
            Some(CLOSE_NORMAL | CLOSE_GOING_AWAY) => CloseCause::Normal,
            Some(CLOSE_ROOM_NOT_FOUND) => CloseCause::NotFound {
                reason: server_reason(),
            },
            Some(CLOSE_AUTH_FAILED) => CloseCause::AuthenticationFailed {
                reason: server_reason(),
            },
            _ => CloseCause::Abnormal {
                code,
                reason: reason.to_string(),
            },
        }
    }

    /// Classify an HTTP status that refused the upgrade handshake.
    ///
    /// A server that closes before accepting the socket (how a missing room
    /// is refused) surfaces as HTTP 403, so 403 counts as not found.
    pub fn from_handshake_status(status: u16) -> Self {
        match status {
            403 | 404 => CloseCause::NotFound { reason: None },
            401 => CloseCause::AuthenticationFailed { reason: None },
            other => CloseCause::Abnormal {
                code: None,
                reason: format!("handshake rejected with HTTP {other}"),
            },
        }
    }
}

/// Work the transport loop must carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOp {
    Open { url: String },
    Send(String),
    Close { code: u16, reason: String },
    ScheduleReconnect { attempt: u32, delay: Duration },
    CancelReconnect,
}

/// Output of a state machine step.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionAction {
    Transport(TransportOp),
    /// Publish an event on the bus.
    Deliver(ServerEvent),
    /// Settle the future returned by `connect()`.
    ResolveConnect(Result<(), SyncError>),
}

#[derive(Debug)]
pub struct Connection {
    config: ReconnectConfig,
    endpoint: Option<RoomEndpoint>,
    state: ConnectionState,
    attempt: u32,
    manual_close: bool,
    connect_pending: bool,
}

impl Connection {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            endpoint: None,
            state: ConnectionState::Idle,
            attempt: 0,
            manual_close: false,
            connect_pending: false,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn endpoint(&self) -> Option<&RoomEndpoint> {
        self.endpoint.as_ref()
    }

    /// Start a session. Only allowed from `Idle` or `Closed`.
    pub fn connect(&mut self, endpoint: RoomEndpoint) -> Result<Vec<ConnectionAction>, SyncError> {
        if !matches!(self.state, ConnectionState::Idle | ConnectionState::Closed) {
            return Err(SyncError::InvalidState {
                state: self.state.label(),
                operation: "connect",
            });
        }

        tracing::info!(url = %endpoint.redacted(), "Connecting to room");
        let url = endpoint.url();
        self.endpoint = Some(endpoint);
        self.attempt = 0;
        self.manual_close = false;
        self.connect_pending = true;
        self.set_state(ConnectionState::Connecting);
        Ok(vec![ConnectionAction::Transport(TransportOp::Open { url })])
    }

    pub fn on_open(&mut self) -> Vec<ConnectionAction> {
        if !self.state.is_connecting() {
            tracing::debug!(state = %self.state.label(), "Ignoring open for a transport no longer wanted");
            return Vec::new();
        }

        self.attempt = 0;
        self.set_state(ConnectionState::Open);
        let mut actions = Vec::new();
        if std::mem::take(&mut self.connect_pending) {
            actions.push(ConnectionAction::ResolveConnect(Ok(())));
        }
        actions
    }

    /// The transport closed, or failed to open.
    pub fn on_close(&mut self, cause: CloseCause) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Idle | ConnectionState::Closed => {
                tracing::debug!(?cause, "Ignoring close while not connected");
                Vec::new()
            }
            ConnectionState::Closing => {
                self.set_state(ConnectionState::Closed);
                self.reject_pending(SyncError::TransportClosedNormal)
            }
            ConnectionState::Connecting
            | ConnectionState::Open
            | ConnectionState::Reconnecting { .. } => self.on_lost(cause),
        }
    }

    fn on_lost(&mut self, cause: CloseCause) -> Vec<ConnectionAction> {
        let has_credential = self.endpoint.as_ref().is_some_and(RoomEndpoint::has_credential);

        let (code, reason) = match cause {
            CloseCause::Normal => {
                tracing::info!("Server closed the connection");
                self.set_state(ConnectionState::Closed);
                return self.reject_pending(SyncError::TransportClosedNormal);
            }
            CloseCause::NotFound { reason } => {
                let reason = reason.unwrap_or_else(|| ROOM_NOT_FOUND_REASON.to_string());
                return self.fail(
                    &reason,
                    FailureCause::RoomNotFound,
                    SyncError::RoomNotFound(reason.clone()),
                );
            }
            CloseCause::AuthenticationFailed { reason } if has_credential => {
                let reason = reason.unwrap_or_else(|| AUTH_FAILED_REASON.to_string());
                return self.fail(
                    &reason,
                    FailureCause::AuthenticationRejected,
                    SyncError::AuthenticationRejected(reason.clone()),
                );
            }
            CloseCause::AuthenticationFailed { .. } => {
                tracing::debug!("Authentication challenge on an anonymous session, not reporting");
                (Some(CLOSE_AUTH_FAILED), "anonymous session challenged".to_string())
            }
            CloseCause::Abnormal { code, reason } => (code, reason),
        };

        let mut actions =
            self.reject_pending(SyncError::TransportClosedAbnormal { code, reason: reason.clone() });

        let next = self.attempt + 1;
        if next > self.config.max_attempts {
            tracing::error!(
                attempts = self.config.max_attempts,
                ?code,
                %reason,
                "Giving up on the room connection"
            );
            self.set_state(ConnectionState::Closed);
            actions.push(ConnectionAction::Deliver(ServerEvent::ConnectionFailed {
                reason: CONNECTION_LOST_REASON.to_string(),
                cause: FailureCause::ReconnectLimitExceeded {
                    attempts: self.config.max_attempts,
                },
            }));
            return actions;
        }

        self.attempt = next;
        let delay = self.config.delay_for_attempt(next);
        tracing::info!(
            attempt = next,
            max_attempts = self.config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            ?code,
            %reason,
            "Connection lost, scheduling reconnect"
        );
        self.set_state(ConnectionState::Reconnecting { attempt: next });
        actions.push(ConnectionAction::Transport(TransportOp::ScheduleReconnect {
            attempt: next,
            delay,
        }));
        actions
    }

    pub fn on_reconnect_due(&mut self) -> Vec<ConnectionAction> {
        match (&self.state, &self.endpoint) {
            (ConnectionState::Reconnecting { attempt }, Some(endpoint)) if !self.manual_close => {
                tracing::info!(attempt, url = %endpoint.redacted(), "Reconnecting");
                vec![ConnectionAction::Transport(TransportOp::Open {
                    url: endpoint.url(),
                })]
            }
            _ => Vec::new(),
        }
    }

    /// Decode an inbound text frame into an event for the bus.
    ///
    /// Malformed frames and unknown tags are dropped here; neither closes
    /// the connection. Frames read after a disconnect was requested are
    /// dropped too.
    pub fn on_frame(&mut self, text: &str) -> Vec<ConnectionAction> {
        if !self.state.is_open() {
            tracing::debug!(state = %self.state.label(), "Dropping frame for a session no longer open");
            return Vec::new();
        }

        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame");
                return Vec::new();
            }
        };

        if envelope.kind == ServerEvent::CONNECTION_FAILED {
            tracing::warn!("Dropping connection_failed frame sent by the server");
            return Vec::new();
        }

        let kind = envelope.kind.clone();
        match envelope.into_event() {
            Ok(ServerEvent::Unknown) => {
                tracing::debug!(kind = %kind, "Ignoring unknown event type");
                Vec::new()
            }
            Ok(event) => vec![ConnectionAction::Deliver(event)],
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "Dropping malformed frame");
                Vec::new()
            }
        }
    }

    /// Close the session on purpose. Safe to call in any state.
    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        self.manual_close = true;
        match self.state {
            ConnectionState::Idle | ConnectionState::Closing | ConnectionState::Closed => Vec::new(),
            ConnectionState::Reconnecting { .. } => {
                self.set_state(ConnectionState::Closing);
                vec![
                    ConnectionAction::Transport(TransportOp::CancelReconnect),
                    Self::close_normally(),
                ]
            }
            ConnectionState::Connecting | ConnectionState::Open => {
                self.set_state(ConnectionState::Closing);
                vec![Self::close_normally()]
            }
        }
    }

    /// Queue an outbound frame. Refused unless the connection is open.
    pub fn send(&mut self, frame: String) -> Result<Vec<ConnectionAction>, SyncError> {
        if !self.state.is_open() {
            return Err(SyncError::NotConnected);
        }
        Ok(vec![ConnectionAction::Transport(TransportOp::Send(frame))])
    }

    fn close_normally() -> ConnectionAction {
        ConnectionAction::Transport(TransportOp::Close {
            code: CLOSE_NORMAL,
            reason: "client disconnect".to_string(),
        })
    }

    fn fail(&mut self, reason: &str, cause: FailureCause, error: SyncError) -> Vec<ConnectionAction> {
        tracing::error!(%reason, "Room connection rejected");
        self.set_state(ConnectionState::Closed);
        let mut actions = self.reject_pending(error);
        actions.push(ConnectionAction::Deliver(ServerEvent::ConnectionFailed {
            reason: reason.to_string(),
            cause,
        }));
        actions
    }

    fn reject_pending(&mut self, error: SyncError) -> Vec<ConnectionAction> {
        if std::mem::take(&mut self.connect_pending) {
            vec![ConnectionAction::ResolveConnect(Err(error))]
        } else {
            Vec::new()
        }
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            tracing::info!(from = %self.state.label(), to = %next.label(), "Connection state changed");
            self.state = next;
        }
    }
}
