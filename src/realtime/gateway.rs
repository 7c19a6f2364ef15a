//! Per-connection state for dashboard clients.
//!
//! The transport task owns an [`ActiveConnection`] and feeds it client
//! frames one at a time, in receipt order. Hub events for the connection
//! arrive on the receiver handed out by [`ConnectionGateway::open`].

use std::sync::Arc;
use tokio::sync::mpsc;

use super::hub::{ConnectionId, EventHub, HubMembership};
use super::messages::{ClientRequest, ServerMessage, Topic};
use crate::clock::Clock;
use crate::error::Result;
use crate::models::user::Principal;
use crate::repositories::attendance::AttendanceStore;
use crate::services::access;
use crate::services::credentials::CredentialVerifier;

/// WebSocket close code sent when the connection credential is missing or
/// rejected.
pub const AUTH_FAILURE_CLOSE_CODE: u16 = 4001;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Active,
    Closed,
}

/// Builds authenticated connections.
#[derive(Clone)]
pub struct ConnectionGateway {
    hub: EventHub,
    credentials: Arc<dyn CredentialVerifier>,
    store: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
    buffer: usize,
}

impl ConnectionGateway {
    /// Creates a new `ConnectionGateway`. `buffer` is the depth of each
    /// connection's outbound queue.
    pub fn new(
        hub: EventHub,
        credentials: Arc<dyn CredentialVerifier>,
        store: Arc<dyn AttendanceStore>,
        clock: Arc<dyn Clock>,
        buffer: usize,
    ) -> Self {
        Self {
            hub,
            credentials,
            store,
            clock,
            buffer,
        }
    }

    /// Authenticates `credential` and, on success, registers the connection
    /// with the hub and joins its user and role topics.
    ///
    /// An error means the transport must close with
    /// [`AUTH_FAILURE_CLOSE_CODE`].
    pub async fn open(
        &self,
        credential: &str,
    ) -> Result<(ActiveConnection, mpsc::Receiver<ServerMessage>)> {
        let mut state = ConnectionState::Connecting;
        tracing::debug!("🔌 Connection attempt ({:?})", state);

        state = ConnectionState::Authenticating;
        let principal = match self.credentials.verify(credential).await {
            Ok(principal) => principal,
            Err(e) => {
                tracing::warn!("❌ Real-time connection rejected ({:?}): {}", state, e);
                return Err(e);
            }
        };

        let (membership, events) = HubMembership::join(&self.hub, self.buffer);
        self.hub.subscribe(membership.id(), Topic::User(principal.user_id));
        self.hub.subscribe(membership.id(), Topic::Role(principal.role));

        tracing::info!(
            "🔗 User {} ({}) connected as connection {}",
            principal.user_id,
            principal.role,
            membership.id()
        );

        Ok((
            ActiveConnection {
                principal,
                membership,
                state: ConnectionState::Active,
                hub: self.hub.clone(),
                store: self.store.clone(),
                clock: self.clock.clone(),
            },
            events,
        ))
    }
}

/// An authenticated connection. Dropping it releases every hub membership.
pub struct ActiveConnection {
    principal: Principal,
    membership: HubMembership,
    state: ConnectionState,
    hub: EventHub,
    store: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
}

impl ActiveConnection {
    pub fn principal(&self) -> Principal {
        self.principal
    }

    pub fn id(&self) -> ConnectionId {
        self.membership.id()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The first frame sent after the connection is accepted.
    pub fn welcome(&self) -> ServerMessage {
        ServerMessage::ConnectionEstablished {
            message: "Connected to attendance updates".to_string(),
            user_id: self.principal.user_id,
            user_role: self.principal.role,
            timestamp: self.clock.now(),
        }
    }

    /// Handles one raw text frame and returns the reply to send. Bad
    /// frames get an error reply; the connection stays open.
    pub async fn handle_frame(&mut self, text: &str) -> ServerMessage {
        match ClientRequest::parse(text) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                tracing::debug!("Rejected frame on connection {}: {}", self.id(), e);
                ServerMessage::error(e.to_string(), self.clock.now())
            }
        }
    }

    pub async fn handle(&mut self, request: ClientRequest) -> ServerMessage {
        let now = self.clock.now();

        match request {
            ClientRequest::SubscribeSession { session_id } => {
                match access::can_view(self.store.as_ref(), &self.principal, session_id).await {
                    Ok(true) => {
                        self.hub.subscribe(self.id(), Topic::Session(session_id));
                        ServerMessage::SubscriptionConfirmed {
                            session_id,
                            message: format!("Subscribed to session {} updates", session_id),
                            timestamp: now,
                        }
                    }
                    Ok(false) => {
                        tracing::warn!(
                            "🚫 User {} denied subscription to session {}",
                            self.principal.user_id,
                            session_id
                        );
                        ServerMessage::error("Access denied to this session", now)
                    }
                    Err(e) => {
                        tracing::error!(
                            "❌ Access check for session {} failed: {}",
                            session_id,
                            e
                        );
                        ServerMessage::error("Unable to verify access, try again later", now)
                    }
                }
            }
            ClientRequest::UnsubscribeSession { session_id } => {
                self.hub.unsubscribe(self.id(), Topic::Session(session_id));
                ServerMessage::UnsubscriptionConfirmed {
                    session_id,
                    message: format!("Unsubscribed from session {} updates", session_id),
                    timestamp: now,
                }
            }
            ClientRequest::Ping => ServerMessage::Pong { timestamp: now },
        }
    }

    /// Ends the connection and releases its topics.
    pub fn close(mut self) {
        self.state = ConnectionState::Closed;
        tracing::info!(
            "🔌 User {} disconnected (connection {})",
            self.principal.user_id,
            self.id()
        );
    }
}
