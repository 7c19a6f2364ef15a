//! Real-time frames exchanged with dashboard clients.
//!
//! Every frame is a JSON object with a `type` discriminator and, for
//! server frames, an ISO-8601 `timestamp`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sonic_rs::JsonValueTrait;
use std::fmt;
use thiserror::Error;

use crate::models::attendance::{AttendanceRecord, AttendanceStatus};
use crate::models::user::Role;

/// A named broadcast channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Attendance, status and QR updates for one session.
    Session(i64),
    /// Notifications addressed to one user.
    User(i64),
    /// Broadcast to everyone holding a role.
    Role(Role),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Session(id) => write!(f, "session:{}", id),
            Topic::User(id) => write!(f, "user:{}", id),
            Topic::Role(role) => write!(f, "role:{}", role),
        }
    }
}

/// How an attendance record reached its current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceSource {
    QrCheckIn,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceEvent {
    pub session_id: i64,
    pub student_id: i64,
    pub attendance_id: i64,
    pub status: AttendanceStatus,
    pub check_in_time: Option<DateTime<Utc>>,
    pub source: AttendanceSource,
}

impl AttendanceEvent {
    pub fn from_record(record: &AttendanceRecord, source: AttendanceSource) -> Self {
        Self {
            session_id: record.session_id,
            student_id: record.student_id,
            attendance_id: record.id,
            status: record.status,
            check_in_time: record.check_in_time,
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatusEvent {
    pub session_id: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QrCodeEvent {
    pub session_id: i64,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationEvent {
    pub title: String,
    pub message: String,
}

/// Server-to-client frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionEstablished {
        message: String,
        user_id: i64,
        user_role: Role,
        timestamp: DateTime<Utc>,
    },
    SubscriptionConfirmed {
        session_id: i64,
        message: String,
        timestamp: DateTime<Utc>,
    },
    UnsubscriptionConfirmed {
        session_id: i64,
        message: String,
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
    AttendanceUpdate {
        data: AttendanceEvent,
        timestamp: DateTime<Utc>,
    },
    SessionStatusUpdate {
        data: SessionStatusEvent,
        timestamp: DateTime<Utc>,
    },
    QrCodeUpdate {
        data: QrCodeEvent,
        timestamp: DateTime<Utc>,
    },
    Notification {
        data: NotificationEvent,
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            timestamp,
        }
    }

    /// The frame's `type` discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::ConnectionEstablished { .. } => "connection_established",
            ServerMessage::SubscriptionConfirmed { .. } => "subscription_confirmed",
            ServerMessage::UnsubscriptionConfirmed { .. } => "unsubscription_confirmed",
            ServerMessage::Pong { .. } => "pong",
            ServerMessage::Error { .. } => "error",
            ServerMessage::AttendanceUpdate { .. } => "attendance_update",
            ServerMessage::SessionStatusUpdate { .. } => "session_status_update",
            ServerMessage::QrCodeUpdate { .. } => "qr_code_update",
            ServerMessage::Notification { .. } => "notification",
        }
    }

    /// Serializes the frame for the wire.
    pub fn to_json(&self) -> String {
        sonic_rs::to_string(self).unwrap_or_else(|e| {
            tracing::error!("Failed to serialize {} frame: {}", self.kind(), e);
            r#"{"type":"error","message":"Message serialization failed"}"#.to_string()
        })
    }
}

/// Client-to-server requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRequest {
    SubscribeSession { session_id: i64 },
    UnsubscribeSession { session_id: i64 },
    Ping,
}

/// Why a client frame could not be turned into a [`ClientRequest`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Invalid JSON format")]
    InvalidJson,
    #[error("Message type is required")]
    MissingType,
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Session ID is required")]
    MissingSessionId,
}

impl ClientRequest {
    /// Parses a text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: sonic_rs::Value =
            sonic_rs::from_str(text).map_err(|_| FrameError::InvalidJson)?;

        let kind = value
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or(FrameError::MissingType)?;

        match kind {
            "subscribe_session" => Ok(ClientRequest::SubscribeSession {
                session_id: session_id_of(&value)?,
            }),
            "unsubscribe_session" => Ok(ClientRequest::UnsubscribeSession {
                session_id: session_id_of(&value)?,
            }),
            "ping" => Ok(ClientRequest::Ping),
            other => Err(FrameError::UnknownType(other.to_string())),
        }
    }
}

// Dashboards send ids both as numbers and as strings.
fn session_id_of(value: &sonic_rs::Value) -> Result<i64, FrameError> {
    let field = value.get("session_id").ok_or(FrameError::MissingSessionId)?;

    field
        .as_i64()
        .or_else(|| field.as_str().and_then(|s| s.trim().parse().ok()))
        .filter(|id| *id > 0)
        .ok_or(FrameError::MissingSessionId)
}
