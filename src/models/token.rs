use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of random bytes in a token nonce.
pub const NONCE_LEN: usize = 16;

/// The signed content of a QR check-in token.
///
/// Field order is the canonical encoding order; do not reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// The attendance session the token admits check-ins for.
    pub session_id: i64,
    /// The teacher (or admin) that issued the token.
    pub issuer_id: i64,
    /// Unix seconds at issuance.
    pub issued_at: i64,
    /// Random value making every token unique.
    pub nonce: [u8; NONCE_LEN],
}

/// Claims returned by a successful validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenClaims {
    pub session_id: i64,
    pub issuer_id: i64,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// A freshly issued token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The opaque transport encoding handed to clients.
    pub token: String,
    pub payload: TokenPayload,
    pub expires_at: DateTime<Utc>,
    pub expires_in_seconds: i64,
}

/// Live status of a session's current token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenStatus {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TokenStatus {
    /// No usable token is cached for the session.
    pub fn inactive(message: &str) -> Self {
        Self {
            active: false,
            expires_at: None,
            time_remaining: None,
            message: Some(message.to_string()),
        }
    }
}

/// The document encoded into the QR image shown to students.
#[derive(Debug, Clone, Serialize)]
pub struct QrPayload {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub token: String,
    pub session_id: i64,
    pub session_name: String,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
