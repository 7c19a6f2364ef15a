use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    handlers::reply,
    models::{
        session::AttendanceSession,
        token::QrPayload,
        user::{Principal, Role},
    },
    state::AppState,
    validation::attendance::validate_id,
};

/// Identifies whose token for which session. `issuer_id` defaults to the
/// caller.
#[derive(Deserialize)]
pub struct TokenTarget {
    pub session_id: i64,
    #[serde(default)]
    pub issuer_id: Option<i64>,
}

#[derive(Serialize)]
struct IssueResponse {
    success: bool,
    token: String,
    expires_in_seconds: i64,
    expires_at: DateTime<Utc>,
    qr_data: QrPayload,
}

#[derive(Serialize)]
struct RevokeResponse {
    success: bool,
}

/// Resolves the target and checks the caller may act on it: an admin for
/// any issuer, a teacher only for their own sessions and as themselves.
async fn authorize(
    state: &AppState,
    principal: &Principal,
    target: &TokenTarget,
) -> Result<(AttendanceSession, i64)> {
    validate_id("session_id", target.session_id)?;
    let issuer_id = target.issuer_id.unwrap_or(principal.user_id);
    validate_id("issuer_id", issuer_id)?;

    let session = state
        .checkins
        .managed_session(principal, target.session_id)
        .await?;

    if principal.role != Role::Admin && issuer_id != principal.user_id {
        tracing::warn!(
            "🚫 User {} tried to act as issuer {} on session {}",
            principal.user_id,
            issuer_id,
            target.session_id
        );
        return Err(AppError::Unauthorized);
    }

    Ok((session, issuer_id))
}

/// Issues a fresh QR token for a session.
#[axum::debug_handler]
pub async fn issue(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<TokenTarget>,
) -> Result<Response> {
    let (session, issuer_id) = authorize(&state, &principal, &req).await?;

    let issued = state.tokens.issue(session.id, issuer_id).await?;

    let qr_data = QrPayload {
        kind: "attendance_checkin",
        token: issued.token.clone(),
        session_id: session.id,
        session_name: session.session_name,
        generated_at: issued.expires_at - chrono::Duration::seconds(issued.expires_in_seconds),
        expires_at: issued.expires_at,
    };

    reply::json(
        StatusCode::CREATED,
        &IssueResponse {
            success: true,
            token: issued.token,
            expires_in_seconds: issued.expires_in_seconds,
            expires_at: issued.expires_at,
            qr_data,
        },
    )
}

/// Forgets the session's active token. Tokens already handed out stay
/// valid until they expire.
#[axum::debug_handler]
pub async fn revoke(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<TokenTarget>,
) -> Result<Response> {
    let (session, issuer_id) = authorize(&state, &principal, &req).await?;

    let success = state.tokens.revoke(session.id, issuer_id).await;

    reply::json(StatusCode::OK, &RevokeResponse { success })
}

/// Reports whether the session has a live token.
#[axum::debug_handler]
pub async fn status(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<TokenTarget>,
) -> Result<Response> {
    let (session, issuer_id) = authorize(&state, &principal, &query).await?;

    let status = state.tokens.status(session.id, issuer_id).await?;

    reply::json(StatusCode::OK, &status)
}
