use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    handlers::reply,
    models::{
        attendance::{AttendanceRecord, AttendanceStatus},
        user::{Principal, Role},
    },
    state::AppState,
    validation::attendance::{validate_id, validate_notes, validate_token},
};

/// The request payload for a QR check-in.
#[derive(Deserialize)]
pub struct CheckInRequest {
    pub token: String,
    /// Required when staff check a student in; students may only omit it
    /// or pass their own id.
    #[serde(default)]
    pub student_id: Option<i64>,
}

#[derive(Serialize)]
struct CheckInResponse {
    success: bool,
    attendance_id: i64,
    session_id: i64,
    status: AttendanceStatus,
    check_in_time: Option<DateTime<Utc>>,
    message: &'static str,
}

/// The request payload for marking a student explicitly.
#[derive(Deserialize)]
pub struct MarkRequest {
    pub student_id: i64,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Serialize)]
struct RecordsResponse {
    session_id: i64,
    count: usize,
    records: Vec<AttendanceRecord>,
}

#[derive(Serialize)]
struct EndSessionResponse {
    success: bool,
    session_id: i64,
    is_active: bool,
    end_time: DateTime<Utc>,
}

/// Resolves which student a check-in is for.
fn check_in_subject(principal: &Principal, requested: Option<i64>) -> Result<i64> {
    match (principal.role, requested) {
        (Role::Student, None) => Ok(principal.user_id),
        (Role::Student, Some(id)) if id == principal.user_id => Ok(id),
        (Role::Student, Some(id)) => {
            tracing::warn!(
                "🚫 Student {} tried to check in as student {}",
                principal.user_id,
                id
            );
            Err(AppError::Unauthorized)
        }
        (_, Some(id)) => Ok(id),
        (_, None) => Err(AppError::Validation("student_id is required".to_string())),
    }
}

/// Checks a student in with a scanned QR token.
#[axum::debug_handler]
pub async fn check_in(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CheckInRequest>,
) -> Result<Response> {
    validate_token(&req.token)?;
    let student_id = check_in_subject(&principal, req.student_id)?;
    validate_id("student_id", student_id)?;

    let outcome = state.checkins.check_in(&req.token, student_id).await?;
    let record = outcome.record;

    reply::json(
        StatusCode::OK,
        &CheckInResponse {
            success: true,
            attendance_id: record.id,
            session_id: record.session_id,
            status: record.status,
            check_in_time: record.check_in_time,
            message: if outcome.created {
                "Checked in successfully"
            } else {
                "Attendance updated to present"
            },
        },
    )
}

/// Lists every record of a session.
#[axum::debug_handler]
pub async fn list_records(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<i64>,
) -> Result<Response> {
    validate_id("session_id", session_id)?;

    let records = state.checkins.list(&principal, session_id).await?;

    reply::json(
        StatusCode::OK,
        &RecordsResponse {
            session_id,
            count: records.len(),
            records,
        },
    )
}

/// Marks a student with an explicit status.
#[axum::debug_handler]
pub async fn mark(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<i64>,
    Json(req): Json<MarkRequest>,
) -> Result<Response> {
    validate_id("session_id", session_id)?;
    validate_id("student_id", req.student_id)?;
    validate_notes(req.notes.as_deref())?;

    let record = state
        .checkins
        .mark(&principal, session_id, req.student_id, req.status, req.notes)
        .await?;

    reply::json(StatusCode::OK, &record)
}

/// Per-status counts for a session.
#[axum::debug_handler]
pub async fn summary(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<i64>,
) -> Result<Response> {
    validate_id("session_id", session_id)?;

    let summary = state.checkins.summary(&principal, session_id).await?;

    reply::json(StatusCode::OK, &summary)
}

/// Closes a session to further check-ins.
#[axum::debug_handler]
pub async fn end_session(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<i64>,
) -> Result<Response> {
    validate_id("session_id", session_id)?;

    let session = state.checkins.end_session(&principal, session_id).await?;

    reply::json(
        StatusCode::OK,
        &EndSessionResponse {
            success: true,
            session_id: session.id,
            is_active: session.is_active,
            end_time: session.end_time,
        },
    )
}
