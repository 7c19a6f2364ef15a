//! Turns a presented token and a student identity into a durable attendance
//! outcome, and hosts the teacher-side attendance operations.

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{AppError, Result};
use crate::models::attendance::{AttendanceRecord, AttendanceStatus, AttendanceSummary, CheckInWrite};
use crate::models::session::AttendanceSession;
use crate::models::user::Principal;
use crate::realtime::hub::EventHub;
use crate::realtime::messages::{
    AttendanceEvent, AttendanceSource, NotificationEvent, ServerMessage, SessionStatusEvent, Topic,
};
use crate::repositories::attendance::AttendanceStore;
use crate::services::access;
use crate::services::tokens::TokenService;

/// The outcome of a successful check-in.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckInOutcome {
    pub record: AttendanceRecord,
    /// `false` when a prior non-present record was corrected.
    pub created: bool,
}

#[derive(Clone)]
pub struct CheckInController {
    tokens: TokenService,
    store: Arc<dyn AttendanceStore>,
    hub: EventHub,
    clock: Arc<dyn Clock>,
}

impl CheckInController {
    /// Creates a new `CheckInController`.
    pub fn new(
        tokens: TokenService,
        store: Arc<dyn AttendanceStore>,
        hub: EventHub,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tokens,
            store,
            hub,
            clock,
        }
    }

    /// Checks `student_id` in with a scanned token.
    ///
    /// Token failures propagate unchanged. The record is committed before
    /// anything is published.
    pub async fn check_in(&self, token: &str, student_id: i64) -> Result<CheckInOutcome> {
        let claims = self.tokens.validate(token).await?;
        let session_id = claims.session_id;
        let now = self.clock.now();

        let session = self
            .store
            .find_session(session_id)
            .await?
            .ok_or_else(|| AppError::AccessDenied("Session not found".to_string()))?;

        if !session.is_open_at(now) {
            tracing::info!("🚫 Check-in refused: session {} is not active", session_id);
            return Err(AppError::AccessDenied("Session is not active".to_string()));
        }

        if !self.store.is_enrolled(session_id, student_id).await? {
            tracing::warn!(
                "🚫 Check-in refused: student {} is not enrolled for session {}",
                student_id,
                session_id
            );
            return Err(AppError::AccessDenied(
                "You are not enrolled in this class".to_string(),
            ));
        }

        if let Some(existing) = self.store.find_attendance(session_id, student_id).await? {
            if existing.status == AttendanceStatus::Present {
                return Err(AppError::AlreadyCheckedIn);
            }
        }

        let (record, created) = match self.store.record_check_in(session_id, student_id, now).await? {
            CheckInWrite::Created(record) => (record, true),
            CheckInWrite::Updated(record) => (record, false),
            // Lost the race to a concurrent check-in for the same student.
            CheckInWrite::AlreadyPresent => return Err(AppError::AlreadyCheckedIn),
        };

        tracing::info!(
            "✅ Student {} checked in to session {} (record {})",
            student_id,
            session_id,
            record.id
        );

        self.hub.publish(
            Topic::Session(session_id),
            ServerMessage::AttendanceUpdate {
                data: AttendanceEvent::from_record(&record, AttendanceSource::QrCheckIn),
                timestamp: now,
            },
        );
        self.hub.publish(
            Topic::User(student_id),
            ServerMessage::Notification {
                data: NotificationEvent {
                    title: "Check-in successful".to_string(),
                    message: format!("You are marked present for {}", session.session_name),
                },
                timestamp: now,
            },
        );

        Ok(CheckInOutcome { record, created })
    }

    /// Loads a session `principal` is allowed to manage.
    pub async fn managed_session(
        &self,
        principal: &Principal,
        session_id: i64,
    ) -> Result<AttendanceSession> {
        let session = self
            .store
            .find_session(session_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if !access::can_manage(principal, &session) {
            tracing::warn!(
                "🚫 User {} ({}) may not manage session {}",
                principal.user_id,
                principal.role,
                session_id
            );
            return Err(AppError::Unauthorized);
        }

        Ok(session)
    }

    /// Records an explicit status for a student, overwriting any prior one.
    pub async fn mark(
        &self,
        principal: &Principal,
        session_id: i64,
        student_id: i64,
        status: AttendanceStatus,
        notes: Option<String>,
    ) -> Result<AttendanceRecord> {
        self.managed_session(principal, session_id).await?;

        if !self.store.is_enrolled(session_id, student_id).await? {
            return Err(AppError::AccessDenied(format!(
                "Student {} is not enrolled in this class",
                student_id
            )));
        }

        let now = self.clock.now();
        let record = self
            .store
            .upsert_status(session_id, student_id, status, notes, now)
            .await?;

        tracing::info!(
            "📝 Session {}: student {} marked {} by user {}",
            session_id,
            student_id,
            status.as_str(),
            principal.user_id
        );

        self.hub.publish(
            Topic::Session(session_id),
            ServerMessage::AttendanceUpdate {
                data: AttendanceEvent::from_record(&record, AttendanceSource::Manual),
                timestamp: now,
            },
        );

        Ok(record)
    }

    pub async fn list(&self, principal: &Principal, session_id: i64) -> Result<Vec<AttendanceRecord>> {
        self.managed_session(principal, session_id).await?;
        self.store.list_attendance(session_id).await
    }

    pub async fn summary(&self, principal: &Principal, session_id: i64) -> Result<AttendanceSummary> {
        let records = self.list(principal, session_id).await?;
        Ok(AttendanceSummary::from_records(session_id, &records))
    }

    /// Closes a session to further check-ins and tells its watchers.
    pub async fn end_session(&self, principal: &Principal, session_id: i64) -> Result<AttendanceSession> {
        self.managed_session(principal, session_id).await?;

        let now = self.clock.now();
        let session = self
            .store
            .end_session(session_id, now)
            .await?
            .ok_or(AppError::NotFound)?;

        tracing::info!("🔚 Session {} ended by user {}", session_id, principal.user_id);

        self.hub.publish(
            Topic::Session(session_id),
            ServerMessage::SessionStatusUpdate {
                data: SessionStatusEvent {
                    session_id,
                    is_active: session.is_active,
                },
                timestamp: now,
            },
        );

        Ok(session)
    }
}
