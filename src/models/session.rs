use chrono::{DateTime, Utc};
use serde::Serialize;

/// A scheduled class meeting that attendance is taken for.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceSession {
    /// The unique identifier for the session.
    pub id: i64,
    /// The class whose roster is eligible to check in.
    pub class_id: i64,
    /// The teacher who owns the class.
    pub teacher_id: i64,
    /// Display name shown on the QR code.
    pub session_name: String,
    /// Whether the session accepts check-ins.
    pub is_active: bool,
    /// Scheduled start.
    pub start_time: DateTime<Utc>,
    /// Scheduled end. No check-ins after this instant.
    pub end_time: DateTime<Utc>,
}

impl AttendanceSession {
    /// Whether check-ins are accepted at `now`.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.end_time >= now
    }
}
