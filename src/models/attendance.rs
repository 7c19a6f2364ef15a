use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};

/// Attendance outcome for one student in one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "lowercase")]
#[postgres(name = "attendance_status")]
pub enum AttendanceStatus {
    #[postgres(name = "present")]
    Present,
    #[postgres(name = "absent")]
    Absent,
    #[postgres(name = "late")]
    Late,
    #[postgres(name = "excused")]
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }
}

/// The single attendance row for a (session, student) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    /// The unique identifier for the record.
    pub id: i64,
    pub session_id: i64,
    pub student_id: i64,
    pub status: AttendanceStatus,
    /// Set whenever the student is marked present.
    pub check_in_time: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the durable store did with a QR check-in.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckInWrite {
    /// No record existed; one was created as present.
    Created(AttendanceRecord),
    /// A non-present record was corrected to present.
    Updated(AttendanceRecord),
    /// The student was already present; nothing was written.
    AlreadyPresent,
}

/// Per-status counts for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttendanceSummary {
    pub session_id: i64,
    pub total: i64,
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    /// Present over total, as a percentage rounded to two decimals.
    pub attendance_rate: f64,
}

impl AttendanceSummary {
    /// Tallies `records` for `session_id`.
    pub fn from_records(session_id: i64, records: &[AttendanceRecord]) -> Self {
        let mut summary = AttendanceSummary {
            session_id,
            ..Default::default()
        };

        for record in records {
            summary.total += 1;
            match record.status {
                AttendanceStatus::Present => summary.present += 1,
                AttendanceStatus::Absent => summary.absent += 1,
                AttendanceStatus::Late => summary.late += 1,
                AttendanceStatus::Excused => summary.excused += 1,
            }
        }

        if summary.total > 0 {
            let rate = summary.present as f64 / summary.total as f64 * 100.0;
            summary.attendance_rate = (rate * 100.0).round() / 100.0;
        }

        summary
    }
}
