use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;

use crate::{
    error::{AppError, Result},
    models::{
        attendance::{AttendanceRecord, AttendanceStatus, CheckInWrite},
        session::AttendanceSession,
    },
};

/// Durable storage for sessions, enrollment and attendance records.
///
/// Implementations must keep at most one attendance record per
/// (session, student) pair, and `record_check_in` must make its
/// created/updated/already-present decision atomically with respect to
/// other writers of the same pair.
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Looks up a session together with its class owner.
    async fn find_session(&self, session_id: i64) -> Result<Option<AttendanceSession>>;

    /// Whether `student_id` is an active member of the session's class.
    async fn is_enrolled(&self, session_id: i64, student_id: i64) -> Result<bool>;

    /// The record for the pair, if any.
    async fn find_attendance(
        &self,
        session_id: i64,
        student_id: i64,
    ) -> Result<Option<AttendanceRecord>>;

    /// Marks the student present unless they already are.
    async fn record_check_in(
        &self,
        session_id: i64,
        student_id: i64,
        at: DateTime<Utc>,
    ) -> Result<CheckInWrite>;

    /// Creates or overwrites the pair's record with an explicit status.
    /// `present` stamps `check_in_time` with `at`, any other status clears it.
    async fn upsert_status(
        &self,
        session_id: i64,
        student_id: i64,
        status: AttendanceStatus,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<AttendanceRecord>;

    /// Every record of a session, ordered by student.
    async fn list_attendance(&self, session_id: i64) -> Result<Vec<AttendanceRecord>>;

    /// Deactivates a session. Returns the updated session, `None` if it
    /// does not exist.
    async fn end_session(
        &self,
        session_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<AttendanceSession>>;
}

/// A helper function to map a `tokio_postgres::Row` to an `AttendanceRecord`.
fn row_to_record(row: &Row) -> Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: row.try_get("id").map_err(|_| AppError::MissingData("id".to_string()))?,
        session_id: row.try_get("session_id").map_err(|_| AppError::MissingData("session_id".to_string()))?,
        student_id: row.try_get("student_id").map_err(|_| AppError::MissingData("student_id".to_string()))?,
        status: row.try_get("status").map_err(|_| AppError::MissingData("status".to_string()))?,
        check_in_time: row.try_get("check_in_time").map_err(|_| AppError::MissingData("check_in_time".to_string()))?,
        notes: row.try_get("notes").map_err(|_| AppError::MissingData("notes".to_string()))?,
        created_at: row.try_get("created_at").map_err(|_| AppError::MissingData("created_at".to_string()))?,
        updated_at: row.try_get("updated_at").map_err(|_| AppError::MissingData("updated_at".to_string()))?,
    })
}

/// A helper function to map a `tokio_postgres::Row` to an `AttendanceSession`.
fn row_to_session(row: &Row) -> Result<AttendanceSession> {
    Ok(AttendanceSession {
        id: row.try_get("id").map_err(|_| AppError::MissingData("id".to_string()))?,
        class_id: row.try_get("class_id").map_err(|_| AppError::MissingData("class_id".to_string()))?,
        teacher_id: row.try_get("teacher_id").map_err(|_| AppError::MissingData("teacher_id".to_string()))?,
        session_name: row.try_get("session_name").map_err(|_| AppError::MissingData("session_name".to_string()))?,
        is_active: row.try_get("is_active").map_err(|_| AppError::MissingData("is_active".to_string()))?,
        start_time: row.try_get("start_time").map_err(|_| AppError::MissingData("start_time".to_string()))?,
        end_time: row.try_get("end_time").map_err(|_| AppError::MissingData("end_time".to_string()))?,
    })
}

/// [`AttendanceStore`] over a PostgreSQL pool. See `migrations/` for the
/// schema it expects.
#[derive(Clone)]
pub struct PgAttendanceStore {
    pool: Pool,
}

impl PgAttendanceStore {
    /// Creates a new `PgAttendanceStore`.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttendanceStore for PgAttendanceStore {
    async fn find_session(&self, session_id: i64) -> Result<Option<AttendanceSession>> {
        let client = self.pool.get().await?;
        let stmt = client
            .prepare_cached(
                r#"
                SELECT s.id, s.class_id, c.teacher_id, s.session_name,
                       s.is_active, s.start_time, s.end_time
                FROM attendance_sessions s
                JOIN classes c ON c.id = s.class_id
                WHERE s.id = $1
                "#,
            )
            .await?;
        let row = client.query_opt(&stmt, &[&session_id]).await?;
        row.map(|r| row_to_session(&r)).transpose()
    }

    async fn is_enrolled(&self, session_id: i64, student_id: i64) -> Result<bool> {
        let client = self.pool.get().await?;
        let stmt = client
            .prepare_cached(
                r#"
                SELECT EXISTS (
                    SELECT 1
                    FROM enrollments e
                    JOIN attendance_sessions s ON s.class_id = e.class_id
                    WHERE s.id = $1 AND e.student_id = $2 AND e.is_active = true
                ) AS enrolled
                "#,
            )
            .await?;
        let row = client.query_one(&stmt, &[&session_id, &student_id]).await?;
        row.try_get("enrolled")
            .map_err(|_| AppError::MissingData("enrolled".to_string()))
    }

    async fn find_attendance(
        &self,
        session_id: i64,
        student_id: i64,
    ) -> Result<Option<AttendanceRecord>> {
        let client = self.pool.get().await?;
        let stmt = client
            .prepare_cached(
                r#"
                SELECT *
                FROM attendance
                WHERE session_id = $1 AND student_id = $2
                "#,
            )
            .await?;
        let row = client.query_opt(&stmt, &[&session_id, &student_id]).await?;
        row.map(|r| row_to_record(&r)).transpose()
    }

    async fn record_check_in(
        &self,
        session_id: i64,
        student_id: i64,
        at: DateTime<Utc>,
    ) -> Result<CheckInWrite> {
        let client = self.pool.get().await?;
        // The unique (session_id, student_id) constraint arbitrates racing
        // writers. The WHERE on the update arm leaves an existing present
        // row untouched and returns nothing.
        let stmt = client
            .prepare_cached(
                r#"
                INSERT INTO attendance (session_id, student_id, status, check_in_time)
                VALUES ($1, $2, 'present', $3)
                ON CONFLICT (session_id, student_id) DO UPDATE
                SET
                    status = 'present',
                    check_in_time = EXCLUDED.check_in_time,
                    updated_at = NOW()
                WHERE attendance.status <> 'present'
                RETURNING *, (xmax = 0) AS inserted
                "#,
            )
            .await?;
        let row = client
            .query_opt(&stmt, &[&session_id, &student_id, &at])
            .await?;

        let Some(row) = row else {
            return Ok(CheckInWrite::AlreadyPresent);
        };

        let record = row_to_record(&row)?;
        let inserted: bool = row
            .try_get("inserted")
            .map_err(|_| AppError::MissingData("inserted".to_string()))?;

        Ok(if inserted {
            CheckInWrite::Created(record)
        } else {
            CheckInWrite::Updated(record)
        })
    }

    async fn upsert_status(
        &self,
        session_id: i64,
        student_id: i64,
        status: AttendanceStatus,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<AttendanceRecord> {
        let check_in_time = (status == AttendanceStatus::Present).then_some(at);

        let client = self.pool.get().await?;
        let stmt = client
            .prepare_cached(
                r#"
                INSERT INTO attendance (session_id, student_id, status, check_in_time, notes)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (session_id, student_id) DO UPDATE
                SET
                    status = EXCLUDED.status,
                    check_in_time = EXCLUDED.check_in_time,
                    notes = EXCLUDED.notes,
                    updated_at = NOW()
                RETURNING *
                "#,
            )
            .await?;
        let row = client
            .query_one(
                &stmt,
                &[&session_id, &student_id, &status, &check_in_time, &notes],
            )
            .await?;
        row_to_record(&row)
    }

    async fn list_attendance(&self, session_id: i64) -> Result<Vec<AttendanceRecord>> {
        let client = self.pool.get().await?;
        let stmt = client
            .prepare_cached(
                r#"
                SELECT *
                FROM attendance
                WHERE session_id = $1
                ORDER BY student_id
                "#,
            )
            .await?;
        let rows = client.query(&stmt, &[&session_id]).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn end_session(
        &self,
        session_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<AttendanceSession>> {
        let client = self.pool.get().await?;
        let stmt = client
            .prepare_cached(
                r#"
                WITH ended AS (
                    UPDATE attendance_sessions
                    SET is_active = false, end_time = LEAST(end_time, $2)
                    WHERE id = $1
                    RETURNING *
                )
                SELECT e.id, e.class_id, c.teacher_id, e.session_name,
                       e.is_active, e.start_time, e.end_time
                FROM ended e
                JOIN classes c ON c.id = e.class_id
                "#,
            )
            .await?;
        let row = client.query_opt(&stmt, &[&session_id, &at]).await?;
        row.map(|r| row_to_session(&r)).transpose()
    }
}
