//! In-process [`AttendanceStore`] used by tests and local tooling.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Result;
use crate::models::attendance::{AttendanceRecord, AttendanceStatus, CheckInWrite};
use crate::models::session::AttendanceSession;
use crate::repositories::attendance::AttendanceStore;

#[derive(Default)]
struct Tables {
    sessions: HashMap<i64, AttendanceSession>,
    // class_id -> active student ids
    rosters: HashMap<i64, HashSet<i64>>,
    attendance: BTreeMap<(i64, i64), AttendanceRecord>,
    next_record_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_record_id += 1;
        self.next_record_id
    }
}

/// Every table behind one lock, so each write decides and commits as a unit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces a session.
    pub fn add_session(&self, session: AttendanceSession) {
        self.lock().sessions.insert(session.id, session);
    }

    /// Adds `student_id` to the roster of `class_id`.
    pub fn enroll(&self, class_id: i64, student_id: i64) {
        self.lock().rosters.entry(class_id).or_default().insert(student_id);
    }

    /// Removes `student_id` from the roster of `class_id`.
    pub fn withdraw(&self, class_id: i64, student_id: i64) {
        if let Some(roster) = self.lock().rosters.get_mut(&class_id) {
            roster.remove(&student_id);
        }
    }

    /// Number of attendance records held for a session.
    pub fn record_count(&self, session_id: i64) -> usize {
        self.lock()
            .attendance
            .keys()
            .filter(|(session, _)| *session == session_id)
            .count()
    }
}

#[async_trait]
impl AttendanceStore for MemoryStore {
    async fn find_session(&self, session_id: i64) -> Result<Option<AttendanceSession>> {
        Ok(self.lock().sessions.get(&session_id).cloned())
    }

    async fn is_enrolled(&self, session_id: i64, student_id: i64) -> Result<bool> {
        let tables = self.lock();
        let enrolled = tables
            .sessions
            .get(&session_id)
            .and_then(|s| tables.rosters.get(&s.class_id))
            .is_some_and(|roster| roster.contains(&student_id));
        Ok(enrolled)
    }

    async fn find_attendance(
        &self,
        session_id: i64,
        student_id: i64,
    ) -> Result<Option<AttendanceRecord>> {
        Ok(self.lock().attendance.get(&(session_id, student_id)).cloned())
    }

    async fn record_check_in(
        &self,
        session_id: i64,
        student_id: i64,
        at: DateTime<Utc>,
    ) -> Result<CheckInWrite> {
        let mut tables = self.lock();

        if let Some(existing) = tables.attendance.get_mut(&(session_id, student_id)) {
            if existing.status == AttendanceStatus::Present {
                return Ok(CheckInWrite::AlreadyPresent);
            }
            existing.status = AttendanceStatus::Present;
            existing.check_in_time = Some(at);
            existing.updated_at = at;
            return Ok(CheckInWrite::Updated(existing.clone()));
        }

        let record = AttendanceRecord {
            id: tables.next_id(),
            session_id,
            student_id,
            status: AttendanceStatus::Present,
            check_in_time: Some(at),
            notes: None,
            created_at: at,
            updated_at: at,
        };
        tables
            .attendance
            .insert((session_id, student_id), record.clone());

        Ok(CheckInWrite::Created(record))
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
        let mut tables = self.lock();

        if let Some(existing) = tables.attendance.get_mut(&(session_id, student_id)) {
            existing.status = status;
            existing.check_in_time = check_in_time;
            existing.notes = notes;
            existing.updated_at = at;
            return Ok(existing.clone());
        }

        let record = AttendanceRecord {
            id: tables.next_id(),
            session_id,
            student_id,
            status,
            check_in_time,
            notes,
            created_at: at,
            updated_at: at,
        };
        tables
            .attendance
            .insert((session_id, student_id), record.clone());
        Ok(record)
    }

    async fn list_attendance(&self, session_id: i64) -> Result<Vec<AttendanceRecord>> {
        Ok(self
            .lock()
            .attendance
            .range((session_id, i64::MIN)..=(session_id, i64::MAX))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn end_session(
        &self,
        session_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<AttendanceSession>> {
        let mut tables = self.lock();
        Ok(tables.sessions.get_mut(&session_id).map(|session| {
            session.is_active = false;
            session.end_time = session.end_time.min(at);
            session.clone()
        }))
    }
}
