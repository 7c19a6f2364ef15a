use crate::error::Result;
use crate::models::session::AttendanceSession;
use crate::models::user::{Principal, Role};
use crate::repositories::attendance::AttendanceStore;

/// Whether `principal` may run the session: issue tokens, mark attendance,
/// end it. Admins always may; teachers only for classes they own.
pub fn can_manage(principal: &Principal, session: &AttendanceSession) -> bool {
    match principal.role {
        Role::Admin => true,
        Role::Teacher => session.teacher_id == principal.user_id,
        Role::Student => false,
    }
}

/// Whether `principal` may watch a session's live updates: the owning
/// teacher, an enrolled student, or an admin. Unknown sessions are denied.
pub async fn can_view(
    store: &dyn AttendanceStore,
    principal: &Principal,
    session_id: i64,
) -> Result<bool> {
    let Some(session) = store.find_session(session_id).await? else {
        return Ok(false);
    };

    match principal.role {
        Role::Admin | Role::Teacher => Ok(can_manage(principal, &session)),
        Role::Student => store.is_enrolled(session_id, principal.user_id).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::MemoryStore;
    use chrono::{Duration, Utc};

    fn store() -> MemoryStore {
        let now = Utc::now();
        let store = MemoryStore::new();
        store.add_session(AttendanceSession {
            id: 42,
            class_id: 1,
            teacher_id: 7,
            session_name: "Algebra".to_string(),
            is_active: true,
            start_time: now,
            end_time: now + Duration::hours(1),
        });
        store.enroll(1, 5);
        store
    }

    fn who(user_id: i64, role: Role) -> Principal {
        Principal { user_id, role }
    }

    #[tokio::test]
    async fn owner_enrolled_student_and_admin_may_view() {
        let store = store();
        assert!(can_view(&store, &who(7, Role::Teacher), 42).await.unwrap());
        assert!(can_view(&store, &who(5, Role::Student), 42).await.unwrap());
        assert!(can_view(&store, &who(1, Role::Admin), 42).await.unwrap());
    }

    #[tokio::test]
    async fn others_may_not_view() {
        let store = store();
        assert!(!can_view(&store, &who(8, Role::Teacher), 42).await.unwrap());
        assert!(!can_view(&store, &who(99, Role::Student), 42).await.unwrap());
        assert!(!can_view(&store, &who(1, Role::Admin), 404).await.unwrap());
    }

    #[tokio::test]
    async fn students_never_manage() {
        let store = store();
        let session = store.find_session(42).await.unwrap().unwrap();
        assert!(can_manage(&who(7, Role::Teacher), &session));
        assert!(!can_manage(&who(5, Role::Student), &session));
    }
}
