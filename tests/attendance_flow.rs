use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::Duration as ChronoDuration;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use zeroize::Zeroizing;

use rollcall::{
    cache::MemoryCache,
    clock::{Clock, ManualClock},
    models::{
        session::AttendanceSession,
        user::{Principal, Role},
    },
    repositories::memory::MemoryStore,
    routes::build_router,
    services::{credentials::StaticCredentials, tokens::TokenSettings},
    state::{AppState, Collaborators},
};

const START: i64 = 1_700_000_000;

// Shared test context
struct TestContext {
    router: Router,
    clock: ManualClock,
}

impl TestContext {
    fn new() -> Self {
        let clock = ManualClock::at(START);
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());

        let store = MemoryStore::new();
        let now = clock.now();
        store.add_session(AttendanceSession {
            id: 42,
            class_id: 1,
            teacher_id: 7,
            session_name: "Physics 101".to_string(),
            is_active: true,
            start_time: now - ChronoDuration::minutes(10),
            end_time: now + ChronoDuration::hours(2),
        });
        store.enroll(1, 5);
        store.enroll(1, 6);

        let credentials = StaticCredentials::new()
            .with("teacher-7", Principal { user_id: 7, role: Role::Teacher })
            .with("teacher-8", Principal { user_id: 8, role: Role::Teacher })
            .with("admin-1", Principal { user_id: 1, role: Role::Admin })
            .with("student-5", Principal { user_id: 5, role: Role::Student })
            .with("student-6", Principal { user_id: 6, role: Role::Student })
            .with("student-99", Principal { user_id: 99, role: Role::Student });

        let state = AppState::assemble(
            Collaborators {
                cache: Arc::new(MemoryCache::new(shared_clock.clone())),
                store: Arc::new(store),
                credentials: Arc::new(credentials),
                clock: shared_clock,
            },
            Zeroizing::new(vec![42u8; 32]),
            TokenSettings {
                cache_timeout: Duration::from_secs(1),
                ..TokenSettings::default()
            },
            16,
        );

        Self {
            router: build_router(state),
            clock,
        }
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        credential: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(credential) = credential {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", credential));
        }

        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, value)
    }

    async fn issue_token(&self) -> String {
        let (status, body) = self
            .send(
                "POST",
                "/api/attendance/qr/issue",
                Some("teacher-7"),
                Some(json!({ "session_id": 42 })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "issue failed: {}", body);
        body["token"].as_str().unwrap().to_string()
    }

    async fn check_in(&self, credential: &str, token: &str) -> (StatusCode, Value) {
        self.send(
            "POST",
            "/api/attendance/check-in",
            Some(credential),
            Some(json!({ "token": token })),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_issue_check_in_and_duplicate() {
        let context = TestContext::new();

        // Step 1: Teacher issues a QR token
        let (status, body) = context
            .send(
                "POST",
                "/api/attendance/qr/issue",
                Some("teacher-7"),
                Some(json!({ "session_id": 42 })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["expires_in_seconds"], 1800);
        assert_eq!(body["qr_data"]["type"], "attendance_checkin");
        assert_eq!(body["qr_data"]["session_name"], "Physics 101");
        let token = body["token"].as_str().unwrap().to_string();

        // Step 2: Enrolled student checks in
        let (status, body) = context.check_in("student-5", &token).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["session_id"], 42);
        assert_eq!(body["status"], "present");
        assert!(body["attendance_id"].as_i64().unwrap() > 0);

        // Step 3: A second check-in is rejected
        let (status, body) = context.check_in("student-5", &token).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["kind"], "already_checked_in");

        // Step 4: Only one record exists
        let (status, body) = context
            .send("GET", "/api/attendance/sessions/42/summary", Some("teacher-7"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["present"], 1);
    }

    #[tokio::test]
    async fn test_unenrolled_student_is_denied() {
        let context = TestContext::new();
        let token = context.issue_token().await;

        let (status, body) = context.check_in("student-99", &token).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["kind"], "access_denied");
        assert_eq!(body["error"]["retryable"], false);
    }

    #[tokio::test]
    async fn test_expired_token_is_gone() {
        let context = TestContext::new();
        let token = context.issue_token().await;

        context.clock.advance(1801);
        let (status, body) = context.check_in("student-5", &token).await;

        assert_eq!(status, StatusCode::GONE);
        assert_eq!(body["error"]["kind"], "token_expired");
    }

    #[tokio::test]
    async fn test_tampered_token_reads_as_invalid() {
        let context = TestContext::new();
        let token = context.issue_token().await;

        let mut chars: Vec<char> = token.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == 'A' { 'B' } else { 'A' };
        let tampered: String = chars.into_iter().collect();

        let (status, body) = context.check_in("student-5", &tampered).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "invalid_token");

        let (status, body) = context.check_in("student-5", "not+base64/").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "invalid_token");

        let (status, body) = context.check_in("student-5", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "invalid_token");
    }

    #[tokio::test]
    async fn test_rate_limit_per_session() {
        let context = TestContext::new();
        let token = context.issue_token().await;

        // Step 1: Five validations spend the window's budget
        for _ in 0..5 {
            let (status, _) = context.check_in("student-99", &token).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
        }

        // Step 2: The sixth is throttled, even for an eligible student
        let (status, body) = context.check_in("student-5", &token).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["kind"], "rate_limited");
        assert_eq!(body["error"]["retryable"], true);

        // Step 3: The next window admits again
        context.clock.advance(60);
        let (status, _) = context.check_in("student-5", &token).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_and_revoke() {
        let context = TestContext::new();
        let token = context.issue_token().await;
        context.clock.advance(100);

        let (status, body) = context
            .send(
                "GET",
                "/api/attendance/qr/status?session_id=42",
                Some("teacher-7"),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"], true);
        assert_eq!(body["time_remaining"], 1700);
        let expires_at = body["expires_at"].as_str().unwrap();
        assert_eq!(
            chrono::DateTime::parse_from_rfc3339(expires_at).unwrap().timestamp(),
            START + 1800
        );

        let (status, body) = context
            .send(
                "POST",
                "/api/attendance/qr/revoke",
                Some("teacher-7"),
                Some(json!({ "session_id": 42 })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (_, body) = context
            .send(
                "GET",
                "/api/attendance/qr/status?session_id=42",
                Some("teacher-7"),
                None,
            )
            .await;
        assert_eq!(body["active"], false);

        // Revocation only clears the lookup; the token itself still works.
        let (status, _) = context.check_in("student-5", &token).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_authorization_rules() {
        let context = TestContext::new();

        let (status, body) = context
            .send("POST", "/api/attendance/qr/issue", None, Some(json!({ "session_id": 42 })))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["kind"], "unauthorized");

        let (status, _) = context
            .send(
                "POST",
                "/api/attendance/qr/issue",
                Some("teacher-8"),
                Some(json!({ "session_id": 42 })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = context
            .send(
                "POST",
                "/api/attendance/qr/issue",
                Some("teacher-7"),
                Some(json!({ "session_id": 42, "issuer_id": 8 })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = context
            .send(
                "POST",
                "/api/attendance/qr/issue",
                Some("admin-1"),
                Some(json!({ "session_id": 42, "issuer_id": 7 })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let token = context.issue_token().await;
        let (status, _) = context
            .send(
                "POST",
                "/api/attendance/check-in",
                Some("student-6"),
                Some(json!({ "token": token, "student_id": 5 })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_mark_list_and_end_session() {
        let context = TestContext::new();

        // Step 1: Teacher marks a student late
        let (status, body) = context
            .send(
                "POST",
                "/api/attendance/sessions/42/records",
                Some("teacher-7"),
                Some(json!({ "student_id": 6, "status": "late", "notes": "bus" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "late");
        assert_eq!(body["notes"], "bus");

        // Step 2: The record is listed
        let (status, body) = context
            .send("GET", "/api/attendance/sessions/42/records", Some("teacher-7"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["records"][0]["student_id"], 6);

        // Step 3: Ending the session blocks further check-ins
        let token = context.issue_token().await;
        let (status, body) = context
            .send("POST", "/api/attendance/sessions/42/end", Some("teacher-7"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_active"], false);

        context.clock.advance(1);
        let (status, body) = context.check_in("student-5", &token).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["kind"], "access_denied");
    }

    #[tokio::test]
    async fn test_health() {
        let context = TestContext::new();

        let (status, body) = context.send("GET", "/health", None, None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
    }
}
