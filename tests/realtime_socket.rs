use chrono::Duration as ChronoDuration;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use zeroize::Zeroizing;

use rollcall::{
    cache::MemoryCache,
    clock::{Clock, ManualClock},
    models::{
        session::AttendanceSession,
        user::{Principal, Role},
    },
    realtime::{
        gateway::AUTH_FAILURE_CLOSE_CODE,
        hub::EventHub,
        messages::{ServerMessage, SessionStatusEvent, Topic},
    },
    repositories::memory::MemoryStore,
    routes::build_router,
    services::{credentials::StaticCredentials, tokens::TokenSettings},
    state::{AppState, Collaborators},
};

const START: i64 = 1_700_000_000;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// Shared test context: the router served on an ephemeral port
struct TestContext {
    addr: SocketAddr,
    hub: EventHub,
    clock: ManualClock,
}

impl TestContext {
    async fn new() -> Self {
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

        let credentials = StaticCredentials::new()
            .with("teacher-7", Principal { user_id: 7, role: Role::Teacher })
            .with("student-5", Principal { user_id: 5, role: Role::Student })
            .with("student-99", Principal { user_id: 99, role: Role::Student });

        let state = AppState::assemble(
            Collaborators {
                cache: Arc::new(MemoryCache::new(shared_clock.clone())),
                store: Arc::new(store),
                credentials: Arc::new(credentials),
                clock: shared_clock,
            },
            Zeroizing::new(vec![42u8; 32]),
            TokenSettings::default(),
            16,
        );
        let hub = state.hub.clone();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });

        Self { addr, hub, clock }
    }

    async fn connect(&self, query: &str) -> Socket {
        let url = format!("ws://{}/ws/attendance{}", self.addr, query);
        let (socket, _) = connect_async(url).await.unwrap();
        socket
    }

    async fn wait_for_connections(&self, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.hub.connection_count() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "expected {} connections, hub has {}",
                expected,
                self.hub.connection_count()
            )
        });
    }
}

async fn next_message(socket: &mut Socket) -> Message {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("no frame within 5s")
            .expect("socket ended")
            .expect("socket error");

        match message {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

async fn next_json(socket: &mut Socket) -> Value {
    match next_message(socket).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected a text frame, got {:?}", other),
    }
}

async fn send_json(socket: &mut Socket, value: Value) {
    socket
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

async fn expect_auth_close(socket: &mut Socket) {
    match next_message(socket).await {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), AUTH_FAILURE_CLOSE_CODE);
        }
        other => panic!("expected a close frame, got {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_credential_is_closed_with_4001() {
        let context = TestContext::new().await;

        let mut socket = context.connect("?token=nobody").await;
        expect_auth_close(&mut socket).await;

        assert_eq!(context.hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_credential_is_closed_with_4001() {
        let context = TestContext::new().await;

        let mut socket = context.connect("").await;
        expect_auth_close(&mut socket).await;

        let mut socket = context.connect("?token=").await;
        expect_auth_close(&mut socket).await;
    }

    #[tokio::test]
    async fn test_subscribe_relay_and_disconnect() {
        let context = TestContext::new().await;

        // Step 1: The first frame greets the authenticated user
        let mut socket = context.connect("?token=teacher-7").await;
        let welcome = next_json(&mut socket).await;
        assert_eq!(welcome["type"], "connection_established");
        assert_eq!(welcome["user_id"], 7);
        assert_eq!(welcome["user_role"], "teacher");
        context.wait_for_connections(1).await;

        // Step 2: Subscribe to the session
        send_json(
            &mut socket,
            json!({ "type": "subscribe_session", "session_id": 42 }),
        )
        .await;
        let confirmed = next_json(&mut socket).await;
        assert_eq!(confirmed["type"], "subscription_confirmed");
        assert_eq!(confirmed["session_id"], 42);

        // Step 3: Events published on the session reach the socket
        let delivered = context.hub.publish(
            Topic::Session(42),
            ServerMessage::SessionStatusUpdate {
                data: SessionStatusEvent {
                    session_id: 42,
                    is_active: false,
                },
                timestamp: context.clock.now(),
            },
        );
        assert_eq!(delivered, 1);

        let relayed = next_json(&mut socket).await;
        assert_eq!(relayed["type"], "session_status_update");
        assert_eq!(relayed["data"]["session_id"], 42);
        assert_eq!(relayed["data"]["is_active"], false);

        // Step 4: Requests are answered in order on the same socket
        send_json(&mut socket, json!({ "type": "ping" })).await;
        assert_eq!(next_json(&mut socket).await["type"], "pong");

        send_json(&mut socket, json!({ "type": "shout" })).await;
        let error = next_json(&mut socket).await;
        assert_eq!(error["type"], "error");
        assert_eq!(error["message"], "Unknown message type: shout");

        // Step 5: Closing the socket releases every subscription
        socket.close(None).await.unwrap();
        context.wait_for_connections(0).await;
        assert_eq!(context.hub.subscriber_count(Topic::Session(42)), 0);
    }

    #[tokio::test]
    async fn test_unenrolled_student_cannot_follow_session() {
        let context = TestContext::new().await;

        let mut socket = context.connect("?token=student-99").await;
        assert_eq!(next_json(&mut socket).await["type"], "connection_established");

        send_json(
            &mut socket,
            json!({ "type": "subscribe_session", "session_id": 42 }),
        )
        .await;
        let denied = next_json(&mut socket).await;
        assert_eq!(denied["type"], "error");
        assert_eq!(denied["message"], "Access denied to this session");
        assert_eq!(context.hub.subscriber_count(Topic::Session(42)), 0);

        // Enrolled students may follow the session they attend.
        let mut enrolled = context.connect("?token=student-5").await;
        assert_eq!(next_json(&mut enrolled).await["type"], "connection_established");
        send_json(
            &mut enrolled,
            json!({ "type": "subscribe_session", "session_id": 42 }),
        )
        .await;
        assert_eq!(next_json(&mut enrolled).await["type"], "subscription_confirmed");
        assert_eq!(context.hub.subscriber_count(Topic::Session(42)), 1);
    }
}
