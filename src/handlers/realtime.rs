use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use serde::Deserialize;

use crate::{
    error::AppError,
    realtime::gateway::{AUTH_FAILURE_CLOSE_CODE, ConnectionGateway},
    state::AppState,
};

/// The query parameters of the real-time endpoint.
#[derive(Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub token: Option<String>,
}

/// Upgrades to the attendance WebSocket. Authentication happens after the
/// upgrade so a failure can be reported with a close code.
pub async fn attendance_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
) -> Response {
    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| serve_connection(socket, gateway, params.token))
}

async fn serve_connection(mut socket: WebSocket, gateway: ConnectionGateway, token: Option<String>) {
    let opened = match token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        Some(credential) => gateway.open(credential).await,
        None => Err(AppError::Authentication("Missing token".to_string())),
    };

    let (mut conn, mut events) = match opened {
        Ok(pair) => pair,
        Err(e) => {
            tracing::debug!("Closing unauthenticated socket: {}", e);
            let close = Message::Close(Some(CloseFrame {
                code: AUTH_FAILURE_CLOSE_CODE,
                reason: "Authentication failed".into(),
            }));
            if let Err(e) = socket.send(close).await {
                tracing::debug!("Failed to send close frame: {}", e);
            }
            return;
        }
    };

    if socket
        .send(Message::Text(conn.welcome().to_json().into()))
        .await
        .is_err()
    {
        conn.close();
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = conn.handle_frame(text.as_str()).await;
                    if socket.send(Message::Text(reply.to_json().into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Ping/pong control frames are answered by the transport.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("Socket error on connection {}: {}", conn.id(), e);
                    break;
                }
            },
            event = events.recv() => match event {
                Some(message) => {
                    if socket.send(Message::Text(message.to_json().into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    conn.close();
}
