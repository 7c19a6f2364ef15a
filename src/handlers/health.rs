use axum::{extract::State, http::StatusCode, response::Response};
use serde::Serialize;

use crate::{error::Result, handlers::reply, state::AppState};

#[derive(Serialize)]
struct Health {
    status: &'static str,
    connections: usize,
}

/// Liveness probe. Reports how many real-time connections are open.
pub async fn health(State(state): State<AppState>) -> Result<Response> {
    reply::json(
        StatusCode::OK,
        &Health {
            status: "ok",
            connections: state.hub.connection_count(),
        },
    )
}
