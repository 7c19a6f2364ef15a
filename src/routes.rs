use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};

use crate::{handlers, middleware_layer, state::AppState};

/// Builds the HTTP and WebSocket routes over `state`.
///
/// Cross-cutting layers (tracing, CORS, per-IP throttling) are added by the
/// binary so tests can drive the bare router.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/api/attendance/qr/issue", post(handlers::qr::issue))
        .route("/api/attendance/qr/revoke", post(handlers::qr::revoke))
        .route("/api/attendance/qr/status", get(handlers::qr::status))
        .route("/api/attendance/check-in", post(handlers::attendance::check_in))
        .route(
            "/api/attendance/sessions/{session_id}/records",
            get(handlers::attendance::list_records).post(handlers::attendance::mark),
        )
        .route(
            "/api/attendance/sessions/{session_id}/summary",
            get(handlers::attendance::summary),
        )
        .route(
            "/api/attendance/sessions/{session_id}/end",
            post(handlers::attendance::end_session),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_auth,
        ))
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/ws/attendance", get(handlers::realtime::attendance_ws))
        .route("/health", get(handlers::health::health))
        .with_state(state);

    Router::new().merge(api_routes).merge(public_routes)
}
