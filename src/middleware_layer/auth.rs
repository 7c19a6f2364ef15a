use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};

use crate::{error::AppError, state::AppState};

/// Extracts the bearer credential from the `Authorization` header.
fn extract_bearer(request: &Request<Body>) -> Option<String> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|credential| !credential.is_empty())
        .map(str::to_string)
}

/// A middleware that requires a valid bearer credential.
///
/// On success the caller's [`Principal`](crate::models::user::Principal) is
/// inserted into the request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    tracing::debug!("🔐 Checking authentication...");

    let credential = extract_bearer(&request).ok_or_else(|| {
        tracing::warn!("❌ No bearer credential found");
        AppError::Authentication("Missing bearer credential".to_string())
    })?;

    let principal = state.credentials.verify(&credential).await?;

    tracing::debug!("✅ User authenticated: {} ({})", principal.user_id, principal.role);

    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}
