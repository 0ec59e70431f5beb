use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::AppState;

/// Pre-shared-key middleware.
///
/// The terminal sends the key in `X-API-Key` on every call; health and
/// the public surface stay open. An empty configured key disables
/// authentication entirely (development mode).
pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let expected = &state.config.api_key;
    if expected.is_empty() {
        return Ok(next.run(request).await);
    }

    let path = request.uri().path();
    if path == "/health" || path.starts_with("/public/") {
        return Ok(next.run(request).await);
    }

    let provided = headers
        .get("X-API-Key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if provided.is_empty() {
        return Err(AuthError::Missing);
    }
    if provided != expected {
        tracing::warn!("Rejected request to {} with invalid API key", path);
        return Err(AuthError::Invalid);
    }

    Ok(next.run(request).await)
}

#[derive(Debug)]
pub enum AuthError {
    Missing,
    Invalid,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            AuthError::Missing => "Missing API key. Provide it via the X-API-Key header.",
            AuthError::Invalid => "Invalid API key.",
        };
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": message })),
        )
            .into_response()
    }
}
