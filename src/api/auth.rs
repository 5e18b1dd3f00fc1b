use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::AppState;

/// Shared-key middleware for the frontend adapter. Accepts the key from:
/// 1. `X-Api-Key` header
/// 2. `Authorization: Bearer <key>` header
///
/// When no key is configured the API is open; that mode is meant for local
/// development behind a loopback bind only.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let expected = {
        let config = state.config().read().await;
        config.server.api_key.clone()
    };

    let Some(expected) = expected else {
        return next.run(request).await;
    };

    if let Some(presented) = extract_api_key(&headers)
        && presented == expected
    {
        return next.run(request).await;
    }

    (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}

/// Extract the shared key from headers.
fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    // Check X-Api-Key header
    if let Some(api_key) = headers.get("X-Api-Key")
        && let Ok(key_str) = api_key.to_str()
    {
        return Some(key_str.to_string());
    }

    // Check Authorization: Bearer header
    if let Some(auth_header) = headers.get("Authorization")
        && let Ok(auth_str) = auth_header.to_str()
        && let Some(token) = auth_str.strip_prefix("Bearer ")
    {
        return Some(token.trim().to_string());
    }

    None
}
