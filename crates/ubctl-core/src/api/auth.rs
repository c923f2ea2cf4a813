//! API-key authentication for `/api/v1`.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use ring::constant_time;
use tracing::warn;
use zeroize::Zeroizing;

use super::ApiState;
use super::error::ApiError;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Middleware: reject requests without the configured key.
pub async fn require_api_key(
    State(state): State<Arc<ApiState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // Copied out so the watch guard is not held across the handler.
    let expected = Zeroizing::new(state.config.borrow().security.api_key.clone());

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    match provided {
        None => {
            warn!(path = %request.uri().path(), "request without API key");
            Err(ApiError::Unauthorized("missing API key"))
        }
        Some(key) if keys_match(key, &expected) => Ok(next.run(request).await),
        Some(_) => {
            warn!(path = %request.uri().path(), "request with invalid API key");
            Err(ApiError::Unauthorized("invalid API key"))
        }
    }
}

/// Constant-time comparison. An empty expected key never matches.
fn keys_match(provided: &str, expected: &str) -> bool {
    !expected.is_empty()
        && constant_time::verify_slices_are_equal(provided.as_bytes(), expected.as_bytes()).is_ok()
}
