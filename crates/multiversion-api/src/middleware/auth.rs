// SPDX-License-Identifier: GPL-3.0-or-later
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use multiversion_application::AppState;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::handlers::ErrorResponse;

pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Require `X-Api-Key` to match `http.api_key` when one is configured.
pub async fn api_key_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.http.api_key.as_deref().filter(|k| !k.is_empty()) else {
        return next.run(request).await;
    };

    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        debug!(target: "auth", "api key accepted");
        return next.run(request).await;
    }

    warn!(target: "auth", path = %request.uri().path(), "rejected request with missing or invalid api key");
    unauthorized().into_response()
}

pub fn unauthorized() -> impl IntoResponse {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: "missing or invalid api key".to_string(),
        }),
    )
}
