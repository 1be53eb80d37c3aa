//! Rate limiting middleware: rejects with `429` before the handler runs.

use axum::extract::{Extension, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use crate::errors::ApiError;
use crate::server::app::AppState;

use super::ClientIp;

pub async fn rate_limit_middleware(
    Extension(state): Extension<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let client_ip = request
        .extensions()
        .get::<ClientIp>()
        .map(|ClientIp(ip)| *ip)
        .unwrap_or_else(|| "0.0.0.0".parse().unwrap());

    if !state.rate_limiter.check(client_ip, Utc::now().timestamp()) {
        return ApiError::RateLimited.into_response();
    }

    next.run(request).await
}
