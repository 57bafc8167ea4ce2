//! 限流中间件：全局桶在前并短路，IP 桶在后。

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::proxy::middleware::client_ip;
use crate::proxy::rate_limit::Admission;
use crate::proxy::server::AppState;

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(request.headers(), Some(addr.ip().to_string()));

    match state.gate.check(&ip) {
        Admission::Allowed => next.run(request).await,
        Admission::GlobalExhausted => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "too many requests" })),
        )
            .into_response(),
        Admission::IpExhausted => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "too many requests from your IP" })),
        )
            .into_response(),
    }
}
