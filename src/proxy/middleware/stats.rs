//! 统计中间件：进入时累计总数，返回时按状态码归类。

use axum::extract::{Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::middleware::Next;
use axum::response::Response;

use crate::proxy::server::AppState;

pub async fn stats_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    state.stats.record_request();

    if let Some(len) = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        state.stats.add_bytes_received(len);
    }

    let response = next.run(request).await;
    state.stats.record_response(response.status().as_u16());
    response
}
