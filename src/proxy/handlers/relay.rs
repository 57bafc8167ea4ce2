//! 统一 API 入口：根据令牌解析上游地址，改写请求体后转发。

use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::proxy::middleware::logging::RequestErrors;
use crate::proxy::middleware::AuthContext;
use crate::proxy::server::AppState;
use crate::proxy::{providers, upstream};

/// 令牌扩展信息：rep_m 指定要替换的模型名
#[derive(Debug, Deserialize)]
struct ExtInfoData {
    #[serde(default)]
    rep_m: String,
}

/// 按 ext_info 改写请求体
///
/// ext_info 解析失败、rep_m 缺失、请求体不是 JSON 对象时都原样放行，
/// 不算错误。
fn rewrite_request_body(ext_info: Option<&str>, body: Vec<u8>) -> Vec<u8> {
    let Some(ext_info) = ext_info else {
        return body;
    };
    let Ok(ext) = serde_json::from_str::<ExtInfoData>(ext_info) else {
        return body;
    };
    if ext.rep_m.is_empty() {
        return body;
    }
    let Ok(mut data) = serde_json::from_slice::<Value>(&body) else {
        return body;
    };
    let Some(object) = data.as_object_mut() else {
        return body;
    };
    object.insert("model".to_string(), Value::from(ext.rep_m));
    serde_json::to_vec(&data).unwrap_or(body)
}

/// 请求体里是否声明了流式输出
fn stream_requested(body: &[u8]) -> bool {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("stream").and_then(Value::as_bool))
        .unwrap_or(false)
}

pub async fn handle_relay(State(state): State<AppState>, request: Request) -> Response {
    let Some(ctx) = request.extensions().get::<AuthContext>().cloned() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Token not found in context" })),
        )
            .into_response();
    };
    let method = request.method().clone();

    if ctx.relative_path.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid API path" })),
        )
            .into_response();
    }

    let body_bytes = match to_bytes(request.into_body(), usize::MAX).await {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("Failed to read request body: {}", e) })),
            )
                .into_response();
        }
    };

    let wants_stream = stream_requested(&body_bytes);
    let body = rewrite_request_body(ctx.token.ext_info.as_deref(), body_bytes);

    let base = providers::base_url(&ctx.token.provider);
    let target = providers::join_target(base, &ctx.relative_path, ctx.ext_path.as_deref());
    tracing::debug!(
        provider = %ctx.token.provider,
        target = %target,
        "proxying request"
    );

    let upstream_response = match state
        .upstream
        .send(&method, &target, &ctx.token.api_key, body)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            let mut response = (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("Failed to proxy request: {}", e) })),
            )
                .into_response();
            response.extensions_mut().insert(RequestErrors(vec![e]));
            return response;
        }
    };

    let upstream_is_sse = upstream_response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("text/event-stream"))
        .unwrap_or(false);

    if upstream_is_sse || wants_stream {
        upstream::relay_stream(upstream_response, upstream_is_sse)
    } else {
        upstream::relay_buffered(upstream_response).await
    }
}
