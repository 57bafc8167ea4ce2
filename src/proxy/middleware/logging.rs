//! 日志中间件
//!
//! 进入时捕获请求并写入请求记录；handler 返回后捕获状态/响应体写入响应
//! 记录。普通响应整体缓冲；SSE 响应挂一个旁路流，在流结束 (或客户端断开)
//! 时折叠增量内容再落一条响应记录。sink 的任何失败都不影响响应本身。

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::USER_AGENT;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::proxy::logging::{capture, LogPipeline, Record};
use crate::proxy::middleware::client_ip;
use crate::proxy::server::AppState;
use crate::proxy::stats::Stats;

/// handler 可以把错误消息塞进响应扩展，落进响应记录的 errors 字段
#[derive(Clone, Default)]
pub struct RequestErrors(pub Vec<String>);

fn headers_to_json(headers: &HeaderMap) -> Value {
    let mut map = serde_json::Map::new();
    for name in headers.keys() {
        let values: Vec<Value> = headers
            .get_all(name)
            .iter()
            .map(|v| Value::from(String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        map.insert(name.as_str().to_string(), Value::Array(values));
    }
    Value::Object(map)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub async fn logging_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let started = Instant::now();

    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or("").to_string();
    let req_headers = request.headers().clone();
    let ip = client_ip(&req_headers, Some(addr.ip().to_string()));
    let user_agent = header_str(&req_headers, USER_AGENT.as_str())
        .unwrap_or("")
        .to_string();

    // 读出请求体做捕获，再原样还给 handler
    let (parts, body) = request.into_parts();
    let body_bytes = to_bytes(body, usize::MAX).await.unwrap_or_default();

    let request_body = capture::capture_body(
        header_str(&req_headers, "content-type").unwrap_or(""),
        header_str(&req_headers, "content-encoding"),
        &body_bytes,
    );

    let mut record = Record::new();
    record.insert("request_id".into(), Value::from(request_id.clone()));
    record.insert("type".into(), Value::from("request"));
    record.insert("time".into(), Value::from(Utc::now().to_rfc3339()));
    record.insert("method".into(), Value::from(method));
    record.insert("path".into(), Value::from(path));
    record.insert("query".into(), Value::from(query));
    record.insert("client_ip".into(), Value::from(ip));
    record.insert("user_agent".into(), Value::from(user_agent));
    record.insert("headers".into(), headers_to_json(&req_headers));
    record.insert("request_body".into(), Value::from(request_body));
    state.pipeline.write(record);

    let request = Request::from_parts(parts, Body::from(body_bytes));
    let response = next.run(request).await;

    let status = response.status().as_u16();
    let resp_headers = response.headers().clone();
    let errors = response
        .extensions()
        .get::<RequestErrors>()
        .cloned()
        .unwrap_or_default()
        .0;
    let content_type = header_str(&resp_headers, "content-type")
        .unwrap_or("")
        .to_string();
    let is_sse = content_type.contains("text/event-stream");

    let ctx = ResponseLogContext {
        pipeline: Arc::clone(&state.pipeline),
        stats: Arc::clone(&state.stats),
        request_id,
        started,
        status,
        headers: resp_headers,
        content_type,
        errors,
    };

    let (parts, body) = response.into_parts();

    if is_sse {
        // 旁路捕获，流结束时再落响应记录
        let stream = CaptureBody::new(body.into_data_stream(), ctx);
        Response::from_parts(parts, Body::from_stream(stream))
    } else {
        let bytes = to_bytes(body, usize::MAX).await.unwrap_or_default();
        ctx.emit_buffered(&bytes);
        Response::from_parts(parts, Body::from(bytes))
    }
}

struct ResponseLogContext {
    pipeline: Arc<LogPipeline>,
    stats: Arc<Stats>,
    request_id: String,
    started: Instant,
    status: u16,
    headers: HeaderMap,
    content_type: String,
    errors: Vec<String>,
}

impl ResponseLogContext {
    fn record(&self, response_body: String) -> Record {
        let mut record = Record::new();
        record.insert("request_id".into(), Value::from(self.request_id.clone()));
        record.insert("type".into(), Value::from("response"));
        record.insert("time".into(), Value::from(Utc::now().to_rfc3339()));
        record.insert("status".into(), Value::from(self.status));
        record.insert(
            "latency_ms".into(),
            Value::from(self.started.elapsed().as_millis() as u64),
        );
        record.insert("headers".into(), headers_to_json(&self.headers));
        record.insert("response_body".into(), Value::from(response_body));
        record.insert("errors".into(), json!(self.errors));
        record
    }

    fn emit_buffered(&self, body: &[u8]) {
        self.stats.add_bytes_sent(body.len() as u64);
        let captured = capture::capture_body(
            &self.content_type,
            header_str(&self.headers, "content-encoding"),
            body,
        );
        self.pipeline.write(self.record(captured));
    }

    fn emit_stream(&self, raw: &[u8]) {
        self.stats.add_bytes_sent(raw.len() as u64);
        let captured = capture::coalesce_sse(&String::from_utf8_lossy(raw));
        self.pipeline.write(self.record(captured));
    }
}

/// 旁路捕获流：转发字节的同时累积一份，结束或被丢弃时落日志
struct CaptureBody<S> {
    inner: S,
    captured: Vec<u8>,
    ctx: Option<ResponseLogContext>,
}

impl<S> CaptureBody<S> {
    fn new(inner: S, ctx: ResponseLogContext) -> Self {
        Self {
            inner,
            captured: Vec::new(),
            ctx: Some(ctx),
        }
    }

    fn finalize(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            ctx.emit_stream(&self.captured);
        }
    }
}

impl<S, E> Stream for CaptureBody<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.captured.extend_from_slice(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finalize();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finalize();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for CaptureBody<S> {
    fn drop(&mut self) {
        // 客户端提前断开时同样落一条响应记录
        self.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn headers_serialize_to_arrays() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.append("x-multi", HeaderValue::from_static("a"));
        headers.append("x-multi", HeaderValue::from_static("b"));

        let value = headers_to_json(&headers);
        assert_eq!(value["content-type"][0], "application/json");
        assert_eq!(value["x-multi"][0], "a");
        assert_eq!(value["x-multi"][1], "b");
    }
}
