//! Upstream client and streaming-aware response relay.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures::Stream;

pub struct UpstreamClient {
    client: reqwest::Client,
}

impl UpstreamClient {
    /// 构建上游客户端；request_timeout 同时作为整体请求超时
    pub fn new(request_timeout_secs: u64) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            // Connection settings (optimize connection reuse, reduce overhead)
            .connect_timeout(Duration::from_secs(20))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(Duration::from_secs(request_timeout_secs))
            .build()
            .map_err(|e| format!("failed to create HTTP client: {}", e))?;
        Ok(Self { client })
    }

    /// 转发请求到上游
    ///
    /// Authorization 永远来自令牌内的 api_key，不透传客户端头。
    pub async fn send(
        &self,
        method: &axum::http::Method,
        url: &str,
        api_key: &str,
        body: Vec<u8>,
    ) -> Result<reqwest::Response, String> {
        let method = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|e| format!("invalid method: {}", e))?;

        self.client
            .request(method, url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", api_key))
            .body(body)
            .send()
            .await
            .map_err(|e| format!("upstream request failed: {}", e))
    }
}

fn convert_headers(source: &reqwest::header::HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in source {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, value);
        }
    }
    headers
}

/// 缓冲转发：整体读出响应体，原样回传状态码与响应头
pub async fn relay_buffered(upstream: reqwest::Response) -> Response {
    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let headers = convert_headers(upstream.headers());

    let body = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("failed to read upstream response body: {}", e);
            Bytes::new()
        }
    };

    let mut response = Response::builder().status(status);
    if let Some(dst) = response.headers_mut() {
        *dst = headers;
    }
    response
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

/// 流式转发：逐行读取上游并立即下发
///
/// 上游本身是 SSE 时字节原样透传；否则把每个非空行包成
/// `data: <line>\n\n` 的 SSE 帧。上游在响应头发出后出错只能截断流。
pub fn relay_stream(upstream: reqwest::Response, upstream_is_sse: bool) -> Response {
    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let stream = LineRelay::new(Box::pin(upstream.bytes_stream()), upstream_is_sse);

    let response = Response::builder()
        .status(status)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive")
        .body(Body::from_stream(stream));

    response.unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

/// 行级转发流
///
/// 缓冲到换行符为止再下发，保证 SSE 帧边界不被切断。
struct LineRelay<S> {
    inner: S,
    buffer: BytesMut,
    passthrough: bool,
    done: bool,
}

impl<S> LineRelay<S> {
    fn new(inner: S, passthrough: bool) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            passthrough,
            done: false,
        }
    }

    fn frame_line(&self, line: &[u8]) -> Option<Bytes> {
        if self.passthrough {
            return Some(Bytes::copy_from_slice(line));
        }
        // 去掉行尾换行后再包帧
        let trimmed = match line.last() {
            Some(b'\n') => &line[..line.len() - 1],
            _ => line,
        };
        let trimmed = match trimmed.last() {
            Some(b'\r') => &trimmed[..trimmed.len() - 1],
            _ => trimmed,
        };
        if trimmed.is_empty() {
            return None;
        }
        let mut framed = BytesMut::with_capacity(trimmed.len() + 8);
        framed.extend_from_slice(b"data: ");
        framed.extend_from_slice(trimmed);
        framed.extend_from_slice(b"\n\n");
        Some(framed.freeze())
    }

    fn pop_line(&mut self) -> Option<Bytes> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            if let Some(framed) = self.frame_line(&line) {
                return Some(framed);
            }
        }
        None
    }

    fn flush_remainder(&mut self) -> Option<Bytes> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split();
        self.frame_line(&rest)
    }
}

impl<S> Stream for LineRelay<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        if let Some(line) = this.pop_line() {
            return Poll::Ready(Some(Ok(line)));
        }

        loop {
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buffer.extend_from_slice(&chunk);
                    if let Some(line) = this.pop_line() {
                        return Poll::Ready(Some(Ok(line)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    // 响应头已发出，只能记录并截断
                    tracing::warn!("upstream stream error: {}", e);
                    this.done = true;
                    return match this.flush_remainder() {
                        Some(rest) => Poll::Ready(Some(Ok(rest))),
                        None => Poll::Ready(None),
                    };
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return match this.flush_remainder() {
                        Some(rest) => Poll::Ready(Some(Ok(rest))),
                        None => Poll::Ready(None),
                    };
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
