//! End-to-end flow tests: the full middleware stack against a mock upstream.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::to_bytes;
use axum::extract::Request;
use axum::response::{IntoResponse, Json};
use axum::routing::{any, get};
use axum::Router;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use relayapi::modules::config::ServerConfig;
use relayapi::proxy::client_config::{ClientConfig, ClientRegistry, CryptoSettings};
use relayapi::proxy::crypto;
use relayapi::proxy::{AppState, AxumServer, Token};

const SSE_BODY: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\n\n",
    "data: [DONE]\n\n",
);

/// Mock 上游：回显收到的方法/路径/鉴权头/请求体
async fn mock_echo(request: Request) -> Json<Value> {
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, usize::MAX).await.unwrap_or_default();
    let body_value = serde_json::from_slice::<Value>(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    Json(json!({
        "method": parts.method.as_str(),
        "path": parts.uri.path(),
        "authorization": parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok()),
        "body": body_value,
    }))
}

async fn mock_sse() -> impl IntoResponse {
    ([("content-type", "text/event-stream")], SSE_BODY)
}

async fn start_mock_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/sse", any(mock_sse))
        .route("/echo", any(mock_echo))
        .route("/echo/*rest", any(mock_echo))
        .route("/health", get(|| async { "ok" }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    // 测试输出保持干净
    config.log.console = false;
    config
}

async fn start_relay(
    config: ServerConfig,
    registry: Arc<ClientRegistry>,
) -> (SocketAddr, AxumServer, AppState) {
    let (server, _handle, state) = AxumServer::start(&config, registry).await.unwrap();
    (server.local_addr(), server, state)
}

fn make_token(id: &str, provider: &str, max_calls: u64, ext_info: Option<&str>) -> Token {
    let now = Utc::now();
    Token {
        id: id.to_string(),
        api_key: "sk-X".to_string(),
        max_calls,
        expire_time: now + Duration::hours(1),
        created_at: now,
        provider: provider.to_string(),
        ext_info: ext_info.map(String::from),
    }
}

fn encode_token(config: &ClientConfig, token: &Token) -> String {
    let cipher = crypto::for_config(config).unwrap();
    let ciphertext = cipher.encrypt(&token.to_json().unwrap()).unwrap();
    crypto::encode_transport(&ciphertext)
}

#[tokio::test]
async fn health_endpoint_reports_stats() {
    let registry = Arc::new(ClientRegistry::new());
    registry.load("").unwrap();
    let (addr, _server, _state) = start_relay(test_config(), registry).await;

    let response = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    for key in [
        "uptime",
        "total_requests",
        "successful_requests",
        "failed_requests",
        "bytes_received",
        "bytes_sent",
        "tps",
    ] {
        assert!(body["stats"].get(key).is_some(), "missing stats key {}", key);
    }
}

#[tokio::test]
async fn happy_path_proxies_with_bearer_auth() {
    let upstream = start_mock_upstream().await;
    let registry = Arc::new(ClientRegistry::new());
    registry.load("").unwrap();
    let client_cfg = ClientConfig::builtin_default();
    let rai_hash = client_cfg.config_hash();
    let (addr, _server, state) = start_relay(test_config(), registry).await;

    let provider = format!("http://{}/echo", upstream);
    let token = make_token("t1", &provider, 2, None);
    let encoded = encode_token(&client_cfg, &token);

    let response = reqwest::Client::new()
        .post(format!(
            "http://{}/relayapi/chat/completions?token={}&rai_hash={}",
            addr, encoded, rai_hash
        ))
        .json(&json!({ "model": "gpt-4" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let echoed: Value = response.json().await.unwrap();
    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["path"], "/echo/chat/completions");
    // 上游鉴权头只来自令牌里的 api_key
    assert_eq!(echoed["authorization"], "Bearer sk-X");
    assert_eq!(echoed["body"]["model"], "gpt-4");

    assert_eq!(state.usage.used("t1"), 1);
}

#[tokio::test]
async fn ext_info_rewrites_model() {
    let upstream = start_mock_upstream().await;
    let registry = Arc::new(ClientRegistry::new());
    registry.load("").unwrap();
    let client_cfg = ClientConfig::builtin_default();
    let rai_hash = client_cfg.config_hash();
    let (addr, _server, _state) = start_relay(test_config(), registry).await;

    let provider = format!("http://{}/echo", upstream);
    let token = make_token("t2", &provider, 2, Some(r#"{"rep_m":"gpt-4o"}"#));
    let encoded = encode_token(&client_cfg, &token);

    let response = reqwest::Client::new()
        .post(format!(
            "http://{}/relayapi/chat/completions?token={}&rai_hash={}",
            addr, encoded, rai_hash
        ))
        .json(&json!({ "model": "gpt-4" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let echoed: Value = response.json().await.unwrap();
    assert_eq!(echoed["body"]["model"], "gpt-4o");
}

#[tokio::test]
async fn quota_exhaustion_returns_401() {
    let upstream = start_mock_upstream().await;
    let registry = Arc::new(ClientRegistry::new());
    registry.load("").unwrap();
    let client_cfg = ClientConfig::builtin_default();
    let rai_hash = client_cfg.config_hash();
    let (addr, _server, state) = start_relay(test_config(), registry).await;

    let provider = format!("http://{}/echo", upstream);
    let token = make_token("t3", &provider, 1, None);
    let encoded = encode_token(&client_cfg, &token);
    let url = format!(
        "http://{}/relayapi/chat/completions?token={}&rai_hash={}",
        addr, encoded, rai_hash
    );

    let client = reqwest::Client::new();
    let first = client.post(&url).json(&json!({})).send().await.unwrap();
    assert_eq!(first.status(), 200);

    let second = client.post(&url).json(&json!({})).send().await.unwrap();
    assert_eq!(second.status(), 401);
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["error"], "Token expired or exceeded usage limit");

    // 拒绝不产生额外计数
    assert_eq!(state.usage.used("t3"), 1);
}

#[tokio::test]
async fn auth_failure_modes() {
    let registry = Arc::new(ClientRegistry::new());
    registry.load("").unwrap();
    let client_cfg = ClientConfig::builtin_default();
    let rai_hash = client_cfg.config_hash();
    let (addr, _server, _state) = start_relay(test_config(), registry).await;
    let client = reqwest::Client::new();

    // 缺少 token 参数
    let response = client
        .post(format!("http://{}/relayapi/chat/completions", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Missing API token");

    // 未知配置哈希
    let token = make_token("t4", "openai", 1, None);
    let encoded = encode_token(&client_cfg, &token);
    let response = client
        .post(format!(
            "http://{}/relayapi/chat/completions?token={}&rai_hash=deadbeef",
            addr, encoded
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Invalid configuration hash");

    // base64 解码失败
    let response = client
        .post(format!(
            "http://{}/relayapi/chat/completions?token=%21%21%21&rai_hash={}",
            addr, rai_hash
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Invalid token format");

    // 密文被破坏
    let response = client
        .post(format!(
            "http://{}/relayapi/chat/completions?token=AAAAAAAA&rai_hash={}",
            addr, rai_hash
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Invalid token");

    // 空路径
    let token = make_token("t5", "openai", 2, None);
    let encoded = encode_token(&client_cfg, &token);
    let response = client
        .post(format!(
            "http://{}/relayapi?token={}&rai_hash={}",
            addr, encoded, rai_hash
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Invalid API path");
}

#[tokio::test]
async fn per_ip_limit_refuses_with_named_bucket() {
    let upstream = start_mock_upstream().await;
    let registry = Arc::new(ClientRegistry::new());
    registry.load("").unwrap();
    let client_cfg = ClientConfig::builtin_default();
    let rai_hash = client_cfg.config_hash();

    let mut config = test_config();
    config.rate_limit.requests_per_second = 1000.0;
    config.rate_limit.burst = 1000;
    config.rate_limit.ip_limit.requests_per_second = 2.0;
    config.rate_limit.ip_limit.burst = 2;
    let (addr, _server, _state) = start_relay(config, registry).await;

    let provider = format!("http://{}/echo", upstream);
    let token = make_token("t6", &provider, 100, None);
    let encoded = encode_token(&client_cfg, &token);
    let url = format!(
        "http://{}/relayapi/chat/completions?token={}&rai_hash={}",
        addr, encoded, rai_hash
    );

    let client = reqwest::Client::new();
    let mut statuses = Vec::new();
    for _ in 0..4 {
        let response = client.post(&url).json(&json!({})).send().await.unwrap();
        statuses.push(response.status().as_u16());
        if statuses.last() == Some(&429) {
            let body: Value = response.json().await.unwrap();
            assert_eq!(body["error"], "too many requests from your IP");
        }
    }
    assert_eq!(&statuses[..2], &[200, 200]);
    assert_eq!(&statuses[2..], &[429, 429]);
}

#[tokio::test]
async fn sse_stream_relayed_verbatim() {
    let upstream = start_mock_upstream().await;
    let registry = Arc::new(ClientRegistry::new());
    registry.load("").unwrap();
    let client_cfg = ClientConfig::builtin_default();
    let rai_hash = client_cfg.config_hash();
    let (addr, _server, _state) = start_relay(test_config(), registry).await;

    // 未知 provider 字符串被原样当作基础 URL
    let provider = format!("http://{}", upstream);
    let token = make_token("t7", &provider, 2, None);
    let encoded = encode_token(&client_cfg, &token);

    let response = reqwest::Client::new()
        .post(format!(
            "http://{}/relayapi/sse?token={}&rai_hash={}",
            addr, encoded, rai_hash
        ))
        .json(&json!({ "stream": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .contains("text/event-stream"));

    let body = response.text().await.unwrap();
    assert_eq!(body, SSE_BODY);
}

#[tokio::test]
async fn double_slashes_are_normalized() {
    let upstream = start_mock_upstream().await;
    let registry = Arc::new(ClientRegistry::new());
    registry.load("").unwrap();
    let client_cfg = ClientConfig::builtin_default();
    let rai_hash = client_cfg.config_hash();
    let (addr, _server, _state) = start_relay(test_config(), registry).await;

    let provider = format!("http://{}/echo", upstream);
    let token = make_token("t8", &provider, 2, None);
    let encoded = encode_token(&client_cfg, &token);

    let response = reqwest::Client::new()
        .post(format!(
            "http://{}/relayapi///chat//completions?token={}&rai_hash={}",
            addr, encoded, rai_hash
        ))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let echoed: Value = response.json().await.unwrap();
    assert_eq!(echoed["path"], "/echo/chat/completions");
}

#[tokio::test]
async fn hot_reload_admits_new_hash() {
    let upstream = start_mock_upstream().await;
    let dir = tempfile::tempdir().unwrap();
    let seed = ClientConfig::builtin_default();
    std::fs::write(
        dir.path().join("seed.rai"),
        serde_json::to_string_pretty(&seed).unwrap(),
    )
    .unwrap();

    let registry = Arc::new(ClientRegistry::new());
    registry.load(dir.path().to_str().unwrap()).unwrap();
    Arc::clone(&registry).watch_directory(dir.path()).unwrap();
    let (addr, _server, _state) = start_relay(test_config(), registry).await;

    // 写入带新密钥的配置文件
    let mut rotated = ClientConfig::builtin_default();
    rotated.crypto = CryptoSettings::Aes {
        aes_key: "ab".repeat(32),
        aes_iv_seed: "0123456789abcdef".to_string(),
    };
    let rotated_hash = rotated.config_hash();
    std::fs::write(
        dir.path().join("rotated.rai"),
        serde_json::to_string_pretty(&rotated).unwrap(),
    )
    .unwrap();

    let provider = format!("http://{}/echo", upstream);
    let token = make_token("t9", &provider, 100, None);
    let encoded = encode_token(&rotated, &token);
    let url = format!(
        "http://{}/relayapi/chat/completions?token={}&rai_hash={}",
        addr, encoded, rotated_hash
    );

    let client = reqwest::Client::new();
    let mut admitted = false;
    for _ in 0..50 {
        let response = client.post(&url).json(&json!({})).send().await.unwrap();
        if response.status() == 200 {
            admitted = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    assert!(admitted, "new .rai config was not picked up by the watcher");
}
