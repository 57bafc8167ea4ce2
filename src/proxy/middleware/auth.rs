//! 令牌认证中间件
//!
//! 从 URL 参数 (或路径段兼容形式) 取出加密令牌与配置哈希，选择解密上下
//! 文，解密并校验令牌，原子地消耗一次调用额度，成功后把 `AuthContext`
//! 挂到请求扩展上。

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde_json::json;

use crate::proxy::crypto;
use crate::proxy::server::AppState;
use crate::proxy::token::Token;

/// 认证通过后挂在请求扩展上的上下文
#[derive(Clone)]
pub struct AuthContext {
    pub token: Token,
    pub rai_hash: String,
    /// 令牌参数里斜杠后携带的附加路径段 (部分提供商把路由信息编码在此)
    pub ext_path: Option<String>,
    /// 去掉 token / rai_hash 路径段之后、要转发给上游的相对路径
    pub relative_path: String,
}

/// 在第一个斜杠处切开；没有斜杠时第二段为空
fn split_first_slash(input: &str) -> (&str, &str) {
    match input.find('/') {
        Some(index) => (&input[..index], &input[index + 1..]),
        None => (input, ""),
    }
}

struct TokenParams {
    token: Option<String>,
    rai_hash: Option<String>,
    relative_path: String,
}

/// 提取 token / rai_hash
///
/// 查询参数优先；随后扫描路径段，兼容 `.../token/<v>/rai_hash/<v>/...`
/// 形式，被识别的段从转发路径里剔除。
fn extract_params(path: &str, query: Option<&str>) -> TokenParams {
    let mut token = None;
    let mut rai_hash = None;

    if let Some(query) = query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "token" if token.is_none() => token = Some(value.into_owned()),
                "rai_hash" if rai_hash.is_none() => rai_hash = Some(value.into_owned()),
                _ => {}
            }
        }
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let mut kept: Vec<&str> = Vec::with_capacity(segments.len());
    let mut i = 0;
    while i < segments.len() {
        match segments[i] {
            "token" if token.is_none() && i + 1 < segments.len() => {
                token = Some(segments[i + 1].to_string());
                i += 2;
            }
            "rai_hash" if rai_hash.is_none() && i + 1 < segments.len() => {
                rai_hash = Some(segments[i + 1].to_string());
                i += 2;
            }
            segment => {
                kept.push(segment);
                i += 1;
            }
        }
    }

    TokenParams {
        token,
        rai_hash,
        relative_path: kept.join("/"),
    }
}

fn reject(status: StatusCode, body: serde_json::Value) -> Response {
    (status, Json(body)).into_response()
}

pub async fn token_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(|q| q.to_string());
    let params = extract_params(&path, query.as_deref());

    let Some(raw_token) = params.token else {
        return reject(
            StatusCode::UNAUTHORIZED,
            json!({
                "error": "Missing API token",
                "message": "Please provide your API token as a URL parameter: ?token=your_token",
            }),
        );
    };

    // 令牌与哈希参数都可能以 `/<ext_path>` 结尾
    let (raw_token, suffix) = split_first_slash(raw_token.trim());
    let mut ext_path = (!suffix.is_empty()).then(|| suffix.trim_end_matches('=').to_string());

    let raw_hash = params.rai_hash.unwrap_or_default();
    let (raw_hash, suffix) = split_first_slash(raw_hash.trim());
    if !suffix.is_empty() {
        ext_path = Some(suffix.trim_end_matches('=').to_string());
    }

    // 未指定哈希时回落到第一个可用配置
    let rai_hash = if raw_hash.is_empty() {
        state.registry.first_hash().unwrap_or_default()
    } else {
        raw_hash.to_string()
    };

    let Some(client_cfg) = state.registry.get(&rai_hash) else {
        return reject(
            StatusCode::UNAUTHORIZED,
            json!({
                "error": "Invalid configuration hash",
                "message": "The provided configuration hash is not valid",
            }),
        );
    };

    let cipher = match state.cipher_for(&rai_hash, &client_cfg) {
        Ok(cipher) => cipher,
        Err(e) => {
            return reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "Encryptor initialization failed",
                    "message": e.to_string(),
                }),
            );
        }
    };

    let token_bytes = match crypto::decode_transport(raw_token) {
        Ok(bytes) => bytes,
        Err(e) => {
            return reject(
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "Invalid token format",
                    "message": "Token must be base64url encoded",
                    "details": e.to_string(),
                    "token_length": raw_token.len(),
                }),
            );
        }
    };

    let plaintext = match cipher.decrypt(&token_bytes) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            return reject(
                StatusCode::UNAUTHORIZED,
                json!({
                    "error": "Invalid token",
                    "message": "Failed to decrypt token",
                    "details": e.to_string(),
                }),
            );
        }
    };

    let token = match Token::from_json(&plaintext) {
        Ok(token) => token,
        Err(e) => {
            return reject(
                StatusCode::UNAUTHORIZED,
                json!({
                    "error": "Invalid token",
                    "message": "Failed to parse token data",
                    "details": e.to_string(),
                }),
            );
        }
    };

    // 过期与额度：额度消耗是 compare-and-increment，拒绝时不产生计数
    if token.is_expired(Utc::now()) || !state.usage.try_consume(&token.id, token.max_calls) {
        return reject(
            StatusCode::UNAUTHORIZED,
            json!({
                "error": "Token expired or exceeded usage limit",
                "message": "Please obtain a new token",
            }),
        );
    }

    tracing::debug!(
        token_id = %token.id,
        provider = %token.provider,
        used = state.usage.used(&token.id),
        "token accepted"
    );

    request.extensions_mut().insert(AuthContext {
        token,
        rai_hash,
        ext_path,
        relative_path: params.relative_path,
    });
    next.run(request).await
}
