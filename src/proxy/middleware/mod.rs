// Middleware 模块 - 请求管线
//
// 固定顺序：路径规范化 -> 日志 -> 统计 -> 限流 -> 令牌认证 -> handler

pub mod auth;
pub mod logging;
pub mod normalize;
pub mod rate_limit;
pub mod stats;

use axum::http::HeaderMap;

pub use auth::{token_auth_middleware, AuthContext};
pub use logging::logging_middleware;
pub use normalize::normalize_path_middleware;
pub use rate_limit::rate_limit_middleware;
pub use stats::stats_middleware;

/// 从请求中提取客户端 IP (考虑代理头)
///
/// 优先级：X-Forwarded-For 第一个 IP -> X-Real-IP -> 直连地址。
pub fn client_ip(headers: &HeaderMap, connection_ip: Option<String>) -> String {
    if let Some(forwarded_for) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first_ip) = forwarded_for.split(',').next() {
            let ip = first_ip.trim();
            if !ip.is_empty() && ip != "unknown" {
                return ip.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let ip = real_ip.trim();
        if !ip.is_empty() && ip != "unknown" {
            return ip.to_string();
        }
    }

    connection_ip.unwrap_or_else(|| "unknown".to_string())
}
