//! Capability token model and process-global usage accounting.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to unmarshal token data: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("missing required fields")]
    MissingFields,
    #[error("failed to parse {field}: {source}")]
    BadTime {
        field: &'static str,
        source: chrono::ParseError,
    },
}

/// 访问令牌 (解密后的载荷)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub id: String,
    pub api_key: String,
    pub max_calls: u64,
    pub expire_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// API 提供商：openai, dashscope 等
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext_info: Option<String>,
}

/// 原始 JSON 形态，时间字段为 RFC3339 字符串
#[derive(Deserialize)]
struct RawToken {
    #[serde(default)]
    id: String,
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    max_calls: u64,
    #[serde(default)]
    expire_time: String,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    provider: String,
    #[serde(default)]
    ext_info: Option<String>,
}

impl Token {
    /// 从解密后的明文解析令牌
    ///
    /// 未知字段忽略；id / api_key / provider 缺失视为无效令牌。
    pub fn from_json(data: &[u8]) -> Result<Self, TokenError> {
        let raw: RawToken = serde_json::from_slice(data)?;

        if raw.id.is_empty() || raw.api_key.is_empty() || raw.provider.is_empty() {
            return Err(TokenError::MissingFields);
        }

        let expire_time = DateTime::parse_from_rfc3339(&raw.expire_time)
            .map_err(|source| TokenError::BadTime {
                field: "expire_time",
                source,
            })?
            .with_timezone(&Utc);
        let created_at = DateTime::parse_from_rfc3339(&raw.created_at)
            .map_err(|source| TokenError::BadTime {
                field: "created_at",
                source,
            })?
            .with_timezone(&Utc);

        Ok(Self {
            id: raw.id,
            api_key: raw.api_key,
            max_calls: raw.max_calls,
            expire_time,
            created_at,
            provider: raw.provider,
            ext_info: raw.ext_info.filter(|s| !s.is_empty()),
        })
    }

    /// 序列化为 JSON (颁发侧使用)
    pub fn to_json(&self) -> Result<Vec<u8>, TokenError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// 过期判定；恰好等于过期时刻的令牌同样拒绝
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expire_time
    }
}

/// 进程级用量账本：token id -> 已用次数
///
/// 准入走 compare-and-increment，任何并发交织下都不会超过 max_calls。
/// 读取 (`used` / `remaining`) 允许读到略旧的值。
pub struct UsageLedger {
    counters: DashMap<String, AtomicU64>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    /// 尝试消耗一次调用额度
    ///
    /// 返回 false 表示额度已尽 (或 max_calls 为 0)，计数不变。
    pub fn try_consume(&self, id: &str, max_calls: u64) -> bool {
        if max_calls == 0 {
            return false;
        }
        let counter = self
            .counters
            .entry(id.to_string())
            .or_insert_with(|| AtomicU64::new(0));

        let mut current = counter.load(Ordering::Relaxed);
        loop {
            if current >= max_calls {
                return false;
            }
            match counter.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// 已使用次数
    pub fn used(&self, id: &str) -> u64 {
        self.counters
            .get(id)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// 剩余调用次数
    pub fn remaining(&self, token: &Token) -> u64 {
        token.max_calls.saturating_sub(self.used(&token.id))
    }

    /// 重置某个令牌的计数
    pub fn reset(&self, id: &str) {
        self.counters.remove(id);
    }
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::new()
    }
}
