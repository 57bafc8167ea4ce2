//! 请求统计：原子计数器 + 按状态码的失败分布，供 `/health` 读取。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use serde_json::{json, Value};

pub struct Stats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    error_status: DashMap<u16, u64>,
    started_at: Instant,
    version: String,
    server_addr: String,
}

impl Stats {
    pub fn new(version: &str, server_addr: &str) -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            error_status: DashMap::new(),
            started_at: Instant::now(),
            version: version.to_string(),
            server_addr: server_addr.to_string(),
        }
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// 按最终状态码归类：>= 400 记失败并累计该状态码
    pub fn record_response(&self, status: u16) {
        if status >= 400 {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
            *self.error_status.entry(status).or_insert(0) += 1;
        } else {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn add_bytes_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    pub fn total(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn server_addr(&self) -> &str {
        &self.server_addr
    }

    /// 错误状态码分布快照
    pub fn error_counts(&self) -> Vec<(u16, u64)> {
        let mut counts: Vec<(u16, u64)> = self
            .error_status
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        counts.sort_by_key(|(code, _)| *code);
        counts
    }

    /// `/health` 用的 JSON 快照，只做原子读，不持有任何锁
    pub fn snapshot(&self) -> Value {
        let uptime = self.uptime_seconds();
        let total = self.total_requests.load(Ordering::Relaxed);
        let tps = if uptime > 0.0 {
            total as f64 / uptime
        } else {
            0.0
        };
        json!({
            "uptime": format!("{:.3}s", uptime),
            "total_requests": total,
            "successful_requests": self.successful_requests.load(Ordering::Relaxed),
            "failed_requests": self.failed_requests.load(Ordering::Relaxed),
            "bytes_received": self.bytes_received.load(Ordering::Relaxed),
            "bytes_sent": self.bytes_sent.load(Ordering::Relaxed),
            "tps": tps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_by_status() {
        let stats = Stats::new("1.0.0", "127.0.0.1:8840");
        stats.record_request();
        stats.record_response(200);
        stats.record_request();
        stats.record_response(401);
        stats.record_request();
        stats.record_response(401);

        let snap = stats.snapshot();
        assert_eq!(snap["total_requests"], 3);
        assert_eq!(snap["successful_requests"], 1);
        assert_eq!(snap["failed_requests"], 2);
        assert_eq!(stats.error_counts(), vec![(401, 2)]);
    }

    #[test]
    fn byte_counters_accumulate() {
        let stats = Stats::new("1.0.0", "127.0.0.1:8840");
        stats.add_bytes_received(100);
        stats.add_bytes_received(50);
        stats.add_bytes_sent(7);
        let snap = stats.snapshot();
        assert_eq!(snap["bytes_received"], 150);
        assert_eq!(snap["bytes_sent"], 7);
    }

    #[test]
    fn snapshot_has_expected_keys() {
        let stats = Stats::new("1.0.0", "127.0.0.1:8840");
        let snap = stats.snapshot();
        for key in [
            "uptime",
            "total_requests",
            "successful_requests",
            "failed_requests",
            "bytes_received",
            "bytes_sent",
            "tps",
        ] {
            assert!(snap.get(key).is_some(), "missing key {}", key);
        }
    }
}
