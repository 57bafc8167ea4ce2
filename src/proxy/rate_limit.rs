//! 两级令牌桶限流: 全局桶 + 按客户端 IP 的惰性桶

use std::sync::Mutex;
use std::time::Instant;

use dashmap::DashMap;

use crate::modules::config::RateLimitConfig;

/// Classic token bucket: `burst` capacity, refilled at `rate` tokens/sec.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            capacity: burst as f64,
            tokens: burst as f64,
            rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
            self.last_refill = now;
        }
    }

    pub fn try_consume(&mut self, n: f64) -> bool {
        self.try_consume_at(n, Instant::now())
    }

    fn try_consume_at(&mut self, n: f64, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }
}

/// 限流判定结果，区分是哪一层拒绝的
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    GlobalExhausted,
    IpExhausted,
}

/// 全局 + 单 IP 双层限流
///
/// 全局桶先判且短路：全局额度耗尽时不触碰 IP 桶状态。IP 桶首次出现时
/// 惰性创建，之后不会被回收 (已知的内存增长风险，见 DESIGN.md)。
pub struct RateGate {
    global: Mutex<TokenBucket>,
    per_ip: DashMap<String, TokenBucket>,
    ip_rate: f64,
    ip_burst: u32,
}

impl RateGate {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            global: Mutex::new(TokenBucket::new(
                config.requests_per_second,
                config.burst,
            )),
            per_ip: DashMap::new(),
            ip_rate: config.ip_limit.requests_per_second,
            ip_burst: config.ip_limit.burst,
        }
    }

    /// 单次请求准入：全局与 IP 桶各消耗一个令牌
    pub fn check(&self, ip: &str) -> Admission {
        {
            let mut global = match self.global.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !global.try_consume(1.0) {
                return Admission::GlobalExhausted;
            }
        }

        let mut bucket = self
            .per_ip
            .entry(ip.to_string())
            .or_insert_with(|| TokenBucket::new(self.ip_rate, self.ip_burst));
        if bucket.try_consume(1.0) {
            Admission::Allowed
        } else {
            Admission::IpExhausted
        }
    }

    /// 已知的 IP 桶数量 (观测用)
    pub fn tracked_ips(&self) -> usize {
        self.per_ip.len()
    }
}
