//! 控制台日志 sink
//!
//! 紧凑 JSON 单行输出，同时追加到一个小环形缓冲，仪表盘读取最近几条。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::Value;

use super::{LogSink, Record, SinkError};

/// 仪表盘消费的最近日志条数
const RECENT_CAPACITY: usize = 4;

static RECENT: Lazy<Mutex<VecDeque<String>>> =
    Lazy::new(|| Mutex::new(VecDeque::with_capacity(RECENT_CAPACITY)));

fn push_recent(line: &str) {
    let mut recent = match RECENT.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    if recent.len() == RECENT_CAPACITY {
        recent.pop_front();
    }
    recent.push_back(line.to_string());
}

/// 最近写入的控制台日志 (新到旧序从前往后)
pub fn recent_logs() -> Vec<String> {
    match RECENT.lock() {
        Ok(g) => g.iter().cloned().collect(),
        Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
    }
}

pub struct ConsoleSink {
    _private: (),
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// 紧凑格式：request 只留方法/路径，response 只留状态/耗时
    fn format_compact(record: &Record) -> String {
        let kind = record.get("type").and_then(Value::as_str).unwrap_or("");
        let request_id = record
            .get("request_id")
            .and_then(Value::as_str)
            .unwrap_or("-");
        match kind {
            "request" => format!(
                "[{}] {} {} {}",
                &request_id[..request_id.len().min(8)],
                record.get("method").and_then(Value::as_str).unwrap_or("?"),
                record.get("path").and_then(Value::as_str).unwrap_or("?"),
                record
                    .get("client_ip")
                    .and_then(Value::as_str)
                    .unwrap_or("-"),
            ),
            "response" => format!(
                "[{}] {} {}ms",
                &request_id[..request_id.len().min(8)],
                record.get("status").and_then(Value::as_u64).unwrap_or(0),
                record
                    .get("latency_ms")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            ),
            _ => request_id.to_string(),
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogSink for ConsoleSink {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        let line = serde_json::to_string(record).unwrap_or_default();
        println!("{}", line);
        push_recent(&Self::format_compact(record));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_record(id: &str) -> Record {
        let mut record = Record::new();
        record.insert("request_id".into(), Value::from(id));
        record.insert("type".into(), Value::from("request"));
        record.insert("method".into(), Value::from("POST"));
        record.insert("path".into(), Value::from("/relayapi/chat/completions"));
        record.insert("client_ip".into(), Value::from("1.2.3.4"));
        record
    }

    #[tokio::test]
    async fn ring_buffer_keeps_last_four() {
        let mut sink = ConsoleSink::new();
        for i in 0..6 {
            sink.write(&request_record(&format!("req-{:04}aaaa", i)))
                .await
                .unwrap();
        }
        let recent = recent_logs();
        assert!(recent.len() <= 4);
        assert!(recent.last().unwrap().contains("req-0005"));
    }

    #[test]
    fn compact_response_format() {
        let mut record = Record::new();
        record.insert("request_id".into(), Value::from("abcdef1234"));
        record.insert("type".into(), Value::from("response"));
        record.insert("status".into(), Value::from(200));
        record.insert("latency_ms".into(), Value::from(12));
        assert_eq!(ConsoleSink::format_compact(&record), "[abcdef12] 200 12ms");
    }
}
