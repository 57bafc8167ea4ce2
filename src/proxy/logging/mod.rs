//! 异步扇出日志管道
//!
//! 每个 sink 外面包一层有界队列 + 单消费者任务；队列满时丢弃新记录并向
//! 调用方返回错误 (调用方只记日志)。请求管线永远不会因为日志而等待。

pub mod capture;
pub mod console;
pub mod database;
pub mod file;
pub mod web;

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::modules::config::LogConfig;

pub use console::{recent_logs, ConsoleSink};
pub use database::DatabaseSink;
pub use file::RollingFileSink;
pub use web::WebSink;

/// 单条日志记录：请求或响应的 JSON 对象
pub type Record = Map<String, Value>;

/// 队列默认容量
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("log buffer full")]
    BufferFull,
    #[error("sink closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// 日志写入器接口，每个 sink 收到同一份记录
#[async_trait]
pub trait LogSink: Send {
    fn name(&self) -> &'static str;
    async fn write(&mut self, record: &Record) -> Result<(), SinkError>;
    async fn close(&mut self) -> Result<(), SinkError>;
}

/// 异步包装：有界队列 + 单消费者
///
/// `write` 严格非阻塞；关闭时丢弃发送端，消费者排空队列后关闭底层 sink。
pub struct AsyncSink {
    name: &'static str,
    tx: Mutex<Option<mpsc::Sender<Record>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncSink {
    pub fn spawn(mut sink: Box<dyn LogSink>, queue_size: usize) -> Self {
        let name = sink.name();
        let (tx, mut rx) = mpsc::channel::<Record>(queue_size);

        let consumer = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = sink.write(&record).await {
                    tracing::warn!("failed to write log to {}: {}", sink.name(), e);
                }
            }
            if let Err(e) = sink.close().await {
                tracing::warn!("failed to close log sink {}: {}", sink.name(), e);
            }
        });

        Self {
            name,
            tx: Mutex::new(Some(tx)),
            consumer: Mutex::new(Some(consumer)),
        }
    }

    /// 入队一条记录；队列已满或已关闭时立刻返回错误
    pub fn write(&self, record: Record) -> Result<(), SinkError> {
        let guard = match self.tx.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(tx) = guard.as_ref() else {
            return Err(SinkError::Closed);
        };
        tx.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    /// 关闭队列并等消费者排空
    pub async fn shutdown(&self) {
        let tx = match self.tx.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(tx);

        let consumer = match self.consumer.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = consumer {
            let _ = handle.await;
        }
    }
}

/// 日志扇出管道：同一条记录广播给所有启用的 sink
pub struct LogPipeline {
    sinks: Vec<AsyncSink>,
}

impl LogPipeline {
    /// 根据配置构造；单个 sink 初始化失败只告警并跳过
    pub fn from_config(config: &LogConfig) -> Self {
        let mut sinks = Vec::new();

        if config.console {
            sinks.push(AsyncSink::spawn(
                Box::new(ConsoleSink::new()),
                DEFAULT_QUEUE_SIZE,
            ));
        }

        if config.database.enabled {
            match DatabaseSink::new(&config.database.connection_string) {
                Ok(sink) => sinks.push(AsyncSink::spawn(Box::new(sink), DEFAULT_QUEUE_SIZE)),
                Err(e) => tracing::warn!("failed to create database log sink: {}", e),
            }
        }

        if config.web.enabled {
            sinks.push(AsyncSink::spawn(
                Box::new(WebSink::new(&config.web.callback_url)),
                DEFAULT_QUEUE_SIZE,
            ));
        }

        if config.file.enabled {
            match RollingFileSink::new(&config.file.dir_path) {
                Ok(sink) => sinks.push(AsyncSink::spawn(Box::new(sink), DEFAULT_QUEUE_SIZE)),
                Err(e) => tracing::warn!("failed to create file log sink: {}", e),
            }
        }

        Self { sinks }
    }

    #[cfg(test)]
    pub fn from_sinks(sinks: Vec<AsyncSink>) -> Self {
        Self { sinks }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// 广播一条记录；入队失败只记日志，绝不影响请求处理
    pub fn write(&self, record: Record) {
        for sink in &self.sinks {
            if let Err(e) = sink.write(record.clone()) {
                tracing::warn!("failed to enqueue log for {}: {}", sink.name, e);
            }
        }
    }

    /// 优雅关闭：排空所有队列并关闭底层 sink
    pub async fn shutdown(&self) {
        for sink in &self.sinks {
            sink.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink {
        written: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
        delay_ms: u64,
    }

    #[async_trait]
    impl LogSink for CountingSink {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn write(&mut self, _record: &Record) -> Result<(), SinkError> {
            if self.delay_ms > 0 {
                tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
            }
            self.written.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), SinkError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn record(n: usize) -> Record {
        let mut map = Record::new();
        map.insert("n".into(), Value::from(n));
        map
    }

    #[tokio::test]
    async fn drains_queue_on_shutdown() {
        let written = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let sink = AsyncSink::spawn(
            Box::new(CountingSink {
                written: Arc::clone(&written),
                closed: Arc::clone(&closed),
                delay_ms: 0,
            }),
            16,
        );

        for i in 0..10 {
            sink.write(record(i)).unwrap();
        }
        sink.shutdown().await;

        assert_eq!(written.load(Ordering::SeqCst), 10);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn full_queue_drops_and_errors() {
        let written = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let sink = AsyncSink::spawn(
            Box::new(CountingSink {
                written: Arc::clone(&written),
                closed: Arc::clone(&closed),
                delay_ms: 1000,
            }),
            2,
        );

        // 消费者被第一条记录卡住，队列容量 2 很快填满
        let mut rejected = 0;
        for i in 0..10 {
            if matches!(sink.write(record(i)), Err(SinkError::BufferFull)) {
                rejected += 1;
            }
        }
        assert!(rejected > 0, "expected at least one BufferFull rejection");
    }

    #[tokio::test]
    async fn write_after_shutdown_fails() {
        let written = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let sink = AsyncSink::spawn(
            Box::new(CountingSink {
                written,
                closed,
                delay_ms: 0,
            }),
            4,
        );
        sink.shutdown().await;
        assert!(matches!(sink.write(record(0)), Err(SinkError::Closed)));
    }

    #[tokio::test]
    async fn pipeline_broadcasts_to_all_sinks() {
        let written_a = Arc::new(AtomicUsize::new(0));
        let written_b = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let pipeline = LogPipeline::from_sinks(vec![
            AsyncSink::spawn(
                Box::new(CountingSink {
                    written: Arc::clone(&written_a),
                    closed: Arc::clone(&closed),
                    delay_ms: 0,
                }),
                16,
            ),
            AsyncSink::spawn(
                Box::new(CountingSink {
                    written: Arc::clone(&written_b),
                    closed: Arc::clone(&closed),
                    delay_ms: 0,
                }),
                16,
            ),
        ]);

        pipeline.write(record(1));
        pipeline.write(record(2));
        pipeline.shutdown().await;

        assert_eq!(written_a.load(Ordering::SeqCst), 2);
        assert_eq!(written_b.load(Ordering::SeqCst), 2);
    }
}
