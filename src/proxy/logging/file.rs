//! 按天轮转的文件日志 sink
//!
//! 每条记录一行 JSON 追加到 `logs_YYYY-MM-DD.jsonl`；轮转在写入时惰性
//! 检查，跨天后的下一次写入切到新文件。

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Local;

use super::{LogSink, Record, SinkError};

pub struct RollingFileSink {
    base_dir: PathBuf,
    current_date: String,
    file: Option<File>,
}

impl RollingFileSink {
    pub fn new(base_dir: &str) -> Result<Self, SinkError> {
        let base_dir = PathBuf::from(base_dir);
        fs::create_dir_all(&base_dir)?;
        let mut sink = Self {
            base_dir,
            current_date: String::new(),
            file: None,
        };
        sink.rotate_if_needed()?;
        Ok(sink)
    }

    fn rotate_if_needed(&mut self) -> Result<(), SinkError> {
        let today = Local::now().format("%Y-%m-%d").to_string();
        if today == self.current_date && self.file.is_some() {
            return Ok(());
        }

        if let Some(mut old) = self.file.take() {
            let _ = old.flush();
        }

        let path = self.base_dir.join(format!("logs_{}.jsonl", today));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.current_date = today;
        self.file = Some(file);
        Ok(())
    }

    #[cfg(test)]
    fn current_path(&self) -> PathBuf {
        self.base_dir
            .join(format!("logs_{}.jsonl", self.current_date))
    }
}

#[async_trait]
impl LogSink for RollingFileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        self.rotate_if_needed()?;
        let line = serde_json::to_string(record).unwrap_or_default();
        let Some(file) = self.file.as_mut() else {
            return Err(SinkError::Closed);
        };
        writeln!(file, "{}", line)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = RollingFileSink::new(dir.path().to_str().unwrap()).unwrap();

        let mut record = Record::new();
        record.insert("request_id".into(), Value::from("r1"));
        record.insert("type".into(), Value::from("request"));
        sink.write(&record).await.unwrap();
        sink.write(&record).await.unwrap();
        sink.close().await.unwrap();

        let content = fs::read_to_string(sink.current_path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["request_id"], "r1");
    }

    #[tokio::test]
    async fn reopens_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = RollingFileSink::new(dir.path().to_str().unwrap()).unwrap();
        sink.close().await.unwrap();
        // 下一次写入惰性重开文件
        let record = Record::new();
        sink.write(&record).await.unwrap();
    }
}
