//! SQLite 日志 sink：逐条插入 request_logs 表。

use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::Value;

use super::{LogSink, Record, SinkError};

const CREATE_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS request_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        request_id TEXT,
        log_type TEXT,
        log_time TEXT,
        log_data TEXT
    )";

const INSERT_SQL: &str = "
    INSERT INTO request_logs (request_id, log_type, log_time, log_data)
    VALUES (?1, ?2, ?3, ?4)";

pub struct DatabaseSink {
    conn: Connection,
}

impl DatabaseSink {
    pub fn new(connection_string: &str) -> Result<Self, SinkError> {
        let conn = Connection::open(connection_string)?;
        conn.execute(CREATE_TABLE_SQL, [])?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    fn open_in_memory() -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory()?;
        conn.execute(CREATE_TABLE_SQL, [])?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl LogSink for DatabaseSink {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        let request_id = record
            .get("request_id")
            .and_then(Value::as_str)
            .unwrap_or("");
        let log_type = record.get("type").and_then(Value::as_str).unwrap_or("");
        let log_time = record.get("time").and_then(Value::as_str).unwrap_or("");
        let payload = serde_json::to_string(record).unwrap_or_default();

        self.conn
            .execute(INSERT_SQL, params![request_id, log_type, log_time, payload])?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        // Connection 在 drop 时关闭
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: &str, id: &str) -> Record {
        let mut record = Record::new();
        record.insert("request_id".into(), Value::from(id));
        record.insert("type".into(), Value::from(kind));
        record.insert("time".into(), Value::from("2026-01-01T00:00:00Z"));
        record.insert("status".into(), Value::from(200));
        record
    }

    #[tokio::test]
    async fn inserts_rows() {
        let mut sink = DatabaseSink::open_in_memory().unwrap();
        sink.write(&record("request", "r1")).await.unwrap();
        sink.write(&record("response", "r1")).await.unwrap();

        let count: i64 = sink
            .conn
            .query_row("SELECT COUNT(*) FROM request_logs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);

        let (rid, kind, payload): (String, String, String) = sink
            .conn
            .query_row(
                "SELECT request_id, log_type, log_data FROM request_logs LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(rid, "r1");
        assert_eq!(kind, "request");
        assert!(payload.contains("\"status\":200"));
    }
}
