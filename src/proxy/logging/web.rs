//! Web 回调日志 sink：把记录 POST 到配置的 URL，5 秒超时。

use std::time::Duration;

use async_trait::async_trait;

use super::{LogSink, Record, SinkError};

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct WebSink {
    callback_url: String,
    client: reqwest::Client,
}

impl WebSink {
    pub fn new(callback_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(CALLBACK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            callback_url: callback_url.to_string(),
            client,
        }
    }
}

#[async_trait]
impl LogSink for WebSink {
    fn name(&self) -> &'static str {
        "web"
    }

    async fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        self.client
            .post(&self.callback_url)
            .json(record)
            .send()
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}
