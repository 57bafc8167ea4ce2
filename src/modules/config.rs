use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 服务端配置加载/校验错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// 服务端运行时配置 (config.json)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ListenConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// 监听相关配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// 读超时(秒)
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
    /// 写超时(秒)，同时作为上游请求的超时上限
    #[serde(default = "default_write_timeout")]
    pub write_timeout: u64,
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
    #[serde(default)]
    pub debug: bool,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            read_timeout: default_read_timeout(),
            write_timeout: default_write_timeout(),
            max_header_bytes: default_max_header_bytes(),
            debug: false,
        }
    }
}

/// 日志扇出开关
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_true")]
    pub console: bool,
    #[serde(default)]
    pub database: DatabaseSinkConfig,
    #[serde(default)]
    pub web: WebSinkConfig,
    #[serde(default)]
    pub file: FileSinkConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console: true,
            database: DatabaseSinkConfig::default(),
            web: WebSinkConfig::default(),
            file: FileSinkConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseSinkConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub connection_string: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebSinkConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub callback_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileSinkConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub dir_path: String,
}

/// 限流配置 (全局 + 单 IP)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_global_rps")]
    pub requests_per_second: f64,
    #[serde(default = "default_global_burst")]
    pub burst: u32,
    #[serde(default)]
    pub ip_limit: IpLimitConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_global_rps(),
            burst: default_global_burst(),
            ip_limit: IpLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpLimitConfig {
    #[serde(default = "default_ip_rps")]
    pub requests_per_second: f64,
    #[serde(default = "default_ip_burst")]
    pub burst: u32,
}

impl Default for IpLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_ip_rps(),
            burst: default_ip_burst(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8840
}

fn default_read_timeout() -> u64 {
    30
}

fn default_write_timeout() -> u64 {
    300
}

fn default_max_header_bytes() -> usize {
    1 << 20
}

fn default_true() -> bool {
    true
}

fn default_global_rps() -> f64 {
    100.0
}

fn default_global_burst() -> u32 {
    200
}

fn default_ip_rps() -> f64 {
    10.0
}

fn default_ip_burst() -> u32 {
    20
}

impl ServerConfig {
    /// 从文件加载并校验服务端配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: ServerConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置是否有效
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("invalid server port".into()));
        }
        if self.server.read_timeout == 0 {
            return Err(ConfigError::Invalid("invalid read timeout".into()));
        }
        if self.server.write_timeout == 0 {
            return Err(ConfigError::Invalid("invalid write timeout".into()));
        }
        if self.rate_limit.requests_per_second <= 0.0 {
            return Err(ConfigError::Invalid("invalid requests per second".into()));
        }
        if self.rate_limit.burst == 0 {
            return Err(ConfigError::Invalid("invalid burst size".into()));
        }
        if self.rate_limit.ip_limit.requests_per_second <= 0.0 {
            return Err(ConfigError::Invalid("invalid per-ip requests per second".into()));
        }
        if self.rate_limit.ip_limit.burst == 0 {
            return Err(ConfigError::Invalid("invalid per-ip burst size".into()));
        }
        if self.log.database.enabled && self.log.database.connection_string.is_empty() {
            return Err(ConfigError::Invalid(
                "database logging enabled but connection string is empty".into(),
            ));
        }
        if self.log.web.enabled && self.log.web.callback_url.is_empty() {
            return Err(ConfigError::Invalid(
                "web logging enabled but callback URL is empty".into(),
            ));
        }
        if self.log.file.enabled && self.log.file.dir_path.is_empty() {
            return Err(ConfigError::Invalid(
                "file logging enabled but directory path is empty".into(),
            ));
        }
        Ok(())
    }

    /// 实际监听地址
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
