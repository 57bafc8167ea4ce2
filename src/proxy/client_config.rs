//! 客户端配置 (.rai) 与多租户注册表
//!
//! 每个 .rai 文件是一份租户配置，注册表以加密参数的 SHA256 哈希为键。
//! 请求侧通过 `rai_hash` 参数选择解密上下文。

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientConfigError {
    #[error("failed to read client config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse client config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid client config: {0}")]
    Invalid(String),
    #[error("failed to watch config directory: {0}")]
    Watch(#[from] notify::Error),
}

/// 客户端配置结构 (.rai 文件)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub version: String,
    pub server: ClientServerConfig,
    pub crypto: CryptoSettings,
}

/// 客户端侧用于拼接请求 URL 的服务器信息
///
/// 服务端只把 `base_path` 当作文档信息，不参与路由。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientServerConfig {
    pub host: String,
    pub port: u16,
    pub base_path: String,
}

/// 加密参数，按 `method` 区分变体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum CryptoSettings {
    Aes {
        aes_key: String,
        aes_iv_seed: String,
    },
    Ecc {},
}

impl CryptoSettings {
    pub fn method(&self) -> &'static str {
        match self {
            CryptoSettings::Aes { .. } => "aes",
            CryptoSettings::Ecc {} => "ecc",
        }
    }

    pub fn aes_key(&self) -> &str {
        match self {
            CryptoSettings::Aes { aes_key, .. } => aes_key,
            CryptoSettings::Ecc {} => "",
        }
    }

    pub fn aes_iv_seed(&self) -> &str {
        match self {
            CryptoSettings::Aes { aes_iv_seed, .. } => aes_iv_seed,
            CryptoSettings::Ecc {} => "",
        }
    }
}

impl ClientConfig {
    /// 根据加密参数生成配置哈希 (小写 hex)
    ///
    /// 这是客户端在 `rai_hash` 参数里携带的公开选择子；任何加密参数的
    /// 变化都会产生新的哈希，旧配置保留以支持滚动换钥。
    pub fn config_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.crypto.method().as_bytes());
        hasher.update(self.crypto.aes_key().as_bytes());
        hasher.update(self.crypto.aes_iv_seed().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// 校验加密参数
    pub fn validate(&self) -> Result<(), ClientConfigError> {
        match &self.crypto {
            CryptoSettings::Aes {
                aes_key,
                aes_iv_seed,
            } => {
                if aes_key.len() != 64 || hex::decode(aes_key).is_err() {
                    return Err(ClientConfigError::Invalid(
                        "aes_key must be 64 hex characters".into(),
                    ));
                }
                if aes_iv_seed.len() != 16 {
                    return Err(ClientConfigError::Invalid(
                        "aes_iv_seed must be 16 bytes".into(),
                    ));
                }
            }
            CryptoSettings::Ecc {} => {}
        }
        Ok(())
    }

    /// 内置默认配置，客户端路径为空时使用
    pub fn builtin_default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            server: ClientServerConfig {
                host: "http://localhost".to_string(),
                port: 8840,
                base_path: "/relayapi/".to_string(),
            },
            crypto: CryptoSettings::Aes {
                aes_key: "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef"
                    .to_string(),
                aes_iv_seed: "fedcba9876543210".to_string(),
            },
        }
    }
}

/// 多租户配置注册表
///
/// 读侧通过 `ArcSwap` 取无锁快照；写侧 (加载/热更新) 以 copy-on-write
/// 方式整体替换映射，不会出现半构造的条目。
pub struct ClientRegistry {
    clients: ArcSwap<HashMap<String, Arc<ClientConfig>>>,
    // 持有 watcher，防止被 drop 后停止派发事件
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: ArcSwap::from_pointee(HashMap::new()),
            watcher: Mutex::new(None),
        }
    }

    /// 加载客户端配置
    ///
    /// - 空路径：注入内置默认配置
    /// - 单个文件：解析失败直接报错
    /// - 目录：扫描 *.rai，单个文件失败仅告警并跳过
    ///
    /// 返回成功加载的配置数量。
    pub fn load(&self, client_path: &str) -> Result<usize, ClientConfigError> {
        if client_path.is_empty() {
            let hash = self.insert(ClientConfig::builtin_default());
            tracing::info!("no client config given, using builtin default ({})", hash);
            return Ok(1);
        }

        let path = Path::new(client_path);
        let meta = fs::metadata(path)?;

        if meta.is_dir() {
            let mut loaded = 0;
            for entry in fs::read_dir(path)? {
                let entry = entry?;
                let file_path = entry.path();
                if file_path.extension().map(|e| e == "rai") != Some(true) {
                    continue;
                }
                match self.load_file(&file_path) {
                    Ok(hash) => {
                        tracing::info!("loaded client config {:?} ({})", file_path, hash);
                        loaded += 1;
                    }
                    Err(e) => {
                        tracing::warn!("failed to load client config {:?}: {}", file_path, e);
                    }
                }
            }
            Ok(loaded)
        } else {
            let hash = self.load_file(path)?;
            tracing::info!("loaded client config {:?} ({})", path, hash);
            Ok(1)
        }
    }

    /// 解析单个 .rai 文件并注册，返回配置哈希
    pub fn load_file(&self, path: &Path) -> Result<String, ClientConfigError> {
        let data = fs::read_to_string(path)?;
        let config: ClientConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(self.insert(config))
    }

    /// 注册一个配置 (copy-on-write upsert)，返回配置哈希
    pub fn insert(&self, config: ClientConfig) -> String {
        let hash = config.config_hash();
        let config = Arc::new(config);
        self.clients.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(hash.clone(), Arc::clone(&config));
            next
        });
        hash
    }

    /// 根据哈希取配置快照
    pub fn get(&self, hash: &str) -> Option<Arc<ClientConfig>> {
        self.clients.load().get(hash).cloned()
    }

    /// 未指定 rai_hash 时回落到任意一个已注册配置
    pub fn first_hash(&self) -> Option<String> {
        self.clients.load().keys().next().cloned()
    }

    pub fn len(&self) -> usize {
        self.clients.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.load().is_empty()
    }

    /// 监控配置目录，.rai 文件的创建/写入事件触发重新加载
    ///
    /// 单个文件的解析失败只记日志，watcher 本身不会退出。
    pub fn watch_directory(
        self: Arc<Self>,
        dir: impl AsRef<Path>,
    ) -> Result<(), ClientConfigError> {
        let registry = Arc::clone(&self);
        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        return;
                    }
                    for path in &event.paths {
                        if path.extension().map(|e| e == "rai") != Some(true) {
                            continue;
                        }
                        match registry.load_file(path) {
                            Ok(hash) => {
                                tracing::info!("reloaded client config {:?} ({})", path, hash);
                            }
                            Err(e) => {
                                tracing::warn!("failed to reload client config {:?}: {}", path, e);
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("client config watcher error: {}", e);
                }
            })?;

        watcher.watch(dir.as_ref(), RecursiveMode::NonRecursive)?;
        tracing::info!("watching client config directory {:?}", dir.as_ref());

        if let Ok(mut slot) = self.watcher.lock() {
            *slot = Some(watcher);
        }
        Ok(())
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
