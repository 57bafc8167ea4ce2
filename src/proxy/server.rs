//! Axum 服务器装配：中间件栈、路由与优雅关闭。

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{any, get};
use axum::Router;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::modules::config::ServerConfig;
use crate::proxy::client_config::{ClientConfig, ClientRegistry};
use crate::proxy::crypto::{self, CryptoError, TokenCipher};
use crate::proxy::handlers;
use crate::proxy::logging::LogPipeline;
use crate::proxy::middleware as mw;
use crate::proxy::rate_limit::RateGate;
use crate::proxy::stats::Stats;
use crate::proxy::token::UsageLedger;
use crate::proxy::upstream::UpstreamClient;

/// Axum 应用状态
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    /// rai_hash -> 解密器缓存，按需构造
    pub ciphers: Arc<DashMap<String, Arc<dyn TokenCipher>>>,
    pub usage: Arc<UsageLedger>,
    pub gate: Arc<RateGate>,
    pub stats: Arc<Stats>,
    pub pipeline: Arc<LogPipeline>,
    pub upstream: Arc<UpstreamClient>,
}

impl AppState {
    /// 取或建某个配置哈希对应的解密器
    pub fn cipher_for(
        &self,
        hash: &str,
        config: &ClientConfig,
    ) -> Result<Arc<dyn TokenCipher>, CryptoError> {
        if let Some(cipher) = self.ciphers.get(hash) {
            return Ok(Arc::clone(&cipher));
        }
        let cipher: Arc<dyn TokenCipher> = Arc::from(crypto::for_config(config)?);
        self.ciphers.insert(hash.to_string(), Arc::clone(&cipher));
        Ok(cipher)
    }
}

/// Axum 服务器实例
pub struct AxumServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    local_addr: SocketAddr,
}

impl AxumServer {
    /// 启动服务器
    ///
    /// 中间件固定顺序：路径规范化 -> 日志 -> (relayapi 组内) 统计 ->
    /// 限流 -> 认证 -> handler。/health 不经过组内中间件。
    pub async fn start(
        config: &ServerConfig,
        registry: Arc<ClientRegistry>,
    ) -> Result<(Self, JoinHandle<()>, AppState), String> {
        let addr = config.bind_address();

        let upstream = UpstreamClient::new(config.server.write_timeout)?;

        let state = AppState {
            registry,
            ciphers: Arc::new(DashMap::new()),
            usage: Arc::new(UsageLedger::new()),
            gate: Arc::new(RateGate::new(&config.rate_limit)),
            stats: Arc::new(Stats::new(crate::VERSION, &addr)),
            pipeline: Arc::new(LogPipeline::from_config(&config.log)),
            upstream: Arc::new(upstream),
        };

        let relay_routes = Router::new()
            .route("/", any(handlers::handle_relay))
            .route("/*path", any(handlers::handle_relay))
            .layer(from_fn_with_state(
                state.clone(),
                mw::token_auth_middleware,
            ))
            .layer(from_fn_with_state(state.clone(), mw::rate_limit_middleware))
            .layer(from_fn_with_state(state.clone(), mw::stats_middleware));

        let app = Router::new()
            .route("/health", get(handlers::handle_health))
            .nest("/relayapi", relay_routes)
            .layer(from_fn_with_state(state.clone(), mw::logging_middleware))
            .layer(TraceLayer::new_for_http())
            .layer(from_fn(mw::normalize_path_middleware))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| format!("地址 {} 绑定失败: {}", addr, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| format!("获取监听地址失败: {}", e))?;

        tracing::info!("反代服务器启动在 http://{}", local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let serve = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                tracing::error!("server error: {}", e);
            }
        });

        Ok((
            Self {
                shutdown_tx: Some(shutdown_tx),
                local_addr,
            },
            handle,
            state,
        ))
    }

    /// 实际监听地址 (端口 0 时为内核分配的端口)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 停止接收新连接
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
