use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use relayapi::modules::config::ServerConfig;
use relayapi::proxy::client_config::ClientRegistry;
use relayapi::proxy::AxumServer;
use relayapi::{modules, VERSION};

#[derive(Parser, Debug)]
#[command(
    name = "relayapi-server",
    version,
    about = "RelayAPI Server - 加密令牌式 LLM API 网关"
)]
struct Cli {
    /// 服务器配置文件路径
    #[arg(long, default_value = "config.json")]
    config: String,

    /// 客户端配置文件路径或目录 (.rai)
    #[arg(long, default_value = "default.rai")]
    rai: String,

    /// 生成客户端配置 (格式: [host[:port]] 或 help) 并退出
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    gen: Option<String>,

    /// 启用调试日志输出到 debug.log
    #[arg(long, short = 'd')]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // --gen 是一次性命令，打印配置后直接退出
    if let Some(gen_arg) = cli.gen.as_deref() {
        modules::gen::run(gen_arg);
    }

    println!("=== RelayAPI Server Starting ===");
    modules::logger::init_logger(cli.debug);

    tracing::info!("📚 loading server config: {}", cli.config);
    let config = match ServerConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ failed to load config: {}", e);
            process::exit(1);
        }
    };

    if cli.debug {
        tracing::info!("🔧 running in DEBUG mode");
    } else {
        tracing::info!("🔧 running in RELEASE mode");
    }

    tracing::info!("📚 loading rai config: {}", cli.rai);
    let registry = Arc::new(ClientRegistry::new());
    if let Err(e) = registry.load(&cli.rai) {
        tracing::error!("❌ failed to load client config: {}", e);
        process::exit(1);
    }
    if registry.is_empty() {
        tracing::error!("❌ no client configurations found");
        process::exit(1);
    }

    // 目录模式下开启热加载
    if std::path::Path::new(&cli.rai).is_dir() {
        if let Err(e) = Arc::clone(&registry).watch_directory(&cli.rai) {
            tracing::warn!("failed to start config watcher: {}", e);
        }
    }

    let (server, handle, state) = match AxumServer::start(&config, Arc::clone(&registry)).await {
        Ok(started) => started,
        Err(e) => {
            tracing::error!("❌ failed to start server: {}", e);
            process::exit(1);
        }
    };

    tracing::info!(
        "🚀 RelayAPI v{} listening on {} ({} client config(s))",
        VERSION,
        config.bind_address(),
        registry.len()
    );

    shutdown_signal().await;
    tracing::info!("⚡ shutting down server...");

    // 停止接收新连接，最多等 2 秒让在途请求完成
    server.stop();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

    // 排空日志队列并关闭 sink
    state.pipeline.shutdown().await;
    tracing::info!("✅ server stopped gracefully");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
