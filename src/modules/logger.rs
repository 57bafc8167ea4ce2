use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// 自定义本地时区时间格式化器
struct LocalTimer;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = chrono::Local::now();
        write!(w, "{}", now.to_rfc3339())
    }
}

/// 初始化日志系统
///
/// debug 模式下额外写入 `debug.log` (非阻塞追加)，否则仅输出到控制台。
pub fn init_logger(debug: bool) {
    // 捕获 log 宏日志
    let _ = tracing_log::LogTracer::init();

    let mut file_guard: Option<tracing_appender::non_blocking::WorkerGuard> = None;
    let mut file_layer = None;

    if debug {
        let file_appender = tracing_appender::rolling::never(".", "debug.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        file_guard = Some(guard);
        file_layer = Some(
            fmt::Layer::new()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_level(true)
                .with_timer(LocalTimer),
        );
    }

    let console_layer = fmt::Layer::new()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_timer(LocalTimer);

    let default_level = if debug { "debug" } else { "info" };
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    if let Some(guard) = file_guard {
        // 进程存活期间保持 worker 线程运行
        std::mem::forget(guard);
        info!("日志系统已完成初始化 (终端控制台 + debug.log)");
    } else {
        info!("日志系统已完成初始化 (终端控制台)");
    }
}
