use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

/// 构建日志 dispatch：`RUST_LOG` 优先，否则使用给定级别
pub fn dispatch(level: &str) -> Dispatch {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .finish();

    Dispatch::new(subscriber)
}
