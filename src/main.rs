use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{info, warn};

use vless_reality::{logging, Config, Server};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 配置文件路径 (.json 或 .toml)
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// 日志级别，覆盖配置文件中的 logLevel (RUST_LOG 优先)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 加载配置
    let config = Config::load(&args.config)?;

    // 初始化日志
    let level = args.log_level.as_deref().unwrap_or(&config.log_level);
    let dispatch = logging::dispatch(level);

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()).with_subscriber(dispatch.clone()));

    async {
        info!("Starting VLESS + Reality server");
        info!("Loaded config from: {}", args.config);

        // 创建并启动服务器
        let server = Server::new(config, dispatch.clone())?;
        server.run(shutdown).await?;
        Ok::<(), anyhow::Error>(())
    }
    .with_subscriber(dispatch.clone())
    .await
}

/// Ctrl-C 或 SIGTERM 时取消
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("无法监听 SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("收到退出信号，停止接受新连接");
    shutdown.cancel();
}
