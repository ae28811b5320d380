use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use verimon_metrics::{MonitorConfig, MonitorService};

const DEFAULT_CONFIG_PATH: &str = "config/monitor.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    // 日志级别来自配置，所以先加载配置
    let loaded = MonitorConfig::load(&path);
    let config = loaded.as_ref().cloned().unwrap_or_default();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    info!("Starting verimon-monitor service");
    match &loaded {
        Ok(_) => info!("Loaded configuration from {}", path),
        Err(e) => warn!("Using default configuration ({}: {})", path, e),
    }

    let service = MonitorService::new(config).await?;
    info!("Monitor service initialized successfully");

    let handle = service.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    handle.shutdown().await;

    let report = service.health().report();
    info!(
        "Final health: {} ({} components), exposition size {} bytes",
        report.status.as_str(),
        report.components.len(),
        service.exporter().render().await.len()
    );

    Ok(())
}
