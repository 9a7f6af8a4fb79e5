use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogConfig;
use crate::pool::ProxyStore;

/// Install the global subscriber: stdout always, plus a daily file under
/// `log_dir` when file logging is enabled. The returned guard must be kept
/// alive for the file writer to flush.
pub fn setup(cfg: &LogConfig, default_level: &str) -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if !cfg.enabled {
        fmt().with_env_filter(filter).init();
        return Ok(None);
    }

    std::fs::create_dir_all(&cfg.log_dir)?;
    let appender = tracing_appender::rolling::daily(&cfg.log_dir, "proxyhive.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .init();
    Ok(Some(guard))
}

/// Log the pool size on a fixed cadence so operators can see drift without
/// the read API.
pub fn spawn_pool_summary(store: Arc<dyn ProxyStore>, interval_minutes: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_minutes.max(1) * 60);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match store.len().await {
                Ok(total) => info!(total, "proxy pool summary"),
                Err(e) => info!(error = %e, "proxy pool summary unavailable"),
            }
        }
    })
}
