//! Self-refreshing proxy pool: producers feed candidates through a bounded
//! queue into validator workers; admitted proxies are served back out
//! through a local SOCKS5 listener and an authenticated read API.

pub mod api;
pub mod check;
pub mod config;
pub mod forward;
pub mod host;
pub mod ingest;
pub mod logging;
pub mod pool;
pub mod sched;
pub mod socks;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use hive_sources::{FreeListProducer, JsonApiProducer, ProxyProducer};
use tracing::{error, info};

use crate::config::Config;
use crate::ingest::IngestQueue;

/// Command line options
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Cli {
    /// Configuration file
    #[arg(long = "config", default_value = "configs/config.toml")]
    pub config: String,

    /// Log level when RUST_LOG is unset
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,
}

/// Run the proxyhive daemon.
pub fn run() -> Result<()> {
    let args = Cli::parse();
    let cfg = Config::load(&args.config)?;
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async move { serve(cfg, &args.log_level).await })
}

async fn serve(cfg: Config, log_level: &str) -> Result<()> {
    let _log_guard = logging::setup(&cfg.log, log_level)?;

    let queue = IngestQueue::new(ingest::DEFAULT_CAPACITY);
    let store = pool::init_store(&cfg.storage, pool::DEFAULT_RATE).await?;

    check::spawn_validators(
        cfg.check_socks.max_concurrent_req,
        cfg.check_socks.clone(),
        queue.clone(),
        store.clone(),
    );

    {
        let store = store.clone();
        let listener = cfg.listener.clone();
        let timeout = cfg.check_socks.timeout;
        tokio::spawn(async move {
            if let Err(e) = socks::serve(store, listener, timeout).await {
                error!(error = %e, "socks5 listener failed");
            }
        });
    }

    if cfg.apiserver.switch.eq_ignore_ascii_case("open") {
        let store = store.clone();
        let api_cfg = cfg.apiserver.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(store, api_cfg).await {
                error!(error = %e, "api server failed");
            }
        });
    }

    let sched = sched::Scheduler::new(queue.clone());
    for spec in &cfg.sources {
        let producer: Arc<dyn ProxyProducer> = if spec.format == "json" {
            Arc::new(JsonApiProducer::new(spec.clone()))
        } else {
            Arc::new(FreeListProducer::new(spec.clone()))
        };
        sched.register(producer, None);
    }

    let plugin_dir = PathBuf::from(&cfg.plugin.plugin_folder);
    host::load_dir(&plugin_dir, &sched).await;
    // the watcher handle must stay alive for events to keep flowing
    let _watcher = match host::spawn_watcher(plugin_dir, sched.clone()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            error!(error = %e, "plugin watcher failed to start");
            None
        }
    };

    let _recheck = sched::spawn_periodic_recheck(
        &cfg.task.periodic_checking,
        cfg.check_socks.clone(),
        store.clone(),
    );
    let _summary = logging::spawn_pool_summary(store.clone(), cfg.log.ip_summary_interval);

    info!("proxyhive up");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
