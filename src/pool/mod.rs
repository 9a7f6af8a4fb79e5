//! The authoritative set of live proxies and its selection strategies.
//!
//! Two backings (line file, redis set) sit behind one `ProxyStore` trait.
//! Outcome feedback is a second, optional capability (`ResultRecorder`)
//! supplied by the UCB decorator; callers discover it at runtime through
//! `as_recorder` and must not assume it exists.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::StorageConfig;

mod file;
mod rate;
mod redis;
mod ucb;

pub use file::FileStore;
pub use rate::RateGate;
pub use redis::RedisStore;
pub use ucb::{UcbStore, DEFAULT_WINDOW};

/// Per-proxy selections per second under the rotation strategy.
pub const DEFAULT_RATE: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The only non-exceptional failure of `get_next`.
    #[error("proxy pool is empty")]
    EmptyPool,
    #[error("pool file I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage backing: {0}")]
    Backing(String),
}

/// Optional outcome-feedback capability.
pub trait ResultRecorder: Send + Sync {
    /// Called after each use of a proxy; `success` reflects that single
    /// attempt. Repeated calls are distinct events.
    fn record_result(&self, proxy: &str, success: bool);
}

/// The pool contract. All operations are safe for concurrent use.
#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// Insert a proxy. Trims whitespace; empty and duplicate inputs no-op.
    async fn add(&self, proxy: &str) -> Result<(), StoreError>;

    /// Drop a proxy. Absent members no-op.
    async fn remove(&self, proxy: &str) -> Result<(), StoreError>;

    /// Remove plus failure attribution where a recorder is present.
    async fn mark_invalid(&self, proxy: &str) -> Result<(), StoreError>;

    /// Stable snapshot of the membership in insertion order.
    async fn get_all(&self) -> Result<Vec<String>, StoreError>;

    /// Select one member. May block on the per-proxy rate limit.
    async fn get_next(&self) -> Result<String, StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;

    fn as_recorder(&self) -> Option<&dyn ResultRecorder> {
        None
    }
}

/// Build the store selected by configuration, wrapping it with the UCB
/// decorator when `storage.strategy = "ucb"`.
pub async fn init_store(
    cfg: &StorageConfig,
    rate: usize,
) -> Result<Arc<dyn ProxyStore>, StoreError> {
    let base: Arc<dyn ProxyStore> = if cfg.kind == "redis" {
        info!("using redis proxy pool backing");
        Arc::new(
            RedisStore::connect(&cfg.redis_host, cfg.redis_port, &cfg.redis_password, rate)
                .await?,
        )
    } else {
        info!(file = %cfg.file_name, "using file proxy pool backing");
        Arc::new(FileStore::open(&cfg.file_name, rate).await?)
    };

    if cfg.strategy == "ucb" {
        info!(window = DEFAULT_WINDOW, "quality-aware selection enabled");
        Ok(Arc::new(UcbStore::new(base, DEFAULT_WINDOW)))
    } else {
        Ok(base)
    }
}
