//! Producer contract and built-in proxy sources.
//!
//! A producer is anything that emits candidate proxy URLs: a free-list
//! scraper, a search-engine API adapter, an external script. The host side
//! (registry, cron, hot reload) lives in the main crate; this crate only
//! defines the contract plus the compile-time producers shipped by default.

use async_trait::async_trait;
use tokio::sync::mpsc;

mod freelist;
mod jsonapi;

pub use freelist::{FreeListProducer, SourceSpec};
pub use jsonapi::JsonApiProducer;

/// Errors a producer run can surface.
#[derive(Debug, thiserror::Error)]
pub enum ProduceError {
    #[error("HTTP error fetching {0}: {1}")]
    Http(String, #[source] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("command failed: {0}")]
    Command(String),
    #[error("no sources succeeded")]
    NoSources,
}

/// A source of candidate proxy URLs.
///
/// `fetch_proxies` pushes zero or more `scheme://[user:pass@]host:port`
/// strings into `out` and returns. The caller owns the channel; dropping
/// the sender on return is how a run signals completion.
#[async_trait]
pub trait ProxyProducer: Send + Sync {
    /// Stable identity; re-registration under the same name replaces the
    /// previous registration.
    fn name(&self) -> String;

    /// Cron expression (5 or 6 field). Empty disables scheduling.
    fn schedule(&self) -> String;

    async fn fetch_proxies(&self, out: mpsc::Sender<String>) -> Result<(), ProduceError>;
}
