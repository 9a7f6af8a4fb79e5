//! Reachability probe, validator worker pool and the batch rechecker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::CheckSocksConfig;
use crate::ingest::IngestQueue;
use crate::pool::ProxyStore;

const PROBE_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/112.0.0.0 Safari/537.36 Edg/112.0.1722.17";
const PROBE_REFERER: &str = "https://www.baidu.com/s?ie=utf-8&wd=ip&rqlang=en";

fn probe_target(cfg: &CheckSocksConfig) -> (&str, bool) {
    // geolocation mode swaps in its own probe URL
    if cfg.check_geolocate.switch == "open" {
        (cfg.check_geolocate.check_url.as_str(), true)
    } else {
        (cfg.check_url.as_str(), false)
    }
}

fn keyword_accepted(body: &str, cfg: &CheckSocksConfig, geolocate: bool) -> bool {
    if !geolocate {
        return body.contains(&cfg.check_rsp_keywords);
    }
    let geo = &cfg.check_geolocate;
    if geo.exclude_keywords.iter().any(|k| body.contains(k)) {
        return false;
    }
    geo.include_keywords.iter().all(|k| body.contains(k))
}

fn proxied_client(proxy: &str, timeout_secs: u64) -> Option<reqwest::Client> {
    if !(proxy.starts_with("socks5://")
        || proxy.starts_with("http://")
        || proxy.starts_with("https://"))
    {
        return None;
    }
    let upstream = reqwest::Proxy::all(proxy).ok()?;
    reqwest::Client::builder()
        .proxy(upstream)
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .ok()
}

/// Probe one candidate through itself: a single `GET` against the check URL
/// whose body must satisfy the keyword predicate. Stateless, no retries.
pub async fn probe(proxy: &str, cfg: &CheckSocksConfig) -> bool {
    let (url, geolocate) = probe_target(cfg);
    let Some(client) = proxied_client(proxy, cfg.timeout) else {
        return false;
    };
    let resp = match client
        .get(url)
        .header(reqwest::header::USER_AGENT, PROBE_USER_AGENT)
        .header(reqwest::header::REFERER, PROBE_REFERER)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            debug!(%proxy, error = %e, "probe request failed");
            return false;
        }
    };
    let body = match resp.text().await {
        Ok(body) => body,
        Err(_) => return false,
    };
    keyword_accepted(&body, cfg, geolocate)
}

/// Start `count` long-lived workers draining the ingestion queue. Passing
/// candidates are admitted; failures are dropped silently.
pub fn spawn_validators(
    count: usize,
    cfg: CheckSocksConfig,
    queue: IngestQueue,
    store: Arc<dyn ProxyStore>,
) {
    let count = count.max(1);
    info!(workers = count, "starting proxy validators");
    for _ in 0..count {
        let cfg = cfg.clone();
        let queue = queue.clone();
        let store = store.clone();
        tokio::spawn(async move {
            while let Some(candidate) = queue.pop().await {
                if probe(&candidate, &cfg).await {
                    if let Err(e) = store.add(&candidate).await {
                        warn!(proxy = %candidate, error = %e, "admit failed");
                    }
                }
            }
        });
    }
}

/// Revalidate a whole candidate list with a transient pool of workers,
/// admitting passes and evicting failures. Returns once every result has
/// been consumed.
pub async fn check_batch(
    cfg: &CheckSocksConfig,
    candidates: Vec<String>,
    store: &Arc<dyn ProxyStore>,
) {
    let started = Instant::now();
    let total = candidates.len();
    let workers = cfg.max_concurrent_req.max(1);
    info!(total, workers, timeout = cfg.timeout, "batch check started");

    let mut results = stream::iter(candidates)
        .map(|candidate| async move {
            let alive = probe(&candidate, cfg).await;
            (candidate, alive)
        })
        .buffer_unordered(workers);

    let mut alive = 0usize;
    while let Some((candidate, ok)) = results.next().await {
        if ok {
            if store.add(&candidate).await.is_ok() {
                alive += 1;
            }
            if let Some(rec) = store.as_recorder() {
                rec.record_result(&candidate, true);
            }
        } else if let Err(e) = store.mark_invalid(&candidate).await {
            warn!(proxy = %candidate, error = %e, "evict failed");
        }
    }

    let pool = store.len().await.unwrap_or(0);
    info!(
        elapsed_secs = started.elapsed().as_secs().max(1),
        alive,
        pool,
        "batch check finished"
    );
}
