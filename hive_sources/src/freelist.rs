use std::collections::HashSet;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{ProduceError, ProxyProducer};

static HOST_PORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,3}(?:\.\d{1,3}){3}):(\d{2,5})").unwrap());

fn default_scheme() -> String {
    "socks5".to_string()
}

/// One `[[sources]]` entry from the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    #[serde(default)]
    pub schedule: String,
    /// Scheme prefixed onto every extracted `ip:port`.
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// "json" selects the JSON API producer; anything else gets the
    /// plain-text scraper.
    #[serde(default)]
    pub format: String,
    pub urls: Vec<String>,
}

/// Scrapes plain-text proxy lists over HTTP and emits scheme-prefixed URLs.
///
/// Feeds are fetched concurrently; `ip:port` pairs are pulled out of each
/// body with a regex and deduplicated across the whole run.
pub struct FreeListProducer {
    spec: SourceSpec,
    client: reqwest::Client,
}

impl FreeListProducer {
    pub fn new(spec: SourceSpec) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0")
            .build()
            .unwrap();
        Self { spec, client }
    }
}

#[async_trait]
impl ProxyProducer for FreeListProducer {
    fn name(&self) -> String {
        self.spec.name.clone()
    }

    fn schedule(&self) -> String {
        self.spec.schedule.clone()
    }

    async fn fetch_proxies(&self, out: mpsc::Sender<String>) -> Result<(), ProduceError> {
        let mut fetches = FuturesUnordered::new();
        for url in &self.spec.urls {
            let client = self.client.clone();
            fetches.push(async move {
                match client.get(url.as_str()).send().await {
                    Ok(resp) => match resp.text().await {
                        Ok(text) => Ok((url.clone(), text)),
                        Err(e) => Err(ProduceError::Http(url.clone(), e)),
                    },
                    Err(e) => Err(ProduceError::Http(url.clone(), e)),
                }
            });
        }

        let mut seen = HashSet::new();
        let mut fetched = 0usize;
        while let Some(res) = fetches.next().await {
            let (url, text) = match res {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(source = %self.spec.name, error = %e, "feed fetch failed");
                    continue;
                }
            };
            fetched += 1;
            let mut extracted = 0usize;
            for caps in HOST_PORT_RE.captures_iter(&text) {
                let proxy = format!("{}://{}:{}", self.spec.scheme, &caps[1], &caps[2]);
                if !seen.insert(proxy.clone()) {
                    continue;
                }
                extracted += 1;
                if out.send(proxy).await.is_err() {
                    // collector went away, nothing left to do
                    return Ok(());
                }
            }
            debug!(source = %self.spec.name, %url, extracted, "feed parsed");
        }

        if fetched == 0 && !self.spec.urls.is_empty() {
            return Err(ProduceError::NoSources);
        }
        info!(source = %self.spec.name, candidates = seen.len(), "free-list run finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_pulls_host_port_pairs() {
        let body = "x 1.2.3.4:8080 y\nsocks5://5.6.7.8:1080\nnot-a-proxy 300.1:99999";
        let pairs: Vec<_> = HOST_PORT_RE
            .captures_iter(body)
            .map(|c| format!("{}:{}", &c[1], &c[2]))
            .collect();
        assert!(pairs.contains(&"1.2.3.4:8080".to_string()));
        assert!(pairs.contains(&"5.6.7.8:1080".to_string()));
    }

    #[test]
    fn spec_defaults_to_socks5_scheme() {
        let spec: SourceSpec =
            serde_json::from_str(r#"{"name":"a","urls":["http://x/list"]}"#).unwrap();
        assert_eq!(spec.scheme, "socks5");
        assert!(spec.schedule.is_empty());
    }
}
