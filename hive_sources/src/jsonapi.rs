use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{ProduceError, ProxyProducer, SourceSpec};

/// Pulls endpoints out of JSON APIs that return an array of objects with an
/// `ip`/`host` field and a `port` field, the shape most free proxy APIs
/// share. Nested arrays (a common envelope: `{"data": [...]}`) are walked
/// too.
pub struct JsonApiProducer {
    spec: SourceSpec,
    client: reqwest::Client,
}

impl JsonApiProducer {
    pub fn new(spec: SourceSpec) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0")
            .build()
            .unwrap();
        Self { spec, client }
    }
}

fn endpoint_of(obj: &Value) -> Option<(String, u16)> {
    let host = obj
        .get("ip")
        .or_else(|| obj.get("host"))
        .and_then(Value::as_str)?;
    let port = match obj.get("port")? {
        Value::Number(n) => u16::try_from(n.as_u64()?).ok()?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    Some((host.to_string(), port))
}

fn collect(value: &Value, out: &mut Vec<(String, u16)>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(endpoint) = endpoint_of(value) {
                out.push(endpoint);
            } else {
                for nested in map.values() {
                    collect(nested, out);
                }
            }
        }
        _ => {}
    }
}

#[async_trait]
impl ProxyProducer for JsonApiProducer {
    fn name(&self) -> String {
        self.spec.name.clone()
    }

    fn schedule(&self) -> String {
        self.spec.schedule.clone()
    }

    async fn fetch_proxies(&self, out: mpsc::Sender<String>) -> Result<(), ProduceError> {
        let mut seen = HashSet::new();
        let mut fetched = 0usize;
        for url in &self.spec.urls {
            let body = match self.client.get(url.as_str()).send().await {
                Ok(resp) => match resp.text().await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(source = %self.spec.name, %url, error = %e, "api read failed");
                        continue;
                    }
                },
                Err(e) => {
                    warn!(source = %self.spec.name, %url, error = %e, "api fetch failed");
                    continue;
                }
            };
            let value: Value = match serde_json::from_str(&body) {
                Ok(value) => value,
                Err(e) => {
                    warn!(source = %self.spec.name, %url, error = %e, "api response is not json");
                    continue;
                }
            };
            fetched += 1;
            let mut endpoints = Vec::new();
            collect(&value, &mut endpoints);
            for (host, port) in endpoints {
                let proxy = format!("{}://{}:{}", self.spec.scheme, host, port);
                if !seen.insert(proxy.clone()) {
                    continue;
                }
                if out.send(proxy).await.is_err() {
                    return Ok(());
                }
            }
        }

        if fetched == 0 && !self.spec.urls.is_empty() {
            return Err(ProduceError::NoSources);
        }
        info!(source = %self.spec.name, candidates = seen.len(), "api run finished");
        Ok(())
    }
}
