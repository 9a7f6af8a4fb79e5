use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use super::{ProxyStore, RateGate, StoreError};

struct Inner {
    proxies: Vec<String>,
    cursor: usize,
}

/// File-backed pool: the full set lives in memory in insertion order and is
/// rewritten to disk (one URL per line) after every mutation. Reload on
/// startup, no revalidation.
pub struct FileStore {
    path: PathBuf,
    inner: Mutex<Inner>,
    gate: RateGate,
}

impl FileStore {
    pub async fn open(path: &str, rate: usize) -> Result<Self, StoreError> {
        let path = PathBuf::from(path);
        let mut proxies = Vec::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => {
                for line in data.lines() {
                    let line = line.trim();
                    if !line.is_empty() {
                        proxies.push(line.to_string());
                    }
                }
                info!(count = proxies.len(), file = %path.display(), "loaded proxy pool");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Self {
            path,
            inner: Mutex::new(Inner { proxies, cursor: 0 }),
            gate: RateGate::new(rate),
        })
    }

    async fn persist(&self, proxies: &[String]) -> Result<(), StoreError> {
        let mut out = proxies.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        tokio::fs::write(&self.path, out).await?;
        Ok(())
    }
}

#[async_trait]
impl ProxyStore for FileStore {
    async fn add(&self, proxy: &str) -> Result<(), StoreError> {
        let proxy = proxy.trim();
        if proxy.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        if inner.proxies.iter().any(|p| p == proxy) {
            return Ok(());
        }
        inner.proxies.push(proxy.to_string());
        self.persist(&inner.proxies).await
    }

    async fn remove(&self, proxy: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let before = inner.proxies.len();
        inner.proxies.retain(|p| p != proxy);
        if inner.proxies.len() == before {
            return Ok(());
        }
        self.persist(&inner.proxies).await?;
        drop(inner);
        self.gate.forget(proxy);
        Ok(())
    }

    async fn mark_invalid(&self, proxy: &str) -> Result<(), StoreError> {
        self.remove(proxy).await
    }

    async fn get_all(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.lock().await.proxies.clone())
    }

    async fn get_next(&self) -> Result<String, StoreError> {
        let proxy = {
            let mut inner = self.inner.lock().await;
            if inner.proxies.is_empty() {
                return Err(StoreError::EmptyPool);
            }
            inner.cursor = (inner.cursor + 1) % inner.proxies.len();
            inner.proxies[inner.cursor].clone()
        };
        self.gate.acquire(&proxy).await;
        Ok(proxy)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.inner.lock().await.proxies.len())
    }
}
