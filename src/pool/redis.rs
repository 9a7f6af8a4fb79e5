use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{info, warn};

use super::{ProxyStore, RateGate, StoreError};

/// Fixed set key shared by every instance pointing at the same server.
const POOL_KEY: &str = "proxy_pool";

fn backing(e: redis::RedisError) -> StoreError {
    StoreError::Backing(e.to_string())
}

struct Cache {
    proxies: Vec<String>,
    cursor: usize,
}

/// Redis-backed pool: the set lives server-side (`SADD`/`SREM`/`SMEMBERS`/
/// `SCARD`), with a local membership cache for rotation that is refreshed
/// lazily whenever it runs empty.
pub struct RedisStore {
    conn: ConnectionManager,
    cache: parking_lot::Mutex<Cache>,
    gate: RateGate,
}

impl RedisStore {
    pub async fn connect(
        host: &str,
        port: u16,
        password: &str,
        rate: usize,
    ) -> Result<Self, StoreError> {
        let url = if password.is_empty() {
            format!("redis://{host}:{port}/0")
        } else {
            format!("redis://:{password}@{host}:{port}/0")
        };
        let client = redis::Client::open(url).map_err(backing)?;
        let mut conn = ConnectionManager::new(client).await.map_err(backing)?;

        let proxies: Vec<String> = match conn.smembers(POOL_KEY).await {
            Ok(members) => {
                let members: Vec<String> = members;
                info!(count = members.len(), "loaded proxy pool from redis");
                members
            }
            Err(e) => {
                warn!(error = %e, "initial redis load failed, starting with an empty cache");
                Vec::new()
            }
        };

        Ok(Self {
            conn,
            cache: parking_lot::Mutex::new(Cache { proxies, cursor: 0 }),
            gate: RateGate::new(rate),
        })
    }
}

#[async_trait]
impl ProxyStore for RedisStore {
    async fn add(&self, proxy: &str) -> Result<(), StoreError> {
        let proxy = proxy.trim();
        if proxy.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let known: bool = conn.sismember(POOL_KEY, proxy).await.map_err(backing)?;
        if known {
            return Ok(());
        }
        let _: () = conn.sadd(POOL_KEY, proxy).await.map_err(backing)?;

        let mut cache = self.cache.lock();
        if !cache.proxies.iter().any(|p| p == proxy) {
            cache.proxies.push(proxy.to_string());
        }
        Ok(())
    }

    async fn remove(&self, proxy: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let res: Result<(), _> = conn.srem(POOL_KEY, proxy).await.map_err(backing);
        {
            let mut cache = self.cache.lock();
            cache.proxies.retain(|p| p != proxy);
        }
        self.gate.forget(proxy);
        res
    }

    async fn mark_invalid(&self, proxy: &str) -> Result<(), StoreError> {
        self.remove(proxy).await
    }

    async fn get_all(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.smembers(POOL_KEY).await.map_err(backing)
    }

    async fn get_next(&self) -> Result<String, StoreError> {
        let needs_reload = self.cache.lock().proxies.is_empty();
        if needs_reload {
            let mut conn = self.conn.clone();
            let members: Vec<String> = conn.smembers(POOL_KEY).await.map_err(backing)?;
            if members.is_empty() {
                return Err(StoreError::EmptyPool);
            }
            let mut cache = self.cache.lock();
            cache.proxies = members;
            cache.cursor = 0;
        }

        let proxy = {
            let mut cache = self.cache.lock();
            if cache.proxies.is_empty() {
                return Err(StoreError::EmptyPool);
            }
            cache.cursor = (cache.cursor + 1) % cache.proxies.len();
            cache.proxies[cache.cursor].clone()
        };
        self.gate.acquire(&proxy).await;
        Ok(proxy)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        conn.scard(POOL_KEY).await.map_err(backing)
    }
}
