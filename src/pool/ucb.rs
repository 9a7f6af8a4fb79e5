use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;

use super::{ProxyStore, ResultRecorder, StoreError};

/// Sliding-window length for per-proxy outcome history.
pub const DEFAULT_WINDOW: usize = 50;

const EPSILON: f64 = 1e-6;

#[derive(Default)]
struct Stats {
    results: VecDeque<bool>,
    successes: usize,
}

struct State {
    stats: HashMap<String, Stats>,
    total: u64,
}

/// UCB1-with-sliding-window decorator over any `ProxyStore`.
///
/// The wrapped store keeps owning the membership; this layer only changes
/// which member `get_next` hands out, preferring proxies with a high recent
/// success rate while guaranteeing every unseen member is tried once.
pub struct UcbStore {
    base: Arc<dyn ProxyStore>,
    window: usize,
    state: parking_lot::Mutex<State>,
}

impl UcbStore {
    pub fn new(base: Arc<dyn ProxyStore>, window: usize) -> Self {
        Self {
            base,
            window: window.max(1),
            state: parking_lot::Mutex::new(State {
                stats: HashMap::new(),
                total: 0,
            }),
        }
    }
}

#[async_trait]
impl ProxyStore for UcbStore {
    async fn add(&self, proxy: &str) -> Result<(), StoreError> {
        let proxy = proxy.trim();
        if !proxy.is_empty() {
            // an existing window is kept as-is: re-admission never resets it
            self.state
                .lock()
                .stats
                .entry(proxy.to_string())
                .or_default();
        }
        self.base.add(proxy).await
    }

    async fn remove(&self, proxy: &str) -> Result<(), StoreError> {
        self.state.lock().stats.remove(proxy);
        self.base.remove(proxy).await
    }

    async fn mark_invalid(&self, proxy: &str) -> Result<(), StoreError> {
        // the window survives eviction so a later re-admission keeps it
        self.record_result(proxy, false);
        self.base.mark_invalid(proxy).await
    }

    async fn get_all(&self) -> Result<Vec<String>, StoreError> {
        self.base.get_all().await
    }

    async fn get_next(&self) -> Result<String, StoreError> {
        let proxies = self.base.get_all().await?;
        if proxies.is_empty() {
            return Err(StoreError::EmptyPool);
        }

        let mut state = self.state.lock();
        let total = state.total;
        let mut best: Option<&String> = None;
        let mut best_score = -1.0f64;

        for p in &proxies {
            let st = state.stats.entry(p.clone()).or_default();
            let n = st.results.len();
            if n == 0 {
                // unseen: explore before any exploitation
                return Ok(p.clone());
            }
            let mean = st.successes as f64 / n as f64;
            let bonus = (2.0 * ((total + 1) as f64).ln() / n as f64).sqrt();
            let score = mean + bonus;
            if score > best_score + EPSILON {
                best_score = score;
                best = Some(p);
            }
        }

        Ok(best.unwrap_or(&proxies[0]).clone())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.base.len().await
    }

    fn as_recorder(&self) -> Option<&dyn ResultRecorder> {
        Some(self)
    }
}

impl ResultRecorder for UcbStore {
    fn record_result(&self, proxy: &str, success: bool) {
        let mut state = self.state.lock();
        let window = self.window;
        let st = state.stats.entry(proxy.to_string()).or_default();
        st.results.push_back(success);
        if success {
            st.successes += 1;
        }
        if st.results.len() > window {
            if let Some(true) = st.results.pop_front() {
                st.successes -= 1;
            }
        }
        state.total += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::FileStore;

    async fn mem_store(proxies: &[&str]) -> (tempfile::TempDir, Arc<dyn ProxyStore>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.txt").to_str().unwrap().to_string();
        let store: Arc<dyn ProxyStore> =
            Arc::new(FileStore::open(&path, 100).await.unwrap());
        for p in proxies {
            store.add(p).await.unwrap();
        }
        (dir, store)
    }

    #[tokio::test]
    async fn unseen_proxies_are_explored_first() {
        let (_dir, base) = mem_store(&["socks5://a:1", "socks5://b:2"]).await;
        let ucb = UcbStore::new(base, 4);
        // give "a" a perfect history; "b" stays unseen
        ucb.record_result("socks5://a:1", true);
        ucb.record_result("socks5://a:1", true);
        assert_eq!(ucb.get_next().await.unwrap(), "socks5://b:2");
    }

    #[tokio::test]
    async fn full_windows_rank_by_success_rate() {
        let (_dir, base) = mem_store(&["socks5://a:1", "socks5://b:2"]).await;
        let ucb = UcbStore::new(base, 4);
        for _ in 0..4 {
            ucb.record_result("socks5://a:1", true);
        }
        ucb.record_result("socks5://b:2", true);
        for _ in 0..3 {
            ucb.record_result("socks5://b:2", false);
        }
        // both at n == 4, so the bonus term is identical and 4/4 beats 1/4
        let mut winners = 0;
        for _ in 0..10 {
            if ucb.get_next().await.unwrap() == "socks5://a:1" {
                winners += 1;
            }
        }
        assert!(winners >= 8);
    }

    #[tokio::test]
    async fn window_drops_oldest_outcome() {
        let (_dir, base) = mem_store(&["socks5://a:1"]).await;
        let ucb = UcbStore::new(base, 2);
        ucb.record_result("socks5://a:1", true);
        ucb.record_result("socks5://a:1", false);
        ucb.record_result("socks5://a:1", false);
        let state = ucb.state.lock();
        let st = &state.stats["socks5://a:1"];
        assert_eq!(st.results.len(), 2);
        assert_eq!(st.successes, 0);
        assert_eq!(state.total, 3);
    }

    #[tokio::test]
    async fn readmission_keeps_the_window() {
        let (_dir, base) = mem_store(&["socks5://a:1"]).await;
        let ucb = UcbStore::new(base, 4);
        ucb.record_result("socks5://a:1", true);
        ucb.add("socks5://a:1").await.unwrap();
        let state = ucb.state.lock();
        assert_eq!(state.stats["socks5://a:1"].results.len(), 1);
    }

    #[tokio::test]
    async fn mark_invalid_records_a_failure_and_removes() {
        let (_dir, base) = mem_store(&["socks5://a:1", "socks5://b:2"]).await;
        let ucb = UcbStore::new(base, 4);
        let total_before = ucb.state.lock().total;
        ucb.mark_invalid("socks5://a:1").await.unwrap();
        assert_eq!(ucb.len().await.unwrap(), 1);
        {
            let state = ucb.state.lock();
            assert_eq!(state.total, total_before + 1);
            // the failure stays on record for a future re-admission
            let st = &state.stats["socks5://a:1"];
            assert_eq!(st.results.len(), 1);
            assert_eq!(st.successes, 0);
        }
    }

    #[tokio::test]
    async fn readmission_after_mark_invalid_keeps_the_window() {
        let (_dir, base) = mem_store(&["socks5://a:1"]).await;
        let ucb = UcbStore::new(base, 4);
        ucb.record_result("socks5://a:1", true);
        ucb.mark_invalid("socks5://a:1").await.unwrap();
        ucb.add("socks5://a:1").await.unwrap();
        let state = ucb.state.lock();
        let st = &state.stats["socks5://a:1"];
        assert_eq!(st.results.len(), 2);
        assert_eq!(st.successes, 1);
    }

    #[tokio::test]
    async fn empty_pool_surfaces() {
        let (_dir, base) = mem_store(&[]).await;
        let ucb = UcbStore::new(base, 4);
        assert!(matches!(ucb.get_next().await, Err(StoreError::EmptyPool)));
    }

    #[tokio::test]
    async fn ties_break_by_first_seen_order() {
        let (_dir, base) = mem_store(&["socks5://a:1", "socks5://b:2"]).await;
        let ucb = UcbStore::new(base, 4);
        for p in ["socks5://a:1", "socks5://b:2"] {
            ucb.record_result(p, true);
            ucb.record_result(p, true);
        }
        // identical scores: the earlier insertion wins
        assert_eq!(ucb.get_next().await.unwrap(), "socks5://a:1");
    }
}
