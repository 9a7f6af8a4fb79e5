use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

struct Bucket {
    permits: Arc<Semaphore>,
    refill: JoinHandle<()>,
}

impl Drop for Bucket {
    fn drop(&mut self) {
        // refill task lifetime is bound to the proxy's presence in the pool
        self.refill.abort();
    }
}

/// Per-proxy token buckets: capacity `rate`, refilled at `rate` tokens per
/// second. Buckets are built lazily on first use, pre-filled to capacity.
pub struct RateGate {
    rate: usize,
    buckets: DashMap<String, Bucket>,
}

impl RateGate {
    pub fn new(rate: usize) -> Self {
        Self {
            rate: rate.max(1),
            buckets: DashMap::new(),
        }
    }

    /// Take one token for `proxy`, waiting for a refill when the bucket is
    /// drained.
    pub async fn acquire(&self, proxy: &str) {
        let permits = {
            let bucket = self
                .buckets
                .entry(proxy.to_string())
                .or_insert_with(|| self.new_bucket());
            bucket.permits.clone()
        };
        let acquired = permits.acquire().await;
        if let Ok(permit) = acquired {
            permit.forget();
        }
    }

    /// Drop the bucket for a removed proxy, stopping its refill task.
    pub fn forget(&self, proxy: &str) {
        self.buckets.remove(proxy);
    }

    fn new_bucket(&self) -> Bucket {
        let permits = Arc::new(Semaphore::new(self.rate));
        let refill = tokio::spawn({
            let permits = permits.clone();
            let rate = self.rate;
            async move {
                let mut tick = interval(Duration::from_secs(1) / rate as u32);
                tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tick.tick().await;
                    // full bucket: skip the token
                    if permits.available_permits() < rate {
                        permits.add_permits(1);
                    }
                }
            }
        });
        Bucket { permits, refill }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn initial_burst_then_throttled() {
        let gate = RateGate::new(2);
        let start = Instant::now();
        gate.acquire("socks5://x:1").await;
        gate.acquire("socks5://x:1").await;
        assert!(start.elapsed() < Duration::from_millis(200));

        // third token only exists after one refill interval (500ms at R=2)
        gate.acquire("socks5://x:1").await;
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn buckets_are_per_proxy() {
        let gate = RateGate::new(1);
        let start = Instant::now();
        gate.acquire("socks5://a:1").await;
        gate.acquire("socks5://b:1").await;
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn forget_drops_the_bucket() {
        let gate = RateGate::new(1);
        gate.acquire("socks5://a:1").await;
        gate.forget("socks5://a:1");
        // a fresh bucket starts full again
        let start = Instant::now();
        gate.acquire("socks5://a:1").await;
        assert!(start.elapsed() < Duration::from_millis(200));
    }
}
