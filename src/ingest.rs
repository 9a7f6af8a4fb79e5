use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

/// Default capacity of the producer → validator queue.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Bounded FIFO between producers and validator workers.
///
/// Producers block when validators fall behind; that backpressure is the
/// only pacing between upstream fetches and probing. Any number of workers
/// may share the consuming end.
#[derive(Clone)]
pub struct IngestQueue {
    tx: mpsc::Sender<String>,
    rx: Arc<Mutex<mpsc::Receiver<String>>>,
}

impl IngestQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Enqueue one candidate, waiting while the queue is full. Blank input
    /// is dropped here so workers never see it.
    pub async fn push(&self, proxy: String) -> bool {
        let proxy = proxy.trim().to_string();
        if proxy.is_empty() {
            return false;
        }
        self.tx.send(proxy).await.is_ok()
    }

    /// Dequeue one candidate, waiting while the queue is empty.
    pub async fn pop(&self) -> Option<String> {
        self.rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_order_and_trimming() {
        let q = IngestQueue::new(8);
        assert!(q.push("  socks5://a:1  ".into()).await);
        assert!(q.push("socks5://b:2".into()).await);
        assert!(!q.push("   ".into()).await);
        assert_eq!(q.pop().await.unwrap(), "socks5://a:1");
        assert_eq!(q.pop().await.unwrap(), "socks5://b:2");
    }

    #[tokio::test]
    async fn full_queue_blocks_the_producer() {
        let q = IngestQueue::new(1);
        assert!(q.push("socks5://a:1".into()).await);

        let q2 = q.clone();
        let blocked = tokio::spawn(async move { q2.push("socks5://b:2".into()).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        assert_eq!(q.pop().await.unwrap(), "socks5://a:1");
        assert!(blocked.await.unwrap());
        assert_eq!(q.pop().await.unwrap(), "socks5://b:2");
    }
}
