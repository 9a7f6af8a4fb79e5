//! Cron-driven producer dispatch and the periodic pool recheck.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::Local;
use cron::Schedule;
use dashmap::DashMap;
use hive_sources::ProxyProducer;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::check;
use crate::config::CheckSocksConfig;
use crate::ingest::IngestQueue;
use crate::pool::ProxyStore;

/// Capacity of the per-run channel between a producer and its drainer.
const RUN_CHANNEL_CAPACITY: usize = 1000;

/// Accept both 5-field (minute-first) and 6-field (second-first) cron
/// expressions.
pub fn parse_cron(expr: &str) -> Result<Schedule, cron::error::Error> {
    let expr = expr.trim();
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized)
}

struct Entry {
    path: Option<PathBuf>,
    job: Option<JoinHandle<()>>,
}

impl Drop for Entry {
    fn drop(&mut self) {
        if let Some(job) = self.job.take() {
            job.abort();
        }
    }
}

/// Registry of producers keyed by their self-reported name. Registration
/// installs the cron job and kicks one immediate run; re-registration under
/// the same name replaces the entry and cancels the previous schedule.
pub struct Scheduler {
    queue: IngestQueue,
    entries: DashMap<String, Entry>,
}

impl Scheduler {
    pub fn new(queue: IngestQueue) -> Arc<Self> {
        Arc::new(Self {
            queue,
            entries: DashMap::new(),
        })
    }

    pub fn register(&self, producer: Arc<dyn ProxyProducer>, path: Option<PathBuf>) {
        let name = producer.name();
        let spec = producer.schedule();

        let job = if spec.trim().is_empty() {
            None
        } else {
            match parse_cron(&spec) {
                Ok(schedule) => {
                    let queue = self.queue.clone();
                    let producer = producer.clone();
                    let name = name.clone();
                    Some(tokio::spawn(async move {
                        cron_loop(schedule, queue, producer, name).await;
                    }))
                }
                Err(e) => {
                    error!(producer = %name, spec = %spec, error = %e, "bad cron expression");
                    None
                }
            }
        };

        // the previous entry (if any) drops here, aborting its job
        self.entries.insert(name.clone(), Entry { path, job });
        info!(producer = %name, schedule = %spec, "producer registered");

        let queue = self.queue.clone();
        tokio::spawn(async move {
            run_producer(&queue, producer, &name).await;
        });
    }

    /// Drop the producer loaded from `path` (used by the hot-reloader when
    /// a file disappears). Falls back to matching by file name when the
    /// full path is unknown.
    pub fn deregister_path(&self, path: &Path) {
        let mut target = None;
        for entry in self.entries.iter() {
            if entry.value().path.as_deref() == Some(path) {
                target = Some(entry.key().clone());
                break;
            }
        }
        if target.is_none() {
            let file_name = path.file_name();
            for entry in self.entries.iter() {
                let entry_file = entry.value().path.as_deref().and_then(|p| p.file_name());
                if entry_file.is_some() && entry_file == file_name {
                    target = Some(entry.key().clone());
                    break;
                }
            }
        }
        match target {
            Some(name) => {
                self.entries.remove(&name);
                info!(producer = %name, "producer deregistered");
            }
            None => info!(path = %path.display(), "no producer registered for removed file"),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

async fn cron_loop(
    schedule: Schedule,
    queue: IngestQueue,
    producer: Arc<dyn ProxyProducer>,
    name: String,
) {
    loop {
        let Some(next) = schedule.upcoming(Local).next() else {
            break;
        };
        let wait = (next - Local::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        tokio::time::sleep(wait).await;
        run_producer(&queue, producer.clone(), &name).await;
    }
}

/// One producer invocation: fresh bounded channel, fetch in its own task
/// (the channel closes when the task returns), drain into the ingestion
/// queue with producer-attributed accounting.
pub async fn run_producer(queue: &IngestQueue, producer: Arc<dyn ProxyProducer>, name: &str) {
    let (tx, mut rx) = mpsc::channel::<String>(RUN_CHANNEL_CAPACITY);

    // fetch runs detached so the drain side sees the channel close when it
    // returns
    let fetch = tokio::spawn(async move { producer.fetch_proxies(tx).await });

    let mut submitted = 0usize;
    while let Some(candidate) = rx.recv().await {
        if queue.push(candidate).await {
            submitted += 1;
        }
    }

    match fetch.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(producer = %name, error = %e, "producer run failed"),
        Err(e) => error!(producer = %name, error = %e, "producer task panicked"),
    }
    info!(producer = %name, submitted, "candidates forwarded to validation");
}

/// Whole-pool revalidation on a cron schedule; empty expression disables.
pub fn spawn_periodic_recheck(
    expr: &str,
    cfg: CheckSocksConfig,
    store: Arc<dyn ProxyStore>,
) -> Option<JoinHandle<()>> {
    let expr = expr.trim();
    if expr.is_empty() {
        return None;
    }
    let schedule = match parse_cron(expr) {
        Ok(s) => s,
        Err(e) => {
            error!(spec = %expr, error = %e, "bad periodic checking expression");
            return None;
        }
    };
    info!(spec = %expr, "periodic pool recheck scheduled");
    Some(tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(Local).next() else {
                break;
            };
            let wait = (next - Local::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tokio::time::sleep(wait).await;
            match store.get_all().await {
                Ok(all) => check::check_batch(&cfg, all, &store).await,
                Err(e) => error!(error = %e, "recheck snapshot failed"),
            }
        }
    }))
}
