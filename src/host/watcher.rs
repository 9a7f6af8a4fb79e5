use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{error, info};

use super::{is_candidate, ScriptProducer};
use crate::sched::Scheduler;

const DEBOUNCE: Duration = Duration::from_secs(2);

/// Per-path event throttle: a path is processed at most once per interval.
struct Debouncer {
    min_interval: Duration,
    last: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: HashMap::new(),
        }
    }

    fn should_process(&mut self, path: &Path) -> bool {
        let now = Instant::now();
        match self.last.get(path) {
            Some(prev) if now.duration_since(*prev) <= self.min_interval => false,
            _ => {
                self.last.insert(path.to_path_buf(), now);
                true
            }
        }
    }
}

/// Watch the plugin folder and map file-system events onto the scheduler:
/// created/modified files (re)register, removed files deregister. The
/// returned watcher must be kept alive by the caller.
pub fn spawn_watcher(dir: PathBuf, sched: Arc<Scheduler>) -> notify::Result<RecommendedWatcher> {
    let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    info!(dir = %dir.display(), "watching plugin folder");

    tokio::spawn(async move {
        let mut debounce = Debouncer::new(DEBOUNCE);
        while let Some(res) = rx.recv().await {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    error!(error = %e, "plugin watch error");
                    continue;
                }
            };
            match event.kind {
                EventKind::Create(_) | EventKind::Modify(_) => {
                    for path in event.paths {
                        // a rename-away arrives as Modify on a path that no
                        // longer exists
                        if !path.exists() {
                            sched.deregister_path(&path);
                            continue;
                        }
                        if !is_candidate(&path) || !debounce.should_process(&path) {
                            continue;
                        }
                        match ScriptProducer::load(&path).await {
                            Ok(producer) => sched.register(Arc::new(producer), Some(path)),
                            Err(e) => {
                                error!(file = %path.display(), error = %e, "producer reload failed")
                            }
                        }
                    }
                }
                EventKind::Remove(_) => {
                    for path in event.paths {
                        sched.deregister_path(&path);
                    }
                }
                _ => {}
            }
        }
    });

    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debounce_throttles_repeated_events() {
        let mut d = Debouncer::new(Duration::from_secs(2));
        let path = Path::new("/tmp/plugins/a.sh");
        assert!(d.should_process(path));
        assert!(!d.should_process(path));
        assert!(d.should_process(Path::new("/tmp/plugins/b.sh")));
    }

    #[test]
    fn debounce_resets_after_the_interval() {
        let mut d = Debouncer::new(Duration::from_millis(0));
        let path = Path::new("/tmp/plugins/a.sh");
        assert!(d.should_process(path));
        std::thread::sleep(Duration::from_millis(5));
        assert!(d.should_process(path));
    }
}
