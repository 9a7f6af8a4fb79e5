//! Producer host: loads external producers and adapts them to the
//! `ProxyProducer` contract.
//!
//! External producers are standalone executables in the plugin folder that
//! speak a line-oriented stdout protocol (see `script`). The folder is
//! swept once at startup and then watched for hot reload.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};

use crate::sched::Scheduler;

mod script;
mod watcher;

pub use script::ScriptProducer;
pub use watcher::spawn_watcher;

fn is_candidate(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => !name.starts_with('.'),
        None => false,
    }
}

/// Sweep the plugin folder, registering every loadable producer. The folder
/// is created when missing so the watcher has something to attach to.
pub async fn load_dir(dir: &Path, sched: &Arc<Scheduler>) {
    if !dir.exists() {
        info!(dir = %dir.display(), "creating plugin folder");
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "plugin folder creation failed");
            return;
        }
    }

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            error!(dir = %dir.display(), error = %e, "plugin folder sweep failed");
            return;
        }
    };

    let mut seen = 0usize;
    let mut loaded = 0usize;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if !is_candidate(&path) {
            continue;
        }
        seen += 1;
        match ScriptProducer::load(&path).await {
            Ok(producer) => {
                sched.register(Arc::new(producer), Some(path));
                loaded += 1;
            }
            Err(e) => error!(file = %path.display(), error = %e, "producer load failed"),
        }
    }
    info!(dir = %dir.display(), loaded, seen, "plugin folder sweep finished");
}
