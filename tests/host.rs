#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use proxyhive::host;
use proxyhive::ingest::IngestQueue;
use proxyhive::sched::Scheduler;

/// Write an executable script outside the watched dir, then rename it in so
/// the watcher sees one event for a complete file.
fn install_script(staging: &Path, watched: &Path, file: &str, name: &str) -> PathBuf {
    let body = format!(
        "#!/bin/sh\nif [ \"$1\" = manifest ]; then\n  echo {name}\n  echo ''\nelse\n  echo 'socks5://192.0.2.1:1080'\nfi\n"
    );
    let tmp = staging.join(file);
    std::fs::write(&tmp, body).unwrap();
    let mut perms = std::fs::metadata(&tmp).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&tmp, perms).unwrap();
    let target = watched.join(file);
    std::fs::rename(&tmp, &target).unwrap();
    target
}

#[tokio::test]
async fn startup_sweep_registers_existing_producers() {
    let staging = tempfile::tempdir().unwrap();
    let watched = tempfile::tempdir().unwrap();
    install_script(staging.path(), watched.path(), "a.sh", "sweep-a");
    install_script(staging.path(), watched.path(), "b.sh", "sweep-b");

    let sched = Scheduler::new(IngestQueue::new(64));
    host::load_dir(watched.path(), &sched).await;
    assert_eq!(sched.len(), 2);
    assert!(sched.contains("sweep-a"));
    assert!(sched.contains("sweep-b"));
}

#[tokio::test]
async fn dropped_file_is_registered_and_removal_deregisters() {
    let staging = tempfile::tempdir().unwrap();
    let watched = tempfile::tempdir().unwrap();

    let sched = Scheduler::new(IngestQueue::new(64));
    let _watcher = host::spawn_watcher(watched.path().to_path_buf(), sched.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let target = install_script(staging.path(), watched.path(), "hot.sh", "hot-producer");
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(sched.len(), 1);
    assert!(sched.contains("hot-producer"));

    // re-install after the debounce window: still exactly one registration
    install_script(staging.path(), watched.path(), "hot.sh", "hot-producer");
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(sched.len(), 1);

    std::fs::remove_file(&target).unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(sched.len(), 0);
}
