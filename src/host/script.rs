use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use hive_sources::{ProduceError, ProxyProducer};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// How long a producer may take to answer `manifest`.
const MANIFEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A producer backed by an executable.
///
/// Protocol: `<exe> manifest` prints the producer name on the first line
/// and a cron expression on the second (blank or absent disables
/// scheduling); `<exe> fetch` streams one proxy URL per stdout line.
pub struct ScriptProducer {
    name: String,
    schedule: String,
    path: PathBuf,
}

impl ScriptProducer {
    pub async fn load(path: &Path) -> Result<Self, ProduceError> {
        let run = Command::new(path)
            .arg("manifest")
            .stdin(Stdio::null())
            .output();
        let output = tokio::time::timeout(MANIFEST_TIMEOUT, run)
            .await
            .map_err(|_| ProduceError::Command(format!("{}: manifest timed out", path.display())))??;

        if !output.status.success() {
            return Err(ProduceError::Command(format!(
                "{}: manifest exited with {}",
                path.display(),
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut lines = stdout.lines().map(str::trim);
        let name = match lines.next() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                return Err(ProduceError::Command(format!(
                    "{}: manifest printed no name",
                    path.display()
                )))
            }
        };
        let schedule = lines.next().unwrap_or("").to_string();

        info!(producer = %name, file = %path.display(), "script producer loaded");
        Ok(Self {
            name,
            schedule,
            path: path.to_path_buf(),
        })
    }
}

#[async_trait]
impl ProxyProducer for ScriptProducer {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn schedule(&self) -> String {
        self.schedule.clone()
    }

    async fn fetch_proxies(&self, out: mpsc::Sender<String>) -> Result<(), ProduceError> {
        let mut child = Command::new(&self.path)
            .arg("fetch")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProduceError::Command(format!("{}: no stdout", self.path.display())))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut emitted = 0usize;
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if out.send(line.to_string()).await.is_err() {
                break;
            }
            emitted += 1;
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(ProduceError::Command(format!(
                "{}: fetch exited with {}",
                self.path.display(),
                status
            )));
        }
        debug!(producer = %self.name, emitted, "script fetch finished");
        Ok(())
    }
}
