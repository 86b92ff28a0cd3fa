// porter-core/src/runlock.rs
// Cross-process advisory lock over one install folder. The lock file records
// its owner's pid; a lock whose owner is gone is stale and gets cleared.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use porter_common::config::Config;
use porter_common::error::{PorterError, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::platform::process_alive;

/// Contents of `.itch/runlock.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunlockPayload {
    pub task: String,
    /// RFC 3339 with nanoseconds.
    pub locked_at: String,
    #[serde(alias = "butlerPID")]
    pub owner_process_id: u32,
}

#[derive(Debug, Clone)]
pub struct RunLock {
    path: PathBuf,
    poll_interval: Duration,
}

impl RunLock {
    pub fn new(install_folder: &Path) -> Self {
        Self {
            path: Config::runlock_path(install_folder),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current lock file contents. Unreadable or malformed files read as `None`.
    pub fn read(&self) -> Option<RunlockPayload> {
        let bytes = std::fs::read(&self.path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(payload) => Some(payload),
            Err(e) => {
                debug!("Ignoring unparsable runlock {}: {}", self.path.display(), e);
                None
            }
        }
    }

    fn is_locked(&self, quiet: bool) -> bool {
        let Some(payload) = self.read() else {
            return false;
        };
        if !process_alive(payload.owner_process_id) {
            if !quiet {
                debug!(
                    "Runlock {} owner {} is gone, clearing stale lock",
                    self.path.display(),
                    payload.owner_process_id
                );
            }
            if let Err(e) = self.unlock() {
                warn!("Could not clear stale runlock {}: {}", self.path.display(), e);
            }
            return false;
        }
        if !quiet {
            debug!(
                "Runlock {} held by pid {} for '{}' since {}",
                self.path.display(),
                payload.owner_process_id,
                payload.task,
                payload.locked_at
            );
        }
        true
    }

    /// Waits until no live process holds the lock, then takes it for `task`.
    /// Fails with [`PorterError::Cancelled`] if `token` fires while waiting,
    /// without touching the lock file.
    pub async fn lock(&self, token: &CancellationToken, task: &str) -> Result<()> {
        if self.is_locked(false) {
            debug!("Waiting ({}) for {}", self.path.display(), task);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(PorterError::Cancelled),
                    _ = tokio::time::sleep(self.poll_interval) => {
                        if !self.is_locked(true) {
                            break;
                        }
                    }
                }
            }
        }

        debug!("Locking ({}) for {}", self.path.display(), task);
        let payload = RunlockPayload {
            task: task.to_string(),
            locked_at: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            owner_process_id: std::process::id(),
        };
        porter_aio::json_io::write_json_sync(&self.path, &payload)
    }

    /// Removes the lock file. Succeeds when it is already gone.
    pub fn unlock(&self) -> Result<()> {
        porter_aio::fs::remove_file(&self.path)
    }

    /// Takes the lock and returns a guard that releases it when dropped.
    pub async fn acquire(&self, token: &CancellationToken, task: &str) -> Result<RunLockGuard> {
        self.lock(token, task).await?;
        Ok(RunLockGuard {
            lock: self.clone(),
            released: false,
        })
    }
}

/// Holds a [`RunLock`] until dropped or explicitly released.
#[derive(Debug)]
pub struct RunLockGuard {
    lock: RunLock,
    released: bool,
}

impl RunLockGuard {
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.lock.unlock()
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.lock.unlock() {
                warn!("Failed to release runlock {}: {}", self.lock.path.display(), e);
            }
        }
    }
}
