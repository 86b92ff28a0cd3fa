use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use porter_common::error::{Result, ResultExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Records how long a launched target ran.
pub trait PlayTimeRecorder: Send + Sync {
    fn record(&self, install_folder: &Path, duration: Duration) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayTimeEntry {
    pub seconds_run: u64,
    pub sessions: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Play time per install folder, keyed by its path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayTimeLedger {
    #[serde(default)]
    pub installs: BTreeMap<String, PlayTimeEntry>,
}

/// Keeps the ledger in one JSON file.
pub struct JsonPlayTimeRecorder {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonPlayTimeRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn ledger(&self) -> Result<PlayTimeLedger> {
        Ok(porter_aio::read_json_opt::<PlayTimeLedger>(&self.path)?.unwrap_or_default())
    }
}

impl PlayTimeRecorder for JsonPlayTimeRecorder {
    fn record(&self, install_folder: &Path, duration: Duration) -> Result<()> {
        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut ledger = self
            .ledger()
            .with_context(|| format!("reading play time ledger {}", self.path.display()))?;
        let entry = ledger
            .installs
            .entry(install_folder.to_string_lossy().to_string())
            .or_default();
        entry.seconds_run += duration.as_secs();
        entry.sessions += 1;
        entry.last_run_at = Some(Utc::now());
        debug!(
            "Recorded {}s of play for {} ({} total)",
            duration.as_secs(),
            install_folder.display(),
            entry.seconds_run
        );
        porter_aio::write_json_sync(&self.path, &ledger)
    }
}
