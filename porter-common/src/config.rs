// porter-common/src/config.rs
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use super::error::{PorterError, Result};

const DEFAULT_SERVER: &str = "https://itch.io";
const DEFAULT_LOCK_POLL: Duration = Duration::from_secs(1);
const DEFAULT_EXIT_TOLERANCE: Duration = Duration::from_secs(10);
const DEFAULT_OUTPUT_LINES: usize = 40;
const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Lock file, relative to an install folder.
pub const RUNLOCK_PATH: &str = ".itch/runlock.json";
/// Private temp dir handed to launched processes, relative to an install folder.
pub const LAUNCH_TEMP_PATH: &str = ".itch/temp";
/// Install receipt, relative to an install folder.
pub const RECEIPT_PATH: &str = ".itch/receipt.json";

#[derive(Debug, Clone)]
pub struct Config {
    pub porter_root: PathBuf,
    pub default_server: String,
    pub lock_poll_interval: Duration,
    /// Runs longer than this have their non-zero exit codes ignored.
    pub exit_tolerance: Duration,
    pub output_lines: usize,
    pub progress_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            porter_root: default_root(),
            default_server: DEFAULT_SERVER.to_string(),
            lock_poll_interval: DEFAULT_LOCK_POLL,
            exit_tolerance: DEFAULT_EXIT_TOLERANCE,
            output_lines: DEFAULT_OUTPUT_LINES,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        debug!("Loading porter configuration");
        let mut config = Config::default();

        if let Some(root) = env::var("PORTER_ROOT").ok().filter(|s| !s.is_empty()) {
            config.porter_root = PathBuf::from(root);
        } else {
            debug!(
                "PORTER_ROOT not set or empty, falling back to default: {}",
                config.porter_root.display()
            );
        }
        debug!("Effective PORTER_ROOT set to: {}", config.porter_root.display());

        if let Some(server) = env::var("PORTER_SERVER").ok().filter(|s| !s.is_empty()) {
            config.default_server = server.trim_end_matches('/').to_string();
        }

        if let Some(poll) = duration_var("PORTER_LOCK_POLL")? {
            if poll.is_zero() {
                return Err(PorterError::Config(
                    "PORTER_LOCK_POLL must be greater than zero".into(),
                ));
            }
            config.lock_poll_interval = poll;
        }
        if let Some(tolerance) = duration_var("PORTER_EXIT_TOLERANCE")? {
            config.exit_tolerance = tolerance;
        }
        if let Some(interval) = duration_var("PORTER_PROGRESS_INTERVAL")? {
            config.progress_interval = interval;
        }
        if let Some(lines) = env::var("PORTER_OUTPUT_LINES").ok().filter(|s| !s.is_empty()) {
            config.output_lines = lines.parse().map_err(|e| {
                PorterError::Config(format!("invalid PORTER_OUTPUT_LINES '{lines}': {e}"))
            })?;
        }

        debug!("Configuration loaded successfully.");
        Ok(config)
    }

    pub fn porter_root(&self) -> &Path {
        &self.porter_root
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.porter_root.join("logs")
    }

    /// Where redistributables are cached between launches.
    pub fn prereqs_dir(&self) -> PathBuf {
        self.porter_root.join("prereqs")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.porter_root.join("state")
    }

    pub fn runlock_path(install_folder: &Path) -> PathBuf {
        install_folder.join(RUNLOCK_PATH)
    }

    pub fn launch_temp_path(install_folder: &Path) -> PathBuf {
        install_folder.join(LAUNCH_TEMP_PATH)
    }

    pub fn receipt_path(install_folder: &Path) -> PathBuf {
        install_folder.join(RECEIPT_PATH)
    }
}

fn default_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("porter"))
        .or_else(|| dirs::home_dir().map(|h| h.join(".porter")))
        .unwrap_or_else(|| PathBuf::from(".porter"))
}

fn duration_var(name: &str) -> Result<Option<Duration>> {
    match env::var(name).ok().filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => humantime::parse_duration(&raw)
            .map(Some)
            .map_err(|e| PorterError::Config(format!("invalid {name} '{raw}': {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_folder_paths_live_under_meta_dir() {
        let folder = Path::new("/games/foo");
        assert_eq!(
            Config::runlock_path(folder),
            PathBuf::from("/games/foo/.itch/runlock.json")
        );
        assert_eq!(
            Config::launch_temp_path(folder),
            PathBuf::from("/games/foo/.itch/temp")
        );
    }

    #[test]
    fn defaults_match_documented_policy() {
        let config = Config::default();
        assert_eq!(config.lock_poll_interval, Duration::from_secs(1));
        assert_eq!(config.exit_tolerance, Duration::from_secs(10));
        assert_eq!(config.output_lines, 40);
        assert_eq!(config.default_server, "https://itch.io");
    }
}
