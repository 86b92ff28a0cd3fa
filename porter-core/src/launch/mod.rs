// porter-core/src/launch/mod.rs
// Strategy-keyed launchers and the collaborators of the native one.

pub mod client;
pub mod configure;
pub mod exit;
pub mod native;
pub mod pe;
pub mod playtime;
pub mod prereqs;
pub mod runner;
pub mod sandbox;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use porter_common::config::Config;
use porter_common::error::{PorterError, Result};
use porter_common::model::{LaunchCandidate, LaunchParams, LaunchStrategy, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::platform::PlatformCapabilities;
use crate::rpc::Conn;

pub use client::{HtmlLauncher, ShellLauncher, UrlLauncher};
pub use configure::{BasicConfigurator, Configurator};
pub use exit::{interpret_exit, ExitPolicy, ExitVerdict};
pub use native::{NativeDeps, NativeLauncher};
pub use pe::{ObjectPeProber, PeProber};
pub use playtime::{JsonPlayTimeRecorder, PlayTimeRecorder};
pub use prereqs::{DirPrereqResolver, PrereqContext, PrereqResolver, PrereqTracker};
pub use runner::{DefaultRunnerFactory, RunExit, Runner, RunnerFactory, RunnerParams};
pub use sandbox::{default_sandbox, FirejailSandbox, LocalUserSandbox, Sandbox};

/// Everything a [`Launcher`] needs for one launch.
pub struct LauncherParams {
    pub params: LaunchParams,
    pub full_target_path: PathBuf,
    pub candidate: Option<LaunchCandidate>,
    pub prereqs_dir: PathBuf,
    pub runtime: Runtime,
    pub conn: Arc<dyn Conn>,
    pub token: CancellationToken,
}

impl LauncherParams {
    pub fn new(
        params: LaunchParams,
        config: &Config,
        conn: Arc<dyn Conn>,
        token: CancellationToken,
    ) -> Self {
        Self {
            full_target_path: params.full_target_path(),
            candidate: params.candidate.clone(),
            prereqs_dir: params
                .prereqs_dir
                .clone()
                .unwrap_or_else(|| config.prereqs_dir()),
            runtime: Runtime::current(),
            params,
            conn,
            token,
        }
    }
}

#[async_trait]
pub trait Launcher: Send + Sync {
    fn strategy(&self) -> LaunchStrategy;

    async fn launch(&self, params: LauncherParams) -> Result<()>;
}

/// Strategy to launcher table, built once at startup.
#[derive(Default)]
pub struct LauncherRegistry {
    launchers: HashMap<LaunchStrategy, Arc<dyn Launcher>>,
}

impl LauncherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(config: &Config, caps: Arc<dyn PlatformCapabilities>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NativeLauncher::new(
            NativeDeps::defaults(config, caps),
            ExitPolicy::from_config(config),
            config.output_lines,
        )));
        registry.register(Arc::new(HtmlLauncher));
        registry.register(Arc::new(UrlLauncher));
        registry.register(Arc::new(ShellLauncher));
        registry
    }

    pub fn register(&mut self, launcher: Arc<dyn Launcher>) -> &mut Self {
        let strategy = launcher.strategy();
        if self.launchers.insert(strategy, launcher).is_some() {
            debug!("Replaced launcher for {}", strategy);
        }
        self
    }

    pub fn get(&self, strategy: LaunchStrategy) -> Result<Arc<dyn Launcher>> {
        self.launchers.get(&strategy).cloned().ok_or_else(|| {
            PorterError::Config(format!("no launcher registered for strategy '{strategy}'"))
        })
    }

    /// Looks up the launcher for `params.strategy` and runs it.
    pub async fn launch(&self, params: LauncherParams) -> Result<()> {
        let launcher = self.get(params.params.strategy)?;
        info!(
            "Launching {} with the {} strategy",
            params.full_target_path.display(),
            params.params.strategy
        );
        launcher.launch(params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_strategy_is_a_config_error() {
        let mut registry = LauncherRegistry::new();
        registry.register(Arc::new(UrlLauncher));
        assert!(registry.get(LaunchStrategy::Url).is_ok());
        assert!(matches!(
            registry.get(LaunchStrategy::Native),
            Err(PorterError::Config(_))
        ));
    }

    #[test]
    fn defaults_register_every_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            porter_root: dir.path().to_path_buf(),
            ..Config::default()
        };
        let registry = LauncherRegistry::with_defaults(&config, crate::platform::current());
        for strategy in [
            LaunchStrategy::Native,
            LaunchStrategy::Html,
            LaunchStrategy::Url,
            LaunchStrategy::Shell,
        ] {
            assert_eq!(registry.get(strategy).unwrap().strategy(), strategy);
        }
    }
}
