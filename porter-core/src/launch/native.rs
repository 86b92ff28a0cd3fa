// porter-core/src/launch/native.rs
// Launches a target as a child process of the agent.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use porter_aio::{CommandSpec, OutputCollector};
use porter_common::config::Config;
use porter_common::error::{PorterError, Result, ResultExt};
use porter_common::model::{Flavor, LaunchCandidate, LaunchStrategy};
use porter_common::protocol::{
    ClientRequest, LaunchExitedNotification, LaunchRunningNotification, LogLevel,
    LogNotification, Notification, PrereqsFailedParams, PrereqsFailedResult,
};
use porter_net::is_network_error;
use tracing::{debug, error, info, instrument, warn};

use super::configure::{BasicConfigurator, Configurator};
use super::exit::{interpret_exit, ExitPolicy, ExitVerdict};
use super::pe::{ObjectPeProber, PeProber};
use super::playtime::{JsonPlayTimeRecorder, PlayTimeRecorder};
use super::prereqs::{DirPrereqResolver, PrereqContext, PrereqResolver};
use super::runner::{DefaultRunnerFactory, RunnerFactory, RunnerParams};
use super::sandbox::default_sandbox;
use super::{Launcher, LauncherParams};
use crate::platform::PlatformCapabilities;
use crate::rpc;

const TEMP_VARS: [&str; 3] = ["TMP", "TEMP", "TMPDIR"];

/// Collaborators of [`NativeLauncher`].
#[derive(Clone)]
pub struct NativeDeps {
    pub configurator: Arc<dyn Configurator>,
    pub pe_prober: Arc<dyn PeProber>,
    pub prereqs: Arc<dyn PrereqResolver>,
    pub runners: Arc<dyn RunnerFactory>,
    pub play_time: Arc<dyn PlayTimeRecorder>,
}

impl NativeDeps {
    pub fn defaults(config: &Config, caps: Arc<dyn PlatformCapabilities>) -> Self {
        Self {
            configurator: Arc::new(BasicConfigurator),
            pe_prober: Arc::new(ObjectPeProber),
            prereqs: Arc::new(DirPrereqResolver),
            runners: Arc::new(DefaultRunnerFactory::new(default_sandbox(config, caps))),
            play_time: Arc::new(JsonPlayTimeRecorder::new(
                config.state_dir().join("playtime.json"),
            )),
        }
    }
}

pub struct NativeLauncher {
    deps: NativeDeps,
    policy: ExitPolicy,
    output_lines: usize,
}

impl NativeLauncher {
    pub fn new(deps: NativeDeps, policy: ExitPolicy, output_lines: usize) -> Self {
        Self {
            deps,
            policy,
            output_lines,
        }
    }

    fn candidate(&self, p: &LauncherParams) -> Option<LaunchCandidate> {
        let mut candidate = match p.candidate.clone() {
            Some(c) => c,
            None => match self.deps.configurator.configure(&p.full_target_path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(
                        "Could not configure {}, launching it as-is: {}",
                        p.full_target_path.display(),
                        e
                    );
                    return None;
                }
            },
        };

        if candidate.flavor == Flavor::NativeWindows && candidate.pe_info.is_none() {
            match self.deps.pe_prober.probe(&p.full_target_path) {
                Ok(info) => {
                    debug!("Target subsystem: {} ({})", info.subsystem, info.arch);
                    candidate.pe_info = Some(info);
                }
                Err(e) => warn!("Could not probe {}: {}", p.full_target_path.display(), e),
            }
        }
        Some(candidate)
    }

    async fn handle_prereqs(&self, p: &LauncherParams) -> Result<()> {
        let ctx = PrereqContext {
            names: &p.params.prereqs,
            prereqs_dir: &p.prereqs_dir,
            force: p.params.force_prereqs,
            runtime: p.runtime,
            conn: p.conn.as_ref(),
            token: &p.token,
        };
        let err = match self.deps.prereqs.resolve(&ctx).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_cancelled() || e.is_aborted() => return Err(e),
            Err(e) if is_network_error(&e) => {
                PorterError::NetworkDisconnected(e.root().to_string()).context(e.to_string())
            }
            Err(e) => e,
        };

        error!("Prerequisites failed: {}", err.causal_chain());
        let answer: PrereqsFailedResult = rpc::call(
            p.conn.as_ref(),
            ClientRequest::PrereqsFailed(PrereqsFailedParams {
                error: err.to_string(),
                error_stack: err.causal_chain(),
            }),
            &p.token,
        )
        .await?;

        if answer.continue_launch {
            warn!("Continuing launch without prerequisites: {}", err);
            Ok(())
        } else {
            Err(PorterError::Aborted(format!(
                "prerequisites failed and the launch was abandoned: {err}"
            )))
        }
    }

    fn report_failure(&self, p: &LauncherParams, stdout: &OutputCollector, stderr: &OutputCollector) {
        let mut report = String::new();
        for (label, collector) in [("stdout", stdout), ("stderr", stderr)] {
            let lines = collector.lines();
            if lines.is_empty() {
                continue;
            }
            error!("Last {} lines of {}:", lines.len(), label);
            report.push_str(&format!("{label}:\n"));
            for line in lines {
                error!("  {}", line);
                report.push_str(&line);
                report.push('\n');
            }
        }
        if !report.is_empty() {
            p.conn.notify(Notification::Log(LogNotification {
                level: LogLevel::Error,
                message: report,
            }));
        }
    }
}

/// Private temp folder for one launch, removed when dropped.
struct TempDirGuard {
    path: PathBuf,
}

impl TempDirGuard {
    fn create(install_folder: &Path) -> Result<Self> {
        let path = Config::launch_temp_path(install_folder);
        porter_aio::fs::create_dir_all(&path)
            .with_context(|| format!("creating launch temp dir {}", path.display()))?;
        Ok(Self { path })
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        if let Err(e) = porter_aio::fs::remove_directory_recursive(&self.path) {
            warn!("Could not clean up {}: {}", self.path.display(), e);
        }
    }
}

fn working_dir(target: &Path, install_folder: &Path) -> PathBuf {
    if target.starts_with(install_folder) {
        if let Some(parent) = target.parent() {
            return parent.to_path_buf();
        }
    }
    install_folder.to_path_buf()
}

#[async_trait]
impl Launcher for NativeLauncher {
    fn strategy(&self) -> LaunchStrategy {
        LaunchStrategy::Native
    }

    #[instrument(skip_all, fields(target = %p.full_target_path.display()))]
    async fn launch(&self, p: LauncherParams) -> Result<()> {
        let install_folder = p.params.install_folder.clone();
        let target = p.full_target_path.clone();
        let cwd = working_dir(&target, &install_folder);
        debug!("Working directory: {}", cwd.display());

        tokio::fs::metadata(&target)
            .await
            .with_context(|| format!("launch target {}", target.display()))?;

        let candidate = self.candidate(&p);

        if !p.params.prereqs.is_empty() {
            self.handle_prereqs(&p).await?;
        }

        let temp = TempDirGuard::create(&install_folder)?;
        let mut spec = CommandSpec::new(target.as_os_str())
            .args(p.params.args.iter())
            .current_dir(&cwd);
        for (key, value) in &p.params.env {
            spec = spec.env(key, value);
        }
        for var in TEMP_VARS {
            spec = spec.env(var, temp.path.as_os_str());
        }

        if let Some((interpreter, prefix)) = candidate.as_ref().and_then(|c| c.flavor.interpreter())
        {
            let program = which::which(interpreter)
                .map(PathBuf::into_os_string)
                .unwrap_or_else(|_| OsString::from(interpreter));
            let prefix: Vec<OsString> = prefix.iter().map(OsString::from).collect();
            debug!("Running through interpreter {:?}", program);
            spec = spec.wrap(program, &prefix);
        }

        let runner = self.deps.runners.runner(RunnerParams {
            sandbox: p.params.sandbox,
            credentials: p.params.credentials.clone(),
            prereqs_dir: p.prereqs_dir.clone(),
            install_folder: install_folder.clone(),
            runtime: p.runtime,
            conn: Arc::clone(&p.conn),
            token: p.token.clone(),
        })?;
        runner.prepare().await?;

        let stdout = OutputCollector::new(self.output_lines);
        let stderr = OutputCollector::new(self.output_lines);

        info!("Running {}", spec.display());
        p.conn
            .notify(Notification::LaunchRunning(LaunchRunningNotification {}));
        let started = Instant::now();
        let outcome = runner.run(spec, &stdout, &stderr).await;
        let elapsed = match &outcome {
            Ok(exit) => exit.elapsed,
            Err(_) => started.elapsed(),
        };
        p.conn
            .notify(Notification::LaunchExited(LaunchExitedNotification {}));
        drop(temp);

        if let Err(e) = self.deps.play_time.record(&install_folder, elapsed) {
            warn!("Could not record play time: {}", e);
        }

        let exit = match outcome {
            Ok(exit) => exit,
            Err(e) => {
                error!("{} did not run to completion: {}", target.display(), e);
                self.report_failure(&p, &stdout, &stderr);
                return Err(e);
            }
        };
        match interpret_exit(
            exit.code,
            elapsed,
            &self.policy,
            p.runtime.is_windows(),
            &target.display().to_string(),
        ) {
            ExitVerdict::Success => {
                info!("{} exited cleanly after {:?}", target.display(), elapsed);
                Ok(())
            }
            ExitVerdict::Tolerated { code, signed_code } => {
                warn!(
                    "{} exited with 0x{:x} ({}) after {:?}, ignoring",
                    target.display(),
                    code,
                    signed_code,
                    elapsed
                );
                Ok(())
            }
            ExitVerdict::Failed(e) => {
                self.report_failure(&p, &stdout, &stderr);
                Err(e)
            }
        }
    }
}
