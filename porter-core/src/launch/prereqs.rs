// porter-core/src/launch/prereqs.rs
// Redistributables that must be present before a target can run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use porter_aio::{run_collecting, CommandSpec, OutputCollector};
use porter_common::error::{PorterError, Result, ResultExt};
use porter_common::model::{PrereqStatus, PrereqTask, Runtime};
use porter_common::protocol::{
    Notification, PrereqsEndedNotification, PrereqsStartedNotification,
    PrereqsTaskStateNotification,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::rpc::Conn;

/// File written inside a prerequisite's folder once it is installed.
pub const INSTALLED_MARKER: &str = ".installed";

pub struct PrereqContext<'a> {
    pub names: &'a [String],
    pub prereqs_dir: &'a Path,
    /// Reinstall even when already marked installed.
    pub force: bool,
    pub runtime: Runtime,
    pub conn: &'a dyn Conn,
    pub token: &'a CancellationToken,
}

#[async_trait]
pub trait PrereqResolver: Send + Sync {
    async fn resolve(&self, ctx: &PrereqContext<'_>) -> Result<()>;
}

/// Keeps the client informed about prerequisite progress.
pub struct PrereqTracker<'a> {
    conn: &'a dyn Conn,
    order: Vec<String>,
    tasks: BTreeMap<String, PrereqTask>,
}

impl<'a> PrereqTracker<'a> {
    /// Repeated names are tracked once, at their first position.
    pub fn new(conn: &'a dyn Conn, names: &[String]) -> Self {
        let mut order = Vec::with_capacity(names.len());
        let mut tasks = BTreeMap::new();
        for name in names {
            if tasks.contains_key(name) {
                debug!("Prerequisite {} is listed more than once, skipping the repeat", name);
                continue;
            }
            tasks.insert(name.clone(), PrereqTask::new(name, name, order.len()));
            order.push(name.clone());
        }
        Self { conn, order, tasks }
    }

    /// Distinct prerequisite names in install order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn start(&self) {
        self.conn
            .notify(Notification::PrereqsStarted(PrereqsStartedNotification {
                tasks: self.tasks.clone(),
            }));
    }

    /// Moves `name` to `status`. Going backwards is rejected.
    pub fn set_status(&mut self, name: &str, status: PrereqStatus, progress: f64) -> Result<()> {
        let task = self
            .tasks
            .get_mut(name)
            .ok_or_else(|| PorterError::NotFound(format!("unknown prerequisite '{name}'")))?;
        if !task.status.can_advance_to(status) {
            return Err(PorterError::Validation(format!(
                "prerequisite '{}' cannot go from {:?} back to {:?}",
                name, task.status, status
            )));
        }
        task.status = status;
        self.conn
            .notify(Notification::PrereqsTaskState(PrereqsTaskStateNotification {
                name: name.to_string(),
                status,
                progress: progress.clamp(0.0, 1.0),
                eta: 0.0,
                bps: 0.0,
            }));
        Ok(())
    }

    pub fn status(&self, name: &str) -> Option<PrereqStatus> {
        self.tasks.get(name).map(|t| t.status)
    }

    pub fn end(self) {
        self.conn
            .notify(Notification::PrereqsEnded(PrereqsEndedNotification {}));
    }
}

/// Resolves prerequisites from a local folder: each one lives in
/// `<prereqs_dir>/<name>/` with an `install.sh` (or `install.bat` on
/// Windows) that is run once.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirPrereqResolver;

impl DirPrereqResolver {
    fn script_for(runtime: &Runtime, dir: &Path) -> (PathBuf, CommandSpec) {
        if runtime.is_windows() {
            let script = dir.join("install.bat");
            let spec = CommandSpec::new("cmd").arg("/C").arg(script.as_os_str());
            (script, spec)
        } else {
            let script = dir.join("install.sh");
            let spec = CommandSpec::new("/bin/sh").arg(script.as_os_str());
            (script, spec)
        }
    }

    async fn install_one(
        &self,
        ctx: &PrereqContext<'_>,
        tracker: &mut PrereqTracker<'_>,
        name: &str,
    ) -> Result<()> {
        let dir = ctx.prereqs_dir.join(name);
        if !dir.is_dir() {
            return Err(PorterError::NotFound(format!(
                "prerequisite '{}' not found in {}",
                name,
                ctx.prereqs_dir.display()
            )));
        }
        let marker = dir.join(INSTALLED_MARKER);
        if marker.exists() && !ctx.force {
            debug!("Prerequisite {} already installed", name);
            return tracker.set_status(name, PrereqStatus::Done, 1.0);
        }

        tracker.set_status(name, PrereqStatus::Ready, 0.0)?;
        let (script, spec) = Self::script_for(&ctx.runtime, &dir);
        if script.is_file() {
            tracker.set_status(name, PrereqStatus::Installing, 0.0)?;
            let spec = spec.current_dir(&dir);
            let stdout = OutputCollector::new(40);
            let stderr = OutputCollector::new(40);
            let status = run_collecting(&spec, &stdout, &stderr, ctx.token)
                .await
                .with_context(|| format!("installing prerequisite {name}"))?
                .status;
            if !status.success() {
                for line in stderr.lines() {
                    error!("[{}] {}", name, line);
                }
                return Err(PorterError::InstallError(format!(
                    "prerequisite '{name}' installer exited with {status}"
                )));
            }
        } else {
            debug!("Prerequisite {} has no install script", name);
        }

        porter_aio::fs::atomic_write_file(&marker, b"")?;
        tracker.set_status(name, PrereqStatus::Done, 1.0)
    }
}

#[async_trait]
impl PrereqResolver for DirPrereqResolver {
    #[instrument(skip_all, fields(count = ctx.names.len()))]
    async fn resolve(&self, ctx: &PrereqContext<'_>) -> Result<()> {
        if ctx.names.is_empty() {
            return Ok(());
        }
        let mut tracker = PrereqTracker::new(ctx.conn, ctx.names);
        let names = tracker.names().to_vec();
        tracker.start();
        let mut outcome = Ok(());
        for name in &names {
            if ctx.token.is_cancelled() {
                outcome = Err(PorterError::Cancelled);
                break;
            }
            if let Err(e) = self.install_one(ctx, &mut tracker, name).await {
                outcome = Err(e);
                break;
            }
        }
        tracker.end();
        if outcome.is_ok() {
            info!("All {} prerequisites are installed", names.len());
        }
        outcome
    }
}
