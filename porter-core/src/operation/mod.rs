// porter-core/src/operation/mod.rs
// Runs client-initiated install and uninstall operations task by task.

pub mod clean;
pub mod plan;
pub mod progress;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use porter_common::config::Config;
use porter_common::error::{PorterError, Result, ResultExt};
use porter_common::model::{
    Credentials, InstallParams, InstallerType, OperationKind, OperationStartParams, Receipt, Task,
    TaskStatus, TaskType, UninstallParams, Upload,
};
use porter_common::protocol::{
    ClientRequest, InstallResult, Notification, PickUploadParams, PickUploadResult,
    TaskStartedNotification, TaskSucceededNotification,
};
use porter_net::{validate_url, FetchRequest, Fetcher};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::installer::{self, classify, InstallRequest, ManagerRegistry, Sniffer};
use crate::rpc::{self, Conn};
use crate::runlock::RunLock;

pub use progress::ProgressTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::Cancelled | OperationState::Failed
        )
    }

    pub fn transition(self, next: OperationState) -> Result<OperationState> {
        use OperationState::*;
        match (self, next) {
            (Idle, Running) | (Running, Completed) | (Running, Cancelled) | (Running, Failed) => {
                Ok(next)
            }
            _ => Err(PorterError::Validation(format!(
                "illegal operation transition {self:?} -> {next:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub enum OperationOutcome {
    Completed,
    Cancelled,
    Failed(PorterError),
}

impl OperationOutcome {
    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => OperationOutcome::Completed,
            Err(e) if e.is_cancelled() => OperationOutcome::Cancelled,
            Err(e) => OperationOutcome::Failed(e),
        }
    }

    pub fn state(&self) -> OperationState {
        match self {
            OperationOutcome::Completed => OperationState::Completed,
            OperationOutcome::Cancelled => OperationState::Cancelled,
            OperationOutcome::Failed(_) => OperationState::Failed,
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            OperationOutcome::Completed => Ok(()),
            OperationOutcome::Cancelled => Err(PorterError::Cancelled),
            OperationOutcome::Failed(e) => Err(e),
        }
    }
}

/// Collaborators of [`OperationManager`].
#[derive(Clone)]
pub struct OperationDeps {
    pub fetcher: Arc<dyn Fetcher>,
    pub managers: Arc<ManagerRegistry>,
    pub sniffer: Arc<dyn Sniffer>,
    pub config: Arc<Config>,
}

struct LiveOperation {
    token: CancellationToken,
    staging_folder: PathBuf,
    install_folder: Option<PathBuf>,
}

/// Table of running operations.
pub struct OperationManager {
    deps: OperationDeps,
    live: Mutex<HashMap<String, LiveOperation>>,
}

/// Removes its operation from the live table when dropped.
struct Registration<'a> {
    manager: &'a OperationManager,
    id: String,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.manager.live().remove(&self.id);
        debug!("Operation {} unregistered", self.id);
    }
}

/// Per-run context handed to each task.
struct Run<'a> {
    conn: &'a dyn Conn,
    token: &'a CancellationToken,
    staging_folder: &'a Path,
}

impl OperationManager {
    pub fn new(deps: OperationDeps) -> Self {
        Self {
            deps,
            live: Mutex::new(HashMap::new()),
        }
    }

    fn live(&self) -> MutexGuard<'_, HashMap<String, LiveOperation>> {
        match self.live.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn register(&self, params: &OperationStartParams) -> Result<(Registration<'_>, CancellationToken)> {
        let install_folder = params.install_folder().cloned();
        let mut live = self.live();
        if live.contains_key(&params.id) {
            return Err(PorterError::OperationInProgress(format!(
                "operation '{}' is already running",
                params.id
            )));
        }
        for (id, op) in live.iter() {
            if op.staging_folder == params.staging_folder {
                return Err(PorterError::OperationInProgress(format!(
                    "staging folder {} is in use by operation '{}'",
                    params.staging_folder.display(),
                    id
                )));
            }
            if install_folder.is_some() && op.install_folder == install_folder {
                return Err(PorterError::OperationInProgress(format!(
                    "install folder is in use by operation '{id}'"
                )));
            }
        }
        let token = CancellationToken::new();
        live.insert(
            params.id.clone(),
            LiveOperation {
                token: token.clone(),
                staging_folder: params.staging_folder.clone(),
                install_folder,
            },
        );
        Ok((
            Registration {
                manager: self,
                id: params.id.clone(),
            },
            token,
        ))
    }

    /// Runs an operation to completion. Invalid or duplicate requests are
    /// rejected before anything runs.
    #[instrument(skip_all, fields(id = %params.id, kind = ?params.operation))]
    pub async fn start(
        &self,
        params: OperationStartParams,
        conn: Arc<dyn Conn>,
    ) -> Result<OperationOutcome> {
        params.validate()?;
        let (_registration, token) = self.register(&params)?;

        let mut state = OperationState::Idle.transition(OperationState::Running)?;
        info!("Operation started");
        let run = Run {
            conn: conn.as_ref(),
            token: &token,
            staging_folder: &params.staging_folder,
        };
        let result = match (&params.install_params, &params.uninstall_params) {
            (Some(install), _) if params.operation == OperationKind::Install => {
                self.install(&run, install).await
            }
            (_, Some(uninstall)) => self.uninstall(&run, uninstall).await,
            _ => Err(PorterError::Validation("no parameters for operation".into())),
        };

        let outcome = OperationOutcome::from_result(result);
        state = state.transition(outcome.state())?;
        match &outcome {
            OperationOutcome::Completed => info!("Operation completed"),
            OperationOutcome::Cancelled => info!("Operation cancelled"),
            OperationOutcome::Failed(e) => error!("Operation failed: {}", e.causal_chain()),
        }
        debug!("Operation finished in state {:?}", state);
        Ok(outcome)
    }

    /// Signals the operation to stop at its next checkpoint. Returns whether
    /// such an operation was running.
    pub fn cancel(&self, id: &str) -> bool {
        match self.live().get(id) {
            Some(op) => {
                info!("Cancelling operation {}", id);
                op.token.cancel();
                true
            }
            None => {
                debug!("No live operation {} to cancel", id);
                false
            }
        }
    }

    /// Cancels every running operation; used when the client goes away.
    pub fn cancel_all(&self) -> usize {
        let live = self.live();
        for (id, op) in live.iter() {
            debug!("Cancelling operation {} on shutdown", id);
            op.token.cancel();
        }
        live.len()
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.live().contains_key(id)
    }

    /// Staging folders of running operations, which cleanup must not touch.
    pub fn staging_folders(&self) -> Vec<PathBuf> {
        self.live()
            .values()
            .map(|op| op.staging_folder.clone())
            .collect()
    }

    async fn pick_upload(&self, run: &Run<'_>, params: &InstallParams) -> Result<Upload> {
        if let Some(upload) = &params.upload {
            return Ok(upload.clone());
        }
        if params.uploads.len() == 1 {
            return Ok(params.uploads[0].clone());
        }
        let answer: PickUploadResult = rpc::call(
            run.conn,
            ClientRequest::PickUpload(PickUploadParams {
                uploads: params.uploads.clone(),
            }),
            run.token,
        )
        .await?;
        if answer.index < 0 {
            return Err(PorterError::Aborted("no upload was picked".into()));
        }
        params
            .uploads
            .get(answer.index as usize)
            .cloned()
            .ok_or_else(|| {
                PorterError::Protocol(format!(
                    "picked upload {} out of {}",
                    answer.index,
                    params.uploads.len()
                ))
            })
    }

    async fn install(&self, run: &Run<'_>, params: &InstallParams) -> Result<()> {
        let upload = self.pick_upload(run, params).await?;
        let file_name = Path::new(&upload.filename).file_name().ok_or_else(|| {
            PorterError::Validation(format!("upload filename '{}' is invalid", upload.filename))
        })?;
        let staged_path = run.staging_folder.join(file_name);
        let source = upload.local_path.clone().unwrap_or_else(|| staged_path.clone());
        let receipt = installer::read_receipt(&params.install_folder)?;
        let mut tasks = plan::plan_install(&upload, receipt.as_ref(), staged_path.is_file());
        debug!(
            "Planned tasks: {:?}",
            tasks.iter().map(|t| t.task_type).collect::<Vec<_>>()
        );

        for task in tasks.iter_mut() {
            self.begin_task(run, task, Some(&upload))?;
            let result = match task.task_type {
                TaskType::Download => self
                    .download(run, &upload, params.credentials.as_ref(), &staged_path)
                    .await
                    .map(|()| None),
                TaskType::Install | TaskType::Update | TaskType::Heal => self
                    .install_task(run, task, params, &upload, &source, receipt.as_ref())
                    .await
                    .map(Some),
                TaskType::Uninstall => Err(PorterError::Generic(
                    "uninstall task planned for an install".into(),
                )),
            };
            let install_result = settle(task, result)?;
            run.conn
                .notify(Notification::TaskSucceeded(TaskSucceededNotification {
                    task_type: task.task_type,
                    install_result,
                }));
        }

        if let Err(e) =
            porter_aio::fs::remove_directory_recursive_async(run.staging_folder).await
        {
            warn!(
                "Could not wipe staging folder {}: {}",
                run.staging_folder.display(),
                e
            );
        }
        Ok(())
    }

    fn begin_task(&self, run: &Run<'_>, task: &mut Task, upload: Option<&Upload>) -> Result<()> {
        if run.token.is_cancelled() {
            task.advance(TaskStatus::Cancelled)?;
            return Err(PorterError::Cancelled);
        }
        task.advance(TaskStatus::Running)?;
        info!("Starting {} task", task.task_type);
        run.conn
            .notify(Notification::TaskStarted(TaskStartedNotification {
                reason: task.reason,
                task_type: task.task_type,
                upload: upload.cloned(),
                total_size: task.total_size,
            }));
        Ok(())
    }

    fn resolve_url(&self, upload: &Upload, credentials: Option<&Credentials>) -> Result<String> {
        let raw = upload.url.as_deref().ok_or_else(|| {
            PorterError::Validation(format!("upload {} has no url", upload.id))
        })?;
        if raw.contains("://") {
            return Ok(validate_url(raw)?.to_string());
        }
        let server = credentials
            .and_then(|c| c.server.as_deref())
            .unwrap_or(&self.deps.config.default_server);
        let base = validate_url(server)?;
        let joined = base
            .join(raw)
            .map_err(|e| PorterError::Validation(format!("invalid upload url '{raw}': {e}")))?;
        Ok(joined.to_string())
    }

    #[instrument(skip_all, fields(upload = upload.id))]
    async fn download(
        &self,
        run: &Run<'_>,
        upload: &Upload,
        credentials: Option<&Credentials>,
        dest: &Path,
    ) -> Result<()> {
        let url = self.resolve_url(upload, credentials)?;
        porter_aio::fs::create_dir_all_async(run.staging_folder).await?;
        let tracker = ProgressTracker::new(run.conn, self.deps.config.progress_interval);
        let progress = |done: u64, total: Option<u64>| tracker.update(done, total.or(upload.size));
        let size = self
            .deps
            .fetcher
            .fetch(
                &FetchRequest {
                    url: &url,
                    dest,
                    credentials,
                    expected_size: upload.size,
                },
                &progress,
                run.token,
            )
            .await
            .with_context(|| format!("downloading {}", upload.filename))?;
        tracker.finish();
        info!("Downloaded {} ({} bytes)", upload.filename, size);
        Ok(())
    }

    #[instrument(skip_all, fields(task = %task.task_type, folder = %params.install_folder.display()))]
    async fn install_task(
        &self,
        run: &Run<'_>,
        task: &Task,
        params: &InstallParams,
        upload: &Upload,
        source: &Path,
        receipt: Option<&Receipt>,
    ) -> Result<InstallResult> {
        let folder = &params.install_folder;
        let lock = RunLock::new(folder).with_poll_interval(self.deps.config.lock_poll_interval);
        let guard = lock.acquire(run.token, task.task_type.as_str()).await?;

        let mut installer_type = classify(source, self.deps.sniffer.as_ref())?;
        if params.ignore_installers && installer_type == InstallerType::Msi {
            debug!("Ignoring installer, treating {} as naked", source.display());
            installer_type = InstallerType::Naked;
        }
        info!("Installing {} as {}", source.display(), installer_type);
        let manager = self.deps.managers.get(installer_type)?;
        let files = manager
            .install(&InstallRequest {
                source,
                install_folder: folder,
                receipt,
                token: run.token,
            })
            .await?;

        // Commit: runs to the end even if cancellation arrives now.
        let new_receipt = Receipt {
            files,
            installer_name: installer_type,
            upload_id: Some(upload.id),
            build_id: upload.build_id,
            installed_at: Utc::now(),
        };
        installer::write_receipt(folder, &new_receipt)?;
        guard.release()?;

        Ok(InstallResult {
            installer: installer_type,
            upload: Some(upload.clone()),
            files: new_receipt.files.len(),
        })
    }

    async fn uninstall(&self, run: &Run<'_>, params: &UninstallParams) -> Result<()> {
        for mut task in plan::plan_uninstall() {
            self.begin_task(run, &mut task, None)?;
            let result = self.uninstall_task(run, &params.install_folder).await;
            settle(&mut task, result)?;
            run.conn
                .notify(Notification::TaskSucceeded(TaskSucceededNotification {
                    task_type: task.task_type,
                    install_result: None,
                }));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(folder = %folder.display()))]
    async fn uninstall_task(&self, run: &Run<'_>, folder: &Path) -> Result<()> {
        if !folder.exists() {
            info!("Nothing installed at {}", folder.display());
            return Ok(());
        }
        let lock = RunLock::new(folder).with_poll_interval(self.deps.config.lock_poll_interval);
        let guard = lock.acquire(run.token, TaskType::Uninstall.as_str()).await?;

        let receipt = installer::read_receipt(folder)?;
        match &receipt {
            Some(r) => {
                let manager = self.deps.managers.get(r.installer_name)?;
                manager.uninstall(folder, Some(r)).await?;
            }
            None => {
                warn!("No receipt in {}, removing the whole folder", folder.display());
                installer::uninstall_folder(folder, None).await?;
            }
        }
        guard.release()
    }
}

/// Records how a running task ended and passes its result through.
fn settle<T>(task: &mut Task, result: Result<T>) -> Result<T> {
    let status = match &result {
        Ok(_) => TaskStatus::Succeeded,
        Err(e) if e.is_cancelled() => TaskStatus::Cancelled,
        Err(_) => TaskStatus::Failed,
    };
    task.advance(status)?;
    debug!("{} task ended as {:?}", task.task_type, status);
    result
}
