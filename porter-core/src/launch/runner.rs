// porter-core/src/launch/runner.rs
// Executes a prepared command line, optionally inside a sandbox.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use porter_aio::process::raw_exit_code;
use porter_aio::{run_collecting, CommandSpec, OutputCollector};
use porter_common::error::{PorterError, Result};
use porter_common::model::{Credentials, Runtime};
use porter_common::protocol::{AllowSandboxSetupParams, AllowSandboxSetupResult, ClientRequest};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::sandbox::{Sandbox, SandboxContext};
use crate::rpc::{self, Conn};

/// Environment variable carrying the API key to launched targets.
pub const API_KEY_ENV: &str = "ITCHIO_API_KEY";

pub struct RunnerParams {
    pub sandbox: bool,
    pub credentials: Option<Credentials>,
    pub prereqs_dir: PathBuf,
    pub install_folder: PathBuf,
    pub runtime: Runtime,
    pub conn: Arc<dyn Conn>,
    pub token: CancellationToken,
}

/// How a launched target ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunExit {
    pub code: u32,
    /// Time the target itself ran, excluding output draining.
    pub elapsed: Duration,
}

#[async_trait]
pub trait Runner: Send + Sync {
    async fn prepare(&self) -> Result<()>;

    /// Runs `spec` to completion and returns its raw exit code.
    async fn run(
        &self,
        spec: CommandSpec,
        stdout: &OutputCollector,
        stderr: &OutputCollector,
    ) -> Result<RunExit>;
}

pub trait RunnerFactory: Send + Sync {
    fn runner(&self, params: RunnerParams) -> Result<Box<dyn Runner>>;
}

/// Picks a [`SimpleRunner`] or a [`SandboxRunner`] from the params.
#[derive(Default)]
pub struct DefaultRunnerFactory {
    sandbox: Option<Arc<dyn Sandbox>>,
}

impl DefaultRunnerFactory {
    pub fn new(sandbox: Option<Arc<dyn Sandbox>>) -> Self {
        Self { sandbox }
    }
}

impl RunnerFactory for DefaultRunnerFactory {
    fn runner(&self, params: RunnerParams) -> Result<Box<dyn Runner>> {
        if !params.sandbox {
            return Ok(Box::new(SimpleRunner { params }));
        }
        match &self.sandbox {
            Some(sandbox) => Ok(Box::new(SandboxRunner {
                params,
                sandbox: Arc::clone(sandbox),
            })),
            None => Err(PorterError::Unsupported(
                "sandboxed launches are not available on this platform".into(),
            )),
        }
    }
}

async fn execute(
    params: &RunnerParams,
    mut spec: CommandSpec,
    stdout: &OutputCollector,
    stderr: &OutputCollector,
) -> Result<RunExit> {
    if let Some(credentials) = &params.credentials {
        spec = spec.env(API_KEY_ENV, &credentials.api_key);
    }
    let finished = run_collecting(&spec, stdout, stderr, &params.token).await?;
    let code = raw_exit_code(&finished.status);
    debug!("{} exited with raw code {}", spec.display(), code);
    Ok(RunExit {
        code,
        elapsed: finished.elapsed,
    })
}

/// Runs the target directly.
pub struct SimpleRunner {
    params: RunnerParams,
}

#[async_trait]
impl Runner for SimpleRunner {
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn run(
        &self,
        spec: CommandSpec,
        stdout: &OutputCollector,
        stderr: &OutputCollector,
    ) -> Result<RunExit> {
        execute(&self.params, spec, stdout, stderr).await
    }
}

/// Runs the target through a [`Sandbox`], setting it up first with the
/// client's consent.
pub struct SandboxRunner {
    params: RunnerParams,
    sandbox: Arc<dyn Sandbox>,
}

impl SandboxRunner {
    fn context(&self) -> SandboxContext<'_> {
        SandboxContext {
            install_folder: &self.params.install_folder,
            prereqs_dir: &self.params.prereqs_dir,
        }
    }
}

#[async_trait]
impl Runner for SandboxRunner {
    async fn prepare(&self) -> Result<()> {
        let ctx = self.context();
        if self.sandbox.is_ready(&ctx) {
            return Ok(());
        }
        info!("Sandbox {} needs setup, asking the client", self.sandbox.name());
        let answer: AllowSandboxSetupResult = rpc::call(
            self.params.conn.as_ref(),
            ClientRequest::AllowSandboxSetup(AllowSandboxSetupParams {}),
            &self.params.token,
        )
        .await?;
        if !answer.allow {
            return Err(PorterError::Aborted(
                "sandbox setup was refused by the client".into(),
            ));
        }
        self.sandbox.setup(&ctx).await
    }

    async fn run(
        &self,
        spec: CommandSpec,
        stdout: &OutputCollector,
        stderr: &OutputCollector,
    ) -> Result<RunExit> {
        let spec = self.sandbox.wrap(spec, &self.context())?;
        execute(&self.params, spec, stdout, stderr).await
    }
}
