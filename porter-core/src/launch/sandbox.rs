// porter-core/src/launch/sandbox.rs
// OS-level isolation for launched targets.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use porter_aio::CommandSpec;
use porter_common::config::Config;
use porter_common::error::{PorterError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::platform::{PlatformCapabilities, SpecialFolder};

pub struct SandboxContext<'a> {
    pub install_folder: &'a Path,
    pub prereqs_dir: &'a Path,
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether [`Sandbox::wrap`] can be used without running setup first.
    fn is_ready(&self, ctx: &SandboxContext<'_>) -> bool;

    async fn setup(&self, ctx: &SandboxContext<'_>) -> Result<()>;

    /// Rewrites `spec` so it runs inside the sandbox.
    fn wrap(&self, spec: CommandSpec, ctx: &SandboxContext<'_>) -> Result<CommandSpec>;
}

/// Linux sandbox on top of `firejail`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirejailSandbox;

impl FirejailSandbox {
    /// A bundled copy under the prerequisites folder wins over `PATH`.
    pub fn locate(prereqs_dir: &Path) -> Option<PathBuf> {
        let bundled = prereqs_dir.join("firejail").join("firejail");
        if bundled.is_file() {
            return Some(bundled);
        }
        which::which("firejail").ok()
    }
}

#[async_trait]
impl Sandbox for FirejailSandbox {
    fn name(&self) -> &'static str {
        "firejail"
    }

    fn is_ready(&self, ctx: &SandboxContext<'_>) -> bool {
        Self::locate(ctx.prereqs_dir).is_some()
    }

    async fn setup(&self, ctx: &SandboxContext<'_>) -> Result<()> {
        match Self::locate(ctx.prereqs_dir) {
            Some(path) => {
                debug!("Using firejail at {}", path.display());
                Ok(())
            }
            None => Err(PorterError::NotFound(format!(
                "firejail is neither on PATH nor in {}",
                ctx.prereqs_dir.join("firejail").display()
            ))),
        }
    }

    fn wrap(&self, spec: CommandSpec, ctx: &SandboxContext<'_>) -> Result<CommandSpec> {
        let firejail = Self::locate(ctx.prereqs_dir)
            .ok_or_else(|| PorterError::NotFound("firejail is not available".into()))?;
        let prefix: [OsString; 5] = [
            "--quiet".into(),
            "--private-tmp".into(),
            "--noroot".into(),
            format!("--whitelist={}", ctx.install_folder.display()).into(),
            "--".into(),
        ];
        Ok(spec.wrap(firejail, &prefix))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxUser {
    pub username: String,
    pub password: String,
}

/// Dedicated low-privilege local user for launched targets.
///
/// Setup provisions the account and checks that it can log on. Spawning a
/// child under that account needs a logon-session spawner this crate does
/// not have, so [`Sandbox::wrap`] refuses instead of running the target
/// with the agent's own token.
pub struct LocalUserSandbox {
    caps: Arc<dyn PlatformCapabilities>,
    credentials_path: PathBuf,
}

impl LocalUserSandbox {
    pub fn new(caps: Arc<dyn PlatformCapabilities>, credentials_path: impl Into<PathBuf>) -> Self {
        Self {
            caps,
            credentials_path: credentials_path.into(),
        }
    }

    fn user(&self) -> Result<Option<SandboxUser>> {
        porter_aio::read_json_opt(&self.credentials_path)
    }

    /// Logs on as `user` and resolves its profile folders, which also
    /// creates them on first use.
    fn verify_logon(&self, user: &SandboxUser) -> Result<Vec<PathBuf>> {
        let mut folders = Vec::with_capacity(3);
        let caps = &self.caps;
        caps.impersonate(&user.username, ".", &user.password, &mut || {
            folders.clear();
            for folder in [
                SpecialFolder::Profile,
                SpecialFolder::AppData,
                SpecialFolder::LocalAppData,
            ] {
                folders.push(caps.resolve_special_folder(folder)?);
            }
            Ok(())
        })?;
        Ok(folders)
    }
}

#[async_trait]
impl Sandbox for LocalUserSandbox {
    fn name(&self) -> &'static str {
        "local-user"
    }

    fn is_ready(&self, _ctx: &SandboxContext<'_>) -> bool {
        matches!(self.user(), Ok(Some(_)))
    }

    async fn setup(&self, _ctx: &SandboxContext<'_>) -> Result<()> {
        let id = Uuid::new_v4().simple().to_string();
        let user = SandboxUser {
            username: format!("porter-player-{}", &id[..8]),
            password: Uuid::new_v4().simple().to_string(),
        };
        self.caps
            .create_local_user(&user.username, &user.password, "porter sandbox user")
            .with_context(|| format!("creating sandbox user {}", user.username))?;
        let folders = self
            .verify_logon(&user)
            .with_context(|| format!("logging on as sandbox user {}", user.username))?;
        debug!("Sandbox user folders: {:?}", folders);
        porter_aio::write_json_sync(&self.credentials_path, &user)?;
        info!("Created sandbox user {}", user.username);
        Ok(())
    }

    fn wrap(&self, spec: CommandSpec, _ctx: &SandboxContext<'_>) -> Result<CommandSpec> {
        let user = self
            .user()?
            .ok_or_else(|| PorterError::Config("sandbox user was never set up".into()))?;
        Err(PorterError::Unsupported(format!(
            "cannot run {} as sandbox user {}: spawning under another account is not available",
            spec.display(),
            user.username
        )))
    }
}

/// Sandbox available on this platform, if any.
pub fn default_sandbox(
    config: &Config,
    caps: Arc<dyn PlatformCapabilities>,
) -> Option<Arc<dyn Sandbox>> {
    if cfg!(target_os = "linux") {
        Some(Arc::new(FirejailSandbox))
    } else if cfg!(windows) {
        Some(Arc::new(LocalUserSandbox::new(
            caps,
            config.state_dir().join("sandbox-user.json"),
        )))
    } else {
        None
    }
}
