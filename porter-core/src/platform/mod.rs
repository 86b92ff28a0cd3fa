// porter-core/src/platform/mod.rs
// Platform-specific bindings behind one capability interface, so the
// launcher and orchestrator never branch on the target OS themselves.

use std::path::PathBuf;
use std::sync::Arc;

use porter_common::error::Result;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use self::unix::UnixCapabilities;
#[cfg(windows)]
pub use self::windows::WindowsCapabilities;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialFolder {
    /// The user's home / profile folder.
    Profile,
    /// Roaming application data.
    AppData,
    /// Machine-local application data.
    LocalAppData,
}

pub trait PlatformCapabilities: Send + Sync {
    fn resolve_special_folder(&self, folder: SpecialFolder) -> Result<PathBuf>;

    /// Runs `f` while impersonating another local user, reverting afterwards
    /// even when `f` fails.
    fn impersonate(
        &self,
        username: &str,
        domain: &str,
        password: &str,
        f: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()>;

    fn create_local_user(&self, username: &str, password: &str, comment: &str) -> Result<()>;
}

/// Capabilities of the platform this agent was built for.
pub fn current() -> Arc<dyn PlatformCapabilities> {
    #[cfg(unix)]
    {
        Arc::new(UnixCapabilities)
    }
    #[cfg(windows)]
    {
        Arc::new(WindowsCapabilities)
    }
}

/// Whether a process with this id is still running.
pub fn process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        self::unix::process_alive(pid)
    }
    #[cfg(windows)]
    {
        self::windows::process_alive(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn reaped_child_is_dead() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!process_alive(pid));
    }

    #[test]
    fn profile_folder_resolves() {
        let caps = current();
        assert!(caps.resolve_special_folder(SpecialFolder::Profile).is_ok());
    }
}
