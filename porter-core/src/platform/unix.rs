use std::path::PathBuf;

use porter_common::error::{PorterError, Result};
use tracing::trace;

use super::{PlatformCapabilities, SpecialFolder};

pub struct UnixCapabilities;

impl PlatformCapabilities for UnixCapabilities {
    fn resolve_special_folder(&self, folder: SpecialFolder) -> Result<PathBuf> {
        let resolved = match folder {
            SpecialFolder::Profile => dirs::home_dir(),
            SpecialFolder::AppData => dirs::config_dir(),
            SpecialFolder::LocalAppData => dirs::data_local_dir(),
        };
        resolved.ok_or_else(|| PorterError::NotFound(format!("special folder {folder:?}")))
    }

    fn impersonate(
        &self,
        _username: &str,
        _domain: &str,
        _password: &str,
        _f: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()> {
        Err(PorterError::Unsupported(
            "user impersonation is only available on Windows".into(),
        ))
    }

    fn create_local_user(&self, _username: &str, _password: &str, _comment: &str) -> Result<()> {
        Err(PorterError::Unsupported(
            "creating local users is only available on Windows".into(),
        ))
    }
}

/// Null-signal probe. `EPERM` means the process exists but belongs to
/// someone else.
pub(super) fn process_alive(pid: u32) -> bool {
    // 0 and negative values address process groups, not a single process.
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: kill with signal 0 performs only the permission and existence checks.
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    let errno = std::io::Error::last_os_error().raw_os_error();
    trace!("kill({}, 0) failed with errno {:?}", pid, errno);
    errno == Some(libc::EPERM)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impersonation_is_unsupported() {
        let err = UnixCapabilities
            .impersonate("player", ".", "secret", &mut || Ok(()))
            .unwrap_err();
        assert!(matches!(err, PorterError::Unsupported(_)));
    }

    #[test]
    fn group_ids_are_never_alive() {
        assert!(!process_alive(0));
        assert!(!process_alive(u32::MAX));
    }
}
