use std::path::PathBuf;

use porter_common::error::{PorterError, Result};
use tracing::{debug, warn};
use windows::core::HSTRING;
use windows::Win32::Foundation::{CloseHandle, HANDLE, STILL_ACTIVE};
use windows::Win32::Security::{
    ImpersonateLoggedOnUser, LogonUserW, RevertToSelf, LOGON32_LOGON_INTERACTIVE,
    LOGON32_PROVIDER_DEFAULT,
};
use windows::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
};

use super::{PlatformCapabilities, SpecialFolder};

pub struct WindowsCapabilities;

struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        // SAFETY: the handle was returned by a successful Win32 call and is closed once.
        if let Err(e) = unsafe { CloseHandle(self.0) } {
            warn!("Failed to close handle: {}", e);
        }
    }
}

struct RevertGuard;

impl Drop for RevertGuard {
    fn drop(&mut self) {
        // SAFETY: undoes the impersonation started on this thread.
        if let Err(e) = unsafe { RevertToSelf() } {
            warn!("RevertToSelf failed: {}", e);
        }
    }
}

impl PlatformCapabilities for WindowsCapabilities {
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
        username: &str,
        domain: &str,
        password: &str,
        f: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()> {
        let mut token = HANDLE::default();
        // SAFETY: all string arguments outlive the call; `token` receives a new handle.
        unsafe {
            LogonUserW(
                &HSTRING::from(username),
                &HSTRING::from(domain),
                &HSTRING::from(password),
                LOGON32_LOGON_INTERACTIVE,
                LOGON32_PROVIDER_DEFAULT,
                &mut token,
            )
        }
        .map_err(|e| PorterError::Generic(format!("LogonUser failed for {username}: {e}")))?;
        let token = OwnedHandle(token);

        // SAFETY: `token` is a valid primary token from LogonUserW.
        unsafe { ImpersonateLoggedOnUser(token.0) }.map_err(|e| {
            PorterError::Generic(format!("ImpersonateLoggedOnUser failed for {username}: {e}"))
        })?;
        let _revert = RevertGuard;
        debug!("Impersonating {}\\{}", domain, username);
        f()
    }

    fn create_local_user(&self, username: &str, password: &str, comment: &str) -> Result<()> {
        let output = std::process::Command::new("net")
            .args(["user", username, password, "/add"])
            .arg(format!("/comment:{comment}"))
            .output()?;
        if output.status.success() {
            debug!("Created local user {}", username);
            Ok(())
        } else {
            Err(PorterError::Generic(format!(
                "net user /add failed for {username}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// Opens the process with limited query rights and checks it has not exited.
pub(super) fn process_alive(pid: u32) -> bool {
    // SAFETY: OpenProcess has no preconditions; failure means no such process we can see.
    let handle = match unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) } {
        Ok(h) => OwnedHandle(h),
        Err(_) => return false,
    };
    let mut code = 0u32;
    // SAFETY: `handle` is valid for the duration of the call.
    match unsafe { GetExitCodeProcess(handle.0, &mut code) } {
        Ok(()) => code == STILL_ACTIVE.0 as u32,
        Err(_) => true,
    }
}
