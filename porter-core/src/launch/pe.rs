// Reads the machine type and subsystem out of Windows executables.

use std::path::Path;

use object::read::pe::{ImageNtHeaders, ImageOptionalHeader, PeFile32, PeFile64};
use object::{FileKind, LittleEndian};
use porter_common::error::{PorterError, Result, ResultExt};
use porter_common::model::PeInfo;
use tracing::debug;

pub trait PeProber: Send + Sync {
    fn probe(&self, path: &Path) -> Result<PeInfo>;
}

/// [`PeProber`] on top of the `object` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ObjectPeProber;

impl PeProber for ObjectPeProber {
    fn probe(&self, path: &Path) -> Result<PeInfo> {
        let data = porter_aio::fs::read_to_bytes(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let (machine, subsystem) = match FileKind::parse(&*data)? {
            FileKind::Pe32 => headers(PeFile32::parse(&*data)?.nt_headers()),
            FileKind::Pe64 => headers(PeFile64::parse(&*data)?.nt_headers()),
            other => {
                return Err(PorterError::Unsupported(format!(
                    "{} is not a PE executable ({:?})",
                    path.display(),
                    other
                )))
            }
        };
        let info = PeInfo {
            arch: machine_name(machine).to_string(),
            subsystem: subsystem_name(subsystem).to_string(),
        };
        debug!("PE info for {}: {:?}", path.display(), info);
        Ok(info)
    }
}

fn headers<H: ImageNtHeaders>(nt: &H) -> (u16, u16) {
    (
        nt.file_header().machine.get(LittleEndian),
        nt.optional_header().subsystem(),
    )
}

pub fn machine_name(machine: u16) -> &'static str {
    match machine {
        object::pe::IMAGE_FILE_MACHINE_I386 => "386",
        object::pe::IMAGE_FILE_MACHINE_AMD64 => "amd64",
        object::pe::IMAGE_FILE_MACHINE_ARM64 => "arm64",
        object::pe::IMAGE_FILE_MACHINE_ARMNT => "arm",
        _ => "unknown",
    }
}

pub fn subsystem_name(subsystem: u16) -> &'static str {
    match subsystem {
        object::pe::IMAGE_SUBSYSTEM_WINDOWS_GUI => "windows",
        object::pe::IMAGE_SUBSYSTEM_WINDOWS_CUI => "console",
        object::pe::IMAGE_SUBSYSTEM_EFI_APPLICATION => "efi",
        _ => "unknown",
    }
}
