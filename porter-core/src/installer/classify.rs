// porter-core/src/installer/classify.rs
use std::path::Path;

use porter_common::error::Result;
use porter_common::model::InstallerType;
use tracing::debug;

use InstallerType::{Archive, Dmg, Msi, Naked, Unsupported};

/// Known extensions, in lookup order. `.exe` is deliberately missing: the
/// same extension covers self-extracting archives, installers and bare
/// executables, so those go through content sniffing.
pub const EXTENSION_TABLE: &[(&str, InstallerType)] = &[
    // Generic archives
    (".zip", Archive),
    (".gz", Archive),
    (".bz2", Archive),
    (".7z", Archive),
    (".tar", Archive),
    (".xz", Archive),
    (".rar", Archive),
    // Known non-supported
    (".deb", Unsupported),
    (".rpm", Unsupported),
    (".pkg", Unsupported),
    // Platform-specific packages
    (".dmg", Dmg),
    (".msi", Msi),
    // Known naked that also sniff as other formats
    (".jar", Naked),
    (".air", Naked),
    (".love", Naked),
    (".unitypackage", Naked),
    // Books
    (".pdf", Naked),
    (".ps", Naked),
    (".djvu", Naked),
    (".cbr", Naked),
    (".cbz", Naked),
    (".cb7", Naked),
    (".cbt", Naked),
    (".cba", Naked),
    (".doc", Naked),
    (".docx", Naked),
    (".epub", Naked),
    (".mobi", Naked),
    (".pdb", Naked),
    (".fb2", Naked),
    (".xeb", Naked),
    (".ceb", Naked),
    (".ibooks", Naked),
    (".txt", Naked),
    // Media
    (".ogg", Naked),
    (".mp3", Naked),
    (".wav", Naked),
    (".mp4", Naked),
    (".avi", Naked),
    // Images
    (".png", Naked),
    (".jpg", Naked),
    (".gif", Naked),
    (".bmp", Naked),
    (".tga", Naked),
    // Game Maker assets
    (".gmez", Naked),
    (".gmz", Naked),
    (".yyz", Naked),
    (".yymp", Naked),
    // ROMs
    (".gb", Naked),
    (".gbc", Naked),
    (".sfc", Naked),
    (".smc", Naked),
    (".swc", Naked),
    (".gen", Naked),
    (".sg", Naked),
    (".smd", Naked),
    (".md", Naked),
    // Single-file HTML games
    (".html", Naked),
];

/// Looks up a lowercased, dot-prefixed extension in [`EXTENSION_TABLE`].
pub fn installer_for_ext(ext: &str) -> Option<InstallerType> {
    EXTENSION_TABLE
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, ty)| *ty)
}

/// Decides an installer type from file contents.
pub trait Sniffer: Send + Sync {
    fn sniff(&self, path: &Path) -> Result<InstallerType>;
}

/// [`Sniffer`] based on magic-number detection.
#[derive(Debug, Default, Clone, Copy)]
pub struct InferSniffer;

const SNIFF_LEN: usize = 8192;

impl Sniffer for InferSniffer {
    fn sniff(&self, path: &Path) -> Result<InstallerType> {
        let head = porter_aio::fs::read_head(path, SNIFF_LEN)?;
        let mime = infer::get(&head).map(|k| k.mime_type());
        let ty = match mime {
            Some(
                "application/zip"
                | "application/x-tar"
                | "application/gzip"
                | "application/x-bzip2"
                | "application/x-7z-compressed"
                | "application/x-xz"
                | "application/vnd.rar",
            ) => Archive,
            Some("application/x-ole-storage") => Msi,
            _ => Naked,
        };
        debug!(
            "Sniffed {} as {:?} -> {}",
            path.display(),
            mime.unwrap_or("unknown"),
            ty
        );
        Ok(ty)
    }
}

/// Extension table first, content sniffing for everything else.
pub fn classify(path: &Path, sniffer: &dyn Sniffer) -> Result<InstallerType> {
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()));
    if let Some(ty) = ext.as_deref().and_then(installer_for_ext) {
        debug!("Classified {} by extension as {}", path.display(), ty);
        return Ok(ty);
    }
    sniffer.sniff(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use porter_common::error::PorterError;
    use std::io::Write;
    use std::path::PathBuf;

    struct PanicSniffer;
    impl Sniffer for PanicSniffer {
        fn sniff(&self, path: &Path) -> Result<InstallerType> {
            Err(PorterError::Generic(format!(
                "unexpected sniff of {}",
                path.display()
            )))
        }
    }

    struct FixedSniffer(InstallerType);
    impl Sniffer for FixedSniffer {
        fn sniff(&self, _path: &Path) -> Result<InstallerType> {
            Ok(self.0)
        }
    }

    #[test]
    fn every_table_entry_classifies_without_sniffing() {
        for (ext, expected) in EXTENSION_TABLE {
            let path = PathBuf::from(format!("/downloads/thing{ext}"));
            assert_eq!(classify(&path, &PanicSniffer).unwrap(), *expected, "{ext}");
        }
    }

    #[test]
    fn extensions_are_case_insensitive() {
        assert_eq!(classify(Path::new("GAME.ZIP"), &PanicSniffer).unwrap(), Archive);
        assert_eq!(classify(Path::new("setup.MSI"), &PanicSniffer).unwrap(), Msi);
    }

    #[test]
    fn unknown_and_executable_extensions_fall_through_to_sniffing() {
        let sniffer = FixedSniffer(Archive);
        assert_eq!(classify(Path::new("data.xyz"), &sniffer).unwrap(), Archive);
        assert_eq!(classify(Path::new("setup.exe"), &sniffer).unwrap(), Archive);
        assert_eq!(classify(Path::new("noext"), &sniffer).unwrap(), Archive);
    }

    #[test]
    fn table_has_no_duplicates() {
        for (i, (ext, _)) in EXTENSION_TABLE.iter().enumerate() {
            assert!(
                EXTENSION_TABLE[i + 1..].iter().all(|(other, _)| other != ext),
                "{ext} listed twice"
            );
        }
    }

    #[test]
    fn infer_sniffer_spots_renamed_zips_and_plain_binaries() {
        let dir = tempfile::tempdir().unwrap();
        let zipped = dir.path().join("game.bin");
        {
            let mut zip = zip::ZipWriter::new(std::fs::File::create(&zipped).unwrap());
            zip.start_file("a.txt", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"hello").unwrap();
            zip.finish().unwrap();
        }
        assert_eq!(InferSniffer.sniff(&zipped).unwrap(), Archive);

        let plain = dir.path().join("game.bin2");
        std::fs::write(&plain, b"\x7fELF\x02\x01\x01\x00rest-of-header").unwrap();
        assert_eq!(InferSniffer.sniff(&plain).unwrap(), Naked);
    }
}
