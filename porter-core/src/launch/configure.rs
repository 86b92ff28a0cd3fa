// Guesses what kind of program a launch target is.

use std::path::{Path, PathBuf};

use porter_common::error::{PorterError, Result};
use porter_common::model::{Flavor, LaunchCandidate};
use tracing::{debug, trace};

const HEAD_LEN: usize = 512;

pub trait Configurator: Send + Sync {
    /// Classifies `target`. For a folder, picks the best candidate inside it.
    fn configure(&self, target: &Path) -> Result<LaunchCandidate>;
}

/// Looks at the extension first, then at the file's leading bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicConfigurator;

impl Configurator for BasicConfigurator {
    fn configure(&self, target: &Path) -> Result<LaunchCandidate> {
        if target.is_dir() {
            return configure_dir(target);
        }
        let flavor = flavor_of(target)?;
        debug!("Configured {} as {:?}", target.display(), flavor);
        Ok(LaunchCandidate {
            path: target.to_path_buf(),
            flavor,
            pe_info: None,
        })
    }
}

fn configure_dir(dir: &Path) -> Result<LaunchCandidate> {
    if dir.extension().is_some_and(|ext| ext == "app") {
        return Ok(LaunchCandidate {
            path: dir.to_path_buf(),
            flavor: Flavor::NativeMacos,
            pe_info: None,
        });
    }

    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();

    let mut best: Option<(u8, LaunchCandidate)> = None;
    for path in entries {
        let flavor = if path.is_dir() {
            if path.extension().is_some_and(|ext| ext == "app") {
                Flavor::NativeMacos
            } else {
                continue;
            }
        } else {
            match flavor_of(&path) {
                Ok(f) => f,
                Err(e) => {
                    trace!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            }
        };
        let score = score(flavor);
        if score == 0 {
            continue;
        }
        if best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((
                score,
                LaunchCandidate {
                    path,
                    flavor,
                    pe_info: None,
                },
            ));
        }
    }

    best.map(|(_, c)| c).ok_or_else(|| {
        PorterError::NotFound(format!("no launch candidates in {}", dir.display()))
    })
}

fn score(flavor: Flavor) -> u8 {
    match flavor {
        Flavor::NativeWindows | Flavor::NativeLinux | Flavor::NativeMacos => 4,
        Flavor::Love | Flavor::Jar => 3,
        Flavor::Html => 2,
        Flavor::Script => 1,
        Flavor::Unknown => 0,
    }
}

pub fn flavor_of(path: &Path) -> Result<Flavor> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "love" => return Ok(Flavor::Love),
        "jar" => return Ok(Flavor::Jar),
        "html" | "htm" => return Ok(Flavor::Html),
        _ => {}
    }

    let head = porter_aio::fs::read_head(path, HEAD_LEN)?;
    Ok(flavor_of_bytes(&head))
}

pub fn flavor_of_bytes(head: &[u8]) -> Flavor {
    if head.starts_with(b"#!") {
        return Flavor::Script;
    }
    match infer::get(head).map(|k| k.mime_type()) {
        Some("application/vnd.microsoft.portable-executable") => Flavor::NativeWindows,
        Some("application/x-executable") => Flavor::NativeLinux,
        Some("application/x-mach-binary") => Flavor::NativeMacos,
        _ if head.starts_with(b"MZ") => Flavor::NativeWindows,
        _ => Flavor::Unknown,
    }
}
