//! Scan module directories for loadable artifacts and scripts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::defaults;
use crate::loader::ModuleKind;

/// A module found on disk, not yet loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredModule {
    /// File stem, with the platform `lib` prefix kept.
    pub name: String,
    pub path: PathBuf,
    pub kind: ModuleKind,
}

/// List native artifacts under `modules_dir` and scripts under `scripts_dir`.
///
/// Only the top level of each directory is scanned. A missing or unreadable
/// directory contributes nothing. Results are sorted by kind, then name.
pub fn discover_modules(modules_dir: impl AsRef<Path>, scripts_dir: impl AsRef<Path>) -> Vec<DiscoveredModule> {
    let native_ext = std::env::consts::DLL_EXTENSION;
    let mut found = scan(modules_dir.as_ref(), native_ext, ModuleKind::Native);
    found.extend(scan(
        scripts_dir.as_ref(),
        defaults::SCRIPT_EXTENSION,
        ModuleKind::Script,
    ));
    found.sort_by(|a, b| {
        (a.kind == ModuleKind::Script, &a.name).cmp(&(b.kind == ModuleKind::Script, &b.name))
    });
    found
}

fn scan(dir: &Path, extension: &str, kind: ModuleKind) -> Vec<DiscoveredModule> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Skipping module directory");
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Unreadable directory entry");
                continue;
            }
        };
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
            found.push(DiscoveredModule {
                name: name.to_string(),
                path: path.clone(),
                kind,
            });
        }
    }
    found
}
