//! Directory scans used by recovery.

use std::path::{Path, PathBuf};

use fencer_common::constants::{self, RUNS_DIR};
use fencer_common::error::{FencerError, Result};

/// Lists the entries of `dir`, sorted. A missing directory is empty.
fn children(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(FencerError::Io {
                path: dir.to_path_buf(),
                source: e,
            });
        }
    };
    let mut paths = entries
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| FencerError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
    paths.sort();
    Ok(paths)
}

/// Returns whether `path` is a real directory, not a symlink to one.
fn is_plain_dir(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok_and(|m| m.is_dir())
}

/// Lists every container sandbox, i.e. `sandboxes/*/runs/*` under
/// `work_dir`, skipping symlinks such as `latest`.
///
/// # Errors
///
/// Returns an error if a directory exists but cannot be listed.
pub fn sandbox_dirs(work_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut sandboxes = Vec::new();
    for executor in children(&constants::sandbox_root(work_dir))? {
        if !is_plain_dir(&executor) {
            continue;
        }
        for run in children(&executor.join(RUNS_DIR))? {
            if is_plain_dir(&run) {
                sandboxes.push(run);
            }
        }
    }
    Ok(sandboxes)
}

/// Lists every persistent volume, i.e. `volumes/roles/*/*` under
/// `work_dir`.
///
/// # Errors
///
/// Returns an error if a directory exists but cannot be listed.
pub fn volume_dirs(work_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut volumes = Vec::new();
    for role in children(&constants::volume_roles_root(work_dir))? {
        if !is_plain_dir(&role) {
            continue;
        }
        volumes.extend(children(&role)?.into_iter().filter(|v| is_plain_dir(v)));
    }
    Ok(volumes)
}
