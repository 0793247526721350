//! Cgroup membership queries.
//!
//! The isolators never create or destroy cgroups; they only need to know
//! which processes currently belong to a container.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use fencer_common::error::{FencerError, Result};
use fencer_common::types::ContainerId;

/// File listing the processes of a cgroup, one PID per line.
pub const PROCS_FILE: &str = "cgroup.procs";

/// Returns the cgroup of a container relative to the hierarchy root.
///
/// Nested containers live below their ancestors:
/// `<root>/<outermost>/.../<id>`.
#[must_use]
pub fn container_cgroup(cgroups_root: &str, container_id: &ContainerId) -> PathBuf {
    container_id
        .segments()
        .into_iter()
        .fold(PathBuf::from(cgroups_root), |path, segment| path.join(segment))
}

/// Lists the processes in `cgroup` under `hierarchy`.
///
/// # Errors
///
/// Returns an error if the cgroup's process list cannot be read, e.g.
/// because the cgroup was already removed.
pub fn processes(hierarchy: &Path, cgroup: &Path) -> Result<BTreeSet<u32>> {
    let file = hierarchy.join(cgroup).join(PROCS_FILE);
    let content = std::fs::read_to_string(&file).map_err(|e| FencerError::Io {
        path: file.clone(),
        source: e,
    })?;
    parse_procs(&content).map_err(|message| FencerError::Parse {
        input: file.display().to_string(),
        message,
    })
}

/// Parses the content of a `cgroup.procs` file.
///
/// # Errors
///
/// Returns a description of the first line that is not a PID.
pub fn parse_procs(content: &str) -> std::result::Result<BTreeSet<u32>, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.parse::<u32>().map_err(|e| format!("bad PID '{line}': {e}")))
        .collect()
}
