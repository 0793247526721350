//! System-wide constants, defaults, and on-disk layout.

use std::path::{Path, PathBuf};

/// Default work directory for sandboxes and persistent volumes.
pub const DEFAULT_WORK_DIR: &str = "/var/lib/fencer";

/// Cgroups v2 unified hierarchy mount point.
pub const CGROUP_V2_PATH: &str = "/sys/fs/cgroup";

/// Default cgroup under which container cgroups are created.
pub const DEFAULT_CGROUPS_ROOT: &str = "fencer";

/// Default project-ID range handed to the quota isolator.
pub const DEFAULT_PROJECT_RANGE: &str = "[5000-10000]";

/// Default interval between disk-usage checks, in seconds.
pub const DEFAULT_DISK_CHECK_SECS: u64 = 15;

/// Default interval between project-ID reclamation passes, in seconds.
pub const DEFAULT_PROJECT_RECLAIM_SECS: u64 = 60;

/// Default interval between listening-port checks, in seconds.
pub const DEFAULT_PORTS_CHECK_SECS: u64 = 30;

/// Bytes per megabyte in the resource model.
pub const MEGABYTE: u64 = 1024 * 1024;

/// Slack added above the soft limit under active enforcement.
pub const ACTIVE_ENFORCEMENT_SLACK: u64 = 10 * MEGABYTE;

/// Directory under the work dir that holds sandboxes.
pub const SANDBOXES_DIR: &str = "sandboxes";

/// Directory under an executor sandbox that holds container runs.
pub const RUNS_DIR: &str = "runs";

/// Convenience symlink to the most recent run.
pub const LATEST_SYMLINK: &str = "latest";

/// Directory under the work dir (or a disk source root) that holds volumes.
pub const VOLUMES_DIR: &str = "volumes";

/// Directory under the volumes dir that groups volumes by role.
pub const VOLUME_ROLES_DIR: &str = "roles";

/// Returns the root of all sandboxes.
#[must_use]
pub fn sandbox_root(work_dir: &Path) -> PathBuf {
    work_dir.join(SANDBOXES_DIR)
}

/// Returns the sandbox directory of one container run.
#[must_use]
pub fn sandbox_path(work_dir: &Path, executor: &str, container_id: &str) -> PathBuf {
    sandbox_root(work_dir)
        .join(executor)
        .join(RUNS_DIR)
        .join(container_id)
}

/// Returns the directory holding persistent volumes grouped by role.
#[must_use]
pub fn volume_roles_root(work_dir: &Path) -> PathBuf {
    work_dir.join(VOLUMES_DIR).join(VOLUME_ROLES_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_path_layout() {
        assert_eq!(
            sandbox_path(Path::new("/w"), "exec-1", "c1"),
            PathBuf::from("/w/sandboxes/exec-1/runs/c1")
        );
    }

    #[test]
    fn volume_roles_layout() {
        assert_eq!(
            volume_roles_root(Path::new("/w")),
            PathBuf::from("/w/volumes/roles")
        );
    }
}
