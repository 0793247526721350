//! Host abstraction for the isolators.
//!
//! The isolators never touch the kernel directly; they go through these
//! traits so that the same actor code runs against the real host
//! ([`host`]) or an in-memory model ([`memory`]).

pub mod host;
pub mod memory;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use fencer_common::error::Result;
use fencer_common::types::ContainerId;
use fencer_core::net::SocketInfo;
use fencer_core::quota::QuotaInfo;

/// Project-ID and project-quota operations on a quota-capable filesystem.
pub trait QuotaBackend: Send + Sync + 'static {
    /// Reads the project ID stamped on `path`; `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the stamp cannot be read.
    fn get_project_id(&self, path: &Path) -> Result<Option<u32>>;

    /// Stamps `project_id` onto `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stamp cannot be written.
    fn set_project_id(&self, path: &Path, project_id: u32) -> Result<()>;

    /// Reads the quota record of `project_id` on the filesystem holding
    /// `path`, which may also name the block device itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read.
    fn get_project_quota(&self, path: &Path, project_id: u32) -> Result<Option<QuotaInfo>>;

    /// Sets soft and hard block limits, in bytes, for `project_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the limits cannot be set.
    fn set_project_quota(
        &self,
        path: &Path,
        project_id: u32,
        soft_limit: u64,
        hard_limit: u64,
    ) -> Result<()>;

    /// Removes the limits of `project_id`, keeping accounting.
    ///
    /// # Errors
    ///
    /// Returns an error if the limits cannot be cleared.
    fn clear_project_quota(&self, path: &Path, project_id: u32) -> Result<()>;

    /// Resolves the block device backing `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if no device can be found.
    fn device_for_path(&self, path: &Path) -> Result<PathBuf>;

    /// Bytes in use on the whole filesystem holding `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem cannot be queried.
    fn filesystem_used(&self, path: &Path) -> Result<u64>;

    /// Returns whether `path` lives on a filesystem supporting project
    /// quotas.
    fn is_quota_filesystem(&self, path: &Path) -> bool;

    /// Returns whether project quotas are enabled for `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the quota state cannot be queried.
    fn is_quota_enabled(&self, path: &Path) -> Result<bool>;

    /// Returns whether this process may manage quotas.
    fn has_quota_privilege(&self) -> bool {
        fencer_core::capability::is_privileged()
    }
}

/// Queries needed to attribute listening sockets to containers.
pub trait PortProbe: Send + Sync + 'static {
    /// Lists the host's listening sockets, keyed by inode.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket table cannot be read.
    fn listening_sockets(&self) -> Result<HashMap<u64, SocketInfo>>;

    /// Lists the processes in a container's cgroup.
    ///
    /// # Errors
    ///
    /// Returns an error if the cgroup cannot be read.
    fn cgroup_processes(&self, container_id: &ContainerId) -> Result<BTreeSet<u32>>;

    /// Lists the socket inodes held open by `pid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor table cannot be read.
    fn process_sockets(&self, pid: u32) -> Result<Vec<u64>>;

    /// Command line of `pid`, used only for logging.
    fn cmdline(&self, _pid: u32) -> Option<String> {
        None
    }
}
