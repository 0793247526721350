//! State owned by the disk isolator actor.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use fencer_common::config::QuotaPolicy;
use fencer_common::constants::MEGABYTE;
use fencer_common::error::{FencerError, Result};
use fencer_common::resources::{DiskInfo, DiskResource, Resources};
use fencer_common::types::{
    ContainerConfig, ContainerId, ContainerLaunchInfo, ContainerLimitation, ContainerState,
    DiskStatistics, LimitationReason, LimitedResource, ResourceStatistics,
};
use serde::Serialize;

use super::allocator::ProjectIdAllocator;
use super::policy::apply_project_quota;
use super::scan;
use crate::backend::QuotaBackend;
use crate::signal::{LimitationSignal, LimitationWatch};

/// What is tracked for one path of a container.
#[derive(Debug, Clone)]
struct PathInfo {
    quota: u64,
    /// `None` for mount disks, which are never stamped.
    project_id: Option<u32>,
    /// `None` for the sandbox itself.
    disk: Option<DiskResource>,
}

#[derive(Debug)]
struct Info {
    directory: PathBuf,
    paths: HashMap<PathBuf, PathInfo>,
    limitation: LimitationSignal,
}

impl Info {
    fn new(directory: PathBuf, project_id: u32) -> Self {
        let sandbox = PathInfo {
            quota: 0,
            project_id: Some(project_id),
            disk: None,
        };
        Self {
            paths: HashMap::from([(directory.clone(), sandbox)]),
            directory,
            limitation: LimitationSignal::new(),
        }
    }

    fn sandbox_project_id(&self) -> Option<u32> {
        self.paths.get(&self.directory).and_then(|p| p.project_id)
    }
}

/// A project ID waiting for its directory to disappear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledProject {
    /// Block device holding the quota record.
    pub device: PathBuf,
    /// Directory the ID was stamped on.
    pub directory: PathBuf,
}

/// Read-only view of the isolator state.
#[derive(Debug, Clone, Serialize)]
pub struct DiskSnapshot {
    /// Containers with a record.
    pub containers: Vec<ContainerId>,
    /// Free project IDs.
    pub free_project_ids: Vec<(u32, u32)>,
    /// Project IDs awaiting reclamation.
    pub scheduled: BTreeMap<u32, ScheduledProject>,
}

/// The disk isolator's state machine, driven serially by its actor.
#[derive(Debug)]
pub struct DiskIsolatorProcess<B> {
    backend: B,
    policy: QuotaPolicy,
    work_dir: PathBuf,
    allocator: ProjectIdAllocator,
    infos: HashMap<ContainerId, Info>,
    scheduled: BTreeMap<u32, ScheduledProject>,
}

impl<B: QuotaBackend> DiskIsolatorProcess<B> {
    /// Creates an empty process.
    #[must_use]
    pub fn new(backend: B, policy: QuotaPolicy, work_dir: PathBuf, allocator: ProjectIdAllocator) -> Self {
        Self {
            backend,
            policy,
            work_dir,
            allocator,
            infos: HashMap::new(),
            scheduled: BTreeMap::new(),
        }
    }

    /// The policy fixed at construction.
    #[must_use]
    pub const fn policy(&self) -> QuotaPolicy {
        self.policy
    }

    /// Rebuilds records from project IDs stamped on disk.
    ///
    /// Returns the recovered containers that nobody owns; the caller is
    /// expected to clean them up.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be scanned, a stamp cannot be
    /// read, or two sandboxes map to the same container ID.
    pub fn recover(
        &mut self,
        states: &[ContainerState],
        orphans: &HashSet<ContainerId>,
    ) -> Result<Vec<ContainerId>> {
        let sandboxes = scan::sandbox_dirs(&self.work_dir)?;
        let volumes = scan::volume_dirs(&self.work_dir)?;
        let alive: HashSet<&ContainerId> = states.iter().map(|s| &s.container_id).collect();

        let mut unowned = Vec::new();
        for sandbox in sandboxes {
            let Some(name) = sandbox.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let container_id = ContainerId::new(name);

            let Some(project_id) = self.read_stamp(&sandbox)? else {
                tracing::debug!(path = %sandbox.display(), "sandbox has no project ID");
                continue;
            };
            if self.infos.contains_key(&container_id) {
                return Err(FencerError::DuplicateContainer {
                    id: container_id.to_string(),
                });
            }

            let _ = self.allocator.reserve(project_id);
            let _ = self
                .infos
                .insert(container_id.clone(), Info::new(sandbox, project_id));
            tracing::info!(container_id = %container_id, project_id, "recovered sandbox");

            if !orphans.contains(&container_id) && !alive.contains(&container_id) {
                unowned.push(container_id);
            }
        }

        for directory in volumes {
            let Some(project_id) = self.read_stamp(&directory)? else {
                continue;
            };
            let _ = self.allocator.reserve(project_id);
            self.schedule(project_id, &directory);
        }

        Ok(unowned)
    }

    fn read_stamp(&self, path: &Path) -> Result<Option<u32>> {
        self.backend
            .get_project_id(path)
            .map_err(|e| FencerError::Recovery {
                message: format!("failed to read project ID of '{}': {e}", path.display()),
            })
    }

    /// Assigns a project ID to a new container's sandbox and applies its
    /// initial grant.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is already known, no project ID
    /// is free, or the stamp or quota cannot be written.
    pub fn prepare(
        &mut self,
        container_id: &ContainerId,
        config: &ContainerConfig,
    ) -> Result<Option<ContainerLaunchInfo>> {
        if self.infos.contains_key(container_id) {
            return Err(FencerError::AlreadyPrepared {
                id: container_id.to_string(),
            });
        }

        let project_id = self.allocator.next()?;
        // Recorded before stamping so that cleanup can schedule it even if
        // the stamp fails.
        let _ = self.infos.insert(
            container_id.clone(),
            Info::new(config.directory.clone(), project_id),
        );
        self.backend.set_project_id(&config.directory, project_id)?;
        tracing::info!(
            container_id = %container_id,
            project_id,
            path = %config.directory.display(),
            "assigned project"
        );

        self.update(container_id, &config.resources)?;
        Ok(None)
    }

    /// Re-applies the sandbox quota and makes sure every attached
    /// persistent volume has a project ID and quota.
    ///
    /// # Errors
    ///
    /// Returns an error if a stamp or quota cannot be read or written, or
    /// a volume needs a project ID and none is free.
    pub fn update(&mut self, container_id: &ContainerId, resources: &Resources) -> Result<()> {
        let Some(info) = self.infos.get_mut(container_id) else {
            tracing::info!(container_id = %container_id, "ignoring update for unknown container");
            return Ok(());
        };

        match (resources.disk_quota(), info.sandbox_project_id()) {
            (Some(quota), Some(project_id)) => {
                let limits =
                    apply_project_quota(&self.backend, self.policy, &info.directory, project_id, quota)?;
                if let Some(sandbox) = info.paths.get_mut(&info.directory) {
                    sandbox.quota = quota;
                }
                tracing::info!(
                    container_id = %container_id,
                    project_id,
                    soft_limit = limits.soft,
                    hard_limit = limits.hard,
                    "set sandbox quota"
                );
            }
            (None, _) => {
                tracing::warn!(container_id = %container_id, "ignoring quota update with no disk resources");
            }
            (Some(_), None) => {}
        }

        for volume in resources.persistent_volumes() {
            let Some(directory) = volume.persistent_volume_path(&self.work_dir) else {
                continue;
            };
            let size = volume.bytes();

            if volume.disk.as_ref().is_some_and(DiskInfo::is_mount_disk) {
                let _ = info.paths.insert(
                    directory,
                    PathInfo {
                        quota: size,
                        project_id: None,
                        disk: Some(volume.clone()),
                    },
                );
                continue;
            }

            let project_id = match self.backend.get_project_id(&directory)? {
                Some(project_id) => {
                    let _ = self.allocator.reserve(project_id);
                    project_id
                }
                None => {
                    let project_id = self.allocator.next()?;
                    if let Err(e) = self.backend.set_project_id(&directory, project_id) {
                        let _ = self.allocator.release(project_id);
                        return Err(e);
                    }
                    tracing::info!(project_id, path = %directory.display(), "assigned project");
                    project_id
                }
            };

            // Recorded before the quota is applied so that cleanup schedules
            // the ID even if the quota cannot be written.
            let _ = info.paths.insert(
                directory.clone(),
                PathInfo {
                    quota: size,
                    project_id: Some(project_id),
                    disk: Some(volume.clone()),
                },
            );
            let limits = apply_project_quota(&self.backend, self.policy, &directory, project_id, size)?;
            tracing::info!(
                container_id = %container_id,
                project_id,
                soft_limit = limits.soft,
                hard_limit = limits.hard,
                "set volume quota"
            );
        }

        Ok(())
    }

    /// Returns a watch on the container's limitation; a never-resolving
    /// watch for unknown containers.
    #[must_use]
    pub fn watch(&self, container_id: &ContainerId) -> LimitationWatch {
        if let Some(info) = self.infos.get(container_id) {
            return info.limitation.subscribe();
        }
        tracing::warn!(container_id = %container_id, "ignoring watch for unknown container");
        LimitationWatch::pending()
    }

    /// Reports quota usage for the sandbox and each attached disk.
    ///
    /// # Errors
    ///
    /// Returns an error if a quota record or filesystem cannot be queried.
    pub fn usage(&self, container_id: &ContainerId) -> Result<ResourceStatistics> {
        let Some(info) = self.infos.get(container_id) else {
            tracing::info!(container_id = %container_id, "ignoring usage for unknown container");
            return Ok(ResourceStatistics::default());
        };

        let mut statistics = ResourceStatistics::default();
        if let Some(sandbox) = info.paths.get(&info.directory) {
            // The recorded quota is reported even under accounting, where
            // the kernel record carries no limit.
            statistics.disk_limit_bytes = Some(sandbox.quota);
            if let Some(project_id) = sandbox.project_id {
                statistics.disk_used_bytes = self
                    .backend
                    .get_project_quota(&info.directory, project_id)?
                    .map(|q| q.used);
            }
        }

        let mut disks: Vec<(&PathBuf, &PathInfo, &DiskResource)> = info
            .paths
            .iter()
            .filter_map(|(path, p)| p.disk.as_ref().map(|disk| (path, p, disk)))
            .collect();
        disks.sort_by(|a, b| a.0.cmp(b.0));

        for (path, path_info, disk) in disks {
            let details = disk.disk.as_ref();
            let used_bytes = if details.is_some_and(DiskInfo::is_mount_disk) {
                Some(self.backend.filesystem_used(path)?)
            } else if let Some(project_id) = path_info.project_id {
                self.backend
                    .get_project_quota(path, project_id)?
                    .map(|q| q.used)
            } else {
                None
            };
            statistics.disk_statistics.push(DiskStatistics {
                persistence_id: details
                    .and_then(|d| d.persistence.as_ref())
                    .map(|p| p.id.clone()),
                source: details.and_then(|d| d.source.as_ref()).map(|s| s.kind),
                limit_bytes: path_info.quota,
                used_bytes,
            });
        }

        Ok(statistics)
    }

    /// Drops the container's record and schedules its project IDs for
    /// reclamation once their directories are gone.
    pub fn cleanup(&mut self, container_id: &ContainerId) {
        let Some(info) = self.infos.remove(container_id) else {
            tracing::info!(container_id = %container_id, "ignoring cleanup for unknown container");
            return;
        };

        for (directory, path_info) in info.paths {
            if let Some(project_id) = path_info.project_id {
                self.schedule(project_id, &directory);
            }
        }
        tracing::debug!(container_id = %container_id, "cleaned up container");
    }

    /// Adds `project_id` to the reclamation set unless already present.
    /// Device lookup failures leak the ID, which keeps its quota.
    fn schedule(&mut self, project_id: u32, directory: &Path) {
        if self.scheduled.contains_key(&project_id) {
            return;
        }
        match self.backend.device_for_path(directory) {
            Ok(device) => {
                let _ = self.scheduled.insert(
                    project_id,
                    ScheduledProject {
                        device,
                        directory: directory.to_path_buf(),
                    },
                );
            }
            Err(e) => {
                tracing::error!(
                    project_id,
                    path = %directory.display(),
                    error = %e,
                    "unable to schedule project for reclamation"
                );
            }
        }
    }

    /// Raises a limitation for every container with a path over its soft
    /// limit. Only meaningful under active enforcement.
    pub fn check(&self) {
        for (container_id, info) in &self.infos {
            if info.limitation.is_resolved() {
                continue;
            }
            for (directory, path_info) in &info.paths {
                let Some(project_id) = path_info.project_id else {
                    continue;
                };
                let quota = match self.backend.get_project_quota(directory, project_id) {
                    Ok(Some(quota)) => quota,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(container_id = %container_id, error = %e, "failed to check disk usage");
                        continue;
                    }
                };
                if quota.soft_limit == 0 || quota.used <= quota.soft_limit {
                    continue;
                }

                let limitation = ContainerLimitation::new(
                    LimitedResource::Disk {
                        megabytes: quota.used / MEGABYTE,
                    },
                    format!(
                        "Disk usage ({} bytes) exceeds quota ({} bytes)",
                        quota.used, quota.soft_limit
                    ),
                    LimitationReason::Disk,
                );
                if info.limitation.set(limitation) {
                    tracing::warn!(
                        container_id = %container_id,
                        project_id,
                        used = quota.used,
                        soft_limit = quota.soft_limit,
                        "disk quota exceeded"
                    );
                }
                break;
            }
        }
    }

    /// Returns project IDs whose directories no longer exist.
    pub fn reclaim_project_ids(&mut self) {
        let gone: Vec<u32> = self
            .scheduled
            .iter()
            .filter(|(_, project)| !project.directory.exists())
            .map(|(id, _)| *id)
            .collect();

        for project_id in gone {
            let Some(project) = self.scheduled.remove(&project_id) else {
                continue;
            };
            if let Err(e) = self.backend.clear_project_quota(&project.device, project_id) {
                tracing::error!(
                    project_id,
                    path = %project.directory.display(),
                    error = %e,
                    "failed to clear quota"
                );
            }
            let _ = self.allocator.release(project_id);
            tracing::info!(project_id, path = %project.directory.display(), "reclaimed project ID");
        }
    }

    /// Captures the current state.
    #[must_use]
    pub fn snapshot(&self) -> DiskSnapshot {
        let mut containers: Vec<ContainerId> = self.infos.keys().cloned().collect();
        containers.sort();
        DiskSnapshot {
            containers,
            free_project_ids: self.allocator.free().clone().into(),
            scheduled: self.scheduled.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use fencer_common::constants;
    use fencer_common::interval::IntervalSet;
    use fencer_common::resources::DiskSourceKind;

    use super::*;
    use crate::backend::memory::MemoryQuota;
    use crate::metrics::ProjectIdMetrics;

    struct Fixture {
        work: tempfile::TempDir,
        backend: MemoryQuota,
        process: DiskIsolatorProcess<MemoryQuota>,
    }

    fn fixture(policy: QuotaPolicy) -> Fixture {
        let work = tempfile::tempdir().expect("tempdir");
        let backend = MemoryQuota::new();
        let allocator = ProjectIdAllocator::new(
            IntervalSet::closed(100, 102),
            Arc::new(ProjectIdMetrics::default()),
        );
        let process =
            DiskIsolatorProcess::new(backend.clone(), policy, work.path().to_path_buf(), allocator);
        Fixture {
            work,
            backend,
            process,
        }
    }

    fn sandbox(work: &Path, id: &str) -> PathBuf {
        let dir = constants::sandbox_path(work, "exec", id);
        fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    fn config(directory: PathBuf, megabytes: f64) -> ContainerConfig {
        ContainerConfig {
            directory,
            resources: Resources {
                disks: vec![DiskResource::scratch(megabytes)],
                ports: None,
            },
            user: None,
        }
    }

    #[test]
    fn prepare_stamps_sandbox_and_sets_quota() {
        let mut f = fixture(QuotaPolicy::EnforcingPassive);
        let dir = sandbox(f.work.path(), "c1");
        let id = ContainerId::new("c1");
        assert!(f.process.prepare(&id, &config(dir.clone(), 10.0)).expect("prepare").is_none());

        assert_eq!(f.backend.project_id(&dir), Some(100));
        let quota = f.backend.quota(100).expect("quota");
        assert_eq!((quota.soft_limit, quota.hard_limit), (10 * MEGABYTE, 10 * MEGABYTE));
    }

    #[test]
    fn double_prepare_fails_without_allocating() {
        let mut f = fixture(QuotaPolicy::Accounting);
        let dir = sandbox(f.work.path(), "c1");
        let id = ContainerId::new("c1");
        let _ = f.process.prepare(&id, &config(dir.clone(), 1.0)).expect("prepare");
        let before = f.process.snapshot().free_project_ids;
        assert!(matches!(
            f.process.prepare(&id, &config(dir, 1.0)),
            Err(FencerError::AlreadyPrepared { .. })
        ));
        assert_eq!(f.process.snapshot().free_project_ids, before);
    }

    #[test]
    fn prepare_fails_when_range_exhausted() {
        let mut f = fixture(QuotaPolicy::Accounting);
        for name in ["a", "b", "c"] {
            let dir = sandbox(f.work.path(), name);
            let _ = f.process.prepare(&ContainerId::new(name), &config(dir, 1.0)).expect("prepare");
        }
        let dir = sandbox(f.work.path(), "d");
        assert!(matches!(
            f.process.prepare(&ContainerId::new("d"), &config(dir, 1.0)),
            Err(FencerError::ProjectIdsExhausted)
        ));
    }

    #[test]
    fn volume_gets_its_own_project_and_quota() {
        let mut f = fixture(QuotaPolicy::EnforcingPassive);
        let dir = sandbox(f.work.path(), "c1");
        let id = ContainerId::new("c1");
        let mut cfg = config(dir, 10.0);
        cfg.resources
            .disks
            .push(DiskResource::persistent_volume(50.0, "web", "v1"));
        let volume = constants::volume_roles_root(f.work.path()).join("web/v1");
        fs::create_dir_all(&volume).expect("mkdir");

        let _ = f.process.prepare(&id, &cfg).expect("prepare");
        assert_eq!(f.backend.project_id(&volume), Some(101));
        assert_eq!(f.backend.quota(101).expect("quota").soft_limit, 50 * MEGABYTE);
        assert_eq!(f.backend.quota(100).expect("quota").soft_limit, 10 * MEGABYTE);
    }

    fn with_volume(directory: PathBuf, work: &Path) -> (ContainerConfig, PathBuf) {
        let mut cfg = config(directory, 1.0);
        cfg.resources
            .disks
            .push(DiskResource::persistent_volume(50.0, "web", "v1"));
        let volume = constants::volume_roles_root(work).join("web/v1");
        fs::create_dir_all(&volume).expect("mkdir");
        (cfg, volume)
    }

    #[test]
    fn failed_sandbox_stamp_is_still_reclaimed() {
        let mut f = fixture(QuotaPolicy::EnforcingPassive);
        let dir = sandbox(f.work.path(), "c1");
        let id = ContainerId::new("c1");
        f.backend.fail_writes(&dir);

        assert!(matches!(
            f.process.prepare(&id, &config(dir.clone(), 1.0)),
            Err(FencerError::Quota { project_id: 100, .. })
        ));
        assert_eq!(f.process.snapshot().containers, vec![id.clone()]);

        f.process.cleanup(&id);
        assert!(f.process.snapshot().scheduled.contains_key(&100));
        fs::remove_dir_all(&dir).expect("rm");
        f.process.reclaim_project_ids();
        assert_eq!(f.process.snapshot().free_project_ids, vec![(100, 102)]);
    }

    #[test]
    fn quota_write_error_fails_only_that_container() {
        let mut f = fixture(QuotaPolicy::EnforcingPassive);
        f.backend.fail_quota(100);
        let first = sandbox(f.work.path(), "c1");
        let second = sandbox(f.work.path(), "c2");

        assert!(f.process.prepare(&ContainerId::new("c1"), &config(first, 1.0)).is_err());
        let _ = f
            .process
            .prepare(&ContainerId::new("c2"), &config(second.clone(), 2.0))
            .expect("prepare");
        assert_eq!(f.backend.project_id(&second), Some(101));
        assert_eq!(f.backend.quota(101).expect("quota").soft_limit, 2 * MEGABYTE);
        assert_eq!(
            f.process.snapshot().containers,
            vec![ContainerId::new("c1"), ContainerId::new("c2")]
        );
    }

    #[test]
    fn failed_volume_stamp_returns_its_project_id() {
        let mut f = fixture(QuotaPolicy::EnforcingPassive);
        let dir = sandbox(f.work.path(), "c1");
        let id = ContainerId::new("c1");
        let (cfg, volume) = with_volume(dir, f.work.path());
        f.backend.fail_writes(&volume);

        assert!(f.process.prepare(&id, &cfg).is_err());
        assert_eq!(f.backend.project_id(&volume), None);
        assert_eq!(f.process.snapshot().free_project_ids, vec![(101, 102)]);

        f.process.cleanup(&id);
        let scheduled = f.process.snapshot().scheduled;
        assert_eq!(scheduled.keys().copied().collect::<Vec<_>>(), vec![100]);
    }

    #[test]
    fn failed_volume_quota_keeps_project_id_reclaimable() {
        let mut f = fixture(QuotaPolicy::EnforcingPassive);
        let dir = sandbox(f.work.path(), "c1");
        let id = ContainerId::new("c1");
        let (cfg, volume) = with_volume(dir.clone(), f.work.path());
        f.backend.fail_quota(101);

        assert!(matches!(
            f.process.prepare(&id, &cfg),
            Err(FencerError::Quota { project_id: 101, .. })
        ));
        assert_eq!(f.backend.project_id(&volume), Some(101));

        f.process.cleanup(&id);
        let scheduled = f.process.snapshot().scheduled;
        assert_eq!(scheduled.keys().copied().collect::<Vec<_>>(), vec![100, 101]);

        fs::remove_dir_all(&dir).expect("rm");
        fs::remove_dir_all(&volume).expect("rm");
        f.process.reclaim_project_ids();
        let snapshot = f.process.snapshot();
        assert!(snapshot.scheduled.is_empty());
        assert_eq!(snapshot.free_project_ids, vec![(100, 102)]);
    }

    #[test]
    fn mount_disk_is_tracked_but_not_stamped() {
        let mut f = fixture(QuotaPolicy::EnforcingPassive);
        let dir = sandbox(f.work.path(), "c1");
        let mount = f.work.path().join("mnt");
        fs::create_dir_all(&mount).expect("mkdir");
        let id = ContainerId::new("c1");
        let mut cfg = config(dir, 1.0);
        cfg.resources.disks.push(
            DiskResource::persistent_volume(20.0, "web", "m1")
                .with_source(DiskSourceKind::Mount, &mount),
        );

        let _ = f.process.prepare(&id, &cfg).expect("prepare");
        assert_eq!(f.backend.project_id(&mount), None);

        let usage = f.process.usage(&id).expect("usage");
        assert_eq!(usage.disk_limit_bytes, Some(MEGABYTE));
        assert_eq!(usage.disk_statistics.len(), 1);
        assert_eq!(usage.disk_statistics[0].source, Some(DiskSourceKind::Mount));
        assert_eq!(usage.disk_statistics[0].limit_bytes, 20 * MEGABYTE);
        assert!(usage.disk_statistics[0].used_bytes.is_some());
    }

    #[test]
    fn update_without_disk_keeps_sandbox_quota() {
        let mut f = fixture(QuotaPolicy::EnforcingPassive);
        let dir = sandbox(f.work.path(), "c1");
        let id = ContainerId::new("c1");
        let _ = f.process.prepare(&id, &config(dir, 10.0)).expect("prepare");
        f.process.update(&id, &Resources::default()).expect("update");
        assert_eq!(f.backend.quota(100).expect("quota").soft_limit, 10 * MEGABYTE);
        f.process.update(&ContainerId::new("nope"), &Resources::default()).expect("update");
    }

    #[test]
    fn active_check_resolves_once() {
        let mut f = fixture(QuotaPolicy::EnforcingActive);
        let dir = sandbox(f.work.path(), "c1");
        let id = ContainerId::new("c1");
        let _ = f.process.prepare(&id, &config(dir, 1.0)).expect("prepare");
        let watch = f.process.watch(&id);

        f.process.check();
        assert!(watch.peek().is_none());

        f.backend.set_used(100, 3 * MEGABYTE);
        f.process.check();
        let first = watch.peek().expect("limitation");
        assert_eq!(first.resource, LimitedResource::Disk { megabytes: 3 });
        assert_eq!(first.reason, LimitationReason::Disk);

        f.backend.set_used(100, 5 * MEGABYTE);
        f.process.check();
        assert_eq!(watch.peek(), Some(first));
    }

    #[test]
    fn cleanup_defers_reclamation_until_directory_is_gone() {
        let mut f = fixture(QuotaPolicy::EnforcingPassive);
        let dir = sandbox(f.work.path(), "c1");
        let id = ContainerId::new("c1");
        let _ = f.process.prepare(&id, &config(dir.clone(), 1.0)).expect("prepare");

        f.process.cleanup(&id);
        f.process.cleanup(&id);
        assert!(f.process.snapshot().containers.is_empty());
        assert!(f.process.snapshot().scheduled.contains_key(&100));

        f.process.reclaim_project_ids();
        assert!(f.process.snapshot().scheduled.contains_key(&100));

        fs::remove_dir_all(&dir).expect("rm");
        f.process.reclaim_project_ids();
        let snapshot = f.process.snapshot();
        assert!(snapshot.scheduled.is_empty());
        assert_eq!(snapshot.free_project_ids, vec![(100, 102)]);
        assert_eq!(f.backend.quota(100).expect("quota").hard_limit, 0);
    }

    #[test]
    fn cleanup_of_vanished_sandbox_leaks_project_id() {
        let mut f = fixture(QuotaPolicy::Accounting);
        let dir = sandbox(f.work.path(), "c1");
        let id = ContainerId::new("c1");
        let _ = f.process.prepare(&id, &config(dir.clone(), 1.0)).expect("prepare");
        fs::remove_dir_all(&dir).expect("rm");

        f.process.cleanup(&id);
        let snapshot = f.process.snapshot();
        assert!(snapshot.scheduled.is_empty());
        assert_eq!(snapshot.free_project_ids, vec![(101, 102)]);
    }

    #[test]
    fn recover_reserves_stamped_ids_and_reports_unowned() {
        let mut f = fixture(QuotaPolicy::Accounting);
        let owned = sandbox(f.work.path(), "owned");
        let orphan = sandbox(f.work.path(), "orphan");
        let stray = sandbox(f.work.path(), "stray");
        let _unstamped = sandbox(f.work.path(), "legacy");
        f.backend.stamp(&owned, 100);
        f.backend.stamp(&orphan, 101);
        f.backend.stamp(&stray, 102);

        let states = vec![ContainerState {
            container_id: ContainerId::new("owned"),
            pid: Some(1),
            directory: owned,
        }];
        let orphans = HashSet::from([ContainerId::new("orphan")]);
        let unowned = f.process.recover(&states, &orphans).expect("recover");

        assert_eq!(unowned, vec![ContainerId::new("stray")]);
        let snapshot = f.process.snapshot();
        assert_eq!(snapshot.containers.len(), 3);
        assert!(snapshot.free_project_ids.is_empty());
    }

    #[test]
    fn recover_fails_on_unreadable_stamp() {
        let mut f = fixture(QuotaPolicy::Accounting);
        let dir = sandbox(f.work.path(), "c1");
        f.backend.fail_reads(&dir);
        assert!(matches!(
            f.process.recover(&[], &HashSet::new()),
            Err(FencerError::Recovery { .. })
        ));
    }

    #[test]
    fn recover_rejects_colliding_container_ids() {
        let mut f = fixture(QuotaPolicy::Accounting);
        let first = constants::sandbox_path(f.work.path(), "exec-a", "same");
        let second = constants::sandbox_path(f.work.path(), "exec-b", "same");
        fs::create_dir_all(&first).expect("mkdir");
        fs::create_dir_all(&second).expect("mkdir");
        f.backend.stamp(&first, 100);
        f.backend.stamp(&second, 101);
        assert!(matches!(
            f.process.recover(&[], &HashSet::new()),
            Err(FencerError::DuplicateContainer { .. })
        ));
    }

    #[test]
    fn recover_schedules_stamped_volumes() {
        let mut f = fixture(QuotaPolicy::Accounting);
        let volume = constants::volume_roles_root(f.work.path()).join("web/v1");
        fs::create_dir_all(&volume).expect("mkdir");
        f.backend.stamp(&volume, 102);

        let _ = f.process.recover(&[], &HashSet::new()).expect("recover");
        let snapshot = f.process.snapshot();
        assert_eq!(snapshot.scheduled.get(&102).map(|p| &p.directory), Some(&volume));
        assert_eq!(snapshot.free_project_ids, vec![(100, 101)]);
    }

    #[test]
    fn watch_on_unknown_container_stays_pending() {
        let f = fixture(QuotaPolicy::EnforcingActive);
        assert!(f.process.watch(&ContainerId::new("ghost")).peek().is_none());
        assert_eq!(
            f.process.usage(&ContainerId::new("ghost")).expect("usage"),
            ResourceStatistics::default()
        );
    }
}
