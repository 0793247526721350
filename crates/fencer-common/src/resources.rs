//! Resource grants as consumed by the isolators.
//!
//! This is the narrow slice of the containerizer's resource model the
//! isolators read: scalar disk (plain, persistent volume, or mount disk)
//! and port ranges.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{MEGABYTE, VOLUMES_DIR, VOLUME_ROLES_DIR};
use crate::interval::IntervalSet;

/// Backing-source type of a disk resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskSourceKind {
    /// A directory on some host filesystem, shareable between volumes.
    Path,
    /// A dedicated, never subdivided filesystem.
    Mount,
}

/// Where a disk resource physically lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSource {
    /// Source type.
    pub kind: DiskSourceKind,
    /// Root directory of the source on the host.
    pub root: PathBuf,
}

/// Identity of a persistent volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persistence {
    /// Persistent volume ID, unique per role.
    pub id: String,
}

/// Mount point of a volume inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Path relative to the container root.
    pub container_path: String,
}

/// Disk-specific attributes of a disk resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    /// Set when the disk is a persistent volume.
    pub persistence: Option<Persistence>,
    /// Set when the disk is mounted into the container.
    pub volume: Option<Volume>,
    /// Set when the disk has a non-default backing source.
    pub source: Option<DiskSource>,
}

impl DiskInfo {
    /// Returns whether this disk is a dedicated mount disk.
    #[must_use]
    pub fn is_mount_disk(&self) -> bool {
        self.source
            .as_ref()
            .is_some_and(|s| s.kind == DiskSourceKind::Mount)
    }
}

/// A scalar disk grant, in megabytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskResource {
    /// Size in megabytes.
    pub megabytes: f64,
    /// Role the disk is reserved for.
    #[serde(default = "default_role")]
    pub role: String,
    /// Disk attributes, absent for plain sandbox disk.
    #[serde(default)]
    pub disk: Option<DiskInfo>,
}

fn default_role() -> String {
    "*".to_string()
}

impl DiskResource {
    /// Plain sandbox disk of `megabytes` megabytes.
    #[must_use]
    pub fn scratch(megabytes: f64) -> Self {
        Self {
            megabytes,
            role: default_role(),
            disk: None,
        }
    }

    /// A persistent volume reserved for `role`.
    #[must_use]
    pub fn persistent_volume(megabytes: f64, role: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            megabytes,
            role: role.into(),
            disk: Some(DiskInfo {
                persistence: Some(Persistence { id: id.into() }),
                volume: Some(Volume {
                    container_path: "volume".to_string(),
                }),
                source: None,
            }),
        }
    }

    /// Attaches a backing source to this disk.
    #[must_use]
    pub fn with_source(mut self, kind: DiskSourceKind, root: impl Into<PathBuf>) -> Self {
        let info = self.disk.get_or_insert_with(DiskInfo::default);
        info.source = Some(DiskSource {
            kind,
            root: root.into(),
        });
        self
    }

    /// Returns whether this disk is a persistent volume.
    #[must_use]
    pub fn is_persistent_volume(&self) -> bool {
        self.disk.as_ref().is_some_and(|d| d.persistence.is_some())
    }

    /// Size of the grant in bytes.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn bytes(&self) -> u64 {
        (self.megabytes.max(0.0) * MEGABYTE as f64) as u64
    }

    /// Host path of a persistent volume, or `None` for non-volume disks.
    ///
    /// Mount disks live at their source root; path-backed volumes live
    /// under the source root; all others under `work_dir`.
    #[must_use]
    pub fn persistent_volume_path(&self, work_dir: &Path) -> Option<PathBuf> {
        let info = self.disk.as_ref()?;
        let persistence = info.persistence.as_ref()?;
        let base = match &info.source {
            Some(source) if source.kind == DiskSourceKind::Mount => return Some(source.root.clone()),
            Some(source) => source.root.as_path(),
            None => work_dir,
        };
        Some(
            base.join(VOLUMES_DIR)
                .join(VOLUME_ROLES_DIR)
                .join(&self.role)
                .join(&persistence.id),
        )
    }
}

/// The resources granted to a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    /// Disk grants.
    #[serde(default)]
    pub disks: Vec<DiskResource>,
    /// Port grant; `None` when the grant carries no ports at all.
    #[serde(default)]
    pub ports: Option<IntervalSet<u16>>,
}

impl Resources {
    /// Sum of all disk grants that are neither persistent volumes nor
    /// mounted volumes, in bytes. `None` if there are no such grants.
    #[must_use]
    pub fn disk_quota(&self) -> Option<u64> {
        self.disks
            .iter()
            .filter(|d| !d.is_persistent_volume())
            .filter(|d| d.disk.as_ref().is_none_or(|info| info.volume.is_none()))
            .map(DiskResource::bytes)
            .reduce(u64::saturating_add)
    }

    /// Iterates the persistent volumes in this grant.
    pub fn persistent_volumes(&self) -> impl Iterator<Item = &DiskResource> {
        self.disks.iter().filter(|d| d.is_persistent_volume())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_quota_sums_scratch_disks_only() {
        let resources = Resources {
            disks: vec![
                DiskResource::scratch(10.0),
                DiskResource::scratch(5.0),
                DiskResource::persistent_volume(100.0, "web", "vol1"),
            ],
            ports: None,
        };
        assert_eq!(resources.disk_quota(), Some(15 * MEGABYTE));
        assert_eq!(resources.persistent_volumes().count(), 1);
    }

    #[test]
    fn disk_quota_is_none_without_scratch_disk() {
        let resources = Resources {
            disks: vec![DiskResource::persistent_volume(1.0, "web", "v")],
            ports: None,
        };
        assert_eq!(resources.disk_quota(), None);
    }

    #[test]
    fn volume_path_defaults_to_work_dir() {
        let disk = DiskResource::persistent_volume(1.0, "web", "vol1");
        assert_eq!(
            disk.persistent_volume_path(Path::new("/var/lib/fencer")),
            Some(PathBuf::from("/var/lib/fencer/volumes/roles/web/vol1"))
        );
    }

    #[test]
    fn mount_disk_volume_lives_at_source_root() {
        let disk = DiskResource::persistent_volume(1.0, "web", "vol1")
            .with_source(DiskSourceKind::Mount, "/mnt/disk0");
        assert!(disk.disk.as_ref().is_some_and(DiskInfo::is_mount_disk));
        assert_eq!(
            disk.persistent_volume_path(Path::new("/var/lib/fencer")),
            Some(PathBuf::from("/mnt/disk0"))
        );
    }

    #[test]
    fn path_disk_volume_lives_under_source_root() {
        let disk = DiskResource::persistent_volume(1.0, "web", "vol1")
            .with_source(DiskSourceKind::Path, "/mnt/path0");
        assert_eq!(
            disk.persistent_volume_path(Path::new("/var/lib/fencer")),
            Some(PathBuf::from("/mnt/path0/volumes/roles/web/vol1"))
        );
    }

    #[test]
    fn scratch_disk_has_no_volume_path() {
        assert_eq!(
            DiskResource::scratch(1.0).persistent_volume_path(Path::new("/w")),
            None
        );
    }
}
