//! Filesystem quota primitives.
//!
//! Project IDs group the files under a directory so the filesystem can
//! account and limit their combined usage. This module holds the
//! filesystem-independent pieces (units, validation, device lookup); the
//! XFS ioctl and `quotactl(2)` wrappers live in [`xfs`].

#[cfg(target_os = "linux")]
pub mod xfs;

#[cfg(not(target_os = "linux"))]
#[path = "unsupported.rs"]
pub mod xfs;

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use fencer_common::error::{FencerError, Result};
use fencer_common::interval::IntervalSet;
use serde::Serialize;

/// Kernel mount table of the calling process.
pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// Project IDs that may never be handed out.
pub const RESERVED_PROJECT_IDS: [u32; 1] = [0];

/// A project quota record, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuotaInfo {
    /// Soft limit; 0 means unlimited.
    pub soft_limit: u64,
    /// Hard limit; 0 means unlimited.
    pub hard_limit: u64,
    /// Bytes currently charged to the project.
    pub used: u64,
}

/// Quota operations are defined in 512-byte basic blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BasicBlocks(u64);

impl BasicBlocks {
    /// Size of one basic block in bytes.
    pub const SIZE: u64 = 512;

    /// Converts bytes to blocks, rounding up since a partial block costs a
    /// full block on disk.
    #[must_use]
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes.div_ceil(Self::SIZE))
    }

    /// Wraps a raw block count.
    #[must_use]
    pub const fn new(count: u64) -> Self {
        Self(count)
    }

    /// Number of blocks.
    #[must_use]
    pub const fn blocks(self) -> u64 {
        self.0
    }

    /// Size in bytes.
    #[must_use]
    pub const fn bytes(self) -> u64 {
        self.0.saturating_mul(Self::SIZE)
    }
}

/// Rejects project-ID ranges that include reserved IDs.
///
/// # Errors
///
/// Returns [`FencerError::Config`] if `range` is empty or contains a
/// reserved project ID.
pub fn validate_project_ids(range: &IntervalSet<u32>) -> Result<()> {
    if range.is_empty() {
        return Err(FencerError::Config {
            message: "project ID range is empty".into(),
        });
    }
    if let Some(id) = RESERVED_PROJECT_IDS.iter().find(|id| range.contains(**id)) {
        return Err(FencerError::Config {
            message: format!("project ID range {range} contains reserved project ID {id}"),
        });
    }
    Ok(())
}

/// Returns the block device backing the filesystem that holds `path`.
///
/// # Errors
///
/// Returns an error if `path` cannot be stat'ed, the mount table cannot be
/// read, or no mount matches the path's device.
pub fn device_for_path(path: &Path) -> Result<PathBuf> {
    let metadata = std::fs::metadata(path).map_err(|e| FencerError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let dev = metadata.dev();
    let (major, minor) = (nix::sys::stat::major(dev), nix::sys::stat::minor(dev));

    let table = Path::new(MOUNTINFO_PATH);
    let content = std::fs::read_to_string(table).map_err(|e| FencerError::Io {
        path: table.to_path_buf(),
        source: e,
    })?;

    device_from_mountinfo(&content, major, minor).ok_or_else(|| FencerError::Unsupported {
        message: format!(
            "no mount for device {major}:{minor} backing '{}'",
            path.display()
        ),
    })
}

/// Finds the mount source of device `major:minor` in a mountinfo table.
#[must_use]
pub fn device_from_mountinfo(content: &str, major: u64, minor: u64) -> Option<PathBuf> {
    let wanted = format!("{major}:{minor}");
    content.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        if fields.nth(2)? != wanted {
            return None;
        }
        // Optional fields end at a lone "-", followed by fstype and source.
        let mut rest = fields.skip_while(|f| *f != "-").skip(1);
        let _fstype = rest.next()?;
        rest.next().map(PathBuf::from)
    })
}

/// Returns the bytes in use on the filesystem holding `path`.
///
/// Used for mount disks, which are whole filesystems rather than
/// project-quota'd directories.
///
/// # Errors
///
/// Returns an error if `statvfs(2)` fails.
pub fn filesystem_used(path: &Path) -> Result<u64> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(|e| FencerError::Io {
        path: path.to_path_buf(),
        source: e.into(),
    })?;
    let used_blocks = u64::from(stat.blocks()).saturating_sub(u64::from(stat.blocks_free()));
    Ok(used_blocks.saturating_mul(u64::from(stat.fragment_size())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNTINFO: &str = "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw,errors=remount-ro
35 22 253:2 / /var/lib/fencer rw,noatime shared:20 master:3 - xfs /dev/mapper/data rw,prjquota
40 22 0:5 / /dev rw,nosuid - devtmpfs udev rw
";

    #[test]
    fn basic_blocks_round_up() {
        assert_eq!(BasicBlocks::from_bytes(0).blocks(), 0);
        assert_eq!(BasicBlocks::from_bytes(1).blocks(), 1);
        assert_eq!(BasicBlocks::from_bytes(512).blocks(), 1);
        assert_eq!(BasicBlocks::from_bytes(513).blocks(), 2);
        assert_eq!(BasicBlocks::new(2).bytes(), 1024);
    }

    #[test]
    fn reserved_project_id_is_rejected() {
        assert!(validate_project_ids(&IntervalSet::closed(0, 10)).is_err());
        assert!(validate_project_ids(&IntervalSet::closed(1, 10)).is_ok());
        assert!(validate_project_ids(&IntervalSet::new()).is_err());
    }

    #[test]
    fn mountinfo_lookup_handles_optional_fields() {
        assert_eq!(
            device_from_mountinfo(MOUNTINFO, 253, 2),
            Some(PathBuf::from("/dev/mapper/data"))
        );
        assert_eq!(
            device_from_mountinfo(MOUNTINFO, 8, 1),
            Some(PathBuf::from("/dev/sda1"))
        );
        assert_eq!(device_from_mountinfo(MOUNTINFO, 9, 9), None);
    }

    #[test]
    fn filesystem_used_on_tempdir() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(filesystem_used(dir.path()).is_ok());
    }
}
