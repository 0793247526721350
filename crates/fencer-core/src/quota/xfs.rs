//! XFS project-ID and project-quota wrappers.
//!
//! Project IDs are read and written through the `FS_IOC_FSGETXATTR` /
//! `FS_IOC_FSSETXATTR` ioctls on a directory; quota records are managed
//! with `quotactl(2)` against the block device hosting the filesystem.

#![allow(unsafe_code)]

use std::ffi::CString;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use fencer_common::error::{FencerError, Result};

use super::{BasicBlocks, QuotaInfo};

/// Directory flag making new children inherit the project ID.
const FS_XFLAG_PROJINHERIT: u32 = 0x0000_0200;

const PRJQUOTA: libc::c_int = 2;
const Q_XGETQUOTA: libc::c_int = xqm_cmd(3);
const Q_XSETQLIM: libc::c_int = xqm_cmd(4);
const Q_XGETQSTAT: libc::c_int = xqm_cmd(5);

const FS_DQUOT_VERSION: i8 = 1;
const FS_PROJ_QUOTA: i8 = 2;
const FS_DQ_BSOFT: u16 = 1 << 2;
const FS_DQ_BHARD: u16 = 1 << 3;

const FS_QUOTA_PDQ_ACCT: u16 = 1 << 4;
const FS_QUOTA_PDQ_ENFD: u16 = 1 << 5;

const fn xqm_cmd(cmd: libc::c_int) -> libc::c_int {
    ((b'X' as libc::c_int) << 8) + cmd
}

const fn qcmd(cmd: libc::c_int, kind: libc::c_int) -> libc::c_int {
    (cmd << 8) | (kind & 0x00ff)
}

/// `struct fsxattr` from `<linux/fs.h>`.
#[repr(C)]
#[allow(dead_code)]
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct FsXattr {
    fsx_xflags: u32,
    fsx_extsize: u32,
    fsx_nextents: u32,
    fsx_projid: u32,
    fsx_cowextsize: u32,
    fsx_pad: [u8; 8],
}

/// `struct fs_disk_quota` from `<linux/dqblk_xfs.h>`.
#[repr(C)]
#[allow(dead_code)]
#[derive(Debug, Default, Clone, Copy)]
struct FsDiskQuota {
    d_version: i8,
    d_flags: i8,
    d_fieldmask: u16,
    d_id: u32,
    d_blk_hardlimit: u64,
    d_blk_softlimit: u64,
    d_ino_hardlimit: u64,
    d_ino_softlimit: u64,
    d_bcount: u64,
    d_icount: u64,
    d_itimer: i32,
    d_btimer: i32,
    d_iwarns: u16,
    d_bwarns: u16,
    d_itimer_hi: i8,
    d_btimer_hi: i8,
    d_rtbtimer_hi: i8,
    d_padding2: i8,
    d_rtb_hardlimit: u64,
    d_rtb_softlimit: u64,
    d_rtbcount: u64,
    d_rtbtimer: i32,
    d_rtbwarns: u16,
    d_padding3: i16,
    d_padding4: [u8; 8],
}

/// `struct fs_qfilestat` from `<linux/dqblk_xfs.h>`.
#[repr(C)]
#[allow(dead_code)]
#[derive(Debug, Default, Clone, Copy)]
struct FsQfilestat {
    qfs_ino: u64,
    qfs_nblks: u64,
    qfs_nextents: u32,
}

/// `struct fs_quota_stat` from `<linux/dqblk_xfs.h>`.
#[repr(C)]
#[allow(dead_code)]
#[derive(Debug, Default, Clone, Copy)]
struct FsQuotaStat {
    qs_version: i8,
    qs_flags: u16,
    qs_pad: i8,
    qs_uquota: FsQfilestat,
    qs_gquota: FsQfilestat,
    qs_incoredqs: u32,
    qs_btimelimit: i32,
    qs_itimelimit: i32,
    qs_rtbtimelimit: i32,
    qs_bwarnlimit: u16,
    qs_iwarnlimit: u16,
}

mod ioctl {
    use super::FsXattr;

    nix::ioctl_read!(fs_ioc_fsgetxattr, b'X', 31, FsXattr);
    nix::ioctl_write_ptr!(fs_ioc_fssetxattr, b'X', 32, FsXattr);
}

fn quota_error(path: &Path, project_id: u32, source: std::io::Error) -> FencerError {
    FencerError::Quota {
        path: path.to_path_buf(),
        project_id,
        source,
    }
}

fn open(path: &Path, project_id: u32) -> Result<File> {
    File::open(path).map_err(|e| quota_error(path, project_id, e))
}

fn get_xattr(file: &File, path: &Path) -> Result<FsXattr> {
    let mut attr = FsXattr::default();
    // SAFETY: `file` is an open descriptor for the lifetime of the call and
    // `attr` is a valid, writable `struct fsxattr`.
    unsafe { ioctl::fs_ioc_fsgetxattr(file.as_raw_fd(), &raw mut attr) }
        .map_err(|e| quota_error(path, 0, e.into()))?;
    Ok(attr)
}

fn set_xattr(file: &File, path: &Path, attr: &FsXattr) -> Result<()> {
    // SAFETY: `file` is an open descriptor for the lifetime of the call and
    // `attr` points to an initialized `struct fsxattr`.
    unsafe { ioctl::fs_ioc_fssetxattr(file.as_raw_fd(), attr) }
        .map_err(|e| quota_error(path, attr.fsx_projid, e.into()))?;
    Ok(())
}

/// Returns whether `path` lives on an XFS filesystem.
#[must_use]
pub fn is_path_xfs(path: &Path) -> bool {
    nix::sys::statfs::statfs(path)
        .is_ok_and(|stat| stat.filesystem_type() == nix::sys::statfs::XFS_SUPER_MAGIC)
}

/// Reads the project ID stamped on `path`; `None` if none is assigned.
///
/// # Errors
///
/// Returns an error if the path cannot be opened or the ioctl fails.
pub fn get_project_id(path: &Path) -> Result<Option<u32>> {
    let file = open(path, 0)?;
    let attr = get_xattr(&file, path)?;
    Ok((attr.fsx_projid != 0).then_some(attr.fsx_projid))
}

/// Stamps `project_id` onto `path`. Directories also get the inherit flag
/// so that new children are charged to the same project.
///
/// # Errors
///
/// Returns an error if the path cannot be opened or an ioctl fails.
pub fn set_project_id(path: &Path, project_id: u32) -> Result<()> {
    let file = open(path, project_id)?;
    let mut attr = get_xattr(&file, path)?;
    attr.fsx_projid = project_id;
    let is_dir = file
        .metadata()
        .map_err(|e| quota_error(path, project_id, e))?
        .is_dir();
    if is_dir {
        attr.fsx_xflags |= FS_XFLAG_PROJINHERIT;
    }
    set_xattr(&file, path, &attr)
}

/// Removes any project ID from `path`.
///
/// # Errors
///
/// Returns an error if the path cannot be opened or an ioctl fails.
pub fn clear_project_id(path: &Path) -> Result<()> {
    let file = open(path, 0)?;
    let mut attr = get_xattr(&file, path)?;
    attr.fsx_projid = 0;
    attr.fsx_xflags &= !FS_XFLAG_PROJINHERIT;
    set_xattr(&file, path, &attr)
}

/// Resolves the block device for quota calls. A path that already names a
/// block device is used as-is, which lets reclamation address the device
/// after the directory is gone.
fn quota_device(path: &Path) -> Result<PathBuf> {
    let is_block_device =
        std::fs::metadata(path).is_ok_and(|m| m.file_type().is_block_device());
    if is_block_device {
        Ok(path.to_path_buf())
    } else {
        super::device_for_path(path)
    }
}

fn device_cstring(device: &Path, project_id: u32) -> Result<CString> {
    CString::new(device.as_os_str().as_bytes()).map_err(|_| {
        quota_error(
            device,
            project_id,
            std::io::Error::from(std::io::ErrorKind::InvalidInput),
        )
    })
}

#[allow(clippy::cast_possible_wrap)]
fn quotactl(cmd: libc::c_int, device: &CString, id: u32, data: *mut libc::c_char) -> std::io::Result<()> {
    // SAFETY: `device` is a NUL-terminated string that outlives the call and
    // `data` points to a buffer of the structure `cmd` expects.
    let rc = unsafe { libc::quotactl(cmd, device.as_ptr(), id as libc::c_int, data) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Returns whether project quota accounting or enforcement is enabled on
/// the filesystem holding `path`.
///
/// # Errors
///
/// Returns an error if the device cannot be resolved or `quotactl` fails.
pub fn is_quota_enabled(path: &Path) -> Result<bool> {
    let device = quota_device(path)?;
    let cdev = device_cstring(&device, 0)?;
    let mut stat = FsQuotaStat::default();
    quotactl(
        qcmd(Q_XGETQSTAT, PRJQUOTA),
        &cdev,
        0,
        (&raw mut stat).cast(),
    )
    .map_err(|e| quota_error(&device, 0, e))?;
    Ok(stat.qs_flags & (FS_QUOTA_PDQ_ACCT | FS_QUOTA_PDQ_ENFD) != 0)
}

/// Reads the quota record of `project_id`; `None` if the filesystem has no
/// record for it.
///
/// # Errors
///
/// Returns an error if the device cannot be resolved or `quotactl` fails
/// for any reason other than a missing record.
pub fn get_project_quota(path: &Path, project_id: u32) -> Result<Option<QuotaInfo>> {
    let device = quota_device(path)?;
    let cdev = device_cstring(&device, project_id)?;
    let mut quota = FsDiskQuota::default();
    match quotactl(
        qcmd(Q_XGETQUOTA, PRJQUOTA),
        &cdev,
        project_id,
        (&raw mut quota).cast(),
    ) {
        Ok(()) => Ok(Some(QuotaInfo {
            soft_limit: BasicBlocks::new(quota.d_blk_softlimit).bytes(),
            hard_limit: BasicBlocks::new(quota.d_blk_hardlimit).bytes(),
            used: BasicBlocks::new(quota.d_bcount).bytes(),
        })),
        Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(None),
        Err(e) => Err(quota_error(&device, project_id, e)),
    }
}

/// Sets the block limits of `project_id`, in bytes. Zero means unlimited.
///
/// # Errors
///
/// Returns an error if the device cannot be resolved or `quotactl` fails.
pub fn set_project_quota(path: &Path, project_id: u32, soft_limit: u64, hard_limit: u64) -> Result<()> {
    let device = quota_device(path)?;
    let cdev = device_cstring(&device, project_id)?;
    let mut quota = FsDiskQuota {
        d_version: FS_DQUOT_VERSION,
        d_flags: FS_PROJ_QUOTA,
        d_fieldmask: FS_DQ_BSOFT | FS_DQ_BHARD,
        d_id: project_id,
        d_blk_softlimit: BasicBlocks::from_bytes(soft_limit).blocks(),
        d_blk_hardlimit: BasicBlocks::from_bytes(hard_limit).blocks(),
        ..FsDiskQuota::default()
    };
    quotactl(
        qcmd(Q_XSETQLIM, PRJQUOTA),
        &cdev,
        project_id,
        (&raw mut quota).cast(),
    )
    .map_err(|e| quota_error(&device, project_id, e))
}

/// Removes the limits of `project_id` while keeping usage accounting.
///
/// # Errors
///
/// Returns an error if the device cannot be resolved or `quotactl` fails.
pub fn clear_project_quota(path: &Path, project_id: u32) -> Result<()> {
    set_project_quota(path, project_id, 0, 0)
}
