//! Project quotas are only available on Linux.

use std::path::Path;

use fencer_common::error::{FencerError, Result};

use super::QuotaInfo;

fn unsupported<T>() -> Result<T> {
    Err(FencerError::Unsupported {
        message: "XFS project quotas require Linux".into(),
    })
}

/// Always `false` off Linux.
#[must_use]
pub const fn is_path_xfs(_path: &Path) -> bool {
    false
}

/// # Errors
///
/// Always returns [`FencerError::Unsupported`].
pub fn get_project_id(_path: &Path) -> Result<Option<u32>> {
    unsupported()
}

/// # Errors
///
/// Always returns [`FencerError::Unsupported`].
pub fn set_project_id(_path: &Path, _project_id: u32) -> Result<()> {
    unsupported()
}

/// # Errors
///
/// Always returns [`FencerError::Unsupported`].
pub fn clear_project_id(_path: &Path) -> Result<()> {
    unsupported()
}

/// # Errors
///
/// Always returns [`FencerError::Unsupported`].
pub fn is_quota_enabled(_path: &Path) -> Result<bool> {
    unsupported()
}

/// # Errors
///
/// Always returns [`FencerError::Unsupported`].
pub fn get_project_quota(_path: &Path, _project_id: u32) -> Result<Option<QuotaInfo>> {
    unsupported()
}

/// # Errors
///
/// Always returns [`FencerError::Unsupported`].
pub fn set_project_quota(
    _path: &Path,
    _project_id: u32,
    _soft_limit: u64,
    _hard_limit: u64,
) -> Result<()> {
    unsupported()
}

/// # Errors
///
/// Always returns [`FencerError::Unsupported`].
pub fn clear_project_quota(_path: &Path, _project_id: u32) -> Result<()> {
    unsupported()
}
