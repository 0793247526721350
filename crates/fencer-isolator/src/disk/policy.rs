//! Mapping from quota policy to kernel quota limits.

use std::path::Path;

use fencer_common::config::QuotaPolicy;
use fencer_common::constants::ACTIVE_ENFORCEMENT_SLACK;
use fencer_common::error::Result;

use crate::backend::QuotaBackend;

/// Limits written to a project quota record, in bytes. Zero is unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    /// Soft limit.
    pub soft: u64,
    /// Hard limit.
    pub hard: u64,
}

/// Computes the limits for a grant of `quota` bytes under `policy`.
///
/// Active enforcement leaves slack above the soft limit so that usage can
/// be seen crossing it before the kernel starts failing writes.
#[must_use]
pub const fn limits_for(policy: QuotaPolicy, quota: u64) -> QuotaLimits {
    match policy {
        QuotaPolicy::Accounting => QuotaLimits { soft: 0, hard: 0 },
        QuotaPolicy::EnforcingPassive => QuotaLimits {
            soft: quota,
            hard: quota,
        },
        QuotaPolicy::EnforcingActive => QuotaLimits {
            soft: quota,
            hard: quota.saturating_add(ACTIVE_ENFORCEMENT_SLACK),
        },
    }
}

/// Applies `policy` for a grant of `quota` bytes to `project_id`.
///
/// # Errors
///
/// Returns an error if the quota record cannot be written.
pub fn apply_project_quota<B: QuotaBackend + ?Sized>(
    backend: &B,
    policy: QuotaPolicy,
    path: &Path,
    project_id: u32,
    quota: u64,
) -> Result<QuotaLimits> {
    let limits = limits_for(policy, quota);
    match policy {
        QuotaPolicy::Accounting => backend.clear_project_quota(path, project_id)?,
        QuotaPolicy::EnforcingPassive | QuotaPolicy::EnforcingActive => {
            backend.set_project_quota(path, project_id, limits.soft, limits.hard)?;
        }
    }
    Ok(limits)
}
