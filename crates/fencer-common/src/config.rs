//! Isolator configuration model.
//!
//! Supplied once when the isolators are constructed and immutable
//! thereafter. Every field has a default so a partial YAML file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{FencerError, Result};
use crate::interval::IntervalSet;

/// Degree of kernel-level disk-limit enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuotaPolicy {
    /// Track usage only; no limit is set.
    Accounting,
    /// Hard limit equals the soft limit; the kernel blocks writes past it.
    EnforcingPassive,
    /// Hard limit sits above the soft limit; a periodic check raises a
    /// limitation once the soft limit is exceeded.
    EnforcingActive,
}

/// Root configuration for the isolators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FencerConfig {
    /// Work directory holding sandboxes and persistent volumes.
    pub work_dir: PathBuf,
    /// Mount point of the cgroup hierarchy used to enumerate processes.
    pub cgroups_hierarchy: PathBuf,
    /// Cgroup under which container cgroups live.
    pub cgroups_root: String,
    /// Project-ID range expression, e.g. `[5000-10000]`.
    pub project_range: String,
    /// Enforce disk quotas rather than only accounting for usage.
    pub enforce_container_disk_quota: bool,
    /// Raise a limitation (and so kill the container) once usage exceeds
    /// the quota. Requires `enforce_container_disk_quota`.
    pub kill_containers_on_disk_exceed: bool,
    /// Seconds between disk-usage checks under active enforcement.
    pub container_disk_watch_interval_secs: u64,
    /// Seconds between project-ID reclamation passes.
    pub disk_watch_interval_secs: u64,
    /// Seconds between listening-port checks.
    pub container_ports_watch_interval_secs: u64,
}

impl Default for FencerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(constants::DEFAULT_WORK_DIR),
            cgroups_hierarchy: PathBuf::from(constants::CGROUP_V2_PATH),
            cgroups_root: constants::DEFAULT_CGROUPS_ROOT.to_string(),
            project_range: constants::DEFAULT_PROJECT_RANGE.to_string(),
            enforce_container_disk_quota: false,
            kill_containers_on_disk_exceed: false,
            container_disk_watch_interval_secs: constants::DEFAULT_DISK_CHECK_SECS,
            disk_watch_interval_secs: constants::DEFAULT_PROJECT_RECLAIM_SECS,
            container_ports_watch_interval_secs: constants::DEFAULT_PORTS_CHECK_SECS,
        }
    }
}

impl FencerConfig {
    /// Loads a configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| FencerError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that deserialization alone cannot reject.
    ///
    /// # Errors
    ///
    /// Returns an error if any periodic interval is zero or the quota
    /// flags contradict each other.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("container_disk_watch_interval_secs", self.container_disk_watch_interval_secs),
            ("disk_watch_interval_secs", self.disk_watch_interval_secs),
            ("container_ports_watch_interval_secs", self.container_ports_watch_interval_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, secs)| *secs == 0) {
            return Err(FencerError::Config {
                message: format!("{name} must be greater than zero"),
            });
        }
        let _ = self.quota_policy()?;
        Ok(())
    }

    /// Derives the quota policy from the enforcement flags.
    ///
    /// # Errors
    ///
    /// Returns an error if killing is requested without enforcement.
    pub fn quota_policy(&self) -> Result<QuotaPolicy> {
        match (
            self.enforce_container_disk_quota,
            self.kill_containers_on_disk_exceed,
        ) {
            (false, false) => Ok(QuotaPolicy::Accounting),
            (false, true) => Err(FencerError::Config {
                message: "kill_containers_on_disk_exceed requires enforce_container_disk_quota"
                    .into(),
            }),
            (true, false) => Ok(QuotaPolicy::EnforcingPassive),
            (true, true) => Ok(QuotaPolicy::EnforcingActive),
        }
    }

    /// Parses the configured project-ID range.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression is malformed or out of range.
    pub fn project_ids(&self) -> Result<IntervalSet<u32>> {
        crate::range::parse_u32_ranges(&self.project_range)
    }

    /// Interval between disk-usage checks.
    #[must_use]
    pub const fn disk_check_interval(&self) -> Duration {
        Duration::from_secs(self.container_disk_watch_interval_secs)
    }

    /// Interval between project-ID reclamation passes.
    #[must_use]
    pub const fn project_reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.disk_watch_interval_secs)
    }

    /// Interval between listening-port checks.
    #[must_use]
    pub const fn ports_check_interval(&self) -> Duration {
        Duration::from_secs(self.container_ports_watch_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_are_accounting() {
        let config = FencerConfig::default();
        assert_eq!(config.quota_policy().expect("policy"), QuotaPolicy::Accounting);
        assert_eq!(config.project_ids().expect("range").size(), 5001);
    }

    #[test]
    fn policy_from_flags() {
        let mut config = FencerConfig {
            enforce_container_disk_quota: true,
            ..FencerConfig::default()
        };
        assert_eq!(config.quota_policy().expect("policy"), QuotaPolicy::EnforcingPassive);
        config.kill_containers_on_disk_exceed = true;
        assert_eq!(config.quota_policy().expect("policy"), QuotaPolicy::EnforcingActive);
        config.enforce_container_disk_quota = false;
        assert!(config.quota_policy().is_err());
    }

    #[test]
    fn load_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "work_dir: /srv/fencer\nproject_range: \"[100-102]\"").expect("write");
        let config = FencerConfig::load(file.path()).expect("load");
        assert_eq!(config.work_dir, PathBuf::from("/srv/fencer"));
        assert_eq!(config.project_ids().expect("range").size(), 3);
        assert_eq!(config.cgroups_root, constants::DEFAULT_CGROUPS_ROOT);
    }

    #[test]
    fn load_rejects_zero_interval() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "disk_watch_interval_secs: 0").expect("write");
        assert!(matches!(
            FencerConfig::load(file.path()),
            Err(FencerError::Config { .. })
        ));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        assert!(matches!(
            FencerConfig::load(Path::new("/nonexistent/fencer.yaml")),
            Err(FencerError::Io { .. })
        ));
    }
}
