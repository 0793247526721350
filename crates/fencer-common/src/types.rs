//! Domain primitive types exchanged between the containerizer and isolators.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::interval::IntervalSet;
use crate::resources::{DiskSourceKind, Resources};

/// Unique identifier for a container, possibly nested under a parent.
///
/// IDs are issued by the containerizer; isolators only compare and hash them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId {
    value: String,
    parent: Option<Box<ContainerId>>,
}

impl ContainerId {
    /// Creates a top-level container ID.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            parent: None,
        }
    }

    /// Creates a container ID nested under `parent`.
    #[must_use]
    pub fn nested(parent: Self, value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            parent: Some(Box::new(parent)),
        }
    }

    /// Returns this container's own path segment.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns the parent container, if nested.
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.parent.as_deref()
    }

    /// Returns whether this container is nested under another.
    #[must_use]
    pub const fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    /// Returns the path segments from the outermost ancestor down to this ID.
    #[must_use]
    pub fn segments(&self) -> Vec<&str> {
        let mut segments = vec![self.value.as_str()];
        let mut current = self.parent();
        while let Some(id) = current {
            segments.push(id.value.as_str());
            current = id.parent();
        }
        segments.reverse();
        segments
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments().join("."))
    }
}

/// Configuration handed to an isolator's `prepare`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// The container's sandbox directory on the host.
    pub directory: PathBuf,
    /// Resources granted at launch.
    pub resources: Resources,
    /// User the container runs as, if any.
    pub user: Option<String>,
}

/// A container known to the containerizer at recovery time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerState {
    /// Container identifier.
    pub container_id: ContainerId,
    /// PID of the container's init process.
    pub pid: Option<u32>,
    /// The container's sandbox directory.
    pub directory: PathBuf,
}

/// Directives an isolator asks the launcher to apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLaunchInfo {
    /// Extra environment variables for the container process.
    pub environment: Vec<(String, String)>,
}

/// Which resource dimension a limitation was raised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LimitationReason {
    /// Disk usage exceeded the soft quota.
    Disk,
    /// The container listened on ports it was not granted.
    Ports,
}

impl fmt::Display for LimitationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disk => write!(f, "container-limitation-disk"),
            Self::Ports => write!(f, "container-limitation-ports"),
        }
    }
}

/// The offending resources carried by a limitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitedResource {
    /// Observed disk usage, in whole megabytes.
    Disk {
        /// Megabytes in use when the limit was found exceeded.
        megabytes: u64,
    },
    /// Listening ports outside the container's grant.
    Ports(IntervalSet<u16>),
}

/// A policy violation reported once through an isolator's `watch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLimitation {
    /// Resources that were exceeded.
    pub resource: LimitedResource,
    /// Human-readable description.
    pub message: String,
    /// Resource dimension the violation belongs to.
    pub reason: LimitationReason,
    /// When the violation was observed.
    pub observed_at: DateTime<Utc>,
}

impl ContainerLimitation {
    /// Builds a limitation stamped with the current time.
    #[must_use]
    pub fn new(resource: LimitedResource, message: impl Into<String>, reason: LimitationReason) -> Self {
        Self {
            resource,
            message: message.into(),
            reason,
            observed_at: Utc::now(),
        }
    }
}

/// Per-volume disk usage reported by the quota isolator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskStatistics {
    /// Persistent volume ID, if the disk is a persistent volume.
    pub persistence_id: Option<String>,
    /// Kind of the disk's backing source.
    pub source: Option<DiskSourceKind>,
    /// Granted size in bytes.
    pub limit_bytes: u64,
    /// Bytes in use, when known.
    pub used_bytes: Option<u64>,
}

/// Resource usage snapshot for one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatistics {
    /// Sandbox quota in bytes.
    pub disk_limit_bytes: Option<u64>,
    /// Sandbox bytes in use.
    pub disk_used_bytes: Option<u64>,
    /// Additional disks attached to the container.
    pub disk_statistics: Vec<DiskStatistics>,
}
