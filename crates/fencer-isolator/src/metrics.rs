//! Project-ID gauges.
//!
//! The allocator updates these on every allocation and return; readers take
//! a lock-free snapshot without going through the isolator actor.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Gauge name for the size of the configured project-ID range.
pub const PROJECT_IDS_TOTAL: &str = "containerizer/disk/project_ids_total";

/// Gauge name for the number of unassigned project IDs.
pub const PROJECT_IDS_FREE: &str = "containerizer/disk/project_ids_free";

/// Total and free project-ID gauges.
#[derive(Debug, Default)]
pub struct ProjectIdMetrics {
    total: AtomicU64,
    free: AtomicU64,
}

/// Point-in-time copy of [`ProjectIdMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProjectIdGauges {
    /// Size of the configured range.
    pub total: u64,
    /// Unassigned IDs.
    pub free: u64,
}

impl ProjectIdMetrics {
    /// Sets both gauges to `total`.
    pub fn reset(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.free.store(total, Ordering::Relaxed);
    }

    /// Records one allocated ID.
    pub fn allocated(&self) {
        let _ = self
            .free
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |free| free.checked_sub(1));
    }

    /// Records one returned ID.
    pub fn returned(&self) {
        let _ = self.free.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads both gauges.
    #[must_use]
    pub fn snapshot(&self) -> ProjectIdGauges {
        ProjectIdGauges {
            total: self.total.load(Ordering::Relaxed),
            free: self.free.load(Ordering::Relaxed),
        }
    }
}

impl ProjectIdGauges {
    /// Gauges as `(name, value)` pairs.
    #[must_use]
    pub const fn named(&self) -> [(&'static str, u64); 2] {
        [(PROJECT_IDS_TOTAL, self.total), (PROJECT_IDS_FREE, self.free)]
    }
}
