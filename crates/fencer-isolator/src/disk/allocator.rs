//! Project-ID allocation.

use std::sync::Arc;

use fencer_common::error::{FencerError, Result};
use fencer_common::interval::IntervalSet;

use crate::metrics::ProjectIdMetrics;

/// Hands out project IDs from a fixed range, smallest free ID first.
///
/// Every ID in `total` but not in `free` is owned by a live record or
/// scheduled for reclamation.
#[derive(Debug)]
pub struct ProjectIdAllocator {
    total: IntervalSet<u32>,
    free: IntervalSet<u32>,
    metrics: Arc<ProjectIdMetrics>,
}

impl ProjectIdAllocator {
    /// Creates an allocator with the whole of `total` free.
    #[must_use]
    pub fn new(total: IntervalSet<u32>, metrics: Arc<ProjectIdMetrics>) -> Self {
        metrics.reset(total.size());
        tracing::info!(range = %total, "allocating project IDs");
        Self {
            free: total.clone(),
            total,
            metrics,
        }
    }

    /// Takes the smallest free ID.
    ///
    /// # Errors
    ///
    /// Returns [`FencerError::ProjectIdsExhausted`] when no ID is free.
    pub fn next(&mut self) -> Result<u32> {
        let id = self.free.lower_bound().ok_or(FencerError::ProjectIdsExhausted)?;
        self.free -= id;
        self.metrics.allocated();
        Ok(id)
    }

    /// Returns `id` to the free set if it is still inside the configured
    /// range. IDs from an older, wider range are dropped.
    ///
    /// Returns whether the ID became free.
    pub fn release(&mut self, id: u32) -> bool {
        if !self.total.contains(id) || self.free.contains(id) {
            return false;
        }
        self.free += id;
        self.metrics.returned();
        true
    }

    /// Marks `id` as in use because it was found stamped on disk.
    ///
    /// Returns whether the ID was free before.
    pub fn reserve(&mut self, id: u32) -> bool {
        if !self.free.contains(id) {
            return false;
        }
        self.free -= id;
        self.metrics.allocated();
        true
    }

    /// The configured range.
    #[must_use]
    pub const fn total(&self) -> &IntervalSet<u32> {
        &self.total
    }

    /// IDs currently free.
    #[must_use]
    pub const fn free(&self) -> &IntervalSet<u32> {
        &self.free
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(lo: u32, hi: u32) -> (ProjectIdAllocator, Arc<ProjectIdMetrics>) {
        let metrics = Arc::new(ProjectIdMetrics::default());
        (
            ProjectIdAllocator::new(IntervalSet::closed(lo, hi), Arc::clone(&metrics)),
            metrics,
        )
    }

    #[test]
    fn allocates_smallest_first_until_exhausted() {
        let (mut ids, metrics) = allocator(100, 102);
        let taken: Vec<u32> = (0..3).map(|_| ids.next().expect("id")).collect();
        assert_eq!(taken, vec![100, 101, 102]);
        assert!(matches!(ids.next(), Err(FencerError::ProjectIdsExhausted)));
        assert_eq!(metrics.snapshot().free, 0);
        assert_eq!(metrics.snapshot().total, 3);
    }

    #[test]
    fn released_id_is_reused_first() {
        let (mut ids, metrics) = allocator(100, 102);
        for _ in 0..3 {
            let _ = ids.next().expect("id");
        }
        assert!(ids.release(101));
        assert_eq!(metrics.snapshot().free, 1);
        assert_eq!(ids.next().expect("id"), 101);
    }

    #[test]
    fn out_of_range_release_is_ignored() {
        let (mut ids, metrics) = allocator(100, 102);
        assert!(!ids.release(7));
        assert!(!ids.release(100));
        assert_eq!(ids.free(), &IntervalSet::closed(100, 102));
        assert_eq!(metrics.snapshot().free, 3);
    }

    #[test]
    fn reserve_counts_only_free_ids() {
        let (mut ids, metrics) = allocator(100, 102);
        assert!(ids.reserve(101));
        assert!(!ids.reserve(101));
        assert!(!ids.reserve(5000));
        assert_eq!(metrics.snapshot().free, 2);
        assert_eq!(ids.next().expect("id"), 100);
        assert_eq!(ids.next().expect("id"), 102);
    }

    #[test]
    fn allocation_is_a_permutation_of_the_range() {
        let (mut ids, _) = allocator(1, 64);
        let mut taken = Vec::new();
        while let Ok(id) = ids.next() {
            taken.push(id);
        }
        assert_eq!(taken, (1..=64).collect::<Vec<_>>());
        assert!(ids.free().is_empty());
        assert_eq!(ids.total().size(), 64);
    }
}
