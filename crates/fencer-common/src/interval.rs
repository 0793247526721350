//! Ordered sets of disjoint, closed integer ranges.
//!
//! [`IntervalSet`] backs both port grants and project-ID allocation. Ranges
//! are kept in a `BTreeMap` keyed by their lower bound; every mutation merges
//! overlapping and adjacent ranges so that no two stored ranges ever touch.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, RangeInclusive, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Unsigned integer types that can be stored in an [`IntervalSet`].
pub trait IntervalBound: Copy + Ord + fmt::Debug + fmt::Display {
    /// Smallest representable value.
    const MIN: Self;
    /// Largest representable value.
    const MAX: Self;

    /// Returns `self + 1`, or `None` on overflow.
    fn succ(self) -> Option<Self>;

    /// Returns `self - 1`, or `None` on underflow.
    fn pred(self) -> Option<Self>;

    /// Number of values in the closed range `lo..=hi`, saturating at `u64::MAX`.
    fn width(lo: Self, hi: Self) -> u64;
}

macro_rules! impl_interval_bound {
    ($($t:ty),*) => {
        $(
            impl IntervalBound for $t {
                const MIN: Self = <$t>::MIN;
                const MAX: Self = <$t>::MAX;

                fn succ(self) -> Option<Self> {
                    self.checked_add(1)
                }

                fn pred(self) -> Option<Self> {
                    self.checked_sub(1)
                }

                fn width(lo: Self, hi: Self) -> u64 {
                    u64::from(hi - lo).saturating_add(1)
                }
            }
        )*
    };
}

impl_interval_bound!(u16, u32, u64);

/// A set of values stored as disjoint, non-adjacent closed ranges.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<(T, T)>", into = "Vec<(T, T)>")]
pub struct IntervalSet<T: IntervalBound> {
    ranges: BTreeMap<T, T>,
}

impl<T: IntervalBound> IntervalSet<T> {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ranges: BTreeMap::new(),
        }
    }

    /// Creates a set holding the closed range `lo..=hi`.
    ///
    /// An inverted range (`lo > hi`) yields an empty set.
    #[must_use]
    pub fn closed(lo: T, hi: T) -> Self {
        let mut set = Self::new();
        set.insert_range(lo, hi);
        set
    }

    /// Adds the closed range `lo..=hi`, merging with any range it overlaps
    /// or touches. Inverted ranges are ignored.
    pub fn insert_range(&mut self, lo: T, hi: T) {
        if lo > hi {
            return;
        }

        let upper = hi.succ().unwrap_or(T::MAX);
        let merged: Vec<(T, T)> = self
            .ranges
            .range(..=upper)
            .rev()
            .take_while(|(_, end)| end.succ().is_none_or(|next| next >= lo))
            .map(|(start, end)| (*start, *end))
            .collect();

        let mut new_lo = lo;
        let mut new_hi = hi;
        for (start, end) in merged {
            let _ = self.ranges.remove(&start);
            new_lo = new_lo.min(start);
            new_hi = new_hi.max(end);
        }
        let _ = self.ranges.insert(new_lo, new_hi);
    }

    /// Adds a single value.
    pub fn insert(&mut self, value: T) {
        self.insert_range(value, value);
    }

    /// Removes the closed range `lo..=hi`, splitting stored ranges that
    /// straddle either bound.
    pub fn remove_range(&mut self, lo: T, hi: T) {
        if lo > hi {
            return;
        }

        let overlapping: Vec<(T, T)> = self
            .ranges
            .range(..=hi)
            .rev()
            .take_while(|(_, end)| **end >= lo)
            .map(|(start, end)| (*start, *end))
            .collect();

        for (start, end) in overlapping {
            let _ = self.ranges.remove(&start);
            if start < lo {
                if let Some(before) = lo.pred() {
                    let _ = self.ranges.insert(start, before);
                }
            }
            if end > hi {
                if let Some(after) = hi.succ() {
                    let _ = self.ranges.insert(after, end);
                }
            }
        }
    }

    /// Removes a single value.
    pub fn remove(&mut self, value: T) {
        self.remove_range(value, value);
    }

    /// Returns whether `value` lies in some stored range.
    #[must_use]
    pub fn contains(&self, value: T) -> bool {
        self.ranges
            .range(..=value)
            .next_back()
            .is_some_and(|(_, end)| *end >= value)
    }

    /// Returns whether every value of `other` is also in `self`.
    #[must_use]
    pub fn contains_set(&self, other: &Self) -> bool {
        other.ranges.iter().all(|(lo, hi)| {
            self.ranges
                .range(..=*lo)
                .next_back()
                .is_some_and(|(_, end)| end >= hi)
        })
    }

    /// Returns whether the set holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of values in the set.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.ranges
            .iter()
            .fold(0u64, |acc, (lo, hi)| acc.saturating_add(T::width(*lo, *hi)))
    }

    /// Number of disjoint ranges stored.
    #[must_use]
    pub fn interval_count(&self) -> usize {
        self.ranges.len()
    }

    /// Smallest value in the set.
    #[must_use]
    pub fn lower_bound(&self) -> Option<T> {
        self.ranges.keys().next().copied()
    }

    /// Iterates the stored ranges in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = RangeInclusive<T>> + '_ {
        self.ranges.iter().map(|(lo, hi)| *lo..=*hi)
    }
}

impl<T: IntervalBound> Default for IntervalSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: IntervalBound> fmt::Display for IntervalSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (lo, hi)) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if lo == hi {
                write!(f, "{lo}")?;
            } else {
                write!(f, "{lo}-{hi}")?;
            }
        }
        write!(f, "]")
    }
}

impl<T: IntervalBound> fmt::Debug for IntervalSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IntervalSet{self}")
    }
}

impl<T: IntervalBound> From<RangeInclusive<T>> for IntervalSet<T> {
    fn from(range: RangeInclusive<T>) -> Self {
        Self::closed(*range.start(), *range.end())
    }
}

impl<T: IntervalBound> From<Vec<(T, T)>> for IntervalSet<T> {
    fn from(ranges: Vec<(T, T)>) -> Self {
        let mut set = Self::new();
        for (lo, hi) in ranges {
            set.insert_range(lo, hi);
        }
        set
    }
}

impl<T: IntervalBound> From<IntervalSet<T>> for Vec<(T, T)> {
    fn from(set: IntervalSet<T>) -> Self {
        set.ranges.into_iter().collect()
    }
}

impl<T: IntervalBound> FromIterator<T> for IntervalSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for value in iter {
            set.insert(value);
        }
        set
    }
}

impl<T: IntervalBound> AddAssign<T> for IntervalSet<T> {
    fn add_assign(&mut self, value: T) {
        self.insert(value);
    }
}

impl<T: IntervalBound> AddAssign<RangeInclusive<T>> for IntervalSet<T> {
    fn add_assign(&mut self, range: RangeInclusive<T>) {
        self.insert_range(*range.start(), *range.end());
    }
}

impl<T: IntervalBound> AddAssign<&Self> for IntervalSet<T> {
    fn add_assign(&mut self, other: &Self) {
        for (lo, hi) in &other.ranges {
            self.insert_range(*lo, *hi);
        }
    }
}

impl<T: IntervalBound> SubAssign<T> for IntervalSet<T> {
    fn sub_assign(&mut self, value: T) {
        self.remove(value);
    }
}

impl<T: IntervalBound> SubAssign<RangeInclusive<T>> for IntervalSet<T> {
    fn sub_assign(&mut self, range: RangeInclusive<T>) {
        self.remove_range(*range.start(), *range.end());
    }
}

impl<T: IntervalBound> SubAssign<&Self> for IntervalSet<T> {
    fn sub_assign(&mut self, other: &Self) {
        for (lo, hi) in &other.ranges {
            self.remove_range(*lo, *hi);
        }
    }
}

impl<T: IntervalBound> Add for &IntervalSet<T> {
    type Output = IntervalSet<T>;

    fn add(self, other: Self) -> IntervalSet<T> {
        let mut result = self.clone();
        result += other;
        result
    }
}

impl<T: IntervalBound> Sub for &IntervalSet<T> {
    type Output = IntervalSet<T>;

    fn sub(self, other: Self) -> IntervalSet<T> {
        let mut result = self.clone();
        result -= other;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(set: &IntervalSet<u16>) -> Vec<(u16, u16)> {
        set.iter().map(|r| (*r.start(), *r.end())).collect()
    }

    #[test]
    fn adjacent_ranges_are_merged() {
        let mut set = IntervalSet::closed(10u16, 20);
        set += 21..=30;
        set += 5..=9;
        assert_eq!(ranges(&set), vec![(5, 30)]);
    }

    #[test]
    fn insert_bridges_multiple_ranges() {
        let mut set: IntervalSet<u16> = [1, 3, 5, 7].into_iter().collect();
        assert_eq!(set.interval_count(), 4);
        set += 2..=6;
        assert_eq!(ranges(&set), vec![(1, 7)]);
    }

    #[test]
    fn remove_splits_range() {
        let mut set = IntervalSet::closed(100u32, 110);
        set -= 105;
        assert!(!set.contains(105));
        assert!(set.contains(104));
        assert!(set.contains(106));
        assert_eq!(set.interval_count(), 2);
        assert_eq!(set.size(), 10);
    }

    #[test]
    fn remove_spanning_range_clears_middle() {
        let mut set: IntervalSet<u16> = IntervalSet::from(vec![(1, 5), (10, 15), (20, 25)]);
        set -= 3..=22;
        assert_eq!(ranges(&set), vec![(1, 2), (23, 25)]);
    }

    #[test]
    fn bounds_at_type_limits() {
        let mut set = IntervalSet::closed(u16::MAX - 1, u16::MAX);
        set += 0..=0;
        assert!(set.contains(u16::MAX));
        assert!(set.contains(0));
        set -= u16::MAX;
        assert!(!set.contains(u16::MAX));
        assert_eq!(set.size(), 2);
    }

    #[test]
    fn full_u64_range_size_saturates() {
        let set = IntervalSet::closed(0u64, u64::MAX);
        assert_eq!(set.size(), u64::MAX);
    }

    #[test]
    fn union_then_difference_is_subset_of_original() {
        let a: IntervalSet<u16> = IntervalSet::from(vec![(1, 10), (40, 50)]);
        let b: IntervalSet<u16> = IntervalSet::from(vec![(5, 20), (45, 60)]);
        let result = &(&a + &b) - &b;
        assert!(a.contains_set(&result));
        assert_eq!(ranges(&result), vec![(1, 4), (40, 44)]);
    }

    #[test]
    fn contains_set_detects_partial_overlap() {
        let grant = IntervalSet::closed(8080u16, 8081);
        let observed: IntervalSet<u16> = [8080, 9090].into_iter().collect();
        assert!(!grant.contains_set(&observed));
        assert_eq!(ranges(&(&observed - &grant)), vec![(9090, 9090)]);
        assert!(grant.contains_set(&IntervalSet::closed(8080, 8080)));
        assert!(grant.contains_set(&IntervalSet::new()));
    }

    #[test]
    fn lower_bound_is_smallest_value() {
        let set: IntervalSet<u32> = IntervalSet::from(vec![(300, 400), (100, 102)]);
        assert_eq!(set.lower_bound(), Some(100));
        assert_eq!(IntervalSet::<u32>::new().lower_bound(), None);
    }

    #[test]
    fn inverted_range_is_ignored() {
        let set = IntervalSet::closed(10u16, 5);
        assert!(set.is_empty());
    }

    #[test]
    fn display_lists_ranges() {
        let set: IntervalSet<u16> = IntervalSet::from(vec![(8080, 8081), (9090, 9090)]);
        assert_eq!(set.to_string(), "[8080-8081, 9090]");
        assert_eq!(IntervalSet::<u16>::new().to_string(), "[]");
        assert_eq!(
            crate::range::parse_u16_ranges(&set.to_string()).expect("parse"),
            set
        );
    }

    #[test]
    fn serde_normalizes_overlapping_input() {
        let set: IntervalSet<u16> = serde_json::from_str("[[1,5],[4,9]]").expect("decode");
        assert_eq!(ranges(&set), vec![(1, 9)]);
        assert_eq!(serde_json::to_string(&set).expect("encode"), "[[1,9]]");
    }

    #[test]
    fn no_adjacent_ranges_after_mixed_mutation() {
        let mut set = IntervalSet::new();
        for v in [9u16, 1, 5, 3, 7, 2, 8, 4, 6] {
            set += v;
        }
        set -= 5;
        set += 5;
        let stored = ranges(&set);
        for pair in stored.windows(2) {
            assert!(pair[0].1.saturating_add(1) < pair[1].0);
        }
        assert_eq!(stored, vec![(1, 9)]);
    }
}
