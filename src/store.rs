//! Interval stores.
//!
//! An [`IntervalStore`] records, for each abstract object, the byte ranges
//! known to be *verified* at a program point: written or checked in the current
//! context since the last yield point, so another thread cannot have changed
//! them behind our back. Objects without an entry follow the store-wide
//! `all_others_clobbered` flag: fully verified while it is clear, fully
//! tentative once it is set.
//!
//! Stores are shared between control flow edges through `Rc` by the
//! [`FrameList`](crate::frames::FrameList) that owns them and are only copied
//! when a write is about to happen.

use crate::ir::Object;
use core::ops::Range;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// A set of byte offsets, kept as sorted, disjoint, non-adjacent half-open
/// ranges.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RangeSet {
    ranges: SmallVec<[Range<u64>; 2]>,
}

impl RangeSet {
    /// The empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Is the set empty?
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of maximal ranges in the set.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Iterate over the maximal ranges, in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        self.ranges.iter().cloned()
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// Add `range`, coalescing with overlapping and adjacent ranges.
    pub fn insert(&mut self, range: Range<u64>) {
        if range.start >= range.end {
            return;
        }
        // Ranges in `lo..hi` overlap or touch the new one.
        let lo = self.ranges.partition_point(|r| r.end < range.start);
        let hi = self.ranges.partition_point(|r| r.start <= range.end);
        let mut merged = range;
        if lo < hi {
            merged.start = merged.start.min(self.ranges[lo].start);
            merged.end = merged.end.max(self.ranges[hi - 1].end);
            self.ranges.drain(lo..hi);
        }
        self.ranges.insert(lo, merged);
    }

    /// Is every byte of `range` in the set? Empty ranges are always covered.
    pub fn covers(&self, range: Range<u64>) -> bool {
        if range.start >= range.end {
            return true;
        }
        let idx = self.ranges.partition_point(|r| r.end <= range.start);
        self.ranges
            .get(idx)
            .is_some_and(|r| r.start <= range.start && range.end <= r.end)
    }

    /// Is every byte of `other` in the set?
    pub fn covers_set(&self, other: &RangeSet) -> bool {
        other.iter().all(|r| self.covers(r))
    }

    /// The bytes in both sets.
    pub fn intersect(&self, other: &RangeSet) -> RangeSet {
        let mut result = RangeSet::new();
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let a = &self.ranges[i];
            let b = &other.ranges[j];
            let start = a.start.max(b.start);
            let end = a.end.min(b.end);
            if start < end {
                // Inputs are disjoint and non-adjacent, so the pieces are too.
                result.ranges.push(start..end);
            }
            if a.end < b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        result
    }
}

impl From<Range<u64>> for RangeSet {
    fn from(range: Range<u64>) -> Self {
        let mut set = RangeSet::new();
        set.insert(range);
        set
    }
}

/// Verified byte ranges per abstract object at one program point.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntervalStore {
    objects: FxHashMap<Object, RangeSet>,
    all_others_clobbered: bool,
}

impl IntervalStore {
    /// A store in which every object is verified.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store in which every object is tentative.
    pub fn clobbered() -> Self {
        Self {
            objects: FxHashMap::default(),
            all_others_clobbered: true,
        }
    }

    /// Are objects without an entry tentative?
    pub fn all_others_clobbered(&self) -> bool {
        self.all_others_clobbered
    }

    /// Number of objects with an explicit entry.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Does no object have an explicit entry?
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// The explicit verified ranges of `object`. `None` means the object
    /// follows [`all_others_clobbered`](Self::all_others_clobbered).
    pub fn get_readable(&self, object: Object) -> Option<&RangeSet> {
        self.objects.get(&object)
    }

    /// The explicit verified ranges of `object`, creating an empty entry if
    /// there is none. Creating the entry makes the whole object tentative.
    pub fn get_writable(&mut self, object: Object) -> &mut RangeSet {
        self.objects.entry(object).or_default()
    }

    /// A yield point was crossed: nothing is trusted any more.
    pub fn mark_clobbered_all(&mut self) {
        self.objects.clear();
        self.all_others_clobbered = true;
    }

    /// Make every byte of `object` tentative, leaving other objects alone.
    pub fn clobber_object(&mut self, object: Object) {
        self.get_writable(object).clear();
    }

    /// Record `range` of `object` as verified.
    pub fn add_verified(&mut self, object: Object, range: Range<u64>) {
        if range.start >= range.end {
            return;
        }
        match self.objects.get_mut(&object) {
            Some(ranges) => ranges.insert(range),
            // Without an entry and a clear flag the object is already verified.
            None if !self.all_others_clobbered => {}
            None => {
                self.objects.insert(object, RangeSet::from(range));
            }
        }
    }

    /// Are all `len` bytes of `object` from `offset` verified?
    pub fn is_range_verified(&self, object: Object, offset: u64, len: u64) -> bool {
        match self.objects.get(&object) {
            Some(ranges) => ranges.covers(offset..offset.saturating_add(len)),
            None => !self.all_others_clobbered,
        }
    }

    /// Merge `from` into `into` at a control flow join.
    ///
    /// A byte stays verified only if both stores verify it; the result
    /// clobbers unlisted objects if either input does.
    pub fn merge(from: &IntervalStore, into: &mut IntervalStore) {
        let clobbered = from.all_others_clobbered || into.all_others_clobbered;
        let mut objects = FxHashMap::default();
        let mut keep = |object: Object, ranges: RangeSet| {
            // Under a set flag a missing entry already means "nothing verified".
            if !(clobbered && ranges.is_empty()) {
                objects.insert(object, ranges);
            }
        };
        for (&object, ranges) in &into.objects {
            let merged = match from.objects.get(&object) {
                Some(other) => ranges.intersect(other),
                None if from.all_others_clobbered => RangeSet::new(),
                None => ranges.clone(),
            };
            keep(object, merged);
        }
        for (&object, ranges) in &from.objects {
            if into.objects.contains_key(&object) {
                continue;
            }
            let merged = if into.all_others_clobbered {
                RangeSet::new()
            } else {
                ranges.clone()
            };
            keep(object, merged);
        }
        into.objects = objects;
        into.all_others_clobbered = clobbered;
    }

    /// Does `self` verify every byte that `other` verifies?
    pub fn covers(&self, other: &IntervalStore) -> bool {
        if !other.all_others_clobbered {
            // `other` verifies every unlisted object in full; so must we.
            if self.all_others_clobbered {
                return false;
            }
            return self.objects.iter().all(|(object, ranges)| {
                other
                    .objects
                    .get(object)
                    .is_some_and(|theirs| ranges.covers_set(theirs))
            });
        }
        other.objects.iter().all(|(object, theirs)| {
            if theirs.is_empty() {
                return true;
            }
            match self.objects.get(object) {
                Some(ours) => ours.covers_set(theirs),
                None => !self.all_others_clobbered,
            }
        })
    }
}
