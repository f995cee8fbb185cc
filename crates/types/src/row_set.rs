//! Row sets: the explicit keys and key ranges a read covers.

use std::ops::Bound;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A contiguous range of row keys.
///
/// `Included` is a closed bound, `Excluded` an open one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRange {
    /// Lower bound.
    pub start: Bound<Bytes>,
    /// Upper bound.
    pub end: Bound<Bytes>,
}

impl RowRange {
    /// Creates a range from explicit bounds.
    pub fn new(start: Bound<Bytes>, end: Bound<Bytes>) -> Self {
        Self { start, end }
    }

    /// Creates the range covering every row key.
    pub fn all() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    /// `[start, end]`
    pub fn closed(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self::new(Bound::Included(start.into()), Bound::Included(end.into()))
    }

    /// `[start, end)`
    pub fn closed_open(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self::new(Bound::Included(start.into()), Bound::Excluded(end.into()))
    }

    /// `(start, end)`
    pub fn open(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self::new(Bound::Excluded(start.into()), Bound::Excluded(end.into()))
    }

    /// `(start, end]`
    pub fn open_closed(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self::new(Bound::Excluded(start.into()), Bound::Included(end.into()))
    }

    /// `[start, ∞)`
    pub fn starting_at(start: impl Into<Bytes>) -> Self {
        Self::new(Bound::Included(start.into()), Bound::Unbounded)
    }

    /// `(start, ∞)`
    pub fn starting_after(start: impl Into<Bytes>) -> Self {
        Self::new(Bound::Excluded(start.into()), Bound::Unbounded)
    }

    /// Every key sharing `prefix`.
    pub fn prefix(prefix: impl Into<Bytes>) -> Self {
        let prefix = prefix.into();
        let end = match prefix_successor(&prefix) {
            Some(successor) => Bound::Excluded(successor),
            None => Bound::Unbounded,
        };
        Self::new(Bound::Included(prefix), end)
    }

    /// Returns true if `key` falls inside the range.
    pub fn contains(&self, key: &[u8]) -> bool {
        let above_start = match &self.start {
            Bound::Unbounded => true,
            Bound::Included(start) => key >= start.as_ref(),
            Bound::Excluded(start) => key > start.as_ref(),
        };
        let below_end = match &self.end {
            Bound::Unbounded => true,
            Bound::Included(end) => key <= end.as_ref(),
            Bound::Excluded(end) => key < end.as_ref(),
        };
        above_start && below_end
    }

    /// Returns the part of the range strictly after `key`.
    ///
    /// Returns `None` when every key of the range is at or before `key`.
    /// A range whose lower bound is at or before `key` comes back with its
    /// lower bound rewritten to `Excluded(key)`; a range entirely after
    /// `key` comes back unchanged.
    pub fn remaining_after(&self, key: &Bytes) -> Option<RowRange> {
        let exhausted = match &self.end {
            Bound::Unbounded => false,
            Bound::Included(end) | Bound::Excluded(end) => end.as_ref() <= key.as_ref(),
        };
        if exhausted {
            return None;
        }

        let starts_at_or_before = match &self.start {
            Bound::Unbounded => true,
            Bound::Included(start) | Bound::Excluded(start) => start.as_ref() <= key.as_ref(),
        };
        if starts_at_or_before {
            Some(RowRange::new(Bound::Excluded(key.clone()), self.end.clone()))
        } else {
            Some(self.clone())
        }
    }
}

/// Smallest key greater than every key starting with `prefix`, if one exists.
fn prefix_successor(prefix: &[u8]) -> Option<Bytes> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(Bytes::from(end));
        }
    }
    None
}

/// The keys and ranges a read covers. An empty set covers the whole table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSet {
    /// Explicit row keys.
    pub row_keys: Vec<Bytes>,
    /// Key ranges.
    pub row_ranges: Vec<RowRange>,
}

impl RowSet {
    /// Creates an empty row set (the whole table).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a row set of explicit keys.
    pub fn from_keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        Self { row_keys: keys.into_iter().map(Into::into).collect(), row_ranges: Vec::new() }
    }

    /// Creates a row set of ranges.
    pub fn from_ranges(ranges: impl IntoIterator<Item = RowRange>) -> Self {
        Self { row_keys: Vec::new(), row_ranges: ranges.into_iter().collect() }
    }

    /// Adds an explicit key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.row_keys.push(key.into());
        self
    }

    /// Adds a range.
    #[must_use]
    pub fn with_range(mut self, range: RowRange) -> Self {
        self.row_ranges.push(range);
        self
    }

    /// Returns true if the set names no keys and no ranges, meaning the whole table.
    pub fn is_full_table(&self) -> bool {
        self.row_keys.is_empty() && self.row_ranges.is_empty()
    }

    /// Returns true if `key` is covered by the set.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.is_full_table()
            || self.row_keys.iter().any(|k| k.as_ref() == key)
            || self.row_ranges.iter().any(|range| range.contains(key))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn key(k: &'static str) -> Bytes {
        Bytes::from_static(k.as_bytes())
    }

    #[test]
    fn test_contains_respects_bound_kinds() {
        let range = RowRange::open_closed("b", "d");
        assert!(!range.contains(b"b"));
        assert!(range.contains(b"c"));
        assert!(range.contains(b"d"));
        assert!(!range.contains(b"e"));

        let range = RowRange::closed_open("b", "d");
        assert!(range.contains(b"b"));
        assert!(!range.contains(b"d"));

        assert!(RowRange::all().contains(b""));
    }

    #[test]
    fn test_remaining_after_rewrites_lower_bound() {
        let range = RowRange::closed_open("a", "d");
        let rest = range.remaining_after(&key("b")).unwrap();
        assert_eq!(rest, RowRange::open("b", "d"));
    }

    #[test]
    fn test_remaining_after_keeps_later_range() {
        let range = RowRange::closed("e", "z");
        assert_eq!(range.remaining_after(&key("b")).unwrap(), range);
    }

    #[test]
    fn test_remaining_after_drops_consumed_range() {
        assert!(RowRange::closed("a", "b").remaining_after(&key("b")).is_none());
        assert!(RowRange::closed_open("a", "c").remaining_after(&key("c")).is_none());
        assert!(RowRange::closed("a", "b").remaining_after(&key("c")).is_none());
    }

    #[test]
    fn test_remaining_after_unbounded_range() {
        let rest = RowRange::all().remaining_after(&key("m")).unwrap();
        assert_eq!(rest, RowRange::starting_after("m"));
    }

    #[test]
    fn test_prefix_range() {
        let range = RowRange::prefix("user#");
        assert!(range.contains(b"user#1"));
        assert!(!range.contains(b"user$"));
        assert_eq!(range.end, Bound::Excluded(key("user$")));

        let all_ff = RowRange::prefix(Bytes::from_static(&[0xff, 0xff]));
        assert_eq!(all_ff.end, Bound::Unbounded);
    }

    #[test]
    fn test_row_set_contains() {
        assert!(RowSet::new().contains(b"anything"));

        let set = RowSet::from_keys(["a", "c"]).with_range(RowRange::closed("x", "z"));
        assert!(set.contains(b"a"));
        assert!(!set.contains(b"b"));
        assert!(set.contains(b"y"));
        assert!(!set.is_full_table());
    }
}
