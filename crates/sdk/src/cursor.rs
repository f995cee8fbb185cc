//! Resume bookkeeping for interrupted scans.
//!
//! A [`ScanCursor`] remembers how far a scan has progressed. After a
//! retryable interruption, [`ScanCursor::recompute`] rewrites the caller's
//! row set and row limit so the next attempt asks only for rows that have not
//! been returned yet.

use std::ops::Bound;

use bigtable_types::{RowRange, RowSet};
use bytes::Bytes;

/// How a scan should continue after an interruption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumePlan {
    /// Reissue the read with the given scope.
    Resume {
        /// Remaining row limit; zero means unlimited.
        rows_limit: i64,
        /// Remaining keys and ranges.
        rows: RowSet,
    },
    /// Every requested row has been returned.
    Complete,
}

/// Progress of a scan across attempts.
#[derive(Debug, Clone, Default)]
pub struct ScanCursor {
    last_key_read: Option<Bytes>,
    rows_returned: i64,
}

impl ScanCursor {
    /// Creates a cursor for a scan that has returned nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a row handed to the caller.
    pub fn record(&mut self, key: &Bytes) {
        self.last_key_read = Some(key.clone());
        self.rows_returned += 1;
    }

    /// Returns the key of the last row handed to the caller.
    pub fn last_key_read(&self) -> Option<&Bytes> {
        self.last_key_read.as_ref()
    }

    /// Returns the number of rows handed to the caller across all attempts.
    pub fn rows_returned(&self) -> i64 {
        self.rows_returned
    }

    /// Computes the scope of the next attempt from the caller's original
    /// `rows_limit` and `rows`.
    ///
    /// Explicit keys at or before the last returned key are dropped. Ranges
    /// ending at or before it are dropped, and ranges reaching back past it
    /// restart just after it. A whole-table scan continues from just after
    /// the last key; a scan whose explicit keys and ranges are all used up
    /// is complete.
    pub fn recompute(&self, rows_limit: i64, rows: &RowSet) -> ResumePlan {
        let Some(last) = &self.last_key_read else {
            return ResumePlan::Resume { rows_limit, rows: rows.clone() };
        };

        let rows_limit = if rows_limit > 0 {
            let remaining = rows_limit - self.rows_returned;
            if remaining <= 0 {
                return ResumePlan::Complete;
            }
            remaining
        } else {
            rows_limit
        };

        if rows.is_full_table() {
            let rest = RowRange::new(Bound::Excluded(last.clone()), Bound::Unbounded);
            return ResumePlan::Resume { rows_limit, rows: RowSet::from_ranges([rest]) };
        }

        let remaining = RowSet {
            row_keys: rows.row_keys.iter().filter(|key| *key > last).cloned().collect(),
            row_ranges: rows.row_ranges.iter().filter_map(|range| range.remaining_after(last)).collect(),
        };

        if remaining.is_full_table() {
            ResumePlan::Complete
        } else {
            ResumePlan::Resume { rows_limit, rows: remaining }
        }
    }
}
