//! Read filters.
//!
//! Filters are evaluated by the server; the client only builds and forwards
//! them. Composite filters (`chain`, `interleave`, `condition`) nest freely.
//!
//! ```
//! use bigtable_types::RowFilter;
//!
//! let filter = RowFilter::chain([
//!     RowFilter::family("cf1"),
//!     RowFilter::qualifier("field.*"),
//!     RowFilter::cells_per_column(1),
//! ]);
//! assert!(matches!(filter, RowFilter::Chain(ref parts) if parts.len() == 3));
//! ```

use std::ops::Bound;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::{
    error::{InvalidArgumentSnafu, Result},
    mutation::TimestampRange,
};

/// Range of column qualifiers within one family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRange {
    /// Column family the range applies to.
    pub family_name: String,
    /// Lower qualifier bound.
    pub start: Bound<Bytes>,
    /// Upper qualifier bound.
    pub end: Bound<Bytes>,
}

/// Range of cell values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    /// Lower value bound.
    pub start: Bound<Bytes>,
    /// Upper value bound.
    pub end: Bound<Bytes>,
}

/// Server-side filter applied to the cells of each row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowFilter {
    /// Applies each filter to the output of the previous one.
    Chain(Vec<RowFilter>),
    /// Applies every filter to the input and merges the outputs.
    Interleave(Vec<RowFilter>),
    /// Applies `true_filter` if `predicate` yields any cell, `false_filter` otherwise.
    Condition {
        /// Predicate filter.
        predicate: Box<RowFilter>,
        /// Filter applied when the predicate matches.
        true_filter: Option<Box<RowFilter>>,
        /// Filter applied when the predicate does not match.
        false_filter: Option<Box<RowFilter>>,
    },
    /// Matches every cell.
    PassAll,
    /// Matches no cell.
    BlockAll,
    /// Outputs the input directly, bypassing the rest of a chain.
    Sink,
    /// Replaces each value with the empty string.
    StripValue,
    /// Matches rows whose key matches the RE2 regex.
    RowKeyRegex(Bytes),
    /// Matches each row with the given probability.
    RowSample(f64),
    /// Matches cells whose family matches the RE2 regex.
    FamilyNameRegex(String),
    /// Matches cells whose qualifier matches the RE2 regex.
    ColumnQualifierRegex(Bytes),
    /// Matches cells whose value matches the RE2 regex.
    ValueRegex(Bytes),
    /// Applies a label to every output cell.
    ApplyLabel(String),
    /// Skips the first N cells of each row.
    CellsPerRowOffset(i32),
    /// Keeps only the first N cells of each row.
    CellsPerRowLimit(i32),
    /// Keeps only the N most recent cells of each column.
    CellsPerColumnLimit(i32),
    /// Matches cells within a timestamp range.
    TimestampRange(TimestampRange),
    /// Matches cells within a value range.
    ValueRange(ValueRange),
    /// Matches cells within a qualifier range of one family.
    ColumnRange(ColumnRange),
}

impl RowFilter {
    /// Chains filters in order.
    pub fn chain(filters: impl IntoIterator<Item = RowFilter>) -> Self {
        Self::Chain(filters.into_iter().collect())
    }

    /// Interleaves filters.
    pub fn interleave(filters: impl IntoIterator<Item = RowFilter>) -> Self {
        Self::Interleave(filters.into_iter().collect())
    }

    /// Builds a conditional filter.
    pub fn condition(
        predicate: RowFilter,
        true_filter: Option<RowFilter>,
        false_filter: Option<RowFilter>,
    ) -> Self {
        Self::Condition {
            predicate: Box::new(predicate),
            true_filter: true_filter.map(Box::new),
            false_filter: false_filter.map(Box::new),
        }
    }

    /// Row key regex filter.
    pub fn key(regex: impl Into<Bytes>) -> Self {
        Self::RowKeyRegex(regex.into())
    }

    /// Family name regex filter.
    pub fn family(regex: impl Into<String>) -> Self {
        Self::FamilyNameRegex(regex.into())
    }

    /// Column qualifier regex filter.
    pub fn qualifier(regex: impl Into<Bytes>) -> Self {
        Self::ColumnQualifierRegex(regex.into())
    }

    /// Value regex filter.
    pub fn value(regex: impl Into<Bytes>) -> Self {
        Self::ValueRegex(regex.into())
    }

    /// Label filter.
    pub fn label(value: impl Into<String>) -> Self {
        Self::ApplyLabel(value.into())
    }

    /// Row sampling filter.
    ///
    /// # Errors
    ///
    /// Returns [`TypeError::InvalidArgument`](crate::TypeError::InvalidArgument)
    /// unless `0.0 < probability < 1.0`.
    pub fn sample(probability: f64) -> Result<Self> {
        ensure!(
            probability > 0.0 && probability < 1.0,
            InvalidArgumentSnafu { message: "sample probability must be in the open interval (0, 1)" }
        );
        Ok(Self::RowSample(probability))
    }

    /// Skips the first `offset` cells of each row.
    pub fn cells_per_row_offset(offset: i32) -> Self {
        Self::CellsPerRowOffset(offset)
    }

    /// Keeps the first `limit` cells of each row.
    pub fn cells_per_row(limit: i32) -> Self {
        Self::CellsPerRowLimit(limit)
    }

    /// Keeps the `limit` most recent versions of each column.
    pub fn cells_per_column(limit: i32) -> Self {
        Self::CellsPerColumnLimit(limit)
    }

    /// Timestamp range filter, `[from, to)` in microseconds; zero means unbounded.
    pub fn timestamp_range(from: i64, to: i64) -> Self {
        Self::TimestampRange(TimestampRange::new(from, to))
    }

    /// Value range filter.
    pub fn value_range(start: Bound<Bytes>, end: Bound<Bytes>) -> Self {
        Self::ValueRange(ValueRange { start, end })
    }

    /// Column range filter.
    pub fn column_range(
        family_name: impl Into<String>,
        start: Bound<Bytes>,
        end: Bound<Bytes>,
    ) -> Self {
        Self::ColumnRange(ColumnRange { family_name: family_name.into(), start, end })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::TypeError;

    #[test]
    fn test_sample_validates_probability() {
        assert_eq!(RowFilter::sample(0.5).unwrap(), RowFilter::RowSample(0.5));
        assert!(matches!(RowFilter::sample(0.0), Err(TypeError::InvalidArgument { .. })));
        assert!(matches!(RowFilter::sample(1.0), Err(TypeError::InvalidArgument { .. })));
        assert!(RowFilter::sample(f64::NAN).is_err());
    }

    #[test]
    fn test_condition_boxes_branches() {
        let filter = RowFilter::condition(RowFilter::Sink, Some(RowFilter::PassAll), None);
        match filter {
            RowFilter::Condition { predicate, true_filter, false_filter } => {
                assert_eq!(*predicate, RowFilter::Sink);
                assert_eq!(true_filter.map(|f| *f), Some(RowFilter::PassAll));
                assert!(false_filter.is_none());
            },
            other => panic!("unexpected filter: {other:?}"),
        }
    }

    #[test]
    fn test_column_range_builder() {
        let filter = RowFilter::column_range(
            "cf",
            Bound::Included(Bytes::from_static(b"a")),
            Bound::Unbounded,
        );
        assert!(matches!(filter, RowFilter::ColumnRange(ColumnRange { ref family_name, .. }) if family_name == "cf"));
    }
}
