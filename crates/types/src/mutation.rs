//! Row mutations and read-modify-write rules.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Timestamp value asking the server to assign the cell timestamp.
///
/// A `SetCell` carrying this value is not idempotent: resending it writes a
/// second version with a different timestamp.
pub const SERVER_TIMESTAMP: i64 = -1;

/// Half-open timestamp interval `[start_micros, end_micros)`.
///
/// Zero for either bound means unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRange {
    /// Inclusive lower bound in microseconds.
    pub start_micros: i64,
    /// Exclusive upper bound in microseconds.
    pub end_micros: i64,
}

impl TimestampRange {
    /// Creates a timestamp interval.
    pub fn new(start_micros: i64, end_micros: i64) -> Self {
        Self { start_micros, end_micros }
    }

    /// Returns true if `timestamp_micros` falls inside the interval.
    pub fn contains(&self, timestamp_micros: i64) -> bool {
        (self.start_micros == 0 || timestamp_micros >= self.start_micros)
            && (self.end_micros == 0 || timestamp_micros < self.end_micros)
    }
}

/// A single change applied atomically as part of a row mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    /// Writes a cell value.
    SetCell {
        /// Column family.
        family_name: String,
        /// Column qualifier.
        column_qualifier: Bytes,
        /// Cell timestamp, or [`SERVER_TIMESTAMP`].
        timestamp_micros: i64,
        /// Value to write.
        value: Bytes,
    },
    /// Deletes cells of one column, optionally restricted to a timestamp range.
    DeleteFromColumn {
        /// Column family.
        family_name: String,
        /// Column qualifier.
        column_qualifier: Bytes,
        /// Versions to delete; all versions when absent.
        time_range: Option<TimestampRange>,
    },
    /// Deletes every cell of a family.
    DeleteFromFamily {
        /// Column family.
        family_name: String,
    },
    /// Deletes the whole row.
    DeleteFromRow,
}

impl Mutation {
    /// Returns true if applying the mutation twice has the same effect as applying it once.
    pub fn is_idempotent(&self) -> bool {
        match self {
            Self::SetCell { timestamp_micros, .. } => *timestamp_micros != SERVER_TIMESTAMP,
            Self::DeleteFromColumn { .. } | Self::DeleteFromFamily { .. } | Self::DeleteFromRow => {
                true
            },
        }
    }
}

/// The mutations for one row, applied atomically.
///
/// # Example
///
/// ```
/// use bigtable_types::{MutationEntry, TimestampRange};
///
/// let entry = MutationEntry::new("user01")
///     .set_cell("cf1", "field01", "XYZ", Some(1_000))
///     .delete_from_column("cf2", "field01", Some(TimestampRange::new(0, 500)))
///     .delete_from_family("cf3");
/// assert!(entry.is_idempotent());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEntry {
    /// Key of the row the mutations apply to.
    pub row_key: Bytes,
    /// Mutations in application order.
    pub mutations: Vec<Mutation>,
}

impl MutationEntry {
    /// Creates an entry with no mutations.
    pub fn new(row_key: impl Into<Bytes>) -> Self {
        Self { row_key: row_key.into(), mutations: Vec::new() }
    }

    /// Adds a `SetCell`. `None` lets the server assign the timestamp.
    #[must_use]
    pub fn set_cell(
        mut self,
        family_name: impl Into<String>,
        column_qualifier: impl Into<Bytes>,
        value: impl Into<Bytes>,
        timestamp_micros: Option<i64>,
    ) -> Self {
        self.mutations.push(Mutation::SetCell {
            family_name: family_name.into(),
            column_qualifier: column_qualifier.into(),
            timestamp_micros: timestamp_micros.unwrap_or(SERVER_TIMESTAMP),
            value: value.into(),
        });
        self
    }

    /// Adds a `DeleteFromColumn`.
    #[must_use]
    pub fn delete_from_column(
        mut self,
        family_name: impl Into<String>,
        column_qualifier: impl Into<Bytes>,
        time_range: Option<TimestampRange>,
    ) -> Self {
        self.mutations.push(Mutation::DeleteFromColumn {
            family_name: family_name.into(),
            column_qualifier: column_qualifier.into(),
            time_range,
        });
        self
    }

    /// Adds a `DeleteFromFamily`.
    #[must_use]
    pub fn delete_from_family(mut self, family_name: impl Into<String>) -> Self {
        self.mutations.push(Mutation::DeleteFromFamily { family_name: family_name.into() });
        self
    }

    /// Adds a `DeleteFromRow`.
    #[must_use]
    pub fn delete_from_row(mut self) -> Self {
        self.mutations.push(Mutation::DeleteFromRow);
        self
    }

    /// Returns true if every mutation in the entry is idempotent, so the entry
    /// can be resent blindly after a transient failure.
    pub fn is_idempotent(&self) -> bool {
        self.mutations.iter().all(Mutation::is_idempotent)
    }

    /// Returns the number of mutations.
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Returns true if the entry holds no mutations.
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// How a read-modify-write rule transforms the latest cell of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadModifyWriteKind {
    /// Appends bytes to the existing value (or writes them to an empty cell).
    AppendValue(Bytes),
    /// Adds to the existing value read as a big-endian i64 (zero when absent).
    IncrementAmount(i64),
}

/// A read-modify-write rule for one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadModifyWriteRule {
    /// Column family.
    pub family_name: String,
    /// Column qualifier.
    pub column_qualifier: Bytes,
    /// Transformation.
    pub kind: ReadModifyWriteKind,
}

impl ReadModifyWriteRule {
    /// Creates an append rule.
    pub fn append(
        family_name: impl Into<String>,
        column_qualifier: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            family_name: family_name.into(),
            column_qualifier: column_qualifier.into(),
            kind: ReadModifyWriteKind::AppendValue(value.into()),
        }
    }

    /// Creates an increment rule.
    pub fn increment(
        family_name: impl Into<String>,
        column_qualifier: impl Into<Bytes>,
        amount: i64,
    ) -> Self {
        Self {
            family_name: family_name.into(),
            column_qualifier: column_qualifier.into(),
            kind: ReadModifyWriteKind::IncrementAmount(amount),
        }
    }
}
