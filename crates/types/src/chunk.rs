//! Cell chunks as delivered by the streaming read RPC.
//!
//! The server splits every row into an ordered sequence of chunks. A chunk
//! either starts a row, starts a new cell within the current row, continues
//! the value of the current cell, or carries a row-level signal (commit or
//! reset). Reassembly lives in the SDK's chunk merger.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Row-level signal carried by a chunk.
///
/// `reset_row` and `commit_row` are mutually exclusive on the wire, so they
/// are modelled as one field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowStatus {
    /// No row-level signal.
    #[default]
    None,
    /// The server is discarding the row in progress.
    Reset,
    /// The row in progress is complete.
    Commit,
}

/// One fragment of a streamed read response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellChunk {
    /// Row key; empty means the chunk continues the current row.
    pub row_key: Bytes,
    /// Column family, present when the chunk starts a cell in a different family.
    pub family_name: Option<String>,
    /// Column qualifier, present when the chunk starts a cell in a different column.
    pub qualifier: Option<Bytes>,
    /// Cell timestamp in microseconds.
    pub timestamp_micros: i64,
    /// Labels applied by the read filter.
    pub labels: Vec<String>,
    /// Value fragment.
    pub value: Bytes,
    /// Total value size when more fragments follow; zero on the last fragment.
    pub value_size: i32,
    /// Row-level signal.
    pub row_status: RowStatus,
}

impl CellChunk {
    /// Creates a chunk that opens a cell, starting a new row when `row_key` is non-empty.
    pub fn cell(
        row_key: impl Into<Bytes>,
        family_name: impl Into<String>,
        qualifier: impl Into<Bytes>,
        timestamp_micros: i64,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            row_key: row_key.into(),
            family_name: Some(family_name.into()),
            qualifier: Some(qualifier.into()),
            timestamp_micros,
            value: value.into(),
            ..Self::default()
        }
    }

    /// Creates a chunk carrying the next fragment of the current cell's value.
    pub fn continuation(value: impl Into<Bytes>) -> Self {
        Self { value: value.into(), ..Self::default() }
    }

    /// Creates a chunk that resets the row in progress.
    pub fn reset() -> Self {
        Self { row_status: RowStatus::Reset, ..Self::default() }
    }

    /// Marks the chunk as committing the current row.
    #[must_use]
    pub fn with_commit(mut self) -> Self {
        self.row_status = RowStatus::Commit;
        self
    }

    /// Sets the announced total value size (non-zero means more fragments follow).
    #[must_use]
    pub fn with_value_size(mut self, value_size: i32) -> Self {
        self.value_size = value_size;
        self
    }

    /// Sets the labels.
    #[must_use]
    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if the chunk resets the row in progress.
    pub fn reset_row(&self) -> bool {
        self.row_status == RowStatus::Reset
    }

    /// Returns true if the chunk commits the row in progress.
    pub fn commit_row(&self) -> bool {
        self.row_status == RowStatus::Commit
    }

    /// Returns true if the chunk carries anything besides its row-level signal.
    pub fn carries_cell_data(&self) -> bool {
        !self.row_key.is_empty()
            || self.family_name.is_some()
            || self.qualifier.is_some()
            || self.timestamp_micros != 0
            || !self.labels.is_empty()
            || !self.value.is_empty()
            || self.value_size != 0
    }
}
