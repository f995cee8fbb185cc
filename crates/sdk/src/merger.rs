//! Row reassembly from streamed cell chunks.
//!
//! The read RPC delivers rows as a flat sequence of [`CellChunk`]s. The
//! [`ChunkMerger`] folds that sequence back into complete rows, holding at
//! most one row in memory. Every chunk is checked against the reassembly
//! rules; a violation is a [`SdkError::Protocol`] and leaves no partial row
//! behind.
//!
//! The merger is a three-state machine:
//!
//! ```text
//!              cell chunk (new key)
//!   NewRow ─────────────────────────────► RowInProgress ◄─┐
//!     ▲  ▲                                  │   │   ▲      │ cell chunk
//!     │  │ commit                           │   │   └──────┘ (value_size == 0)
//!     │  └──────────────────────────────────┘   │ value_size > 0
//!     │ reset                                    ▼
//!     └──────────────────────────────────── CellInProgress
//! ```

use bigtable_types::{Cell, CellChunk, Row};
use bytes::{Bytes, BytesMut};

use crate::error::{Result, SdkError};

/// Upper bound on the value buffer preallocated from a chunk's `value_size`.
const MAX_VALUE_PREALLOCATION: usize = 4 * 1024 * 1024;

/// A row shape the merger can assemble.
pub trait RowBuilder: Sized {
    /// Starts an empty row.
    fn new_row(key: Bytes) -> Self;

    /// Appends a completed cell.
    fn push_cell(&mut self, cell: Cell);

    /// Returns the row key.
    fn key(&self) -> &Bytes;
}

impl RowBuilder for Row {
    fn new_row(key: Bytes) -> Self {
        Row::new(key)
    }

    fn push_cell(&mut self, cell: Cell) {
        Row::push_cell(self, cell);
    }

    fn key(&self) -> &Bytes {
        Row::key(self)
    }
}

/// The row being assembled, with the coordinates of its most recent cell.
#[derive(Debug)]
struct RowProgress<R> {
    row: R,
    family: String,
    qualifier: Bytes,
}

/// The cell whose value is still arriving.
#[derive(Debug)]
struct PendingCell {
    family: String,
    qualifier: Bytes,
    timestamp_micros: i64,
    labels: Vec<String>,
    value: BytesMut,
}

impl PendingCell {
    fn into_cell(self) -> Cell {
        Cell::new(self.family, self.qualifier, self.timestamp_micros, self.value.freeze(), self.labels)
    }
}

#[derive(Debug)]
enum MergeState<R> {
    NewRow,
    RowInProgress(RowProgress<R>),
    CellInProgress(RowProgress<R>, PendingCell),
}

/// Folds cell chunks into complete rows.
///
/// Feed chunks in stream order with [`process`](Self::process); each call
/// returns the row it completed, if any. At the end of a stream call
/// [`validate_last_row_complete`](Self::validate_last_row_complete) to detect
/// truncation.
#[derive(Debug)]
pub struct ChunkMerger<R = Row> {
    state: MergeState<R>,
    last_committed_key: Option<Bytes>,
    chunk_index: u64,
}

impl<R> Default for ChunkMerger<R> {
    fn default() -> Self {
        Self { state: MergeState::NewRow, last_committed_key: None, chunk_index: 0 }
    }
}

impl<R: RowBuilder> ChunkMerger<R> {
    /// Creates a merger expecting the first chunk of a new row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes one chunk, returning the row it commits.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Protocol`] if the chunk breaks a reassembly rule.
    /// The row in progress is discarded; the merger should not be fed again
    /// without a [`reset_to_new_row`](Self::reset_to_new_row).
    pub fn process(&mut self, chunk: CellChunk) -> Result<Option<R>> {
        self.chunk_index += 1;

        match std::mem::replace(&mut self.state, MergeState::NewRow) {
            MergeState::NewRow => self.start_row(chunk),
            MergeState::RowInProgress(progress) => {
                if chunk.reset_row() {
                    return self.reset(&chunk);
                }
                self.start_cell(progress, chunk)
            },
            MergeState::CellInProgress(progress, pending) => {
                if chunk.reset_row() {
                    return self.reset(&chunk);
                }
                self.continue_cell(progress, pending, chunk)
            },
        }
    }

    /// Checks that the stream did not end in the middle of a row.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Protocol`] if a row was started but never committed.
    pub fn validate_last_row_complete(&self) -> Result<()> {
        match &self.state {
            MergeState::NewRow => Ok(()),
            MergeState::RowInProgress(_) | MergeState::CellInProgress(..) => {
                Err(self.violation("stream ended with an uncommitted row"))
            },
        }
    }

    /// Discards any row in progress before a new stream attempt.
    ///
    /// The last committed key is kept, so a resumed stream that redelivers an
    /// already returned row is still rejected.
    pub fn reset_to_new_row(&mut self) {
        self.state = MergeState::NewRow;
        self.chunk_index = 0;
    }

    /// Returns true if no row is in progress.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, MergeState::NewRow)
    }

    /// Returns the key of the last committed row.
    pub fn last_committed_key(&self) -> Option<&Bytes> {
        self.last_committed_key.as_ref()
    }

    fn start_row(&mut self, chunk: CellChunk) -> Result<Option<R>> {
        if chunk.reset_row() {
            return Err(self.violation("reset with no row in progress"));
        }
        if chunk.row_key.is_empty() {
            return Err(self.violation("new row is missing a row key"));
        }
        if let Some(last) = &self.last_committed_key {
            if chunk.row_key == *last {
                return Err(self.violation("duplicate row key"));
            }
            if chunk.row_key < *last {
                return Err(self.violation("row keys are not in ascending order"));
            }
        }
        let (Some(family), Some(qualifier)) = (chunk.family_name.clone(), chunk.qualifier.clone())
        else {
            return Err(self.violation("new row is missing a family or qualifier"));
        };

        let pending = self.open_cell(family, qualifier, &chunk)?;
        let progress = RowProgress {
            row: R::new_row(chunk.row_key.clone()),
            family: pending.family.clone(),
            qualifier: pending.qualifier.clone(),
        };
        self.accumulate(progress, pending, chunk)
    }

    fn start_cell(&mut self, progress: RowProgress<R>, chunk: CellChunk) -> Result<Option<R>> {
        if !chunk.row_key.is_empty() && chunk.row_key != *progress.row.key() {
            return Err(self.violation("row key changed without a commit"));
        }
        if chunk.family_name.is_some() && chunk.qualifier.is_none() {
            return Err(self.violation("new family without a qualifier"));
        }

        let family = chunk.family_name.clone().unwrap_or_else(|| progress.family.clone());
        let qualifier = chunk.qualifier.clone().unwrap_or_else(|| progress.qualifier.clone());
        let pending = self.open_cell(family, qualifier, &chunk)?;
        let progress = RowProgress {
            family: pending.family.clone(),
            qualifier: pending.qualifier.clone(),
            ..progress
        };
        self.accumulate(progress, pending, chunk)
    }

    fn continue_cell(
        &mut self,
        progress: RowProgress<R>,
        pending: PendingCell,
        chunk: CellChunk,
    ) -> Result<Option<R>> {
        if !chunk.row_key.is_empty() && chunk.row_key != *progress.row.key() {
            return Err(self.violation("row key changed within a cell"));
        }
        if chunk.family_name.as_ref().is_some_and(|f| *f != pending.family) {
            return Err(self.violation("family changed within a cell"));
        }
        if chunk.qualifier.as_ref().is_some_and(|q| *q != pending.qualifier) {
            return Err(self.violation("qualifier changed within a cell"));
        }
        if chunk.timestamp_micros != 0 && chunk.timestamp_micros != pending.timestamp_micros {
            return Err(self.violation("timestamp changed within a cell"));
        }
        self.accumulate(progress, pending, chunk)
    }

    fn open_cell(&self, family: String, qualifier: Bytes, chunk: &CellChunk) -> Result<PendingCell> {
        let capacity = usize::try_from(chunk.value_size)
            .map_err(|_| self.violation("negative value size"))?
            .max(chunk.value.len())
            .min(MAX_VALUE_PREALLOCATION);
        Ok(PendingCell {
            family,
            qualifier,
            timestamp_micros: chunk.timestamp_micros,
            labels: chunk.labels.clone(),
            value: BytesMut::with_capacity(capacity),
        })
    }

    fn accumulate(
        &mut self,
        mut progress: RowProgress<R>,
        mut pending: PendingCell,
        chunk: CellChunk,
    ) -> Result<Option<R>> {
        if chunk.value_size < 0 {
            return Err(self.violation("negative value size"));
        }
        pending.value.extend_from_slice(&chunk.value);

        if chunk.value_size > 0 {
            if chunk.commit_row() {
                return Err(self.violation("commit while a cell value is incomplete"));
            }
            self.state = MergeState::CellInProgress(progress, pending);
            return Ok(None);
        }

        progress.row.push_cell(pending.into_cell());

        if chunk.commit_row() {
            let row = progress.row;
            self.last_committed_key = Some(row.key().clone());
            self.state = MergeState::NewRow;
            return Ok(Some(row));
        }

        self.state = MergeState::RowInProgress(progress);
        Ok(None)
    }

    fn reset(&mut self, chunk: &CellChunk) -> Result<Option<R>> {
        if chunk.carries_cell_data() {
            return Err(self.violation("reset chunk carries cell data"));
        }
        self.state = MergeState::NewRow;
        Ok(None)
    }

    fn violation(&self, reason: &str) -> SdkError {
        SdkError::Protocol { chunk_index: self.chunk_index, reason: reason.to_owned() }
    }
}
