//! Data model for the Bigtable data client.
//!
//! This crate provides the value types shared by the SDK and its tests:
//! - Streamed read fragments ([`CellChunk`], [`RowStatus`])
//! - Assembled results ([`Row`], [`Cell`])
//! - Read scoping ([`RowSet`], [`RowRange`], [`RowFilter`])
//! - Write payloads ([`Mutation`], [`MutationEntry`], [`ReadModifyWriteRule`])
//! - Error types using snafu

pub mod chunk;
pub mod error;
pub mod filter;
pub mod mutation;
pub mod row;
pub mod row_set;

pub use chunk::{CellChunk, RowStatus};
pub use error::{Result, TypeError};
pub use filter::{ColumnRange, RowFilter, ValueRange};
pub use mutation::{
    Mutation, MutationEntry, ReadModifyWriteKind, ReadModifyWriteRule, SERVER_TIMESTAMP,
    TimestampRange,
};
pub use row::{Cell, Row};
pub use row_set::{RowRange, RowSet};
