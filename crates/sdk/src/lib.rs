//! Rust data client for Bigtable-style wide-column tables.
//!
//! This SDK turns the table service's streaming data RPCs into an ergonomic
//! API: streamed cell chunks are reassembled into complete rows, interrupted
//! scans resume where they left off, and batch mutations retry only the
//! entries that failed transiently.
//!
//! # Features
//!
//! - **Row reassembly**: A strict chunk state machine rejects malformed, truncated or duplicated rows
//! - **Resumable scans**: Row sets and limits are rewritten so no row is delivered twice
//! - **Per-entry batch retry**: Only retryable, idempotent entries are resubmitted
//! - **Bounded retries**: Exponential backoff with jitter, one budget per logical call
//! - **Pluggable transport**: Any [`DataTransport`] implementation, including [`mock::MockTransport`]
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use bigtable_sdk::{ClientConfig, ReadRowsOptions, TableClient};
//! use bigtable_types::{MutationEntry, RowRange, RowSet};
//! use futures::TryStreamExt;
//!
//! #[tokio::main]
//! async fn main() -> bigtable_sdk::Result<()> {
//!     let config = ClientConfig::builder()
//!         .with_table_name("projects/my-project/instances/my-instance/tables/users")
//!         .build()?;
//!     let client = TableClient::new(transport, config);
//!
//!     client.mutate_row(MutationEntry::new("user#1").set_cell("cf", "name", "alice", None)).await?;
//!
//!     let options = ReadRowsOptions::new().with_rows(RowSet::from_ranges([RowRange::prefix("user#")]));
//!     let mut rows = client.read_rows(options)?;
//!     while let Some(row) = rows.try_next().await? {
//!         println!("{:?}", row.key());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TableClient (Public API)                 │
//! │  .read_rows() │ .mutate_rows() │ .mutate_row() │ ...       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RetryingRowReader          │  BatchMutationRetrier         │
//! │  ChunkMerger │ ScanCursor   │  per-entry status tracking    │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   Resilience Layer (backon)                 │
//! │   Retry classification │ Exponential backoff │ Jitter      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   DataTransport (trait)                     │
//! │   tonic-generated client │ MockTransport                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod client;
mod config;
pub mod cursor;
mod error;
pub mod merger;
mod metrics;
pub mod mock;
mod reader;
mod retry;
pub mod transport;

// Public API exports
pub use batch::BatchMutationRetrier;
pub use client::{ReadRowsOptions, RowKeySample, TableClient};
pub use config::{ClientConfig, ClientConfigBuilder, RetryPolicy, RetryPolicyBuilder};
pub use cursor::{ResumePlan, ScanCursor};
pub use error::{Result, SdkError, is_retryable_code};
pub use merger::{ChunkMerger, RowBuilder};
pub use metrics::{MetricsSdkMetrics, NoopSdkMetrics, SdkMetrics};
pub use reader::{RetryingRowReader, RowStream};
pub use retry::{RetryDecision, classify, with_retry};
pub use transport::{DataTransport, EntryStatus, ReadRowsRequest, ReadRowsResponse, ResponseStream};

// Re-export the data model
pub use bigtable_types::{
    Cell, CellChunk, Mutation, MutationEntry, ReadModifyWriteRule, Row, RowFilter, RowRange,
    RowSet, RowStatus, TimestampRange,
};
