//! Transport seam between the client core and the wire.
//!
//! [`DataTransport`] mirrors the six data RPCs of the table service. The
//! client core never touches channels or encodings; it only issues requests
//! through this trait and consumes the response streams. Errors use the
//! gRPC status vocabulary ([`tonic::Status`]) so any tonic-generated client
//! can back the trait directly.

use std::pin::Pin;

use bigtable_types::{
    Cell, CellChunk, MutationEntry, ReadModifyWriteRule, Row, RowFilter, RowSet,
};
use bytes::Bytes;
use futures::Stream;
use tonic::{Code, Status};

use crate::error::is_retryable_code;

/// Server-streamed responses of one call.
pub type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

/// Request for the streaming read RPC.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadRowsRequest {
    /// Fully qualified table name.
    pub table_name: String,
    /// App profile used to route the request.
    pub app_profile_id: Option<String>,
    /// Keys and ranges to read; empty reads the whole table.
    pub rows: RowSet,
    /// Filter applied server-side.
    pub filter: Option<RowFilter>,
    /// Maximum number of rows to return; zero means unlimited.
    pub rows_limit: i64,
}

/// One message of the streaming read RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadRowsResponse {
    /// Chunks in stream order.
    pub chunks: Vec<CellChunk>,
}

/// Request for the streaming batch mutation RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutateRowsRequest {
    /// Fully qualified table name.
    pub table_name: String,
    /// App profile used to route the request.
    pub app_profile_id: Option<String>,
    /// Row mutations; response indices refer to positions in this list.
    pub entries: Vec<MutationEntry>,
}

/// One message of the streaming batch mutation RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutateRowsResponse {
    /// Per-entry outcomes.
    pub entries: Vec<MutateRowsResponseEntry>,
}

/// Outcome of one entry of a batch mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutateRowsResponseEntry {
    /// Position of the entry in the request.
    pub index: i64,
    /// Status of the entry.
    pub status: EntryStatus,
}

/// Per-entry status of a batch mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStatus {
    /// gRPC status code.
    pub code: Code,
    /// Status message.
    pub message: String,
}

impl EntryStatus {
    /// Creates a status.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// The success status.
    pub fn ok() -> Self {
        Self::new(Code::Ok, "")
    }

    /// Returns true if the entry was applied.
    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    /// Returns true if the failure is transient.
    pub fn is_retryable(&self) -> bool {
        is_retryable_code(self.code)
    }
}

impl From<Status> for EntryStatus {
    fn from(status: Status) -> Self {
        Self::new(status.code(), status.message())
    }
}

/// Request for the row key sampling RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleRowKeysRequest {
    /// Fully qualified table name.
    pub table_name: String,
    /// App profile used to route the request.
    pub app_profile_id: Option<String>,
}

/// One sampled split point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleRowKeysResponse {
    /// Sampled row key; empty on the final sample, which marks the end of the table.
    pub row_key: Bytes,
    /// Approximate bytes stored before `row_key`.
    pub offset_bytes: i64,
}

/// Request for the single-row mutation RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutateRowRequest {
    /// Fully qualified table name.
    pub table_name: String,
    /// App profile used to route the request.
    pub app_profile_id: Option<String>,
    /// Row key and mutations.
    pub entry: MutationEntry,
}

/// Request for the conditional mutation RPC.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckAndMutateRowRequest {
    /// Fully qualified table name.
    pub table_name: String,
    /// App profile used to route the request.
    pub app_profile_id: Option<String>,
    /// Row to check and mutate.
    pub row_key: Bytes,
    /// Filter deciding which branch runs; absent matches any non-empty row.
    pub predicate_filter: Option<RowFilter>,
    /// Applied when the predicate yields at least one cell.
    pub true_mutations: Vec<bigtable_types::Mutation>,
    /// Applied otherwise.
    pub false_mutations: Vec<bigtable_types::Mutation>,
}

/// Request for the read-modify-write RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadModifyWriteRowRequest {
    /// Fully qualified table name.
    pub table_name: String,
    /// App profile used to route the request.
    pub app_profile_id: Option<String>,
    /// Row to modify.
    pub row_key: Bytes,
    /// Rules applied in order.
    pub rules: Vec<ReadModifyWriteRule>,
}

/// Response of the read-modify-write RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadModifyWriteRowResponse {
    /// New contents of every modified cell.
    pub row: FamilyRow,
}

/// A row in nested family, column, version form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FamilyRow {
    /// Row key.
    pub key: Bytes,
    /// Families present in the row.
    pub families: Vec<Family>,
}

/// One column family of a [`FamilyRow`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Family {
    /// Family name.
    pub name: String,
    /// Columns of the family.
    pub columns: Vec<Column>,
}

/// One column of a [`Family`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Column {
    /// Column qualifier.
    pub qualifier: Bytes,
    /// Versions of the column.
    pub cells: Vec<VersionedCell>,
}

/// One version of a [`Column`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionedCell {
    /// Timestamp in microseconds.
    pub timestamp_micros: i64,
    /// Value.
    pub value: Bytes,
    /// Labels applied by a filter.
    pub labels: Vec<String>,
}

impl From<FamilyRow> for Row {
    /// Flattens families, columns and versions into a [`Row`], keeping their order.
    fn from(row: FamilyRow) -> Self {
        let mut out = Row::new(row.key);
        for family in row.families {
            for column in family.columns {
                for version in column.cells {
                    out.push_cell(Cell::new(
                        family.name.clone(),
                        column.qualifier.clone(),
                        version.timestamp_micros,
                        version.value,
                        version.labels,
                    ));
                }
            }
        }
        out
    }
}

/// The six data RPCs of the table service.
///
/// Opening a streaming call may fail immediately with a status; once open,
/// each stream item may carry a status that ends the call. Implementations
/// must be cheap to share: the client holds one behind an `Arc` and issues
/// concurrent calls through it.
#[tonic::async_trait]
pub trait DataTransport: Send + Sync + 'static {
    /// Opens a streaming read.
    async fn read_rows(
        &self,
        request: ReadRowsRequest,
    ) -> Result<ResponseStream<ReadRowsResponse>, Status>;

    /// Opens a streaming batch mutation.
    async fn mutate_rows(
        &self,
        request: MutateRowsRequest,
    ) -> Result<ResponseStream<MutateRowsResponse>, Status>;

    /// Opens a streaming row key sample.
    async fn sample_row_keys(
        &self,
        request: SampleRowKeysRequest,
    ) -> Result<ResponseStream<SampleRowKeysResponse>, Status>;

    /// Atomically applies mutations to one row.
    async fn mutate_row(&self, request: MutateRowRequest) -> Result<(), Status>;

    /// Applies one of two mutation lists depending on a predicate; returns
    /// whether the predicate matched.
    async fn check_and_mutate_row(&self, request: CheckAndMutateRowRequest)
    -> Result<bool, Status>;

    /// Atomically applies read-modify-write rules to one row.
    async fn read_modify_write_row(
        &self,
        request: ReadModifyWriteRowRequest,
    ) -> Result<ReadModifyWriteRowResponse, Status>;
}
