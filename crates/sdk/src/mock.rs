//! In-process mock transport for SDK testing.
//!
//! [`MockTransport`] implements [`DataTransport`] over an in-memory table so
//! client behavior can be exercised without a server.
//!
//! # Features
//!
//! - **Table storage**: Cells seeded with [`MockTransport::set_cell`] or written
//!   through the mutation RPCs are served back by reads
//! - **Chunking**: Values are split into fragments of a configurable size
//! - **Failure injection**: UNAVAILABLE on open, read streams cut after N rows,
//!   per-entry batch failures
//! - **Scripting**: Exact response streams for protocol-level tests
//! - **Request logging**: Call counts and captured requests for verification
//!
//! Read filters and check-and-mutate predicates are not evaluated: reads
//! return every stored cell, and a check matches when the row exists.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bigtable_sdk::{ClientConfig, ReadRowsOptions, TableClient, mock::MockTransport};
//! use futures::TryStreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mock = Arc::new(MockTransport::new());
//! mock.set_cell("user#1", "cf", "name", 1_000, "alice");
//!
//! let config = ClientConfig::builder().with_table_name("projects/p/instances/i/tables/t").build()?;
//! let client = TableClient::new(Arc::clone(&mock), config);
//! let rows: Vec<_> = client.read_rows(ReadRowsOptions::new())?.try_collect().await?;
//! assert_eq!(rows.len(), 1);
//! # Ok(())
//! # }
//! ```

use std::{
    cmp::Reverse,
    collections::{BTreeMap, HashMap, VecDeque},
    sync::atomic::{AtomicUsize, Ordering},
};

use bigtable_types::{
    Cell, CellChunk, Mutation, ReadModifyWriteKind, Row, RowStatus, SERVER_TIMESTAMP,
};
use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use tonic::{Code, Status};

use crate::transport::{
    CheckAndMutateRowRequest, Column, DataTransport, EntryStatus, Family, FamilyRow,
    MutateRowRequest, MutateRowsRequest, MutateRowsResponse, MutateRowsResponseEntry,
    ReadModifyWriteRowRequest, ReadModifyWriteRowResponse, ReadRowsRequest, ReadRowsResponse,
    ResponseStream, SampleRowKeysRequest, SampleRowKeysResponse, VersionedCell,
};

/// Versions of one column, newest first.
type Versions = BTreeMap<Reverse<i64>, Bytes>;

/// Cells of one row keyed by (family, qualifier).
type RowCells = BTreeMap<(String, Bytes), Versions>;

/// A scripted call: `Err` fails the open, `Ok` is the exact item sequence.
type Scripted<T> = Result<Vec<Result<T, Status>>, Status>;

/// A one-shot cut of a store-backed read stream.
#[derive(Debug, Clone, Copy)]
struct ReadInterruption {
    after_rows: usize,
    partial_row: bool,
}

/// Mock implementation of the table data RPCs.
#[derive(Debug, Default)]
pub struct MockTransport {
    /// Table contents: row key -> cells.
    rows: RwLock<BTreeMap<Bytes, RowCells>>,

    /// Maximum bytes per value fragment; zero sends each value whole.
    fragment_size: AtomicUsize,

    /// Number of UNAVAILABLE errors to inject for the next calls.
    unavailable_count: AtomicUsize,

    /// Pending cuts of store-backed read streams.
    read_interruptions: Mutex<VecDeque<ReadInterruption>>,

    /// Scripted read streams, used before the store.
    scripted_reads: Mutex<VecDeque<Scripted<ReadRowsResponse>>>,

    /// Scripted batch mutation streams, used before the store.
    scripted_mutate_rows: Mutex<VecDeque<Scripted<MutateRowsResponse>>>,

    /// Per-row codes returned by store-backed batch mutations before they succeed.
    entry_failures: Mutex<HashMap<Bytes, VecDeque<Code>>>,

    read_requests: Mutex<Vec<ReadRowsRequest>>,
    mutate_rows_requests: Mutex<Vec<MutateRowsRequest>>,

    read_rows_count: AtomicUsize,
    mutate_rows_count: AtomicUsize,
    sample_row_keys_count: AtomicUsize,
    mutate_row_count: AtomicUsize,
    check_and_mutate_row_count: AtomicUsize,
    read_modify_write_row_count: AtomicUsize,
}

impl MockTransport {
    /// Creates a mock with an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores one cell version.
    pub fn set_cell(
        &self,
        row_key: impl Into<Bytes>,
        family: impl Into<String>,
        qualifier: impl Into<Bytes>,
        timestamp_micros: i64,
        value: impl Into<Bytes>,
    ) {
        self.rows
            .write()
            .entry(row_key.into())
            .or_default()
            .entry((family.into(), qualifier.into()))
            .or_default()
            .insert(Reverse(timestamp_micros), value.into());
    }

    /// Returns the stored row, cells ordered by family, qualifier and newest version first.
    pub fn row(&self, row_key: &[u8]) -> Option<Row> {
        let rows = self.rows.read();
        rows.get(row_key).map(|cells| to_row(Bytes::copy_from_slice(row_key), cells))
    }

    /// Returns the number of stored rows.
    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    /// Splits every served value into fragments of at most `bytes` bytes.
    pub fn set_fragment_size(&self, bytes: usize) {
        self.fragment_size.store(bytes, Ordering::SeqCst);
    }

    /// Injects UNAVAILABLE errors for the next N calls of any method.
    pub fn inject_unavailable(&self, count: usize) {
        self.unavailable_count.store(count, Ordering::SeqCst);
    }

    /// Cuts the next store-backed read with UNAVAILABLE after `rows` committed rows.
    ///
    /// With `partial_row`, the first chunk of the following row is sent
    /// without its commit before the error. Calls queue up, one per read.
    pub fn fail_read_after_rows(&self, rows: usize, partial_row: bool) {
        self.read_interruptions.lock().push_back(ReadInterruption { after_rows: rows, partial_row });
    }

    /// Queues an exact read stream.
    pub fn script_read(&self, items: Vec<Result<ReadRowsResponse, Status>>) {
        self.scripted_reads.lock().push_back(Ok(items));
    }

    /// Queues a read whose open fails with `status`.
    pub fn script_read_open_error(&self, status: Status) {
        self.scripted_reads.lock().push_back(Err(status));
    }

    /// Queues an exact batch mutation stream.
    pub fn script_mutate_rows(&self, items: Vec<Result<MutateRowsResponse, Status>>) {
        self.scripted_mutate_rows.lock().push_back(Ok(items));
    }

    /// Queues a batch mutation whose open fails with `status`.
    pub fn script_mutate_rows_open_error(&self, status: Status) {
        self.scripted_mutate_rows.lock().push_back(Err(status));
    }

    /// Makes store-backed batch mutations of `row_key` fail with `codes`, one
    /// per call, before the entry is finally applied.
    pub fn inject_entry_failures(&self, row_key: impl Into<Bytes>, codes: impl IntoIterator<Item = Code>) {
        self.entry_failures.lock().entry(row_key.into()).or_default().extend(codes);
    }

    /// Returns every read request received, in order.
    pub fn read_requests(&self) -> Vec<ReadRowsRequest> {
        self.read_requests.lock().clone()
    }

    /// Returns every batch mutation request received, in order.
    pub fn mutate_rows_requests(&self) -> Vec<MutateRowsRequest> {
        self.mutate_rows_requests.lock().clone()
    }

    /// Returns the number of read calls.
    pub fn read_rows_calls(&self) -> usize {
        self.read_rows_count.load(Ordering::SeqCst)
    }

    /// Returns the number of batch mutation calls.
    pub fn mutate_rows_calls(&self) -> usize {
        self.mutate_rows_count.load(Ordering::SeqCst)
    }

    /// Returns the number of row key sample calls.
    pub fn sample_row_keys_calls(&self) -> usize {
        self.sample_row_keys_count.load(Ordering::SeqCst)
    }

    /// Returns the number of single-row mutation calls.
    pub fn mutate_row_calls(&self) -> usize {
        self.mutate_row_count.load(Ordering::SeqCst)
    }

    /// Returns the number of conditional mutation calls.
    pub fn check_and_mutate_row_calls(&self) -> usize {
        self.check_and_mutate_row_count.load(Ordering::SeqCst)
    }

    /// Returns the number of read-modify-write calls.
    pub fn read_modify_write_row_calls(&self) -> usize {
        self.read_modify_write_row_count.load(Ordering::SeqCst)
    }

    /// Resets all state to initial values.
    pub fn reset(&self) {
        self.rows.write().clear();
        self.read_interruptions.lock().clear();
        self.scripted_reads.lock().clear();
        self.scripted_mutate_rows.lock().clear();
        self.entry_failures.lock().clear();
        self.read_requests.lock().clear();
        self.mutate_rows_requests.lock().clear();
        for counter in [
            &self.fragment_size,
            &self.unavailable_count,
            &self.read_rows_count,
            &self.mutate_rows_count,
            &self.sample_row_keys_count,
            &self.mutate_row_count,
            &self.check_and_mutate_row_count,
            &self.read_modify_write_row_count,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    /// Checks if we should inject an unavailable error, decrementing counter if so.
    fn should_inject_unavailable(&self) -> bool {
        loop {
            let current = self.unavailable_count.load(Ordering::SeqCst);
            if current == 0 {
                return false;
            }
            if self
                .unavailable_count
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Counts the call and applies injected failures.
    fn begin_call(&self, counter: &AtomicUsize) -> Result<(), Status> {
        counter.fetch_add(1, Ordering::SeqCst);
        if self.should_inject_unavailable() {
            return Err(Status::unavailable("Injected error"));
        }
        Ok(())
    }

    fn serve_read(&self, request: &ReadRowsRequest) -> Vec<Result<ReadRowsResponse, Status>> {
        let fragment_size = self.fragment_size.load(Ordering::SeqCst);
        let interruption = self.read_interruptions.lock().pop_front();
        let limit = usize::try_from(request.rows_limit).ok().filter(|l| *l > 0).unwrap_or(usize::MAX);

        let rows = self.rows.read();
        let mut selected = rows.iter().filter(|(key, _)| request.rows.contains(key)).take(limit);
        let mut items = Vec::new();

        let Some(cut) = interruption else {
            items.extend(selected.map(|(key, cells)| {
                Ok(ReadRowsResponse { chunks: row_chunks(key, cells, fragment_size) })
            }));
            return items;
        };

        for (key, cells) in selected.by_ref().take(cut.after_rows) {
            items.push(Ok(ReadRowsResponse { chunks: row_chunks(key, cells, fragment_size) }));
        }
        if cut.partial_row {
            if let Some((key, cells)) = selected.next() {
                let mut chunks = row_chunks(key, cells, fragment_size);
                chunks.truncate(1);
                if let Some(first) = chunks.first_mut() {
                    first.row_status = RowStatus::None;
                }
                items.push(Ok(ReadRowsResponse { chunks }));
            }
        }
        items.push(Err(Status::unavailable("Injected stream interruption")));
        items
    }

    fn serve_mutate_rows(&self, request: &MutateRowsRequest) -> MutateRowsResponse {
        let now = now_micros();
        let mut failures = self.entry_failures.lock();
        let mut rows = self.rows.write();

        let entries = request
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let injected = failures.get_mut(&entry.row_key).and_then(VecDeque::pop_front);
                let status = match injected {
                    Some(code) => EntryStatus::new(code, "Injected entry failure"),
                    None => {
                        apply_mutations(&mut rows, &entry.row_key, &entry.mutations, now);
                        EntryStatus::ok()
                    },
                };
                MutateRowsResponseEntry { index: index as i64, status }
            })
            .collect();
        MutateRowsResponse { entries }
    }
}

#[tonic::async_trait]
impl DataTransport for MockTransport {
    async fn read_rows(&self, request: ReadRowsRequest) -> Result<ResponseStream<ReadRowsResponse>, Status> {
        self.read_requests.lock().push(request.clone());
        self.begin_call(&self.read_rows_count)?;

        let scripted = self.scripted_reads.lock().pop_front();
        let items = match scripted {
            Some(script) => script?,
            None => self.serve_read(&request),
        };
        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn mutate_rows(
        &self,
        request: MutateRowsRequest,
    ) -> Result<ResponseStream<MutateRowsResponse>, Status> {
        self.mutate_rows_requests.lock().push(request.clone());
        self.begin_call(&self.mutate_rows_count)?;

        let scripted = self.scripted_mutate_rows.lock().pop_front();
        let items = match scripted {
            Some(script) => script?,
            None => vec![Ok(self.serve_mutate_rows(&request))],
        };
        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn sample_row_keys(
        &self,
        _request: SampleRowKeysRequest,
    ) -> Result<ResponseStream<SampleRowKeysResponse>, Status> {
        self.begin_call(&self.sample_row_keys_count)?;

        let rows = self.rows.read();
        let mut offset_bytes = 0i64;
        let mut samples = Vec::with_capacity(rows.len() + 1);
        for (key, cells) in rows.iter() {
            offset_bytes += row_size(key, cells);
            samples.push(Ok(SampleRowKeysResponse { row_key: key.clone(), offset_bytes }));
        }
        samples.push(Ok(SampleRowKeysResponse { row_key: Bytes::new(), offset_bytes }));
        Ok(Box::pin(futures::stream::iter(samples)))
    }

    async fn mutate_row(&self, request: MutateRowRequest) -> Result<(), Status> {
        self.begin_call(&self.mutate_row_count)?;
        let mut rows = self.rows.write();
        apply_mutations(&mut rows, &request.entry.row_key, &request.entry.mutations, now_micros());
        Ok(())
    }

    async fn check_and_mutate_row(&self, request: CheckAndMutateRowRequest) -> Result<bool, Status> {
        self.begin_call(&self.check_and_mutate_row_count)?;
        let mut rows = self.rows.write();
        let matched = rows.contains_key(&request.row_key);
        let mutations = if matched { &request.true_mutations } else { &request.false_mutations };
        apply_mutations(&mut rows, &request.row_key, mutations, now_micros());
        Ok(matched)
    }

    async fn read_modify_write_row(
        &self,
        request: ReadModifyWriteRowRequest,
    ) -> Result<ReadModifyWriteRowResponse, Status> {
        self.begin_call(&self.read_modify_write_row_count)?;
        let now = now_micros();
        let mut rows = self.rows.write();
        let mut cells = rows.get(&request.row_key).cloned().unwrap_or_default();
        let mut modified: BTreeMap<(String, Bytes), (i64, Bytes)> = BTreeMap::new();

        for rule in &request.rules {
            let column = (rule.family_name.clone(), rule.column_qualifier.clone());
            let current = cells.get(&column).and_then(|versions| versions.values().next()).cloned();
            let value = match &rule.kind {
                ReadModifyWriteKind::AppendValue(suffix) => {
                    let mut value = BytesMut::from(current.unwrap_or_default().as_ref());
                    value.extend_from_slice(suffix);
                    value.freeze()
                },
                ReadModifyWriteKind::IncrementAmount(amount) => {
                    let base = match current {
                        None => 0,
                        Some(bytes) => {
                            let raw: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
                                Status::invalid_argument("increment target is not a 64-bit big-endian value")
                            })?;
                            i64::from_be_bytes(raw)
                        },
                    };
                    Bytes::copy_from_slice(&base.wrapping_add(*amount).to_be_bytes())
                },
            };
            cells.entry(column.clone()).or_default().insert(Reverse(now), value.clone());
            modified.insert(column, (now, value));
        }
        rows.insert(request.row_key.clone(), cells);

        let mut families: Vec<Family> = Vec::new();
        for ((family, qualifier), (timestamp_micros, value)) in modified {
            let column = Column { qualifier, cells: vec![VersionedCell { timestamp_micros, value, labels: vec![] }] };
            match families.last_mut() {
                Some(last) if last.name == family => last.columns.push(column),
                _ => families.push(Family { name: family, columns: vec![column] }),
            }
        }
        Ok(ReadModifyWriteRowResponse { row: FamilyRow { key: request.row_key, families } })
    }
}

fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

fn apply_mutations(rows: &mut BTreeMap<Bytes, RowCells>, row_key: &Bytes, mutations: &[Mutation], now: i64) {
    let cells = rows.entry(row_key.clone()).or_default();
    for mutation in mutations {
        match mutation {
            Mutation::SetCell { family_name, column_qualifier, timestamp_micros, value } => {
                let timestamp = if *timestamp_micros == SERVER_TIMESTAMP { now } else { *timestamp_micros };
                cells
                    .entry((family_name.clone(), column_qualifier.clone()))
                    .or_default()
                    .insert(Reverse(timestamp), value.clone());
            },
            Mutation::DeleteFromColumn { family_name, column_qualifier, time_range } => {
                let column = (family_name.clone(), column_qualifier.clone());
                match time_range {
                    None => {
                        cells.remove(&column);
                    },
                    Some(range) => {
                        if let Some(versions) = cells.get_mut(&column) {
                            versions.retain(|Reverse(ts), _| !range.contains(*ts));
                            if versions.is_empty() {
                                cells.remove(&column);
                            }
                        }
                    },
                }
            },
            Mutation::DeleteFromFamily { family_name } => {
                cells.retain(|(family, _), _| family != family_name);
            },
            Mutation::DeleteFromRow => cells.clear(),
        }
    }
    if cells.is_empty() {
        rows.remove(row_key);
    }
}

fn to_row(key: Bytes, cells: &RowCells) -> Row {
    Row::from_cells(
        key,
        cells.iter().flat_map(|((family, qualifier), versions)| {
            versions.iter().map(move |(Reverse(ts), value)| {
                Cell::new(family.clone(), qualifier.clone(), *ts, value.clone(), vec![])
            })
        }),
    )
}

fn row_size(key: &Bytes, cells: &RowCells) -> i64 {
    let value_bytes: usize = cells.values().flat_map(BTreeMap::values).map(Bytes::len).sum();
    i64::try_from(key.len() + value_bytes).unwrap_or(i64::MAX)
}

/// Encodes a stored row as the chunk sequence a server would send.
///
/// The family name is sent only when it changes, so the merger's carry-over
/// path is exercised.
fn row_chunks(key: &Bytes, cells: &RowCells, fragment_size: usize) -> Vec<CellChunk> {
    let mut chunks: Vec<CellChunk> = Vec::new();
    let mut last_family: Option<&str> = None;

    for ((family, qualifier), versions) in cells {
        for (Reverse(timestamp_micros), value) in versions {
            let fragments = split_value(value, fragment_size);
            let fragment_count = fragments.len();
            for (i, fragment) in fragments.into_iter().enumerate() {
                let mut chunk = CellChunk::continuation(fragment);
                if i == 0 {
                    if chunks.is_empty() {
                        chunk.row_key = key.clone();
                    }
                    if last_family != Some(family.as_str()) {
                        chunk.family_name = Some(family.clone());
                        last_family = Some(family.as_str());
                    }
                    chunk.qualifier = Some(qualifier.clone());
                    chunk.timestamp_micros = *timestamp_micros;
                }
                if i + 1 < fragment_count {
                    chunk.value_size = i32::try_from(value.len()).unwrap_or(i32::MAX);
                }
                chunks.push(chunk);
            }
        }
    }

    if let Some(last) = chunks.last_mut() {
        last.row_status = RowStatus::Commit;
    }
    chunks
}

fn split_value(value: &Bytes, fragment_size: usize) -> Vec<Bytes> {
    if fragment_size == 0 || value.len() <= fragment_size {
        return vec![value.clone()];
    }
    (0..value.len())
        .step_by(fragment_size)
        .map(|start| value.slice(start..(start + fragment_size).min(value.len())))
        .collect()
}
