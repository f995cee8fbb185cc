//! Main `TableClient` implementation.
//!
//! Provides the high-level API for one table, orchestrating row reassembly,
//! scan resumption, batch retries and unary retries over a [`DataTransport`].

use std::{future::Future, sync::Arc, time::Instant};

use bigtable_types::{
    Mutation, MutationEntry, ReadModifyWriteRule, Row, RowFilter, RowSet,
};
use bytes::Bytes;
use futures::TryStreamExt;
use snafu::ensure;
use tokio_util::sync::CancellationToken;

use crate::{
    batch::BatchMutationRetrier,
    config::ClientConfig,
    error::{InvalidArgumentSnafu, Result, SdkError},
    reader::{RetryingRowReader, RowStream},
    retry::with_retry,
    transport::{
        CheckAndMutateRowRequest, DataTransport, EntryStatus, MutateRowRequest,
        ReadModifyWriteRowRequest, ReadRowsRequest, SampleRowKeysRequest,
    },
};

// =============================================================================
// Request Types
// =============================================================================

/// Scope of a streaming read.
///
/// # Example
///
/// ```
/// use bigtable_sdk::ReadRowsOptions;
/// use bigtable_types::{RowFilter, RowRange, RowSet};
///
/// let options = ReadRowsOptions::new()
///     .with_rows(RowSet::from_ranges([RowRange::prefix("user#")]))
///     .with_filter(RowFilter::cells_per_column(1))
///     .with_limit(100);
/// assert_eq!(options.rows_limit, 100);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadRowsOptions {
    /// Keys and ranges to read; empty reads the whole table.
    pub rows: RowSet,
    /// Filter applied server-side.
    pub filter: Option<RowFilter>,
    /// Maximum number of rows; zero means unlimited.
    pub rows_limit: i64,
}

impl ReadRowsOptions {
    /// Creates options that read the whole table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the read to `rows`.
    #[must_use]
    pub fn with_rows(mut self, rows: RowSet) -> Self {
        self.rows = rows;
        self
    }

    /// Applies `filter` to every row.
    #[must_use]
    pub fn with_filter(mut self, filter: RowFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Stops after `limit` rows.
    #[must_use]
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.rows_limit = limit;
        self
    }
}

/// One sampled split point of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowKeySample {
    /// Sampled row key; empty on the last sample, which marks the end of the table.
    pub row_key: Bytes,
    /// Approximate number of bytes stored before `row_key`.
    pub offset_bytes: i64,
}

// =============================================================================
// Client
// =============================================================================

/// Data client for a single table.
///
/// Cheap to clone; clones share the transport.
pub struct TableClient<T: DataTransport + ?Sized> {
    transport: Arc<T>,
    config: ClientConfig,
}

impl<T: DataTransport + ?Sized> Clone for TableClient<T> {
    fn clone(&self) -> Self {
        Self { transport: Arc::clone(&self.transport), config: self.config.clone() }
    }
}

impl<T: DataTransport + ?Sized> std::fmt::Debug for TableClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableClient").field("config", &self.config).finish_non_exhaustive()
    }
}

impl<T: DataTransport + ?Sized> TableClient<T> {
    /// Creates a client issuing calls through `transport`.
    pub fn new(transport: Arc<T>, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Streams the rows selected by `options`.
    ///
    /// Rows arrive in ascending key order, each complete and at most once,
    /// even when the underlying stream is interrupted and resumed.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::InvalidArgument` if `rows_limit` is negative. Errors
    /// raised while reading are yielded by the stream.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use futures::TryStreamExt;
    ///
    /// let mut rows = client.read_rows(ReadRowsOptions::new().with_limit(10))?;
    /// while let Some(row) = rows.try_next().await? {
    ///     println!("{:?}", row.key());
    /// }
    /// ```
    pub fn read_rows(&self, options: ReadRowsOptions) -> Result<RowStream>
    where
        T: 'static,
    {
        Ok(self.row_reader(options)?.into_stream())
    }

    /// Streams rows like [`read_rows`](Self::read_rows), stopping with
    /// `SdkError::Cancelled` once `token` fires, including during backoff.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::InvalidArgument` if `rows_limit` is negative.
    pub fn read_rows_with_token(
        &self,
        options: ReadRowsOptions,
        token: CancellationToken,
    ) -> Result<RowStream>
    where
        T: 'static,
    {
        Ok(self.row_reader(options)?.with_cancellation(token).into_stream())
    }

    /// Reads one row by key.
    ///
    /// Returns `Ok(None)` if the row does not exist or the filter removes
    /// every cell.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::InvalidArgument` if `row_key` is empty, or the read error.
    pub async fn read_row(&self, row_key: impl Into<Bytes>, filter: Option<RowFilter>) -> Result<Option<Row>> {
        let row_key = row_key.into();
        ensure!(!row_key.is_empty(), InvalidArgumentSnafu { message: "row_key cannot be empty" });

        let options = ReadRowsOptions { rows: RowSet::from_keys([row_key]), filter, rows_limit: 1 };
        let mut reader = self.row_reader(options)?;
        let row = reader.next_row().await?;
        // Drain to the end of the stream so the read records its outcome.
        while reader.next_row().await?.is_some() {}
        Ok(row)
    }

    /// Samples row keys that split the table into chunks of roughly equal size.
    ///
    /// The whole sample is retried on transient failures.
    ///
    /// # Errors
    ///
    /// Returns the RPC error, or `SdkError::RetryExhausted`.
    pub async fn sample_row_keys(&self) -> Result<Vec<RowKeySample>> {
        let request = SampleRowKeysRequest {
            table_name: self.config.table_name.clone(),
            app_profile_id: self.config.app_profile_id.clone(),
        };
        let transport = &self.transport;

        let sample = with_retry(&self.config.retry_policy, "sample_row_keys", self.config.metrics.as_ref(), || {
            let request = request.clone();
            async move {
                let stream = transport.sample_row_keys(request).await?;
                let samples: Vec<RowKeySample> = stream
                    .map_ok(|s| RowKeySample { row_key: s.row_key, offset_bytes: s.offset_bytes })
                    .try_collect()
                    .await?;
                Ok(samples)
            }
        });
        self.observe("sample_row_keys", sample).await
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Atomically applies `entry` to one row.
    ///
    /// Retried on transient failures only when every mutation is idempotent;
    /// an entry containing a server-timestamped `SetCell` is attempted once.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::InvalidArgument` for an empty key or mutation list,
    /// otherwise the RPC error or `SdkError::RetryExhausted`.
    pub async fn mutate_row(&self, entry: MutationEntry) -> Result<()> {
        ensure!(!entry.row_key.is_empty(), InvalidArgumentSnafu { message: "row_key cannot be empty" });
        ensure!(!entry.is_empty(), InvalidArgumentSnafu { message: "mutations cannot be empty" });

        let idempotent = entry.is_idempotent();
        let request = MutateRowRequest {
            table_name: self.config.table_name.clone(),
            app_profile_id: self.config.app_profile_id.clone(),
            entry,
        };
        let transport = &self.transport;

        if !idempotent {
            return self
                .observe("mutate_row", async { transport.mutate_row(request).await.map_err(SdkError::from) })
                .await;
        }

        let mutate = with_retry(&self.config.retry_policy, "mutate_row", self.config.metrics.as_ref(), || {
            let request = request.clone();
            async move { transport.mutate_row(request).await.map_err(SdkError::from) }
        });
        self.observe("mutate_row", mutate).await
    }

    /// Applies many row mutations, one status per entry in input order.
    ///
    /// Entries that fail transiently are resubmitted when idempotent. A
    /// failed entry shows up as a non-OK status, not as an `Err`.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::InvalidArgument` if an entry has no mutations, or the
    /// RPC error if the first round could not be sent at all.
    pub async fn mutate_rows(&self, entries: Vec<MutationEntry>) -> Result<Vec<EntryStatus>> {
        for (index, entry) in entries.iter().enumerate() {
            ensure!(
                !entry.row_key.is_empty() && !entry.is_empty(),
                InvalidArgumentSnafu { message: format!("entry {index} needs a row key and at least one mutation") }
            );
        }

        BatchMutationRetrier::new(
            Arc::clone(&self.transport),
            self.config.table_name.clone(),
            self.config.app_profile_id.clone(),
            self.config.retry_policy.clone(),
            Arc::clone(&self.config.metrics),
        )
        .apply(&entries)
        .await
    }

    /// Applies `true_mutations` if `predicate` yields any cell for the row,
    /// `false_mutations` otherwise. Returns whether the predicate matched.
    ///
    /// Without a predicate, the check passes if the row has any cell. Never
    /// retried.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::InvalidArgument` for an empty key or when both
    /// mutation lists are empty, otherwise the RPC error.
    pub async fn check_and_mutate_row(
        &self,
        row_key: impl Into<Bytes>,
        predicate: Option<RowFilter>,
        true_mutations: Vec<Mutation>,
        false_mutations: Vec<Mutation>,
    ) -> Result<bool> {
        let row_key = row_key.into();
        ensure!(!row_key.is_empty(), InvalidArgumentSnafu { message: "row_key cannot be empty" });
        ensure!(
            !true_mutations.is_empty() || !false_mutations.is_empty(),
            InvalidArgumentSnafu { message: "true_mutations and false_mutations cannot both be empty" }
        );

        let request = CheckAndMutateRowRequest {
            table_name: self.config.table_name.clone(),
            app_profile_id: self.config.app_profile_id.clone(),
            row_key,
            predicate_filter: predicate,
            true_mutations,
            false_mutations,
        };
        self.observe("check_and_mutate_row", async {
            self.transport.check_and_mutate_row(request).await.map_err(SdkError::from)
        })
        .await
    }

    /// Atomically applies append and increment `rules` to one row and returns
    /// the new contents of the modified cells. Never retried.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::InvalidArgument` for an empty key or rule list,
    /// otherwise the RPC error.
    pub async fn read_modify_write_row(
        &self,
        row_key: impl Into<Bytes>,
        rules: Vec<ReadModifyWriteRule>,
    ) -> Result<Row> {
        let row_key = row_key.into();
        ensure!(!row_key.is_empty(), InvalidArgumentSnafu { message: "row_key cannot be empty" });
        ensure!(!rules.is_empty(), InvalidArgumentSnafu { message: "rules cannot be empty" });

        let request = ReadModifyWriteRowRequest {
            table_name: self.config.table_name.clone(),
            app_profile_id: self.config.app_profile_id.clone(),
            row_key,
            rules,
        };
        self.observe("read_modify_write_row", async {
            let response = self.transport.read_modify_write_row(request).await?;
            Ok(Row::from(response.row))
        })
        .await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn row_reader(&self, options: ReadRowsOptions) -> Result<RetryingRowReader<T>> {
        ensure!(
            options.rows_limit >= 0,
            InvalidArgumentSnafu { message: format!("rows_limit cannot be negative: {}", options.rows_limit) }
        );

        let request = ReadRowsRequest {
            table_name: self.config.table_name.clone(),
            app_profile_id: self.config.app_profile_id.clone(),
            rows: options.rows,
            filter: options.filter,
            rows_limit: options.rows_limit,
        };
        Ok(RetryingRowReader::new(
            Arc::clone(&self.transport),
            request,
            self.config.retry_policy.clone(),
            Arc::clone(&self.config.metrics),
        ))
    }

    /// Runs a unary operation, recording its latency and outcome.
    async fn observe<R, Fut>(&self, method: &str, operation: Fut) -> Result<R>
    where
        Fut: Future<Output = Result<R>>,
    {
        let started = Instant::now();
        let result = operation.await;
        self.config.metrics.record_request(method, started.elapsed(), result.is_ok());
        if let Err(e) = &result {
            tracing::debug!(method, error = %e, "request failed");
        }
        result
    }
}
