//! Resumable row reads.
//!
//! [`RetryingRowReader`] drives one logical read: it opens the streaming
//! read RPC, feeds every chunk through a [`ChunkMerger`], and hands complete
//! rows to the caller. When the stream fails with a transient error it backs
//! off, asks the [`ScanCursor`] what is left, and reopens the stream for
//! exactly that remainder. Rows are never delivered twice.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────┐  open ok   ┌───────────┐  stream end   ┌──────────┐
//! │ Opening  │ ─────────▶ │ Streaming │ ────────────▶ │ Finished │
//! └──────────┘            └───────────┘               └──────────┘
//!      ▲                        │ transient error           ▲
//!      │    backoff + resume    │                           │
//!      └────────────────────────┴───────────────────────────┘
//!                                   nothing left / failure
//! ```

use std::{collections::VecDeque, sync::Arc, time::Instant};

use bigtable_types::Row;
use futures::{StreamExt, stream::BoxStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::RetryPolicy,
    cursor::{ResumePlan, ScanCursor},
    error::{Result, SdkError},
    merger::ChunkMerger,
    metrics::SdkMetrics,
    retry::{RetryDecision, backoff_delay, classify, finalize_error, sleep_cancellable},
    transport::{DataTransport, ReadRowsRequest, ReadRowsResponse, ResponseStream},
};

/// A finite, single-pass stream of committed rows.
pub type RowStream = BoxStream<'static, Result<Row>>;

const METHOD: &str = "read_rows";

/// Drives one logical read across stream interruptions.
pub struct RetryingRowReader<T: DataTransport + ?Sized> {
    transport: Arc<T>,
    original: ReadRowsRequest,
    policy: RetryPolicy,
    metrics: Arc<dyn SdkMetrics>,
    cancellation: Option<CancellationToken>,
    merger: ChunkMerger<Row>,
    cursor: ScanCursor,
    stream: Option<ResponseStream<ReadRowsResponse>>,
    next_request: Option<ReadRowsRequest>,
    ready: VecDeque<Row>,
    pending_error: Option<SdkError>,
    attempt: u32,
    attempt_history: Vec<(u32, String)>,
    started: Instant,
    finished: bool,
}

impl<T: DataTransport + ?Sized> RetryingRowReader<T> {
    /// Creates a reader for `request`. Nothing is sent until the first row is requested.
    pub fn new(
        transport: Arc<T>,
        request: ReadRowsRequest,
        policy: RetryPolicy,
        metrics: Arc<dyn SdkMetrics>,
    ) -> Self {
        Self {
            transport,
            next_request: Some(request.clone()),
            original: request,
            policy,
            metrics,
            cancellation: None,
            merger: ChunkMerger::new(),
            cursor: ScanCursor::new(),
            stream: None,
            ready: VecDeque::new(),
            pending_error: None,
            attempt: 0,
            attempt_history: Vec::new(),
            started: Instant::now(),
            finished: false,
        }
    }

    /// Stops the read with [`SdkError::Cancelled`] once `token` fires.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Returns the number of stream attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Returns the number of rows delivered so far.
    pub fn rows_returned(&self) -> i64 {
        self.cursor.rows_returned()
    }

    /// Returns the next committed row, or `None` once the read is complete.
    ///
    /// # Errors
    ///
    /// - [`SdkError::Protocol`] if the server broke the chunk protocol
    /// - [`SdkError::RetryExhausted`] if transient failures used up the retry budget
    /// - [`SdkError::Cancelled`] if the cancellation token fired
    /// - The transport error itself if it is not transient
    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.ready.pop_front() {
                self.metrics.record_rows_read(1);
                return Ok(Some(row));
            }
            if let Some(error) = self.pending_error.take() {
                return Err(error);
            }
            if self.finished {
                return Ok(None);
            }
            if self.cancellation.as_ref().is_some_and(CancellationToken::is_cancelled) {
                return Err(self.fail(SdkError::Cancelled));
            }

            if self.stream.is_none() {
                let Some(request) = self.next_request.take() else {
                    self.finish();
                    continue;
                };
                self.attempt += 1;
                match self.transport.read_rows(request).await {
                    Ok(stream) => self.stream = Some(stream),
                    Err(status) => self.handle_interruption(status.into()).await?,
                }
                continue;
            }

            match self.next_response().await? {
                Some(Ok(response)) => self.absorb(response),
                Some(Err(status)) => {
                    self.stream = None;
                    self.handle_interruption(status.into()).await?;
                },
                None => {
                    self.stream = None;
                    if let Err(e) = self.merger.validate_last_row_complete() {
                        return Err(self.fail(e));
                    }
                    self.finish();
                },
            }
        }
    }

    /// Converts the reader into a [`RowStream`].
    pub fn into_stream(self) -> RowStream
    where
        T: 'static,
    {
        futures::stream::try_unfold(self, |mut reader| async move {
            Ok(reader.next_row().await?.map(|row| (row, reader)))
        })
        .boxed()
    }

    async fn next_response(
        &mut self,
    ) -> Result<Option<std::result::Result<ReadRowsResponse, tonic::Status>>> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        let item = match &self.cancellation {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => None,
                    item = stream.next() => Some(item),
                }
            },
            None => Some(stream.next().await),
        };
        match item {
            Some(item) => Ok(item),
            None => Err(self.fail(SdkError::Cancelled)),
        }
    }

    /// Merges one response. Rows committed before a protocol violation are
    /// still delivered; the violation surfaces after them.
    fn absorb(&mut self, response: ReadRowsResponse) {
        for chunk in response.chunks {
            match self.merger.process(chunk) {
                Ok(Some(row)) => {
                    self.cursor.record(row.key());
                    self.ready.push_back(row);
                },
                Ok(None) => {},
                Err(e) => {
                    warn!(method = METHOD, attempt = self.attempt, error = %e, "aborting read on protocol violation");
                    self.pending_error = Some(self.fail(e));
                    return;
                },
            }
        }
    }

    async fn handle_interruption(&mut self, error: SdkError) -> Result<()> {
        let plan = self.cursor.recompute(self.original.rows_limit, &self.original.rows);

        match classify(&error, self.attempt, &self.policy, || plan != ResumePlan::Complete) {
            RetryDecision::Done => {
                debug!(
                    method = METHOD,
                    attempt = self.attempt,
                    rows_returned = self.cursor.rows_returned(),
                    error = %error,
                    "read interrupted after every requested row was returned"
                );
                self.finish();
                Ok(())
            },
            RetryDecision::Fail => {
                self.attempt_history.push((self.attempt, error.to_string()));
                if error.is_retryable() {
                    warn!(
                        method = METHOD,
                        attempts = self.attempt,
                        rows_returned = self.cursor.rows_returned(),
                        error = %error,
                        "read retry budget exhausted"
                    );
                }
                let history = std::mem::take(&mut self.attempt_history);
                let error = finalize_error(error, self.attempt, history);
                Err(self.fail(error))
            },
            RetryDecision::Retry => {
                let ResumePlan::Resume { rows_limit, rows } = plan else {
                    self.finish();
                    return Ok(());
                };
                self.attempt_history.push((self.attempt, error.to_string()));
                self.metrics.record_retry(METHOD, self.attempt, error.error_type());

                let delay = backoff_delay(&self.policy, self.attempt);
                debug!(
                    method = METHOD,
                    attempt = self.attempt,
                    backoff_ms = delay.as_millis() as u64,
                    rows_returned = self.cursor.rows_returned(),
                    last_key = ?self.cursor.last_key_read(),
                    error = %error,
                    "read stream interrupted, resuming after backoff"
                );
                if let Err(e) = sleep_cancellable(delay, self.cancellation.as_ref()).await {
                    return Err(self.fail(e));
                }

                self.merger.reset_to_new_row();
                self.next_request = Some(ReadRowsRequest { rows, rows_limit, ..self.original.clone() });
                Ok(())
            },
        }
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.metrics.record_request(METHOD, self.started.elapsed(), true);
        }
    }

    fn fail(&mut self, error: SdkError) -> SdkError {
        if !self.finished {
            self.finished = true;
            self.stream = None;
            self.metrics.record_request(METHOD, self.started.elapsed(), false);
        }
        error
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::disallowed_methods)]
mod tests {
    use std::time::Duration;

    use bigtable_types::{CellChunk, RowRange, RowSet};
    use futures::TryStreamExt;
    use tonic::{Code, Status};

    use super::*;
    use crate::{metrics::NoopSdkMetrics, mock::MockTransport};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    fn row_chunk(key: &'static str) -> CellChunk {
        CellChunk::cell(key, "cf", "q", 1, key).with_commit()
    }

    fn response(chunks: Vec<CellChunk>) -> std::result::Result<ReadRowsResponse, Status> {
        Ok(ReadRowsResponse { chunks })
    }

    fn reader(
        mock: &Arc<MockTransport>,
        request: ReadRowsRequest,
        max_attempts: u32,
    ) -> RetryingRowReader<MockTransport> {
        RetryingRowReader::new(Arc::clone(mock), request, fast_policy(max_attempts), Arc::new(NoopSdkMetrics))
    }

    async fn collect_keys(reader: RetryingRowReader<MockTransport>) -> Result<Vec<String>> {
        let rows: Vec<Row> = reader.into_stream().try_collect().await?;
        Ok(rows.iter().map(|r| String::from_utf8_lossy(r.key()).into_owned()).collect())
    }

    #[tokio::test]
    async fn test_reads_all_rows_without_interruption() {
        let mock = Arc::new(MockTransport::new());
        mock.script_read(vec![response(vec![row_chunk("a"), row_chunk("b")]), response(vec![row_chunk("c")])]);

        let keys = collect_keys(reader(&mock, ReadRowsRequest::default(), 3)).await.unwrap();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(mock.read_rows_calls(), 1);
    }

    #[tokio::test]
    async fn test_resumes_after_transient_error() {
        let mock = Arc::new(MockTransport::new());
        mock.script_read(vec![
            response(vec![row_chunk("a"), row_chunk("b")]),
            Err(Status::unavailable("connection reset")),
        ]);
        mock.script_read(vec![response(vec![row_chunk("c")])]);

        let keys = collect_keys(reader(&mock, ReadRowsRequest::default(), 3)).await.unwrap();
        assert_eq!(keys, vec!["a", "b", "c"]);

        let requests = mock.read_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].rows, RowSet::from_ranges([RowRange::starting_after("b")]));
    }

    #[tokio::test]
    async fn test_resumes_after_broken_call() {
        let mock = Arc::new(MockTransport::new());
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset by peer");
        mock.script_read(vec![response(vec![row_chunk("a")]), Err(Status::from_error(Box::new(reset)))]);
        mock.script_read(vec![response(vec![row_chunk("b")])]);

        let keys = collect_keys(reader(&mock, ReadRowsRequest::default(), 3)).await.unwrap();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(mock.read_rows_calls(), 2);
    }

    #[tokio::test]
    async fn test_partial_row_is_discarded_on_resume() {
        let mock = Arc::new(MockTransport::new());
        mock.script_read(vec![
            response(vec![row_chunk("a"), CellChunk::cell("b", "cf", "q", 1, "half").with_value_size(8)]),
            Err(Status::unavailable("gone")),
        ]);
        mock.script_read(vec![response(vec![CellChunk::cell("b", "cf", "q", 1, "complete").with_commit()])]);

        let rows: Vec<Row> = reader(&mock, ReadRowsRequest::default(), 3).into_stream().try_collect().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].latest("cf", b"q").unwrap().value().as_ref(), b"complete");
    }

    #[tokio::test]
    async fn test_exactly_max_attempts_are_made() {
        let mock = Arc::new(MockTransport::new());
        for _ in 0..5 {
            mock.script_read(vec![Err(Status::unavailable("down"))]);
        }

        let err = collect_keys(reader(&mock, ReadRowsRequest::default(), 3)).await.unwrap_err();
        assert_eq!(mock.read_rows_calls(), 3);
        match err {
            SdkError::RetryExhausted { attempts, attempt_history, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(attempt_history.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![1, 2, 3]);
            },
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let mock = Arc::new(MockTransport::new());
        mock.script_read(vec![Err(Status::permission_denied("nope"))]);

        let err = collect_keys(reader(&mock, ReadRowsRequest::default(), 3)).await.unwrap_err();
        assert!(matches!(err, SdkError::Rpc { code: Code::PermissionDenied, .. }));
        assert_eq!(mock.read_rows_calls(), 1);
    }

    #[tokio::test]
    async fn test_protocol_violation_is_not_retried() {
        let mock = Arc::new(MockTransport::new());
        mock.script_read(vec![response(vec![row_chunk("b"), row_chunk("a")])]);

        let err = collect_keys(reader(&mock, ReadRowsRequest::default(), 3)).await.unwrap_err();
        assert!(matches!(err, SdkError::Protocol { .. }));
        assert_eq!(mock.read_rows_calls(), 1);
    }

    #[tokio::test]
    async fn test_rows_committed_before_violation_are_delivered() {
        let mock = Arc::new(MockTransport::new());
        mock.script_read(vec![response(vec![row_chunk("a"), row_chunk("b"), row_chunk("b")])]);

        let mut reader = reader(&mock, ReadRowsRequest::default(), 3);
        assert_eq!(reader.next_row().await.unwrap().unwrap().key().as_ref(), b"a");
        assert_eq!(reader.next_row().await.unwrap().unwrap().key().as_ref(), b"b");
        let err = reader.next_row().await.unwrap_err();
        assert!(matches!(err, SdkError::Protocol { chunk_index: 3, .. }), "got {err:?}");
        assert!(reader.next_row().await.unwrap().is_none());
        assert_eq!(mock.read_rows_calls(), 1);
    }

    #[tokio::test]
    async fn test_delivered_rows_do_not_refill_budget() {
        let mock = Arc::new(MockTransport::new());
        for key in ["a", "b", "c", "d"] {
            mock.script_read(vec![response(vec![row_chunk(key)]), Err(Status::unavailable("flapping"))]);
        }

        let mut reader = reader(&mock, ReadRowsRequest::default(), 3);
        let mut keys = Vec::new();
        let err = loop {
            match reader.next_row().await {
                Ok(Some(row)) => keys.push(String::from_utf8_lossy(row.key()).into_owned()),
                Ok(None) => panic!("read completed despite a failing final attempt"),
                Err(e) => break e,
            }
        };

        assert_eq!(keys, vec!["a", "b", "c"]);
        assert!(matches!(err, SdkError::RetryExhausted { attempts: 3, .. }), "got {err:?}");
        assert_eq!(mock.read_rows_calls(), 3);
    }

    #[tokio::test]
    async fn test_truncated_stream_is_an_error() {
        let mock = Arc::new(MockTransport::new());
        mock.script_read(vec![response(vec![CellChunk::cell("a", "cf", "q", 1, "v")])]);

        let err = collect_keys(reader(&mock, ReadRowsRequest::default(), 3)).await.unwrap_err();
        assert!(matches!(err, SdkError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_limit_reached_before_error_completes() {
        let mock = Arc::new(MockTransport::new());
        mock.script_read(vec![response(vec![row_chunk("a"), row_chunk("b")]), Err(Status::unavailable("late"))]);

        let request = ReadRowsRequest { rows_limit: 2, ..ReadRowsRequest::default() };
        let keys = collect_keys(reader(&mock, request, 3)).await.unwrap();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(mock.read_rows_calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_reader_stops() {
        let mock = Arc::new(MockTransport::new());
        mock.script_read(vec![response(vec![row_chunk("a")])]);
        let token = CancellationToken::new();
        token.cancel();

        let err = collect_keys(reader(&mock, ReadRowsRequest::default(), 3).with_cancellation(token))
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::Cancelled));
        assert_eq!(mock.read_rows_calls(), 0);
    }

    #[tokio::test]
    async fn test_next_row_after_completion_returns_none() {
        let mock = Arc::new(MockTransport::new());
        mock.script_read(vec![response(vec![row_chunk("a")])]);

        let mut reader = reader(&mock, ReadRowsRequest::default(), 3);
        assert!(reader.next_row().await.unwrap().is_some());
        assert!(reader.next_row().await.unwrap().is_none());
        assert!(reader.next_row().await.unwrap().is_none());
        assert_eq!(reader.attempts(), 1);
        assert_eq!(reader.rows_returned(), 1);
    }
}
