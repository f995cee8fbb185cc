//! Batch mutations with per-entry retry.
//!
//! The batch mutation RPC reports an independent status for every entry.
//! [`BatchMutationRetrier`] resubmits only the entries that failed
//! transiently and are safe to replay, mapping each round's response indices
//! back to positions in the caller's list.

use std::{sync::Arc, time::Instant};

use bigtable_types::MutationEntry;
use futures::StreamExt;
use tonic::Code;
use tracing::{debug, warn};

use crate::{
    config::RetryPolicy,
    error::{Result, SdkError},
    metrics::SdkMetrics,
    retry::backoff_delay,
    transport::{DataTransport, EntryStatus, MutateRowsRequest},
};

const METHOD: &str = "mutate_rows";

/// Applies a batch of row mutations, retrying transient per-entry failures.
pub struct BatchMutationRetrier<T: DataTransport + ?Sized> {
    transport: Arc<T>,
    table_name: String,
    app_profile_id: Option<String>,
    policy: RetryPolicy,
    metrics: Arc<dyn SdkMetrics>,
}

impl<T: DataTransport + ?Sized> BatchMutationRetrier<T> {
    /// Creates a retrier targeting `table_name`.
    pub fn new(
        transport: Arc<T>,
        table_name: impl Into<String>,
        app_profile_id: Option<String>,
        policy: RetryPolicy,
        metrics: Arc<dyn SdkMetrics>,
    ) -> Self {
        Self { transport, table_name: table_name.into(), app_profile_id, policy, metrics }
    }

    /// Applies `entries`, returning one status per entry in input order.
    ///
    /// An entry is resubmitted while its status is retryable, its mutations
    /// are idempotent, and the attempt budget lasts. Entries that still fail
    /// keep their last status; a failed entry is not an `Err`.
    ///
    /// # Errors
    ///
    /// Returns the RPC error if the first round could not be opened and the
    /// failure is not transient. Failures of later rounds are recorded as
    /// entry statuses instead.
    pub async fn apply(&self, entries: &[MutationEntry]) -> Result<Vec<EntryStatus>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let mut statuses: Vec<Option<EntryStatus>> = vec![None; entries.len()];
        let mut pending: Vec<usize> = (0..entries.len()).collect();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.run_round(entries, &pending).await {
                Ok(round) => {
                    for (position, status) in pending.iter().zip(round) {
                        statuses[*position] = Some(status);
                    }
                },
                Err(e) if attempt == 1 && !e.is_retryable() => {
                    self.metrics.record_request(METHOD, started.elapsed(), false);
                    return Err(e);
                },
                Err(e) => {
                    let status = status_from_error(&e);
                    for position in &pending {
                        statuses[*position] = Some(status.clone());
                    }
                },
            }

            let retryable: Vec<usize> = pending
                .iter()
                .copied()
                .filter(|&i| {
                    statuses[i].as_ref().is_some_and(EntryStatus::is_retryable) && entries[i].is_idempotent()
                })
                .collect();

            if retryable.is_empty() {
                break;
            }
            if attempt >= self.policy.max_attempts {
                warn!(
                    method = METHOD,
                    attempts = attempt,
                    failed_entries = retryable.len(),
                    "batch retry budget exhausted"
                );
                break;
            }

            self.metrics.record_retry(METHOD, attempt, "entry_failure");
            let delay = backoff_delay(&self.policy, attempt);
            debug!(
                method = METHOD,
                attempt,
                backoff_ms = delay.as_millis() as u64,
                retry_entries = retryable.len(),
                "resubmitting failed entries after backoff"
            );
            tokio::time::sleep(delay).await;
            pending = retryable;
        }

        let statuses: Vec<EntryStatus> =
            statuses.into_iter().map(|s| s.unwrap_or_else(missing_status)).collect();
        let success = statuses.iter().all(EntryStatus::is_ok);
        self.metrics.record_request(METHOD, started.elapsed(), success);
        Ok(statuses)
    }

    /// Sends one round for the entries at `positions`, returning a status per position.
    async fn run_round(&self, entries: &[MutationEntry], positions: &[usize]) -> Result<Vec<EntryStatus>> {
        let request = MutateRowsRequest {
            table_name: self.table_name.clone(),
            app_profile_id: self.app_profile_id.clone(),
            entries: positions.iter().map(|&i| entries[i].clone()).collect(),
        };

        let mut stream = self.transport.mutate_rows(request).await.map_err(SdkError::from)?;
        let mut round: Vec<Option<EntryStatus>> = vec![None; positions.len()];

        while let Some(item) = stream.next().await {
            match item {
                Ok(response) => {
                    for entry in response.entries {
                        match usize::try_from(entry.index).ok().and_then(|i| round.get_mut(i)) {
                            Some(slot) => *slot = Some(entry.status),
                            None => warn!(method = METHOD, index = entry.index, "ignoring status for unknown entry index"),
                        }
                    }
                },
                Err(status) => {
                    let status = EntryStatus::from(status);
                    for slot in round.iter_mut().filter(|slot| slot.is_none()) {
                        *slot = Some(status.clone());
                    }
                    break;
                },
            }
        }

        Ok(round.into_iter().map(|s| s.unwrap_or_else(missing_status)).collect())
    }
}

fn missing_status() -> EntryStatus {
    EntryStatus::new(Code::Internal, "no status returned")
}

fn status_from_error(error: &SdkError) -> EntryStatus {
    let code = error.code().unwrap_or(if error.is_retryable() { Code::Unavailable } else { Code::Unknown });
    EntryStatus::new(code, error.to_string())
}
