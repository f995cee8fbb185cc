//! Basic usage example demonstrating reads and writes against an in-memory table.
//!
//! Run: `cargo run --example basic_usage`
//!
//! This example shows:
//! - Client configuration with a custom retry policy
//! - Writing single rows and batches
//! - Scanning a key prefix while the stream is cut mid-read
//! - Atomic counters with read-modify-write

// Examples are allowed to use expect/unwrap for brevity
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::disallowed_methods)]

use std::{sync::Arc, time::Duration};

use bigtable_sdk::{
    ClientConfig, MutationEntry, ReadModifyWriteRule, ReadRowsOptions, Result, RetryPolicy, RowRange, RowSet,
    TableClient, mock::MockTransport,
};
use futures::TryStreamExt;

#[tokio::main]
async fn main() -> Result<()> {
    let transport = Arc::new(MockTransport::new());

    // -------------------------------------------------------------------------
    // 1. Create a client with configuration
    // -------------------------------------------------------------------------
    let config = ClientConfig::builder()
        .with_table_name("projects/demo/instances/demo/tables/users")
        .with_app_profile_id("basic-usage-example")
        .with_retry_policy(
            RetryPolicy::builder()
                .with_max_attempts(5)
                .with_initial_backoff(Duration::from_millis(20))
                .build(),
        )
        .build()?;
    let client = TableClient::new(Arc::clone(&transport), config);

    // -------------------------------------------------------------------------
    // 2. Write one row, then a batch
    // -------------------------------------------------------------------------
    client
        .mutate_row(MutationEntry::new("user#alice").set_cell("profile", "email", "alice@example.com", Some(1)))
        .await?;

    let batch: Vec<_> = ["bob", "carol", "dave", "erin"]
        .iter()
        .map(|name| {
            MutationEntry::new(format!("user#{name}")).set_cell("profile", "email", format!("{name}@example.com"), Some(1))
        })
        .collect();
    let statuses = client.mutate_rows(batch).await?;
    println!("Batch applied: {} of {} entries OK", statuses.iter().filter(|s| s.is_ok()).count(), statuses.len());

    // -------------------------------------------------------------------------
    // 3. Scan a prefix; the stream is cut after two rows and resumes
    // -------------------------------------------------------------------------
    transport.fail_read_after_rows(2, true);
    let options = ReadRowsOptions::new().with_rows(RowSet::from_ranges([RowRange::prefix("user#")]));
    let rows: Vec<_> = client.read_rows(options)?.try_collect().await?;
    for row in &rows {
        let email = row.latest("profile", b"email").map(|cell| String::from_utf8_lossy(cell.value()).into_owned());
        println!("  {} -> {}", String::from_utf8_lossy(row.key()), email.unwrap_or_default());
    }
    println!("Read {} rows over {} stream attempts", rows.len(), transport.read_rows_calls());

    // -------------------------------------------------------------------------
    // 4. Atomic counter
    // -------------------------------------------------------------------------
    for _ in 0..3 {
        client.read_modify_write_row("stats#logins", vec![ReadModifyWriteRule::increment("stats", "count", 1)]).await?;
    }
    let counter = client.read_row("stats#logins", None).await?.expect("counter row exists");
    let count = counter.latest("stats", b"count").expect("counter cell").value_as_i64()?;
    println!("Login count: {count}");

    Ok(())
}
