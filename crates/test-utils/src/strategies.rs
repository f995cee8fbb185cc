//! Proptest strategies for the Bigtable data model.
//!
//! Reusable generators for property-based testing across crates. Strategies produce
//! well-formed rows and protocol-valid chunk streams while exploring edge cases
//! (empty values, split values, repeated columns, server resets) through random variation.
//!
//! # Usage
//!
//! ```no_run
//! use bigtable_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(stream in strategies::arb_chunk_stream()) {
//!         // feed stream.chunks to a merger and compare with stream.rows
//!     }
//! }
//! ```

use bigtable_types::{Cell, CellChunk, MutationEntry, Row, TimestampRange};
use bytes::Bytes;
use proptest::prelude::*;

use crate::fixtures::{partial_row_chunks, row_to_chunks};

/// A chunk stream together with the rows it must reassemble into.
#[derive(Debug, Clone)]
pub struct ChunkStream {
    /// Committed rows in stream order.
    pub rows: Vec<Row>,
    /// Protocol-valid chunks encoding `rows`, possibly with reset rows interleaved.
    pub chunks: Vec<CellChunk>,
}

/// Generates an arbitrary row key of 1-8 characters matching `[a-z0-9]{1,8}`.
pub fn arb_row_key() -> impl Strategy<Value = Bytes> {
    "[a-z0-9]{1,8}".prop_map(Bytes::from)
}

/// Generates a column family name from a small fixed set, so rows share families.
pub fn arb_family() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["cf1".to_owned(), "cf2".to_owned(), "stats".to_owned()])
}

/// Generates a column qualifier of 0-6 random bytes.
pub fn arb_qualifier() -> impl Strategy<Value = Bytes> {
    proptest::collection::vec(any::<u8>(), 0..6).prop_map(Bytes::from)
}

/// Generates a cell value of 0-63 random bytes.
pub fn arb_value() -> impl Strategy<Value = Bytes> {
    proptest::collection::vec(any::<u8>(), 0..64).prop_map(Bytes::from)
}

/// Generates an arbitrary [`Cell`] with 0-1 labels.
pub fn arb_cell() -> impl Strategy<Value = Cell> {
    (
        arb_family(),
        arb_qualifier(),
        0i64..1_000_000_000_000,
        arb_value(),
        proptest::option::of("[a-z]{1,5}"),
    )
        .prop_map(|(family, qualifier, timestamp, value, label)| {
            Cell::new(family, qualifier, timestamp, value, label.into_iter().collect())
        })
}

/// Generates 1-5 rows with distinct keys in ascending order, each with 1-6 cells.
pub fn arb_rows() -> impl Strategy<Value = Vec<Row>> {
    proptest::collection::btree_set(arb_row_key(), 1..6).prop_flat_map(|keys| {
        let count = keys.len();
        proptest::collection::vec(proptest::collection::vec(arb_cell(), 1..6), count).prop_map(
            move |cells| {
                keys.iter()
                    .cloned()
                    .zip(cells)
                    .map(|(key, cells)| Row::from_cells(key, cells))
                    .collect::<Vec<_>>()
            },
        )
    })
}

/// Generates a valid chunk stream for [`arb_rows`] output.
///
/// Each row is encoded with its own fragment size (0 sends values whole) and
/// may be preceded by a partial copy of itself followed by a reset chunk.
pub fn arb_chunk_stream() -> impl Strategy<Value = ChunkStream> {
    arb_rows().prop_flat_map(|rows| {
        let count = rows.len();
        let encodings = proptest::collection::vec((0usize..6, proptest::option::of(1usize..8)), count);
        encodings.prop_map(move |encodings| {
            let mut chunks = Vec::new();
            for (row, (fragment_size, reset_after)) in rows.iter().zip(encodings) {
                if let Some(prefix) = reset_after {
                    let full_len = row_to_chunks(row, fragment_size).len();
                    let prefix = prefix.min(full_len.saturating_sub(1));
                    if prefix > 0 {
                        chunks.extend(partial_row_chunks(row, fragment_size, prefix));
                        chunks.push(CellChunk::reset());
                    }
                }
                chunks.extend(row_to_chunks(row, fragment_size));
            }
            ChunkStream { rows: rows.clone(), chunks }
        })
    })
}

/// Generates an idempotent [`MutationEntry`] with 1-4 mutations.
pub fn arb_idempotent_entry() -> impl Strategy<Value = MutationEntry> {
    (arb_row_key(), proptest::collection::vec((arb_family(), arb_qualifier(), arb_value(), 0i64..1_000_000), 1..4))
        .prop_map(|(key, sets)| {
            sets.into_iter().fold(MutationEntry::new(key), |entry, (family, qualifier, value, ts)| {
                entry.set_cell(family, qualifier, value, Some(ts))
            })
        })
}

/// Generates a [`MutationEntry`] mixing explicit and server-assigned timestamps and deletes.
pub fn arb_mutation_entry() -> impl Strategy<Value = MutationEntry> {
    (arb_row_key(), arb_family(), arb_qualifier(), arb_value(), proptest::option::of(0i64..1_000_000), any::<bool>())
        .prop_map(|(key, family, qualifier, value, timestamp, delete_old)| {
            let entry = MutationEntry::new(key).set_cell(family.clone(), qualifier.clone(), value, timestamp);
            if delete_old {
                entry.delete_from_column(family, qualifier, Some(TimestampRange::new(0, 1)))
            } else {
                entry
            }
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn rows_have_ascending_distinct_keys(rows in arb_rows()) {
            for pair in rows.windows(2) {
                prop_assert!(pair[0].key() < pair[1].key());
            }
            prop_assert!(rows.iter().all(|row| !row.is_empty()));
        }

        #[test]
        fn chunk_stream_commits_once_per_row(stream in arb_chunk_stream()) {
            let commits = stream.chunks.iter().filter(|c| c.commit_row()).count();
            prop_assert_eq!(commits, stream.rows.len());
        }

        #[test]
        fn idempotent_entries_are_idempotent(entry in arb_idempotent_entry()) {
            prop_assert!(entry.is_idempotent());
        }
    }
}
