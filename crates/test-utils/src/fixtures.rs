//! Chunk-stream fixtures.
//!
//! Encodes [`Row`]s into the chunk sequences a server would send, so tests
//! can state expectations in terms of rows and feed the merger the wire form.

use bigtable_types::{CellChunk, Row, RowStatus};
use bytes::Bytes;

/// Fully qualified table name used across tests.
pub const TEST_TABLE: &str = "projects/test-project/instances/test-instance/tables/test-table";

/// Encodes `row` as a committed chunk sequence.
///
/// Values longer than `fragment_size` bytes are split across chunks; zero
/// sends every value whole. The row key appears only on the first chunk, the
/// family only when it changes, and the qualifier only when it changes.
pub fn row_to_chunks(row: &Row, fragment_size: usize) -> Vec<CellChunk> {
    let mut chunks: Vec<CellChunk> = Vec::new();
    let mut previous: Option<(&str, &Bytes)> = None;

    for cell in row.iter_cells() {
        let fragments = split(cell.value(), fragment_size);
        let last_fragment = fragments.len() - 1;

        for (i, fragment) in fragments.into_iter().enumerate() {
            let mut chunk = CellChunk::continuation(fragment);
            if i == 0 {
                if chunks.is_empty() {
                    chunk.row_key = row.key().clone();
                }
                match previous {
                    Some((family, _)) if family == cell.family() => {},
                    _ => chunk.family_name = Some(cell.family().to_owned()),
                }
                let same_column = previous
                    .is_some_and(|(family, qualifier)| family == cell.family() && qualifier == cell.qualifier());
                if !same_column {
                    chunk.qualifier = Some(cell.qualifier().clone());
                }
                chunk.timestamp_micros = cell.timestamp_micros();
                chunk.labels = cell.labels().to_vec();
            }
            if i < last_fragment {
                chunk.value_size = i32::try_from(cell.value().len()).unwrap_or(i32::MAX);
            }
            chunks.push(chunk);
        }
        previous = Some((cell.family(), cell.qualifier()));
    }

    if let Some(last) = chunks.last_mut() {
        last.row_status = RowStatus::Commit;
    }
    chunks
}

/// Returns the first `count` chunks of `row`'s encoding with no commit,
/// as sent before a server-side reset or an interrupted stream.
pub fn partial_row_chunks(row: &Row, fragment_size: usize, count: usize) -> Vec<CellChunk> {
    let mut chunks = row_to_chunks(row, fragment_size);
    chunks.truncate(count);
    for chunk in &mut chunks {
        chunk.row_status = RowStatus::None;
    }
    chunks
}

/// Encodes many rows back to back.
pub fn rows_to_chunks(rows: &[Row], fragment_size: usize) -> Vec<CellChunk> {
    rows.iter().flat_map(|row| row_to_chunks(row, fragment_size)).collect()
}

fn split(value: &Bytes, fragment_size: usize) -> Vec<Bytes> {
    if fragment_size == 0 || value.len() <= fragment_size {
        return vec![value.clone()];
    }
    value.chunks(fragment_size).map(|part| value.slice_ref(part)).collect()
}
