//! Assembled rows and cells.
//!
//! A [`Row`] is what a read returns once every chunk for a row key has been
//! received and the server has committed it. Cells are grouped by column
//! family; within a family they keep the order in which they arrived.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{InvalidValueLengthSnafu, Result};

/// A single versioned value at (family, qualifier, timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    family: String,
    qualifier: Bytes,
    timestamp_micros: i64,
    value: Bytes,
    labels: Vec<String>,
}

impl Cell {
    /// Creates a cell from its fully assembled parts.
    pub fn new(
        family: impl Into<String>,
        qualifier: impl Into<Bytes>,
        timestamp_micros: i64,
        value: impl Into<Bytes>,
        labels: Vec<String>,
    ) -> Self {
        Self {
            family: family.into(),
            qualifier: qualifier.into(),
            timestamp_micros,
            value: value.into(),
            labels,
        }
    }

    /// Returns the column family name.
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Returns the column qualifier.
    pub fn qualifier(&self) -> &Bytes {
        &self.qualifier
    }

    /// Returns the cell timestamp in microseconds since the Unix epoch.
    pub fn timestamp_micros(&self) -> i64 {
        self.timestamp_micros
    }

    /// Returns the cell timestamp as a UTC datetime.
    ///
    /// Returns `None` when the microsecond value is outside chrono's
    /// representable range.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.timestamp_micros)
    }

    /// Returns the assembled cell value.
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Returns the labels applied by the read filter.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Decodes the value as a big-endian signed 64-bit integer.
    ///
    /// Counters written by increment rules are stored in this encoding.
    ///
    /// # Errors
    ///
    /// Returns [`TypeError::InvalidValueLength`](crate::TypeError::InvalidValueLength)
    /// if the value is not exactly 8 bytes long.
    pub fn value_as_i64(&self) -> Result<i64> {
        let bytes: [u8; 8] = self.value.as_ref().try_into().map_err(|_| {
            InvalidValueLengthSnafu { expected: 8usize, actual: self.value.len() }.build()
        })?;
        Ok(i64::from_be_bytes(bytes))
    }
}

/// A complete, committed row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    key: Bytes,
    cells: BTreeMap<String, Vec<Cell>>,
}

impl Row {
    /// Creates an empty row for the given key.
    pub fn new(key: impl Into<Bytes>) -> Self {
        Self { key: key.into(), cells: BTreeMap::new() }
    }

    /// Creates a row from a key and a sequence of cells in arrival order.
    pub fn from_cells(key: impl Into<Bytes>, cells: impl IntoIterator<Item = Cell>) -> Self {
        let mut row = Self::new(key);
        for cell in cells {
            row.push_cell(cell);
        }
        row
    }

    /// Appends a cell to the end of its family's cell list.
    pub fn push_cell(&mut self, cell: Cell) {
        self.cells.entry(cell.family.clone()).or_default().push(cell);
    }

    /// Returns the row key.
    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// Returns every family with its cells.
    pub fn cells_by_family(&self) -> &BTreeMap<String, Vec<Cell>> {
        &self.cells
    }

    /// Returns the cells of one family, or an empty slice if the family is absent.
    pub fn cells(&self, family: &str) -> &[Cell] {
        self.cells.get(family).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns the names of the families present in this row.
    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    /// Iterates over every cell, family by family.
    pub fn iter_cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values().flatten()
    }

    /// Returns the first cell for (family, qualifier), which is the newest
    /// version when the server returns versions in descending timestamp order.
    pub fn latest(&self, family: &str, qualifier: &[u8]) -> Option<&Cell> {
        self.cells(family).iter().find(|cell| cell.qualifier.as_ref() == qualifier)
    }

    /// Returns the total number of cells.
    pub fn cell_count(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }

    /// Returns true if the row holds no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::TypeError;

    fn cell(family: &str, qualifier: &str, ts: i64, value: &'static [u8]) -> Cell {
        Cell::new(family, Bytes::copy_from_slice(qualifier.as_bytes()), ts, value, vec![])
    }

    #[test]
    fn test_value_as_i64_decodes_big_endian() {
        let c = cell("cf", "counter", 0, &[0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(c.value_as_i64().unwrap(), 258);

        let negative = Cell::new("cf", "n", 0, (-5i64).to_be_bytes().to_vec(), vec![]);
        assert_eq!(negative.value_as_i64().unwrap(), -5);
    }

    #[test]
    fn test_value_as_i64_rejects_wrong_length() {
        let short = cell("cf", "q", 0, b"abc");
        assert_eq!(
            short.value_as_i64(),
            Err(TypeError::InvalidValueLength { expected: 8, actual: 3 })
        );

        let long = cell("cf", "q", 0, b"123456789");
        assert!(matches!(long.value_as_i64(), Err(TypeError::InvalidValueLength { actual: 9, .. })));
    }

    #[test]
    fn test_timestamp_conversion() {
        let c = cell("cf", "q", 1_500_000, b"v");
        let ts = c.timestamp().unwrap();
        assert_eq!(ts.timestamp(), 1);
        assert_eq!(ts.timestamp_subsec_micros(), 500_000);
    }

    #[test]
    fn test_row_groups_cells_by_family_in_arrival_order() {
        let row = Row::from_cells(
            "rk",
            [
                cell("b", "q1", 2, b"1"),
                cell("a", "q1", 1, b"2"),
                cell("b", "q0", 3, b"3"),
            ],
        );

        assert_eq!(row.key().as_ref(), b"rk");
        assert_eq!(row.families().collect::<Vec<_>>(), vec!["a", "b"]);
        let b_values: Vec<_> = row.cells("b").iter().map(|c| c.value().clone()).collect();
        assert_eq!(b_values, vec![Bytes::from_static(b"1"), Bytes::from_static(b"3")]);
        assert_eq!(row.cell_count(), 3);
        assert!(row.cells("missing").is_empty());
    }

    #[test]
    fn test_latest_returns_first_matching_version() {
        let row = Row::from_cells("rk", [cell("cf", "q", 20, b"new"), cell("cf", "q", 10, b"old")]);
        assert_eq!(row.latest("cf", b"q").unwrap().value().as_ref(), b"new");
        assert!(row.latest("cf", b"other").is_none());
    }

    #[test]
    fn test_row_serializes_key_and_families() {
        let row = Row::from_cells("rk", [cell("cf", "q", 1, b"v")]);
        let json = serde_json::to_value(&row).unwrap();
        assert!(json.get("key").is_some());
        assert!(json["cells"].get("cf").is_some());
    }
}
