//! Shared test utilities for the Bigtable client crates.
//!
//! This crate provides common test helpers to reduce boilerplate across test modules:
//!
//! - [`row_to_chunks`] - Encode rows into the chunk sequences a server sends
//! - [`strategies`] - Proptest generators for rows, chunk streams and mutations
//! - [`TEST_TABLE`] - A well-formed table name

#![deny(unsafe_code)]
// Test utilities are allowed to use unwrap for simplicity
#![cfg_attr(test, allow(clippy::disallowed_methods))]

mod fixtures;
pub use fixtures::{TEST_TABLE, partial_row_chunks, row_to_chunks, rows_to_chunks};

pub mod strategies;
