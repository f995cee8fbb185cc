//! Error types for the Bigtable data model using snafu.
//!
//! These errors cover local construction and decoding of data-model values
//! (cell value decoding, filter and range parameters). Transport and protocol
//! failures live in the SDK crate.

use snafu::Snafu;

/// Result type for data-model operations.
pub type Result<T, E = TypeError> = std::result::Result<T, E>;

/// Errors raised while building or decoding data-model values.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum TypeError {
    /// A cell value did not have the byte length required by the requested decoding.
    #[snafu(display("Invalid value length: expected {expected} bytes, got {actual}"))]
    InvalidValueLength {
        /// Required length in bytes.
        expected: usize,
        /// Actual length in bytes.
        actual: usize,
    },

    /// A filter or range parameter was outside its valid domain.
    #[snafu(display("Invalid argument: {message}"))]
    InvalidArgument {
        /// Error description.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_value_length_display() {
        let err = TypeError::InvalidValueLength { expected: 8, actual: 3 };
        assert_eq!(err.to_string(), "Invalid value length: expected 8 bytes, got 3");
    }

    #[test]
    fn test_invalid_argument_display() {
        let err = InvalidArgumentSnafu { message: "probability must be in (0, 1)" }.build();
        assert_eq!(err.to_string(), "Invalid argument: probability must be in (0, 1)");
    }
}
