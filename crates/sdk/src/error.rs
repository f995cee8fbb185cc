//! SDK-specific error types with retry classification.
//!
//! Provides a two-tier error model:
//! - **Transport errors**: gRPC status codes and dropped calls, some retryable
//! - **Protocol errors**: Chunk streams that violate the row reassembly rules, never retryable
//!
//! [`SdkError::is_retryable`] is the single classification used by the row
//! reader, the batch mutation retrier and unary retries.

use std::error::Error as _;

use bigtable_types::TypeError;
use snafu::Snafu;
use tonic::Code;

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;

/// SDK error types with context-rich error messages.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SdkError {
    /// gRPC RPC error with status code.
    #[snafu(display("RPC error (code={code:?}): {message}"))]
    Rpc {
        /// gRPC status code.
        code: Code,
        /// Error message from server.
        message: String,
    },

    /// The call failed below the gRPC layer (connection reset, broken
    /// HTTP/2 stream) before the server produced a status.
    #[snafu(display("Stream disconnected: {message}"))]
    StreamDisconnected {
        /// Error description.
        message: String,
    },

    /// The chunk stream violated the row reassembly protocol.
    ///
    /// The merger state can no longer be trusted, so the read is not resumed.
    /// Callers that want to retry must start a fresh read.
    #[snafu(display("Protocol violation at chunk {chunk_index}: {reason}"))]
    Protocol {
        /// One-based position of the offending chunk within the current attempt.
        chunk_index: u64,
        /// Rule that was violated.
        reason: String,
    },

    /// Retry attempts exhausted.
    #[snafu(display("Retry exhausted after {attempts} attempts: {last_error}"))]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last error message before giving up.
        last_error: String,
        /// Every failed attempt as `(attempt, error message)`.
        attempt_history: Vec<(u32, String)>,
    },

    /// Configuration validation error.
    #[snafu(display("Configuration error: {message}"))]
    Config {
        /// Error description.
        message: String,
    },

    /// A request argument was rejected before sending.
    #[snafu(display("Invalid argument: {message}"))]
    InvalidArgument {
        /// Error description.
        message: String,
    },

    /// A cell value could not be decoded.
    #[snafu(display("Invalid value length: expected {expected} bytes, got {actual}"))]
    InvalidValueLength {
        /// Required length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// The caller cancelled the operation.
    #[snafu(display("Operation cancelled"))]
    Cancelled,
}

/// Returns true if a gRPC status code denotes a transient failure.
///
/// Retryable codes:
/// - `UNAVAILABLE`: Server temporarily unreachable
/// - `DEADLINE_EXCEEDED`: Call deadline elapsed
/// - `ABORTED`: Call aborted by the server (retry may succeed)
pub fn is_retryable_code(code: Code) -> bool {
    matches!(code, Code::Unavailable | Code::DeadlineExceeded | Code::Aborted)
}

impl SdkError {
    /// Returns true if the error is transient and the operation should be retried.
    ///
    /// Retryable errors:
    /// - Dropped calls ([`SdkError::StreamDisconnected`])
    /// - RPC errors whose code satisfies [`is_retryable_code`]
    ///
    /// Non-retryable errors:
    /// - `INVALID_ARGUMENT`, `PERMISSION_DENIED`, `NOT_FOUND` and every other code
    /// - Protocol violations: the read must restart, not resume
    /// - `RetryExhausted`: the budget is already spent
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StreamDisconnected { .. } => true,
            Self::Rpc { code, .. } => is_retryable_code(*code),
            Self::Protocol { .. } => false,
            Self::RetryExhausted { .. } => false,
            Self::Config { .. } => false,
            Self::InvalidArgument { .. } => false,
            Self::InvalidValueLength { .. } => false,
            Self::Cancelled => false,
        }
    }

    /// Returns the gRPC status code if this is an RPC error.
    #[must_use]
    pub fn code(&self) -> Option<Code> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns a short label for metrics and logs.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::StreamDisconnected { .. } => "stream_disconnected",
            Self::Rpc { code: Code::Unavailable, .. } => "unavailable",
            Self::Rpc { code: Code::DeadlineExceeded, .. } => "deadline_exceeded",
            Self::Rpc { code: Code::Aborted, .. } => "aborted",
            Self::Rpc { .. } => "rpc",
            Self::Protocol { .. } => "protocol",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::Config { .. } => "config",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::InvalidValueLength { .. } => "invalid_value_length",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<TypeError> for SdkError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::InvalidValueLength { expected, actual } => {
                Self::InvalidValueLength { expected, actual }
            },
            TypeError::InvalidArgument { message } => Self::InvalidArgument { message },
        }
    }
}

impl From<tonic::Status> for SdkError {
    /// Maps a status to [`SdkError::Rpc`], except a client-side `UNKNOWN`
    /// status carrying a transport error, which tonic synthesizes when the
    /// call itself broke.
    fn from(status: tonic::Status) -> Self {
        if status.code() == Code::Unknown && status.source().is_some() {
            return Self::StreamDisconnected { message: status.message().to_owned() };
        }
        Self::Rpc { code: status.code(), message: status.message().to_owned() }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn rpc(code: Code) -> SdkError {
        SdkError::Rpc { code, message: "test".to_owned() }
    }

    #[test]
    fn test_rpc_error_retryable_unavailable() {
        assert!(rpc(Code::Unavailable).is_retryable());
    }

    #[test]
    fn test_rpc_error_retryable_deadline_exceeded() {
        assert!(rpc(Code::DeadlineExceeded).is_retryable());
    }

    #[test]
    fn test_rpc_error_retryable_aborted() {
        assert!(rpc(Code::Aborted).is_retryable());
    }

    #[test]
    fn test_rpc_error_non_retryable_codes() {
        for code in [
            Code::InvalidArgument,
            Code::PermissionDenied,
            Code::Unauthenticated,
            Code::NotFound,
            Code::ResourceExhausted,
            Code::Internal,
        ] {
            assert!(!rpc(code).is_retryable(), "{code:?} should not be retryable");
        }
    }

    #[test]
    fn test_transport_failure_maps_to_stream_disconnected() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset by peer");
        let status = tonic::Status::from_error(Box::new(io));
        assert_eq!(status.code(), Code::Unknown);

        let err = SdkError::from(status);
        assert!(matches!(err, SdkError::StreamDisconnected { .. }), "got {err:?}");
        assert!(err.is_retryable());
        assert_eq!(err.error_type(), "stream_disconnected");
    }

    #[test]
    fn test_server_unknown_status_stays_rpc() {
        let err = SdkError::from(tonic::Status::unknown("handler panicked"));
        assert!(matches!(err, SdkError::Rpc { code: Code::Unknown, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_type_error() {
        let err: SdkError = TypeError::InvalidValueLength { expected: 8, actual: 3 }.into();
        assert!(matches!(err, SdkError::InvalidValueLength { expected: 8, actual: 3 }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_protocol_error_not_retryable() {
        let err = SdkError::Protocol { chunk_index: 3, reason: "duplicate row key".to_owned() };
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Protocol violation at chunk 3: duplicate row key");
    }

    #[test]
    fn test_retry_exhausted_not_retryable() {
        let err = SdkError::RetryExhausted {
            attempts: 3,
            last_error: "unavailable".to_owned(),
            attempt_history: vec![],
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_tonic_status() {
        let err: SdkError = tonic::Status::unavailable("server down").into();
        assert!(matches!(err, SdkError::Rpc { code: Code::Unavailable, .. }));
        assert!(err.is_retryable());
        assert_eq!(err.error_type(), "unavailable");
    }

    #[test]
    fn test_code_accessor() {
        assert_eq!(rpc(Code::NotFound).code(), Some(Code::NotFound));
        assert_eq!(SdkError::Cancelled.code(), None);
    }
}
