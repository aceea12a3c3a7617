//! Error types for trace replay operations
//!
//! Recoverable conditions (a decoder that cannot seek, a trace that cannot be
//! opened, a filter expression that does not parse) are reported through
//! [`TraceError`]. Programming errors in a collaborator, such as re-adding a
//! hook with a different priority, are not represented here: they panic at
//! the call site with a diagnostic message.
//!
//! # Error Codes
//!
//! Each variant has a stable error code (e.g. `SEEK_FAILED`) that drivers can
//! switch on or aggregate in logs.
//!
//! # Example
//!
//! ```rust
//! use tracekit_core::error::{ErrorCategory, TraceError};
//! use tracekit_core::TraceTime;
//!
//! let err = TraceError::SeekFailed {
//!     time: TraceTime::from_secs_nanos(3, 0),
//!     reason: "decoder refused".to_string(),
//! };
//! assert_eq!(err.category(), ErrorCategory::Seek);
//! assert_eq!(err.error_code(), "SEEK_FAILED");
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::time::TraceTime;

/// Result type alias for trace replay operations
pub type Result<T> = std::result::Result<T, TraceError>;

/// Error category for grouping related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Referenced trace, handle or field does not exist
    NotFound,
    /// Input (expression, literal, config) is malformed
    Validation,
    /// Reading or loading trace data failed
    Io,
    /// The decoder could not reposition its cursor
    Seek,
    /// Inconsistent internal state
    Internal,
}

/// Errors that can occur while building, replaying or seeking a traceset
#[derive(Error, Debug)]
pub enum TraceError {
    // ═══════════════════════════════════════════════════════════════════════
    // Traceset membership
    // ═══════════════════════════════════════════════════════════════════════

    /// No trace at the given index in the traceset
    #[error("Trace index {index} out of range: traceset holds {count} trace(s)")]
    TraceIndexOutOfRange { index: usize, count: usize },

    /// The decoder does not know this trace handle
    #[error("Unknown trace handle {handle}")]
    UnknownTraceHandle { handle: u32 },

    /// The decoder could not open a trace
    #[error("Failed to open trace '{path}': {reason}")]
    TraceOpenFailed { path: String, reason: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Cursor and seek
    // ═══════════════════════════════════════════════════════════════════════

    /// Seeking the merged cursor to a time failed
    #[error("Cannot seek to time {time}: {reason}")]
    SeekFailed { time: TraceTime, reason: String },

    /// Seeking the merged cursor to a saved position failed
    #[error("Cannot seek to position {position}: {reason}")]
    PositionSeekFailed { position: String, reason: String },

    /// Advancing or reading the cursor failed
    #[error("Cursor error: {reason}")]
    CursorError { reason: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Filter construction
    // ═══════════════════════════════════════════════════════════════════════

    /// Filter expression is not well formed
    #[error("Invalid filter expression '{expression}' at offset {offset}: {reason}")]
    FilterSyntax {
        expression: String,
        offset: usize,
        reason: String,
    },

    /// Field path does not resolve against the field catalog
    #[error("Unknown filter field '{path}'")]
    UnknownField { path: String },

    /// Literal cannot be converted to the field's type
    #[error("Invalid value '{value}' for field '{field}': {reason}")]
    InvalidLiteral {
        field: String,
        value: String,
        reason: String,
    },

    /// Relational operator not defined for the field's type
    #[error("Operator '{op}' is not supported on field '{field}'")]
    UnsupportedOperator { field: String, op: String },

    /// Event layout declaration is inconsistent
    #[error("Invalid layout for event '{event}': {reason}")]
    InvalidLayout { event: String, reason: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Infrastructure errors (configuration, serialization, I/O)
    // ═══════════════════════════════════════════════════════════════════════

    /// Engine configuration failed validation
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// JSON serialization or deserialization failed
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// I/O operation failed
    #[error("IO error: {message}")]
    IoError { message: String },

    /// Internal error that shouldn't happen
    #[error("Internal error: {reason}. This is a bug; please report it.")]
    InternalError { reason: String },
}

impl TraceError {
    /// Returns true if the caller may retry the operation, possibly with
    /// different arguments (another time, another position)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TraceError::SeekFailed { .. }
                | TraceError::PositionSeekFailed { .. }
                | TraceError::TraceIndexOutOfRange { .. }
        )
    }

    /// Returns the error category for grouping
    pub fn category(&self) -> ErrorCategory {
        match self {
            TraceError::TraceIndexOutOfRange { .. }
            | TraceError::UnknownTraceHandle { .. }
            | TraceError::UnknownField { .. } => ErrorCategory::NotFound,

            TraceError::FilterSyntax { .. }
            | TraceError::InvalidLiteral { .. }
            | TraceError::UnsupportedOperator { .. }
            | TraceError::InvalidLayout { .. }
            | TraceError::InvalidConfig { .. } => ErrorCategory::Validation,

            TraceError::TraceOpenFailed { .. }
            | TraceError::JsonError(_)
            | TraceError::IoError { .. } => ErrorCategory::Io,

            TraceError::SeekFailed { .. }
            | TraceError::PositionSeekFailed { .. }
            | TraceError::CursorError { .. } => ErrorCategory::Seek,

            TraceError::InternalError { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the stable error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            TraceError::TraceIndexOutOfRange { .. } => "TRACE_INDEX_OUT_OF_RANGE",
            TraceError::UnknownTraceHandle { .. } => "UNKNOWN_TRACE_HANDLE",
            TraceError::TraceOpenFailed { .. } => "TRACE_OPEN_FAILED",
            TraceError::SeekFailed { .. } => "SEEK_FAILED",
            TraceError::PositionSeekFailed { .. } => "POSITION_SEEK_FAILED",
            TraceError::CursorError { .. } => "CURSOR_ERROR",
            TraceError::FilterSyntax { .. } => "FILTER_SYNTAX",
            TraceError::UnknownField { .. } => "UNKNOWN_FIELD",
            TraceError::InvalidLiteral { .. } => "INVALID_LITERAL",
            TraceError::UnsupportedOperator { .. } => "UNSUPPORTED_OPERATOR",
            TraceError::InvalidLayout { .. } => "INVALID_LAYOUT",
            TraceError::InvalidConfig { .. } => "INVALID_CONFIG",
            TraceError::JsonError(_) => "JSON_ERROR",
            TraceError::IoError { .. } => "IO_ERROR",
            TraceError::InternalError { .. } => "INTERNAL_ERROR",
        }
    }

    /// Converts this error to a JSON-serializable report
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                category: self.category(),
                recoverable: self.is_recoverable(),
            },
        }
    }
}

impl From<std::io::Error> for TraceError {
    fn from(err: std::io::Error) -> Self {
        TraceError::IoError {
            message: err.to_string(),
        }
    }
}

/// JSON-serializable error report for drivers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Error detail for JSON reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable error code (e.g., "SEEK_FAILED")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Error category
    pub category: ErrorCategory,
    /// Whether retry might succeed
    pub recoverable: bool,
}
