//! Error types for wirepack
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using WireError
pub type Result<T> = std::result::Result<T, WireError>;

/// Unified error type for wirepack operations
#[derive(Debug, Error)]
pub enum WireError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Schema / Metadata Errors (programmer errors, surfaced to the caller)
    // -------------------------------------------------------------------------
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// A guard ran against an instance of a type other than the one it was
    /// declared for. Schemas built through `Member` always hand guards
    /// their declared owner, so this signals a hand-assembled descriptor.
    #[error("Guard invocation failed: {0}")]
    GuardInvocation(String),

    #[error("Converter conflict: {0}")]
    ConverterConflict(String),

    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    // -------------------------------------------------------------------------
    // Codec Errors
    // -------------------------------------------------------------------------
    #[error("Truncated buffer: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    // -------------------------------------------------------------------------
    // Protocol / Network Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Network error: {0}")]
    Network(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl WireError {
    /// True for failures caused by the bytes on the wire rather than by
    /// schema or converter setup.
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            WireError::Truncated { .. } | WireError::Decode(_) | WireError::Protocol(_)
        )
    }
}
