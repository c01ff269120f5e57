/*!
Error types for the keepsake core.
*/

use crate::validator::{Severity, ValidationError};
use thiserror::Error;

/// Result type used throughout the keepsake core.
pub type Result<T> = std::result::Result<T, KeepsakeError>;

/// Errors that can occur while persisting or recovering state.
#[derive(Error, Debug)]
pub enum KeepsakeError {
    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Compression/decompression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Stored payload does not hash to the checksum recorded alongside it
    #[error("Checksum mismatch for '{key}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// Invalid record or header format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Schema definition is inconsistent (bad default, bad path, bad bounds)
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Generic validation errors (configuration, arguments)
    #[error("Validation error: {0}")]
    Validation(String),

    /// A state document failed schema validation
    #[error("State failed validation with {} violation(s)", violations.len())]
    ValidationFailed { violations: Vec<ValidationError> },

    /// Structural damage beyond plain validation
    #[error("Corruption detected ({severity}): {}", issues.join("; "))]
    Corruption {
        severity: Severity,
        issues: Vec<String>,
    },

    /// The store is at its hard limit even after evicting stale backups
    #[error("Storage quota exceeded: {required} bytes required, {remaining} bytes remaining")]
    QuotaExceeded { required: u64, remaining: u64 },

    /// The underlying store cannot be reached at all
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Storage backend errors
    #[error("Storage error: {0}")]
    Storage(String),
}

impl KeepsakeError {
    /// Create a new compression error
    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Self::Compression(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new storage-unavailable error
    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new invalid format error
    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        Self::InvalidFormat(msg.into())
    }

    /// Create a new invalid schema error
    pub fn invalid_schema<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSchema(msg.into())
    }

    /// Whether the condition can be recovered from locally (repair, backup
    /// restore, pass-through or in-memory fallback) without caller action.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ValidationFailed { .. }
            | Self::ChecksumMismatch { .. }
            | Self::Compression(_)
            | Self::StorageUnavailable(_) => true,
            Self::Corruption { severity, .. } => *severity != Severity::Severe,
            _ => false,
        }
    }
}
