//! Error types for Matdar core operations.
//!
//! This module defines well-structured error types using `thiserror` for
//! library-level errors, while higher-level code (the CLI, trait
//! implementations for remote collaborators) can use `anyhow`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using MatdarError
pub type Result<T> = std::result::Result<T, MatdarError>;

/// The caller-visible error vocabulary.
///
/// Every [`MatdarError`] that reaches a caller maps onto one of these kinds,
/// which is what the sync state and refresh outcomes report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No source yields data; the host should block on "acquire data"
    SourceUnavailable,

    /// A sync attempt failed; the previous dataset is retained
    RefreshFailed,

    /// A name could not be transliterated; recovered per record
    TransliterationFailed,

    /// A record is missing required fields; indexed with defaults
    MalformedRecord,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::SourceUnavailable => write!(f, "source_unavailable"),
            ErrorKind::RefreshFailed => write!(f, "refresh_failed"),
            ErrorKind::TransliterationFailed => write!(f, "transliteration_failed"),
            ErrorKind::MalformedRecord => write!(f, "malformed_record"),
        }
    }
}

/// Core error types for Matdar operations.
#[derive(Error, Debug)]
pub enum MatdarError {
    // === Source Errors ===
    /// None of the cache, snapshot or remote produced any records
    #[error("no data source is available: {reason}")]
    SourceUnavailable { reason: String },

    /// Fetching from the remote store or persisting its result failed
    #[error("refresh failed during {stage}: {reason}")]
    RefreshFailed { stage: String, reason: String },

    // === Record Errors ===
    /// Devanagari to Latin transliteration could not be completed
    #[error("cannot transliterate {input:?}: {reason}")]
    TransliterationFailed { input: String, reason: String },

    /// A record lacks required fields or carries values of the wrong shape
    #[error("record at position {position} is missing {missing:?}, unusable {invalid:?}")]
    MalformedRecord {
        position: usize,
        missing: Vec<&'static str>,
        invalid: Vec<&'static str>,
    },

    // === Cache Errors ===
    /// A cached value exists but cannot be decoded
    #[error("cached value for {key} is corrupted: {reason}")]
    CacheCorrupted { key: String, reason: String },

    /// The cached record blob was written by a newer format version
    #[error("cache format version mismatch: found {found}, expected {expected}")]
    CacheVersionMismatch { found: u32, expected: u32 },

    // === Configuration Errors ===
    /// Configuration file parsing failed
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    // === I/O Errors ===
    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Serialization Errors ===
    /// Serialization/deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    // === Internal Errors ===
    /// Internal error that should not happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl MatdarError {
    /// Map this error onto the caller-visible [`ErrorKind`], if it has one.
    ///
    /// Infrastructure failures (I/O, corrupted cache values, serialization)
    /// surface as `RefreshFailed`: they can only reach a caller through a
    /// sync attempt or a cache write.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            MatdarError::SourceUnavailable { .. } => Some(ErrorKind::SourceUnavailable),
            MatdarError::RefreshFailed { .. }
            | MatdarError::CacheCorrupted { .. }
            | MatdarError::CacheVersionMismatch { .. }
            | MatdarError::Io(_)
            | MatdarError::Serialization(_) => Some(ErrorKind::RefreshFailed),
            MatdarError::TransliterationFailed { .. } => Some(ErrorKind::TransliterationFailed),
            MatdarError::MalformedRecord { .. } => Some(ErrorKind::MalformedRecord),
            MatdarError::ConfigError { .. } | MatdarError::Internal(_) => None,
        }
    }

    /// Create a refresh failure for the given stage
    pub fn refresh(stage: impl Into<String>, reason: impl fmt::Display) -> Self {
        MatdarError::RefreshFailed {
            stage: stage.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a transliteration failure
    pub fn transliteration(input: impl Into<String>, reason: impl Into<String>) -> Self {
        MatdarError::TransliterationFailed {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(reason: impl Into<String>) -> Self {
        MatdarError::Serialization(reason.into())
    }
}

impl From<bincode::Error> for MatdarError {
    fn from(err: bincode::Error) -> Self {
        MatdarError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for MatdarError {
    fn from(err: serde_json::Error) -> Self {
        MatdarError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = MatdarError::refresh("fetch", "connection reset");
        assert_eq!(err.kind(), Some(ErrorKind::RefreshFailed));

        let err = MatdarError::CacheCorrupted {
            key: "records".to_string(),
            reason: "bad checksum".to_string(),
        };
        assert_eq!(err.kind(), Some(ErrorKind::RefreshFailed));

        let err = MatdarError::transliteration("ा", "dangling vowel sign");
        assert_eq!(err.kind(), Some(ErrorKind::TransliterationFailed));

        let err = MatdarError::ConfigError {
            reason: "bad toml".to_string(),
        };
        assert_eq!(err.kind(), None);
    }

    #[test]
    fn test_display() {
        let err = MatdarError::MalformedRecord {
            position: 3,
            missing: vec!["name", "booth"],
            invalid: vec!["age"],
        };
        assert_eq!(
            err.to_string(),
            "record at position 3 is missing [\"name\", \"booth\"], unusable [\"age\"]"
        );
        assert_eq!(ErrorKind::SourceUnavailable.to_string(), "source_unavailable");
    }
}
