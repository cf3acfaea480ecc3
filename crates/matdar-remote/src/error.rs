//! Error types for the remote sources.

use matdar_core::MatdarError;
use thiserror::Error;

/// Errors raised while talking to remote sources.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The server answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// The request could not be completed
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The response body is not a record batch
    #[error("invalid record batch from {origin}: {source}")]
    Decode {
        origin: String,
        #[source]
        source: MatdarError,
    },

    /// A configured URL cannot be parsed
    #[error("invalid URL {url:?}: {reason}")]
    BadUrl { url: String, reason: String },

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// Whether the failure is likely transient (worth the next scheduled try)
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Status { status, .. } => *status >= 500 || *status == 429,
            RemoteError::Transport { source, .. } => source.is_timeout() || source.is_connect(),
            RemoteError::Io(_) => true,
            RemoteError::Decode { .. } | RemoteError::BadUrl { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let cases = [
            (503, true),
            (429, true),
            (500, true),
            (404, false),
            (401, false),
        ];
        for (status, transient) in cases {
            let err = RemoteError::Status {
                url: "http://example.org".to_string(),
                status,
            };
            assert_eq!(err.is_transient(), transient, "status {status}");
        }

        let err = RemoteError::BadUrl {
            url: "::".to_string(),
            reason: "relative URL without a base".to_string(),
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("invalid URL"));
    }
}
