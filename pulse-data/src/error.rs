use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// All errors generated in `pulse-data`.
///
/// Clonable so a single failed upstream fetch can be handed to every caller waiting on the
/// same in-flight refresh.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum DataError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed data: {0}")]
    Malformed(String),

    #[error("upstream rate limited: {0}")]
    RateLimited(String),

    #[error("upstream permission denied: {0}")]
    Permission(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown horizon: {0}")]
    UnknownHorizon(String),
}

impl DataError {
    /// Determine if an error means the live feed connection is gone and must be re-established.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_terminal(&self) -> bool {
        match self {
            DataError::Timeout(_) => true,
            DataError::Transport(error_msg) => {
                let error_lower = error_msg.to_lowercase();
                error_lower.contains("terminated")
                    || error_lower.contains("connectionclosed")
                    || error_lower.contains("alreadyclosed")
                    || error_lower.contains("sendafterclosing")
                    || error_lower.contains("io(")
                    || error_lower.contains("timeout")
            }
            _ => false,
        }
    }

    /// Determine if the upstream explicitly refused the request. These are surfaced verbatim
    /// and never retried automatically.
    pub fn is_upstream_rejection(&self) -> bool {
        matches!(self, DataError::RateLimited(_) | DataError::Permission(_))
    }
}

impl From<reqwest::Error> for DataError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Malformed(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for DataError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(format!("{value:?}"))
    }
}

impl From<serde_json::Error> for DataError {
    fn from(value: serde_json::Error) -> Self {
        Self::Malformed(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_error_is_terminal() {
        struct TestCase {
            input: DataError,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: is terminal w/ DataError::Timeout
                input: DataError::Timeout(Duration::from_secs(120)),
                expected: true,
            },
            TestCase {
                // TC1: is not terminal w/ DataError::Transport (non-termination error)
                input: DataError::Transport("HTTP error: 502 Bad Gateway".to_string()),
                expected: false,
            },
            TestCase {
                // TC2: is terminal w/ DataError::Transport containing "ConnectionClosed"
                input: DataError::Transport("WebSocket error: ConnectionClosed".to_string()),
                expected: true,
            },
            TestCase {
                // TC3: is terminal w/ DataError::Transport containing "Io("
                input: DataError::Transport("Io(Kind(UnexpectedEof))".to_string()),
                expected: true,
            },
            TestCase {
                // TC4: is not terminal w/ DataError::Malformed
                input: DataError::Malformed("expected array".to_string()),
                expected: false,
            },
            TestCase {
                // TC5: is not terminal w/ DataError::RateLimited
                input: DataError::RateLimited("429 Too Many Requests".to_string()),
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.is_terminal();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_data_error_is_upstream_rejection() {
        assert!(DataError::RateLimited("429".to_string()).is_upstream_rejection());
        assert!(DataError::Permission("403".to_string()).is_upstream_rejection());
        assert!(!DataError::Transport("reset".to_string()).is_upstream_rejection());
        assert!(!DataError::InvalidInput("empty".to_string()).is_upstream_rejection());
    }
}
