//! Error taxonomy shared by every agent of the league.
//!
//! Each [`LeagueError`] maps to a wire [`ErrorCode`], so a failure raised on one agent can be
//! reported to the caller inside an `ERROR` message and rebuilt on the other side with the same
//! classification. Callers decide whether to retry with [`LeagueError::is_transient`], never by
//! matching on messages.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error codes carried by `ERROR` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed, missing or out-of-range field.
    #[serde(rename = "E_VALIDATION")]
    Validation,
    /// Unknown agent or invalid token.
    #[serde(rename = "E_AUTH")]
    Authentication,
    /// Agent id already registered.
    #[serde(rename = "E_DUPLICATE")]
    Duplicate,
    /// The destination did not answer in time.
    #[serde(rename = "E_TIMEOUT")]
    Timeout,
    /// The destination is in a state that will resolve by itself.
    #[serde(rename = "E_CONFLICT")]
    TransientConflict,
    /// The destination is overloaded.
    #[serde(rename = "E_BUSY")]
    Busy,
    /// Unexpected failure on the destination.
    #[serde(rename = "E_INTERNAL")]
    Internal,
    /// The destination cannot be reached.
    #[serde(rename = "E_UNAVAILABLE")]
    Unavailable,
    /// Action attempted against a match or round in the wrong state.
    #[serde(rename = "E_LIFECYCLE")]
    LifecycleConflict,
    /// Unknown match, round or league id.
    #[serde(rename = "E_NOT_FOUND")]
    NotFound,
}

impl ErrorCode {
    /// Whether a call that failed with this code may be attempted again.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::TransientConflict
                | Self::Busy
                | Self::Internal
                | Self::Unavailable
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "E_VALIDATION",
            Self::Authentication => "E_AUTH",
            Self::Duplicate => "E_DUPLICATE",
            Self::Timeout => "E_TIMEOUT",
            Self::TransientConflict => "E_CONFLICT",
            Self::Busy => "E_BUSY",
            Self::Internal => "E_INTERNAL",
            Self::Unavailable => "E_UNAVAILABLE",
            Self::LifecycleConflict => "E_LIFECYCLE",
            Self::NotFound => "E_NOT_FOUND",
        };
        f.write_str(s)
    }
}

/// Every failure a league operation can produce.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LeagueError {
    /// A field is missing, malformed or not one of the allowed literals.
    #[error("validation error: {0}")]
    Validation(String),

    /// The sender is unknown or presented the wrong token.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Re-registration of an id that already exists.
    #[error("agent '{0}' is already registered")]
    Duplicate(String),

    /// A retryable failure (see [`ErrorCode::is_transient`]).
    #[error("transient failure ({code}): {message}")]
    Transient {
        /// Which transient kind occurred.
        code: ErrorCode,
        /// Human readable detail.
        message: String,
    },

    /// The destination's circuit breaker is open; no network call was made.
    #[error("circuit open for '{0}'")]
    CircuitOpen(String),

    /// Action attempted in the wrong lifecycle state.
    #[error("lifecycle conflict: {0}")]
    LifecycleConflict(String),

    /// Unknown match, round or league id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Document store failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl LeagueError {
    /// Timeout waiting for `what`.
    pub fn timeout(what: impl fmt::Display) -> Self {
        Self::Transient {
            code: ErrorCode::Timeout,
            message: format!("no answer from {what} in time"),
        }
    }

    /// Destination could not be reached.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Transient {
            code: ErrorCode::Unavailable,
            message: message.into(),
        }
    }

    /// Rebuild an error from the code and message of an `ERROR` reply.
    pub fn from_remote(code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::Validation => Self::Validation(message),
            ErrorCode::Authentication => Self::Authentication(message),
            ErrorCode::Duplicate => Self::Duplicate(message),
            ErrorCode::LifecycleConflict => Self::LifecycleConflict(message),
            ErrorCode::NotFound => Self::NotFound(message),
            code => Self::Transient { code, message },
        }
    }

    /// Wire code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::Authentication(_) => ErrorCode::Authentication,
            Self::Duplicate(_) => ErrorCode::Duplicate,
            Self::Transient { code, .. } => *code,
            Self::CircuitOpen(_) => ErrorCode::Unavailable,
            Self::LifecycleConflict(_) => ErrorCode::LifecycleConflict,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Storage(_) => ErrorCode::Internal,
        }
    }

    /// Whether the resilience layer should attempt the call again. An open circuit is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient { code, .. } => code.is_transient(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for LeagueError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_codes() {
        for code in [
            ErrorCode::Timeout,
            ErrorCode::TransientConflict,
            ErrorCode::Busy,
            ErrorCode::Internal,
            ErrorCode::Unavailable,
        ] {
            assert!(code.is_transient(), "{code}");
            assert!(LeagueError::from_remote(code, String::new()).is_transient());
        }
        for code in [
            ErrorCode::Validation,
            ErrorCode::Authentication,
            ErrorCode::Duplicate,
            ErrorCode::LifecycleConflict,
            ErrorCode::NotFound,
        ] {
            assert!(!code.is_transient(), "{code}");
            let err = LeagueError::from_remote(code, "x".into());
            assert!(!err.is_transient());
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn circuit_open_fails_fast() {
        let err = LeagueError::CircuitOpen("tcp://p1".into());
        assert_eq!(err.code(), ErrorCode::Unavailable);
        assert!(!err.is_transient());
    }

    #[test]
    fn code_wire_names() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::LifecycleConflict).unwrap(),
            "\"E_LIFECYCLE\""
        );
        assert_eq!(ErrorCode::Busy.to_string(), "E_BUSY");
    }
}
