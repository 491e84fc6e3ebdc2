//! Crate-wide error type and the classification taxonomy used by Finalization.
//!
//! Mirrors the hand-rolled `Display` + `std::error::Error` enum style used
//! throughout this codebase's ancestry rather than pulling in a derive-macro
//! error crate: one enum, one `Display` impl, `From` conversions at module
//! boundaries.

use std::fmt;

/// Result type used across the orchestration core.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification assigned to a terminating error, written into
/// `experiments.last_error.error_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ConfigMissing,
    ToolDispatchFailed,
    ToolInvalidInput,
    TransportTimeout,
    TransportError,
    RateLimited,
    SchemaError,
    AgentStalled,
    BudgetMoves,
    BudgetTime,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ConfigMissing => "CONFIG_MISSING",
            ErrorKind::ToolDispatchFailed => "TOOL_DISPATCH_FAILED",
            ErrorKind::ToolInvalidInput => "TOOL_INVALID_INPUT",
            ErrorKind::TransportTimeout => "TRANSPORT_TIMEOUT",
            ErrorKind::TransportError => "TRANSPORT_ERROR",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::SchemaError => "SCHEMA_ERROR",
            ErrorKind::AgentStalled => "AGENT_STALLED",
            ErrorKind::BudgetMoves => "BUDGET_MOVES",
            ErrorKind::BudgetTime => "BUDGET_TIME",
            ErrorKind::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

/// The single error type threaded through admission, the scheduler, the
/// invoker, the tool dispatcher, and the store.
#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub cause: String,
}

impl Error {
    pub fn new(kind: ErrorKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            cause: cause.into(),
        }
    }

    pub fn config_missing(cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigMissing, cause)
    }

    pub fn tool_dispatch_failed(cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::ToolDispatchFailed, cause)
    }

    pub fn tool_invalid_input(cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::ToolInvalidInput, cause)
    }

    pub fn internal(cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, cause)
    }

    /// The classification this error should be recorded under at Finalize
    /// time. Identity today, but kept as a named accessor since the
    /// classifier is conceptually a separate step from error construction
    /// (spec §4.6 "Finalization error classifier").
    pub fn classify(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.cause)
    }
}

impl std::error::Error for Error {}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::new(ErrorKind::ToolDispatchFailed, err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::new(ErrorKind::TransportTimeout, err.to_string())
        } else {
            Error::new(ErrorKind::TransportError, err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::new(ErrorKind::SchemaError, err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::new(ErrorKind::ConfigMissing, err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::Internal, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_cause() {
        let err = Error::config_missing("recall_interval missing");
        assert_eq!(err.to_string(), "CONFIG_MISSING: recall_interval missing");
    }

    #[test]
    fn classify_is_identity() {
        let err = Error::new(ErrorKind::BudgetMoves, "max_moves exceeded");
        assert_eq!(err.classify(), ErrorKind::BudgetMoves);
    }
}
