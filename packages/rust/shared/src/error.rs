//! Error types for StudyKit.
//!
//! Library crates use [`StudyKitError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Every error maps onto an [`ErrorClass`], which decides retry eligibility
//! in the reasoning client and the message shown to the user.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all StudyKit operations.
#[derive(Debug, thiserror::Error)]
pub enum StudyKitError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The source document cannot be used (unsupported format, no text).
    #[error("unsupported input: {message}")]
    UnsupportedInput { message: String },

    /// The reasoning service signalled a quota or rate limit.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The service answered, but the payload broke the stage contract.
    #[error("schema violation in {contract}: {message}")]
    SchemaViolation {
        contract: &'static str,
        message: String,
    },

    /// Any other transport or service failure.
    #[error("reasoning service error: {0}")]
    Service(String),

    /// A stage or quiz generation did not finish within its time budget.
    #[error("{operation} timed out after {}s", after.as_secs())]
    Timeout { operation: String, after: Duration },

    /// An operation was invoked in a state that does not allow it.
    #[error("invalid state: {message}")]
    InvalidState { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, StudyKitError>;

impl StudyKitError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an unsupported-input error from any displayable message.
    pub fn unsupported_input(msg: impl Into<String>) -> Self {
        Self::UnsupportedInput {
            message: msg.into(),
        }
    }

    /// Create a schema violation for the named contract.
    pub fn schema(contract: &'static str, msg: impl Into<String>) -> Self {
        Self::SchemaViolation {
            contract,
            message: msg.into(),
        }
    }

    /// Create an invalid-state error from any displayable message.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The classification that drives retry and user messaging.
    pub fn classification(&self) -> ErrorClass {
        match self {
            Self::RateLimited(_) => ErrorClass::RateLimited,
            Self::SchemaViolation { .. } => ErrorClass::SchemaViolation,
            Self::UnsupportedInput { .. } => ErrorClass::UnsupportedInput,
            Self::Config { .. }
            | Self::Io { .. }
            | Self::Service(_)
            | Self::Timeout { .. }
            | Self::InvalidState { .. } => ErrorClass::Generic,
        }
    }

    /// Whether the reasoning client may retry the failed call.
    pub fn is_retryable(&self) -> bool {
        self.classification() == ErrorClass::RateLimited
    }
}

/// Error category used for retry eligibility and user-facing messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    RateLimited,
    SchemaViolation,
    Generic,
    UnsupportedInput,
}

impl ErrorClass {
    /// Short user-facing message for a failed analysis.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::RateLimited => "The reasoning service is rate limited. Please try again shortly.",
            Self::UnsupportedInput => {
                "The document could not be read. Please provide a text or Markdown file with content."
            }
            Self::SchemaViolation | Self::Generic => {
                "Analysis failed. Please try again with different content."
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::SchemaViolation => "schema_violation",
            Self::Generic => "generic",
            Self::UnsupportedInput => "unsupported_input",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
