//! Error types for the RadioKit metadata listener

use std::fmt;

/// Result type alias for listener operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when using the metadata listener
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A supplied value has the wrong shape or is out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// `start()`/`stop()` called from a state where it is not legal
    #[error("Invalid transition: {0}")]
    InvalidTransition(&'static str),

    /// The channel join was refused or timed out
    #[error("Subscription failed: {0}")]
    SubscriptionFailure(SubscriptionFailure),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON payload could not be decoded
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Reason reported by the channel when this is a subscription failure
    pub fn subscription_reason(&self) -> Option<&str> {
        match self {
            Self::SubscriptionFailure(failure) => Some(failure.reason()),
            _ => None,
        }
    }
}

impl From<SubscriptionFailure> for Error {
    fn from(failure: SubscriptionFailure) -> Self {
        Self::SubscriptionFailure(failure)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Why a channel join did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionFailure {
    /// The server refused the join; the reason is passed through verbatim
    Rejected(String),
    /// No reply arrived before the join deadline
    Timeout,
}

impl SubscriptionFailure {
    /// The rejection reason, or the literal `timeout`
    pub fn reason(&self) -> &str {
        match self {
            Self::Rejected(reason) => reason,
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for SubscriptionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}
