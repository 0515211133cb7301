//! Error types for the DDNS-SD system
//!
//! The variants mirror the failure classes the event loop and the backends
//! agree on: transient conditions are retried inside the backend, conflicts
//! trigger a re-read, invariant violations and untracked events are dropped
//! with a warning, and fatal conditions terminate the daemon.

use thiserror::Error;

/// Result type alias for DDNS-SD operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the DDNS-SD system
#[derive(Error, Debug)]
pub enum Error {
    /// Momentary failure (throttling, 5xx, deadlock); retried with backoff
    #[error("transient error: {0}")]
    Transient(String),

    /// Another writer changed the observed state; re-read and retry
    #[error("conflicting write detected: {0}")]
    Conflict(String),

    /// A precondition the zone is supposed to guarantee does not hold
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// An event referenced a container this daemon is not tracking
    #[error("untracked container: {0}")]
    NotTracked(String),

    /// Unrecoverable condition (credentials, missing schema); terminates the loop
    #[error("fatal error: {0}")]
    Fatal(String),

    /// "Can't happen" branch; logged loudly, loop continues
    #[error("internal error (please report): {0}")]
    Bug(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Container-runtime query or stream errors
    #[error("container runtime error: {0}")]
    Runtime(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a transient error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create an invariant-violation error
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Create a not-tracked error
    pub fn not_tracked(msg: impl Into<String>) -> Self {
        Self::NotTracked(msg.into())
    }

    /// Create a fatal error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Create a bug error
    pub fn bug(msg: impl Into<String>) -> Self {
        Self::Bug(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a container-runtime error
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Whether this error must terminate the event loop
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Whether this error is worth another attempt after a pause
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Whether this error calls for a re-read of the remote state
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Fatal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_predicates() {
        assert!(Error::fatal("no credentials").is_fatal());
        assert!(!Error::transient("throttled").is_fatal());
        assert!(Error::transient("throttled").is_transient());
        assert!(Error::conflict("rrset moved").is_conflict());
        assert!(!Error::invariant("base domain missing").is_fatal());
    }
}
