//! Error types for the identity reconciler.
//!
//! Library crates use [`IdentityError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all identity operations.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The request carried neither an email nor a phone number.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Any failure inside the contact store, including a rolled-back unit of work.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, IdentityError>;

impl IdentityError {
    /// Create an invalid-input error from any displayable message.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
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

    /// Whether the caller supplied a bad request (as opposed to a server-side failure).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = IdentityError::invalid_input("email or phoneNumber is required");
        assert_eq!(
            err.to_string(),
            "invalid input: email or phoneNumber is required"
        );

        let err = IdentityError::Storage("UNIQUE constraint failed".into());
        assert!(err.to_string().starts_with("storage error:"));
    }

    #[test]
    fn only_invalid_input_is_client_error() {
        assert!(IdentityError::invalid_input("x").is_client_error());
        assert!(!IdentityError::Storage("x".into()).is_client_error());
        assert!(!IdentityError::config("x").is_client_error());
    }
}
