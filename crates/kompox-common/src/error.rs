//! Error types shared across kompox crates
//!
//! Errors are structured with fields so a caller can tell which app, file or
//! setting was at fault without re-reading the input.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for shared kompox utilities
#[derive(Debug, Error)]
pub enum Error {
    /// Validation error for user supplied names and settings
    #[error("validation error for {context}: {message}")]
    Validation {
        /// What was being validated (app, volume, config name)
        context: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "volumes[0].name")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document kind being processed (if known)
        kind: Option<String>,
    },

    /// Invalid synthesis configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },

    /// Local filesystem error while reading source files
    #[error("io error for {path}: {message}")]
    Io {
        /// Path being accessed
        path: String,
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            context: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with context
    pub fn validation_for(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            context: context.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with context and field path
    pub fn validation_for_field(
        context: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            context: context.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with document kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an io error for a path
    pub fn io(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Io {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Get the validation context or io path if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Validation { context, .. } => Some(context),
            Error::Io { path, .. } => Some(path),
            _ => None,
        }
    }
}
