// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for agent tracing.
//!
//! This module provides strongly-typed errors for the trace manager, the
//! persistence drivers and configuration loading, using `thiserror` for
//! ergonomic error definitions. The binary uses `anyhow` for propagation.

use thiserror::Error;

/// Errors returned by the trace manager and registry.
#[derive(Error, Debug)]
pub enum TraceError {
    /// The manager's cancellation signal fired before the operation began.
    #[error("Operation cancelled")]
    Cancelled,

    /// A persistence driver call failed.
    #[error("{context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: DriverError,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid operation: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl TraceError {
    /// Wrap a driver error with the operation that failed.
    pub fn persistence(context: impl Into<String>, source: DriverError) -> Self {
        Self::Persistence {
            context: context.into(),
            source,
        }
    }

    /// Create a not-found error for a node.
    pub fn node_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Node",
            id: id.into(),
        }
    }

    /// Create a not-found error for a space.
    pub fn space_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Space",
            id: id.into(),
        }
    }

    /// Create a not-found error for a trace.
    pub fn trace_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Trace",
            id: id.into(),
        }
    }

    /// Check if this error came from cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error came from the persistence layer.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }
}

/// Errors raised by persistence drivers.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Driver is closed")]
    Closed,

    #[error("Driver unavailable: {0}")]
    Unavailable(String),

    /// Failure produced on purpose by a driver's fault injection switch.
    #[error("Injected failure: {0}")]
    Injected(String),
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for DriverError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl ConfigError {
    /// Create an invalid value error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Result type alias for trace operations.
pub type Result<T> = std::result::Result<T, TraceError>;

/// Result type alias for driver operations.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_error_display() {
        let err = TraceError::persistence(
            "failed to save root node",
            DriverError::Io("disk full".to_string()),
        );
        assert_eq!(err.to_string(), "failed to save root node: IO error: disk full");
        assert!(err.is_persistence());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_not_found_helpers() {
        let err = TraceError::space_not_found("abc");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Space not found: abc");

        let err = TraceError::node_not_found("n1");
        assert_eq!(err.to_string(), "Node not found: n1");
    }

    #[test]
    fn test_cancelled() {
        assert!(TraceError::Cancelled.is_cancelled());
        assert!(!TraceError::Validation("x".to_string()).is_cancelled());
    }

    #[test]
    fn test_driver_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: DriverError = io_err.into();
        assert!(matches!(err, DriverError::Io(_)));
    }

    #[test]
    fn test_config_error_from_io_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ConfigError = io_err.into();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_config_error_invalid() {
        let err = ConfigError::invalid("historyLimit", "must be greater than zero");
        assert_eq!(
            err.to_string(),
            "Invalid value for historyLimit: must be greater than zero"
        );
    }
}
