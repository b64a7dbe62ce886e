/// Unified error handling for mongoctl
///
/// This module provides the error type shared by every layer: descriptor
/// validation, locality checks, authentication, topology commands and
/// process control.

use std::fmt;
use std::io;
use thiserror::Error;

/// Main error type for mongoctl operations
#[derive(Debug, Error)]
pub enum MongoctlError {
    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed or structurally invalid server/cluster descriptor
    #[error("Invalid descriptor: {message}")]
    Configuration { message: String },

    /// Destructive operation against a host that is not local
    #[error(
        "Cannot {operation} server '{server}' on this machine because server's address '{host}' \
         does not appear to be local to this machine. Pass the --assume-local option if you are \
         sure that this server should be running on this machine."
    )]
    NotLocal {
        operation: String,
        server: String,
        host: String,
    },

    /// No router answered a liveness probe
    #[error("Unable to connect to a mongos for cluster '{cluster}'")]
    NoRouterAvailable { cluster: String },

    /// Every credential attempt was exhausted
    #[error("Failed to authenticate to '{database}' db on server '{server}'")]
    Authentication { server: String, database: String },

    /// Shards are already present in the live topology
    #[error("Cannot configure shardset '{cluster}' that has been already configured")]
    AlreadyConfigured { cluster: String },

    /// Transport-level failure
    #[error("Cannot connect to '{address}'. Cause: {message}")]
    Connection { address: String, message: String },

    /// The server refused an operation because the connection is not authorized
    #[error("Not authorized on '{database}': {message}")]
    Unauthorized { database: String, message: String },

    /// An administrative command failed on the server
    #[error("Command '{command}' failed: {message}")]
    Command { command: String, message: String },

    /// Process start/stop failures
    #[error("Process error: {message}")]
    Process { message: String },

    /// A host name that cannot be resolved
    #[error("Invalid host '{host}'. Cause: {message}")]
    InvalidHost { host: String, message: String },

    /// Operation with no defined protocol
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Configuration-file errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for mongoctl operations
pub type MongoctlResult<T> = Result<T, MongoctlError>;

/// Convenience methods for creating specific error types
impl MongoctlError {
    /// Create a descriptor error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        MongoctlError::Configuration {
            message: message.into(),
        }
    }

    pub fn not_local<S: Into<String>>(operation: S, server: S, host: S) -> Self {
        MongoctlError::NotLocal {
            operation: operation.into(),
            server: server.into(),
            host: host.into(),
        }
    }

    pub fn no_router<S: Into<String>>(cluster: S) -> Self {
        MongoctlError::NoRouterAvailable {
            cluster: cluster.into(),
        }
    }

    pub fn authentication<S: Into<String>>(server: S, database: S) -> Self {
        MongoctlError::Authentication {
            server: server.into(),
            database: database.into(),
        }
    }

    pub fn already_configured<S: Into<String>>(cluster: S) -> Self {
        MongoctlError::AlreadyConfigured {
            cluster: cluster.into(),
        }
    }

    /// Create a connection error
    pub fn connection<S: Into<String>>(address: S, message: S) -> Self {
        MongoctlError::Connection {
            address: address.into(),
            message: message.into(),
        }
    }

    pub fn unauthorized<S: Into<String>>(database: S, message: S) -> Self {
        MongoctlError::Unauthorized {
            database: database.into(),
            message: message.into(),
        }
    }

    /// Create a command error
    pub fn command<S: Into<String>>(command: S, message: S) -> Self {
        MongoctlError::Command {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a process error
    pub fn process<S: Into<String>>(message: S) -> Self {
        MongoctlError::Process {
            message: message.into(),
        }
    }

    pub fn invalid_host<S: Into<String>>(host: S, message: S) -> Self {
        MongoctlError::InvalidHost {
            host: host.into(),
            message: message.into(),
        }
    }

    pub fn unsupported<S: Into<String>>(operation: S) -> Self {
        MongoctlError::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        MongoctlError::Timeout {
            operation: operation.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        MongoctlError::Internal {
            message: message.into(),
        }
    }

    /// True for the "not authorized" signal used to probe whether a db needs auth
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, MongoctlError::Unauthorized { .. })
    }

    /// True for transport failures (treated as an offline signal by probes)
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            MongoctlError::Connection { .. } | MongoctlError::Timeout { .. }
        )
    }

    /// Severity the CLI reports this error with. `Info` outcomes are no-ops.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            MongoctlError::Config(_) => ErrorSeverity::Critical,
            MongoctlError::Configuration { .. } => ErrorSeverity::Critical,
            MongoctlError::Internal { .. } => ErrorSeverity::Critical,
            MongoctlError::AlreadyConfigured { .. } => ErrorSeverity::Info,
            MongoctlError::Connection { .. } => ErrorSeverity::Warning,
            MongoctlError::Timeout { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that abort the current operation
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about no-op outcomes
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = MongoctlError::no_router("main");
        assert!(matches!(error, MongoctlError::NoRouterAvailable { .. }));
        assert_eq!(
            error.to_string(),
            "Unable to connect to a mongos for cluster 'main'"
        );
    }

    #[test]
    fn test_not_local_message_mentions_override() {
        let error = MongoctlError::not_local("stop", "shard1", "db1.example.com");
        let message = error.to_string();
        assert!(message.starts_with("Cannot stop server 'shard1'"));
        assert!(message.contains("--assume-local"));
    }

    #[test]
    fn test_error_severity() {
        let config_error = MongoctlError::Config(ConfigError::ValidationError("test".to_string()));
        assert_eq!(config_error.severity(), ErrorSeverity::Critical);

        let already = MongoctlError::already_configured("main");
        assert_eq!(already.severity(), ErrorSeverity::Info);

        let connection = MongoctlError::connection("localhost:27017", "refused");
        assert_eq!(connection.severity(), ErrorSeverity::Warning);
    }

    #[test]
    fn test_error_classification() {
        assert!(MongoctlError::unauthorized("admin", "requires authentication").is_unauthorized());
        assert!(MongoctlError::timeout("connect").is_connection());
        assert!(!MongoctlError::command("listShards", "failed").is_connection());
    }
}
