//! Common error types for the Taskwire workspace.

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`TaskwireError`].
pub type TaskwireResult<T> = Result<T, TaskwireError>;

/// Errors raised while building, applying or tearing down task network wiring.
#[derive(Error, Diagnostic, Debug)]
pub enum TaskwireError {
    /// The elastic interface or base configuration cannot describe a valid
    /// plugin configuration.
    #[error("Malformed input: {message}")]
    #[diagnostic(
        code(taskwire::input::malformed),
        help("Task ENIs need exactly one primary and at least one secondary IPv4 address")
    )]
    MalformedInput {
        /// What was wrong with the input.
        message: String,
    },

    /// An address could not be parsed or used for address arithmetic.
    #[error("Invalid address: {address}")]
    #[diagnostic(code(taskwire::input::invalid_address))]
    InvalidAddress {
        /// The offending address.
        address: String,
    },

    /// A boundary call did not complete before its deadline.
    #[error("{operation} for '{interface}' timed out after {after:?}")]
    #[diagnostic(code(taskwire::timeout))]
    Timeout {
        /// The operation that was in flight (e.g. `ADD`, `exec start`).
        operation: String,
        /// Interface or command the operation was acting on.
        interface: String,
        /// The budget that elapsed.
        after: Duration,
    },

    /// A plugin invocation failed for a given interface.
    #[error("Plugin invocation failed for interface '{interface}': {source}")]
    #[diagnostic(code(taskwire::plugin::invocation))]
    PluginInvocation {
        /// Interface name of the failing configuration.
        interface: String,
        /// The underlying failure.
        #[source]
        source: Box<TaskwireError>,
    },

    /// A plugin ran and reported an error object.
    #[error("Plugin reported error {code}: {message}")]
    #[diagnostic(code(taskwire::plugin::reported))]
    PluginReported {
        /// Error code written by the plugin.
        code: u32,
        /// Error message written by the plugin.
        message: String,
    },

    /// An in-namespace or host command failed.
    #[error("Failed to execute command '{command}': {message}")]
    #[diagnostic(code(taskwire::exec::failed))]
    ExecutionFailure {
        /// The command line that failed.
        command: String,
        /// Why it failed.
        message: String,
    },

    /// The operation has no meaning on this host platform.
    #[error("Unsupported platform for {operation}")]
    #[diagnostic(
        code(taskwire::unsupported_platform),
        help("Branch on platform support instead of relying on a silent no-op")
    )]
    UnsupportedPlatform {
        /// The operation that was requested.
        operation: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(taskwire::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(taskwire::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(taskwire::serialization))]
    Serialization(String),
}

impl TaskwireError {
    /// Shorthand for [`TaskwireError::MalformedInput`].
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput {
            message: message.into(),
        }
    }

    /// Shorthand for [`TaskwireError::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this error, or the error it wraps, is a deadline expiry.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::PluginInvocation { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for TaskwireError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TaskwireError::UnsupportedPlatform {
            operation: "release ip".to_string(),
        };
        assert_eq!(err.to_string(), "Unsupported platform for release ip");
    }

    #[test]
    fn plugin_invocation_names_interface() {
        let err = TaskwireError::PluginInvocation {
            interface: "task".to_string(),
            source: Box::new(TaskwireError::PluginReported {
                code: 7,
                message: "no such bridge".to_string(),
            }),
        };
        assert_eq!(
            err.to_string(),
            "Plugin invocation failed for interface 'task': Plugin reported error 7: no such bridge"
        );
        assert!(!err.is_timeout());
    }

    #[test]
    fn wrapped_timeout_is_timeout() {
        let err = TaskwireError::PluginInvocation {
            interface: "nat".to_string(),
            source: Box::new(TaskwireError::Timeout {
                operation: "ADD".to_string(),
                interface: "nat".to_string(),
                after: Duration::from_secs(1),
            }),
        };
        assert!(err.is_timeout());
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TaskwireError = io_err.into();
        assert!(matches!(err, TaskwireError::Io(_)));
    }
}
