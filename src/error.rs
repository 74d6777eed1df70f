//! Error types for tproxy-ctl
//!
//! Errors are grouped by subsystem. Kernel-facing errors (firewall, routing,
//! forwarding) never escape the controller: they are folded into a
//! [`TransitionOutcome`](crate::controller::TransitionOutcome). The only
//! controller error callers see is a failure to persist the requested state.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

/// Errors from running an external tool (`nft`, `ip`, `sysctl`)
#[derive(Debug, Error)]
pub enum CommandError {
    /// The process could not be started
    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// The process did not finish in time and was killed
    #[error("{program} timed out after {}ms", .timeout.as_millis())]
    Timeout { program: String, timeout: Duration },

    /// The process exited with a non-zero status
    #[error("{program} exited with {status}: {}", output_summary(.stdout, .stderr))]
    Failed {
        program: String,
        status: String,
        stdout: String,
        stderr: String,
    },
}

impl CommandError {
    /// Combined stdout/stderr of a failed command, empty for spawn/timeout errors
    #[must_use]
    pub fn output(&self) -> String {
        match self {
            Self::Failed { stdout, stderr, .. } => output_summary(stdout, stderr),
            _ => String::new(),
        }
    }

    /// Whether the tool reported that the object already exists (`EEXIST`)
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        self.output().contains("exists")
    }

    /// Whether the tool reported that the object does not exist (`ENOENT`/`ESRCH`)
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        let output = self.output();
        output.contains("No such file or directory")
            || output.contains("No such process")
            || output.contains("does not exist")
    }
}

fn output_summary(stdout: &str, stderr: &str) -> String {
    match (stdout.trim(), stderr.trim()) {
        ("", "") => "(no output)".to_string(),
        (out, "") => out.to_string(),
        ("", err) => err.to_string(),
        (out, err) => format!("{err}\n{out}"),
    }
}

/// Firewall (nftables) errors
#[derive(Debug, Error)]
pub enum FirewallError {
    /// Loading the ruleset failed
    #[error("nftables ruleset rejected: {0}")]
    Apply(CommandError),

    /// Deleting the rule namespace failed for a reason other than absence
    #[error("Failed to delete table {table}: {source}")]
    Clear {
        table: String,
        #[source]
        source: CommandError,
    },
}

impl FirewallError {
    /// Raw tool output for diagnosis
    #[must_use]
    pub fn tool_output(&self) -> String {
        match self {
            Self::Apply(e) | Self::Clear { source: e, .. } => e.output(),
        }
    }
}

/// Policy routing errors
#[derive(Debug, Error)]
pub enum RouteError {
    /// The rule or route is already installed
    #[error("{what} already exists")]
    AlreadyExists { what: String },

    /// The rule or route is not installed
    #[error("{what} not found")]
    NotFound { what: String },

    /// Any other failure from the routing tool
    #[error("{what}: {source}")]
    Command {
        what: String,
        #[source]
        source: CommandError,
    },
}

impl RouteError {
    /// Classify a command failure for the given routing object
    pub fn from_command(what: impl Into<String>, source: CommandError) -> Self {
        let what = what.into();
        if source.is_already_exists() {
            Self::AlreadyExists { what }
        } else if source.is_not_found() {
            Self::NotFound { what }
        } else {
            Self::Command { what, source }
        }
    }
}

/// State store errors
#[derive(Debug, Error)]
pub enum StateError {
    /// Reading or writing the state file failed
    #[error("State file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The state file exists but does not parse
    #[error("Corrupt state file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Serializing the state failed
    #[error("Failed to serialize state: {0}")]
    Serialize(String),
}

/// IPC communication errors
#[derive(Debug, Error)]
pub enum IpcError {
    /// Failed to create Unix socket
    #[error("Failed to create IPC socket at {path}: {reason}")]
    SocketCreation { path: String, reason: String },

    /// Failed to bind Unix socket
    #[error("Failed to bind IPC socket to {path}: {reason}")]
    BindError { path: String, reason: String },

    /// Connection error
    #[error("IPC connection error: {0}")]
    ConnectionError(String),

    /// Protocol error (invalid message format)
    #[error("IPC protocol error: {0}")]
    ProtocolError(String),

    /// Serialization error
    #[error("IPC serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("IPC I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl IpcError {
    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> CommandError {
        CommandError::Failed {
            program: "ip".into(),
            status: "exit status: 2".into(),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn test_route_error_classification() {
        let err = RouteError::from_command("ipv4 local route", failed("RTNETLINK answers: File exists"));
        assert!(matches!(err, RouteError::AlreadyExists { .. }));

        let err = RouteError::from_command("ipv4 fwmark rule", failed("RTNETLINK answers: No such file or directory"));
        assert!(matches!(err, RouteError::NotFound { .. }));

        let err = RouteError::from_command("ipv6 local route", failed("RTNETLINK answers: Permission denied"));
        assert!(matches!(err, RouteError::Command { .. }));
    }

    #[test]
    fn test_command_error_display_includes_output() {
        let err = CommandError::Failed {
            program: "nft".into(),
            status: "exit status: 1".into(),
            stdout: String::new(),
            stderr: "Error: Could not process rule: No such file or directory".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("nft"));
        assert!(msg.contains("Could not process rule"));
        assert!(err.is_not_found());
        assert!(!err.is_already_exists());
    }

    #[test]
    fn test_timeout_has_no_output() {
        let err = CommandError::Timeout {
            program: "nft".into(),
            timeout: Duration::from_secs(10),
        };
        assert!(err.to_string().contains("10000ms"));
        assert!(err.output().is_empty());
        assert!(!err.is_not_found());

        let fw = FirewallError::Apply(err);
        assert!(fw.tool_output().is_empty());
    }

    #[test]
    fn test_route_error_keeps_command_source() {
        let err = RouteError::from_command(
            "ipv4 fwmark rule",
            failed("RTNETLINK answers: Operation not permitted"),
        );
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert!(source.unwrap().contains("Operation not permitted"));
    }
}
