//! IPC Protocol definitions
//!
//! This module defines the command and response types used for
//! inter-process communication via Unix socket.

use serde::{Deserialize, Serialize};

use crate::controller::{ControllerStatus, OutcomeKind, RulesetPreview, TransitionOutcome};
use crate::rules::{Mode, Scope};

/// IPC command types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcCommand {
    /// Ping to check if the server is alive
    Ping,

    /// Get daemon status
    Status,

    /// Switch the transparent proxy mode
    SetTransparentMode {
        /// `off`, `tproxy` or `redirect`
        mode: String,
        /// `local` or `router`; missing or empty means `local`
        #[serde(default)]
        scope: Option<String>,
    },

    /// Get the controller state and last transition outcome
    GetTransparentStatus,

    /// Render the ruleset for a mode without applying it
    PreviewRuleset {
        mode: String,
        #[serde(default)]
        scope: Option<String>,
        /// Override the configured listen port
        #[serde(default)]
        port: Option<u16>,
    },

    /// Stop the daemon. Installed rules are left in place.
    Shutdown,
}

/// IPC response types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Ping response
    Pong,

    /// Status response
    Status(ServerStatus),

    /// Result of `set_transparent_mode`
    TransparentResult(TransparentResult),

    /// Controller status
    TransparentStatus(ControllerStatus),

    /// Rendered ruleset
    Ruleset(RulesetPreview),

    /// Success response (for commands that don't return data)
    Success {
        /// Optional message
        message: Option<String>,
    },

    /// Error response
    Error(IpcError),
}

impl IpcResponse {
    /// Create a success response with no message
    pub fn success() -> Self {
        Self::Success { message: None }
    }

    /// Create a success response with a message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success {
            message: Some(msg.into()),
        }
    }

    /// Create an error response
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(IpcError {
            code,
            message: message.into(),
        })
    }

    /// Check if this is an error response
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Daemon status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Daemon version
    pub version: String,
    /// Uptime in seconds
    pub uptime_secs: u64,
    /// Current mode
    pub mode: Mode,
    /// Current scope
    pub scope: Scope,
    /// Whether kernel rules can be managed on this host
    pub platform_supported: bool,
    /// Whether shutdown is in progress
    pub shutting_down: bool,
}

/// Result of a mode change request
///
/// `code` is 0 on full success and 2 when the request was saved but kernel
/// state could not be fully applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransparentResult {
    pub code: u8,
    pub kind: OutcomeKind,
    pub message: String,
    pub mode: Mode,
    pub scope: Scope,
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<TransitionOutcome> for TransparentResult {
    fn from(outcome: TransitionOutcome) -> Self {
        Self {
            code: outcome.code(),
            kind: outcome.kind,
            message: outcome.message,
            mode: outcome.mode,
            scope: outcome.scope,
            port: outcome.port,
            detail: outcome.detail,
        }
    }
}

/// IPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcError {
    /// Error code
    pub code: ErrorCode,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for IpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for IpcError {}

/// Error codes for IPC responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Invalid command
    InvalidCommand,
    /// Invalid parameters
    InvalidParameters,
    /// Operation failed
    OperationFailed,
    /// Server is shutting down
    ShuttingDown,
}

/// Message framing for IPC
///
/// Messages are length-prefixed:
/// - 4 bytes: message length (big-endian u32)
/// - N bytes: JSON message
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024; // 1 MB
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Encode a message with length prefix
pub fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    let len = json.len() as u32;

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&json);

    Ok(buf)
}

/// Decode a length-prefixed message
pub fn decode_message<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(data)
}
