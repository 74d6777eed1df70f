//! Result of a mode transition

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FirewallError, RouteError};
use crate::rules::{Mode, Scope, TransparentProxyState};

/// Result code: kernel state matches the request
pub const CODE_SUCCESS: u8 = 0;

/// Result code: the request was rejected or could not be persisted
pub const CODE_ERROR: u8 = 1;

/// Result code: the request was persisted but kernel state is incomplete
pub const CODE_PARTIAL: u8 = 2;

/// How a transition ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Rules (and routes, for tproxy) are installed
    Applied,
    /// Mode is off and all kernel state is removed
    Cleared,
    /// The host cannot manage kernel rules; nothing was touched
    PlatformUnsupported,
    /// The ruleset was rejected
    RulesFailed,
    /// Rules are installed but policy routing is incomplete
    RoutingFailed,
}

impl OutcomeKind {
    /// Wire result code
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Applied | Self::Cleared | Self::PlatformUnsupported => CODE_SUCCESS,
            Self::RulesFailed | Self::RoutingFailed => CODE_PARTIAL,
        }
    }
}

/// Outcome of [`set_mode`](super::TransparentController::set_mode)
///
/// The requested state is always persisted by the time an outcome exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub kind: OutcomeKind,
    pub mode: Mode,
    pub scope: Scope,
    /// Listen port the rules point at, `None` for off or when no rules were built
    pub port: Option<u16>,
    pub message: String,
    /// Raw tool output for failed transitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TransitionOutcome {
    fn new(kind: OutcomeKind, state: TransparentProxyState, message: String) -> Self {
        Self {
            kind,
            mode: state.mode,
            scope: state.scope,
            port: None,
            message,
            detail: None,
        }
    }

    pub(crate) fn applied(state: TransparentProxyState, port: u16) -> Self {
        let message = match state.mode {
            Mode::Tproxy => "TPROXY mode enabled, nftables TPROXY rules applied".to_string(),
            Mode::Redirect => "REDIRECT mode enabled, nftables REDIRECT rules applied".to_string(),
            Mode::Off => "transparent proxy disabled, nftables rules cleared".to_string(),
        };
        Self {
            port: Some(port),
            ..Self::new(OutcomeKind::Applied, state, message)
        }
    }

    pub(crate) fn cleared(state: TransparentProxyState) -> Self {
        Self::new(
            OutcomeKind::Cleared,
            state,
            "transparent proxy disabled, nftables rules cleared".to_string(),
        )
    }

    pub(crate) fn platform_unsupported(state: TransparentProxyState, os: &str) -> Self {
        Self::new(
            OutcomeKind::PlatformUnsupported,
            state,
            format!("mode saved; {os} cannot manage nftables, no kernel rules were touched"),
        )
    }

    pub(crate) fn rules_failed(
        state: TransparentProxyState,
        port: u16,
        error: &FirewallError,
    ) -> Self {
        let output = error.tool_output();
        Self {
            port: Some(port),
            detail: (!output.is_empty()).then_some(output),
            ..Self::new(
                OutcomeKind::RulesFailed,
                state,
                format!("mode saved, but nftables rule application failed: {error}"),
            )
        }
    }

    pub(crate) fn routing_failed(state: TransparentProxyState, port: u16, error: &RouteError) -> Self {
        let detail = match error {
            RouteError::Command { source, .. } => Some(source.output()).filter(|o| !o.is_empty()),
            _ => None,
        };
        Self {
            port: Some(port),
            detail,
            ..Self::new(
                OutcomeKind::RoutingFailed,
                state,
                format!("mode saved and rules applied, but policy routing setup failed: {error}"),
            )
        }
    }

    /// Wire result code (0 or 2)
    #[must_use]
    pub const fn code(&self) -> u8 {
        self.kind.code()
    }

    /// Whether kernel state matches the request
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code() == CODE_SUCCESS
    }

    /// The state this outcome is for
    #[must_use]
    pub const fn state(&self) -> TransparentProxyState {
        TransparentProxyState::new(self.mode, self.scope)
    }
}

impl fmt::Display for TransitionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)
    }
}
