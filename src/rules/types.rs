//! Mode, scope and listen-port types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default TPROXY listen port of the proxy engine
pub const DEFAULT_TPROXY_PORT: u16 = 7893;

/// Default REDIRECT listen port of the proxy engine
pub const DEFAULT_REDIR_PORT: u16 = 7892;

/// Interception technique
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// No interception; the rule namespace and policy routes are absent
    #[default]
    Off,

    /// TPROXY transparent redirection (TCP and UDP), needs fwmark policy routing
    Tproxy,

    /// NAT REDIRECT to a local port (TCP only)
    Redirect,
}

impl Mode {
    /// All modes in declaration order
    pub const ALL: [Self; 3] = [Self::Off, Self::Tproxy, Self::Redirect];

    /// Wire name of the mode
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Tproxy => "tproxy",
            Self::Redirect => "redirect",
        }
    }

    /// Whether this mode installs any kernel state
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Whether this mode needs the fwmark routing table
    #[must_use]
    pub const fn needs_policy_routing(self) -> bool {
        matches!(self, Self::Tproxy)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "tproxy" => Ok(Self::Tproxy),
            "redirect" => Ok(Self::Redirect),
            _ => Err(UnknownVariant::new("mode", s)),
        }
    }
}

/// Which traffic is intercepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Only traffic originated by this host (output hook)
    #[default]
    Local,

    /// Host traffic plus traffic routed through this host (prerouting + output)
    Router,
}

impl Scope {
    /// Wire name of the scope
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Router => "router",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "local" => Ok(Self::Local),
            "router" => Ok(Self::Router),
            _ => Err(UnknownVariant::new("scope", s)),
        }
    }
}

/// Unrecognized mode or scope name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// The user-selected interception state
///
/// `scope` is kept while `mode` is `off` but has no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransparentProxyState {
    /// Interception technique
    pub mode: Mode,

    /// Interception scope
    #[serde(default)]
    pub scope: Scope,
}

impl TransparentProxyState {
    /// Create a state value
    #[must_use]
    pub const fn new(mode: Mode, scope: Scope) -> Self {
        Self { mode, scope }
    }
}

impl fmt::Display for TransparentProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mode, self.scope)
    }
}

/// Listen ports of the proxy engine, per mode
///
/// A zero port means "not configured" and resolves to the built-in default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenPorts {
    /// TPROXY inbound port
    #[serde(default = "default_tproxy_port")]
    pub tproxy_port: u16,

    /// REDIRECT inbound port
    #[serde(default = "default_redir_port")]
    pub redir_port: u16,
}

impl ListenPorts {
    /// Resolve the port used by `mode`, `None` for `off`
    #[must_use]
    pub const fn resolve(&self, mode: Mode) -> Option<u16> {
        match mode {
            Mode::Off => None,
            Mode::Tproxy => Some(if self.tproxy_port == 0 {
                DEFAULT_TPROXY_PORT
            } else {
                self.tproxy_port
            }),
            Mode::Redirect => Some(if self.redir_port == 0 {
                DEFAULT_REDIR_PORT
            } else {
                self.redir_port
            }),
        }
    }
}

impl Default for ListenPorts {
    fn default() -> Self {
        Self {
            tproxy_port: DEFAULT_TPROXY_PORT,
            redir_port: DEFAULT_REDIR_PORT,
        }
    }
}

const fn default_tproxy_port() -> u16 {
    DEFAULT_TPROXY_PORT
}

const fn default_redir_port() -> u16 {
    DEFAULT_REDIR_PORT
}
