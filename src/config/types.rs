//! Configuration types for tproxy-ctl
//!
//! Configuration is loaded from a JSON file. Every section is optional and
//! falls back to the defaults below.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::rules::{ListenPorts, DEFAULT_TABLE_NAME};
use crate::state::DEFAULT_STATE_PATH;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Proxy engine listen ports
    #[serde(default)]
    pub ports: ListenPorts,

    /// nftables settings
    #[serde(default)]
    pub firewall: FirewallConfig,

    /// Policy routing settings
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Kernel tunables
    #[serde(default)]
    pub system: SystemConfig,

    /// External command execution
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Persisted mode/scope state
    #[serde(default)]
    pub state: StateConfig,

    /// IPC configuration
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.firewall.validate()?;
        self.routing.validate()?;
        self.system.validate()?;
        self.commands.validate()?;
        self.state.validate()?;
        self.ipc.validate()?;
        self.log.validate()?;
        Ok(())
    }

    /// Create a default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self::default()
    }
}

/// nftables configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FirewallConfig {
    /// Private `inet` table owned by this daemon
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Path or name of the `nft` binary
    #[serde(default = "default_nft_path")]
    pub nft_path: String,

    /// Replace the table inside the loading transaction
    #[serde(default = "default_true")]
    pub atomic_replace: bool,
}

impl FirewallConfig {
    /// Validate firewall configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_nft_identifier(&self.table_name) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid table name '{}': must start with a letter and contain only letters, digits or '_'",
                self.table_name
            )));
        }
        require_non_empty("firewall.nft_path", &self.nft_path)
    }
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            table_name: default_table_name(),
            nft_path: default_nft_path(),
            atomic_replace: true,
        }
    }
}

/// Policy routing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    /// Path or name of the `ip` binary
    #[serde(default = "default_ip_path")]
    pub ip_path: String,

    /// Install IPv6 rules and routes as well as IPv4
    #[serde(default = "default_true")]
    pub ipv6: bool,

    /// Upper bound on `ip rule del` repetitions per family
    #[serde(default = "default_rule_delete_attempts")]
    pub rule_delete_attempts: usize,
}

impl RoutingConfig {
    /// Validate routing configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("routing.ip_path", &self.ip_path)?;
        if self.rule_delete_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "rule_delete_attempts must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            ip_path: default_ip_path(),
            ipv6: true,
            rule_delete_attempts: default_rule_delete_attempts(),
        }
    }
}

/// Kernel tunables
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemConfig {
    /// Path or name of the `sysctl` binary
    #[serde(default = "default_sysctl_path")]
    pub sysctl_path: String,
}

impl SystemConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("system.sysctl_path", &self.sysctl_path)
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            sysctl_path: default_sysctl_path(),
        }
    }
}

/// External command execution
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandsConfig {
    /// Upper bound for a single `nft`/`ip`/`sysctl` invocation, in seconds
    #[serde(default = "default_command_timeout_secs")]
    pub timeout_secs: u64,
}

impl CommandsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "commands.timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Per-command timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_command_timeout_secs(),
        }
    }
}

/// Persisted state configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateConfig {
    /// State file location
    #[serde(default = "default_state_path")]
    pub path: PathBuf,

    /// Re-apply the persisted mode when the daemon starts
    #[serde(default = "default_true")]
    pub restore_on_startup: bool,
}

impl StateConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "state.path cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
            restore_on_startup: true,
        }
    }
}

/// IPC configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpcConfig {
    /// Path to Unix socket
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Socket file mode (octal, e.g., 0o660)
    #[serde(default = "default_socket_mode")]
    pub socket_mode: u32,

    /// Enable IPC server
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl IpcConfig {
    /// Validate IPC configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "IPC socket path cannot be empty when IPC is enabled".into(),
            ));
        }

        if self.max_message_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_message_size must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            socket_mode: default_socket_mode(),
            enabled: true,
            max_message_size: default_max_message_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include timestamps
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl LogConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(ConfigError::ValidationError(format!(
                "Unknown log format '{other}', expected \"json\" or \"text\""
            ))),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            timestamps: true,
            target: true,
        }
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "{field} cannot be empty"
        )));
    }
    Ok(())
}

/// nft identifiers: a letter followed by letters, digits or underscores
fn is_nft_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

const fn default_true() -> bool {
    true
}

fn default_table_name() -> String {
    DEFAULT_TABLE_NAME.into()
}

fn default_nft_path() -> String {
    "nft".into()
}

fn default_ip_path() -> String {
    "ip".into()
}

fn default_sysctl_path() -> String {
    "sysctl".into()
}

const fn default_rule_delete_attempts() -> usize {
    5
}

const fn default_command_timeout_secs() -> u64 {
    10
}

fn default_state_path() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_PATH)
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/var/run/tproxy-ctl.sock")
}

const fn default_socket_mode() -> u32 {
    0o660
}

const fn default_max_message_size() -> usize {
    1024 * 1024
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "json".into()
}
