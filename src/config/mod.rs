//! Configuration module for tproxy-ctl
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use tproxy_ctl::config::{load_config, Config};
//!
//! let config = load_config("/etc/tproxy-ctl/config.json").unwrap();
//! println!("Table: inet {}", config.firewall.table_name);
//! ```

mod loader;
mod types;

pub use loader::{create_default_config, load_config, load_config_str, load_config_with_env};
pub use types::{
    CommandsConfig, Config, FirewallConfig, IpcConfig, LogConfig, RoutingConfig, StateConfig,
    SystemConfig,
};
