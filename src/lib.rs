//! tproxy-ctl: transparent proxy rule controller
//!
//! This crate turns a `(mode, scope)` selection into kernel packet
//! interception state for a local proxy engine: an nftables table with
//! TPROXY or REDIRECT rules, plus the fwmark policy routing TPROXY needs.
//!
//! # Features
//!
//! - **Rule generation**: deterministic nftables rulesets with loop guards
//!   and exemptions for private, reserved and IPSec traffic
//! - **Atomic apply**: the table is replaced inside one `nft` transaction
//! - **Policy routing**: idempotent `ip rule` / `ip route` management for
//!   IPv4 and IPv6
//! - **Persistence**: the requested mode survives restarts and kernel failures
//! - **IPC Control**: Unix socket-based runtime control
//!
//! # Architecture
//!
//! ```text
//! IPC / CLI -> TransparentController -> StateStore (persist)
//!                     |
//!                     +-> RuleScriptBuilder -> FirewallBackend (nft -f -)
//!                     +-> PolicyRouteManager -> RouteBackend (ip rule/route)
//!                     +-> ForwardingControl (sysctl)
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use tproxy_ctl::config::load_config;
//! use tproxy_ctl::controller::TransparentController;
//! use tproxy_ctl::rules::{Mode, Scope};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("/etc/tproxy-ctl/config.json")?;
//! let controller = TransparentController::from_config(&config);
//!
//! let outcome = controller.set_mode(Mode::Tproxy, Scope::Router).await?;
//! println!("[{}] {}", outcome.code(), outcome.message);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`backend`]: nft, iproute2 and sysctl backends plus in-memory mocks
//! - [`config`]: Configuration types and loading
//! - [`controller`]: Mode transitions and status
//! - [`error`]: Error types
//! - [`ipc`]: IPC server and protocol
//! - [`rules`]: Mode/scope model and ruleset builder
//! - [`state`]: Persisted mode/scope

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod ipc;
pub mod rules;
pub mod state;

// Re-export commonly used types at the crate root
pub use config::Config;
pub use controller::{TransitionOutcome, TransparentController};
pub use error::{CommandError, ConfigError, FirewallError, IpcError, RouteError, StateError};
pub use ipc::{IpcClient, IpcCommand, IpcResponse, IpcServer};
pub use rules::{Mode, Scope, TransparentProxyState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
