//! Kernel-facing backends
//!
//! The controller only talks to the traits defined here:
//!
//! - [`FirewallBackend`]: loads and removes the nftables rule namespace
//! - [`RouteBackend`]: adds and removes fwmark rules and local routes
//! - [`ForwardingControl`]: flips the kernel forwarding switches
//!
//! The production implementations shell out through a [`CommandRunner`].
//! The [`mock`] implementations keep kernel state in memory for tests.

pub mod command;
pub mod firewall;
pub mod forwarding;
pub mod mock;
pub mod route;

pub use command::{CommandOutput, CommandRunner, SystemCommandRunner, DEFAULT_COMMAND_TIMEOUT};
pub use firewall::{FirewallBackend, NftBackend};
pub use forwarding::{forwarding_key, ForwardingControl, SysctlForwarding};
pub use route::{IpRouteBackend, PolicyRouteManager, RouteBackend, DEFAULT_RULE_DELETE_ATTEMPTS};
