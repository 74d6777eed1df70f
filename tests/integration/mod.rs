//! Integration tests for tproxy-ctl
//!
//! # Test Organization
//!
//! - `rulesets`: ruleset shape checks across every mode and scope
//! - `transitions`: controller transitions against the in-memory backends
//! - `host_commands`: exact `nft`/`ip`/`sysctl` invocations for a transition
//! - `ipc_control`: mode changes over the Unix socket
//!
//! # Test Requirements
//!
//! None of these tests touch the kernel. The in-memory backends from
//! `tproxy_ctl::backend::mock` stand in for nftables and iproute2.

mod host_commands;
mod ipc_control;
mod rulesets;
mod transitions;
