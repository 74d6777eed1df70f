//! Interception rules
//!
//! This module holds the user-facing mode/scope model, the fwmark and routing
//! constants shared with the proxy engine, and the nftables ruleset builder.
//!
//! # Example
//!
//! ```
//! use tproxy_ctl::rules::{build_ruleset, Mode, Scope};
//!
//! let script = build_ruleset(Mode::Tproxy, Scope::Router, 7893);
//! assert!(script.contains("tproxy to :7893 meta mark set 1 accept"));
//! ```

mod builder;
pub mod fwmark;
mod types;

pub use builder::{
    build_ruleset, Chain, ChainType, Hook, RuleScriptBuilder, RuleSet, DEFAULT_TABLE_NAME,
    LOCAL_NETS_V4, LOCAL_NETS_V6,
};
pub use fwmark::{AddressFamily, PolicyRoute, SERVER_MARK, TPROXY_MARK};
pub use types::{
    ListenPorts, Mode, Scope, TransparentProxyState, UnknownVariant, DEFAULT_REDIR_PORT,
    DEFAULT_TPROXY_PORT,
};
