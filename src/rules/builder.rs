//! nftables ruleset generation
//!
//! [`RuleScriptBuilder`] turns `(mode, scope, port)` into the complete
//! declarative ruleset for the private table. It performs no I/O and is
//! deterministic, so the same inputs always render byte-identical text.
//!
//! Rule order inside each chain is significant: exemptions come first, the
//! loop guards (`meta mark 1 return`, `meta mark 255 return`) come before
//! any marking or redirect statement.

use std::fmt;

use super::fwmark::{IPSEC_UDP_PORTS, RESERVED_IPV4, RESERVED_IPV6, SERVER_MARK, TPROXY_MARK};
use super::types::{Mode, Scope};

/// Default name of the private nftables table (family `inet`)
pub const DEFAULT_TABLE_NAME: &str = "proxystation";

/// Name of the exempt IPv4 set
pub const LOCAL_NETS_V4: &str = "local_nets";

/// Name of the exempt IPv6 set
pub const LOCAL_NETS_V6: &str = "local_nets6";

/// Base chain type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainType {
    /// Plain filter chain
    Filter,
    /// Output chain that re-runs the route lookup when the mark changes
    Route,
    /// NAT chain, required for `redirect`
    Nat,
}

impl ChainType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::Route => "route",
            Self::Nat => "nat",
        }
    }
}

/// Netfilter hook of a base chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    /// Packets arriving from an interface (including `lo`)
    Prerouting,
    /// Packets originated by local sockets
    Output,
}

impl Hook {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Prerouting => "prerouting",
            Self::Output => "output",
        }
    }
}

/// A commented group of statements inside a chain
#[derive(Debug, Clone, PartialEq, Eq)]
struct RuleBlock {
    comment: &'static str,
    statements: Vec<String>,
}

/// One base chain of the ruleset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    name: &'static str,
    chain_type: ChainType,
    hook: Hook,
    blocks: Vec<RuleBlock>,
}

impl Chain {
    fn new(name: &'static str, chain_type: ChainType, hook: Hook) -> Self {
        Self {
            name,
            chain_type,
            hook,
            blocks: Vec::new(),
        }
    }

    fn block<I, S>(mut self, comment: &'static str, statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocks.push(RuleBlock {
            comment,
            statements: statements.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Chain name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Chain type
    #[must_use]
    pub const fn chain_type(&self) -> ChainType {
        self.chain_type
    }

    /// Hook the chain is attached to
    #[must_use]
    pub const fn hook(&self) -> Hook {
        self.hook
    }

    /// Rule statements in evaluation order
    pub fn rules(&self) -> impl Iterator<Item = &str> {
        self.blocks
            .iter()
            .flat_map(|block| block.statements.iter().map(String::as_str))
    }

    /// Index of the first rule containing `needle`
    #[must_use]
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.rules().position(|rule| rule.contains(needle))
    }
}

/// A complete ruleset for the private table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    table: String,
    chains: Vec<Chain>,
}

impl RuleSet {
    /// Table name (family `inet`)
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Look up a chain by name
    #[must_use]
    pub fn chain(&self, name: &str) -> Option<&Chain> {
        self.chains.iter().find(|chain| chain.name == name)
    }

    /// Chain names in declaration order
    #[must_use]
    pub fn chain_names(&self) -> Vec<&'static str> {
        self.chains.iter().map(|chain| chain.name).collect()
    }

    /// Whether the ruleset declares no chains (the `off` ruleset)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

impl fmt::Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "table inet {} {{", self.table)?;
        write_set(f, LOCAL_NETS_V4, "ipv4_addr", &RESERVED_IPV4)?;
        writeln!(f)?;
        write_set(f, LOCAL_NETS_V6, "ipv6_addr", &RESERVED_IPV6)?;

        for chain in &self.chains {
            writeln!(f)?;
            writeln!(f, "    chain {} {{", chain.name)?;
            writeln!(
                f,
                "        type {} hook {} priority mangle; policy accept;",
                chain.chain_type.as_str(),
                chain.hook.as_str()
            )?;
            for block in &chain.blocks {
                writeln!(f)?;
                writeln!(f, "        # {}", block.comment)?;
                for statement in &block.statements {
                    writeln!(f, "        {statement}")?;
                }
            }
            writeln!(f, "    }}")?;
        }

        writeln!(f, "}}")
    }
}

fn write_set(f: &mut fmt::Formatter<'_>, name: &str, addr_type: &str, elements: &[&str]) -> fmt::Result {
    writeln!(f, "    set {name} {{")?;
    writeln!(f, "        type {addr_type}")?;
    writeln!(f, "        flags interval")?;
    writeln!(f, "        elements = {{")?;
    for (i, element) in elements.iter().enumerate() {
        let sep = if i + 1 == elements.len() { "" } else { "," };
        writeln!(f, "            {element}{sep}")?;
    }
    writeln!(f, "        }}")?;
    writeln!(f, "    }}")
}

/// Builds the ruleset for a given `(mode, scope, port)`
///
/// # Example
///
/// ```
/// use tproxy_ctl::rules::{Mode, RuleScriptBuilder, Scope};
///
/// let builder = RuleScriptBuilder::default();
/// let script = builder.build(Mode::Redirect, Scope::Router, 7892);
/// assert!(script.contains("meta l4proto tcp redirect to :7892"));
/// assert!(script.contains("chain prerouting"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleScriptBuilder {
    table: String,
}

impl RuleScriptBuilder {
    /// Create a builder for the given table name
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// Table name used by generated rulesets
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Build the structured ruleset
    #[must_use]
    pub fn ruleset(&self, mode: Mode, scope: Scope, port: u16) -> RuleSet {
        let mut chains = Vec::new();

        match (mode, scope) {
            (Mode::Off, _) => {}
            (_, Scope::Router) => chains.push(prerouting_chain(mode, port)),
            (Mode::Tproxy, Scope::Local) => chains.push(divert_chain(port)),
            (Mode::Redirect, Scope::Local) => {}
        }

        if mode.is_active() {
            chains.push(output_chain(mode, port));
        }

        RuleSet {
            table: self.table.clone(),
            chains,
        }
    }

    /// Render the ruleset text fed to `nft -f -`
    #[must_use]
    pub fn build(&self, mode: Mode, scope: Scope, port: u16) -> String {
        self.ruleset(mode, scope, port).to_string()
    }
}

impl Default for RuleScriptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_NAME)
    }
}

/// Render the ruleset for the default table
#[must_use]
pub fn build_ruleset(mode: Mode, scope: Scope, port: u16) -> String {
    RuleScriptBuilder::default().build(mode, scope, port)
}

fn ipsec_exemptions() -> [String; 2] {
    let ports = IPSEC_UDP_PORTS.map(|port| port.to_string()).join(", ");
    [
        format!("udp dport {{ {ports} }} return"),
        "meta l4proto esp return".to_string(),
    ]
}

fn reserved_exemptions() -> [String; 2] {
    [
        format!("ip daddr @{LOCAL_NETS_V4} return"),
        format!("ip6 daddr @{LOCAL_NETS_V6} return"),
    ]
}

/// Traffic forwarded from other hosts (router scope only)
fn prerouting_chain(mode: Mode, port: u16) -> Chain {
    match mode {
        Mode::Tproxy => Chain::new("prerouting", ChainType::Filter, Hook::Prerouting)
            .block("IPSec is never proxied", ipsec_exemptions())
            .block(
                "established transparent sockets go straight to the listener",
                [format!(
                    "meta l4proto {{ tcp, udp }} socket transparent 1 meta mark set {TPROXY_MARK} accept"
                )],
            )
            .block("local and reserved destinations are not proxied", reserved_exemptions())
            .block(
                "TCP and UDP to the TPROXY listener",
                [format!(
                    "meta l4proto {{ tcp, udp }} tproxy to :{port} meta mark set {TPROXY_MARK} accept"
                )],
            ),
        Mode::Redirect | Mode::Off => Chain::new("prerouting", ChainType::Nat, Hook::Prerouting)
            .block("IPSec is never proxied", ipsec_exemptions())
            .block("local and reserved destinations are not proxied", reserved_exemptions())
            .block(
                "TCP to the REDIRECT listener (redirect cannot carry UDP)",
                [format!("meta l4proto tcp redirect to :{port}")],
            ),
    }
}

/// Marked local traffic re-entering through `lo` (tproxy, local scope)
fn divert_chain(port: u16) -> Chain {
    Chain::new("divert", ChainType::Filter, Hook::Prerouting).block(
        "host traffic marked by the output chain, looped back via table 100",
        [format!(
            "iif \"lo\" meta mark {TPROXY_MARK} meta l4proto {{ tcp, udp }} tproxy to :{port} accept"
        )],
    )
}

/// Traffic originated by this host
fn output_chain(mode: Mode, port: u16) -> Chain {
    let (chain_type, comment, action) = match mode {
        Mode::Tproxy => (
            ChainType::Route,
            "mark TCP and UDP so the fwmark rule loops them back into prerouting",
            format!("meta l4proto {{ tcp, udp }} meta mark set {TPROXY_MARK}"),
        ),
        Mode::Redirect | Mode::Off => (
            ChainType::Nat,
            "TCP to the REDIRECT listener",
            format!("meta l4proto tcp redirect to :{port}"),
        ),
    };

    Chain::new("output", chain_type, Hook::Output)
        .block("IPSec is never proxied", ipsec_exemptions())
        .block("local and reserved destinations are not proxied", reserved_exemptions())
        .block(
            "already intercepted",
            [format!("meta mark {TPROXY_MARK} return")],
        )
        .block(
            "proxy engine inbound/server traffic",
            [format!("meta mark {SERVER_MARK} return")],
        )
        .block(comment, [action])
}
