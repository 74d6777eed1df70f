//! Firewall mark (fwmark) and policy-routing constants.
//!
//! TPROXY needs the host's own outbound packets looped back into the
//! prerouting path. The output chain tags them with [`TPROXY_MARK`], an
//! `ip rule` sends that mark to [`tables::TPROXY`], and the table holds a
//! single `local` route via `lo`:
//!
//! ```text
//! output chain: meta mark set 1
//!   -> ip rule fwmark 1 lookup 100
//!   -> table 100: local 0.0.0.0/0 dev lo
//!   -> prerouting: tproxy to :7893
//! ```
//!
//! # Example
//!
//! ```
//! use tproxy_ctl::rules::fwmark::{AddressFamily, PolicyRoute, TPROXY_MARK};
//!
//! let route = PolicyRoute::tproxy(AddressFamily::V6);
//! assert_eq!(route.mark, TPROXY_MARK);
//! assert_eq!(route.table, 100);
//! assert_eq!(route.destination(), "::/0");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Mark carried by intercepted packets.
///
/// Packets that already carry it are never marked or redirected again.
pub const TPROXY_MARK: u32 = 1;

/// Mark set by the proxy engine on its own inbound/server sockets.
///
/// Traffic with this mark is never intercepted.
pub const SERVER_MARK: u32 = 255;

/// Routing table numbers.
pub mod tables {
    /// TPROXY local delivery table.
    pub const TPROXY: u32 = 100;
}

/// UDP ports used by IPSec/L2TP (IKE, NAT-T, L2TP), always exempt.
pub const IPSEC_UDP_PORTS: [u16; 3] = [500, 4500, 1701];

/// Private, loopback, link-local, multicast and reserved IPv4 ranges.
pub const RESERVED_IPV4: [&str; 9] = [
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "224.0.0.0/4",
    "240.0.0.0/4",
];

/// Loopback, ULA, link-local and multicast IPv6 ranges.
pub const RESERVED_IPV6: [&str; 4] = ["::1/128", "fc00::/7", "fe80::/10", "ff00::/8"];

/// Address family of a policy route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

impl AddressFamily {
    /// Both families, IPv4 first
    pub const BOTH: [Self; 2] = [Self::V4, Self::V6];
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => f.write_str("ipv4"),
            Self::V6 => f.write_str("ipv6"),
        }
    }
}

/// A fwmark rule plus the local route it selects, for one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyRoute {
    /// Firewall mark matched by the rule
    pub mark: u32,
    /// Routing table the rule points at
    pub table: u32,
    /// Address family
    pub family: AddressFamily,
}

impl PolicyRoute {
    /// The TPROXY loopback route for `family`
    #[must_use]
    pub const fn tproxy(family: AddressFamily) -> Self {
        Self {
            mark: TPROXY_MARK,
            table: tables::TPROXY,
            family,
        }
    }

    /// Destination covered by the local route
    #[must_use]
    pub const fn destination(&self) -> &'static str {
        match self.family {
            AddressFamily::V4 => "0.0.0.0/0",
            AddressFamily::V6 => "::/0",
        }
    }

    /// Human-readable name of the rule half
    #[must_use]
    pub fn rule_name(&self) -> String {
        format!("{} rule fwmark {} lookup {}", self.family, self.mark, self.table)
    }

    /// Human-readable name of the route half
    #[must_use]
    pub fn route_name(&self) -> String {
        format!(
            "{} route local {} dev lo table {}",
            self.family,
            self.destination(),
            self.table
        )
    }
}
