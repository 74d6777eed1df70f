//! Host platform detection

use serde::{Deserialize, Serialize};

/// Host platform as seen by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// nftables and iproute2 are available
    Linux,
    /// Anything else; requests are persisted but the kernel is left alone
    Unsupported,
}

impl Platform {
    /// Platform this binary was built for
    #[must_use]
    pub const fn detect() -> Self {
        if cfg!(target_os = "linux") {
            Self::Linux
        } else {
            Self::Unsupported
        }
    }

    /// Whether kernel rules can be managed
    #[must_use]
    pub const fn supports_kernel_rules(self) -> bool {
        matches!(self, Self::Linux)
    }
}

/// Check if running as root (effective UID = 0).
#[cfg(unix)]
#[must_use]
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Check if running as root (always false off Unix).
#[cfg(not(unix))]
#[must_use]
pub fn is_root() -> bool {
    false
}
