//! Kernel IP forwarding switch

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::command::CommandRunner;
use crate::error::CommandError;
use crate::rules::AddressFamily;

/// Enables packet forwarding for an address family
#[async_trait]
pub trait ForwardingControl: Send + Sync {
    /// Turn forwarding on for `family`
    async fn enable(&self, family: AddressFamily) -> Result<(), CommandError>;
}

/// sysctl key controlling forwarding for `family`
#[must_use]
pub const fn forwarding_key(family: AddressFamily) -> &'static str {
    match family {
        AddressFamily::V4 => "net.ipv4.ip_forward",
        AddressFamily::V6 => "net.ipv6.conf.all.forwarding",
    }
}

/// [`ForwardingControl`] using `sysctl -w`
pub struct SysctlForwarding {
    runner: Arc<dyn CommandRunner>,
    sysctl_path: String,
}

impl SysctlForwarding {
    pub fn new(runner: Arc<dyn CommandRunner>, sysctl_path: impl Into<String>) -> Self {
        Self {
            runner,
            sysctl_path: sysctl_path.into(),
        }
    }
}

#[async_trait]
impl ForwardingControl for SysctlForwarding {
    async fn enable(&self, family: AddressFamily) -> Result<(), CommandError> {
        let setting = format!("{}=1", forwarding_key(family));
        self.runner
            .run(&self.sysctl_path, &["-w", &setting], None)
            .await?;
        info!("Enabled {} forwarding", family);
        Ok(())
    }
}
