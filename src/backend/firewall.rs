//! nftables backend
//!
//! Rulesets are loaded with `nft -f -` so the whole script is one kernel
//! transaction. With atomic replace enabled the script is prefixed with a
//! `table` + `delete table` pair, which swaps the old namespace for the new
//! one inside that same transaction.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::command::CommandRunner;
use crate::error::FirewallError;

/// Loads and removes the interception rule namespace
#[async_trait]
pub trait FirewallBackend: Send + Sync {
    /// Name of the rule namespace this backend owns
    fn table(&self) -> &str;

    /// Whether [`apply_ruleset`](Self::apply_ruleset) replaces an installed
    /// namespace in the same transaction
    fn replaces_atomically(&self) -> bool {
        false
    }

    /// Load a complete ruleset script
    async fn apply_ruleset(&self, script: &str) -> Result<(), FirewallError>;

    /// Remove the rule namespace. Absence is not an error.
    async fn clear(&self) -> Result<(), FirewallError>;
}

/// [`FirewallBackend`] driving the `nft` binary
pub struct NftBackend {
    runner: Arc<dyn CommandRunner>,
    nft_path: String,
    table: String,
    atomic_replace: bool,
}

impl NftBackend {
    /// Create a backend for `table` using the given `nft` binary
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        nft_path: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            nft_path: nft_path.into(),
            table: table.into(),
            atomic_replace: true,
        }
    }

    /// Enable or disable in-transaction replacement
    #[must_use]
    pub fn with_atomic_replace(mut self, enabled: bool) -> Self {
        self.atomic_replace = enabled;
        self
    }

    fn transaction(&self, script: &str) -> String {
        if self.atomic_replace {
            // Declaring the table first makes the delete valid when it is absent.
            format!(
                "table inet {table}\ndelete table inet {table}\n{script}",
                table = self.table
            )
        } else {
            script.to_string()
        }
    }
}

#[async_trait]
impl FirewallBackend for NftBackend {
    fn table(&self) -> &str {
        &self.table
    }

    fn replaces_atomically(&self) -> bool {
        self.atomic_replace
    }

    async fn apply_ruleset(&self, script: &str) -> Result<(), FirewallError> {
        let transaction = self.transaction(script);
        self.runner
            .run(&self.nft_path, &["-f", "-"], Some(&transaction))
            .await
            .map_err(FirewallError::Apply)?;
        info!("Loaded nftables table inet {}", self.table);
        Ok(())
    }

    async fn clear(&self) -> Result<(), FirewallError> {
        match self
            .runner
            .run(&self.nft_path, &["delete", "table", "inet", &self.table], None)
            .await
        {
            Ok(_) => {
                info!("Deleted nftables table inet {}", self.table);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("nftables table inet {} not present", self.table);
                Ok(())
            }
            Err(source) => Err(FirewallError::Clear {
                table: self.table.clone(),
                source,
            }),
        }
    }
}
