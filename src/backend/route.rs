//! Policy routing backend
//!
//! A [`RouteBackend`] adds and removes the two halves of a [`PolicyRoute`]:
//! the `fwmark` rule and the `local` route in its table. The
//! [`PolicyRouteManager`] sequences them for every enabled family.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::command::CommandRunner;
use crate::error::{CommandError, RouteError};
use crate::rules::{AddressFamily, PolicyRoute};

/// Default bound on `rule del` repetitions during teardown
pub const DEFAULT_RULE_DELETE_ATTEMPTS: usize = 5;

/// Kernel policy routing operations
#[async_trait]
pub trait RouteBackend: Send + Sync {
    /// Add the fwmark rule
    async fn add_rule(&self, route: &PolicyRoute) -> Result<(), RouteError>;

    /// Delete one instance of the fwmark rule
    async fn del_rule(&self, route: &PolicyRoute) -> Result<(), RouteError>;

    /// Add the local route to the rule's table
    async fn add_route(&self, route: &PolicyRoute) -> Result<(), RouteError>;

    /// Delete the local route from the rule's table
    async fn del_route(&self, route: &PolicyRoute) -> Result<(), RouteError>;
}

/// [`RouteBackend`] driving iproute2
pub struct IpRouteBackend {
    runner: Arc<dyn CommandRunner>,
    ip_path: String,
}

impl IpRouteBackend {
    /// Create a backend using the given `ip` binary
    pub fn new(runner: Arc<dyn CommandRunner>, ip_path: impl Into<String>) -> Self {
        Self {
            runner,
            ip_path: ip_path.into(),
        }
    }

    async fn ip(&self, args: &[String]) -> Result<(), CommandError> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.runner.run(&self.ip_path, &args, None).await.map(|_| ())
    }

    fn rule_args(route: &PolicyRoute, action: &str) -> Vec<String> {
        vec![
            family_flag(route.family).to_string(),
            "rule".to_string(),
            action.to_string(),
            "fwmark".to_string(),
            route.mark.to_string(),
            "lookup".to_string(),
            route.table.to_string(),
        ]
    }

    fn route_args(route: &PolicyRoute, action: &str) -> Vec<String> {
        vec![
            family_flag(route.family).to_string(),
            "route".to_string(),
            action.to_string(),
            "local".to_string(),
            route.destination().to_string(),
            "dev".to_string(),
            "lo".to_string(),
            "table".to_string(),
            route.table.to_string(),
        ]
    }
}

const fn family_flag(family: AddressFamily) -> &'static str {
    match family {
        AddressFamily::V4 => "-4",
        AddressFamily::V6 => "-6",
    }
}

#[async_trait]
impl RouteBackend for IpRouteBackend {
    async fn add_rule(&self, route: &PolicyRoute) -> Result<(), RouteError> {
        self.ip(&Self::rule_args(route, "add"))
            .await
            .map_err(|e| RouteError::from_command(route.rule_name(), e))
    }

    async fn del_rule(&self, route: &PolicyRoute) -> Result<(), RouteError> {
        self.ip(&Self::rule_args(route, "del"))
            .await
            .map_err(|e| RouteError::from_command(route.rule_name(), e))
    }

    async fn add_route(&self, route: &PolicyRoute) -> Result<(), RouteError> {
        self.ip(&Self::route_args(route, "add"))
            .await
            .map_err(|e| RouteError::from_command(route.route_name(), e))
    }

    async fn del_route(&self, route: &PolicyRoute) -> Result<(), RouteError> {
        self.ip(&Self::route_args(route, "del"))
            .await
            .map_err(|e| RouteError::from_command(route.route_name(), e))
    }
}

/// Installs and removes the TPROXY fwmark routing for each enabled family
pub struct PolicyRouteManager {
    backend: Arc<dyn RouteBackend>,
    families: Vec<AddressFamily>,
    rule_delete_attempts: usize,
}

impl PolicyRouteManager {
    /// Manage both families with the default teardown bound
    pub fn new(backend: Arc<dyn RouteBackend>) -> Self {
        Self {
            backend,
            families: AddressFamily::BOTH.to_vec(),
            rule_delete_attempts: DEFAULT_RULE_DELETE_ATTEMPTS,
        }
    }

    /// Include or skip IPv6
    #[must_use]
    pub fn with_ipv6(mut self, enabled: bool) -> Self {
        self.families = if enabled {
            AddressFamily::BOTH.to_vec()
        } else {
            vec![AddressFamily::V4]
        };
        self
    }

    /// Set the number of `rule del` repetitions per family (minimum 1)
    #[must_use]
    pub fn with_rule_delete_attempts(mut self, attempts: usize) -> Self {
        self.rule_delete_attempts = attempts.max(1);
        self
    }

    /// Families this manager touches
    pub fn families(&self) -> &[AddressFamily] {
        &self.families
    }

    /// Add rule then route for every family.
    ///
    /// Objects that already exist count as success. The first other failure
    /// aborts and is returned.
    pub async fn setup(&self) -> Result<(), RouteError> {
        for &family in &self.families {
            let route = PolicyRoute::tproxy(family);

            tolerate_existing(self.backend.add_rule(&route).await)?;
            tolerate_existing(self.backend.add_route(&route).await)?;

            info!("Policy routing ready: {} / {}", route.rule_name(), route.route_name());
        }
        Ok(())
    }

    /// Remove the fwmark rule and local route for every family.
    ///
    /// Duplicate rules are removed by repeating `rule del` until it fails or
    /// the attempt bound is hit. Route removal is best-effort.
    pub async fn teardown(&self) {
        for &family in &self.families {
            let route = PolicyRoute::tproxy(family);

            let mut removed = 0;
            for _ in 0..self.rule_delete_attempts {
                match self.backend.del_rule(&route).await {
                    Ok(()) => removed += 1,
                    Err(RouteError::NotFound { .. }) => break,
                    Err(e) => {
                        warn!("Stopping rule removal for {}: {}", family, e);
                        break;
                    }
                }
            }
            if removed > 0 {
                debug!("Removed {} instance(s) of {}", removed, route.rule_name());
            }

            match self.backend.del_route(&route).await {
                Ok(()) => debug!("Removed {}", route.route_name()),
                Err(RouteError::NotFound { .. }) => {}
                Err(e) => warn!("Failed to remove {}: {}", route.route_name(), e),
            }
        }
    }
}

fn tolerate_existing(result: Result<(), RouteError>) -> Result<(), RouteError> {
    match result {
        Err(RouteError::AlreadyExists { what }) => {
            debug!("{} already present", what);
            Ok(())
        }
        other => other,
    }
}
