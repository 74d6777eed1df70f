//! In-memory backends for testing without `CAP_NET_ADMIN`
//!
//! These model the kernel objects the real backends manage closely enough
//! to observe cleanup and idempotence: the firewall keeps the loaded scripts,
//! the route backend keeps a multiset of fwmark rules (the kernel accepts
//! duplicates) and a set of local routes (the kernel rejects duplicates).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::firewall::FirewallBackend;
use super::forwarding::ForwardingControl;
use super::route::RouteBackend;
use crate::error::{CommandError, FirewallError, RouteError};
use crate::rules::{AddressFamily, PolicyRoute, DEFAULT_TABLE_NAME};

fn tool_failure(program: &str, stderr: &str) -> CommandError {
    CommandError::Failed {
        program: program.to_string(),
        status: "exit status: 1".to_string(),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// Operation recorded by [`MockFirewall`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirewallCall {
    /// `apply_ruleset` with the script
    Apply(String),
    /// `clear`
    Clear,
}

#[derive(Default)]
struct FirewallState {
    loaded: Vec<String>,
    calls: Vec<FirewallCall>,
    apply_failure: Option<String>,
    clear_failure: Option<String>,
}

/// Firewall backend holding the loaded ruleset in memory
pub struct MockFirewall {
    table: String,
    atomic: bool,
    state: Mutex<FirewallState>,
    delay_ms: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockFirewall {
    /// Mock of an nft backend with atomic replace enabled
    pub fn new() -> Self {
        Self {
            table: DEFAULT_TABLE_NAME.to_string(),
            atomic: true,
            state: Mutex::new(FirewallState::default()),
            delay_ms: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Mock of an nft backend without atomic replace.
    ///
    /// Loading over an installed table appends, like `nft -f` does.
    pub fn non_atomic() -> Self {
        Self {
            atomic: false,
            ..Self::new()
        }
    }

    /// Make every subsequent apply fail with `stderr`
    pub fn fail_apply(&self, stderr: &str) {
        self.state.lock().apply_failure = Some(stderr.to_string());
    }

    /// Make every subsequent clear fail with `stderr`
    pub fn fail_clear(&self, stderr: &str) {
        self.state.lock().clear_failure = Some(stderr.to_string());
    }

    /// Remove injected failures
    pub fn recover(&self) {
        let mut state = self.state.lock();
        state.apply_failure = None;
        state.clear_failure = None;
    }

    /// Delay each operation, to widen race windows in tests
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), Ordering::SeqCst);
    }

    /// Pre-install a ruleset, as if left behind by an earlier process
    pub fn preload(&self, script: &str) {
        self.state.lock().loaded.push(script.to_string());
    }

    /// Currently installed ruleset, `None` when the table is absent
    pub fn installed(&self) -> Option<String> {
        let state = self.state.lock();
        if state.loaded.is_empty() {
            None
        } else {
            Some(state.loaded.concat())
        }
    }

    /// Number of scripts stacked in the table (more than one means duplicates)
    pub fn loaded_count(&self) -> usize {
        self.state.lock().loaded.len()
    }

    /// All recorded operations, oldest first
    pub fn calls(&self) -> Vec<FirewallCall> {
        self.state.lock().calls.clone()
    }

    /// Highest number of operations observed running at once
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for MockFirewall {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FirewallBackend for MockFirewall {
    fn table(&self) -> &str {
        &self.table
    }

    fn replaces_atomically(&self) -> bool {
        self.atomic
    }

    async fn apply_ruleset(&self, script: &str) -> Result<(), FirewallError> {
        self.enter().await;
        let result = {
            let mut state = self.state.lock();
            state.calls.push(FirewallCall::Apply(script.to_string()));
            if let Some(stderr) = state.apply_failure.clone() {
                Err(FirewallError::Apply(tool_failure("nft", &stderr)))
            } else {
                if self.atomic {
                    state.loaded.clear();
                }
                state.loaded.push(script.to_string());
                Ok(())
            }
        };
        self.leave();
        result
    }

    async fn clear(&self) -> Result<(), FirewallError> {
        self.enter().await;
        let result = {
            let mut state = self.state.lock();
            state.calls.push(FirewallCall::Clear);
            if let Some(stderr) = state.clear_failure.clone() {
                Err(FirewallError::Clear {
                    table: self.table.clone(),
                    source: tool_failure("nft", &stderr),
                })
            } else {
                state.loaded.clear();
                Ok(())
            }
        };
        self.leave();
        result
    }
}

#[derive(Default)]
struct RouteState {
    rules: Vec<PolicyRoute>,
    routes: Vec<PolicyRoute>,
    calls: Vec<String>,
    add_rule_failure: Option<String>,
    add_route_failure: Option<String>,
}

/// Route backend modelling the kernel rule list and routing table
#[derive(Default)]
pub struct MockRouteBackend {
    state: Mutex<RouteState>,
}

impl MockRouteBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `count` copies of the rule for `family`, as if left behind
    pub fn preload_rules(&self, family: AddressFamily, count: usize) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.rules.push(PolicyRoute::tproxy(family));
        }
    }

    /// Make rule additions fail with `stderr`
    pub fn fail_add_rule(&self, stderr: &str) {
        self.state.lock().add_rule_failure = Some(stderr.to_string());
    }

    /// Make route additions fail with `stderr`
    pub fn fail_add_route(&self, stderr: &str) {
        self.state.lock().add_route_failure = Some(stderr.to_string());
    }

    /// Remove injected failures
    pub fn recover(&self) {
        let mut state = self.state.lock();
        state.add_rule_failure = None;
        state.add_route_failure = None;
    }

    /// Installed instances of the fwmark rule for `family`
    pub fn rule_count(&self, family: AddressFamily) -> usize {
        self.state
            .lock()
            .rules
            .iter()
            .filter(|r| r.family == family)
            .count()
    }

    /// Whether the local route for `family` is installed
    pub fn has_route(&self, family: AddressFamily) -> bool {
        self.state.lock().routes.iter().any(|r| r.family == family)
    }

    /// No rules and no routes installed
    pub fn is_clean(&self) -> bool {
        let state = self.state.lock();
        state.rules.is_empty() && state.routes.is_empty()
    }

    /// Recorded operations as `op name` strings
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }
}

#[async_trait]
impl RouteBackend for MockRouteBackend {
    async fn add_rule(&self, route: &PolicyRoute) -> Result<(), RouteError> {
        let mut state = self.state.lock();
        state.calls.push(format!("add {}", route.rule_name()));
        if let Some(stderr) = state.add_rule_failure.clone() {
            return Err(RouteError::from_command(route.rule_name(), tool_failure("ip", &stderr)));
        }
        state.rules.push(*route);
        Ok(())
    }

    async fn del_rule(&self, route: &PolicyRoute) -> Result<(), RouteError> {
        let mut state = self.state.lock();
        state.calls.push(format!("del {}", route.rule_name()));
        match state.rules.iter().position(|r| r == route) {
            Some(index) => {
                state.rules.remove(index);
                Ok(())
            }
            None => Err(RouteError::NotFound {
                what: route.rule_name(),
            }),
        }
    }

    async fn add_route(&self, route: &PolicyRoute) -> Result<(), RouteError> {
        let mut state = self.state.lock();
        state.calls.push(format!("add {}", route.route_name()));
        if let Some(stderr) = state.add_route_failure.clone() {
            return Err(RouteError::from_command(route.route_name(), tool_failure("ip", &stderr)));
        }
        if state.routes.contains(route) {
            return Err(RouteError::AlreadyExists {
                what: route.route_name(),
            });
        }
        state.routes.push(*route);
        Ok(())
    }

    async fn del_route(&self, route: &PolicyRoute) -> Result<(), RouteError> {
        let mut state = self.state.lock();
        state.calls.push(format!("del {}", route.route_name()));
        match state.routes.iter().position(|r| r == route) {
            Some(index) => {
                state.routes.remove(index);
                Ok(())
            }
            None => Err(RouteError::NotFound {
                what: route.route_name(),
            }),
        }
    }
}

/// Forwarding control that records which families were enabled
#[derive(Default)]
pub struct MockForwarding {
    enabled: Mutex<Vec<AddressFamily>>,
    failure: Mutex<Option<String>>,
}

impl MockForwarding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every enable call fail with `stderr`
    pub fn fail(&self, stderr: &str) {
        *self.failure.lock() = Some(stderr.to_string());
    }

    /// Families enabled so far, in call order
    pub fn enabled(&self) -> Vec<AddressFamily> {
        self.enabled.lock().clone()
    }
}

#[async_trait]
impl ForwardingControl for MockForwarding {
    async fn enable(&self, family: AddressFamily) -> Result<(), CommandError> {
        if let Some(stderr) = self.failure.lock().clone() {
            return Err(tool_failure("sysctl", &stderr));
        }
        self.enabled.lock().push(family);
        Ok(())
    }
}
