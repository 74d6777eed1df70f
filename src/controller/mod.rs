//! Transparent mode controller
//!
//! The controller owns the `(mode, scope)` state and drives every transition:
//!
//! ```text
//! persist -> platform gate -> clear -> (off: done)
//!         -> resolve port -> build + apply ruleset -> policy routing (tproxy)
//!         -> forwarding (router) -> done
//! ```
//!
//! Transitions are serialized by an async mutex held for the whole sequence.
//! Status queries read a separate lock and never wait for a transition.
//!
//! Kernel-facing failures become a [`TransitionOutcome`] with code 2; the only
//! error [`TransparentController::set_mode`] returns is a failure to persist
//! the requested state.

mod outcome;
mod platform;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{
    FirewallBackend, ForwardingControl, IpRouteBackend, NftBackend, PolicyRouteManager,
    SysctlForwarding, SystemCommandRunner,
};
use crate::config::Config;
use crate::error::StateError;
use crate::rules::{
    AddressFamily, ListenPorts, Mode, RuleScriptBuilder, Scope, TransparentProxyState,
};
use crate::state::{JsonFileStore, StateStore};

pub use outcome::{OutcomeKind, TransitionOutcome, CODE_ERROR, CODE_PARTIAL, CODE_SUCCESS};
pub use platform::{is_root, Platform};

/// Snapshot returned by [`TransparentController::status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStatus {
    /// Last requested state
    pub state: TransparentProxyState,
    /// Whether kernel rules can be managed on this host
    pub platform_supported: bool,
    /// Rule namespace name
    pub table: String,
    /// Configured listen ports
    pub ports: ListenPorts,
    /// Port the current mode points at, `None` when off
    pub active_port: Option<u16>,
    /// Outcome of the most recent transition since start
    pub last_outcome: Option<TransitionOutcome>,
}

/// Ruleset text the builder would produce for a state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesetPreview {
    /// Requested mode
    pub mode: Mode,
    /// Requested scope
    pub scope: Scope,
    /// Listen port the rules point at, `None` when off
    pub port: Option<u16>,
    /// Script text as fed to `nft -f -`, without the atomic-replace prefix
    pub script: String,
}

#[derive(Debug, Default)]
struct Snapshot {
    state: TransparentProxyState,
    last_outcome: Option<TransitionOutcome>,
}

/// Drives kernel interception state from `(mode, scope)` requests
pub struct TransparentController {
    firewall: Arc<dyn FirewallBackend>,
    routes: PolicyRouteManager,
    forwarding: Arc<dyn ForwardingControl>,
    store: Arc<dyn StateStore>,
    builder: RuleScriptBuilder,
    ports: ListenPorts,
    platform: Platform,
    transition: Mutex<()>,
    snapshot: RwLock<Snapshot>,
}

impl TransparentController {
    /// Create a controller over the given backends.
    ///
    /// The ruleset namespace is taken from the firewall backend. Ports start
    /// at their defaults and the platform is detected at compile time.
    pub fn new(
        firewall: Arc<dyn FirewallBackend>,
        routes: PolicyRouteManager,
        forwarding: Arc<dyn ForwardingControl>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let builder = RuleScriptBuilder::new(firewall.table());
        Self {
            firewall,
            routes,
            forwarding,
            store,
            builder,
            ports: ListenPorts::default(),
            platform: Platform::detect(),
            transition: Mutex::new(()),
            snapshot: RwLock::new(Snapshot::default()),
        }
    }

    /// Create a controller driving the host tools named in `config`
    pub fn from_config(config: &Config) -> Self {
        let runner = Arc::new(SystemCommandRunner::new(config.commands.timeout()));

        let firewall = NftBackend::new(
            runner.clone(),
            &config.firewall.nft_path,
            &config.firewall.table_name,
        )
        .with_atomic_replace(config.firewall.atomic_replace);

        let routes = PolicyRouteManager::new(Arc::new(IpRouteBackend::new(
            runner.clone(),
            &config.routing.ip_path,
        )))
        .with_ipv6(config.routing.ipv6)
        .with_rule_delete_attempts(config.routing.rule_delete_attempts);

        let forwarding = SysctlForwarding::new(runner, &config.system.sysctl_path);

        Self::new(
            Arc::new(firewall),
            routes,
            Arc::new(forwarding),
            Arc::new(JsonFileStore::new(&config.state.path)),
        )
        .with_ports(config.ports)
    }

    /// Use the given listen ports
    #[must_use]
    pub fn with_ports(mut self, ports: ListenPorts) -> Self {
        self.ports = ports;
        self
    }

    /// Override platform detection
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Current state, platform and last outcome. Never blocks on a transition.
    pub fn status(&self) -> ControllerStatus {
        let snapshot = self.snapshot.read();
        ControllerStatus {
            state: snapshot.state,
            platform_supported: self.platform.supports_kernel_rules(),
            table: self.builder.table().to_string(),
            ports: self.ports,
            active_port: self.ports.resolve(snapshot.state.mode),
            last_outcome: snapshot.last_outcome.clone(),
        }
    }

    /// Last requested state
    pub fn state(&self) -> TransparentProxyState {
        self.snapshot.read().state
    }

    /// Render the ruleset for `(mode, scope)` without touching the kernel.
    ///
    /// A zero or missing `port` resolves through the configured ports.
    pub fn preview(&self, mode: Mode, scope: Scope, port: Option<u16>) -> RulesetPreview {
        let port = port.filter(|p| *p != 0).or_else(|| self.ports.resolve(mode));
        let script = self.builder.build(mode, scope, port.unwrap_or_default());
        RulesetPreview {
            mode,
            scope,
            port: port.filter(|_| mode.is_active()),
            script,
        }
    }

    /// Load the persisted state into memory without applying it
    pub fn load_persisted(&self) -> Result<Option<TransparentProxyState>, StateError> {
        let persisted = self.store.load()?;
        if let Some(state) = persisted {
            self.snapshot.write().state = state;
            debug!("Loaded persisted transparent proxy state {}", state);
        }
        Ok(persisted)
    }

    /// Re-apply the persisted state, if any
    pub async fn restore(&self) -> Result<Option<TransitionOutcome>, StateError> {
        match self.load_persisted()? {
            Some(state) => {
                info!("Restoring transparent proxy state {}", state);
                self.set_mode(state.mode, state.scope).await.map(Some)
            }
            None => {
                debug!("No persisted transparent proxy state");
                Ok(None)
            }
        }
    }

    /// Transition to `(mode, scope)`.
    ///
    /// The request is persisted before any kernel change. Kernel failures are
    /// reported through the returned outcome, not as an error.
    pub async fn set_mode(
        &self,
        mode: Mode,
        scope: Scope,
    ) -> Result<TransitionOutcome, StateError> {
        let _guard = self.transition.lock().await;
        let requested = TransparentProxyState::new(mode, scope);

        if let Err(e) = self.store.save(&requested) {
            warn!("Failed to persist transparent proxy state {}: {}", requested, e);
            return Err(e);
        }
        self.snapshot.write().state = requested;

        let outcome = self.transition_to(requested).await;
        if outcome.is_success() {
            info!("Transparent proxy {}: {}", requested, outcome.message);
        } else {
            warn!("Transparent proxy {}: {}", requested, outcome.message);
        }

        self.snapshot.write().last_outcome = Some(outcome.clone());
        Ok(outcome)
    }

    /// Remove the rule namespace and policy routes. Never fails.
    ///
    /// The persisted state is left untouched.
    pub async fn clear(&self) {
        let _guard = self.transition.lock().await;
        self.clear_kernel_state(true).await;
    }

    /// Wait until no transition is running.
    ///
    /// Transitions queued behind the running one may still start afterwards;
    /// callers stop accepting requests first.
    pub async fn quiesce(&self) {
        drop(self.transition.lock().await);
    }

    async fn transition_to(&self, requested: TransparentProxyState) -> TransitionOutcome {
        if !self.platform.supports_kernel_rules() {
            return TransitionOutcome::platform_unsupported(requested, std::env::consts::OS);
        }

        // An atomic apply replaces the old namespace itself.
        let clear_firewall = !(requested.mode.is_active() && self.firewall.replaces_atomically());
        self.clear_kernel_state(clear_firewall).await;

        let Some(port) = self.ports.resolve(requested.mode) else {
            return TransitionOutcome::cleared(requested);
        };

        let script = self.builder.build(requested.mode, requested.scope, port);
        if let Err(e) = self.firewall.apply_ruleset(&script).await {
            if !clear_firewall {
                // The failed transaction left the previous mode's rules in place.
                self.clear_firewall().await;
            }
            return TransitionOutcome::rules_failed(requested, port, &e);
        }

        if requested.mode.needs_policy_routing() {
            if let Err(e) = self.routes.setup().await {
                return TransitionOutcome::routing_failed(requested, port, &e);
            }
        }

        if requested.scope == Scope::Router {
            self.enable_forwarding().await;
        }

        TransitionOutcome::applied(requested, port)
    }

    async fn clear_kernel_state(&self, clear_firewall: bool) {
        if clear_firewall {
            self.clear_firewall().await;
        }
        self.routes.teardown().await;
    }

    async fn clear_firewall(&self) {
        if let Err(e) = self.firewall.clear().await {
            warn!("Failed to clear nftables table: {}", e);
        }
    }

    async fn enable_forwarding(&self) {
        for family in AddressFamily::BOTH {
            if let Err(e) = self.forwarding.enable(family).await {
                warn!("Failed to enable {} forwarding: {}", family, e);
            }
        }
    }
}
