//! Controller transitions against the in-memory backends

use std::sync::Arc;
use std::time::Duration;

use tproxy_ctl::backend::mock::{FirewallCall, MockFirewall, MockForwarding, MockRouteBackend};
use tproxy_ctl::backend::PolicyRouteManager;
use tproxy_ctl::controller::{OutcomeKind, Platform, CODE_PARTIAL, CODE_SUCCESS};
use tproxy_ctl::rules::{AddressFamily, Mode, Scope, TransparentProxyState};
use tproxy_ctl::state::{JsonFileStore, MemoryStore, StateStore};
use tproxy_ctl::TransparentController;

struct Host {
    firewall: Arc<MockFirewall>,
    routes: Arc<MockRouteBackend>,
    forwarding: Arc<MockForwarding>,
    store: Arc<MemoryStore>,
    controller: Arc<TransparentController>,
}

impl Host {
    fn new(platform: Platform) -> Self {
        let firewall = Arc::new(MockFirewall::new());
        let routes = Arc::new(MockRouteBackend::new());
        let forwarding = Arc::new(MockForwarding::new());
        let store = Arc::new(MemoryStore::new());
        let controller = TransparentController::new(
            firewall.clone(),
            PolicyRouteManager::new(routes.clone()),
            forwarding.clone(),
            store.clone(),
        )
        .with_platform(platform);

        Self {
            firewall,
            routes,
            forwarding,
            store,
            controller: Arc::new(controller),
        }
    }

    fn linux() -> Self {
        Self::new(Platform::Linux)
    }

    fn is_clean(&self) -> bool {
        self.firewall.installed().is_none() && self.routes.is_clean()
    }
}

#[tokio::test]
async fn test_clear_twice_is_noop() {
    let host = Host::linux();
    host.controller.set_mode(Mode::Tproxy, Scope::Router).await.unwrap();

    host.controller.clear().await;
    assert!(host.is_clean());

    host.controller.clear().await;
    assert!(host.is_clean());
    assert_eq!(host.controller.state().mode, Mode::Tproxy);
}

#[tokio::test]
async fn test_off_leaves_nothing_behind_from_any_state() {
    for mode in [Mode::Tproxy, Mode::Redirect, Mode::Off] {
        for scope in [Scope::Local, Scope::Router] {
            let host = Host::linux();
            host.controller.set_mode(mode, scope).await.unwrap();

            let outcome = host.controller.set_mode(Mode::Off, scope).await.unwrap();
            assert_eq!(outcome.kind, OutcomeKind::Cleared, "{mode}/{scope}");
            assert_eq!(outcome.port, None);
            assert!(host.is_clean(), "{mode}/{scope} left state behind");
        }
    }
}

#[tokio::test]
async fn test_tproxy_to_off_removes_both_families() {
    let host = Host::linux();
    host.controller.set_mode(Mode::Tproxy, Scope::Local).await.unwrap();
    for family in AddressFamily::BOTH {
        assert_eq!(host.routes.rule_count(family), 1);
        assert!(host.routes.has_route(family));
    }

    host.controller.set_mode(Mode::Off, Scope::Local).await.unwrap();
    for family in AddressFamily::BOTH {
        assert_eq!(host.routes.rule_count(family), 0);
        assert!(!host.routes.has_route(family));
    }
    assert!(host.firewall.installed().is_none());

    let calls = host.firewall.calls().len();
    host.controller.clear().await;
    assert_eq!(host.firewall.calls().len(), calls + 1);
    assert!(host.is_clean());
}

#[tokio::test]
async fn test_unsupported_platform_persists_only() {
    let host = Host::new(Platform::Unsupported);

    let outcome = host.controller.set_mode(Mode::Tproxy, Scope::Router).await.unwrap();
    assert_eq!(outcome.kind, OutcomeKind::PlatformUnsupported);
    assert_eq!(outcome.code(), CODE_SUCCESS);
    assert!(outcome.message.contains("no kernel rules were touched"));

    assert!(host.firewall.calls().is_empty());
    assert!(host.routes.calls().is_empty());
    assert!(host.forwarding.enabled().is_empty());
    assert_eq!(
        host.store.load().unwrap(),
        Some(TransparentProxyState::new(Mode::Tproxy, Scope::Router))
    );
    assert!(!host.controller.status().platform_supported);
}

#[tokio::test]
async fn test_rule_failure_is_partial_and_persisted() {
    let host = Host::linux();
    host.firewall
        .fail_apply("Error: Could not process rule: No such file or directory\ntproxy to :7893");

    let outcome = host.controller.set_mode(Mode::Tproxy, Scope::Router).await.unwrap();
    assert_eq!(outcome.kind, OutcomeKind::RulesFailed);
    assert_eq!(outcome.code(), CODE_PARTIAL);
    assert!(outcome.message.contains("Could not process rule"));
    assert!(outcome.detail.unwrap().contains("Could not process rule"));

    assert_eq!(
        host.store.load().unwrap(),
        Some(TransparentProxyState::new(Mode::Tproxy, Scope::Router))
    );
    assert_eq!(host.controller.state().mode, Mode::Tproxy);
    assert!(host.routes.is_clean());
    assert!(host.forwarding.enabled().is_empty());
}

#[tokio::test]
async fn test_retry_after_recovery() {
    let host = Host::linux();
    host.firewall.fail_apply("Error: Operation not permitted");
    let outcome = host.controller.set_mode(Mode::Redirect, Scope::Local).await.unwrap();
    assert_eq!(outcome.code(), CODE_PARTIAL);

    host.firewall.recover();
    let outcome = host.controller.restore().await.unwrap().unwrap();
    assert_eq!(outcome.kind, OutcomeKind::Applied);
    assert!(host.firewall.installed().unwrap().contains("redirect to :7892"));
}

#[tokio::test]
async fn test_repeated_tproxy_does_not_accumulate() {
    let host = Host::linux();
    host.controller.set_mode(Mode::Tproxy, Scope::Local).await.unwrap();
    host.controller.set_mode(Mode::Tproxy, Scope::Router).await.unwrap();

    let outcome = host.controller.set_mode(Mode::Tproxy, Scope::Router).await.unwrap();
    assert_eq!(outcome.kind, OutcomeKind::Applied);
    assert_eq!(host.routes.rule_count(AddressFamily::V4), 1);
    assert_eq!(host.firewall.loaded_count(), 1);
}

#[tokio::test]
async fn test_duplicate_rules_removed_up_to_bound() {
    let host = Host::linux();
    host.routes.preload_rules(AddressFamily::V4, 3);
    host.routes.preload_rules(AddressFamily::V6, 8);

    host.controller.clear().await;
    assert_eq!(host.routes.rule_count(AddressFamily::V4), 0);
    assert_eq!(host.routes.rule_count(AddressFamily::V6), 3);

    host.controller.clear().await;
    assert_eq!(host.routes.rule_count(AddressFamily::V6), 0);
}

#[tokio::test]
async fn test_stale_ruleset_from_earlier_process_is_replaced() {
    let host = Host::linux();
    host.firewall.preload("table inet proxystation { }\n");

    host.controller.set_mode(Mode::Redirect, Scope::Router).await.unwrap();
    assert_eq!(host.firewall.loaded_count(), 1);
    assert!(host.firewall.installed().unwrap().contains("redirect to :7892"));
}

#[tokio::test]
async fn test_transitions_are_serialized() {
    let host = Host::linux();
    host.firewall.set_delay(Duration::from_millis(30));

    let a = Arc::clone(&host.controller);
    let b = Arc::clone(&host.controller);
    let (first, second) = tokio::join!(
        a.set_mode(Mode::Tproxy, Scope::Router),
        b.set_mode(Mode::Redirect, Scope::Local),
    );

    assert_eq!(first.unwrap().code(), CODE_SUCCESS);
    assert_eq!(second.unwrap().code(), CODE_SUCCESS);
    assert_eq!(host.firewall.max_concurrency(), 1);

    // Whichever ran last owns the kernel, and the state agrees with it.
    let state = host.controller.state();
    let installed = host.firewall.installed().unwrap();
    match state.mode {
        Mode::Tproxy => {
            assert!(installed.contains("tproxy to :7893"));
            assert_eq!(host.routes.rule_count(AddressFamily::V4), 1);
        }
        Mode::Redirect => {
            assert!(installed.contains("redirect to :7892"));
            assert!(host.routes.is_clean());
        }
        Mode::Off => panic!("unexpected final state"),
    }
    assert_eq!(host.firewall.loaded_count(), 1);
}

#[tokio::test]
async fn test_status_does_not_wait_for_transition() {
    let host = Host::linux();
    host.firewall.set_delay(Duration::from_millis(200));

    let controller = Arc::clone(&host.controller);
    let transition =
        tokio::spawn(async move { controller.set_mode(Mode::Tproxy, Scope::Local).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let status = tokio::time::timeout(Duration::from_millis(50), async {
        host.controller.status()
    })
    .await
    .expect("status answered during transition");
    assert_eq!(status.state.mode, Mode::Tproxy);
    assert!(status.last_outcome.is_none());

    let outcome = transition.await.unwrap().unwrap();
    assert_eq!(outcome.kind, OutcomeKind::Applied);
    assert!(host
        .firewall
        .calls()
        .iter()
        .any(|call| matches!(call, FirewallCall::Apply(_))));
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let build = || {
        TransparentController::new(
            Arc::new(MockFirewall::new()),
            PolicyRouteManager::new(Arc::new(MockRouteBackend::new())),
            Arc::new(MockForwarding::new()),
            Arc::new(JsonFileStore::new(&path)),
        )
        .with_platform(Platform::Linux)
    };

    let first = build();
    first.set_mode(Mode::Redirect, Scope::Router).await.unwrap();
    drop(first);

    let second = build();
    assert_eq!(second.state(), TransparentProxyState::default());
    let outcome = second.restore().await.unwrap().unwrap();
    assert_eq!(outcome.state(), TransparentProxyState::new(Mode::Redirect, Scope::Router));
    assert_eq!(outcome.port, Some(7892));
}
