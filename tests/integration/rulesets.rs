//! Ruleset shape checks across every mode and scope

use tproxy_ctl::rules::{
    build_ruleset, ChainType, Hook, Mode, RuleScriptBuilder, RuleSet, Scope, TPROXY_MARK,
};

const SCOPES: [Scope; 2] = [Scope::Local, Scope::Router];

fn ruleset(mode: Mode, scope: Scope, port: u16) -> RuleSet {
    RuleScriptBuilder::default().ruleset(mode, scope, port)
}

#[test]
fn test_tproxy_local_has_no_prerouting_chain() {
    let rules = ruleset(Mode::Tproxy, Scope::Local, 7893);
    assert!(rules.chain("prerouting").is_none());

    let output = rules.chain("output").unwrap();
    assert_eq!(output.chain_type(), ChainType::Route);
    assert!(output.position(&format!("meta mark set {TPROXY_MARK}")).is_some());

    let divert = rules.chain("divert").unwrap();
    assert_eq!(divert.hook(), Hook::Prerouting);

    let script = rules.to_string();
    assert!(script.contains("tproxy to :7893"));
    assert!(!script.contains("chain prerouting"));
}

#[test]
fn test_redirect_router_redirects_without_marking() {
    let script = build_ruleset(Mode::Redirect, Scope::Router, 7892);
    let rules = ruleset(Mode::Redirect, Scope::Router, 7892);

    for name in ["prerouting", "output"] {
        let chain = rules.chain(name).unwrap();
        assert_eq!(chain.chain_type(), ChainType::Nat);
        assert!(chain.position("meta l4proto tcp redirect to :7892").is_some());
        assert!(chain.position("meta mark set").is_none());
    }
    assert!(!script.contains("tproxy to"));
    assert!(!script.contains("meta mark set"));
}

#[test]
fn test_build_is_byte_identical() {
    let builder = RuleScriptBuilder::new("lab");
    for mode in Mode::ALL {
        for scope in SCOPES {
            for port in [1, 7892, 7893, u16::MAX] {
                assert_eq!(builder.build(mode, scope, port), builder.build(mode, scope, port));
            }
        }
    }
}

#[test]
fn test_output_loop_guard_precedes_marking() {
    for scope in SCOPES {
        let rules = ruleset(Mode::Tproxy, scope, 7893);
        let output = rules.chain("output").unwrap();

        let guard = output
            .position(&format!("meta mark {TPROXY_MARK} return"))
            .expect("loop guard present");
        let mark = output
            .position(&format!("meta mark set {TPROXY_MARK}"))
            .expect("marking rule present");
        assert!(guard < mark, "guard at {guard}, mark at {mark}");
    }
}

#[test]
fn test_prerouting_present_only_for_router_scope() {
    for mode in [Mode::Tproxy, Mode::Redirect] {
        assert!(ruleset(mode, Scope::Router, 7893).chain("prerouting").is_some());
        assert!(ruleset(mode, Scope::Local, 7893).chain("prerouting").is_none());
    }
}

#[test]
fn test_protocol_selection_per_mode() {
    for scope in SCOPES {
        let redirect = ruleset(Mode::Redirect, scope, 7892);
        for chain in ["prerouting", "output"].iter().filter_map(|n| redirect.chain(n)) {
            for rule in chain.rules().filter(|r| r.contains("redirect to")) {
                assert!(rule.contains("meta l4proto tcp"), "{rule}");
                assert!(!rule.contains("udp"), "{rule}");
            }
        }

        let tproxy = ruleset(Mode::Tproxy, scope, 7893);
        let interceptions: Vec<&str> = ["prerouting", "divert", "output"]
            .iter()
            .filter_map(|n| tproxy.chain(n))
            .flat_map(|chain| chain.rules())
            .filter(|r| r.contains("tproxy to") || r.contains("meta mark set"))
            .collect();
        assert!(!interceptions.is_empty());
        for rule in interceptions {
            assert!(rule.contains("meta l4proto { tcp, udp }"), "{rule}");
        }
    }
}

#[test]
fn test_off_declares_sets_only() {
    for scope in SCOPES {
        let rules = ruleset(Mode::Off, scope, 7893);
        assert!(rules.is_empty());

        let script = rules.to_string();
        assert!(script.contains("set local_nets {"));
        assert!(script.contains("set local_nets6 {"));
        assert!(!script.contains("chain"));
    }
}

#[test]
fn test_custom_table_name() {
    let script = RuleScriptBuilder::new("lab").build(Mode::Redirect, Scope::Local, 7892);
    assert!(script.starts_with("table inet lab {\n"));
    assert!(!script.contains("proxystation"));
}
