//! Exact host tool invocations for a full transition
//!
//! The real `nft`, `ip` and `sysctl` backends run over a recording
//! [`CommandRunner`] that answers every delete with `ENOENT`, like a host
//! with nothing installed.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use tproxy_ctl::backend::{
    CommandOutput, CommandRunner, IpRouteBackend, NftBackend, PolicyRouteManager,
    SysctlForwarding,
};
use tproxy_ctl::controller::{OutcomeKind, Platform};
use tproxy_ctl::error::CommandError;
use tproxy_ctl::rules::{Mode, Scope};
use tproxy_ctl::state::MemoryStore;
use tproxy_ctl::TransparentController;

#[derive(Default)]
struct FreshHost {
    commands: Mutex<Vec<String>>,
    stdin: Mutex<Vec<String>>,
    reject_nft_load: Mutex<Option<String>>,
}

impl FreshHost {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.commands.lock())
    }
}

#[async_trait]
impl CommandRunner for FreshHost {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, CommandError> {
        let line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.commands.lock().push(line);

        let failed = |stderr: &str| CommandError::Failed {
            program: program.to_string(),
            status: "exit status: 2".to_string(),
            stdout: String::new(),
            stderr: stderr.to_string(),
        };

        if let Some(script) = stdin {
            self.stdin.lock().push(script.to_string());
            if let Some(stderr) = self.reject_nft_load.lock().clone() {
                return Err(failed(&stderr));
            }
        }
        if args.contains(&"del") {
            return Err(failed("RTNETLINK answers: No such file or directory"));
        }
        if args.contains(&"delete") {
            return Err(failed(
                "Error: No such file or directory; did you mean table 'filter' in family ip?",
            ));
        }
        Ok(CommandOutput::default())
    }
}

fn controller(host: &Arc<FreshHost>) -> TransparentController {
    let runner: Arc<dyn CommandRunner> = host.clone();
    TransparentController::new(
        Arc::new(NftBackend::new(runner.clone(), "nft", "proxystation")),
        PolicyRouteManager::new(Arc::new(IpRouteBackend::new(runner.clone(), "ip"))),
        Arc::new(SysctlForwarding::new(runner, "sysctl")),
        Arc::new(MemoryStore::new()),
    )
    .with_platform(Platform::Linux)
}

const TEARDOWN: [&str; 4] = [
    "ip -4 rule del fwmark 1 lookup 100",
    "ip -4 route del local 0.0.0.0/0 dev lo table 100",
    "ip -6 rule del fwmark 1 lookup 100",
    "ip -6 route del local ::/0 dev lo table 100",
];

#[tokio::test]
async fn test_tproxy_router_command_sequence() {
    let host = Arc::new(FreshHost::default());
    let controller = controller(&host);

    let outcome = controller.set_mode(Mode::Tproxy, Scope::Router).await.unwrap();
    assert_eq!(outcome.kind, OutcomeKind::Applied);

    let mut expected: Vec<&str> = TEARDOWN.to_vec();
    expected.extend([
        "nft -f -",
        "ip -4 rule add fwmark 1 lookup 100",
        "ip -4 route add local 0.0.0.0/0 dev lo table 100",
        "ip -6 rule add fwmark 1 lookup 100",
        "ip -6 route add local ::/0 dev lo table 100",
        "sysctl -w net.ipv4.ip_forward=1",
        "sysctl -w net.ipv6.conf.all.forwarding=1",
    ]);
    assert_eq!(host.take(), expected);

    let scripts = host.stdin.lock().clone();
    assert_eq!(scripts.len(), 1);
    assert!(scripts[0].starts_with(
        "table inet proxystation\ndelete table inet proxystation\ntable inet proxystation {\n"
    ));
    assert!(scripts[0].contains("tproxy to :7893"));
}

#[tokio::test]
async fn test_redirect_local_touches_no_routes() {
    let host = Arc::new(FreshHost::default());
    let controller = controller(&host);

    controller.set_mode(Mode::Redirect, Scope::Local).await.unwrap();

    let mut expected: Vec<&str> = TEARDOWN.to_vec();
    expected.push("nft -f -");
    assert_eq!(host.take(), expected);
}

#[tokio::test]
async fn test_off_deletes_table() {
    let host = Arc::new(FreshHost::default());
    let controller = controller(&host);

    let outcome = controller.set_mode(Mode::Off, Scope::Router).await.unwrap();
    assert_eq!(outcome.kind, OutcomeKind::Cleared);

    let mut expected = vec!["nft delete table inet proxystation"];
    expected.extend(TEARDOWN);
    assert_eq!(host.take(), expected);
}

#[tokio::test]
async fn test_rejected_load_clears_table() {
    let host = Arc::new(FreshHost::default());
    *host.reject_nft_load.lock() =
        Some("Error: Could not process rule: No such file or directory".to_string());
    let controller = controller(&host);

    let outcome = controller.set_mode(Mode::Tproxy, Scope::Local).await.unwrap();
    assert_eq!(outcome.kind, OutcomeKind::RulesFailed);
    assert_eq!(outcome.code(), 2);
    assert!(outcome.detail.unwrap().contains("Could not process rule"));

    let commands = host.take();
    assert_eq!(
        &commands[TEARDOWN.len()..],
        ["nft -f -", "nft delete table inet proxystation"]
    );
}
