//! Mode changes over the Unix socket

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::broadcast;

use tproxy_ctl::backend::mock::{MockFirewall, MockForwarding, MockRouteBackend};
use tproxy_ctl::backend::PolicyRouteManager;
use tproxy_ctl::config::IpcConfig;
use tproxy_ctl::controller::{OutcomeKind, Platform};
use tproxy_ctl::ipc::{ErrorCode, IpcClient, IpcCommand, IpcHandler, IpcResponse, IpcServer};
use tproxy_ctl::rules::{Mode, Scope, TransparentProxyState};
use tproxy_ctl::state::{MemoryStore, StateStore};
use tproxy_ctl::TransparentController;

struct Daemon {
    _dir: TempDir,
    socket_path: PathBuf,
    firewall: Arc<MockFirewall>,
    store: Arc<MemoryStore>,
    shutdown_rx: broadcast::Receiver<()>,
    server: Arc<IpcServer>,
}

impl Daemon {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("tproxy-ctl.sock");

        let firewall = Arc::new(MockFirewall::new());
        let store = Arc::new(MemoryStore::new());
        let controller = TransparentController::new(
            firewall.clone(),
            PolicyRouteManager::new(Arc::new(MockRouteBackend::new())),
            Arc::new(MockForwarding::new()),
            store.clone(),
        )
        .with_platform(Platform::Linux);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handler = IpcHandler::new(Arc::new(controller)).with_shutdown(shutdown_tx);
        let config = IpcConfig {
            socket_path: socket_path.clone(),
            socket_mode: 0o600,
            enabled: true,
            max_message_size: 64 * 1024,
        };
        let server = Arc::new(IpcServer::new(config, Arc::new(handler)));
        {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.run().await });
        }
        wait_for_socket(&socket_path).await;

        Self {
            _dir: dir,
            socket_path,
            firewall,
            store,
            shutdown_rx,
            server,
        }
    }

    fn client(&self) -> IpcClient {
        IpcClient::new(&self.socket_path)
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}

async fn wait_for_socket(path: &Path) {
    for _ in 0..50 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("socket {} never appeared", path.display());
}

async fn set(client: &IpcClient, mode: &str, scope: Option<&str>) -> IpcResponse {
    client
        .send(IpcCommand::SetTransparentMode {
            mode: mode.to_string(),
            scope: scope.map(str::to_string),
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_set_mode_over_socket() {
    let daemon = Daemon::start().await;
    let client = daemon.client();

    match set(&client, "tproxy", Some("router")).await {
        IpcResponse::TransparentResult(result) => {
            assert_eq!(result.code, 0);
            assert_eq!(result.kind, OutcomeKind::Applied);
            assert_eq!(result.port, Some(7893));
        }
        other => panic!("unexpected response: {other:?}"),
    }
    assert!(daemon.firewall.installed().unwrap().contains("chain prerouting"));

    match client.send(IpcCommand::GetTransparentStatus).await.unwrap() {
        IpcResponse::TransparentStatus(status) => {
            assert_eq!(status.state, TransparentProxyState::new(Mode::Tproxy, Scope::Router));
            assert_eq!(status.active_port, Some(7893));
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_or_empty_scope_means_local() {
    let daemon = Daemon::start().await;
    let client = daemon.client();

    for scope in [None, Some("")] {
        match set(&client, "redirect", scope).await {
            IpcResponse::TransparentResult(result) => assert_eq!(result.scope, Scope::Local),
            other => panic!("unexpected response: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_invalid_request_has_no_side_effects() {
    let daemon = Daemon::start().await;
    let client = daemon.client();

    for (mode, scope) in [("socks", None), ("tproxy", Some("everywhere"))] {
        match set(&client, mode, scope).await {
            IpcResponse::Error(err) => assert_eq!(err.code, ErrorCode::InvalidParameters),
            other => panic!("unexpected response: {other:?}"),
        }
    }
    assert!(daemon.store.load().unwrap().is_none());
    assert!(daemon.firewall.calls().is_empty());
}

#[tokio::test]
async fn test_rule_failure_reports_code_two() {
    let daemon = Daemon::start().await;
    daemon.firewall.fail_apply("Error: Could not process rule: Operation not supported");

    match set(&daemon.client(), "redirect", Some("router")).await {
        IpcResponse::TransparentResult(result) => {
            assert_eq!(result.code, 2);
            assert_eq!(result.kind, OutcomeKind::RulesFailed);
            assert!(result.detail.unwrap().contains("Operation not supported"));
        }
        other => panic!("unexpected response: {other:?}"),
    }
    assert_eq!(
        daemon.store.load().unwrap(),
        Some(TransparentProxyState::new(Mode::Redirect, Scope::Router))
    );
}

#[tokio::test]
async fn test_persist_failure_is_generic_error() {
    let daemon = Daemon::start().await;
    daemon.store.fail_saves("read-only file system");

    match set(&daemon.client(), "tproxy", None).await {
        IpcResponse::Error(err) => {
            assert_eq!(err.code, ErrorCode::OperationFailed);
            assert!(err.message.contains("read-only file system"));
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn test_preview_over_socket() {
    let daemon = Daemon::start().await;

    let response = daemon
        .client()
        .send(IpcCommand::PreviewRuleset {
            mode: "redirect".to_string(),
            scope: Some("local".to_string()),
            port: Some(12345),
        })
        .await
        .unwrap();

    match response {
        IpcResponse::Ruleset(preview) => {
            assert_eq!(preview.port, Some(12345));
            assert!(preview.script.contains("redirect to :12345"));
        }
        other => panic!("unexpected response: {other:?}"),
    }
    assert!(daemon.firewall.calls().is_empty());
}

#[tokio::test]
async fn test_wire_format() {
    let daemon = Daemon::start().await;
    let mut stream = UnixStream::connect(&daemon.socket_path).await.unwrap();

    let body = br#"{"type":"set_transparent_mode","mode":"redirect","scope":"local"}"#;
    stream
        .write_all(&u32::try_from(body.len()).unwrap().to_be_bytes())
        .await
        .unwrap();
    stream.write_all(body).await.unwrap();

    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await.unwrap();
    let mut reply = vec![0u8; u32::from_be_bytes(len) as usize];
    stream.read_exact(&mut reply).await.unwrap();

    let reply: serde_json::Value = serde_json::from_slice(&reply).unwrap();
    assert_eq!(reply["type"], "transparent_result");
    assert_eq!(reply["code"], 0);
    assert_eq!(reply["mode"], "redirect");
    assert_eq!(reply["scope"], "local");
    assert_eq!(reply["port"], 7892);
    assert!(reply.get("detail").is_none());
}

#[tokio::test]
async fn test_shutdown_command() {
    let mut daemon = Daemon::start().await;
    let client = daemon.client();

    let response = client.send(IpcCommand::Shutdown).await.unwrap();
    assert!(matches!(response, IpcResponse::Success { .. }));
    daemon.shutdown_rx.recv().await.unwrap();

    match set(&client, "tproxy", None).await {
        IpcResponse::Error(err) => assert_eq!(err.code, ErrorCode::ShuttingDown),
        other => panic!("unexpected response: {other:?}"),
    }
}
