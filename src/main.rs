//! tproxy-ctl: transparent proxy rule controller daemon
//!
//! This is the main entry point for the daemon. It restores the persisted
//! transparent proxy mode and serves mode changes over the IPC socket.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! sudo ./tproxy-ctl
//!
//! # Run with custom configuration
//! sudo ./tproxy-ctl -c /path/to/config.json
//!
//! # Print the ruleset for a mode without touching the kernel
//! ./tproxy-ctl --preview tproxy router
//!
//! # Run with environment overrides
//! TPROXY_CTL_LOG_LEVEL=debug sudo ./tproxy-ctl
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use tproxy_ctl::config::{create_default_config, load_config_with_env, Config};
use tproxy_ctl::controller::{is_root, Platform, TransparentController};
use tproxy_ctl::ipc::{IpcHandler, IpcServer};
use tproxy_ctl::rules::{Mode, Scope};

/// Default configuration file location
const DEFAULT_CONFIG_PATH: &str = "/etc/tproxy-ctl/config.json";

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
    /// Print the ruleset for a mode and exit
    preview: Option<(Mode, Scope)>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1).peekable();
        let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        let mut generate_config = false;
        let mut check_config = false;
        let mut preview = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "--preview" => {
                    let mode = args.next().unwrap_or_default();
                    let scope = args.next_if(|next| !next.starts_with('-'));
                    preview = Some(parse_selection(&mode, scope.as_deref()));
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("tproxy-ctl v{}", tproxy_ctl::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
            preview,
        }
    }
}

fn parse_selection(mode: &str, scope: Option<&str>) -> (Mode, Scope) {
    let parsed = mode
        .parse::<Mode>()
        .and_then(|mode| Ok((mode, scope.unwrap_or_default().parse::<Scope>()?)));
    match parsed {
        Ok(selection) => selection,
        Err(e) => {
            eprintln!("Invalid --preview argument: {e}");
            print_help();
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"tproxy-ctl v{}

Transparent proxy rule controller: manages nftables TPROXY/REDIRECT rules
and fwmark policy routing for a local proxy engine.

USAGE:
    tproxy-ctl [OPTIONS]

OPTIONS:
    -c, --config <PATH>            Configuration file path [default: {}]
    -g, --generate-config          Generate default configuration and exit
    --check                        Check configuration and exit
    --preview <MODE> [SCOPE]       Print the ruleset for MODE (off|tproxy|redirect)
                                   and SCOPE (local|router) and exit
    -h, --help                     Print help information
    -v, --version                  Print version information

ENVIRONMENT:
    TPROXY_CTL_LOG_LEVEL     Override log level (trace, debug, info, warn, error)
    TPROXY_CTL_IPC_SOCKET    Override IPC socket path
    TPROXY_CTL_STATE_PATH    Override state file path
    TPROXY_CTL_TABLE         Override nftables table name

REQUIREMENTS:
    - Linux with nftables (nft) and iproute2 (ip)
    - CAP_NET_ADMIN capability (or root)

EXAMPLE:
    sudo tproxy-ctl -c /etc/tproxy-ctl/config.json
    tproxyctl set tproxy router
"#,
        tproxy_ctl::VERSION,
        DEFAULT_CONFIG_PATH
    );
}

/// Initialize logging
fn init_logging(config: &Config) -> Result<()> {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("tokio=warn".parse()?);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target);

    match (config.log.format.as_str(), config.log.timestamps) {
        ("json", true) => subscriber.json().init(),
        ("json", false) => subscriber.json().without_time().init(),
        (_, true) => subscriber.init(),
        (_, false) => subscriber.without_time().init(),
    }

    Ok(())
}

/// Check system prerequisites
fn check_prerequisites() {
    if !Platform::detect().supports_kernel_rules() {
        warn!("Not running on Linux: mode changes are saved but no kernel rules are managed");
    } else if !is_root() {
        warn!("Not running as root; nft and ip need CAP_NET_ADMIN");
    }
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.generate_config {
        create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    let config = load_config_with_env(&args.config_path).with_context(|| {
        format!("Failed to load configuration from {:?}", args.config_path)
    })?;

    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    let controller = Arc::new(TransparentController::from_config(&config));

    if let Some((mode, scope)) = args.preview {
        print!("{}", controller.preview(mode, scope, None).script);
        return Ok(());
    }

    init_logging(&config)?;

    info!("tproxy-ctl v{}", tproxy_ctl::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    check_prerequisites();

    if config.state.restore_on_startup {
        match controller.restore().await {
            Ok(Some(outcome)) => info!("Restored state: {}", outcome),
            Ok(None) => info!("No persisted state, transparent proxy is off"),
            Err(e) => warn!("Failed to restore persisted state: {}", e),
        }
    } else if let Err(e) = controller.load_persisted() {
        warn!("Failed to read persisted state: {}", e);
    }

    // Fired by SIGINT/SIGTERM handling below or by an IPC shutdown command.
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

    let handler = Arc::new(IpcHandler::new(Arc::clone(&controller)).with_shutdown(shutdown_tx));
    let ipc_server = Arc::new(IpcServer::new(config.ipc.clone(), handler));
    let mut ipc_handle = {
        let server = Arc::clone(&ipc_server);
        tokio::spawn(async move { server.run().await })
    };

    let mut ipc_finished = false;
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        () = wait_for_sigterm() => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = shutdown_rx.recv() => {
            info!("Shutdown requested via IPC");
        }
        result = &mut ipc_handle, if config.ipc.enabled => {
            ipc_finished = true;
            match result {
                Ok(Ok(())) => warn!("IPC server stopped unexpectedly"),
                Ok(Err(e)) => {
                    error!("IPC server failed: {}", e);
                    controller.quiesce().await;
                    return Err(e.into());
                }
                Err(e) => error!("IPC server task panicked: {}", e),
            }
        }
    }

    if !ipc_finished {
        ipc_server.shutdown();
        if tokio::time::timeout(Duration::from_secs(5), ipc_handle)
            .await
            .is_err()
        {
            warn!("IPC server did not stop within 5s");
        }
    }

    // A running transition must not be cut off by runtime shutdown.
    controller.quiesce().await;

    // Installed rules are left in place on exit.
    let state = controller.state();
    info!("Shutdown complete (transparent proxy left at {})", state);

    Ok(())
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}
