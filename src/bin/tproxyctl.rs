//! tproxyctl: command-line client for the tproxy-ctl daemon
//!
//! # Usage
//!
//! ```bash
//! tproxyctl status
//! tproxyctl set tproxy router
//! tproxyctl set off
//! tproxyctl preview redirect local
//! tproxyctl ping
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};

use tproxy_ctl::controller::CODE_ERROR;
use tproxy_ctl::ipc::{IpcClient, IpcCommand, IpcResponse};

const DEFAULT_SOCKET_PATH: &str = "/var/run/tproxy-ctl.sock";

enum Action {
    Status,
    Set { mode: String, scope: Option<String> },
    Preview { mode: String, scope: Option<String>, port: Option<u16> },
    Ping,
}

struct Args {
    socket_path: PathBuf,
    action: Action,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut socket_path = std::env::var("TPROXY_CTL_IPC_SOCKET")
            .map_or_else(|_| PathBuf::from(DEFAULT_SOCKET_PATH), PathBuf::from);
        let mut port = None;
        let mut positional = Vec::new();

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-s" | "--socket" => match args.next() {
                    Some(path) => socket_path = PathBuf::from(path),
                    None => bail!("--socket requires a path"),
                },
                "-p" | "--port" => match args.next().map(|p| p.parse::<u16>()) {
                    Some(Ok(p)) => port = Some(p),
                    _ => bail!("--port requires a port number"),
                },
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("tproxyctl v{}", tproxy_ctl::VERSION);
                    std::process::exit(0);
                }
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        let action = match positional.next().as_deref() {
            Some("status") | None => Action::Status,
            Some("ping") => Action::Ping,
            Some("set") => match positional.next() {
                Some(mode) => Action::Set {
                    mode,
                    scope: positional.next(),
                },
                None => bail!("set requires a mode (off, tproxy, redirect)"),
            },
            Some("preview") => match positional.next() {
                Some(mode) => Action::Preview {
                    mode,
                    scope: positional.next(),
                    port,
                },
                None => bail!("preview requires a mode (off, tproxy, redirect)"),
            },
            Some(other) => bail!("Unknown command: {other}"),
        };

        Ok(Self {
            socket_path,
            action,
        })
    }
}

fn print_help() {
    println!(
        r#"tproxyctl v{}

Control the tproxy-ctl daemon over its IPC socket.

USAGE:
    tproxyctl [OPTIONS] <COMMAND>

COMMANDS:
    status                          Show mode, scope and last transition outcome
    set <MODE> [SCOPE]              Switch mode (off|tproxy|redirect), scope (local|router)
    preview <MODE> [SCOPE]          Print the ruleset the daemon would apply
    ping                            Check that the daemon is alive

OPTIONS:
    -s, --socket <PATH>     IPC socket path [default: {}]
    -p, --port <PORT>       Listen port override for preview
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    TPROXY_CTL_IPC_SOCKET   Override IPC socket path
"#,
        tproxy_ctl::VERSION,
        DEFAULT_SOCKET_PATH
    );
}

async fn run(args: Args) -> Result<ExitCode> {
    let client = IpcClient::new(&args.socket_path);

    let command = match args.action {
        Action::Ping => {
            if client.ping().await? {
                println!("pong");
                return Ok(ExitCode::SUCCESS);
            }
            bail!("Unexpected reply to ping");
        }
        Action::Status => IpcCommand::GetTransparentStatus,
        Action::Set { mode, scope } => IpcCommand::SetTransparentMode { mode, scope },
        Action::Preview { mode, scope, port } => IpcCommand::PreviewRuleset { mode, scope, port },
    };

    match client.send(command).await? {
        IpcResponse::TransparentResult(result) => {
            println!("[{}] {}", result.code, result.message);
            if let Some(detail) = result.detail {
                println!("{detail}");
            }
            Ok(ExitCode::from(result.code))
        }
        IpcResponse::TransparentStatus(status) => {
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(ExitCode::SUCCESS)
        }
        IpcResponse::Ruleset(preview) => {
            print!("{}", preview.script);
            Ok(ExitCode::SUCCESS)
        }
        IpcResponse::Error(err) => {
            eprintln!("Error: {err}");
            Ok(ExitCode::from(CODE_ERROR))
        }
        other => bail!("Unexpected response: {other:?}"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            print_help();
            return ExitCode::from(CODE_ERROR);
        }
    };

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(CODE_ERROR)
        }
    }
}
