//! IPC command handler
//!
//! This module processes IPC commands and generates responses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::protocol::{ErrorCode, IpcCommand, IpcResponse, ServerStatus, TransparentResult};
use crate::controller::TransparentController;
use crate::rules::{Mode, Scope};

/// IPC command handler
pub struct IpcHandler {
    /// Mode controller
    controller: Arc<TransparentController>,

    /// Daemon-wide shutdown trigger, if the daemon wants IPC to stop it
    shutdown_tx: Option<broadcast::Sender<()>>,

    /// Set once a shutdown was requested
    shutting_down: AtomicBool,

    /// Server start time
    start_time: Instant,

    /// Server version
    version: String,
}

impl IpcHandler {
    /// Create a new IPC handler
    pub fn new(controller: Arc<TransparentController>) -> Self {
        Self {
            controller,
            shutdown_tx: None,
            shutting_down: AtomicBool::new(false),
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Fire `shutdown_tx` when a `shutdown` command arrives
    #[must_use]
    pub fn with_shutdown(mut self, shutdown_tx: broadcast::Sender<()>) -> Self {
        self.shutdown_tx = Some(shutdown_tx);
        self
    }

    /// Handle an IPC command
    pub async fn handle(&self, command: IpcCommand) -> IpcResponse {
        debug!("Handling IPC command: {:?}", command);

        match command {
            IpcCommand::Ping => IpcResponse::Pong,

            IpcCommand::Status => self.handle_status(),

            IpcCommand::SetTransparentMode { mode, scope } => {
                self.handle_set_transparent_mode(&mode, scope.as_deref()).await
            }

            IpcCommand::GetTransparentStatus => {
                IpcResponse::TransparentStatus(self.controller.status())
            }

            IpcCommand::PreviewRuleset { mode, scope, port } => {
                match parse_request(&mode, scope.as_deref()) {
                    Ok((mode, scope)) => {
                        IpcResponse::Ruleset(self.controller.preview(mode, scope, port))
                    }
                    Err(response) => response,
                }
            }

            IpcCommand::Shutdown => self.handle_shutdown(),
        }
    }

    fn handle_status(&self) -> IpcResponse {
        let status = self.controller.status();

        IpcResponse::Status(ServerStatus {
            version: self.version.clone(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            mode: status.state.mode,
            scope: status.state.scope,
            platform_supported: status.platform_supported,
            shutting_down: self.shutting_down.load(Ordering::Relaxed),
        })
    }

    async fn handle_set_transparent_mode(&self, mode: &str, scope: Option<&str>) -> IpcResponse {
        if self.shutting_down.load(Ordering::Relaxed) {
            return IpcResponse::error(ErrorCode::ShuttingDown, "Daemon is shutting down");
        }

        let (mode, scope) = match parse_request(mode, scope) {
            Ok(parsed) => parsed,
            Err(response) => return response,
        };

        info!("Transparent mode change requested: {}/{}", mode, scope);

        match self.controller.set_mode(mode, scope).await {
            Ok(outcome) => IpcResponse::TransparentResult(TransparentResult::from(outcome)),
            Err(e) => IpcResponse::error(
                ErrorCode::OperationFailed,
                format!("Failed to save transparent mode: {e}"),
            ),
        }
    }

    fn handle_shutdown(&self) -> IpcResponse {
        info!("Shutdown requested via IPC");
        self.shutting_down.store(true, Ordering::Relaxed);

        if let Some(tx) = &self.shutdown_tx {
            if tx.send(()).is_err() {
                warn!("No shutdown listener registered");
            }
        }

        IpcResponse::success_with_message("Shutdown initiated")
    }
}

/// Parse mode and scope names, mapping failures to an `INVALID_PARAMETERS` response
fn parse_request(mode: &str, scope: Option<&str>) -> Result<(Mode, Scope), IpcResponse> {
    let mode: Mode = mode
        .parse()
        .map_err(|e| IpcResponse::error(ErrorCode::InvalidParameters, format!("{e}")))?;
    let scope: Scope = scope
        .unwrap_or_default()
        .parse()
        .map_err(|e| IpcResponse::error(ErrorCode::InvalidParameters, format!("{e}")))?;
    Ok((mode, scope))
}
