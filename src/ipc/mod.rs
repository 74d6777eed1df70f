//! IPC (Inter-Process Communication) module
//!
//! This module provides a Unix socket-based IPC server for switching the
//! transparent proxy mode at runtime.
//!
//! # Protocol
//!
//! Messages are length-prefixed JSON:
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: JSON-encoded command or response
//!
//! # Example
//!
//! ```no_run
//! use tproxy_ctl::ipc::{IpcClient, IpcCommand, IpcResponse};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = IpcClient::new("/var/run/tproxy-ctl.sock");
//!
//! let response = client
//!     .send(IpcCommand::SetTransparentMode {
//!         mode: "tproxy".into(),
//!         scope: Some("router".into()),
//!     })
//!     .await?;
//! if let IpcResponse::TransparentResult(result) = response {
//!     println!("[{}] {}", result.code, result.message);
//! }
//! # Ok(())
//! # }
//! ```

mod handler;
mod protocol;
mod server;

pub use handler::IpcHandler;
pub use protocol::{
    decode_message, encode_message, ErrorCode, IpcCommand, IpcError, IpcResponse, ServerStatus,
    TransparentResult, LENGTH_PREFIX_SIZE, MAX_MESSAGE_SIZE,
};
pub use server::{IpcClient, IpcServer};
