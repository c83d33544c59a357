//! IPC layer for wonderland
//!
//! Provides:
//! - Unix domain socket server with strictly serialized sessions
//! - Length-prefixed binary framing
//! - `RABBITHOLE` / `VERSION` command dispatch
//! - Secondary channel registry and broadcast event registry

mod broadcast;
mod channel;
mod client;
mod dispatch;
pub mod frame;
mod server;

pub use broadcast::*;
pub use channel::*;
pub use client::*;
pub use dispatch::*;
pub use frame::{FrameError, FrameResult};
pub use server::*;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// IPC errors
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Failed to listen on {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Server already started")]
    AlreadyStarted,

    #[error("Protocol version mismatch (received {received}, expected {expected})")]
    VersionMismatch { received: u32, expected: u32 },

    #[error("Payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: u32, max: u32 },

    #[error("Read timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

pub type IpcResult<T> = Result<T, IpcError>;
