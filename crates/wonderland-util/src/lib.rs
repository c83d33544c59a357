//! Shared utilities for wonderland
//!
//! This crate provides:
//! - ID types (ChannelId)
//! - Default paths for the listening socket, secondary channels and config
//! - Protocol and product version constants

mod ids;
mod paths;
mod version;

pub use ids::*;
pub use paths::*;
pub use version::*;
