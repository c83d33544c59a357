//! Version constants shared by the server and its clients

/// Wire protocol version. Every request header must carry exactly this value.
pub const PROTOCOL_VERSION: u32 = 1;

/// Product version reported in reply to `VERSION`
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
