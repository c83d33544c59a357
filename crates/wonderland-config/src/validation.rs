//! Configuration validation

use crate::schema::{RawConfig, RawServerConfig};
use std::path::Path;
use thiserror::Error;

/// Longest path that fits in `sockaddr_un.sun_path` (108 bytes on Linux, NUL included)
pub const MAX_SOCKET_PATH_LEN: usize = 107;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be an absolute path, got '{value}'")]
    RelativePath { field: &'static str, value: String },

    #[error("socket_path is {len} bytes, longer than the {max} byte limit")]
    SocketPathTooLong { len: usize, max: usize },

    #[error("channel_prefix cannot be empty")]
    EmptyChannelPrefix,

    #[error("channel_prefix cannot contain '/': '{0}'")]
    PrefixContainsSeparator(String),

    #[error("max_payload_bytes must be greater than zero")]
    ZeroMaxPayload,

    #[error("server_version cannot be empty")]
    EmptyServerVersion,

    #[error("read_timeout_secs must be greater than zero")]
    ZeroReadTimeout,
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    validate_server(&config.server)
}

fn validate_server(server: &RawServerConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(path) = &server.socket_path {
        check_absolute("socket_path", path, &mut errors);

        let len = path.as_os_str().len();
        if len > MAX_SOCKET_PATH_LEN {
            errors.push(ValidationError::SocketPathTooLong {
                len,
                max: MAX_SOCKET_PATH_LEN,
            });
        }
    }

    if let Some(dir) = &server.channel_dir {
        check_absolute("channel_dir", dir, &mut errors);
    }

    if let Some(prefix) = &server.channel_prefix {
        if prefix.is_empty() {
            errors.push(ValidationError::EmptyChannelPrefix);
        } else if prefix.contains('/') {
            errors.push(ValidationError::PrefixContainsSeparator(prefix.clone()));
        }
    }

    if server.max_payload_bytes == Some(0) {
        errors.push(ValidationError::ZeroMaxPayload);
    }

    if let Some(version) = &server.server_version {
        if version.trim().is_empty() {
            errors.push(ValidationError::EmptyServerVersion);
        }
    }

    if server.read_timeout_secs == Some(0) {
        errors.push(ValidationError::ZeroReadTimeout);
    }

    errors
}

fn check_absolute(field: &'static str, path: &Path, errors: &mut Vec<ValidationError>) {
    if !path.is_absolute() {
        errors.push(ValidationError::RelativePath {
            field,
            value: path.display().to_string(),
        });
    }
}
