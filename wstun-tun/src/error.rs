//! Error types for wstun-tun

use std::io;
use thiserror::Error;

/// Result type alias for wstun-tun operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors creating or using the tunnel interface
#[derive(Debug, Error)]
pub enum Error {
    /// Packet read or write failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to create interface {name}: {reason}")]
    Create { name: String, reason: String },

    /// The TUN driver is missing on this host
    #[error("TUN driver unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    pub(crate) fn create(name: &str, reason: impl std::fmt::Display) -> Self {
        Error::Create {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the process lacks the privileges to manage interfaces
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == io::ErrorKind::PermissionDenied,
            Error::Create { reason, .. } => {
                let reason = reason.to_ascii_lowercase();
                reason.contains("permission denied") || reason.contains("operation not permitted")
            }
            _ => false,
        }
    }
}

/// Anything the interface reports is an interface failure to the relay
impl From<Error> for wstun_core::Error {
    fn from(err: Error) -> Self {
        wstun_core::Error::Interface(err.to_string())
    }
}
