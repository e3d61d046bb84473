//! Error types for the wstun server

use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running the server
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to parse configuration file
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Failed to render configuration file
    #[error("failed to write config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Allocation, codec or relay error
    #[error("core error: {0}")]
    Core(#[from] wstun_core::Error),

    /// TUN device error
    #[error("TUN error: {0}")]
    Tun(#[from] wstun_tun::Error),

    /// One or more directories could not be created
    #[error("failed to provision directories: {0}")]
    Provision(String),

    /// The HTTP listener could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server stopped with an error
    #[error("server error: {0}")]
    Serve(String),

    /// The interface failed and the server cannot keep relaying
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    /// Check if the error must terminate the process
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Fatal(_) | Error::Tun(_) => true,
            Error::Core(e) => e.is_interface_failure(),
            _ => false,
        }
    }

    /// Check if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::ConfigParse(_) | Error::ConfigSerialize(_)
        )
    }
}
