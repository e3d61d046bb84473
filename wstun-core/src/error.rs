//! Error types for the wstun core

use std::net::Ipv4Addr;

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the allocator, codec and relay
#[derive(Debug, Error)]
pub enum Error {
    #[error("no available address in {0}")]
    AddressPoolExhausted(String),

    #[error("lease store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("lease store is corrupt: {0}")]
    CorruptStore(String),

    #[error("conflicting lease: {device_id} -> {addr}")]
    LeaseConflict { device_id: String, addr: Ipv4Addr },

    #[error("device {device_id} holds lease {addr} outside of {block}")]
    LeaseOutOfRange {
        device_id: String,
        addr: Ipv4Addr,
        block: String,
    },

    #[error("invalid CIDR block: {0}")]
    InvalidCidr(String),

    #[error("invalid device id")]
    InvalidDeviceId,

    #[error("compression error: {0}")]
    Compression(String),

    #[error("decompression error: {0}")]
    Decompression(String),

    /// A client sent a packet the interface cannot carry
    #[error("packet of {len} bytes exceeds the {limit} byte limit")]
    PacketTooLarge { len: usize, limit: usize },

    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    #[error("interface error: {0}")]
    Interface(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if the error means the virtual interface is unusable
    pub fn is_interface_failure(&self) -> bool {
        matches!(self, Error::Interface(_))
    }

    /// Check if the error is a registration failure the caller caused
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::AddressPoolExhausted(_) | Error::InvalidDeviceId
        )
    }
}
