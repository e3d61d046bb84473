//! Virtual network interface for the wstun server
//!
//! A thin wrapper around `tun-rs` that creates the single layer-3 interface
//! every client shares, and plugs it into the relay through
//! [`wstun_core::TunTransport`].
//!
//! # Platform Requirements
//!
//! - Root privileges or the `CAP_NET_ADMIN` capability
//! - TUN kernel module loaded (`modprobe tun`)
//!
//! # Example
//!
//! ```ignore
//! use wstun_core::Ipv4Block;
//! use wstun_tun::{TunConfig, TunDevice};
//!
//! let block = Ipv4Block::from_cidr("10.0.10.1/24")?;
//! let device = TunDevice::create(TunConfig::for_block("wstun", &block, 1500)?).await?;
//! ```

pub mod config;
pub mod device;
pub mod error;

#[cfg(target_os = "linux")]
pub mod linux;

pub use config::{TunConfig, TunConfigBuilder, MAX_NAME_LEN};
pub use device::TunDevice;
pub use error::{Error, Result};

/// Default MTU for the tunnel interface
pub const DEFAULT_MTU: u16 = wstun_core::DEFAULT_MTU;

/// Smallest MTU an IPv4 interface may use
pub const MIN_MTU: u16 = 68;
