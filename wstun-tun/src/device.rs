//! The tunnel interface
//!
//! Every client shares this one layer-3 device. Each `recv`/`send` moves
//! exactly one packet, so concurrent writers never interleave.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use wstun_core::{TunInfo, TunTransport};

use crate::config::TunConfig;
use crate::error::{Error, Result};

pub struct TunDevice {
    device: tun_rs::AsyncDevice,
    address: Ipv4Addr,
    info: TunInfo,
}

impl TunDevice {
    /// Create the interface, assign the server address and bring it up
    ///
    /// Requires root or `CAP_NET_ADMIN`.
    pub async fn create(config: TunConfig) -> Result<Self> {
        config.validate()?;

        #[cfg(target_os = "linux")]
        {
            crate::linux::ensure_tun_available()?;
            if crate::linux::interface_exists(&config.name) {
                log::warn!("Interface {} already exists", config.name);
            }
        }

        let device = tun_rs::DeviceBuilder::new()
            .name(&config.name)
            .ipv4(config.address, config.prefix_len, None::<Ipv4Addr>)
            .mtu(config.mtu)
            .build_async()
            .map_err(|e| Error::create(&config.name, e))?;

        // The kernel may pick a different name, e.g. for a "%d" pattern
        let name = device.name().map_err(|e| Error::create(&config.name, e))?;

        log::info!(
            "Interface {} up with {}/{} (MTU {})",
            name,
            config.address,
            config.prefix_len,
            config.mtu
        );

        Ok(Self {
            device,
            address: config.address,
            info: TunInfo {
                name,
                mtu: config.mtu,
            },
        })
    }

    /// Server address assigned to the interface
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }
}

#[async_trait]
impl TunTransport for TunDevice {
    async fn recv(&self, buf: &mut [u8]) -> wstun_core::Result<usize> {
        let n = self.device.recv(buf).await.map_err(Error::Io)?;
        Ok(n)
    }

    async fn send(&self, packet: &[u8]) -> wstun_core::Result<usize> {
        let n = self.device.send(packet).await.map_err(Error::Io)?;
        Ok(n)
    }

    fn info(&self) -> &TunInfo {
        &self.info
    }
}

impl std::fmt::Debug for TunDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunDevice")
            .field("name", &self.info.name)
            .field("address", &self.address)
            .field("mtu", &self.info.mtu)
            .finish()
    }
}
