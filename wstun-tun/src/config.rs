//! Settings for the server's tunnel interface

use std::net::Ipv4Addr;

use wstun_core::Ipv4Block;

use crate::error::{Error, Result};
use crate::{DEFAULT_MTU, MIN_MTU};

/// Longest interface name the kernel accepts (IFNAMSIZ minus the NUL)
pub const MAX_NAME_LEN: usize = 15;

/// Name, address and MTU of the tunnel interface
///
/// The interface holds the server's own address on the tunnel network; the
/// prefix length makes the kernel route the whole block through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunConfig {
    pub name: String,
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    pub mtu: u16,
}

impl TunConfig {
    pub fn builder() -> TunConfigBuilder {
        TunConfigBuilder::default()
    }

    /// Interface carrying `block`'s server address
    pub fn for_block(name: impl Into<String>, block: &Ipv4Block, mtu: u16) -> Result<Self> {
        Self::builder()
            .name(name)
            .ipv4(block.server_addr(), block.prefix_len())
            .mtu(mtu)
            .build()
    }

    pub fn netmask(&self) -> Ipv4Addr {
        match self.prefix_len {
            0 => Ipv4Addr::UNSPECIFIED,
            len => Ipv4Addr::from(u32::MAX << (32 - u32::from(len.min(32)))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > MAX_NAME_LEN {
            return Err(Error::Config(format!(
                "interface name {:?} must be 1 to {} bytes",
                self.name, MAX_NAME_LEN
            )));
        }

        if self.prefix_len > 32 {
            return Err(Error::Config(format!(
                "prefix length {} is out of range",
                self.prefix_len
            )));
        }

        if self.mtu < MIN_MTU {
            return Err(Error::Config(format!(
                "MTU {} is below the IPv4 minimum of {}",
                self.mtu, MIN_MTU
            )));
        }

        Ok(())
    }
}

/// Builder for [`TunConfig`]; the address is mandatory
#[derive(Debug)]
pub struct TunConfigBuilder {
    name: String,
    ipv4: Option<(Ipv4Addr, u8)>,
    mtu: u16,
}

impl Default for TunConfigBuilder {
    fn default() -> Self {
        Self {
            name: "wstun".to_string(),
            ipv4: None,
            mtu: DEFAULT_MTU,
        }
    }
}

impl TunConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn ipv4(mut self, address: impl Into<Ipv4Addr>, prefix_len: u8) -> Self {
        self.ipv4 = Some((address.into(), prefix_len));
        self
    }

    pub fn mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn build(self) -> Result<TunConfig> {
        let (address, prefix_len) = self
            .ipv4
            .ok_or_else(|| Error::Config("the interface needs an IPv4 address".into()))?;

        let config = TunConfig {
            name: self.name,
            address,
            prefix_len,
            mtu: self.mtu,
        };
        config.validate()?;
        Ok(config)
    }
}
