//! Configuration types for the wstun server

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wstun_core::Ipv4Block;

use crate::error::{Error, Result};
use crate::paths::Paths;

/// Smallest MTU accepted for the tunnel, the IPv4 minimum reassembly size
pub const MIN_TUNNEL_MTU: u16 = 576;

/// Largest binding_ttl or purge_interval accepted, in seconds
pub const MAX_PERIOD_SECS: u64 = wstun_core::MAX_TTL.as_secs();

/// Main configuration structure
///
/// # Example Configuration
///
/// ```toml
/// log_level = "info"
///
/// [server]
/// listen = "0.0.0.0:3001"
/// cidr = "10.0.10.1/24"
/// key = "my-secret-key"
///
/// [paths]
/// data_dir = "/var/lib/wstun"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub paths: Paths,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server: ServerConfig::default(),
            paths: Paths::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the configuration to `path`, replacing any existing file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.validate()?;
        let content = self.to_toml()?;

        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, path)?;

        log::info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !matches!(
            self.log_level.to_ascii_lowercase().as_str(),
            "error" | "warn" | "info" | "debug" | "trace" | "off"
        ) {
            return Err(Error::Config(format!(
                "unknown log level {:?}",
                self.log_level
            )));
        }
        self.server.validate()
    }

    /// Generate a sample configuration
    pub fn sample() -> String {
        r#"# wstun server configuration

# Log level: "error", "warn", "info", "debug", "trace"
# RUST_LOG overrides this when set.
log_level = "info"

[server]
# Address the HTTP/WebSocket listener binds to
listen = "0.0.0.0:3001"

# Tunnel network. The server takes the first host address (network + 1),
# clients are leased addresses from network + 2 up to broadcast - 1.
cidr = "10.0.10.1/24"

# Shared secret clients send in the `key` header.
# Leave empty to accept every request.
key = "your-secret-key-here"

# Name of the TUN interface
device_name = "wstun"

# MTU of the TUN interface (minimum 576)
mtu = 1500

# Interface read buffer in bytes (at least the MTU)
buffer_size = 65536

# Snappy-compress every tunnel payload. Clients must use the same setting.
compress = false

# Seconds a client's address stays routed to its connection without traffic
binding_ttl = 86400

# Seconds between sweeps of expired routes
purge_interval = 600

# Frames queued per connection before packets to it are dropped
peer_queue = 1024

[paths]
config_dir = "/etc/wstun"
data_dir = "/var/lib/wstun"
log_dir = "/var/log/wstun"
"#
        .to_string()
    }
}

/// Server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket listener binds to
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Tunnel network in CIDR notation
    #[serde(default = "default_cidr")]
    pub cidr: String,

    /// Shared secret; empty disables authentication
    #[serde(default)]
    pub key: String,

    /// TUN interface name
    #[serde(default = "default_device_name")]
    pub device_name: String,

    #[serde(default = "default_mtu")]
    pub mtu: u16,

    /// Interface read buffer size
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Snappy-compress tunnel payloads
    #[serde(default)]
    pub compress: bool,

    /// Binding lifetime in seconds
    #[serde(default = "default_binding_ttl")]
    pub binding_ttl: u64,

    /// Seconds between expired-binding sweeps
    #[serde(default = "default_purge_interval")]
    pub purge_interval: u64,

    /// Per-connection outbound frame queue depth
    #[serde(default = "default_peer_queue")]
    pub peer_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            cidr: default_cidr(),
            key: String::new(),
            device_name: default_device_name(),
            mtu: default_mtu(),
            buffer_size: default_buffer_size(),
            compress: false,
            binding_ttl: default_binding_ttl(),
            purge_interval: default_purge_interval(),
            peer_queue: default_peer_queue(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        self.block()?;

        if self.device_name.is_empty() {
            return Err(Error::Config("device_name must not be empty".into()));
        }

        if self.mtu < MIN_TUNNEL_MTU {
            return Err(Error::Config(format!(
                "MTU {} is too small (minimum {})",
                self.mtu, MIN_TUNNEL_MTU
            )));
        }

        if self.buffer_size < self.mtu as usize {
            return Err(Error::Config(format!(
                "buffer_size {} is smaller than the MTU {}",
                self.buffer_size, self.mtu
            )));
        }

        for (name, secs) in [
            ("binding_ttl", self.binding_ttl),
            ("purge_interval", self.purge_interval),
        ] {
            if secs == 0 || secs > MAX_PERIOD_SECS {
                return Err(Error::Config(format!(
                    "{} must be between 1 and {} seconds",
                    name, MAX_PERIOD_SECS
                )));
            }
        }

        if self.peer_queue == 0 {
            return Err(Error::Config("peer_queue must be positive".into()));
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .map_err(|_| Error::Config(format!("invalid listen address: {}", self.listen)))
    }

    /// The tunnel network
    pub fn block(&self) -> Result<Ipv4Block> {
        Ipv4Block::from_cidr(&self.cidr)
            .map_err(|e| Error::Config(format!("invalid cidr {:?}: {}", self.cidr, e)))
    }

    /// Shared secret, if authentication is enabled
    pub fn key(&self) -> Option<&str> {
        Some(self.key.as_str()).filter(|k| !k.is_empty())
    }

    pub fn binding_ttl(&self) -> Duration {
        Duration::from_secs(self.binding_ttl)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval)
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_cidr() -> String {
    "10.0.10.1/24".to_string()
}

fn default_device_name() -> String {
    "wstun".to_string()
}

fn default_mtu() -> u16 {
    wstun_core::DEFAULT_MTU
}

fn default_buffer_size() -> usize {
    wstun_core::DEFAULT_BUFFER_SIZE
}

fn default_binding_ttl() -> u64 {
    wstun_core::DEFAULT_BINDING_TTL.as_secs()
}

fn default_purge_interval() -> u64 {
    600
}

fn default_peer_queue() -> usize {
    wstun_core::DEFAULT_PEER_QUEUE
}
