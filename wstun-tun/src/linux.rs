//! Linux host checks for the TUN driver

use std::path::Path;

use crate::error::{Error, Result};

/// Character device the TUN driver exposes
pub const TUN_DEVICE_PATH: &str = "/dev/net/tun";

/// Whether the TUN driver is present on this host
pub fn is_tun_available() -> bool {
    Path::new(TUN_DEVICE_PATH).exists()
}

/// Fail early with a readable error when the driver is missing
pub fn ensure_tun_available() -> Result<()> {
    if is_tun_available() {
        return Ok(());
    }
    Err(Error::Unavailable(format!(
        "{} not found; load the tun module with `modprobe tun`",
        TUN_DEVICE_PATH
    )))
}

/// Whether `name` names an existing network interface
pub fn interface_exists(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && Path::new("/sys/class/net").join(name).exists()
}
