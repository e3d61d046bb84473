//! Filesystem layout of an installed server

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of the configuration file inside `config_dir`
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Name of the lease store inside `data_dir`
pub const ALLOCATOR_FILE_NAME: &str = "allocdb.json";

/// Directories the server reads and writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paths {
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            data_dir: default_data_dir(),
            log_dir: default_log_dir(),
        }
    }
}

impl Paths {
    /// Lay everything out under one root, e.g. for tests
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            config_dir: root.join("etc"),
            data_dir: root.join("lib"),
            log_dir: root.join("log"),
        }
    }

    /// Every managed directory with a label
    pub fn dirs(&self) -> [(&'static str, &Path); 3] {
        [
            ("config", self.config_dir.as_path()),
            ("data", self.data_dir.as_path()),
            ("log", self.log_dir.as_path()),
        ]
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    pub fn allocator_file(&self) -> PathBuf {
        self.data_dir.join(ALLOCATOR_FILE_NAME)
    }

    /// Directories that do not exist yet
    pub fn missing(&self) -> Vec<&Path> {
        self.dirs()
            .into_iter()
            .filter(|(_, dir)| !dir.is_dir())
            .map(|(_, dir)| dir)
            .collect()
    }

    /// Create every missing directory
    ///
    /// Keeps going after a failure and reports all of them at once.
    pub fn provision(&self) -> Result<()> {
        let mut failures = Vec::new();

        for (label, dir) in self.dirs() {
            if dir.is_dir() {
                continue;
            }
            match create_dir(dir) {
                Ok(()) => log::info!("Created {} directory {}", label, dir.display()),
                Err(e) => failures.push(format!("{} ({}): {}", dir.display(), label, e)),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Provision(failures.join("; ")))
        }
    }
}

#[cfg(unix)]
fn create_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o755).create(dir)
}

#[cfg(not(unix))]
fn create_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/etc/wstun")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/wstun")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/wstun")
}
