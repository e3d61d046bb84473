//! Lease storage backends
//!
//! The allocator records each `device id -> address` lease exactly once and
//! never rewrites it. [`FileStore`] keeps the table in a JSON document that is
//! replaced atomically on every insert; [`MemoryStore`] keeps it in process.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Storage for device leases
///
/// Lookups are served from memory. `insert` must be all-or-nothing: if it
/// returns an error the lease is not recorded, in memory or on disk.
pub trait LeaseStore: Send {
    /// Address leased to `device_id`, if any
    fn lookup(&self, device_id: &str) -> Option<Ipv4Addr>;

    /// Whether `addr` is leased to any device
    fn is_leased(&self, addr: Ipv4Addr) -> bool;

    /// Record a new lease
    fn insert(&mut self, device_id: &str, addr: Ipv4Addr) -> Result<()>;

    /// All leases, ordered by device id
    fn leases(&self) -> Vec<(String, Ipv4Addr)>;

    /// Number of leases
    fn len(&self) -> usize;

    /// Whether no lease has been recorded
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Both directions of the lease table
#[derive(Debug, Default, Clone)]
struct LeaseTable {
    by_device: BTreeMap<String, Ipv4Addr>,
    by_addr: HashMap<Ipv4Addr, String>,
}

impl LeaseTable {
    fn from_map(by_device: BTreeMap<String, Ipv4Addr>) -> Result<Self> {
        let mut by_addr = HashMap::with_capacity(by_device.len());
        for (device_id, addr) in &by_device {
            if let Some(other) = by_addr.insert(*addr, device_id.clone()) {
                return Err(Error::CorruptStore(format!(
                    "{} is leased to both {:?} and {:?}",
                    addr, other, device_id
                )));
            }
        }
        Ok(Self { by_device, by_addr })
    }

    fn check_insert(&self, device_id: &str, addr: Ipv4Addr) -> Result<()> {
        if self.by_device.contains_key(device_id) || self.by_addr.contains_key(&addr) {
            return Err(Error::LeaseConflict {
                device_id: device_id.to_string(),
                addr,
            });
        }
        Ok(())
    }

    fn insert_unchecked(&mut self, device_id: &str, addr: Ipv4Addr) {
        self.by_device.insert(device_id.to_string(), addr);
        self.by_addr.insert(addr, device_id.to_string());
    }

    fn leases(&self) -> Vec<(String, Ipv4Addr)> {
        self.by_device
            .iter()
            .map(|(id, addr)| (id.clone(), *addr))
            .collect()
    }
}

/// In-process lease store; leases are lost when it is dropped
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: LeaseTable,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LeaseStore for MemoryStore {
    fn lookup(&self, device_id: &str) -> Option<Ipv4Addr> {
        self.table.by_device.get(device_id).copied()
    }

    fn is_leased(&self, addr: Ipv4Addr) -> bool {
        self.table.by_addr.contains_key(&addr)
    }

    fn insert(&mut self, device_id: &str, addr: Ipv4Addr) -> Result<()> {
        self.table.check_insert(device_id, addr)?;
        self.table.insert_unchecked(device_id, addr);
        Ok(())
    }

    fn leases(&self) -> Vec<(String, Ipv4Addr)> {
        self.table.leases()
    }

    fn len(&self) -> usize {
        self.table.by_device.len()
    }
}

/// On-disk document format
#[derive(Debug, Default, Serialize, Deserialize)]
struct LeaseDocument {
    #[serde(default)]
    leases: BTreeMap<String, Ipv4Addr>,
}

/// Durable lease store backed by a JSON file
///
/// Writes go to a sibling `.tmp` file which is synced and then renamed over
/// the original, so a crash leaves either the old or the new table.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    table: LeaseTable,
}

impl FileStore {
    /// Open the store at `path`, creating an empty one if it does not exist
    ///
    /// The parent directory must already exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            let store = Self {
                path,
                table: LeaseTable::default(),
            };
            store.persist(&LeaseDocument::default())?;
            log::info!("Created lease store at {}", store.path.display());
            return Ok(store);
        }

        let content = fs::read(&path).map_err(|e| unavailable(&path, e))?;
        let document: LeaseDocument = serde_json::from_slice(&content)
            .map_err(|e| Error::CorruptStore(format!("{}: {}", path.display(), e)))?;
        let table = LeaseTable::from_map(document.leases)?;

        log::debug!(
            "Loaded {} lease(s) from {}",
            table.by_device.len(),
            path.display()
        );

        Ok(Self { path, table })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn persist(&self, document: &LeaseDocument) -> Result<()> {
        let content = serde_json::to_vec_pretty(document)
            .map_err(|e| Error::StoreUnavailable(format!("failed to encode leases: {}", e)))?;

        let temp_path = self.temp_path();
        let mut file = File::create(&temp_path).map_err(|e| unavailable(&temp_path, e))?;
        file.write_all(&content)
            .and_then(|_| file.sync_all())
            .map_err(|e| unavailable(&temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, &self.path).map_err(|e| unavailable(&self.path, e))?;

        // Make the rename itself durable
        #[cfg(unix)]
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(())
    }
}

impl LeaseStore for FileStore {
    fn lookup(&self, device_id: &str) -> Option<Ipv4Addr> {
        self.table.by_device.get(device_id).copied()
    }

    fn is_leased(&self, addr: Ipv4Addr) -> bool {
        self.table.by_addr.contains_key(&addr)
    }

    fn insert(&mut self, device_id: &str, addr: Ipv4Addr) -> Result<()> {
        self.table.check_insert(device_id, addr)?;

        let mut leases = self.table.by_device.clone();
        leases.insert(device_id.to_string(), addr);
        self.persist(&LeaseDocument { leases })?;

        self.table.insert_unchecked(device_id, addr);
        Ok(())
    }

    fn leases(&self) -> Vec<(String, Ipv4Addr)> {
        self.table.leases()
    }

    fn len(&self) -> usize {
        self.table.by_device.len()
    }
}

fn unavailable(path: &Path, err: std::io::Error) -> Error {
    Error::StoreUnavailable(format!("{}: {}", path.display(), err))
}
