//! Persistent IPv4 address allocator
//!
//! Devices register with an opaque identifier and receive a permanent lease
//! from the configured block. For a block such as 10.0.10.0/24:
//! - 10.0.10.0 is the network address
//! - 10.0.10.1 is the server's own tunnel address
//! - 10.0.10.2 ..= 10.0.10.254 are leased to devices
//! - 10.0.10.255 is the broadcast address
//!
//! Range math treats the address space as plain `u32` integers.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use ipnet::Ipv4Net;

use crate::error::{Error, Result};
use crate::store::LeaseStore;

/// Longest prefix that still leaves room for one device
pub const MAX_PREFIX_LEN: u8 = 30;

/// An IPv4 CIDR block that devices are leased from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Block {
    net: Ipv4Net,
}

impl Ipv4Block {
    /// Create a block from any address inside it and a prefix length
    ///
    /// Host bits in `addr` are ignored, so `10.0.10.1/24` and `10.0.10.0/24`
    /// describe the same block.
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > MAX_PREFIX_LEN {
            return Err(Error::InvalidCidr(format!(
                "/{} is too small for a server and a device (need at least /{})",
                prefix_len, MAX_PREFIX_LEN
            )));
        }

        let net = Ipv4Net::new(addr, prefix_len)
            .map_err(|e| Error::InvalidCidr(e.to_string()))?;

        Ok(Self { net })
    }

    /// Create from CIDR notation (e.g., "10.0.10.1/24")
    pub fn from_cidr(cidr: &str) -> Result<Self> {
        let net: Ipv4Net = cidr
            .trim()
            .parse()
            .map_err(|_| Error::InvalidCidr(cidr.to_string()))?;

        Self::new(net.addr(), net.prefix_len())
    }

    /// Network address
    pub fn network(&self) -> Ipv4Addr {
        self.net.network()
    }

    /// Broadcast address
    pub fn broadcast(&self) -> Ipv4Addr {
        self.net.broadcast()
    }

    /// Prefix length
    pub fn prefix_len(&self) -> u8 {
        self.net.prefix_len()
    }

    /// Address reserved for the server (network + 1)
    pub fn server_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network()) + 1)
    }

    /// Inclusive bounds of the leasable range: `[network + 2, broadcast - 1]`
    pub fn host_range(&self) -> (u32, u32) {
        let first = u32::from(self.network()) + 2;
        let last = u32::from(self.broadcast()) - 1;
        (first, last)
    }

    /// Number of addresses that can be leased
    pub fn capacity(&self) -> u32 {
        let (first, last) = self.host_range();
        last - first + 1
    }

    /// Check whether `addr` is a leasable host address of this block
    pub fn is_leasable(&self, addr: Ipv4Addr) -> bool {
        let (first, last) = self.host_range();
        (first..=last).contains(&u32::from(addr))
    }
}

impl fmt::Display for Ipv4Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix_len())
    }
}

/// The result of a registration: where the device lives in the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    /// Address leased to the device
    pub addr: Ipv4Addr,
    /// Prefix length the device must configure
    pub prefix_len: u8,
    /// The server's tunnel address
    pub server: Ipv4Addr,
}

impl Lease {
    /// Client address in CIDR notation, e.g. `10.0.10.5/24`
    pub fn client_cidr(&self) -> String {
        format!("{}/{}", self.addr, self.prefix_len)
    }
}

impl fmt::Display for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client={}, server={}", self.client_cidr(), self.server)
    }
}

/// Hands out unique, permanent addresses to devices
///
/// Every registration runs under a single mutex spanning lookup, address scan
/// and insert, so concurrent registrations can never claim the same address.
pub struct Allocator {
    block: Ipv4Block,
    store: Mutex<Box<dyn LeaseStore>>,
}

impl Allocator {
    /// Create an allocator over `block` backed by `store`
    ///
    /// Fails if the store already holds a lease outside the block, which
    /// happens when the configured network changed after devices registered.
    pub fn new(block: Ipv4Block, store: impl LeaseStore + 'static) -> Result<Self> {
        for (device_id, addr) in store.leases() {
            if !block.is_leasable(addr) {
                return Err(Error::LeaseOutOfRange {
                    device_id,
                    addr,
                    block: block.to_string(),
                });
            }
        }

        log::debug!(
            "Allocator for {} opened with {} existing lease(s)",
            block,
            store.len()
        );

        Ok(Self {
            block,
            store: Mutex::new(Box::new(store)),
        })
    }

    /// Register a device, returning its lease
    ///
    /// Idempotent: a known device gets its existing lease back.
    pub fn register(&self, device_id: &str) -> Result<Lease> {
        if device_id.is_empty() {
            return Err(Error::InvalidDeviceId);
        }

        let mut store = self
            .store
            .lock()
            .map_err(|_| Error::StoreUnavailable("lease store lock poisoned".into()))?;

        if let Some(addr) = store.lookup(device_id) {
            return Ok(self.lease_for(addr));
        }

        let addr = self
            .first_free(store.as_ref())
            .ok_or_else(|| Error::AddressPoolExhausted(self.block.to_string()))?;

        store.insert(device_id, addr)?;
        log::info!("Leased {} to device {:?}", addr, device_id);

        Ok(self.lease_for(addr))
    }

    /// The block addresses are leased from
    pub fn block(&self) -> &Ipv4Block {
        &self.block
    }

    /// Number of leases recorded so far
    pub fn lease_count(&self) -> Result<usize> {
        let store = self
            .store
            .lock()
            .map_err(|_| Error::StoreUnavailable("lease store lock poisoned".into()))?;
        Ok(store.len())
    }

    /// Total number of leasable addresses
    pub fn capacity(&self) -> u32 {
        self.block.capacity()
    }

    fn first_free(&self, store: &dyn LeaseStore) -> Option<Ipv4Addr> {
        let (first, last) = self.block.host_range();
        (first..=last)
            .map(Ipv4Addr::from)
            .find(|addr| !store.is_leased(*addr))
    }

    fn lease_for(&self, addr: Ipv4Addr) -> Lease {
        Lease {
            addr,
            prefix_len: self.block.prefix_len(),
            server: self.block.server_addr(),
        }
    }
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("block", &self.block)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileStore, MemoryStore};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn allocator(cidr: &str) -> Allocator {
        Allocator::new(Ipv4Block::from_cidr(cidr).unwrap(), MemoryStore::new()).unwrap()
    }

    #[test]
    fn test_block_bounds() {
        let block = Ipv4Block::from_cidr("10.0.10.1/24").unwrap();
        assert_eq!(block.network(), Ipv4Addr::new(10, 0, 10, 0));
        assert_eq!(block.broadcast(), Ipv4Addr::new(10, 0, 10, 255));
        assert_eq!(block.server_addr(), Ipv4Addr::new(10, 0, 10, 1));
        assert_eq!(block.capacity(), 253);
        assert_eq!(block.to_string(), "10.0.10.0/24");

        assert!(!block.is_leasable(Ipv4Addr::new(10, 0, 10, 0)));
        assert!(!block.is_leasable(Ipv4Addr::new(10, 0, 10, 1)));
        assert!(block.is_leasable(Ipv4Addr::new(10, 0, 10, 2)));
        assert!(block.is_leasable(Ipv4Addr::new(10, 0, 10, 254)));
        assert!(!block.is_leasable(Ipv4Addr::new(10, 0, 10, 255)));
        assert!(!block.is_leasable(Ipv4Addr::new(10, 0, 11, 2)));
    }

    #[test]
    fn test_block_rejects_small_prefixes() {
        assert!(Ipv4Block::from_cidr("10.0.10.0/31").is_err());
        assert!(Ipv4Block::from_cidr("10.0.10.0/32").is_err());
        assert!(Ipv4Block::from_cidr("10.0.10.0").is_err());
        assert!(Ipv4Block::from_cidr("not-a-cidr/24").is_err());
        assert!(Ipv4Block::from_cidr("fd00::1/64").is_err());
    }

    #[test]
    fn test_block_at_top_of_address_space() {
        let block = Ipv4Block::from_cidr("255.255.255.252/30").unwrap();
        assert_eq!(block.capacity(), 1);
        assert!(block.is_leasable(Ipv4Addr::new(255, 255, 255, 254)));
        assert!(!block.is_leasable(Ipv4Addr::new(255, 255, 255, 255)));
    }

    #[test]
    fn test_smallest_block_scenario() {
        let alloc = allocator("10.0.10.1/30");

        let a = alloc.register("a").unwrap();
        assert_eq!(a.client_cidr(), "10.0.10.2/30");
        assert_eq!(a.server, Ipv4Addr::new(10, 0, 10, 1));

        let b = alloc.register("b");
        assert!(matches!(b, Err(Error::AddressPoolExhausted(_))));

        assert_eq!(alloc.register("a").unwrap(), a);
    }

    #[test]
    fn test_leases_survive_restart() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("allocator.json");
        let block = Ipv4Block::from_cidr("10.0.10.1/24").unwrap();

        let (laptop, phone) = {
            let alloc = Allocator::new(block, FileStore::open(&path).unwrap()).unwrap();
            (
                alloc.register("laptop").unwrap(),
                alloc.register("phone").unwrap(),
            )
        };

        let alloc = Allocator::new(block, FileStore::open(&path).unwrap()).unwrap();
        assert_eq!(alloc.lease_count().unwrap(), 2);
        assert_eq!(alloc.register("phone").unwrap(), phone);
        assert_eq!(alloc.register("laptop").unwrap(), laptop);

        let tablet = alloc.register("tablet").unwrap();
        assert_ne!(tablet.addr, laptop.addr);
        assert_ne!(tablet.addr, phone.addr);
    }

    #[test]
    fn test_register_is_idempotent() {
        let alloc = allocator("10.0.10.1/24");

        let first = alloc.register("laptop").unwrap();
        let second = alloc.register("laptop").unwrap();
        assert_eq!(first, second);
        assert_eq!(alloc.lease_count().unwrap(), 1);
    }

    #[test]
    fn test_leases_are_sequential_from_lower_bound() {
        let alloc = allocator("192.168.7.0/24");

        let leases: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|id| alloc.register(id).unwrap().addr)
            .collect();

        assert_eq!(
            leases,
            vec![
                Ipv4Addr::new(192, 168, 7, 2),
                Ipv4Addr::new(192, 168, 7, 3),
                Ipv4Addr::new(192, 168, 7, 4),
            ]
        );
    }

    #[test]
    fn test_exhaustion_after_capacity() {
        let alloc = allocator("10.1.0.0/28");
        let k = alloc.capacity();
        assert_eq!(k, 13);

        let mut seen = HashSet::new();
        for i in 0..k {
            let lease = alloc.register(&format!("dev-{}", i)).unwrap();
            assert!(alloc.block().is_leasable(lease.addr));
            assert_ne!(lease.addr, alloc.block().server_addr());
            assert!(seen.insert(lease.addr));
        }

        let overflow = alloc.register("one-too-many");
        assert!(matches!(overflow, Err(Error::AddressPoolExhausted(_))));

        // Known devices still resolve after exhaustion
        assert!(alloc.register("dev-0").is_ok());
    }

    #[test]
    fn test_concurrent_registrations_are_unique() {
        let alloc = Arc::new(allocator("10.2.0.0/24"));

        let addrs: Vec<Ipv4Addr> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|t| {
                    let alloc = alloc.clone();
                    scope.spawn(move || {
                        (0..10)
                            .map(|i| alloc.register(&format!("t{}-d{}", t, i)).unwrap().addr)
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        let unique: HashSet<_> = addrs.iter().collect();
        assert_eq!(addrs.len(), 160);
        assert_eq!(unique.len(), 160);
    }

    #[test]
    fn test_rejects_empty_device_id() {
        let alloc = allocator("10.0.10.1/24");
        assert!(matches!(alloc.register(""), Err(Error::InvalidDeviceId)));
    }

    #[test]
    fn test_rejects_store_with_foreign_leases() {
        let mut store = MemoryStore::new();
        store.insert("old", Ipv4Addr::new(172, 16, 0, 9)).unwrap();

        let block = Ipv4Block::from_cidr("10.0.10.1/24").unwrap();
        let result = Allocator::new(block, store);
        assert!(matches!(result, Err(Error::LeaseOutOfRange { .. })));
    }

    #[test]
    fn test_lease_display() {
        let lease = Lease {
            addr: Ipv4Addr::new(10, 0, 10, 5),
            prefix_len: 24,
            server: Ipv4Addr::new(10, 0, 10, 1),
        };
        assert_eq!(lease.to_string(), "client=10.0.10.5/24, server=10.0.10.1");
    }
}
