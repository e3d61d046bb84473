//! wstun core
//!
//! Building blocks of a WebSocket-tunnelled VPN concentrator: many clients
//! share one virtual interface, each over its own WebSocket connection.
//!
//! - [`Allocator`] leases every device a permanent address from a CIDR block,
//!   backed by a [`LeaseStore`].
//! - [`Registry`] binds tunnel addresses to live connections, with expiry.
//! - [`Relay`] moves packets between the interface and the connections,
//!   routing by the addresses in each IP header.
//! - [`ByteCounters`] tracks relayed traffic.
//!
//! Nothing here depends on a particular TUN library or HTTP stack; both ends
//! are reached through the traits in [`transport`].

mod allocator;
mod codec;
mod counters;
mod error;
pub mod packet;
mod registry;
mod relay;
mod store;
pub mod transport;

use std::time::Duration;

pub use allocator::{Allocator, Ipv4Block, Lease, MAX_PREFIX_LEN};
pub use codec::{derive_key, Codec, Passthrough, PayloadCipher, KEY_SIZE, SALT_SIZE};
pub use counters::{format_bytes, ByteCounters, CounterSnapshot};
pub use error::{Error, Result};
pub use registry::{Registry, MAX_TTL};
pub use relay::{Delivery, PeerRegistry, Relay};
pub use store::{FileStore, LeaseStore, MemoryStore};
pub use transport::{DeliveryError, Frame, PeerHandle, TunInfo, TunTransport};

/// Default interface MTU
pub const DEFAULT_MTU: u16 = 1500;

/// Default interface read buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// How long a binding lives without traffic from its connection
pub const DEFAULT_BINDING_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default depth of each connection's outbound frame queue
pub const DEFAULT_PEER_QUEUE: usize = 1024;
