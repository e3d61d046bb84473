//! Transport abstractions for the relay
//!
//! The relay talks to two kinds of endpoints:
//! - the virtual interface, through [`TunTransport`] (raw IP packets to and
//!   from the OS)
//! - client connections, through a [`PeerHandle`] for writes and a stream of
//!   [`Frame`]s for reads
//!
//! Neither side knows about tun-rs or axum; the `wstun-tun` and
//! `wstun-server` crates provide the real implementations and [`mock`]
//! provides test doubles.

pub mod mock;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// Information about a TUN interface
#[derive(Debug, Clone)]
pub struct TunInfo {
    /// Interface name (e.g., "wstun")
    pub name: String,
    /// Maximum transmission unit size
    pub mtu: u16,
}

/// Async transport trait for the virtual interface
///
/// The interface operates at layer 3, so packets are raw IP datagrams.
/// `send` is called concurrently from every inbound flow; implementations
/// must write each packet in one call so packets never interleave.
#[async_trait]
pub trait TunTransport: Send + Sync {
    /// Receive one IP packet from the interface
    ///
    /// Blocks until a packet is available. An error means the interface is
    /// unusable.
    async fn recv(&self, buf: &mut [u8]) -> Result<usize>;

    /// Write one IP packet to the interface
    async fn send(&self, buf: &[u8]) -> Result<usize>;

    /// Get information about the interface
    fn info(&self) -> &TunInfo;

    fn mtu(&self) -> u16 {
        self.info().mtu
    }

    fn name(&self) -> &str {
        &self.info().name
    }
}

/// One message on a client connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Tunnel payload: a whole IP packet, possibly compressed
    Binary(Vec<u8>),
    /// Control message, echoed back unchanged
    Text(String),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Binary(data) => data.len(),
            Frame::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Why a frame could not be handed to a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The peer's queue is full; the frame was dropped
    Full,
    /// The peer's writer is gone; the connection is dead
    Closed,
}

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

/// Write side of a client connection
///
/// Frames are queued to a writer task that owns the actual socket, so
/// delivering to a slow peer never blocks the caller. Handles are cheap to
/// clone and compare equal when they refer to the same connection.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: u64,
    tx: mpsc::Sender<Frame>,
}

impl PeerHandle {
    /// Create a handle with a queue of `capacity` frames
    ///
    /// The receiver must be drained by whatever owns the connection.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed);
        (Self { id, tx }, rx)
    }

    /// Connection id, unique for the life of the process
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a frame without waiting
    pub fn try_send(&self, frame: Frame) -> std::result::Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PartialEq for PeerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerHandle {}
