//! Packet relay between the virtual interface and client connections
//!
//! Two flows share the registry and counters:
//!
//! - **outbound** ([`Relay::run_outbound`]): one task drains the interface,
//!   looks up each packet's destination and queues it to the bound peer.
//!   Unroutable packets are dropped; a dead peer loses its binding.
//! - **inbound** ([`Relay::inbound`]): one task per connection reads frames,
//!   echoes control frames, binds the packet's source address to the
//!   connection and writes the packet to the interface.
//!
//! Delivery is best effort. Nothing is queued for peers that are not bound
//! and nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};

use crate::codec::Codec;
use crate::counters::ByteCounters;
use crate::error::{Error, Result};
use crate::packet;
use crate::registry::Registry;
use crate::transport::{DeliveryError, Frame, PeerHandle, TunTransport};

/// Routing table of tunnel address -> connection
pub type PeerRegistry = Registry<PeerHandle>;

/// What happened to a packet read from the interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued to the bound peer
    Forwarded,
    /// No IPv4 destination could be read
    Unroutable,
    /// No live binding for the destination
    Unbound,
    /// The peer's queue was full or encoding failed
    Dropped,
    /// The peer is gone and its binding was removed
    Evicted,
}

/// Shared relay state, cloned into every flow
#[derive(Clone)]
pub struct Relay {
    tun: Arc<dyn TunTransport>,
    registry: Arc<PeerRegistry>,
    counters: Arc<ByteCounters>,
    codec: Codec,
    binding_ttl: Duration,
    buffer_size: usize,
}

impl Relay {
    pub fn new(
        tun: Arc<dyn TunTransport>,
        registry: Arc<PeerRegistry>,
        counters: Arc<ByteCounters>,
    ) -> Self {
        Self {
            tun,
            registry,
            counters,
            codec: Codec::default(),
            binding_ttl: crate::DEFAULT_BINDING_TTL,
            buffer_size: crate::DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_binding_ttl(mut self, ttl: Duration) -> Self {
        self.binding_ttl = ttl;
        self
    }

    /// Size of the interface read buffer
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(packet::IPV4_HEADER_LEN);
        self
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn counters(&self) -> &Arc<ByteCounters> {
        &self.counters
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Drain the interface until it fails
    ///
    /// Only returns on an interface read error, which the caller must treat
    /// as fatal.
    pub async fn run_outbound(&self) -> Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        log::debug!(
            "Outbound relay reading from {} ({} byte buffer)",
            self.tun.name(),
            self.buffer_size
        );

        loop {
            let n = self.tun.recv(&mut buf).await.map_err(interface_error)?;
            self.forward(&buf[..n]);
        }
    }

    /// Route one packet from the interface to its bound peer
    pub fn forward(&self, packet: &[u8]) -> Delivery {
        let Some(key) = packet::destination_key(packet) else {
            return Delivery::Unroutable;
        };

        let Some(peer) = self.registry.get(&key) else {
            log::trace!("No binding for {}, dropping {} bytes", key, packet.len());
            return Delivery::Unbound;
        };

        let frame = match self.codec.encode(packet) {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("Failed to encode packet for {}: {}", key, e);
                return Delivery::Dropped;
            }
        };

        match peer.try_send(Frame::Binary(frame)) {
            Ok(()) => {
                self.counters.add_written(packet.len());
                Delivery::Forwarded
            }
            Err(DeliveryError::Full) => {
                log::trace!("Connection {} queue full, dropping packet", peer.id());
                Delivery::Dropped
            }
            Err(DeliveryError::Closed) => {
                // A newer connection may have taken the key since the lookup
                self.registry.delete_if(&key, |bound| *bound == peer);
                log::debug!("Connection {} gone, unbound {}", peer.id(), key);
                Delivery::Evicted
            }
        }
    }

    /// Relay frames from one client connection until it ends
    ///
    /// Returns `Ok(())` when the stream ends or the peer's writer goes away.
    /// A read error, a malformed frame or a packet larger than the interface
    /// MTU ends the flow with that error; an
    /// [`Error::Interface`] means the interface itself failed.
    pub async fn inbound<S>(&self, peer: PeerHandle, mut frames: S) -> Result<()>
    where
        S: Stream<Item = Result<Frame>> + Unpin,
    {
        while let Some(frame) = frames.next().await {
            match frame? {
                Frame::Text(text) => {
                    if peer.try_send(Frame::Text(text)) == Err(DeliveryError::Closed) {
                        break;
                    }
                }
                Frame::Binary(data) => {
                    let packet = self.codec.decode(data)?;
                    self.inject(&peer, &packet).await?;
                }
            }
        }
        Ok(())
    }

    async fn inject(&self, peer: &PeerHandle, packet: &[u8]) -> Result<()> {
        // A client error, never an interface failure
        let limit = usize::from(self.tun.mtu());
        if packet.len() > limit {
            return Err(Error::PacketTooLarge {
                len: packet.len(),
                limit,
            });
        }

        let Some(key) = packet::source_key(packet) else {
            log::trace!(
                "Connection {} sent a non-IPv4 packet, dropping",
                peer.id()
            );
            return Ok(());
        };

        self.registry.set(key, peer.clone(), self.binding_ttl);
        self.counters.add_read(packet.len());
        self.tun.send(packet).await.map_err(interface_error)?;
        Ok(())
    }
}

fn interface_error(err: Error) -> Error {
    match err {
        Error::Interface(_) => err,
        other => Error::Interface(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{IpPacketBuilder, MockTunDevice};

    fn relay(tun: Arc<MockTunDevice>) -> Relay {
        Relay::new(
            tun,
            Arc::new(PeerRegistry::new()),
            Arc::new(ByteCounters::new()),
        )
    }

    #[test]
    fn test_forward_unroutable_and_unbound() {
        let relay = relay(Arc::new(MockTunDevice::new("wstun", 1500)));

        assert_eq!(relay.forward(&[0x45, 0, 0]), Delivery::Unroutable);
        let packet = IpPacketBuilder::ipv4().dst_v4(10, 0, 10, 9).build();
        assert_eq!(relay.forward(&packet), Delivery::Unbound);
        assert_eq!(relay.counters().snapshot().written, 0);
    }

    #[tokio::test]
    async fn test_forward_to_bound_peer() {
        let relay = relay(Arc::new(MockTunDevice::new("wstun", 1500)));
        let (peer, mut rx) = PeerHandle::channel(8);
        relay
            .registry()
            .set("10.0.10.2", peer, Duration::from_secs(60));

        let packet = IpPacketBuilder::ipv4()
            .dst_v4(10, 0, 10, 2)
            .payload(vec![1, 2, 3])
            .build();
        assert_eq!(relay.forward(&packet), Delivery::Forwarded);
        assert_eq!(rx.recv().await, Some(Frame::Binary(packet.clone())));
        assert_eq!(relay.counters().snapshot().written, packet.len() as u64);
    }

    #[test]
    fn test_forward_evicts_closed_peer() {
        let relay = relay(Arc::new(MockTunDevice::new("wstun", 1500)));
        let (peer, rx) = PeerHandle::channel(8);
        relay
            .registry()
            .set("10.0.10.2", peer, Duration::from_secs(60));
        drop(rx);

        let packet = IpPacketBuilder::ipv4().dst_v4(10, 0, 10, 2).build();
        assert_eq!(relay.forward(&packet), Delivery::Evicted);
        assert!(relay.registry().get("10.0.10.2").is_none());
        assert_eq!(relay.forward(&packet), Delivery::Unbound);
    }

    #[test]
    fn test_forward_drops_when_queue_full() {
        let relay = relay(Arc::new(MockTunDevice::new("wstun", 1500)));
        let (peer, _rx) = PeerHandle::channel(1);
        relay
            .registry()
            .set("10.0.10.2", peer, Duration::from_secs(60));

        let packet = IpPacketBuilder::ipv4().dst_v4(10, 0, 10, 2).build();
        assert_eq!(relay.forward(&packet), Delivery::Forwarded);
        assert_eq!(relay.forward(&packet), Delivery::Dropped);
        // Binding survives a full queue
        assert!(relay.registry().get("10.0.10.2").is_some());
    }

    #[tokio::test]
    async fn test_outbound_stops_on_interface_failure() {
        let tun = Arc::new(MockTunDevice::new("wstun", 1500));
        let relay = relay(tun.clone());
        tun.close();

        let result = relay.run_outbound().await;
        assert!(matches!(result, Err(Error::Interface(_))));
    }

    #[test]
    fn test_interface_error_wraps_other_errors() {
        let err = interface_error(Error::Transport("boom".into()));
        assert!(err.is_interface_failure());
    }
}
