//! Mock transports for testing
//!
//! [`MockTunDevice`] stands in for the virtual interface: tests inject
//! packets the "OS" sends and inspect packets the relay writes. Reads block
//! until a packet is injected, like a real interface, and fail once the
//! device is closed.
//!
//! # Example
//!
//! ```ignore
//! use wstun_core::transport::mock::{IpPacketBuilder, MockTunDevice};
//!
//! let device = MockTunDevice::new("wstun", 1500);
//! device.inject(IpPacketBuilder::ipv4().dst_v4(10, 0, 10, 2).build());
//! ```

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use super::{TunInfo, TunTransport};
use crate::error::{Error, Result};

/// Mock TUN device with packet injection and capture
pub struct MockTunDevice {
    info: TunInfo,
    inject_tx: mpsc::UnboundedSender<Vec<u8>>,
    inject_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    sent_notify: Notify,
    closed: AtomicBool,
    closed_notify: Notify,
    fail_writes: AtomicBool,
}

impl MockTunDevice {
    pub fn new(name: &str, mtu: u16) -> Self {
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();
        Self {
            info: TunInfo {
                name: name.to_string(),
                mtu,
            },
            inject_tx,
            inject_rx: tokio::sync::Mutex::new(inject_rx),
            sent: Mutex::new(Vec::new()),
            sent_notify: Notify::new(),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Create with the default MTU
    pub fn with_default_mtu(name: &str) -> Self {
        Self::new(name, crate::DEFAULT_MTU)
    }

    /// Queue a packet for the next `recv` (simulates the OS routing a packet
    /// into the tunnel)
    pub fn inject(&self, packet: Vec<u8>) {
        // The receiver lives as long as self
        let _ = self.inject_tx.send(packet);
    }

    /// Packets written to the device so far
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or_default()
    }

    /// Wait until at least `count` packets have been written
    pub async fn wait_for_sent(&self, count: usize) -> Vec<Vec<u8>> {
        loop {
            let notified = self.sent_notify.notified();
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            notified.await;
        }
    }

    /// Make every pending and future `recv` fail
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.closed_notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Make `send` fail, simulating a broken interface
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TunTransport for MockTunDevice {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let closed = self.closed_notify.notified();
        if self.is_closed() {
            return Err(Error::Interface("device is closed".into()));
        }

        let mut rx = self.inject_rx.lock().await;
        let packet = tokio::select! {
            packet = rx.recv() => packet,
            _ = closed => None,
        };

        match packet {
            Some(packet) => {
                let len = packet.len().min(buf.len());
                buf[..len].copy_from_slice(&packet[..len]);
                Ok(len)
            }
            None => Err(Error::Interface("device is closed".into())),
        }
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Interface("write failed".into()));
        }

        if buf.len() > self.info.mtu as usize {
            return Err(Error::Interface(format!(
                "packet size {} exceeds MTU {}",
                buf.len(),
                self.info.mtu
            )));
        }

        self.sent
            .lock()
            .map_err(|_| Error::Interface("capture lock poisoned".into()))?
            .push(buf.to_vec());
        self.sent_notify.notify_waiters();

        Ok(buf.len())
    }

    fn info(&self) -> &TunInfo {
        &self.info
    }
}

/// Builder for IPv4 test packets
#[derive(Debug, Clone)]
pub struct IpPacketBuilder {
    src: Ipv4Addr,
    dst: Ipv4Addr,
    protocol: u8,
    ttl: u8,
    payload: Vec<u8>,
}

impl IpPacketBuilder {
    pub fn ipv4() -> Self {
        Self {
            src: Ipv4Addr::new(10, 0, 10, 2),
            dst: Ipv4Addr::new(10, 0, 10, 1),
            protocol: 17, // UDP
            ttl: 64,
            payload: Vec::new(),
        }
    }

    pub fn src(mut self, addr: Ipv4Addr) -> Self {
        self.src = addr;
        self
    }

    pub fn src_v4(self, a: u8, b: u8, c: u8, d: u8) -> Self {
        self.src(Ipv4Addr::new(a, b, c, d))
    }

    pub fn dst(mut self, addr: Ipv4Addr) -> Self {
        self.dst = addr;
        self
    }

    pub fn dst_v4(self, a: u8, b: u8, c: u8, d: u8) -> Self {
        self.dst(Ipv4Addr::new(a, b, c, d))
    }

    /// Set protocol (6=TCP, 17=UDP, 1=ICMP)
    pub fn protocol(mut self, proto: u8) -> Self {
        self.protocol = proto;
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn payload(mut self, data: Vec<u8>) -> Self {
        self.payload = data;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let total_length = 20 + self.payload.len();
        let mut packet = Vec::with_capacity(total_length);

        // Version (4) + IHL (5)
        packet.push(0x45);
        packet.push(0x00);
        packet.extend_from_slice(&(total_length as u16).to_be_bytes());
        // Identification
        packet.extend_from_slice(&[0x00, 0x00]);
        // Don't fragment
        packet.extend_from_slice(&[0x40, 0x00]);
        packet.push(self.ttl);
        packet.push(self.protocol);
        // Checksum left at zero
        packet.extend_from_slice(&[0x00, 0x00]);
        packet.extend_from_slice(&self.src.octets());
        packet.extend_from_slice(&self.dst.octets());
        packet.extend_from_slice(&self.payload);

        packet
    }
}
