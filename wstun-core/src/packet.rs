//! IPv4 header inspection for routing

use std::net::Ipv4Addr;

/// Minimum IPv4 header length
pub const IPV4_HEADER_LEN: usize = 20;

fn ipv4_header(packet: &[u8]) -> Option<&[u8]> {
    if packet.len() < IPV4_HEADER_LEN || packet[0] >> 4 != 4 {
        return None;
    }
    Some(&packet[..IPV4_HEADER_LEN])
}

/// Source address of an IPv4 packet
pub fn source_addr(packet: &[u8]) -> Option<Ipv4Addr> {
    let header = ipv4_header(packet)?;
    Some(Ipv4Addr::new(header[12], header[13], header[14], header[15]))
}

/// Destination address of an IPv4 packet
pub fn destination_addr(packet: &[u8]) -> Option<Ipv4Addr> {
    let header = ipv4_header(packet)?;
    Some(Ipv4Addr::new(header[16], header[17], header[18], header[19]))
}

/// Routing key for a packet arriving from a client
pub fn source_key(packet: &[u8]) -> Option<String> {
    source_addr(packet).map(|addr| addr.to_string())
}

/// Routing key for a packet leaving through the interface
pub fn destination_key(packet: &[u8]) -> Option<String> {
    destination_addr(packet).map(|addr| addr.to_string())
}
