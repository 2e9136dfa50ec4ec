//! Wake-on-LAN magic packets.

use std::net::{Ipv4Addr, UdpSocket};

use tracing::debug;

use crate::config::WolConfig;
use crate::errors::SonyError;

/// `30-52-cb-cc-16-ee`, `10:08:B1:31:81:B5` or `3052cbcc16ee`.
pub fn parse_mac(mac: &str) -> Result<[u8; 6], SonyError> {
    let hex: String = mac
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.' | ' '))
        .collect();
    if hex.len() != 12 || !hex.is_ascii() {
        return Err(SonyError::parse(format!("invalid MAC address: {}", mac)));
    }

    let mut bytes = [0u8; 6];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| SonyError::parse(format!("invalid MAC address: {}", mac)))?;
    }
    Ok(bytes)
}

/// Six `0xFF` followed by the MAC sixteen times.
pub fn magic_packet(mac: [u8; 6]) -> Vec<u8> {
    let mut packet = vec![0xFF; 6];
    for _ in 0..16 {
        packet.extend_from_slice(&mac);
    }
    packet
}

pub fn send_magic_packet(mac: &str, config: &WolConfig) -> Result<(), SonyError> {
    let packet = magic_packet(parse_mac(mac)?);
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.set_broadcast(true)?;
    socket.send_to(&packet, (config.broadcast.as_str(), config.port))?;
    debug!(mac, broadcast = %config.broadcast, "Magic packet sent");
    Ok(())
}
