//! Wake-on-LAN magic packet emitter.
//!
//! A magic packet is 6 synchronization bytes of `0xFF` followed by the
//! target MAC repeated sixteen times — 102 bytes, sent as one UDP datagram
//! to the broadcast address on port 9 with `SO_BROADCAST` enabled.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;

pub const WOL_PORT: u16 = 9;
pub const DEFAULT_BROADCAST: &str = "255.255.255.255";

/// Parse `AA:BB:CC:DD:EE:FF` (colon- or dash-separated) into raw bytes.
pub fn parse_mac(mac: &str) -> Option<[u8; 6]> {
    let parts: Vec<&str> = mac.split(['-', ':']).collect();
    if parts.len() != 6 {
        return None;
    }
    let mut out = [0u8; 6];
    for (byte, part) in out.iter_mut().zip(&parts) {
        if part.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    Some(out)
}

/// Compose the 102-byte packet for a target MAC.
pub fn magic_packet(mac: [u8; 6]) -> [u8; 102] {
    let mut packet = [0xFFu8; 102];
    for i in 0..16 {
        packet[6 + i * 6..12 + i * 6].copy_from_slice(&mac);
    }
    packet
}

/// Emit the packet for `mac` toward `broadcast` (default limited broadcast)
/// on port 9.
pub async fn send(mac: &str, broadcast: Option<&str>) -> anyhow::Result<()> {
    let dest = broadcast.unwrap_or(DEFAULT_BROADCAST);
    let dest_ip: Ipv4Addr = dest
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid broadcast address: {dest}"))?;
    send_to_addr(mac, SocketAddr::from((dest_ip, WOL_PORT))).await
}

/// Emit the packet to an explicit destination address.
pub async fn send_to_addr(mac: &str, dest: SocketAddr) -> anyhow::Result<()> {
    let bytes = parse_mac(mac).ok_or_else(|| anyhow::anyhow!("Invalid MAC address: {mac}"))?;
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;
    socket.send_to(&magic_packet(bytes), dest).await?;
    tracing::info!(%mac, %dest, "Wake-on-LAN packet sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: [u8; 6] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];

    #[test]
    fn packet_is_sync_bytes_then_mac_sixteen_times() {
        let packet = magic_packet(MAC);
        assert_eq!(packet.len(), 102);
        assert_eq!(&packet[..6], &[0xFF; 6]);
        for i in 0..16 {
            assert_eq!(&packet[6 + i * 6..12 + i * 6], &MAC);
        }
    }

    #[test]
    fn mac_parsing_accepts_both_separators() {
        assert_eq!(parse_mac("11:22:33:44:55:66"), Some(MAC));
        assert_eq!(parse_mac("11-22-33-44-55-66"), Some(MAC));
        assert_eq!(parse_mac("AA:bb:CC:dd:EE:ff"), Some([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]));
    }

    #[test]
    fn mac_parsing_rejects_malformed_input() {
        assert!(parse_mac("").is_none());
        assert!(parse_mac("11:22:33:44:55").is_none());
        assert!(parse_mac("11:22:33:44:55:66:77").is_none());
        assert!(parse_mac("1:22:33:44:55:66").is_none());
        assert!(parse_mac("GG:22:33:44:55:66").is_none());
    }

    #[tokio::test]
    async fn emitted_datagram_matches_the_packet_format() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = listener.local_addr().unwrap();

        send_to_addr("11:22:33:44:55:66", dest).await.unwrap();

        let mut buf = [0u8; 256];
        let (len, _) = listener.recv_from(&mut buf).await.unwrap();
        assert_eq!(len, 102);
        assert_eq!(&buf[..102], &magic_packet(MAC));
    }

    #[tokio::test]
    async fn bad_mac_is_an_error_not_a_packet() {
        let err = send("not-a-mac", Some("127.0.0.1")).await.unwrap_err();
        assert!(err.to_string().contains("Invalid MAC address"));
    }
}
