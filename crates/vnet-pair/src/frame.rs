//! Link-layer helpers: hardware addresses, header construction and the optional frame transform.

use core::fmt;

pub const ETH_HLEN: usize = 14;
pub const ETHERTYPE_IPV4: u16 = 0x0800;

const IPV4_MIN_HLEN: usize = 20;

/// Shortest frame the fabric accepts: an Ethernet header followed by a minimal IPv4 header.
pub const MIN_FRAME_LEN: usize = ETH_HLEN + IPV4_MIN_HLEN;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Address of the endpoint on the other end of the link: the low bit of the last octet flipped.
    pub fn peer(self) -> Self {
        let mut octets = self.0;
        octets[5] ^= 0x01;
        Self(octets)
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Build an Ethernet frame sent by `src` to its peer.
pub fn build_frame(src: MacAddr, ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ETH_HLEN + payload.len());
    out.extend_from_slice(&src.peer().0);
    out.extend_from_slice(&src.0);
    out.extend_from_slice(&ethertype.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// In-place rewrite applied to each frame after it is copied into a transmit buffer.
pub trait FrameTransform: Send + Sync {
    fn apply(&self, frame: &mut [u8]);
}

impl<F: Fn(&mut [u8]) + Send + Sync> FrameTransform for F {
    fn apply(&self, frame: &mut [u8]) {
        self(frame)
    }
}

/// Flip the third octet of the IPv4 source and destination addresses and fix up the header
/// checksum, so traffic looped between the two endpoints appears to come from another subnet.
///
/// Frames that are not well-formed IPv4 are left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubnetFlip;

impl FrameTransform for SubnetFlip {
    fn apply(&self, frame: &mut [u8]) {
        if frame.len() < MIN_FRAME_LEN {
            return;
        }
        if u16::from_be_bytes([frame[12], frame[13]]) != ETHERTYPE_IPV4 {
            return;
        }

        let ip = &mut frame[ETH_HLEN..];
        let version = ip[0] >> 4;
        let header_len = usize::from(ip[0] & 0x0f) * 4;
        if version != 4 || header_len < IPV4_MIN_HLEN || ip.len() < header_len {
            return;
        }

        ip[14] ^= 1; // saddr
        ip[18] ^= 1; // daddr

        ip[10..12].copy_from_slice(&[0, 0]);
        let csum = ipv4_header_checksum(&ip[..header_len]);
        ip[10..12].copy_from_slice(&csum.to_be_bytes());
    }
}

/// RFC 1071 one's complement checksum over an IPv4 header.
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    let mut sum = 0u32;
    for chunk in header.chunks(2) {
        let word = match chunk {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [hi] => u16::from_be_bytes([*hi, 0]),
            _ => 0,
        };
        sum += u32::from(word);
    }
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
