//! Relay-address codec
//!
//! The first tunnel SYN of a flow carries the destination the local stack
//! was dialing, so the far end can open the real connection. Layout:
//!
//! ```text
//! +--------+----------+-----------+------------------+
//! | family | reserved | port (BE) | address (n bytes) |
//! +--------+----------+-----------+------------------+
//!     1         1          2          by family
//! ```

use crate::error::{ensure_capacity, Result, TcpupError};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

pub const RELAY_HEADER_LEN: usize = 4;

/// Address family tags understood on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AddressFamily {
    Ipv4 = 0x01,
    Ipv6 = 0x05,
}

impl AddressFamily {
    pub fn addr_len(&self) -> usize {
        match self {
            AddressFamily::Ipv4 => 4,
            AddressFamily::Ipv6 => 16,
        }
    }

    fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }
}

impl TryFrom<u8> for AddressFamily {
    type Error = TcpupError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0x01 => Ok(AddressFamily::Ipv4),
            0x05 => Ok(AddressFamily::Ipv6),
            other => Err(TcpupError::UnsupportedAddressFamily(other)),
        }
    }
}

/// Original destination carried in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelayAddress(pub SocketAddr);

impl RelayAddress {
    pub fn new(addr: impl Into<SocketAddr>) -> Self {
        Self(addr.into())
    }

    pub fn addr(&self) -> SocketAddr {
        self.0
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.0.ip())
    }

    pub fn encoded_len(&self) -> usize {
        RELAY_HEADER_LEN + self.family().addr_len()
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let len = self.encoded_len();
        ensure_capacity(buf, len)?;

        buf[0] = self.family() as u8;
        buf[1] = 0;
        buf[2..4].copy_from_slice(&self.0.port().to_be_bytes());
        match self.0.ip() {
            IpAddr::V4(ip) => buf[4..len].copy_from_slice(&ip.octets()),
            IpAddr::V6(ip) => buf[4..len].copy_from_slice(&ip.octets()),
        }
        Ok(len)
    }

    /// Decode a relay body, returning the address and the bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < RELAY_HEADER_LEN {
            return Err(TcpupError::PacketTooShort {
                expected: RELAY_HEADER_LEN,
                actual: buf.len(),
            });
        }
        let family = AddressFamily::try_from(buf[0])?;
        let len = RELAY_HEADER_LEN + family.addr_len();
        if buf.len() < len {
            return Err(TcpupError::PacketTooShort { expected: len, actual: buf.len() });
        }

        let port = u16::from_be_bytes([buf[2], buf[3]]);
        let ip = match family {
            AddressFamily::Ipv4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&buf[4..len]);
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            AddressFamily::Ipv6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&buf[4..len]);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
        };
        Ok((Self(SocketAddr::new(ip, port)), len))
    }
}

impl std::fmt::Display for RelayAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddrV4;

    #[test]
    fn test_ipv4_layout() {
        let relay = RelayAddress::new(SocketAddrV4::new(Ipv4Addr::new(93, 1, 1, 1), 80));
        let mut buf = [0xffu8; 16];
        let n = relay.encode(&mut buf).unwrap();
        assert_eq!(n, 8);
        assert_eq!(&buf[..8], &[0x01, 0x00, 0x00, 0x50, 93, 1, 1, 1]);

        let (decoded, used) = RelayAddress::decode(&buf[..n]).unwrap();
        assert_eq!(used, 8);
        assert_eq!(decoded.addr(), "93.1.1.1:80".parse().unwrap());
    }

    #[test]
    fn test_ipv6_decodes() {
        let relay = RelayAddress::new("[2001:db8::1]:443".parse::<SocketAddr>().unwrap());
        let mut buf = [0u8; 20];
        assert_eq!(relay.encode(&mut buf).unwrap(), 20);
        assert_eq!(buf[0], 0x05);
        assert_eq!(RelayAddress::decode(&buf).unwrap().0, relay);
    }

    #[test]
    fn test_unknown_family_rejected() {
        let buf = [0x02, 0, 0, 80, 1, 2, 3, 4];
        assert_eq!(
            RelayAddress::decode(&buf).unwrap_err(),
            TcpupError::UnsupportedAddressFamily(0x02)
        );
    }

    #[test]
    fn test_truncated_address() {
        let buf = [0x01, 0, 0, 80, 1, 2];
        assert!(matches!(
            RelayAddress::decode(&buf),
            Err(TcpupError::PacketTooShort { expected: 8, actual: 6 })
        ));
    }

    #[test]
    fn test_encode_needs_room() {
        let relay = RelayAddress::new(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1));
        let mut buf = [0u8; 7];
        assert!(matches!(
            relay.encode(&mut buf),
            Err(TcpupError::BufferTooSmall { needed: 8, capacity: 7 })
        ));
    }
}
