//! Wire format for the UDP presence beacon (spec.md §6).
//!
//! A beacon datagram is the ASCII string `NODE:<ip>:<tcp-port>` — no JSON,
//! no magic bytes, matching `original_source/dir_sync/utils.py`'s
//! `broadcast_presence` exactly.

use std::fmt;
use std::net::IpAddr;

/// A parsed beacon announcing a node's address and listen port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beacon {
    pub ip: IpAddr,
    pub tcp_port: u16,
}

impl fmt::Display for Beacon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NODE:{}:{}", self.ip, self.tcp_port)
    }
}

impl Beacon {
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Parse a raw datagram. Returns `None` for anything that isn't a
    /// well-formed `NODE:<ip>:<port>` ASCII string.
    pub fn decode(data: &[u8]) -> Option<Beacon> {
        let text = std::str::from_utf8(data).ok()?.trim();
        let mut parts = text.split(':');
        if parts.next()? != "NODE" {
            return None;
        }
        let ip = parts.next()?.parse().ok()?;
        let tcp_port = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Beacon { ip, tcp_port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_ipv4() {
        let beacon = Beacon {
            ip: "192.168.1.42".parse().unwrap(),
            tcp_port: 6000,
        };
        let encoded = beacon.encode();
        assert_eq!(Beacon::decode(&encoded), Some(beacon));
    }

    #[test]
    fn rejects_malformed_datagrams() {
        assert_eq!(Beacon::decode(b"garbage"), None);
        assert_eq!(Beacon::decode(b"NODE:not-an-ip:6000"), None);
        assert_eq!(Beacon::decode(b"NODE:127.0.0.1:not-a-port"), None);
        assert_eq!(Beacon::decode(b"NODE:127.0.0.1:6000:extra"), None);
    }
}
