//! Masternode service addresses and public-routability rules.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetAddressError {
    Empty,
    InvalidAddress(String),
}

impl fmt::Display for NetAddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetAddressError::Empty => write!(f, "empty address"),
            NetAddressError::InvalidAddress(raw) => write!(f, "invalid address '{raw}'"),
        }
    }
}

impl std::error::Error for NetAddressError {}

/// IP and port a masternode announces for its service.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NetAddress(SocketAddr);

impl NetAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self(SocketAddr::new(normalize(ip), port))
    }

    /// Accepts `ip:port`, `[v6]:port`, or a bare IP that takes `default_port`.
    pub fn parse(raw: &str, default_port: u16) -> Result<Self, NetAddressError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(NetAddressError::Empty);
        }
        if let Ok(addr) = raw.parse::<SocketAddr>() {
            return Ok(Self::new(addr.ip(), addr.port()));
        }
        if let Ok(ip) = raw.parse::<IpAddr>() {
            return Ok(Self::new(ip, default_port));
        }
        Err(NetAddressError::InvalidAddress(raw.to_string()))
    }

    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn is_ipv4(&self) -> bool {
        self.0.is_ipv4()
    }

    pub fn is_ipv6(&self) -> bool {
        self.0.is_ipv6()
    }

    /// RFC1918 private IPv4 ranges.
    pub fn is_rfc1918(&self) -> bool {
        match self.ip() {
            IpAddr::V4(ip) => ip.is_private(),
            IpAddr::V6(_) => false,
        }
    }

    /// Loopback or the "this network" block.
    pub fn is_local(&self) -> bool {
        match self.ip() {
            IpAddr::V4(ip) => ip.is_loopback() || ip.octets()[0] == 0,
            IpAddr::V6(ip) => ip.is_loopback(),
        }
    }

    pub fn is_valid(&self) -> bool {
        match self.ip() {
            IpAddr::V4(ip) => !ip.is_unspecified() && !ip.is_broadcast(),
            IpAddr::V6(ip) => !ip.is_unspecified() && !is_v6_documentation(&ip),
        }
    }

    /// True when the address could be reached from the public internet.
    pub fn is_routable(&self) -> bool {
        if !self.is_valid() || self.is_local() {
            return false;
        }
        match self.ip() {
            IpAddr::V4(ip) => is_v4_routable(&ip),
            IpAddr::V6(ip) => is_v6_routable(&ip),
        }
    }
}

impl From<SocketAddr> for NetAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Encodable for NetAddress {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        let octets = match self.ip() {
            IpAddr::V4(ip) => ip.to_ipv6_mapped().octets(),
            IpAddr::V6(ip) => ip.octets(),
        };
        encoder.write_bytes(&octets);
        encoder.write_u16_be(self.port());
    }
}

impl Decodable for NetAddress {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let octets = decoder.read_fixed::<16>()?;
        let port = decoder.read_u16_be()?;
        Ok(Self::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
    }
}

fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

fn is_v4_routable(ip: &Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    let shared = a == 100 && (b & 0xc0) == 64;
    let benchmarking = a == 198 && (b & 0xfe) == 18;
    let reserved = a >= 240;
    let documentation = (a == 192 && b == 0 && c == 2)
        || (a == 198 && b == 51 && c == 100)
        || (a == 203 && b == 0 && c == 113);
    !(ip.is_private()
        || ip.is_link_local()
        || ip.is_multicast()
        || shared
        || benchmarking
        || reserved
        || documentation)
}

fn is_v6_documentation(ip: &Ipv6Addr) -> bool {
    let segments = ip.segments();
    segments[0] == 0x2001 && segments[1] == 0x0db8
}

fn is_v6_routable(ip: &Ipv6Addr) -> bool {
    let segments = ip.segments();
    let unique_local = (segments[0] & 0xfe00) == 0xfc00;
    let link_local = (segments[0] & 0xffc0) == 0xfe80;
    let orchid = segments[0] == 0x2001 && (segments[1] & 0xfff0) == 0x0010;
    !(unique_local || link_local || orchid || ip.is_multicast())
}
