//! Peer address module
//!
//! A peer's identity together with the reachability information other
//! peers need to contact it.

use crate::dht::number::Number160;
use crate::error::RoutingError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Maximum number of relay addresses a peer may advertise
pub const MAX_RELAYS: usize = 5;

/// Network endpoint of a peer: one address with separate TCP and UDP ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerSocketAddress {
    pub ip: IpAddr,
    pub tcp_port: u16,
    pub udp_port: u16,
}

impl PeerSocketAddress {
    /// Create a new socket address
    pub fn new(ip: IpAddr, tcp_port: u16, udp_port: u16) -> Self {
        Self { ip, tcp_port, udp_port }
    }

    /// TCP endpoint
    pub fn tcp(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.tcp_port)
    }

    /// UDP endpoint
    pub fn udp(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.udp_port)
    }
}

impl Default for PeerSocketAddress {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, 0)
    }
}

/// Identity plus reachability of a peer.
///
/// Equality, ordering and hashing look at the peer ID only: two addresses
/// with the same ID and different ports describe the same peer, and a map
/// holding one treats the other as an update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerAddress {
    peer_id: Number160,
    socket: PeerSocketAddress,
    firewalled_tcp: bool,
    firewalled_udp: bool,
    relayed: bool,
    relays: Vec<PeerSocketAddress>,
}

impl PeerAddress {
    /// Create a directly reachable peer address
    pub fn new(peer_id: Number160, socket: PeerSocketAddress) -> Self {
        Self {
            peer_id,
            socket,
            firewalled_tcp: false,
            firewalled_udp: false,
            relayed: false,
            relays: Vec::new(),
        }
    }

    /// Create a peer address from an ID, an IP and one port used for both protocols
    pub fn with_port(peer_id: Number160, ip: IpAddr, port: u16) -> Self {
        Self::new(peer_id, PeerSocketAddress::new(ip, port, port))
    }

    /// Create a peer address with only an ID, bound to localhost.
    ///
    /// Mostly useful for tests and in-memory networks.
    pub fn from_id(peer_id: Number160) -> Self {
        Self::new(peer_id, PeerSocketAddress::default())
    }

    pub fn peer_id(&self) -> Number160 {
        self.peer_id
    }

    pub fn socket(&self) -> &PeerSocketAddress {
        &self.socket
    }

    pub fn is_firewalled_tcp(&self) -> bool {
        self.firewalled_tcp
    }

    pub fn is_firewalled_udp(&self) -> bool {
        self.firewalled_udp
    }

    pub fn is_relayed(&self) -> bool {
        self.relayed
    }

    /// Relay addresses used to reach this peer while it is firewalled
    pub fn relays(&self) -> &[PeerSocketAddress] {
        &self.relays
    }

    pub fn change_peer_id(&self, peer_id: Number160) -> Self {
        Self { peer_id, ..self.clone() }
    }

    pub fn change_socket(&self, socket: PeerSocketAddress) -> Self {
        Self { socket, ..self.clone() }
    }

    pub fn change_ports(&self, tcp_port: u16, udp_port: u16) -> Self {
        self.change_socket(PeerSocketAddress::new(self.socket.ip, tcp_port, udp_port))
    }

    pub fn change_firewalled_tcp(&self, firewalled_tcp: bool) -> Self {
        Self { firewalled_tcp, ..self.clone() }
    }

    pub fn change_firewalled_udp(&self, firewalled_udp: bool) -> Self {
        Self { firewalled_udp, ..self.clone() }
    }

    pub fn change_relayed(&self, relayed: bool) -> Self {
        Self { relayed, ..self.clone() }
    }

    /// Replace the relay addresses; fails if more than [`MAX_RELAYS`] are given
    pub fn change_relays(&self, relays: Vec<PeerSocketAddress>) -> Result<Self> {
        if relays.len() > MAX_RELAYS {
            return Err(RoutingError::validation_error_with_field(
                format!("at most {} relay addresses allowed, got {}", MAX_RELAYS, relays.len()),
                "relays",
            )
            .into());
        }
        Ok(Self { relays, ..self.clone() })
    }

    /// Check if the peer cannot be reached directly on either protocol
    pub fn is_firewalled(&self) -> bool {
        self.firewalled_tcp && self.firewalled_udp
    }

    /// Check whether every field matches, not just the ID
    pub fn same_network_info(&self, other: &PeerAddress) -> bool {
        self.socket == other.socket
            && self.firewalled_tcp == other.firewalled_tcp
            && self.firewalled_udp == other.firewalled_udp
            && self.relayed == other.relayed
            && self.relays == other.relays
    }
}

impl PartialEq for PeerAddress {
    fn eq(&self, other: &Self) -> bool {
        self.peer_id == other.peer_id
    }
}

impl Eq for PeerAddress {}

impl Hash for PeerAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.peer_id.hash(state);
    }
}

impl PartialOrd for PeerAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeerAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        self.peer_id.cmp(&other.peer_id)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}[tcp:{},udp:{}]",
            self.peer_id.short(),
            self.socket.ip,
            self.socket.tcp_port,
            self.socket.udp_port
        )?;
        if self.relayed {
            write!(f, "(relayed x{})", self.relays.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(id: u32, port: u16) -> PeerAddress {
        PeerAddress::with_port(Number160::from(id), "127.0.0.1".parse().unwrap(), port)
    }

    #[test]
    fn test_equality_by_id_only() {
        let a = addr(7, 4000);
        let b = addr(7, 5000).change_firewalled_udp(true);
        assert_eq!(a, b);
        assert!(!a.same_network_info(&b));
        assert_ne!(a, addr(8, 4000));
    }

    #[test]
    fn test_ordering_by_id() {
        assert!(addr(1, 9000) < addr(2, 1000));
    }

    #[test]
    fn test_change_returns_new_value() {
        let a = addr(1, 4000);
        let b = a.change_ports(4001, 4002);
        assert_eq!(a.socket().tcp_port, 4000);
        assert_eq!(b.socket().tcp_port, 4001);
        assert_eq!(b.socket().udp_port, 4002);
        assert_eq!(b.socket().udp().port(), 4002);
    }

    #[test]
    fn test_change_relays_limit() {
        let a = addr(1, 4000).change_relayed(true);
        let relay = PeerSocketAddress::default();
        assert!(a.change_relays(vec![relay; MAX_RELAYS]).is_ok());
        assert!(a.change_relays(vec![relay; MAX_RELAYS + 1]).is_err());
    }

    #[test]
    fn test_firewalled() {
        let a = addr(1, 4000).change_firewalled_tcp(true);
        assert!(!a.is_firewalled());
        assert!(a.change_firewalled_udp(true).is_firewalled());
    }

    #[test]
    fn test_display() {
        let a = addr(1, 4000);
        assert!(a.to_string().contains("tcp:4000"));
    }
}
