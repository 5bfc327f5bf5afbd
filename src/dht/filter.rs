//! Peer filter module
//!
//! Pluggable rules that keep unwanted peers out of the peer map and out of
//! routing candidate queues.

use crate::dht::address::PeerAddress;
use crate::dht::number::Number160;
use std::net::IpAddr;
use std::sync::Arc;

/// A rule deciding whether a reported peer should be ignored.
///
/// `known` is the set of peers the caller already holds (the peer map's
/// verified peers, or a lookup's queue), `target` the key the caller is
/// interested in (self for the peer map, the lookup key for routing).
pub trait PeerFilter: Send + Sync {
    fn reject(&self, candidate: &PeerAddress, known: &[PeerAddress], target: &Number160) -> bool;
}

impl<F> PeerFilter for F
where
    F: Fn(&PeerAddress, &[PeerAddress], &Number160) -> bool + Send + Sync,
{
    fn reject(&self, candidate: &PeerAddress, known: &[PeerAddress], target: &Number160) -> bool {
        self(candidate, known, target)
    }
}

/// Shared handle to a filter
pub type SharedPeerFilter = Arc<dyn PeerFilter>;

/// Evaluate filters in order; any rejection rejects
pub fn reject_by_any(
    filters: &[SharedPeerFilter],
    candidate: &PeerAddress,
    known: &[PeerAddress],
    target: &Number160,
) -> bool {
    filters.iter().any(|f| f.reject(candidate, known, target))
}

/// Limits how many known peers may share one IP subnet.
///
/// Caps the share of a table that a single network operator can fill with
/// generated identities.
#[derive(Debug, Clone)]
pub struct SubnetFilter {
    /// Prefix length used to group IPv4 addresses
    ipv4_prefix: u8,
    /// Prefix length used to group IPv6 addresses
    ipv6_prefix: u8,
    /// Maximum number of known peers per subnet
    max_per_subnet: usize,
}

impl SubnetFilter {
    /// Create a new filter
    pub fn new(ipv4_prefix: u8, ipv6_prefix: u8, max_per_subnet: usize) -> Self {
        Self {
            ipv4_prefix: ipv4_prefix.min(32),
            ipv6_prefix: ipv6_prefix.min(128),
            max_per_subnet,
        }
    }

    /// Mask an address down to its subnet
    fn subnet(&self, ip: &IpAddr) -> IpAddr {
        match ip {
            IpAddr::V4(v4) => {
                let bits = u32::from(*v4);
                let mask = if self.ipv4_prefix == 0 { 0 } else { u32::MAX << (32 - self.ipv4_prefix) };
                IpAddr::V4((bits & mask).into())
            }
            IpAddr::V6(v6) => {
                let bits = u128::from(*v6);
                let mask = if self.ipv6_prefix == 0 { 0 } else { u128::MAX << (128 - self.ipv6_prefix) };
                IpAddr::V6((bits & mask).into())
            }
        }
    }
}

impl Default for SubnetFilter {
    fn default() -> Self {
        Self::new(24, 64, 2)
    }
}

impl PeerFilter for SubnetFilter {
    fn reject(&self, candidate: &PeerAddress, known: &[PeerAddress], _target: &Number160) -> bool {
        let subnet = self.subnet(&candidate.socket().ip);
        let same_subnet = known
            .iter()
            .filter(|p| p.peer_id() != candidate.peer_id())
            .filter(|p| self.subnet(&p.socket().ip) == subnet)
            .count();
        same_subnet >= self.max_per_subnet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: u32, ip: &str) -> PeerAddress {
        PeerAddress::with_port(Number160::from(id), ip.parse().unwrap(), 4000)
    }

    #[test]
    fn test_subnet_filter_limits_same_subnet() {
        let filter = SubnetFilter::new(24, 64, 2);
        let known = vec![peer(1, "10.0.0.1"), peer(2, "10.0.0.2"), peer(3, "10.0.1.1")];
        assert!(filter.reject(&peer(4, "10.0.0.3"), &known, &Number160::ZERO));
        assert!(!filter.reject(&peer(4, "10.0.1.3"), &known, &Number160::ZERO));
        assert!(!filter.reject(&peer(4, "192.168.0.1"), &known, &Number160::ZERO));
    }

    #[test]
    fn test_subnet_filter_ignores_self_entry() {
        let filter = SubnetFilter::new(24, 64, 1);
        let known = vec![peer(1, "10.0.0.1")];
        // a refresh of the same peer is not counted against itself
        assert!(!filter.reject(&peer(1, "10.0.0.1"), &known, &Number160::ZERO));
    }

    #[test]
    fn test_subnet_filter_ipv6() {
        let filter = SubnetFilter::new(24, 64, 1);
        let known = vec![peer(1, "2001:db8::1")];
        assert!(filter.reject(&peer(2, "2001:db8::2"), &known, &Number160::ZERO));
        assert!(!filter.reject(&peer(2, "2001:db9::2"), &known, &Number160::ZERO));
    }

    #[test]
    fn test_closure_filter_and_any() {
        let even: SharedPeerFilter = Arc::new(|p: &PeerAddress, _: &[PeerAddress], _: &Number160| {
            p.peer_id().words()[4] % 2 == 0
        });
        let filters = vec![even];
        assert!(reject_by_any(&filters, &peer(2, "10.0.0.1"), &[], &Number160::ZERO));
        assert!(!reject_by_any(&filters, &peer(3, "10.0.0.1"), &[], &Number160::ZERO));
        assert!(!reject_by_any(&[], &peer(2, "10.0.0.1"), &[], &Number160::ZERO));
    }
}
