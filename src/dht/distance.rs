//! Distance-ordered peer sets
//!
//! XOR distance to a fixed key is a bijection on identifiers, so a map keyed
//! by distance is a set of peers sorted by closeness to that key.

use crate::dht::address::PeerAddress;
use crate::dht::number::Number160;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::btree_map;
use std::collections::BTreeMap;

/// Compare two identifiers by their XOR distance to `key`
pub fn compare_distance(key: &Number160, a: &Number160, b: &Number160) -> Ordering {
    a.distance(key).cmp(&b.distance(key))
}

/// Check if `a` is strictly closer to `key` than `b`
pub fn is_closer(key: &Number160, a: &Number160, b: &Number160) -> bool {
    compare_distance(key, a, b) == Ordering::Less
}

/// A set of peers ordered by XOR distance to a key, closest first
#[derive(Debug, Clone)]
pub struct DistanceSet {
    key: Number160,
    peers: BTreeMap<Number160, PeerAddress>,
}

impl DistanceSet {
    /// Create an empty set ordered by distance to `key`
    pub fn new(key: Number160) -> Self {
        Self {
            key,
            peers: BTreeMap::new(),
        }
    }

    /// Create a set from peers, ordered by distance to `key`
    pub fn from_peers<I: IntoIterator<Item = PeerAddress>>(key: Number160, peers: I) -> Self {
        let mut set = Self::new(key);
        set.extend(peers);
        set
    }

    /// The key this set is ordered by
    pub fn key(&self) -> Number160 {
        self.key
    }

    /// Insert a peer, replacing the stored address if the ID is already present.
    /// Returns true if the peer was not in the set before.
    pub fn insert(&mut self, peer: PeerAddress) -> bool {
        self.peers.insert(peer.peer_id().distance(&self.key), peer).is_none()
    }

    pub fn contains(&self, peer: &PeerAddress) -> bool {
        self.contains_id(&peer.peer_id())
    }

    pub fn contains_id(&self, id: &Number160) -> bool {
        self.peers.contains_key(&id.distance(&self.key))
    }

    pub fn remove(&mut self, id: &Number160) -> Option<PeerAddress> {
        self.peers.remove(&id.distance(&self.key))
    }

    /// Closest peer
    pub fn first(&self) -> Option<&PeerAddress> {
        self.peers.values().next()
    }

    /// Distance of the closest peer
    pub fn first_distance(&self) -> Option<Number160> {
        self.peers.keys().next().copied()
    }

    /// Remove and return the closest peer
    pub fn pop_first(&mut self) -> Option<PeerAddress> {
        self.peers.pop_first().map(|(_, peer)| peer)
    }

    /// Remove and return a uniformly chosen peer
    pub fn pop_random<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<PeerAddress> {
        if self.peers.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..self.peers.len());
        let distance = *self.peers.keys().nth(index)?;
        self.peers.remove(&distance)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Iterate closest first
    pub fn iter(&self) -> impl Iterator<Item = &PeerAddress> {
        self.peers.values()
    }

    /// Copy the peers out, closest first
    pub fn to_vec(&self) -> Vec<PeerAddress> {
        self.peers.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}

impl Extend<PeerAddress> for DistanceSet {
    fn extend<I: IntoIterator<Item = PeerAddress>>(&mut self, iter: I) {
        for peer in iter {
            self.insert(peer);
        }
    }
}

impl IntoIterator for DistanceSet {
    type Item = PeerAddress;
    type IntoIter = btree_map::IntoValues<Number160, PeerAddress>;

    fn into_iter(self) -> Self::IntoIter {
        self.peers.into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: u32) -> PeerAddress {
        PeerAddress::from_id(Number160::from(id))
    }

    #[test]
    fn test_sorted_by_distance() {
        let set = DistanceSet::from_peers(Number160::from(0b1000u32), vec![peer(0b0001), peer(0b1001), peer(0b1100)]);
        let ids: Vec<_> = set.iter().map(|p| p.peer_id()).collect();
        assert_eq!(
            ids,
            vec![Number160::from(0b1001u32), Number160::from(0b1100u32), Number160::from(0b0001u32)]
        );
        assert_eq!(set.first_distance(), Some(Number160::from(1u32)));
    }

    #[test]
    fn test_insert_existing_replaces_address() {
        let mut set = DistanceSet::new(Number160::ZERO);
        assert!(set.insert(peer(3)));
        assert!(!set.insert(peer(3).change_ports(1, 2)));
        assert_eq!(set.len(), 1);
        assert_eq!(set.first().unwrap().socket().tcp_port, 1);
    }

    #[test]
    fn test_pop_first_and_remove() {
        let mut set = DistanceSet::from_peers(Number160::ZERO, vec![peer(5), peer(2), peer(9)]);
        assert_eq!(set.pop_first().unwrap().peer_id(), Number160::from(2u32));
        assert!(set.remove(&Number160::from(9u32)).is_some());
        assert!(!set.contains_id(&Number160::from(9u32)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_pop_random_drains() {
        let mut rng = rand::thread_rng();
        let mut set = DistanceSet::from_peers(Number160::ZERO, (1..=10).map(peer));
        let mut seen = 0;
        while set.pop_random(&mut rng).is_some() {
            seen += 1;
        }
        assert_eq!(seen, 10);
        assert!(set.is_empty());
    }

    #[test]
    fn test_is_closer() {
        let key = Number160::from(0b1000u32);
        assert!(is_closer(&key, &Number160::from(0b1001u32), &Number160::from(0b0001u32)));
        assert!(!is_closer(&key, &Number160::from(0b1001u32), &Number160::from(0b1001u32)));
    }
}
