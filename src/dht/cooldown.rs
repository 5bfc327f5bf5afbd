//! Cool-down caches
//!
//! Peers recently confirmed unreachable are parked here for a while so that
//! third-party reports cannot put them straight back into the peer map.

use crate::dht::address::PeerAddress;
use crate::dht::number::Number160;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A set of peers whose entries expire after a fixed time
#[derive(Debug)]
pub struct CooldownCache {
    /// How long an entry stays
    ttl: Duration,
    /// Peer and the instant it was added
    entries: Mutex<HashMap<Number160, (PeerAddress, Instant)>>,
}

impl CooldownCache {
    /// Create a new cache
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Add a peer, restarting its cool-down if it was already present.
    ///
    /// Expired entries of other peers are dropped on the way.
    pub fn put(&self, peer: &PeerAddress) {
        let mut entries = self.entries.lock();
        let ttl = self.ttl;
        entries.retain(|_, (_, added)| added.elapsed() < ttl);
        entries.insert(peer.peer_id(), (peer.clone(), Instant::now()));
    }

    /// Remove a peer, returning it if it was still cooling down
    pub fn remove(&self, id: &Number160) -> Option<PeerAddress> {
        let (peer, added) = self.entries.lock().remove(id)?;
        if added.elapsed() < self.ttl {
            Some(peer)
        } else {
            None
        }
    }

    /// Check if a peer is cooling down. Expired entries are dropped.
    pub fn contains(&self, id: &Number160) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(id) {
            Some((_, added)) if added.elapsed() < self.ttl => true,
            Some(_) => {
                entries.remove(id);
                false
            }
            None => false,
        }
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, (_, added)| added.elapsed() < self.ttl);
        before - entries.len()
    }

    /// Number of peers cooling down
    pub fn len(&self) -> usize {
        self.purge_expired();
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
