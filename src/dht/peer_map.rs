//! Peer map module
//!
//! Known peers bucketed by XOR distance to our own ID. Every distance class
//! has a verified bag (peers we talked to, insertion blocked when full) and
//! an overflow bag (reported peers, least recently used evicted when full).
//! Each class sits behind its own lock, so reports about peers in different
//! classes never contend.

use crate::dht::address::PeerAddress;
use crate::dht::config::{PeerMapConfig, NUMBER_OF_BAGS};
use crate::dht::cooldown::CooldownCache;
use crate::dht::distance::DistanceSet;
use crate::dht::filter::{reject_by_any, SharedPeerFilter};
use crate::dht::listener::{ConnectionHint, FailReason, PeerMapChangeListener, PeerStatusListener};
use crate::dht::number::Number160;
use crate::dht::statistic::PeerStatistic;
use crate::error::RoutingError;
use anyhow::Result;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// Distance class of `other` relative to `self_id`: `bit_length(self ^ other) - 1`.
///
/// Returns `None` for identical IDs.
pub fn class_member(self_id: &Number160, other: &Number160) -> Option<usize> {
    self_id.distance(other).bit_length().checked_sub(1)
}

/// The two bags of one distance class
struct Bag {
    /// Peers we have confirmed
    verified: HashMap<Number160, PeerStatistic>,
    /// Peers we have only heard of
    overflow: LruCache<Number160, PeerStatistic>,
}

impl Bag {
    fn new(overflow_capacity: NonZeroUsize) -> Self {
        Self {
            verified: HashMap::new(),
            overflow: LruCache::new(overflow_capacity),
        }
    }

    /// Remove a peer from both bags
    fn remove(&mut self, id: &Number160) -> Option<PeerStatistic> {
        let verified = self.verified.remove(id);
        let overflow = self.overflow.pop(id);
        verified.or(overflow)
    }
}

/// What a report did to the bags of its class
enum FoundOutcome {
    UpdatedVerified(PeerStatistic),
    InsertedVerified,
    UpdatedOverflow(PeerStatistic),
    InsertedOverflow,
}

/// Trust level of a peer report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hand {
    /// We contacted the peer ourselves
    First,
    /// The peer reported itself
    Second,
    /// Someone else reported the peer
    Third,
}

/// The table of known peers
pub struct PeerMap {
    /// Our own ID
    self_id: Number160,
    /// Configuration
    config: PeerMapConfig,
    /// One bag pair per distance class
    bags: Vec<Mutex<Bag>>,
    /// Peers considered offline
    offline: CooldownCache,
    /// Peers that announced a shutdown
    shutdown: CooldownCache,
    /// Peers that failed with an error
    exception: CooldownCache,
    /// Filters applied to every report
    filters: RwLock<Vec<SharedPeerFilter>>,
    /// Change listeners
    listeners: RwLock<Vec<Arc<dyn PeerMapChangeListener>>>,
}

impl PeerMap {
    /// Create a new peer map
    pub fn new(self_id: Number160, config: PeerMapConfig) -> Result<Self> {
        config.validate()?;
        let overflow_capacity = NonZeroUsize::new(config.bag_size_overflow)
            .ok_or_else(|| RoutingError::config_error_with_field("must be at least 1", "bag_size_overflow"))?;

        let bags = (0..NUMBER_OF_BAGS).map(|_| Mutex::new(Bag::new(overflow_capacity))).collect();

        debug!("Peer map created for {} (verified bag size {}, overflow bag size {})",
            self_id.short(), config.bag_size_verified, config.bag_size_overflow);

        Ok(Self {
            self_id,
            offline: CooldownCache::new(config.offline_timeout),
            shutdown: CooldownCache::new(config.shutdown_timeout),
            exception: CooldownCache::new(config.exception_timeout),
            config,
            bags,
            filters: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Our own ID
    pub fn self_id(&self) -> Number160 {
        self.self_id
    }

    pub fn config(&self) -> &PeerMapConfig {
        &self.config
    }

    /// Register a filter applied to every report
    pub fn add_peer_filter(&self, filter: SharedPeerFilter) {
        self.filters.write().push(filter);
    }

    /// Snapshot of the registered filters
    pub fn peer_filters(&self) -> Vec<SharedPeerFilter> {
        self.filters.read().clone()
    }

    /// Register a change listener
    pub fn add_change_listener(&self, listener: Arc<dyn PeerMapChangeListener>) {
        self.listeners.write().push(listener);
    }

    /// Unregister a change listener. Returns true if it was registered.
    pub fn remove_change_listener(&self, listener: &Arc<dyn PeerMapChangeListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Handle a report that `remote` is alive.
    ///
    /// `referrer` is `None` when we contacted `remote` ourselves. Returns
    /// true if the peer was inserted or refreshed.
    pub fn peer_found(&self, remote: &PeerAddress, referrer: Option<&PeerAddress>, hint: Option<ConnectionHint>) -> bool {
        let id = remote.peer_id();
        let hand = match referrer {
            None => Hand::First,
            Some(r) if r == remote => Hand::Second,
            Some(_) => Hand::Third,
        };
        let trusted = hand == Hand::First || (hand == Hand::Second && !self.config.peer_verification);

        if trusted {
            self.offline.remove(&id);
            self.shutdown.remove(&id);
        }

        if let Some(reason) = self.rejection(remote, hand, hint) {
            trace!("Ignoring peer {}: {}", remote, reason);
            return false;
        }

        let class = match class_member(&self.self_id, &id) {
            Some(class) => class,
            None => return false,
        };

        let capacity = self.config.bag_size_verified;
        // decided under one lock so an ID never ends up in both bags
        let outcome = {
            let mut bag = self.bags[class].lock();
            if let Some(stat) = bag.verified.get_mut(&id) {
                // already verified, its network info may have changed
                stat.set_peer_address(remote.clone());
                if hand == Hand::First {
                    stat.successfully_checked();
                }
                FoundOutcome::UpdatedVerified(stat.clone())
            } else if trusted && bag.verified.len() < capacity {
                let mut stat = PeerStatistic::new(remote.clone());
                stat.successfully_checked();
                bag.verified.insert(id, stat);
                bag.overflow.pop(&id);
                FoundOutcome::InsertedVerified
            } else if let Some(stat) = bag.overflow.get_mut(&id) {
                stat.set_peer_address(remote.clone());
                if hand == Hand::First {
                    stat.successfully_checked();
                }
                FoundOutcome::UpdatedOverflow(stat.clone())
            } else {
                let mut stat = PeerStatistic::new(remote.clone());
                if hand == Hand::First {
                    stat.successfully_checked();
                }
                if let Some((evicted, _)) = bag.overflow.push(id, stat) {
                    trace!("Evicted {} from overflow bag {}", evicted.short(), class);
                }
                FoundOutcome::InsertedOverflow
            }
        };

        match outcome {
            FoundOutcome::UpdatedVerified(stat) => {
                trace!("Updated verified peer {} in bag {}", remote, class);
                self.notify_update(remote, &stat);
            }
            FoundOutcome::InsertedVerified => {
                debug!("Inserted verified peer {} in bag {}", remote, class);
                self.notify_insert(remote, true);
            }
            FoundOutcome::UpdatedOverflow(stat) => {
                trace!("Refreshed overflow peer {} in bag {}", remote, class);
                self.notify_update(remote, &stat);
            }
            FoundOutcome::InsertedOverflow => {
                debug!("Inserted overflow peer {} in bag {}", remote, class);
                self.notify_insert(remote, false);
            }
        }
        true
    }

    /// Handle a failed exchange with `remote`.
    ///
    /// Timeouts only mark the peer as suspect until `offline_count` is
    /// exceeded; every other reason removes it and starts a cool-down.
    /// Returns true if the peer was removed.
    pub fn peer_failed(&self, remote: &PeerAddress, reason: FailReason) -> bool {
        let id = remote.peer_id();
        let class = match class_member(&self.self_id, &id) {
            Some(class) if !id.is_zero() => class,
            _ => return false,
        };

        if reason != FailReason::Timeout {
            match reason {
                FailReason::ProbablyOffline => self.offline.put(remote),
                FailReason::Shutdown => self.shutdown.put(remote),
                _ => self.exception.put(remote),
            }
            let removed = self.bags[class].lock().remove(&id);
            return match removed {
                Some(stat) => {
                    debug!("Removed peer {} from bag {} ({})", remote, class, reason);
                    self.notify_remove(remote, &stat);
                    true
                }
                None => false,
            };
        }

        let failures = {
            let mut bag = self.bags[class].lock();
            match bag.verified.get_mut(&id) {
                Some(stat) => Some(stat.failed()),
                None => bag.overflow.peek_mut(&id).map(|stat| stat.failed()),
            }
        };

        match failures {
            Some(count) if count > self.config.offline_count => {
                debug!("Peer {} timed out {} times, considering it offline", remote, count);
                self.peer_failed(remote, FailReason::ProbablyOffline)
            }
            Some(count) => {
                trace!("Peer {} timed out ({} of {})", remote, count, self.config.offline_count);
                false
            }
            None => false,
        }
    }

    /// Peers from the verified bags closest to `target`, closest first.
    ///
    /// Scans the class `target` falls into, then the closer classes, then
    /// the farther ones, stopping once `at_least` peers were collected.
    /// Whole bags are added, so the result may be larger than `at_least`.
    pub fn close_peers(&self, target: &Number160, at_least: usize) -> DistanceSet {
        let mut set = DistanceSet::new(*target);

        let class = match class_member(&self.self_id, target) {
            Some(class) => class,
            None => {
                for index in 0..NUMBER_OF_BAGS {
                    if self.fill_set(index, &mut set) >= at_least {
                        break;
                    }
                }
                return set;
            }
        };

        if self.fill_set(class, &mut set) >= at_least {
            return set;
        }

        // every peer in a lower class is closer to target than any peer in a higher class
        for index in 0..class {
            self.fill_set(index, &mut set);
        }
        if set.len() >= at_least {
            return set;
        }

        for index in class + 1..NUMBER_OF_BAGS {
            if self.fill_set(index, &mut set) >= at_least {
                break;
            }
        }
        set
    }

    /// Add the verified peers of one bag to `set`, returning the new size
    fn fill_set(&self, index: usize, set: &mut DistanceSet) -> usize {
        let bag = self.bags[index].lock();
        for stat in bag.verified.values() {
            set.insert(stat.peer_address().clone());
        }
        set.len()
    }

    /// All verified peers
    pub fn all(&self) -> Vec<PeerAddress> {
        self.bags
            .iter()
            .flat_map(|b| b.lock().verified.values().map(|s| s.peer_address().clone()).collect::<Vec<_>>())
            .collect()
    }

    /// All overflow peers
    pub fn all_overflow(&self) -> Vec<PeerAddress> {
        self.bags
            .iter()
            .flat_map(|b| b.lock().overflow.iter().map(|(_, s)| s.peer_address().clone()).collect::<Vec<_>>())
            .collect()
    }

    /// Number of verified peers
    pub fn size(&self) -> usize {
        self.bags.iter().map(|b| b.lock().verified.len()).sum()
    }

    /// Number of overflow peers
    pub fn overflow_size(&self) -> usize {
        self.bags.iter().map(|b| b.lock().overflow.len()).sum()
    }

    /// Number of verified and overflow peers in one distance class
    pub fn bag_len(&self, index: usize) -> (usize, usize) {
        match self.bags.get(index) {
            Some(bag) => {
                let bag = bag.lock();
                (bag.verified.len(), bag.overflow.len())
            }
            None => (0, 0),
        }
    }

    /// Check if a peer is verified
    pub fn contains(&self, id: &Number160) -> bool {
        match class_member(&self.self_id, id) {
            Some(class) => self.bags[class].lock().verified.contains_key(id),
            None => false,
        }
    }

    /// Check if a peer sits in an overflow bag
    pub fn contains_overflow(&self, id: &Number160) -> bool {
        match class_member(&self.self_id, id) {
            Some(class) => self.bags[class].lock().overflow.contains(id),
            None => false,
        }
    }

    /// Address of a verified peer
    pub fn find(&self, id: &Number160) -> Option<PeerAddress> {
        let class = class_member(&self.self_id, id)?;
        let bag = self.bags[class].lock();
        bag.verified.get(id).map(|s| s.peer_address().clone())
    }

    /// Liveness record of a verified or overflow peer
    pub fn statistic(&self, id: &Number160) -> Option<PeerStatistic> {
        let class = class_member(&self.self_id, id)?;
        let bag = self.bags[class].lock();
        bag.verified.get(id).or_else(|| bag.overflow.peek(id)).cloned()
    }

    /// Check if a peer is in any cool-down cache
    pub fn is_peer_removed_temporarily(&self, peer: &PeerAddress) -> bool {
        let id = peer.peer_id();
        self.offline.contains(&id) || self.shutdown.contains(&id) || self.exception.contains(&id)
    }

    /// Verified peers due for a liveness check.
    ///
    /// The more often a peer was confirmed, the longer it may go unchecked.
    pub fn peers_for_maintenance(&self, now: Instant) -> Vec<PeerAddress> {
        let intervals = &self.config.maintenance_intervals;
        let mut due = Vec::new();
        for bag in &self.bags {
            let bag = bag.lock();
            for stat in bag.verified.values() {
                let index = (stat.successes() as usize).saturating_sub(1).min(intervals.len() - 1);
                if stat.since_last_check(now) >= intervals[index] {
                    due.push(stat.peer_address().clone());
                }
            }
        }
        due
    }

    /// Why a report should be ignored, if it should
    fn rejection(&self, remote: &PeerAddress, hand: Hand, hint: Option<ConnectionHint>) -> Option<&'static str> {
        let id = remote.peer_id();
        if id.is_zero() {
            return Some("zero id");
        }
        if id == self.self_id {
            return Some("own id");
        }
        if remote.is_firewalled() {
            return Some("firewalled");
        }
        match hint {
            Some(ConnectionHint::Tcp) if remote.is_firewalled_tcp() => return Some("firewalled on tcp"),
            Some(ConnectionHint::Udp) if remote.is_firewalled_udp() => return Some("firewalled on udp"),
            _ => {}
        }
        if remote.is_relayed() && remote.relays().is_empty() {
            return Some("relayed without relays");
        }
        if hand == Hand::Third && self.is_peer_removed_temporarily(remote) {
            return Some("cooling down");
        }
        let filters = self.filters.read();
        if !filters.is_empty() && reject_by_any(&filters, remote, &self.all(), &self.self_id) {
            return Some("filtered");
        }
        None
    }

    fn notify_insert(&self, peer: &PeerAddress, verified: bool) {
        for listener in self.listeners.read().iter() {
            listener.peer_inserted(peer, verified);
        }
    }

    fn notify_remove(&self, peer: &PeerAddress, stat: &PeerStatistic) {
        for listener in self.listeners.read().iter() {
            listener.peer_removed(peer, stat);
        }
    }

    fn notify_update(&self, peer: &PeerAddress, stat: &PeerStatistic) {
        for listener in self.listeners.read().iter() {
            listener.peer_updated(peer, stat);
        }
    }
}

impl PeerStatusListener for PeerMap {
    fn peer_found(&self, remote: &PeerAddress, referrer: Option<&PeerAddress>, hint: Option<ConnectionHint>) -> bool {
        PeerMap::peer_found(self, remote, referrer, hint)
    }

    fn peer_failed(&self, remote: &PeerAddress, reason: FailReason) -> bool {
        PeerMap::peer_failed(self, remote, reason)
    }
}

impl fmt::Debug for PeerMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerMap")
            .field("self_id", &self.self_id)
            .field("verified", &self.size())
            .field("overflow", &self.overflow_size())
            .finish()
    }
}
