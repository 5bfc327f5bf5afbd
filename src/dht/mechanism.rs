//! Routing round state
//!
//! Bookkeeping of one iterative lookup: the queue of peers still to ask, the
//! peers already asked, and the hits collected so far. Owned by a single
//! lookup; all state sits behind one mutex.

use crate::dht::address::PeerAddress;
use crate::dht::config::RoutingParams;
use crate::dht::distance::DistanceSet;
use crate::dht::filter::{reject_by_any, SharedPeerFilter};
use crate::dht::number::Number160;
use crate::dht::rpc::DigestInfo;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Mutable part of a routing round
#[derive(Debug)]
struct RoundState {
    queue_to_ask: DistanceSet,
    already_asked: DistanceSet,
    potential_hits: DistanceSet,
    direct_hits: BTreeMap<PeerAddress, DigestInfo>,
    /// Smallest distance to the ordering key seen so far
    closest_known: Option<Number160>,
    successes: usize,
    failures: usize,
    no_new_info: usize,
    stop_creating_new_futures: bool,
    cancelled: bool,
}

/// State of one multi-round lookup
pub struct RoutingMechanism {
    /// Number of RPC slots
    parallel: usize,
    max_failures: usize,
    max_direct_hits: usize,
    max_no_new_info: usize,
    max_success: usize,
    filters: Vec<SharedPeerFilter>,
    state: Mutex<RoundState>,
}

impl RoutingMechanism {
    /// Create the state of a lookup ordered by distance to `key`.
    ///
    /// `key` is the location key of a targeted search, or the own ID of a
    /// random walk.
    pub fn new(key: Number160, params: &RoutingParams, filters: Vec<SharedPeerFilter>) -> Self {
        Self {
            parallel: params.parallel(),
            max_failures: params.max_failures,
            max_direct_hits: params.max_direct_hits,
            max_no_new_info: params.max_no_new_info,
            max_success: params.max_success,
            filters,
            state: Mutex::new(RoundState {
                queue_to_ask: DistanceSet::new(key),
                already_asked: DistanceSet::new(key),
                potential_hits: DistanceSet::new(key),
                direct_hits: BTreeMap::new(),
                closest_known: None,
                successes: 0,
                failures: 0,
                no_new_info: 0,
                stop_creating_new_futures: false,
                cancelled: false,
            }),
        }
    }

    /// Number of RPC slots
    pub fn parallel(&self) -> usize {
        self.parallel
    }

    /// Key the queue is ordered by
    pub fn key(&self) -> Number160 {
        self.state.lock().queue_to_ask.key()
    }

    /// Add initial candidates to the queue.
    ///
    /// Seeds are not filtered; they define the starting distance the lookup
    /// has to beat.
    pub fn seed_candidates<I: IntoIterator<Item = PeerAddress>>(&self, candidates: I) {
        let mut state = self.state.lock();
        for peer in candidates {
            if state.already_asked.contains(&peer) {
                continue;
            }
            let distance = peer.peer_id().distance(&state.queue_to_ask.key());
            if state.closest_known.map_or(true, |closest| distance < closest) {
                state.closest_known = Some(distance);
            }
            state.queue_to_ask.insert(peer);
        }
    }

    /// Record a peer as asked without contacting it
    pub fn seed_already_asked(&self, peer: PeerAddress) {
        let mut state = self.state.lock();
        state.queue_to_ask.remove(&peer.peer_id());
        state.already_asked.insert(peer);
    }

    pub fn add_potential_hit(&self, peer: PeerAddress) {
        self.state.lock().potential_hits.insert(peer);
    }

    pub fn add_direct_hit(&self, peer: PeerAddress, digest: DigestInfo) {
        self.state.lock().direct_hits.insert(peer, digest);
    }

    /// Take the next candidate: the closest one, or a random one for a
    /// random walk
    pub fn poll_next(&self, random_search: bool) -> Option<PeerAddress> {
        let mut state = self.state.lock();
        if random_search {
            state.queue_to_ask.pop_random(&mut rand::thread_rng())
        } else {
            state.queue_to_ask.pop_first()
        }
    }

    /// Move a peer into the already-asked set
    pub fn mark_asked(&self, peer: PeerAddress) {
        let mut state = self.state.lock();
        state.queue_to_ask.remove(&peer.peer_id());
        state.already_asked.insert(peer);
    }

    /// Add reported neighbors to the queue.
    ///
    /// Returns true if the best surviving neighbor is closer to the ordering
    /// key than any peer seen before.
    pub fn merge_neighbors(&self, neighbors: &[PeerAddress], target: &Number160) -> bool {
        let mut state = self.state.lock();
        Self::merge_locked(&mut state, &self.filters, neighbors, target)
    }

    fn merge_locked(
        state: &mut RoundState,
        filters: &[SharedPeerFilter],
        neighbors: &[PeerAddress],
        target: &Number160,
    ) -> bool {
        let known: Vec<PeerAddress> = state
            .queue_to_ask
            .iter()
            .chain(state.already_asked.iter())
            .cloned()
            .collect();
        let key = state.queue_to_ask.key();

        let mut best: Option<Number160> = None;
        for peer in neighbors {
            if state.already_asked.contains(peer) {
                continue;
            }
            if reject_by_any(filters, peer, &known, target) {
                trace!("Neighbor {} rejected by filter", peer);
                continue;
            }
            let distance = peer.peer_id().distance(&key);
            if best.map_or(true, |b| distance < b) {
                best = Some(distance);
            }
            state.queue_to_ask.insert(peer.clone());
        }

        match (best, state.closest_known) {
            (Some(best), Some(closest)) if best < closest => {
                state.closest_known = Some(best);
                true
            }
            (Some(best), None) => {
                state.closest_known = Some(best);
                true
            }
            _ => false,
        }
    }

    /// Evaluate a successful RPC. Returns true if the lookup is finished.
    ///
    /// A lookup that reached a soft limit stops dispatching but only
    /// finishes once the last outstanding RPC has reported.
    pub fn evaluate_success(
        &self,
        remote: &PeerAddress,
        digest: Option<&DigestInfo>,
        neighbors: &[PeerAddress],
        is_last: bool,
        target: &Number160,
    ) -> bool {
        let mut state = self.state.lock();
        state.potential_hits.insert(remote.clone());

        if let Some(digest) = digest.filter(|d| !d.is_empty()) {
            state.direct_hits.insert(remote.clone(), *digest);
            debug!("Direct hit on {} ({} entries)", remote, digest.size);
            if state.direct_hits.len() >= self.max_direct_hits {
                state.stop_creating_new_futures = true;
                return true;
            }
        }

        state.successes += 1;
        if state.successes > self.max_success {
            debug!("Lookup reached {} successful answers", state.successes);
            state.stop_creating_new_futures = true;
            return is_last;
        }

        if Self::merge_locked(&mut state, &self.filters, neighbors, target) {
            state.no_new_info = 0;
        } else {
            state.no_new_info += 1;
            if state.no_new_info >= self.max_no_new_info {
                debug!("No closer peers after {} answers", state.no_new_info);
                state.stop_creating_new_futures = true;
                return is_last;
            }
        }

        state.stop_creating_new_futures && is_last
    }

    /// Evaluate a failed RPC. Returns true if the lookup is finished.
    pub fn evaluate_failure(&self) -> bool {
        let mut state = self.state.lock();
        state.failures += 1;
        state.failures > self.max_failures
    }

    /// Stop dispatching and mark outstanding RPCs as cancelled
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.stop_creating_new_futures = true;
        state.cancelled = true;
    }

    pub fn stop_creating_new_futures(&self) -> bool {
        self.state.lock().stop_creating_new_futures
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    pub fn already_asked(&self) -> DistanceSet {
        self.state.lock().already_asked.clone()
    }

    pub fn potential_hits(&self) -> DistanceSet {
        self.state.lock().potential_hits.clone()
    }

    pub fn direct_hits(&self) -> BTreeMap<PeerAddress, DigestInfo> {
        self.state.lock().direct_hits.clone()
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue_to_ask.len()
    }

    pub fn successes(&self) -> usize {
        self.state.lock().successes
    }

    pub fn failures(&self) -> usize {
        self.state.lock().failures
    }
}

impl std::fmt::Debug for RoutingMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RoutingMechanism")
            .field("parallel", &self.parallel)
            .field("queue", &state.queue_to_ask.len())
            .field("already_asked", &state.already_asked.len())
            .field("direct_hits", &state.direct_hits.len())
            .field("successes", &state.successes)
            .field("failures", &state.failures)
            .finish()
    }
}
