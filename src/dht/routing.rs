//! DHT routing module
//!
//! Iterative lookup toward a key. Each round keeps up to `parallel` neighbor
//! requests in flight, waits for the first one to complete, merges what it
//! learned and refills the freed slot, until the round state says the lookup
//! is finished.

use crate::dht::address::PeerAddress;
use crate::dht::config::RoutingParams;
use crate::dht::distance::DistanceSet;
use crate::dht::listener::{ConnectionHint, FailReason};
use crate::dht::mechanism::RoutingMechanism;
use crate::dht::number::Number160;
use crate::dht::peer_map::PeerMap;
use crate::dht::rpc::{DigestInfo, DigestSource, NeighborResponse, NeighborRpc, RequestKind, SearchValues, NEIGHBOR_LIMIT};
use crate::error::{PeerException, RoutingError};
use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

/// A lookup request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRequest {
    /// Keys to search for
    pub search: SearchValues,
    /// Limits of this lookup
    pub params: RoutingParams,
    /// Whether the lookup populates the peer map at startup
    pub is_bootstrap: bool,
}

impl RoutingRequest {
    /// Lookup of the peers closest to `location`
    pub fn to_location(location: Number160, params: RoutingParams) -> Self {
        Self {
            search: SearchValues::for_location(location),
            params,
            is_bootstrap: false,
        }
    }

    /// Random walk for discovery
    pub fn random(params: RoutingParams) -> Self {
        Self {
            search: SearchValues::random(),
            params,
            is_bootstrap: false,
        }
    }

    /// Bootstrap lookup toward our own ID
    pub fn bootstrap(self_id: Number160, params: RoutingParams) -> Self {
        Self {
            search: SearchValues::for_location(self_id),
            params,
            is_bootstrap: true,
        }
    }

    /// Create a request from search values
    pub fn new(search: SearchValues, params: RoutingParams) -> Self {
        Self {
            search,
            params,
            is_bootstrap: false,
        }
    }

    fn connection_hint(&self) -> Option<ConnectionHint> {
        if self.params.force_tcp {
            Some(ConnectionHint::Tcp)
        } else if self.params.force_udp {
            Some(ConnectionHint::Udp)
        } else {
            None
        }
    }
}

/// How a finished lookup went, from the caller's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStatus {
    /// At least one peer besides ourselves answered or holds the content
    Found,
    /// Nothing beyond ourselves was reached
    NoRoute,
    /// A bootstrap whose only seed was ourselves
    RoutedOnlyToSelf,
}

impl fmt::Display for RoutingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingStatus::Found => write!(f, "found"),
            RoutingStatus::NoRoute => write!(f, "no route"),
            RoutingStatus::RoutedOnlyToSelf => write!(f, "routed only to self"),
        }
    }
}

/// Outcome of a lookup
#[derive(Debug, Clone)]
pub struct RoutingResult {
    /// Our own ID
    pub self_id: Number160,
    /// Peers that confirmed holding matching content
    pub direct_hits: BTreeMap<PeerAddress, DigestInfo>,
    /// Peers that answered, closest to the key first
    pub potential_hits: DistanceSet,
    /// Every peer that was asked, ourselves included
    pub already_asked: DistanceSet,
    pub is_bootstrap: bool,
    /// False for a bootstrap seeded only with ourselves
    pub routing_to_others: bool,
}

impl RoutingResult {
    fn from_mechanism(
        self_id: Number160,
        mechanism: &RoutingMechanism,
        is_bootstrap: bool,
        routing_to_others: bool,
    ) -> Self {
        Self {
            self_id,
            direct_hits: mechanism.direct_hits(),
            potential_hits: mechanism.potential_hits(),
            already_asked: mechanism.already_asked(),
            is_bootstrap,
            routing_to_others,
        }
    }

    pub fn status(&self) -> RoutingStatus {
        if self.is_bootstrap && !self.routing_to_others {
            return RoutingStatus::RoutedOnlyToSelf;
        }
        let reached_others = self.potential_hits.iter().any(|p| p.peer_id() != self.self_id);
        if self.direct_hits.is_empty() && !reached_others {
            RoutingStatus::NoRoute
        } else {
            RoutingStatus::Found
        }
    }

    /// Answering peers other than ourselves, closest first
    pub fn found_peers(&self) -> Vec<PeerAddress> {
        self.potential_hits
            .iter()
            .filter(|p| p.peer_id() != self.self_id)
            .cloned()
            .collect()
    }

    /// Check if we hold matching content ourselves
    pub fn is_local_hit(&self) -> bool {
        self.direct_hits.keys().any(|p| p.peer_id() == self.self_id)
    }
}

/// Drives lookups over a [`NeighborRpc`] and keeps the peer map current
pub struct DistributedRouting<R: NeighborRpc> {
    self_address: PeerAddress,
    peer_map: Arc<PeerMap>,
    rpc: Arc<R>,
    storage_digest: Option<Arc<dyn DigestSource>>,
    tracker_digest: Option<Arc<dyn DigestSource>>,
}

impl<R: NeighborRpc> DistributedRouting<R> {
    /// Create a new driver. `self_address` must carry the peer map's own ID.
    pub fn new(self_address: PeerAddress, peer_map: Arc<PeerMap>, rpc: Arc<R>) -> Result<Self> {
        if self_address.peer_id() != peer_map.self_id() {
            return Err(RoutingError::validation_error_with_field(
                format!(
                    "address ID {} does not match peer map ID {}",
                    self_address.peer_id(),
                    peer_map.self_id()
                ),
                "self_address",
            )
            .into());
        }

        Ok(Self {
            self_address,
            peer_map,
            rpc,
            storage_digest: None,
            tracker_digest: None,
        })
    }

    /// Answer storage digest requests from `source`
    pub fn with_storage_digest(mut self, source: Arc<dyn DigestSource>) -> Self {
        self.storage_digest = Some(source);
        self
    }

    /// Answer tracker digest requests from `source`
    pub fn with_tracker_digest(mut self, source: Arc<dyn DigestSource>) -> Self {
        self.tracker_digest = Some(source);
        self
    }

    pub fn self_address(&self) -> &PeerAddress {
        &self.self_address
    }

    pub fn self_id(&self) -> Number160 {
        self.self_address.peer_id()
    }

    pub fn peer_map(&self) -> &Arc<PeerMap> {
        &self.peer_map
    }

    /// Bootstrap from `seeds`: a lookup toward our own ID
    pub async fn bootstrap(
        &self,
        seeds: Vec<PeerAddress>,
        params: RoutingParams,
        channel: &R::Channel,
    ) -> Result<RoutingResult> {
        let request = RoutingRequest::bootstrap(self.self_id(), params);
        self.route(seeds, &request, RequestKind::Neighbors, channel).await
    }

    /// Route using candidates from the peer map.
    ///
    /// A targeted lookup starts from the `2 * parallel` closest verified
    /// peers; a random walk from every verified peer.
    pub async fn route_to(
        &self,
        request: &RoutingRequest,
        kind: RequestKind,
        channel: &R::Channel,
    ) -> Result<RoutingResult> {
        let candidates = match request.search.location_key {
            Some(location) => self
                .peer_map
                .close_peers(&location, request.params.parallel() * 2)
                .to_vec(),
            None => self.peer_map.all(),
        };
        self.route(candidates, request, kind, channel).await
    }

    /// Random walk that fills the peer map with new peers
    pub async fn discover_random(&self, params: RoutingParams, channel: &R::Channel) -> Result<RoutingResult> {
        self.route_to(&RoutingRequest::random(params), RequestKind::Neighbors, channel)
            .await
    }

    /// Contact every verified peer whose maintenance interval elapsed and
    /// report the outcome to the peer map. Returns how many answered.
    pub async fn refresh_due_peers(&self, channel: &R::Channel) -> usize {
        let due = self.peer_map.peers_for_maintenance(Instant::now());
        if due.is_empty() {
            return 0;
        }
        debug!("Refreshing {} peers", due.len());

        let mut checks = JoinSet::new();
        for peer in due {
            let rpc = Arc::clone(&self.rpc);
            let channel = channel.clone();
            checks.spawn(async move {
                let search = SearchValues::for_location(peer.peer_id());
                let result = rpc.close_neighbors(&peer, &search, RequestKind::Neighbors, &channel).await;
                (peer, result)
            });
        }

        let mut alive = 0;
        while let Some(joined) = checks.join_next().await {
            let (peer, result) = match joined {
                Ok(checked) => checked,
                Err(e) => {
                    warn!("Refresh task failed: {}", e);
                    continue;
                }
            };
            match result {
                Ok(response) => {
                    self.peer_map.peer_found(&response.responder, None, None);
                    alive += 1;
                }
                Err(e) => {
                    let reason = PeerException::reason_of(&e).unwrap_or(FailReason::Exception);
                    debug!("Refresh of {} failed ({})", peer, reason);
                    self.peer_map.peer_failed(&peer, reason);
                }
            }
        }
        alive
    }

    /// Run a lookup starting from `candidates`.
    ///
    /// RPC failures never fail the lookup; they count toward
    /// `max_failures` and the result holds whatever was found.
    pub async fn route(
        &self,
        candidates: Vec<PeerAddress>,
        request: &RoutingRequest,
        kind: RequestKind,
        channel: &R::Channel,
    ) -> Result<RoutingResult> {
        request.params.validate()?;
        let random_search = request.search.is_random_search();

        let self_id = self.self_id();
        let key = request.search.location_key.unwrap_or(self_id);
        let mechanism = RoutingMechanism::new(key, &request.params, self.peer_map.peer_filters());
        mechanism.seed_already_asked(self.self_address.clone());
        mechanism.add_potential_hit(self.self_address.clone());
        mechanism.seed_candidates(candidates.iter().cloned());

        let routing_to_others = !(candidates.len() == 1 && candidates[0].peer_id() == self_id);

        debug!(
            "Routing to {} ({}) with {} candidates, parallel {}",
            if random_search { "random".to_string() } else { key.short() },
            kind,
            candidates.len(),
            request.params.parallel()
        );

        if let Some(digest) = self.local_digest(&request.search, kind) {
            if !digest.is_empty() {
                debug!("Local {} hit with {} entries", kind, digest.size);
                mechanism.add_direct_hit(self.self_address.clone(), digest);
                return Ok(RoutingResult::from_mechanism(self_id, &mechanism, request.is_bootstrap, routing_to_others));
            }
        }

        if candidates.is_empty() {
            debug!("No candidates, returning local result");
            return Ok(RoutingResult::from_mechanism(self_id, &mechanism, request.is_bootstrap, routing_to_others));
        }

        self.run_rounds(&mechanism, request, kind, channel, key, random_search)
            .await?;

        let result = RoutingResult::from_mechanism(self_id, &mechanism, request.is_bootstrap, routing_to_others);
        info!(
            "Routing to {} finished: {}, {} direct hits, {} potential hits, {} asked",
            key.short(),
            result.status(),
            result.direct_hits.len(),
            result.potential_hits.len(),
            result.already_asked.len()
        );
        Ok(result)
    }

    /// Local digest for digest-bearing requests with a location key.
    ///
    /// Random searches have no location key and skip it.
    fn local_digest(&self, search: &SearchValues, kind: RequestKind) -> Option<DigestInfo> {
        let source = match kind {
            RequestKind::Neighbors => return None,
            RequestKind::StorageDigest => self.storage_digest.as_ref()?,
            RequestKind::TrackerDigest => self.tracker_digest.as_ref()?,
        };
        let query = search.digest_query()?;
        Some(source.digest(&query))
    }

    /// The round loop. Returns once the lookup is finished or nothing is
    /// left to ask.
    async fn run_rounds(
        &self,
        mechanism: &RoutingMechanism,
        request: &RoutingRequest,
        kind: RequestKind,
        channel: &R::Channel,
        key: Number160,
        random_search: bool,
    ) -> Result<()> {
        let parallel = mechanism.parallel();
        let hint = request.connection_hint();
        let mut slots: Vec<Option<PeerAddress>> = vec![None; parallel];
        let mut in_flight: JoinSet<(usize, PeerAddress, Result<NeighborResponse>)> = JoinSet::new();
        let mut round = 0usize;

        loop {
            if !mechanism.stop_creating_new_futures() {
                for (index, slot) in slots.iter_mut().enumerate() {
                    if slot.is_some() {
                        continue;
                    }
                    let Some(next) = mechanism.poll_next(random_search) else {
                        break;
                    };
                    mechanism.mark_asked(next.clone());

                    let search = if random_search {
                        request.search.redirected(next.peer_id().xor(&Number160::MAX))
                    } else {
                        request.search.clone()
                    };
                    trace!("Slot {}: asking {}", index, next);

                    let rpc = Arc::clone(&self.rpc);
                    let channel = channel.clone();
                    let remote = next.clone();
                    in_flight.spawn(async move {
                        let result = rpc.close_neighbors(&remote, &search, kind, &channel).await;
                        (index, remote, result)
                    });
                    *slot = Some(next);
                }
            }

            let active = slots.iter().filter(|s| s.is_some()).count();
            if active == 0 {
                debug!("No outstanding requests after {} rounds", round);
                break;
            }
            let is_last = active == 1;
            round += 1;

            let (index, remote, result) = match in_flight.join_next().await {
                Some(Ok(completed)) => completed,
                Some(Err(e)) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Some(Err(e)) => {
                    return Err(RoutingError::rpc_error(format!("routing task failed: {}", e)).into());
                }
                None => break,
            };
            slots[index] = None;

            let finished = match result {
                Ok(response) => {
                    let neighbors: Vec<PeerAddress> = response.neighbors.iter().take(NEIGHBOR_LIMIT).cloned().collect();
                    trace!("{} answered with {} neighbors", response.responder, neighbors.len());

                    self.peer_map.peer_found(&response.responder, None, hint);
                    for neighbor in &neighbors {
                        self.peer_map.peer_found(neighbor, Some(&response.responder), None);
                    }
                    mechanism.evaluate_success(&response.responder, response.digest.as_ref(), &neighbors, is_last, &key)
                }
                Err(e) => {
                    let reason = PeerException::reason_of(&e).unwrap_or(FailReason::Exception);
                    warn!("Request to {} failed ({}): {}", remote, reason, e);
                    self.peer_map.peer_failed(&remote, reason);
                    mechanism.evaluate_failure()
                }
            };

            if finished {
                debug!("Routing finished after {} rounds", round);
                break;
            }
        }

        mechanism.cancel();
        in_flight.abort_all();
        Ok(())
    }
}

impl<R: NeighborRpc> fmt::Debug for DistributedRouting<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedRouting")
            .field("self_address", &self.self_address)
            .field("peers", &self.peer_map.size())
            .field("storage_digest", &self.storage_digest.is_some())
            .field("tracker_digest", &self.tracker_digest.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::config::PeerMapConfig;
    use crate::dht::number::Number640;
    use crate::simulation::{MemoryStorage, SimulatedNetwork};

    fn address(id: u32) -> PeerAddress {
        PeerAddress::from_id(Number160::from(id))
    }

    fn driver(network: &Arc<SimulatedNetwork>, id: u32) -> DistributedRouting<SimulatedNetwork> {
        let node = network.add_node(address(id)).unwrap();
        DistributedRouting::new(address(id), node.peer_map.clone(), network.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_new_rejects_mismatched_id() {
        let network = Arc::new(SimulatedNetwork::new(PeerMapConfig::default()));
        let map = Arc::new(PeerMap::new(Number160::from(1u32), PeerMapConfig::default()).unwrap());
        assert!(DistributedRouting::new(address(2), map, network).is_err());
    }

    #[tokio::test]
    async fn test_invalid_params_fail_fast() {
        let network = Arc::new(SimulatedNetwork::new(PeerMapConfig::default()));
        let routing = driver(&network, 1);
        let channel = network.channel(&address(1));

        let request = RoutingRequest::to_location(Number160::from(5u32), RoutingParams::default().with_parallel(0, 0));
        assert!(routing.route(vec![address(2)], &request, RequestKind::Neighbors, &channel).await.is_err());
        assert_eq!(network.call_count(), 0);
    }

    #[tokio::test]
    async fn test_random_digest_search_skips_local_digest() {
        let network = Arc::new(SimulatedNetwork::new(PeerMapConfig::default()));
        let storage = Arc::new(MemoryStorage::new());
        storage.put(Number640::new(Number160::from(9u32), Number160::ZERO, Number160::ZERO, Number160::ZERO), vec![1]);
        let routing = driver(&network, 1).with_storage_digest(storage);
        network.add_node(address(2)).unwrap();
        let channel = network.channel(&address(1));

        let request = RoutingRequest::random(RoutingParams::default());
        let result = routing.route(vec![address(2)], &request, RequestKind::StorageDigest, &channel).await.unwrap();

        assert!(!result.is_local_hit());
        assert_eq!(result.status(), RoutingStatus::Found);
        assert_eq!(network.call_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_candidates() {
        let network = Arc::new(SimulatedNetwork::new(PeerMapConfig::default()));
        let routing = driver(&network, 1);
        let channel = network.channel(&address(1));

        let request = RoutingRequest::to_location(Number160::from(5u32), RoutingParams::default());
        let result = routing.route(vec![], &request, RequestKind::Neighbors, &channel).await.unwrap();
        assert_eq!(result.status(), RoutingStatus::NoRoute);
        assert!(result.already_asked.contains(&address(1)));
        assert!(result.potential_hits.contains(&address(1)));
        assert_eq!(network.call_count(), 0);
    }

    #[tokio::test]
    async fn test_bootstrap_only_to_self() {
        let network = Arc::new(SimulatedNetwork::new(PeerMapConfig::default()));
        let routing = driver(&network, 1);
        let channel = network.channel(&address(1));

        let result = routing.bootstrap(vec![address(1)], RoutingParams::default(), &channel).await.unwrap();
        assert_eq!(result.status(), RoutingStatus::RoutedOnlyToSelf);
        assert_eq!(network.call_count(), 0);
    }

    #[tokio::test]
    async fn test_route_reports_liveness() {
        let network = Arc::new(SimulatedNetwork::new(PeerMapConfig::default()));
        let routing = driver(&network, 1);
        let second = network.add_node(address(2)).unwrap();
        network.add_node(address(3)).unwrap();
        second.peer_map.peer_found(&address(3), None, None);
        let channel = network.channel(&address(1));

        let request = RoutingRequest::to_location(Number160::from(3u32), RoutingParams::default());
        let result = routing.route(vec![address(2)], &request, RequestKind::Neighbors, &channel).await.unwrap();

        assert_eq!(result.status(), RoutingStatus::Found);
        assert_eq!(result.found_peers().first(), Some(&address(3)));
        assert!(routing.peer_map().contains(&Number160::from(2u32)));
        assert!(routing.peer_map().contains(&Number160::from(3u32)));
    }

    #[tokio::test]
    async fn test_failed_peer_is_reported() {
        let network = Arc::new(SimulatedNetwork::new(PeerMapConfig::default()));
        let routing = driver(&network, 1);
        network.add_node(address(2)).unwrap();
        routing.peer_map().peer_found(&address(2), None, None);
        network.fail_peer(Number160::from(2u32), FailReason::Shutdown);
        let channel = network.channel(&address(1));

        let request = RoutingRequest::to_location(Number160::from(2u32), RoutingParams::default());
        let result = routing.route_to(&request, RequestKind::Neighbors, &channel).await.unwrap();

        assert_eq!(result.status(), RoutingStatus::NoRoute);
        assert!(!routing.peer_map().contains(&Number160::from(2u32)));
        assert!(routing.peer_map().is_peer_removed_temporarily(&address(2)));
    }

    #[tokio::test]
    async fn test_remote_direct_hit() {
        let network = Arc::new(SimulatedNetwork::new(PeerMapConfig::default()));
        let routing = driver(&network, 1);
        let holder = network.add_node(address(2)).unwrap();
        let location = Number160::from(7u32);
        holder
            .storage
            .put(Number640::new(location, Number160::ZERO, Number160::from(1u32), Number160::ZERO), b"value".to_vec());
        let channel = network.channel(&address(1));

        let request = RoutingRequest::new(
            SearchValues::for_location(location).with_domain(Number160::ZERO),
            RoutingParams::default().with_max_direct_hits(1),
        );
        let result = routing.route(vec![address(2)], &request, RequestKind::StorageDigest, &channel).await.unwrap();
        assert_eq!(result.direct_hits.len(), 1);
        assert_eq!(result.direct_hits.get(&address(2)).map(|d| d.size), Some(1));
        assert!(!result.is_local_hit());
    }

    #[tokio::test]
    async fn test_random_search_redirects_target() {
        let network = Arc::new(SimulatedNetwork::new(PeerMapConfig::default()));
        let routing = driver(&network, 1);
        network.add_node(address(2)).unwrap();
        let channel = network.channel(&address(1));

        let request = RoutingRequest::random(RoutingParams::default());
        routing.route(vec![address(2)], &request, RequestKind::Neighbors, &channel).await.unwrap();

        let calls = network.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].search.location_key, Some(Number160::from(2u32).xor(&Number160::MAX)));
    }

    #[tokio::test]
    async fn test_local_storage_counts_as_hit() {
        let network = Arc::new(SimulatedNetwork::new(PeerMapConfig::default()));
        let storage = Arc::new(MemoryStorage::new());
        let location = Number160::from(9u32);
        storage.put(Number640::new(location, Number160::ZERO, Number160::ZERO, Number160::ZERO), vec![1]);
        let routing = driver(&network, 1).with_storage_digest(storage);
        let channel = network.channel(&address(1));

        let request = RoutingRequest::to_location(location, RoutingParams::default());
        let result = routing.route(vec![], &request, RequestKind::StorageDigest, &channel).await.unwrap();
        assert!(result.is_local_hit());
        assert_eq!(result.status(), RoutingStatus::Found);
    }

    #[tokio::test]
    async fn test_local_hit_skips_network_rounds() {
        let network = Arc::new(SimulatedNetwork::new(PeerMapConfig::default()));
        let storage = Arc::new(MemoryStorage::new());
        let location = Number160::from(9u32);
        storage.put(Number640::new(location, Number160::ZERO, Number160::ZERO, Number160::ZERO), vec![1]);
        let routing = driver(&network, 1).with_storage_digest(storage);
        network.add_node(address(2)).unwrap();
        let channel = network.channel(&address(1));

        let request = RoutingRequest::to_location(location, RoutingParams::default());
        let result = routing.route(vec![address(2)], &request, RequestKind::StorageDigest, &channel).await.unwrap();

        assert!(result.is_local_hit());
        assert_eq!(result.direct_hits.len(), 1);
        assert_eq!(network.call_count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_due_peers() {
        let config = PeerMapConfig::default().with_maintenance_intervals(vec![std::time::Duration::ZERO]);
        let network = Arc::new(SimulatedNetwork::new(config));
        let routing = driver(&network, 1);
        network.add_node(address(2)).unwrap();
        network.add_node(address(3)).unwrap();
        routing.peer_map().peer_found(&address(2), None, None);
        routing.peer_map().peer_found(&address(3), None, None);
        network.fail_peer(Number160::from(3u32), FailReason::Exception);
        let channel = network.channel(&address(1));

        assert_eq!(routing.refresh_due_peers(&channel).await, 1);
        assert!(routing.peer_map().contains(&Number160::from(2u32)));
        assert!(!routing.peer_map().contains(&Number160::from(3u32)));
        assert_eq!(routing.peer_map().statistic(&Number160::from(2u32)).map(|s| s.successes()), Some(2));
    }
}
