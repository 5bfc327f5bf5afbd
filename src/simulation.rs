//! In-memory network
//!
//! Runs many peers inside one process. Every node has its own peer map and
//! store; neighbor requests are answered straight from the remote node's
//! peer map. Supports failure injection and records every request, so it
//! serves both the demo binary and the tests.

use crate::dht::address::PeerAddress;
use crate::dht::config::PeerMapConfig;
use crate::dht::listener::FailReason;
use crate::dht::number::{Number160, Number640};
use crate::dht::peer_map::PeerMap;
use crate::dht::rpc::{DigestInfo, DigestQuery, DigestSource, NeighborResponse, NeighborRpc, RequestKind, SearchValues, NEIGHBOR_LIMIT};
use crate::error::{PeerException, RoutingError};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Key-value store that can digest key ranges
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<Number640, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: Number640, value: Vec<u8>) {
        self.entries.write().insert(key, value);
    }

    pub fn remove(&self, key: &Number640) -> Option<Vec<u8>> {
        self.entries.write().remove(key)
    }

    pub fn get(&self, key: &Number640) -> Option<Vec<u8>> {
        self.entries.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DigestSource for MemoryStorage {
    fn digest(&self, query: &DigestQuery) -> DigestInfo {
        let (from, to) = query.range();
        if from > to {
            return DigestInfo::EMPTY;
        }

        let entries = self.entries.read();
        let mut digest = DigestInfo::EMPTY;
        for (key, value) in entries.range(from..=to) {
            let hash = Number160::from_slice(&Sha1::digest(value)).unwrap_or(Number160::ZERO);
            digest.size += 1;
            digest.key_digest = digest.key_digest.xor(&key.content.xor(&key.version));
            digest.content_digest = digest.content_digest.xor(&hash);
        }
        digest
    }
}

/// One peer of the network
#[derive(Debug)]
pub struct SimulatedNode {
    pub address: PeerAddress,
    pub peer_map: Arc<PeerMap>,
    pub storage: Arc<MemoryStorage>,
    pub tracker: Arc<MemoryStorage>,
}

/// Who is sending; passed through the routing driver untouched
#[derive(Debug, Clone)]
pub struct SimulatedChannel {
    pub sender: PeerAddress,
}

/// A request seen by the network
#[derive(Debug, Clone)]
pub struct SimulatedCall {
    pub sender: PeerAddress,
    pub remote: PeerAddress,
    pub search: SearchValues,
    pub kind: RequestKind,
}

/// In-memory network of peers
#[derive(Debug)]
pub struct SimulatedNetwork {
    config: PeerMapConfig,
    nodes: RwLock<HashMap<Number160, Arc<SimulatedNode>>>,
    /// Probability that any request fails with a timeout
    fail_rate: Mutex<f64>,
    /// Peers that fail every request with the given reason
    failing: Mutex<HashMap<Number160, FailReason>>,
    latency: Mutex<Duration>,
    calls: Mutex<Vec<SimulatedCall>>,
}

impl SimulatedNetwork {
    /// Create an empty network; nodes get peer maps with `config`
    pub fn new(config: PeerMapConfig) -> Self {
        Self {
            config,
            nodes: RwLock::new(HashMap::new()),
            fail_rate: Mutex::new(0.0),
            failing: Mutex::new(HashMap::new()),
            latency: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Add a node
    pub fn add_node(&self, address: PeerAddress) -> Result<Arc<SimulatedNode>> {
        let id = address.peer_id();
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&id) {
            return Err(RoutingError::validation_error_with_field(format!("node {} already exists", id), "peer_id").into());
        }

        let node = Arc::new(SimulatedNode {
            peer_map: Arc::new(PeerMap::new(id, self.config.clone())?),
            address,
            storage: Arc::new(MemoryStorage::new()),
            tracker: Arc::new(MemoryStorage::new()),
        });
        nodes.insert(id, node.clone());
        debug!("Added simulated node {}", id.short());
        Ok(node)
    }

    pub fn node(&self, id: &Number160) -> Option<Arc<SimulatedNode>> {
        self.nodes.read().get(id).cloned()
    }

    pub fn nodes(&self) -> Vec<Arc<SimulatedNode>> {
        self.nodes.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Channel for requests sent by `sender`
    pub fn channel(&self, sender: &PeerAddress) -> SimulatedChannel {
        SimulatedChannel { sender: sender.clone() }
    }

    /// Set the probability, clamped to `0.0..=1.0`, of a request timing out
    pub fn set_fail_rate(&self, fail_rate: f64) {
        *self.fail_rate.lock() = fail_rate.clamp(0.0, 1.0);
    }

    /// Make every request to `id` fail with `reason`
    pub fn fail_peer(&self, id: Number160, reason: FailReason) {
        self.failing.lock().insert(id, reason);
    }

    pub fn heal_peer(&self, id: &Number160) {
        self.failing.lock().remove(id);
    }

    /// Delay every answer by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn calls(&self) -> Vec<SimulatedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Failure injected for a request to `remote`, if any
    fn injected_failure(&self, remote: &Number160) -> Option<FailReason> {
        if let Some(reason) = self.failing.lock().get(remote) {
            return Some(*reason);
        }
        let fail_rate = *self.fail_rate.lock();
        if fail_rate > 0.0 && rand::thread_rng().gen_bool(fail_rate) {
            return Some(FailReason::Timeout);
        }
        None
    }
}

#[async_trait]
impl NeighborRpc for SimulatedNetwork {
    type Channel = SimulatedChannel;

    async fn close_neighbors(
        &self,
        remote: &PeerAddress,
        search: &SearchValues,
        kind: RequestKind,
        channel: &Self::Channel,
    ) -> Result<NeighborResponse> {
        self.calls.lock().push(SimulatedCall {
            sender: channel.sender.clone(),
            remote: remote.clone(),
            search: search.clone(),
            kind,
        });

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let remote_id = remote.peer_id();
        if let Some(reason) = self.injected_failure(&remote_id) {
            trace!("Injected {} for {}", reason, remote_id.short());
            return Err(PeerException::new(reason, format!("request to {} failed", remote_id)).into());
        }

        let node = self
            .node(&remote_id)
            .ok_or_else(|| PeerException::new(FailReason::Timeout, format!("no node {}", remote_id)))?;

        let target = search.location_key.unwrap_or(remote_id);
        let neighbors: Vec<PeerAddress> = node
            .peer_map
            .close_peers(&target, NEIGHBOR_LIMIT)
            .into_iter()
            .filter(|p| p.peer_id() != channel.sender.peer_id())
            .take(NEIGHBOR_LIMIT)
            .collect();

        // the remote learns about us first-hand
        node.peer_map.peer_found(&channel.sender, None, None);

        let mut response = NeighborResponse::new(node.address.clone(), neighbors);
        let source = match kind {
            RequestKind::Neighbors => None,
            RequestKind::StorageDigest => Some(&node.storage),
            RequestKind::TrackerDigest => Some(&node.tracker),
        };
        if let (Some(source), Some(query)) = (source, search.digest_query()) {
            response = response.with_digest(source.digest(&query));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(id: u32) -> PeerAddress {
        PeerAddress::from_id(Number160::from(id))
    }

    #[test]
    fn test_storage_digest_range() {
        let storage = MemoryStorage::new();
        let location = Number160::from(1u32);
        let domain = Number160::from(2u32);
        storage.put(Number640::new(location, domain, Number160::from(3u32), Number160::ZERO), b"a".to_vec());
        storage.put(Number640::new(location, domain, Number160::from(4u32), Number160::ZERO), b"b".to_vec());
        storage.put(Number640::new(location, Number160::from(5u32), Number160::ZERO, Number160::ZERO), b"c".to_vec());

        let query = SearchValues::for_location(location).with_domain(domain).digest_query().unwrap();
        let digest = storage.digest(&query);
        assert_eq!(digest.size, 2);
        assert_eq!(digest.key_digest, Number160::from(3u32 ^ 4u32));

        let query = SearchValues::for_location(location).digest_query().unwrap();
        assert_eq!(storage.digest(&query).size, 3);

        let query = SearchValues::for_location(Number160::from(9u32)).digest_query().unwrap();
        assert!(storage.digest(&query).is_empty());
    }

    #[test]
    fn test_add_node_twice_fails() {
        let network = SimulatedNetwork::new(PeerMapConfig::default());
        assert!(network.add_node(address(1)).is_ok());
        assert!(network.add_node(address(1)).is_err());
        assert_eq!(network.len(), 1);
    }

    #[tokio::test]
    async fn test_close_neighbors_answers_from_peer_map() {
        let network = SimulatedNetwork::new(PeerMapConfig::default());
        let remote = network.add_node(address(2)).unwrap();
        remote.peer_map.peer_found(&address(3), None, None);
        remote.peer_map.peer_found(&address(4), None, None);

        let channel = network.channel(&address(1));
        let response = network
            .close_neighbors(&address(2), &SearchValues::for_location(Number160::from(3u32)), RequestKind::Neighbors, &channel)
            .await
            .unwrap();

        assert_eq!(response.responder, address(2));
        assert_eq!(response.neighbors, vec![address(3), address(4)]);
        assert!(response.digest.is_none());
        assert!(remote.peer_map.contains(&Number160::from(1u32)));
        assert_eq!(network.call_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_node_times_out() {
        let network = SimulatedNetwork::new(PeerMapConfig::default());
        let channel = network.channel(&address(1));
        let err = network
            .close_neighbors(&address(2), &SearchValues::random(), RequestKind::Neighbors, &channel)
            .await
            .unwrap_err();
        assert_eq!(PeerException::reason_of(&err), Some(FailReason::Timeout));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let network = SimulatedNetwork::new(PeerMapConfig::default());
        network.add_node(address(2)).unwrap();
        let channel = network.channel(&address(1));
        let search = SearchValues::random();

        network.fail_peer(Number160::from(2u32), FailReason::Shutdown);
        let err = network.close_neighbors(&address(2), &search, RequestKind::Neighbors, &channel).await.unwrap_err();
        assert_eq!(PeerException::reason_of(&err), Some(FailReason::Shutdown));

        network.heal_peer(&Number160::from(2u32));
        assert!(network.close_neighbors(&address(2), &search, RequestKind::Neighbors, &channel).await.is_ok());

        network.set_fail_rate(1.0);
        let err = network.close_neighbors(&address(2), &search, RequestKind::Neighbors, &channel).await.unwrap_err();
        assert_eq!(PeerException::reason_of(&err), Some(FailReason::Timeout));
    }
}
