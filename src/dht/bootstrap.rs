//! DHT bootstrap module
//!
//! Joins the network from a set of seed peers and widens the peer map with
//! random walks afterwards.

use crate::dht::address::PeerAddress;
use crate::dht::config::RoutingParams;
use crate::dht::rpc::NeighborRpc;
use crate::dht::routing::{DistributedRouting, RoutingResult, RoutingStatus};
use crate::error::RoutingError;
use anyhow::Result;
use tracing::{debug, info, warn};

/// Bootstrap configuration
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Known peers to start from
    pub seeds: Vec<PeerAddress>,
    /// Parameters of the bootstrap lookup and the random walks
    pub params: RoutingParams,
    /// Random walks run after the bootstrap lookup
    pub discovery_rounds: usize,
}

impl BootstrapConfig {
    /// Create a new bootstrap config
    pub fn new(seeds: Vec<PeerAddress>) -> Self {
        Self {
            seeds,
            params: RoutingParams::default(),
            discovery_rounds: 0,
        }
    }

    pub fn with_params(mut self, params: RoutingParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_discovery_rounds(mut self, discovery_rounds: usize) -> Self {
        self.discovery_rounds = discovery_rounds;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.seeds.is_empty() {
            return Err(RoutingError::config_error_with_field("at least one seed peer required", "seeds").into());
        }
        self.params.validate()
    }
}

/// Bootstrap a node: one lookup toward our own ID from the seeds
pub async fn bootstrap<R: NeighborRpc>(
    routing: &DistributedRouting<R>,
    config: &BootstrapConfig,
    channel: &R::Channel,
) -> Result<RoutingResult> {
    config.validate()?;
    info!("Bootstrapping {} from {} seeds", routing.self_id().short(), config.seeds.len());

    let result = routing
        .bootstrap(config.seeds.clone(), config.params.clone(), channel)
        .await?;

    match result.status() {
        RoutingStatus::Found => info!(
            "Bootstrap complete, {} peers known",
            routing.peer_map().size()
        ),
        status => warn!("Bootstrap ended with {}", status),
    }
    Ok(result)
}

/// Bootstrap, then run `discovery_rounds` random walks.
///
/// Returns the number of verified peers afterwards.
pub async fn bootstrap_and_discover<R: NeighborRpc>(
    routing: &DistributedRouting<R>,
    config: &BootstrapConfig,
    channel: &R::Channel,
) -> Result<usize> {
    bootstrap(routing, config, channel).await?;

    for round in 0..config.discovery_rounds {
        let result = routing.discover_random(config.params.clone(), channel).await?;
        debug!(
            "Discovery round {}: {} peers answered",
            round + 1,
            result.found_peers().len()
        );
    }

    Ok(routing.peer_map().size())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::config::PeerMapConfig;
    use crate::dht::number::Number160;
    use crate::simulation::SimulatedNetwork;
    use std::sync::Arc;

    fn address(id: u32) -> PeerAddress {
        PeerAddress::from_id(Number160::from(id))
    }

    #[test]
    fn test_config_requires_seeds() {
        assert!(BootstrapConfig::new(vec![]).validate().is_err());
        assert!(BootstrapConfig::new(vec![address(1)]).validate().is_ok());
        let invalid = BootstrapConfig::new(vec![address(1)]).with_params(RoutingParams::default().with_parallel(0, 0));
        assert!(invalid.validate().is_err());
    }

    #[tokio::test]
    async fn test_bootstrap_joins_both_sides() {
        let network = Arc::new(SimulatedNetwork::new(PeerMapConfig::default()));
        let seed = network.add_node(address(1)).unwrap();
        let joining = network.add_node(address(2)).unwrap();
        let routing = DistributedRouting::new(address(2), joining.peer_map.clone(), network.clone()).unwrap();
        let channel = network.channel(&address(2));

        let config = BootstrapConfig::new(vec![address(1)]);
        let result = bootstrap(&routing, &config, &channel).await.unwrap();

        assert_eq!(result.status(), RoutingStatus::Found);
        assert!(result.is_bootstrap);
        assert!(joining.peer_map.contains(&Number160::from(1u32)));
        assert!(seed.peer_map.contains(&Number160::from(2u32)));
    }

    #[tokio::test]
    async fn test_bootstrap_and_discover() {
        let network = Arc::new(SimulatedNetwork::new(PeerMapConfig::default()));
        let seed = network.add_node(address(1)).unwrap();
        for id in 3..8u32 {
            network.add_node(address(id)).unwrap();
            seed.peer_map.peer_found(&address(id), None, None);
        }
        let joining = network.add_node(address(2)).unwrap();
        let routing = DistributedRouting::new(address(2), joining.peer_map.clone(), network.clone()).unwrap();
        let channel = network.channel(&address(2));

        let config = BootstrapConfig::new(vec![address(1)]).with_discovery_rounds(2);
        let known = bootstrap_and_discover(&routing, &config, &channel).await.unwrap();
        assert_eq!(known, 6);
    }
}
