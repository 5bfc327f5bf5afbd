//! DHT (Distributed Hash Table) module
//!
//! Peer map and iterative routing of a Kademlia-style overlay.

pub mod number;
pub mod address;
pub mod statistic;
pub mod distance;
pub mod filter;
pub mod listener;
pub mod cooldown;
pub mod config;
pub mod peer_map;
pub mod rpc;
pub mod mechanism;
pub mod routing;
pub mod bootstrap;

// Re-exports for convenience
pub use number::{Number160, Number640};
pub use address::{PeerAddress, PeerSocketAddress, MAX_RELAYS};
pub use statistic::PeerStatistic;
pub use distance::{compare_distance, is_closer, DistanceSet};
pub use filter::{reject_by_any, PeerFilter, SharedPeerFilter, SubnetFilter};
pub use listener::{ConnectionHint, FailReason, PeerMapChangeListener, PeerStatusListener};
pub use config::{PeerMapConfig, RoutingParams, NUMBER_OF_BAGS};
pub use peer_map::{class_member, PeerMap};
pub use rpc::{DigestInfo, DigestQuery, DigestSource, NeighborResponse, NeighborRpc, RequestKind, SearchValues, NEIGHBOR_LIMIT};
pub use mechanism::RoutingMechanism;
pub use routing::{DistributedRouting, RoutingRequest, RoutingResult, RoutingStatus};
pub use bootstrap::{bootstrap, bootstrap_and_discover, BootstrapConfig};
