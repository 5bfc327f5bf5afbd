//! peer-routing
//!
//! Kademlia-style peer map and iterative routing core of a peer-to-peer DHT.

pub mod dht;
pub mod simulation;
pub mod cli;
pub mod error;

pub use error::{PeerException, RoutingError};

pub use dht::{
    Number160, Number640, PeerAddress, PeerSocketAddress, PeerStatistic, DistanceSet,
    PeerFilter, SharedPeerFilter, SubnetFilter,
    ConnectionHint, FailReason, PeerMapChangeListener, PeerStatusListener,
    PeerMapConfig, RoutingParams, PeerMap,
    DigestInfo, DigestQuery, DigestSource, NeighborResponse, NeighborRpc, RequestKind, SearchValues,
    RoutingMechanism, DistributedRouting, RoutingRequest, RoutingResult, RoutingStatus,
    BootstrapConfig, bootstrap, bootstrap_and_discover,
};
pub use simulation::{MemoryStorage, SimulatedChannel, SimulatedNetwork, SimulatedNode};
pub use cli::{CliArgs, Config};
