//! Collaborator interfaces of the routing core
//!
//! The routing driver never touches the wire. It asks a [`NeighborRpc`] for
//! the neighbors of a remote peer and a [`DigestSource`] for what is stored
//! locally; both are implemented by the transport and storage layers.

use crate::dht::address::PeerAddress;
use crate::dht::number::{Number160, Number640};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of neighbors taken from one response
pub const NEIGHBOR_LIMIT: usize = 30;

/// What a routing request asks the remote peers for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    /// Close neighbors only
    Neighbors,
    /// Close neighbors plus a digest of matching stored content
    StorageDigest,
    /// Close neighbors plus a digest of matching tracker entries
    TrackerDigest,
}

impl RequestKind {
    /// Check if responses carry a digest
    pub fn is_digest(&self) -> bool {
        !matches!(self, RequestKind::Neighbors)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Neighbors => write!(f, "neighbors"),
            RequestKind::StorageDigest => write!(f, "storage_digest"),
            RequestKind::TrackerDigest => write!(f, "tracker_digest"),
        }
    }
}

/// Keys a lookup searches for.
///
/// Without a location key the lookup is a random walk used for discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchValues {
    pub location_key: Option<Number160>,
    pub domain_key: Option<Number160>,
    pub content_key: Option<Number160>,
    pub from: Option<Number640>,
    pub to: Option<Number640>,
}

impl SearchValues {
    /// Random walk without a target
    pub fn random() -> Self {
        Self::default()
    }

    /// Search for the peers closest to `location`
    pub fn for_location(location: Number160) -> Self {
        Self {
            location_key: Some(location),
            ..Self::default()
        }
    }

    pub fn with_domain(mut self, domain: Number160) -> Self {
        self.domain_key = Some(domain);
        self
    }

    pub fn with_content(mut self, content: Number160) -> Self {
        self.content_key = Some(content);
        self
    }

    /// Restrict digests to keys in `from..=to`
    pub fn with_range(mut self, from: Number640, to: Number640) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn is_random_search(&self) -> bool {
        self.location_key.is_none()
    }

    /// Same values with the location key replaced
    pub fn redirected(&self, location: Number160) -> Self {
        Self {
            location_key: Some(location),
            ..self.clone()
        }
    }

    /// Digest query matching these values; `None` without a location key
    pub fn digest_query(&self) -> Option<DigestQuery> {
        Some(DigestQuery {
            location: self.location_key?,
            domain: self.domain_key,
            content: self.content_key,
            from: self.from,
            to: self.to,
        })
    }
}

/// Summary of stored content matching a query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DigestInfo {
    /// Number of matching entries
    pub size: usize,
    /// Combined hash of the matching keys
    pub key_digest: Number160,
    /// Combined hash of the matching contents
    pub content_digest: Number160,
}

impl DigestInfo {
    pub const EMPTY: DigestInfo = DigestInfo {
        size: 0,
        key_digest: Number160::ZERO,
        content_digest: Number160::ZERO,
    };

    pub fn new(size: usize, key_digest: Number160, content_digest: Number160) -> Self {
        Self {
            size,
            key_digest,
            content_digest,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Parameters of a local digest lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestQuery {
    pub location: Number160,
    pub domain: Option<Number160>,
    pub content: Option<Number160>,
    pub from: Option<Number640>,
    pub to: Option<Number640>,
}

impl DigestQuery {
    /// Key range covered by the query.
    ///
    /// An explicit range wins; otherwise the range spans the location, the
    /// domain if given, and the single content key if given.
    pub fn range(&self) -> (Number640, Number640) {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            return (from, to);
        }
        match (self.domain, self.content) {
            (Some(domain), Some(content)) => (
                Number640::new(self.location, domain, content, Number160::ZERO),
                Number640::new(self.location, domain, content, Number160::MAX),
            ),
            (Some(domain), None) => (Number640::min_of(self.location, domain), Number640::max_of(self.location, domain)),
            _ => (
                Number640::min_of(self.location, Number160::ZERO),
                Number640::max_of(self.location, Number160::MAX),
            ),
        }
    }
}

/// Local store that can summarize what it holds
pub trait DigestSource: Send + Sync {
    fn digest(&self, query: &DigestQuery) -> DigestInfo;
}

/// Answer of a remote peer to a neighbor request
#[derive(Debug, Clone)]
pub struct NeighborResponse {
    /// The peer that answered
    pub responder: PeerAddress,
    /// Peers the responder knows close to the requested key
    pub neighbors: Vec<PeerAddress>,
    /// Digest of matching content held by the responder
    pub digest: Option<DigestInfo>,
}

impl NeighborResponse {
    pub fn new(responder: PeerAddress, neighbors: Vec<PeerAddress>) -> Self {
        Self {
            responder,
            neighbors,
            digest: None,
        }
    }

    pub fn with_digest(mut self, digest: DigestInfo) -> Self {
        self.digest = Some(digest);
        self
    }

    pub fn digest_or_empty(&self) -> DigestInfo {
        self.digest.unwrap_or(DigestInfo::EMPTY)
    }
}

/// Neighbor request sent to a remote peer.
///
/// `Channel` is the transport's reservation handle; the routing core only
/// passes it through. Failures should carry a
/// [`PeerException`](crate::error::PeerException) when the reason is known.
#[async_trait]
pub trait NeighborRpc: Send + Sync + 'static {
    type Channel: Clone + Send + Sync + 'static;

    async fn close_neighbors(
        &self,
        remote: &PeerAddress,
        search: &SearchValues,
        kind: RequestKind,
        channel: &Self::Channel,
    ) -> Result<NeighborResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_kind_is_digest() {
        assert!(!RequestKind::Neighbors.is_digest());
        assert!(RequestKind::StorageDigest.is_digest());
        assert!(RequestKind::TrackerDigest.is_digest());
        assert_eq!(RequestKind::StorageDigest.to_string(), "storage_digest");
    }

    #[test]
    fn test_search_values() {
        let location = Number160::from(1u32);
        let search = SearchValues::for_location(location).with_domain(Number160::from(2u32));
        assert!(!search.is_random_search());
        assert!(SearchValues::random().is_random_search());
        assert!(SearchValues::random().digest_query().is_none());

        let redirected = search.redirected(Number160::MAX);
        assert_eq!(redirected.location_key, Some(Number160::MAX));
        assert_eq!(redirected.domain_key, search.domain_key);
    }

    #[test]
    fn test_digest_query_range() {
        let location = Number160::from(1u32);
        let domain = Number160::from(2u32);
        let query = SearchValues::for_location(location).with_domain(domain).digest_query().unwrap();
        let (from, to) = query.range();
        assert_eq!(from, Number640::min_of(location, domain));
        assert_eq!(to, Number640::max_of(location, domain));

        let explicit = SearchValues::for_location(location)
            .with_range(Number640::ZERO, Number640::MAX)
            .digest_query()
            .unwrap();
        assert_eq!(explicit.range(), (Number640::ZERO, Number640::MAX));
    }

    #[test]
    fn test_digest_info() {
        assert!(DigestInfo::EMPTY.is_empty());
        assert!(!DigestInfo::new(2, Number160::ZERO, Number160::ZERO).is_empty());
        let response = NeighborResponse::new(PeerAddress::from_id(Number160::from(1u32)), vec![]);
        assert!(response.digest_or_empty().is_empty());
    }
}
