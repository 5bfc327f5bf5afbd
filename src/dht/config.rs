//! DHT configuration module
//!
//! Settings of the peer map and per-operation routing parameters.

use crate::error::RoutingError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Number of distance classes for 160-bit identifiers
pub const NUMBER_OF_BAGS: usize = 160;

/// Configuration of a peer map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerMapConfig {
    /// Capacity of each verified bag
    pub bag_size_verified: usize,
    /// Capacity of each overflow bag
    pub bag_size_overflow: usize,
    /// How long a probably-offline peer is kept out
    #[serde(with = "duration_secs")]
    pub offline_timeout: Duration,
    /// How long a peer that announced shutdown is kept out
    #[serde(with = "duration_secs")]
    pub shutdown_timeout: Duration,
    /// How long a peer that failed with an error is kept out
    #[serde(with = "duration_secs")]
    pub exception_timeout: Duration,
    /// Consecutive timeouts after which a peer is considered offline
    pub offline_count: u32,
    /// Require first-hand contact before a self-reported peer is verified
    pub peer_verification: bool,
    /// Re-check intervals, indexed by how often a peer was confirmed
    #[serde(with = "duration_secs_vec")]
    pub maintenance_intervals: Vec<Duration>,
}

impl Default for PeerMapConfig {
    fn default() -> Self {
        Self {
            bag_size_verified: 10,
            bag_size_overflow: 10,
            offline_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(20),
            exception_timeout: Duration::from_secs(120),
            offline_count: 3,
            peer_verification: true,
            maintenance_intervals: [5, 10, 20, 40, 80, 160].iter().map(|s| Duration::from_secs(*s)).collect(),
        }
    }
}

impl PeerMapConfig {
    pub fn with_bag_sizes(mut self, verified: usize, overflow: usize) -> Self {
        self.bag_size_verified = verified;
        self.bag_size_overflow = overflow;
        self
    }

    pub fn with_timeouts(mut self, offline: Duration, shutdown: Duration, exception: Duration) -> Self {
        self.offline_timeout = offline;
        self.shutdown_timeout = shutdown;
        self.exception_timeout = exception;
        self
    }

    pub fn with_offline_count(mut self, offline_count: u32) -> Self {
        self.offline_count = offline_count;
        self
    }

    pub fn with_peer_verification(mut self, peer_verification: bool) -> Self {
        self.peer_verification = peer_verification;
        self
    }

    pub fn with_maintenance_intervals(mut self, intervals: Vec<Duration>) -> Self {
        self.maintenance_intervals = intervals;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.bag_size_verified == 0 {
            return Err(RoutingError::config_error_with_field("must be at least 1", "bag_size_verified").into());
        }

        // the overflow bags are LRU caches and need a non-zero capacity
        if self.bag_size_overflow == 0 {
            return Err(RoutingError::config_error_with_field("must be at least 1", "bag_size_overflow").into());
        }

        if self.maintenance_intervals.is_empty() {
            return Err(RoutingError::config_error_with_field("at least one interval required", "maintenance_intervals").into());
        }

        if self.maintenance_intervals.windows(2).any(|w| w[0] > w[1]) {
            return Err(RoutingError::config_error_with_field("intervals must not decrease", "maintenance_intervals").into());
        }

        Ok(())
    }
}

/// Per-operation routing parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingParams {
    /// Results the calling operation wants
    pub minimum_results: usize,
    /// Extra RPCs kept in flight beyond `minimum_results`
    pub parallel_diff: usize,
    /// Failed RPCs tolerated before the lookup gives up
    pub max_failures: usize,
    /// Direct hits after which the lookup stops immediately
    pub max_direct_hits: usize,
    /// Consecutive answers without a closer peer before the lookup stops
    pub max_no_new_info: usize,
    /// Successful RPCs after which the lookup stops
    pub max_success: usize,
    /// Ask the transport to use TCP
    pub force_tcp: bool,
    /// Ask the transport to use UDP
    pub force_udp: bool,
}

impl Default for RoutingParams {
    fn default() -> Self {
        Self {
            minimum_results: 3,
            parallel_diff: 0,
            max_failures: 5,
            max_direct_hits: usize::MAX,
            max_no_new_info: 5,
            max_success: 20,
            force_tcp: false,
            force_udp: false,
        }
    }
}

impl RoutingParams {
    /// Number of RPC slots a lookup keeps in flight
    pub fn parallel(&self) -> usize {
        self.minimum_results + self.parallel_diff
    }

    pub fn with_parallel(mut self, minimum_results: usize, parallel_diff: usize) -> Self {
        self.minimum_results = minimum_results;
        self.parallel_diff = parallel_diff;
        self
    }

    pub fn with_max_failures(mut self, max_failures: usize) -> Self {
        self.max_failures = max_failures;
        self
    }

    pub fn with_max_direct_hits(mut self, max_direct_hits: usize) -> Self {
        self.max_direct_hits = max_direct_hits;
        self
    }

    pub fn with_max_no_new_info(mut self, max_no_new_info: usize) -> Self {
        self.max_no_new_info = max_no_new_info;
        self
    }

    pub fn with_max_success(mut self, max_success: usize) -> Self {
        self.max_success = max_success;
        self
    }

    pub fn with_force_tcp(mut self, force_tcp: bool) -> Self {
        self.force_tcp = force_tcp;
        self
    }

    pub fn with_force_udp(mut self, force_udp: bool) -> Self {
        self.force_udp = force_udp;
        self
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        if self.parallel() == 0 {
            return Err(RoutingError::validation_error_with_field(
                "minimum_results + parallel_diff must be at least 1",
                "parallel",
            )
            .into());
        }

        if self.max_direct_hits == 0 {
            return Err(RoutingError::validation_error_with_field("must be at least 1", "max_direct_hits").into());
        }

        if self.max_no_new_info == 0 {
            return Err(RoutingError::validation_error_with_field("must be at least 1", "max_no_new_info").into());
        }

        if self.force_tcp && self.force_udp {
            return Err(RoutingError::validation_error("force_tcp and force_udp are mutually exclusive").into());
        }

        Ok(())
    }
}

/// Durations as fractional seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Lists of durations as fractional seconds
mod duration_secs_vec {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &[Duration], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(value.iter().map(|d| d.as_secs_f64()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Duration>, D::Error> {
        let secs = Vec::<f64>::deserialize(deserializer)?;
        secs.into_iter()
            .map(|s| Duration::try_from_secs_f64(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_map_config_default_is_valid() {
        let config = PeerMapConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.offline_count, 3);
        assert!(config.peer_verification);
    }

    #[test]
    fn test_peer_map_config_invalid_bag_size() {
        assert!(PeerMapConfig::default().with_bag_sizes(0, 10).validate().is_err());
        assert!(PeerMapConfig::default().with_bag_sizes(10, 0).validate().is_err());
    }

    #[test]
    fn test_peer_map_config_invalid_intervals() {
        let config = PeerMapConfig::default().with_maintenance_intervals(vec![]);
        assert!(config.validate().is_err());
        let config = PeerMapConfig::default()
            .with_maintenance_intervals(vec![Duration::from_secs(10), Duration::from_secs(5)]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_peer_map_config_json() {
        let json = r#"{ "bag_size_verified": 4, "offline_timeout": 0.5, "maintenance_intervals": [1, 2.5] }"#;
        let config: PeerMapConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.bag_size_verified, 4);
        assert_eq!(config.bag_size_overflow, 10);
        assert_eq!(config.offline_timeout, Duration::from_millis(500));
        assert_eq!(config.maintenance_intervals, vec![Duration::from_secs(1), Duration::from_millis(2500)]);

        let back: PeerMapConfig = serde_json::from_str(&serde_json::to_string(&config).unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_routing_params_parallel() {
        let params = RoutingParams::default().with_parallel(3, 2);
        assert_eq!(params.parallel(), 5);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_routing_params_invalid() {
        assert!(RoutingParams::default().with_parallel(0, 0).validate().is_err());
        assert!(RoutingParams::default().with_max_direct_hits(0).validate().is_err());
        assert!(RoutingParams::default().with_max_no_new_info(0).validate().is_err());
        assert!(RoutingParams::default().with_force_tcp(true).with_force_udp(true).validate().is_err());
    }

    #[test]
    fn test_routing_params_json_defaults() {
        let params: RoutingParams = serde_json::from_str(r#"{ "max_failures": 1 }"#).unwrap();
        assert_eq!(params.max_failures, 1);
        assert_eq!(params.minimum_results, 3);
    }
}
