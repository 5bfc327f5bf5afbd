//! CLI configuration module
//!
//! Merges the optional JSON settings file with command-line flags.

use crate::cli::args::CliArgs;
use crate::dht::config::{PeerMapConfig, RoutingParams};
use crate::dht::number::Number160;
use crate::error::RoutingError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings that can be loaded from a file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub peer_map: PeerMapConfig,
    pub routing: RoutingParams,
}

impl FileConfig {
    /// Load settings from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(RoutingError::from)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: FileConfig = serde_json::from_str(&data)
            .map_err(RoutingError::from)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

/// Configuration of the routing demo
#[derive(Debug, Clone)]
pub struct Config {
    /// Peer map settings of every simulated peer
    pub peer_map: PeerMapConfig,
    /// Parameters of every lookup
    pub routing: RoutingParams,
    /// Number of peers
    pub peers: usize,
    /// Key to look up; random if not given
    pub key: Option<Number160>,
    /// Seed for deterministic peer IDs
    pub seed: Option<String>,
    /// Probability of a request failing
    pub fail_rate: f64,
    /// Random walks after bootstrap
    pub discovery_rounds: usize,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Config {
    /// Create configuration from CLI arguments and optional file settings
    pub fn from_args(args: &CliArgs, file: FileConfig) -> Result<Self> {
        let key = match &args.key {
            Some(hex) => Some(
                Number160::from_hex(hex)
                    .ok_or_else(|| RoutingError::config_error_with_field(format!("invalid key '{}'", hex), "key"))?,
            ),
            None => None,
        };

        Ok(Self {
            peer_map: file.peer_map,
            routing: file.routing,
            peers: args.peers,
            key,
            seed: args.seed.clone(),
            fail_rate: args.fail_rate,
            discovery_rounds: args.discovery_rounds,
            verbose: args.verbose,
            quiet: args.quiet,
        })
    }

    /// Load the file named by `--config`, if any, and merge the flags
    pub fn load(args: &CliArgs) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::from_args(args, file)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.peers < 2 {
            return Err(anyhow::anyhow!("peers must be at least 2"));
        }

        if !(0.0..=1.0).contains(&self.fail_rate) {
            return Err(anyhow::anyhow!("fail_rate must be between 0.0 and 1.0"));
        }

        self.peer_map.validate().context("Invalid peer map settings")?;
        self.routing.validate().context("Invalid routing settings")?;

        Ok(())
    }

    /// Identifier of the peer with the given index
    pub fn peer_id(&self, index: usize) -> Number160 {
        match &self.seed {
            Some(seed) => Number160::from_seed(&format!("{}-{}", seed, index)),
            None => Number160::random(),
        }
    }

    /// The key to look up
    pub fn lookup_key(&self) -> Number160 {
        match (&self.key, &self.seed) {
            (Some(key), _) => *key,
            (None, Some(seed)) => Number160::from_seed(&format!("{}-key", seed)),
            (None, None) => Number160::random(),
        }
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}
