//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::Parser;
use std::path::PathBuf;

/// CLI arguments of the routing demo
#[derive(Debug, Parser)]
#[command(name = "peer-routing")]
#[command(about = "Runs iterative DHT lookups over an in-memory network of peers", long_about = None)]
pub struct CliArgs {
    /// Number of peers in the network
    #[arg(short, long, default_value_t = 100)]
    pub peers: usize,

    /// Key to look up, as hex (random if omitted)
    #[arg(short, long, value_name = "HEX")]
    pub key: Option<String>,

    /// JSON file with peer map and routing settings
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Derive peer IDs from this seed instead of generating random ones
    #[arg(short, long)]
    pub seed: Option<String>,

    /// Probability that a request fails (0.0 to 1.0)
    #[arg(long, default_value_t = 0.0)]
    pub fail_rate: f64,

    /// Random walks each peer runs after bootstrapping
    #[arg(long, default_value_t = 1)]
    pub discovery_rounds: usize,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long)]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}
