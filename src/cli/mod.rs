//! CLI module
//!
//! Command-line interface of the routing demo.

pub mod args;
pub mod config;

pub use args::CliArgs;
pub use config::{Config, FileConfig};
