//! Configuration for the Tessera server.
//!
//! Settings persist to disk as RON files and can be overridden from the
//! command line via clap. Unknown fields are ignored and missing sections
//! take their defaults, so config files survive upgrades in both directions.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, NetworkConfig, SyncTuning, ViewportConfig, WorldConfig};
pub use error::ConfigError;
