//! Command-line argument parsing for the Tessera server.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Tessera server command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "tessera-server", about = "Tessera world-sync server")]
pub struct CliArgs {
    /// Listener port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Address to bind to.
    #[arg(long)]
    pub bind: Option<String>,

    /// World fixture to load.
    #[arg(long)]
    pub world: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.network.port = port;
        }
        if let Some(ref addr) = args.bind {
            self.network.bind_address = addr.clone();
        }
        if let Some(ref world) = args.world {
            self.world.fixture_path = Some(world.clone());
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            port: Some(7200),
            bind: Some("127.0.0.1".to_string()),
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.port, 7200);
        assert_eq!(config.network.bind_address, "127.0.0.1");
        // Non-overridden fields retain defaults
        assert_eq!(config.network.max_connections, 256);
        assert_eq!(config.world.fixture_path, None);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::parse_from([
            "tessera-server",
            "--world",
            "start.ron",
            "--log-level",
            "debug",
        ]);
        let mut config = Config::default();
        config.apply_cli_overrides(&args);
        assert_eq!(config.world.fixture_path, Some(PathBuf::from("start.ron")));
        assert_eq!(config.debug.log_level, "debug");
    }
}
