//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_sync::{SyncConfig, ViewportBounds};

use crate::error::ConfigError;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listener and transport settings.
    pub network: NetworkConfig,
    /// Client viewport limits.
    pub viewport: ViewportConfig,
    /// Per-connection sync tunables.
    pub sync: SyncTuning,
    /// World source.
    pub world: WorldConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Listener and transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind the listener to.
    pub bind_address: String,
    /// Listener port.
    pub port: u16,
    /// Connections accepted at once before new ones are refused.
    pub max_connections: usize,
    /// Largest frame payload accepted, in bytes.
    pub max_frame_size: usize,
    /// Disable Nagle's algorithm on accepted sockets.
    pub tcp_nodelay: bool,
}

/// Viewport configuration. Sizes are in tiles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViewportConfig {
    pub default_width: u8,
    pub default_height: u8,
    pub min_width: u8,
    pub min_height: u8,
    pub max_width: u8,
    pub max_height: u8,
    /// Send full descriptions as one record per floor.
    pub split_floor_descriptions: bool,
}

/// Sync tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncTuning {
    /// Creatures a client can hold full descriptors for.
    pub known_entity_capacity: usize,
    /// Entities written per tile.
    pub tile_entity_cap: usize,
    pub walk_matrix_radius_x: u16,
    pub walk_matrix_radius_y: u16,
    /// Lifetime of time-sensitive tasks such as turns.
    pub task_expiration_ms: u64,
    /// Tasks a connection lane buffers.
    pub worker_queue_depth: usize,
}

/// World source configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldConfig {
    /// RON world fixture to load at startup. An empty world is used if unset.
    pub fixture_path: Option<PathBuf>,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 7172,
            max_connections: 256,
            max_frame_size: 65_535,
            tcp_nodelay: true,
        }
    }
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            default_width: 17,
            default_height: 13,
            min_width: 15,
            min_height: 11,
            max_width: 31,
            max_height: 23,
            split_floor_descriptions: false,
        }
    }
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            known_entity_capacity: 1300,
            tile_entity_cap: 10,
            walk_matrix_radius_x: 8,
            walk_matrix_radius_y: 6,
            task_expiration_ms: 2000,
            worker_queue_depth: 1024,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// --- Derived settings ---

impl ViewportConfig {
    /// Validated bounds: odd, and `min <= max` on each axis.
    pub fn bounds(&self) -> ViewportBounds {
        ViewportBounds::new(
            self.min_width,
            self.max_width,
            self.min_height,
            self.max_height,
        )
    }
}

impl SyncTuning {
    pub fn task_expiration(&self) -> Duration {
        Duration::from_millis(self.task_expiration_ms)
    }
}

impl Config {
    /// Session settings assembled from the viewport and sync sections.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            viewport_bounds: self.viewport.bounds(),
            default_width: self.viewport.default_width,
            default_height: self.viewport.default_height,
            split_floor_descriptions: self.viewport.split_floor_descriptions,
            known_entity_capacity: self.sync.known_entity_capacity,
            tile_entity_cap: self.sync.tile_entity_cap,
            walk_radius_x: self.sync.walk_matrix_radius_x,
            walk_radius_y: self.sync.walk_matrix_radius_y,
        }
    }

    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("network.max_connections", self.network.max_connections == 0),
            ("network.max_frame_size", self.network.max_frame_size == 0),
            ("sync.known_entity_capacity", self.sync.known_entity_capacity == 0),
            ("sync.tile_entity_cap", self.sync.tile_entity_cap == 0),
            ("sync.worker_queue_depth", self.sync.worker_queue_depth == 0),
        ];
        match checks.into_iter().find(|(_, zero)| *zero) {
            Some((field, _)) => Err(ConfigError::Invalid {
                field,
                reason: "must be greater than zero",
            }),
            None => Ok(()),
        }
    }

    /// Platform config directory for the server, if the platform has one.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("tessera"))
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}
