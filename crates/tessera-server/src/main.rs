//! Tessera world-sync server.
//!
//! Loads `config.ron` (creating it on first run), applies CLI overrides,
//! loads the world fixture and serves clients until interrupted.
//!
//! Run with: `cargo run -p tessera-server -- --port 7172`

mod simulation;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tessera_config::{CliArgs, Config};
use tessera_net::{FrameConfig, GameServer, ServerConfig, SocketConfig, bind_address};
use tessera_sync::{MemoryWorld, Position};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::simulation::{LaneRegistry, Simulation, WorldSessions};

/// Spawn used when no fixture is configured.
const DEFAULT_SPAWN: Position = Position {
    x: 100,
    y: 100,
    z: 7,
};

fn main() {
    let args = CliArgs::parse();

    let config_dir = args
        .config
        .clone()
        .or_else(Config::default_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = match Config::load_or_create(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            tessera_log::init_logging(None, cfg!(debug_assertions), None);
            error!("Failed to load config from {}: {e}", config_dir.display());
            std::process::exit(1);
        }
    };
    config.apply_cli_overrides(&args);

    tessera_log::init_logging(
        Some(&config_dir.join("logs")),
        cfg!(debug_assertions),
        Some(&config),
    );

    info!("Tessera server");
    info!("Config directory: {}", config_dir.display());

    let world = match &config.world.fixture_path {
        Some(path) => match MemoryWorld::load(path) {
            Ok(world) => {
                info!("Loaded world fixture {}", path.display());
                world
            }
            Err(e) => {
                error!("Failed to load world fixture {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => {
            info!("No world fixture configured, starting with an empty world");
            MemoryWorld::new(DEFAULT_SPAWN)
        }
    };

    let bind_addr = match bind_address(&config.network.bind_address, config.network.port) {
        Ok(addr) => addr,
        Err(e) => {
            error!(
                "Invalid bind address {}:{}: {e}",
                config.network.bind_address, config.network.port
            );
            std::process::exit(1);
        }
    };

    let server_config = ServerConfig {
        bind_addr,
        max_connections: config.network.max_connections,
        frame: FrameConfig {
            max_payload_size: u32::try_from(config.network.max_frame_size).unwrap_or(u32::MAX),
        },
        socket: SocketConfig::with_nodelay(config.network.tcp_nodelay),
        task_expiration: config.sync.task_expiration(),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(serve(config, server_config, world)) {
        error!("Server stopped: {e}");
        std::process::exit(1);
    }
}

async fn serve(
    config: Config,
    server_config: ServerConfig,
    world: MemoryWorld,
) -> std::io::Result<()> {
    let world = Arc::new(world);
    let lanes = Arc::new(LaneRegistry::default());
    let (commands, command_rx) = mpsc::unbounded_channel();

    let simulation = Simulation::new(Arc::clone(&world), Arc::clone(&lanes));
    let simulation_task = tokio::spawn(simulation.run(command_rx));

    let sessions = WorldSessions::new(
        world,
        lanes,
        commands,
        config.sync_config(),
        config.sync.worker_queue_depth,
    );
    let server = Arc::new(GameServer::new(server_config, Arc::new(sessions)));

    let shutdown = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            shutdown.shutdown();
        }
    });

    let result = server.run().await;
    simulation_task.abort();
    result
}
