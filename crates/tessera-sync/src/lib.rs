//! Per-connection world-state sync: viewport sampling, incremental tile
//! encoding, known-creature tracking, floor-band assembly for movement, and
//! predictive walk validation, driven by one worker lane per connection.

pub mod assembler;
pub mod decode;
pub mod encoder;
pub mod inbound;
pub mod intent;
pub mod known;
pub mod position;
pub mod processor;
pub mod records;
pub mod sampler;
pub mod sequence;
pub mod session;
pub mod viewport;
pub mod walk;
pub mod wire;
pub mod worker;
pub mod world;

pub use assembler::{CreatureStep, FloorBandAssembler, MoveKind};
pub use decode::{DecodedEntity, DecodedTile, MapStreamDecoder};
pub use encoder::{
    CreatureDescriptor, CreatureEntry, DEFAULT_TILE_ENTITY_CAP, SkipRun, TileEncoder,
};
pub use inbound::{DEFAULT_TASK_EXPIRATION, decode_packet};
pub use intent::{MAX_PATH_STEPS, MovementIntention, WalkFlags};
pub use known::{DEFAULT_KNOWN_CAPACITY, Insertion, KnownEntityCache};
pub use position::{Direction, PathStep, Position};
pub use processor::{MovementCommand, MovementProcessor};
pub use sampler::{Region, WorldSampler};
pub use sequence::{Challenge, FixedNonce, NonceSource, RandomNonce, WalkSequence};
pub use session::{SyncConfig, SyncSession, WorldEvent};
pub use viewport::{Viewport, ViewportBounds};
pub use walk::{IntentOutcome, PredictiveMovementValidator, WalkMatrix};
pub use wire::{OutputMessage, PacketError, PacketReader};
pub use worker::{
    DEFAULT_LANE_DEPTH, LaneHandle, LaneTasks, SessionTask, Task, WorkerError, lane, run_lane,
};
pub use world::{
    Creature, CreatureId, Item, Light, MemoryWorld, Outfit, Tile, Viewer, WorldFixture,
    WorldLoadError, WorldView,
};
