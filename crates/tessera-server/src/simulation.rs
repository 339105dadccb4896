//! A minimal authoritative simulation for the server binary.
//!
//! Movement commands from every lane arrive on one channel and are applied
//! to the [`MemoryWorld`] in order. Each resulting change is broadcast to
//! every open lane as a [`WorldEvent`]; sessions decide for themselves
//! whether the change is in view.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tessera_net::{ConnectionHandler, ConnectionId};
use tessera_sync::{
    Creature, CreatureId, Direction, LaneHandle, MemoryWorld, MovementCommand, SessionTask,
    SyncConfig, SyncSession, Tile, Viewer, WorkerError, WorldEvent, WorldView, lane, run_lane,
};
use tokio::sync::mpsc;

/// Open lanes keyed by the player they sync for.
#[derive(Default)]
pub struct LaneRegistry {
    lanes: RwLock<FxHashMap<CreatureId, LaneHandle>>,
}

impl LaneRegistry {
    pub fn register(&self, player: CreatureId, lane: LaneHandle) {
        self.lanes.write().insert(player, lane);
    }

    pub fn unregister(&self, player: CreatureId) -> Option<LaneHandle> {
        self.lanes.write().remove(&player)
    }

    pub fn len(&self) -> usize {
        self.lanes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.read().is_empty()
    }

    /// Queues `event` on every lane. A lane with no room left has missed
    /// part of the world and is dropped; its connection closes.
    pub fn broadcast(&self, event: WorldEvent) {
        let event = Arc::new(event);
        let mut fallen_behind = Vec::new();
        for (player, lane) in self.lanes.read().iter() {
            if let Err(WorkerError::LaneFull) =
                lane.deliver(SessionTask::World(Arc::clone(&event)))
            {
                fallen_behind.push(*player);
            }
        }
        for player in fallen_behind {
            self.drop_lane(player);
        }
    }

    /// Queues `event` on one player's lane.
    pub fn send_to(&self, player: CreatureId, event: WorldEvent) {
        let delivered = match self.lanes.read().get(&player) {
            Some(lane) => lane.deliver(SessionTask::World(Arc::new(event))),
            None => return,
        };
        if let Err(WorkerError::LaneFull) = delivered {
            self.drop_lane(player);
        }
    }

    fn drop_lane(&self, player: CreatureId) {
        tracing::warn!("Lane of {:?} is full, disconnecting", player);
        self.unregister(player);
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// Applies movement commands to the world.
pub struct Simulation {
    world: Arc<MemoryWorld>,
    lanes: Arc<LaneRegistry>,
}

impl Simulation {
    pub fn new(world: Arc<MemoryWorld>, lanes: Arc<LaneRegistry>) -> Self {
        Self { world, lanes }
    }

    /// Applies commands until every sender is gone.
    pub async fn run(self, mut commands: mpsc::UnboundedReceiver<MovementCommand>) {
        while let Some(command) = commands.recv().await {
            self.apply(command);
        }
        tracing::debug!("Simulation stopped");
    }

    pub fn apply(&self, command: MovementCommand) {
        match command {
            MovementCommand::Walk { player, path, .. } => {
                for direction in path {
                    if !self.step(player, direction) {
                        break;
                    }
                }
            }
            MovementCommand::Step { player, direction } => {
                self.step(player, direction);
            }
            MovementCommand::StopWalk { player } => {
                tracing::trace!("{:?} stopped walking", player);
            }
            MovementCommand::Turn { player, direction } => {
                if self.world.turn_creature(player, direction)
                    && let Some(tile) = self.tile_of(player)
                {
                    self.lanes
                        .broadcast(WorldEvent::CreatureTurned { id: player, tile });
                }
            }
        }
    }

    /// Moves `player` one tile. A refused step cancels the player's walk.
    fn step(&self, player: CreatureId, direction: Direction) -> bool {
        let Some(creature) = self.world.creature(player) else {
            return false;
        };
        let from = creature.position;
        let to = from.step(direction);
        if to == from || !self.world.can_walk_to(player, to) {
            tracing::debug!("{:?} cannot step {:?} from {}", player, direction, from);
            self.lanes
                .send_to(player, WorldEvent::WalkCancelled { player });
            return false;
        }

        let Some(from_tile) = self.world.tile(from) else {
            return false;
        };
        self.world.turn_creature(player, direction);
        self.world.move_creature(player, to);
        let Some(to_tile) = self.world.tile(to) else {
            return false;
        };
        self.lanes.broadcast(WorldEvent::CreatureMoved {
            id: player,
            from,
            to,
            from_tile,
            to_tile,
            teleport: false,
        });
        true
    }

    fn tile_of(&self, id: CreatureId) -> Option<Tile> {
        self.world
            .creature(id)
            .and_then(|creature| self.world.tile(creature.position))
    }
}

// ---------------------------------------------------------------------------
// Session handler
// ---------------------------------------------------------------------------

/// Spawns a player and its session lane for every connection.
pub struct WorldSessions {
    world: Arc<MemoryWorld>,
    lanes: Arc<LaneRegistry>,
    commands: mpsc::UnboundedSender<MovementCommand>,
    sync_config: SyncConfig,
    lane_depth: usize,
}

impl WorldSessions {
    pub fn new(
        world: Arc<MemoryWorld>,
        lanes: Arc<LaneRegistry>,
        commands: mpsc::UnboundedSender<MovementCommand>,
        sync_config: SyncConfig,
        lane_depth: usize,
    ) -> Self {
        Self {
            world,
            lanes,
            commands,
            sync_config,
            lane_depth,
        }
    }

    fn player_id(id: ConnectionId) -> Option<CreatureId> {
        // Ids below 0x1000_0000 are left to fixture creatures.
        u32::try_from(id.0)
            .ok()
            .and_then(|n| n.checked_add(0x1000_0000))
            .map(CreatureId)
    }
}

impl ConnectionHandler for WorldSessions {
    fn open(
        &self,
        id: ConnectionId,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Option<LaneHandle> {
        let player = Self::player_id(id)?;
        let spawn = self.world.spawn();
        self.world
            .place_creature(Creature::new(player.0, format!("Player {}", id.0), spawn));

        let session = SyncSession::new(
            Arc::clone(&self.world),
            Viewer::new(player, spawn),
            self.sync_config.clone(),
        );
        let (handle, tasks) = lane(self.lane_depth);
        tokio::spawn(run_lane(session, tasks, self.commands.clone(), outbound));

        let Some(tile) = self.world.tile(spawn) else {
            self.world.remove_creature(player);
            return None;
        };
        if handle.try_submit(SessionTask::EnterWorld).is_err() {
            self.world.remove_creature(player);
            return None;
        }
        self.lanes
            .broadcast(WorldEvent::CreatureAppeared { id: player, tile });
        self.lanes.register(player, handle.clone());
        tracing::info!("{:?} spawned at {} for {:?}", player, spawn, id);
        Some(handle)
    }

    fn close(&self, id: ConnectionId) {
        let Some(player) = Self::player_id(id) else {
            return;
        };
        self.lanes.unregister(player);
        let Some(tile) = self.world.creature(player).and_then(|c| self.world.tile(c.position))
        else {
            return;
        };
        if let Some(creature) = self.world.remove_creature(player) {
            self.lanes.broadcast(WorldEvent::CreatureDisappeared {
                id: player,
                position: creature.position,
                tile,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_sync::wire::opcode;
    use tessera_sync::{Item, Position};

    const SPAWN: Position = Position {
        x: 100,
        y: 100,
        z: 7,
    };

    fn world() -> Arc<MemoryWorld> {
        let world = Arc::new(MemoryWorld::new(SPAWN));
        for x in 98..=102 {
            for y in 98..=102 {
                world.set_ground(Position::new(x, y, 7), Item::new(102));
            }
        }
        world
    }

    fn sessions(world: &Arc<MemoryWorld>) -> (WorldSessions, Arc<LaneRegistry>) {
        sessions_with_depth(world, 64)
    }

    fn sessions_with_depth(
        world: &Arc<MemoryWorld>,
        lane_depth: usize,
    ) -> (WorldSessions, Arc<LaneRegistry>) {
        let lanes = Arc::new(LaneRegistry::default());
        let (commands, _rx) = mpsc::unbounded_channel();
        let sessions = WorldSessions::new(
            Arc::clone(world),
            Arc::clone(&lanes),
            commands,
            SyncConfig::default(),
            lane_depth,
        );
        (sessions, lanes)
    }

    #[tokio::test]
    async fn test_open_spawns_player_and_enters_world() {
        let world = world();
        let (sessions, lanes) = sessions(&world);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();

        sessions.open(ConnectionId(1), out_tx).unwrap();
        let player = CreatureId(0x1000_0001);
        assert_eq!(world.creature(player).unwrap().position, SPAWN);
        assert_eq!(lanes.len(), 1);

        let entered = out_rx.recv().await.unwrap();
        assert_eq!(entered[0], opcode::AWARE_RANGE);
    }

    #[tokio::test]
    async fn test_close_removes_player() {
        let world = world();
        let (sessions, lanes) = sessions(&world);
        let (out_tx, _out_rx) = mpsc::unbounded_channel();

        sessions.open(ConnectionId(1), out_tx).unwrap();
        sessions.close(ConnectionId(1));
        assert!(world.creature(CreatureId(0x1000_0001)).is_none());
        assert!(lanes.is_empty());
    }

    #[tokio::test]
    async fn test_step_moves_and_broadcasts() {
        let world = world();
        let (sessions, _lanes) = sessions(&world);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        sessions.open(ConnectionId(1), out_tx).unwrap();
        out_rx.recv().await.unwrap();

        let player = CreatureId(0x1000_0001);
        let simulation = Simulation::new(Arc::clone(&world), Arc::clone(&sessions.lanes));
        simulation.apply(MovementCommand::Step {
            player,
            direction: Direction::East,
        });

        assert_eq!(
            world.creature(player).unwrap().position,
            Position::new(101, 100, 7)
        );
        let moved = out_rx.recv().await.unwrap();
        assert_eq!(moved[0], opcode::MOVE_CREATURE);
    }

    #[tokio::test]
    async fn test_blocked_step_cancels_walk() {
        let world = world();
        world.add_top_item(Position::new(101, 100, 7), Item::blocking(1500));
        let (sessions, _lanes) = sessions(&world);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        sessions.open(ConnectionId(1), out_tx).unwrap();
        out_rx.recv().await.unwrap();

        let player = CreatureId(0x1000_0001);
        let simulation = Simulation::new(Arc::clone(&world), Arc::clone(&sessions.lanes));
        simulation.apply(MovementCommand::Walk {
            player,
            origin: SPAWN,
            flags: Default::default(),
            path: vec![Direction::East, Direction::East],
        });

        assert_eq!(world.creature(player).unwrap().position, SPAWN);
        let cancelled = out_rx.recv().await.unwrap();
        assert_eq!(cancelled[0], opcode::CANCEL_WALK);
    }

    #[tokio::test]
    async fn test_full_lane_is_disconnected() {
        let world = world();
        let (sessions, lanes) = sessions_with_depth(&world, 1);
        let (first_tx, mut first_rx) = mpsc::unbounded_channel();
        let first = sessions.open(ConnectionId(1), first_tx).unwrap();

        // The first lane still holds its EnterWorld when the second player
        // appears, so it cannot take the announcement.
        let (second_tx, _second_rx) = mpsc::unbounded_channel();
        sessions.open(ConnectionId(2), second_tx).unwrap();
        assert_eq!(lanes.len(), 1);

        assert!(first_rx.recv().await.is_none());
        assert!(first.is_closed());
    }

    #[tokio::test]
    async fn test_walk_steps_are_sent_one_by_one() {
        let world = world();
        let (sessions, _lanes) = sessions(&world);
        let (watcher_tx, mut watcher_rx) = mpsc::unbounded_channel();
        sessions.open(ConnectionId(1), watcher_tx).unwrap();
        watcher_rx.recv().await.unwrap();

        let (walker_tx, _walker_rx) = mpsc::unbounded_channel();
        sessions.open(ConnectionId(2), walker_tx).unwrap();
        let appeared = watcher_rx.recv().await.unwrap();
        assert_eq!(appeared[0], opcode::ADD_TILE_THING);

        let walker = CreatureId(0x1000_0002);
        let simulation = Simulation::new(Arc::clone(&world), Arc::clone(&sessions.lanes));
        simulation.apply(MovementCommand::Walk {
            player: walker,
            origin: SPAWN,
            flags: Default::default(),
            path: vec![Direction::East, Direction::East],
        });

        let first = watcher_rx.recv().await.unwrap();
        assert_eq!(first[0], opcode::MOVE_CREATURE);
        assert_eq!(&first[7..12], &[101, 0, 100, 0, 7]);
        let second = watcher_rx.recv().await.unwrap();
        assert_eq!(&second[1..6], &[101, 0, 100, 0, 7]);
        assert_eq!(&second[7..12], &[102, 0, 100, 0, 7]);
    }
}
