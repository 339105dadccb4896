//! Per-connection synchronization state and the operations that mutate it.
//!
//! A [`SyncSession`] owns the viewport, the known-creature cache and the
//! predictive movement validator for one client. It is driven by exactly one
//! worker lane, so none of its state needs locking. Every operation returns
//! the bytes to send, which may be empty.

use std::sync::Arc;

use crate::assembler::{CreatureStep, FloorBandAssembler, MoveKind};
use crate::encoder::{DEFAULT_TILE_ENTITY_CAP, TileEncoder};
use crate::intent::MovementIntention;
use crate::known::{DEFAULT_KNOWN_CAPACITY, KnownEntityCache};
use crate::position::{Direction, Position};
use crate::processor::{MovementCommand, MovementProcessor};
use crate::records;
use crate::viewport::{
    DEFAULT_VIEWPORT_HEIGHT, DEFAULT_VIEWPORT_WIDTH, Viewport, ViewportBounds,
};
use crate::walk::{
    DEFAULT_WALK_RADIUS_X, DEFAULT_WALK_RADIUS_Y, IntentOutcome, PredictiveMovementValidator,
};
use crate::wire::OutputMessage;
use crate::world::{Creature, CreatureId, Item, Tile, Viewer, WorldView};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub viewport_bounds: ViewportBounds,
    pub default_width: u8,
    pub default_height: u8,
    /// Send full descriptions as one record per floor.
    pub split_floor_descriptions: bool,
    pub known_entity_capacity: usize,
    pub tile_entity_cap: usize,
    pub walk_radius_x: u16,
    pub walk_radius_y: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            viewport_bounds: ViewportBounds::default(),
            default_width: DEFAULT_VIEWPORT_WIDTH,
            default_height: DEFAULT_VIEWPORT_HEIGHT,
            split_floor_descriptions: false,
            known_entity_capacity: DEFAULT_KNOWN_CAPACITY,
            tile_entity_cap: DEFAULT_TILE_ENTITY_CAP,
            walk_radius_x: DEFAULT_WALK_RADIUS_X,
            walk_radius_y: DEFAULT_WALK_RADIUS_Y,
        }
    }
}

// ---------------------------------------------------------------------------
// World events
// ---------------------------------------------------------------------------

/// A change in the authoritative world that every nearby session must
/// reflect. Lanes run behind the simulation, so each event carries tile
/// snapshots from the moment it happened; sessions work out stack positions
/// from those as their own viewer perceives them.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    CreatureMoved {
        id: CreatureId,
        from: Position,
        to: Position,
        /// The old tile before the creature left it.
        from_tile: Tile,
        /// The new tile right after the creature arrived.
        to_tile: Tile,
        teleport: bool,
    },
    CreatureAppeared {
        id: CreatureId,
        /// The tile the creature appeared on, right after it was placed.
        tile: Tile,
    },
    CreatureDisappeared {
        id: CreatureId,
        position: Position,
        /// The tile before the creature was removed.
        tile: Tile,
    },
    CreatureTurned {
        id: CreatureId,
        /// The creature's tile right after the turn.
        tile: Tile,
    },
    /// Resend the whole tile.
    TileChanged {
        position: Position,
    },
    ItemAdded {
        position: Position,
        stack: u8,
        item: Item,
    },
    /// The simulation refused a step of this player.
    WalkCancelled {
        player: CreatureId,
    },
    /// A tile the player may predict onto turned out to be blocked.
    Unwalkable {
        player: CreatureId,
        position: Position,
    },
}

/// The record of `id` inside a tile snapshot.
fn snapshot_of(tile: &Tile, id: CreatureId) -> Option<&Creature> {
    tile.creatures.iter().find(|c| c.id == id)
}

// ---------------------------------------------------------------------------
// SyncSession
// ---------------------------------------------------------------------------

pub struct SyncSession<W: WorldView + ?Sized> {
    world: Arc<W>,
    config: SyncConfig,
    viewer: Viewer,
    viewport: Viewport,
    known: KnownEntityCache,
    validator: PredictiveMovementValidator,
}

impl<W: WorldView + ?Sized> SyncSession<W> {
    pub fn new(world: Arc<W>, viewer: Viewer, config: SyncConfig) -> Self {
        let viewport = Viewport::new(
            config.default_width,
            config.default_height,
            &config.viewport_bounds,
        );
        let known = KnownEntityCache::new(config.known_entity_capacity);
        let validator = PredictiveMovementValidator::new(
            viewer.position,
            config.walk_radius_x,
            config.walk_radius_y,
        );
        Self {
            world,
            config,
            viewer,
            viewport,
            known,
            validator,
        }
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn known(&self) -> &KnownEntityCache {
        &self.known
    }

    pub fn validator(&self) -> &PredictiveMovementValidator {
        &self.validator
    }

    fn assembler(&mut self) -> FloorBandAssembler<'_, W> {
        let encoder = TileEncoder::new(
            &*self.world,
            &self.viewer,
            &self.viewport,
            &mut self.known,
            self.config.tile_entity_cap,
        );
        FloorBandAssembler::new(encoder, self.config.split_floor_descriptions)
    }

    /// Syncs the viewer's facing with the world.
    fn refresh_direction(&mut self) {
        if let Some(me) = self.world.creature(self.viewer.id) {
            self.viewer.direction = me.direction;
        }
    }

    /// Initial view: the aware range followed by a full description.
    pub fn enter_world(&mut self) -> OutputMessage {
        self.refresh_direction();
        let mut msg = OutputMessage::new();
        records::write_aware_range(&mut msg, &self.viewport);
        let center = self.viewer.position;
        self.assembler().write_map_description(&mut msg, center);
        tracing::debug!(
            "Player {:?} entered at {} with {}x{} view",
            self.viewer.id,
            center,
            self.viewport.width(),
            self.viewport.height()
        );
        msg
    }

    /// Applies a client resize request and redraws.
    pub fn resize(&mut self, width: u8, height: u8) -> OutputMessage {
        self.viewport
            .resize(width, height, &self.config.viewport_bounds);
        tracing::debug!(
            "Player {:?} resized view to {}x{} (requested {}x{})",
            self.viewer.id,
            self.viewport.width(),
            self.viewport.height(),
            width,
            height
        );
        let mut msg = OutputMessage::new();
        records::write_aware_range(&mut msg, &self.viewport);
        let center = self.viewer.position;
        self.assembler().write_map_description(&mut msg, center);
        msg
    }

    /// Validates a predicted walk and forwards it, rejects it with a resync,
    /// or drops it as stale.
    pub fn handle_intention(
        &mut self,
        intent: &MovementIntention,
        processor: &mut dyn MovementProcessor,
    ) -> OutputMessage {
        let mut msg = OutputMessage::new();
        match self.validator.validate(intent) {
            IntentOutcome::Forwarded => processor.submit(MovementCommand::Walk {
                player: self.viewer.id,
                origin: intent.origin,
                flags: intent.flags,
                path: intent.directions(),
            }),
            IntentOutcome::Rejected {
                destination,
                counter,
                walk_sequence,
            } => {
                records::write_predictive_cancel(
                    &mut msg,
                    destination,
                    self.viewer.direction,
                    counter,
                );
                records::write_walk_sequence(&mut msg, walk_sequence);
            }
            IntentOutcome::Stale => {}
        }
        msg
    }

    pub fn step(&mut self, direction: Direction, processor: &mut dyn MovementProcessor) {
        processor.submit(MovementCommand::Step {
            player: self.viewer.id,
            direction,
        });
    }

    pub fn stop_walk(&mut self, processor: &mut dyn MovementProcessor) {
        processor.submit(MovementCommand::StopWalk {
            player: self.viewer.id,
        });
    }

    pub fn turn(&mut self, direction: Direction, processor: &mut dyn MovementProcessor) {
        processor.submit(MovementCommand::Turn {
            player: self.viewer.id,
            direction,
        });
    }

    pub fn ping(&self, ping_id: u32) -> OutputMessage {
        let mut msg = OutputMessage::new();
        records::write_ping(&mut msg, ping_id);
        msg
    }

    pub fn legacy_ping(&self) -> OutputMessage {
        let mut msg = OutputMessage::new();
        records::write_legacy_ping(&mut msg);
        msg
    }

    /// Reflects a world change in the client's view.
    pub fn apply_world_event(&mut self, event: &WorldEvent) -> OutputMessage {
        let mut msg = OutputMessage::new();
        match event {
            WorldEvent::CreatureMoved {
                id,
                from,
                to,
                from_tile,
                to_tile,
                teleport,
            } => {
                let from_stack = from_tile.stack_position_of(&self.viewer, *id);
                if *id == self.viewer.id {
                    self.move_self(&mut msg, *from, *to, from_stack, *teleport);
                } else if let Some(creature) = snapshot_of(to_tile, *id) {
                    let step = CreatureStep {
                        from: *from,
                        to: *to,
                        from_stack,
                        to_stack: to_tile.stack_position_of(&self.viewer, *id),
                        teleport: *teleport,
                    };
                    self.assembler()
                        .write_creature_move(&mut msg, creature, step);
                }
            }
            WorldEvent::CreatureAppeared { id, tile } => {
                if *id != self.viewer.id
                    && let Some(creature) = snapshot_of(tile, *id)
                    && let Some(stack) = tile.stack_position_of(&self.viewer, *id)
                {
                    self.assembler()
                        .write_add_creature(&mut msg, creature, stack);
                }
            }
            WorldEvent::CreatureDisappeared { id, position, tile } => {
                if self
                    .viewport
                    .can_see_position(self.viewer.position, *position)
                    && let Some(stack) = tile.stack_position_of(&self.viewer, *id)
                {
                    records::write_remove_thing(&mut msg, *position, stack);
                }
            }
            WorldEvent::CreatureTurned { id, tile } => {
                let Some(creature) = snapshot_of(tile, *id) else {
                    return msg;
                };
                if *id == self.viewer.id {
                    self.viewer.direction = creature.direction;
                }
                if self.viewer.can_perceive(creature)
                    && self
                        .viewport
                        .can_see_position(self.viewer.position, creature.position)
                    && let Some(stack) = tile.stack_position_of(&self.viewer, *id)
                {
                    records::write_creature_turn(
                        &mut msg,
                        creature.position,
                        stack,
                        creature.id,
                        creature.direction,
                    );
                }
            }
            WorldEvent::TileChanged { position } => {
                let tile = self.world.tile(*position);
                self.assembler()
                    .write_tile_update(&mut msg, *position, tile.as_ref());
            }
            WorldEvent::ItemAdded {
                position,
                stack,
                item,
            } => {
                if self
                    .viewport
                    .can_see_position(self.viewer.position, *position)
                {
                    self.assembler()
                        .write_add_item(&mut msg, *position, *stack, item);
                    self.check_predictive_walking(&mut msg, *position);
                }
            }
            WorldEvent::WalkCancelled { player } => {
                if *player == self.viewer.id {
                    self.refresh_direction();
                    let walk_sequence = self.validator.cancel_walk();
                    tracing::debug!(
                        "Cancelled walk of {:?}, walk sequence now {}",
                        player,
                        walk_sequence
                    );
                    records::write_cancel_walk(&mut msg, self.viewer.direction, walk_sequence);
                }
            }
            WorldEvent::Unwalkable { player, position } => {
                if *player == self.viewer.id
                    && let Some(counter) = self.validator.mark_unwalkable(*position)
                {
                    records::write_predictive_cancel(
                        &mut msg,
                        *position,
                        self.viewer.direction,
                        counter,
                    );
                }
            }
        }
        msg
    }

    fn move_self(
        &mut self,
        msg: &mut OutputMessage,
        from: Position,
        to: Position,
        from_stack: Option<u8>,
        teleport: bool,
    ) {
        self.viewer.position = to;
        self.refresh_direction();
        self.validator.recenter(to);
        let kind = self
            .assembler()
            .write_self_move(msg, from, to, from_stack, teleport);
        if kind == MoveKind::FullRedraw {
            tracing::debug!("Full redraw for {:?}: {} -> {}", self.viewer.id, from, to);
        }
    }

    /// Bumps the denial counter of a tile inside the walk window that just
    /// became unwalkable.
    fn check_predictive_walking(&mut self, msg: &mut OutputMessage, position: Position) {
        if !self.validator.matrix().in_range(position)
            || self.world.can_walk_to(self.viewer.id, position)
        {
            return;
        }
        if let Some(counter) = self.validator.mark_unwalkable(position) {
            records::write_predictive_cancel(msg, position, self.viewer.direction, counter);
        }
    }
}
