//! Turns movement into the smallest set of map records that brings the
//! client's view up to date.
//!
//! A move of the connection's own player is classified first. Small moves on
//! one floor slide the view and backfill the exposed edge with a one-tile
//! band. Single-floor vertical moves splice in the floors that became
//! visible, then realign with west/north or east/south bands. Anything else
//! redraws the whole view.

use crate::encoder::{SkipRun, TileEncoder, map_floors, write_item};
use crate::position::{
    FLOOR_TRANSITION_OFFSET, GROUND_FLOOR, MAX_FLOOR, Position, STACK_POSITION_LIMIT,
    UNDERGROUND_VIEW_RADIUS,
};
use crate::records::{write_move_creature, write_remove_thing};
use crate::sampler::Region;
use crate::wire::{OutputMessage, SKIP_TERMINATOR, opcode};
use crate::world::{Creature, Item, Tile, WorldView};

/// One step of another creature, as the world saw it when the step happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatureStep {
    pub from: Position,
    pub to: Position,
    /// Stack position on the old tile before the creature left.
    pub from_stack: Option<u8>,
    /// Stack position on the new tile right after it arrived.
    pub to_stack: Option<u8>,
    pub teleport: bool,
}

/// How a move of the viewer's own player is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    /// Resend the entire view.
    FullRedraw,
    /// Same floor, at most one tile per axis.
    SimpleSlide,
    /// One floor up.
    FloorUp,
    /// One floor down.
    FloorDown,
}

impl MoveKind {
    /// `from_stack` is the player's stack position on the old tile as the
    /// client knew it, if it was addressable at all.
    pub fn classify(from: Position, to: Position, from_stack: Option<u8>, teleport: bool) -> Self {
        let unreliable_stack = from_stack.is_none_or(|stack| stack >= STACK_POSITION_LIMIT);
        if teleport || unreliable_stack {
            return Self::FullRedraw;
        }

        let (dx, dy, dz) = from.delta_to(&to);
        if dx.abs() > 1 || dy.abs() > 1 || dz.abs() > 1 {
            return Self::FullRedraw;
        }
        match dz {
            -1 => Self::FloorUp,
            1 => Self::FloorDown,
            _ => Self::SimpleSlide,
        }
    }
}

/// Floors (and their diagonal offset) that become visible when stepping one
/// floor up from `from` to `to`.
pub fn floor_up_layers(from: Position, to: Position) -> Vec<(u8, i32)> {
    if to.z == GROUND_FLOOR {
        // Floors 7 and 6 were already visible from 8.
        (0..=GROUND_FLOOR - 2)
            .rev()
            .map(|floor| {
                let depth = i32::from(GROUND_FLOOR - 2 - floor);
                (floor, FLOOR_TRANSITION_OFFSET + depth)
            })
            .collect()
    } else if to.z > GROUND_FLOOR {
        from.z
            .checked_sub(UNDERGROUND_VIEW_RADIUS + 1)
            .map(|floor| vec![(floor, FLOOR_TRANSITION_OFFSET)])
            .unwrap_or_default()
    } else {
        Vec::new()
    }
}

/// Floors that become visible when stepping one floor down.
pub fn floor_down_layers(from: Position, to: Position) -> Vec<(u8, i32)> {
    if to.z == GROUND_FLOOR + 1 {
        (0..=UNDERGROUND_VIEW_RADIUS)
            .map(|i| (to.z + i, -(i32::from(i) + 1)))
            .collect()
    } else if to.z > from.z
        && to.z > GROUND_FLOOR + 1
        && to.z + UNDERGROUND_VIEW_RADIUS <= MAX_FLOOR
    {
        vec![(to.z + UNDERGROUND_VIEW_RADIUS, -FLOOR_TRANSITION_OFFSET)]
    } else {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// FloorBandAssembler
// ---------------------------------------------------------------------------

pub struct FloorBandAssembler<'a, W: WorldView + ?Sized> {
    encoder: TileEncoder<'a, W>,
    split_floors: bool,
}

impl<'a, W: WorldView + ?Sized> FloorBandAssembler<'a, W> {
    /// With `split_floors` set, full descriptions go out as one record per
    /// floor instead of a single record.
    pub fn new(encoder: TileEncoder<'a, W>, split_floors: bool) -> Self {
        Self {
            encoder,
            split_floors,
        }
    }

    pub fn encoder(&mut self) -> &mut TileEncoder<'a, W> {
        &mut self.encoder
    }

    fn can_see(&self, position: Position) -> bool {
        let viewer = self.encoder.viewer();
        self.encoder
            .viewport()
            .can_see_position(viewer.position, position)
    }

    /// Full view around `center`.
    pub fn write_map_description(&mut self, msg: &mut OutputMessage, center: Position) {
        let viewport = *self.encoder.viewport();
        let region = Region::new(
            i32::from(center.x) - viewport.left(),
            i32::from(center.y) - viewport.top(),
            i32::from(center.z),
            viewport.horizontal(),
            viewport.vertical(),
        );
        let viewer_position = self.encoder.viewer().position;

        if !self.split_floors {
            msg.add_u8(opcode::MAP_DESCRIPTION);
            msg.add_position(viewer_position);
            self.encoder.describe_map(msg, region, center.z);
            return;
        }

        for floor in map_floors(center.z) {
            msg.add_u8(opcode::FLOOR_DESCRIPTION);
            msg.add_position(viewer_position);
            msg.add_u8(floor);
            let mut skip = SkipRun::new();
            let offset = i32::from(center.z) - i32::from(floor);
            self.encoder
                .describe_floor(msg, region.on_floor(i32::from(floor)), offset, &mut skip);
            skip.flush(msg);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_band(
        &mut self,
        msg: &mut OutputMessage,
        band: u8,
        x: i32,
        y: i32,
        z: u8,
        width: i32,
        height: i32,
    ) {
        msg.add_u8(band);
        self.encoder
            .describe_map(msg, Region::new(x, y, i32::from(z), width, height), z);
    }

    fn write_layers(&mut self, msg: &mut OutputMessage, from: Position, layers: &[(u8, i32)]) {
        if layers.is_empty() {
            return;
        }
        let viewport = *self.encoder.viewport();
        let region = Region::new(
            i32::from(from.x) - viewport.left(),
            i32::from(from.y) - viewport.top(),
            i32::from(from.z),
            viewport.horizontal(),
            viewport.vertical(),
        );
        let mut skip = SkipRun::new();
        for &(floor, offset) in layers {
            self.encoder
                .describe_floor(msg, region.on_floor(i32::from(floor)), offset, &mut skip);
        }
        skip.flush(msg);
    }

    fn write_floor_up(&mut self, msg: &mut OutputMessage, from: Position, to: Position) {
        msg.add_u8(opcode::FLOOR_UP);
        self.write_layers(msg, from, &floor_up_layers(from, to));

        let viewport = *self.encoder.viewport();
        let (x, y) = (i32::from(from.x), i32::from(from.y));
        self.write_band(
            msg,
            opcode::BAND_WEST,
            x - viewport.left(),
            y - viewport.top() + 1,
            to.z,
            1,
            viewport.vertical(),
        );
        self.write_band(
            msg,
            opcode::BAND_NORTH,
            x - viewport.left(),
            y - viewport.top(),
            to.z,
            viewport.horizontal(),
            1,
        );
    }

    fn write_floor_down(&mut self, msg: &mut OutputMessage, from: Position, to: Position) {
        msg.add_u8(opcode::FLOOR_DOWN);
        self.write_layers(msg, from, &floor_down_layers(from, to));

        let viewport = *self.encoder.viewport();
        let (x, y) = (i32::from(from.x), i32::from(from.y));
        self.write_band(
            msg,
            opcode::BAND_EAST,
            x + viewport.right(),
            y - viewport.top() - 1,
            to.z,
            1,
            viewport.vertical(),
        );
        self.write_band(
            msg,
            opcode::BAND_SOUTH,
            x - viewport.left(),
            y + viewport.bottom(),
            to.z,
            viewport.horizontal(),
            1,
        );
    }

    /// Bands for the edges exposed by a horizontal step.
    fn write_slide_bands(&mut self, msg: &mut OutputMessage, from: Position, to: Position) {
        let viewport = *self.encoder.viewport();
        let (ox, oy) = (i32::from(from.x), i32::from(from.y));
        let (nx, ny) = (i32::from(to.x), i32::from(to.y));

        if oy > ny {
            self.write_band(
                msg,
                opcode::BAND_NORTH,
                ox - viewport.left(),
                ny - viewport.top(),
                to.z,
                viewport.horizontal(),
                1,
            );
        } else if oy < ny {
            self.write_band(
                msg,
                opcode::BAND_SOUTH,
                ox - viewport.left(),
                ny + viewport.bottom(),
                to.z,
                viewport.horizontal(),
                1,
            );
        }

        if ox < nx {
            self.write_band(
                msg,
                opcode::BAND_EAST,
                nx + viewport.right(),
                ny - viewport.top(),
                to.z,
                1,
                viewport.vertical(),
            );
        } else if ox > nx {
            self.write_band(
                msg,
                opcode::BAND_WEST,
                nx - viewport.left(),
                ny - viewport.top(),
                to.z,
                1,
                viewport.vertical(),
            );
        }
    }

    /// Records for the viewer's own player moving from `from` to `to`. The
    /// viewer must already stand on `to`.
    pub fn write_self_move(
        &mut self,
        msg: &mut OutputMessage,
        from: Position,
        to: Position,
        from_stack: Option<u8>,
        teleport: bool,
    ) -> MoveKind {
        let kind = MoveKind::classify(from, to, from_stack, teleport);
        let Some(stack) = from_stack.filter(|_| kind != MoveKind::FullRedraw) else {
            if let Some(stack) = from_stack {
                write_remove_thing(msg, from, stack);
            }
            self.write_map_description(msg, to);
            return kind;
        };

        if from.z == GROUND_FLOOR && to.z > GROUND_FLOOR {
            write_remove_thing(msg, from, stack);
        } else {
            write_move_creature(msg, from, stack, to);
        }

        match kind {
            MoveKind::FloorUp => self.write_floor_up(msg, from, to),
            MoveKind::FloorDown => self.write_floor_down(msg, from, to),
            MoveKind::SimpleSlide | MoveKind::FullRedraw => {}
        }
        self.write_slide_bands(msg, from, to);
        kind
    }

    /// Records for another creature moving. `creature` is its state right
    /// after the move; stack positions are as this viewer perceives the old
    /// and new tiles.
    pub fn write_creature_move(
        &mut self,
        msg: &mut OutputMessage,
        creature: &Creature,
        step: CreatureStep,
    ) {
        if !self.encoder.viewer().can_perceive(creature) {
            return;
        }
        let CreatureStep {
            from,
            to,
            from_stack,
            to_stack,
            teleport,
        } = step;
        match (self.can_see(from), self.can_see(to)) {
            (true, true) => {
                let crosses_surface = from.z == GROUND_FLOOR && to.z > GROUND_FLOOR;
                match from_stack {
                    Some(stack)
                        if !teleport && !crosses_surface && stack < STACK_POSITION_LIMIT =>
                    {
                        write_move_creature(msg, from, stack, to);
                    }
                    _ => {
                        if let Some(stack) = from_stack {
                            write_remove_thing(msg, from, stack);
                        }
                        if let Some(stack) = to_stack {
                            self.write_add_creature_at(msg, creature, to, stack);
                        }
                    }
                }
            }
            (true, false) => {
                if let Some(stack) = from_stack {
                    write_remove_thing(msg, from, stack);
                }
            }
            (false, true) => {
                if let Some(stack) = to_stack {
                    self.write_add_creature_at(msg, creature, to, stack);
                }
            }
            (false, false) => {}
        }
    }

    /// A creature appearing on its current tile.
    pub fn write_add_creature(&mut self, msg: &mut OutputMessage, creature: &Creature, stack: u8) {
        self.write_add_creature_at(msg, creature, creature.position, stack);
    }

    fn write_add_creature_at(
        &mut self,
        msg: &mut OutputMessage,
        creature: &Creature,
        position: Position,
        stack: u8,
    ) {
        if !self.can_see(position) {
            return;
        }
        msg.add_u8(opcode::ADD_TILE_THING);
        msg.add_position(position);
        msg.add_u8(stack);
        self.encoder.creature_entry(creature).write(msg);
    }

    pub fn write_add_item(
        &mut self,
        msg: &mut OutputMessage,
        position: Position,
        stack: u8,
        item: &Item,
    ) {
        if !self.can_see(position) {
            return;
        }
        msg.add_u8(opcode::ADD_TILE_THING);
        msg.add_position(position);
        msg.add_u8(stack);
        write_item(msg, item);
    }

    /// Replaces the client's copy of one tile.
    pub fn write_tile_update(
        &mut self,
        msg: &mut OutputMessage,
        position: Position,
        tile: Option<&Tile>,
    ) {
        if !self.can_see(position) {
            return;
        }
        msg.add_u8(opcode::UPDATE_TILE);
        msg.add_position(position);
        match tile {
            Some(tile) => {
                self.encoder.encode_tile(msg, tile);
                msg.add_u8(0x00);
            }
            None => msg.add_u8(0x01),
        }
        msg.add_u8(SKIP_TERMINATOR);
    }
}
