//! Map stream encoding: tiles, creature entries and empty-tile skip runs.
//!
//! A floor is scanned column by column. Each non-empty tile is written as an
//! environment marker followed by at most `tile_cap` entities: ground, top
//! items, perceivable creatures newest first, bottom items. Encoding stops
//! the moment the cap is reached, even partway through a category. Runs of
//! empty tiles collapse into `[n, 0xFF]` markers.

use crate::known::KnownEntityCache;
use crate::position::{Direction, GROUND_FLOOR, MAX_FLOOR, UNDERGROUND_VIEW_RADIUS};
use crate::sampler::{Region, WorldSampler};
use crate::viewport::Viewport;
use crate::wire::{ENVIRONMENT_MARKER, OutputMessage, SKIP_TERMINATOR, entity_tag};
use crate::world::{Creature, CreatureId, Item, Light, Outfit, Tile, Viewer, WorldView};

/// Default number of entities written per tile.
pub const DEFAULT_TILE_ENTITY_CAP: usize = 10;

/// Largest skip count a single marker carries before the run is split.
const MAX_SKIP: i32 = 0xFE;

// ---------------------------------------------------------------------------
// SkipRun
// ---------------------------------------------------------------------------

/// Pending count of empty tiles. `-1` means nothing is pending and the
/// next non-empty tile needs no marker in front of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipRun {
    pending: i32,
}

impl Default for SkipRun {
    fn default() -> Self {
        Self::new()
    }
}

impl SkipRun {
    pub fn new() -> Self {
        Self { pending: -1 }
    }

    /// Closes the pending run ahead of a non-empty tile.
    fn before_tile(&mut self, msg: &mut OutputMessage) {
        if self.pending >= 0 {
            write_skip(msg, self.pending as u8);
        }
        self.pending = 0;
    }

    fn empty_tile(&mut self, msg: &mut OutputMessage) {
        if self.pending == MAX_SKIP {
            write_skip(msg, 0xFF);
            self.pending = -1;
        } else {
            self.pending += 1;
        }
    }

    /// Writes any pending run. Called once at the end of a stream.
    pub fn flush(&mut self, msg: &mut OutputMessage) {
        if self.pending >= 0 {
            write_skip(msg, self.pending as u8);
            self.pending = -1;
        }
    }

    /// The count a flush would write, if any.
    pub fn pending(&self) -> Option<u8> {
        u8::try_from(self.pending).ok()
    }
}

fn write_skip(msg: &mut OutputMessage, count: u8) {
    msg.add_u8(count);
    msg.add_u8(SKIP_TERMINATOR);
}

// ---------------------------------------------------------------------------
// Creature entries
// ---------------------------------------------------------------------------

/// Everything the client needs to render a creature it has not seen yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatureDescriptor {
    pub name: String,
    pub health_percent: u8,
    pub direction: Direction,
    pub outfit: Outfit,
    pub light: Light,
    /// Half the step speed, as the client expects it.
    pub speed: u16,
    pub skull: u8,
    pub shield: u8,
    pub emblem: u8,
}

impl CreatureDescriptor {
    /// Describes `creature` as `viewer` perceives it.
    pub fn new(creature: &Creature, viewer: &Viewer) -> Self {
        let outfit = if creature.ghost || creature.invisible {
            Outfit::default()
        } else {
            creature.outfit
        };
        let light = Light {
            level: if viewer.access {
                0xFF
            } else {
                creature.light.level
            },
            color: creature.light.color,
        };
        Self {
            name: creature.name.clone(),
            health_percent: health_percent(creature),
            direction: creature.direction,
            outfit,
            light,
            speed: creature.speed / 2,
            skull: creature.skull,
            shield: creature.shield,
            emblem: creature.emblem,
        }
    }
}

/// Health as a rounded-up percentage, or 0 when hidden.
fn health_percent(creature: &Creature) -> u8 {
    if creature.health_hidden {
        return 0;
    }
    let health = i64::from(creature.health.max(0)) * 100;
    let max = i64::from(creature.max_health.max(1));
    ((health + max - 1) / max).clamp(0, 100) as u8
}

/// How a creature appears in the stream: a bare reference when the client
/// already knows it, a full descriptor otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreatureEntry {
    Known {
        id: CreatureId,
    },
    Unknown {
        id: CreatureId,
        descriptor: CreatureDescriptor,
        /// Known creature the client should forget to make room.
        evicted: Option<CreatureId>,
    },
}

impl CreatureEntry {
    pub fn id(&self) -> CreatureId {
        match self {
            Self::Known { id } | Self::Unknown { id, .. } => *id,
        }
    }

    pub fn write(&self, msg: &mut OutputMessage) {
        match self {
            Self::Known { id } => {
                msg.add_u16(entity_tag::KNOWN_CREATURE);
                msg.add_u32(id.0);
            }
            Self::Unknown {
                id,
                descriptor,
                evicted,
            } => {
                msg.add_u16(entity_tag::UNKNOWN_CREATURE);
                msg.add_u32(evicted.map_or(0, |e| e.0));
                msg.add_u32(id.0);
                msg.add_string(&descriptor.name);
                msg.add_u8(descriptor.health_percent);
                msg.add_u8(descriptor.direction as u8);
                write_outfit(msg, &descriptor.outfit);
                msg.add_u8(descriptor.light.level);
                msg.add_u8(descriptor.light.color);
                msg.add_u16(descriptor.speed);
                msg.add_u8(descriptor.skull);
                msg.add_u8(descriptor.shield);
                msg.add_u8(descriptor.emblem);
            }
        }
    }
}

fn write_outfit(msg: &mut OutputMessage, outfit: &Outfit) {
    msg.add_u16(outfit.look_type);
    if outfit.look_type != 0 {
        msg.add_u8(outfit.head);
        msg.add_u8(outfit.body);
        msg.add_u8(outfit.legs);
        msg.add_u8(outfit.feet);
    } else {
        msg.add_u16(outfit.look_item);
    }
}

pub fn write_item(msg: &mut OutputMessage, item: &Item) {
    msg.add_u16(item.id);
    msg.add_u8(item.count);
}

/// Whether `id` exists, is perceivable, and stands inside the viewport.
pub fn is_visible_to<W: WorldView + ?Sized>(
    world: &W,
    viewer: &Viewer,
    viewport: &Viewport,
    id: CreatureId,
) -> bool {
    world.creature(id).is_some_and(|creature| {
        viewer.can_perceive(&creature)
            && viewport.can_see_position(viewer.position, creature.position)
    })
}

/// Floors included in a map description for a viewer on floor `z`, in
/// scan order.
pub fn map_floors(z: u8) -> Vec<u8> {
    if z > GROUND_FLOOR {
        let start = z.saturating_sub(UNDERGROUND_VIEW_RADIUS);
        let end = z.saturating_add(UNDERGROUND_VIEW_RADIUS).min(MAX_FLOOR);
        (start..=end).collect()
    } else {
        (0..=GROUND_FLOOR).rev().collect()
    }
}

// ---------------------------------------------------------------------------
// TileEncoder
// ---------------------------------------------------------------------------

/// Encodes tiles for one viewer. Borrows the connection's known-creature
/// cache for the duration of a single task.
pub struct TileEncoder<'a, W: WorldView + ?Sized> {
    world: &'a W,
    viewer: &'a Viewer,
    viewport: &'a Viewport,
    known: &'a mut KnownEntityCache,
    tile_cap: usize,
}

impl<'a, W: WorldView + ?Sized> TileEncoder<'a, W> {
    pub fn new(
        world: &'a W,
        viewer: &'a Viewer,
        viewport: &'a Viewport,
        known: &'a mut KnownEntityCache,
        tile_cap: usize,
    ) -> Self {
        Self {
            world,
            viewer,
            viewport,
            known,
            tile_cap: tile_cap.max(1),
        }
    }

    pub fn world(&self) -> &'a W {
        self.world
    }

    pub fn viewer(&self) -> &'a Viewer {
        self.viewer
    }

    pub fn viewport(&self) -> &'a Viewport {
        self.viewport
    }

    pub fn sampler(&self) -> WorldSampler<'a, W> {
        WorldSampler::new(self.world)
    }

    /// Tags `creature` as known or unknown, recording it in the cache.
    pub fn creature_entry(&mut self, creature: &Creature) -> CreatureEntry {
        let (world, viewer, viewport) = (self.world, self.viewer, self.viewport);
        let insertion = self
            .known
            .insert(creature.id, |id| is_visible_to(world, viewer, viewport, id));
        if insertion.is_new {
            CreatureEntry::Unknown {
                id: creature.id,
                descriptor: CreatureDescriptor::new(creature, viewer),
                evicted: insertion.evicted,
            }
        } else {
            CreatureEntry::Known { id: creature.id }
        }
    }

    /// Writes one tile and returns how many entities it carried.
    pub fn encode_tile(&mut self, msg: &mut OutputMessage, tile: &Tile) -> usize {
        msg.add_u16(ENVIRONMENT_MARKER);

        let mut count = 0;
        if let Some(ground) = &tile.ground {
            write_item(msg, ground);
            count += 1;
        }

        for item in &tile.top_items {
            if count >= self.tile_cap {
                return count;
            }
            write_item(msg, item);
            count += 1;
        }

        for creature in tile.creatures.iter().rev() {
            if count >= self.tile_cap {
                return count;
            }
            if !self.viewer.can_perceive(creature) {
                continue;
            }
            self.creature_entry(creature).write(msg);
            count += 1;
        }

        for item in &tile.bottom_items {
            if count >= self.tile_cap {
                return count;
            }
            write_item(msg, item);
            count += 1;
        }
        count
    }

    /// Scans one floor of `region`, shifted by `offset`, continuing the skip
    /// run carried in `skip`.
    pub fn describe_floor(
        &mut self,
        msg: &mut OutputMessage,
        region: Region,
        offset: i32,
        skip: &mut SkipRun,
    ) {
        for cell in self.sampler().sample_floor(region, offset) {
            match cell {
                Some(tile) => {
                    skip.before_tile(msg);
                    self.encode_tile(msg, &tile);
                }
                None => skip.empty_tile(msg),
            }
        }
    }

    /// Writes every visible floor of `region` for a viewer on floor `z`,
    /// sharing one skip run across floors.
    pub fn describe_map(&mut self, msg: &mut OutputMessage, region: Region, z: u8) {
        let mut skip = SkipRun::new();
        for nz in map_floors(z) {
            let offset = i32::from(z) - i32::from(nz);
            self.describe_floor(msg, region.on_floor(i32::from(nz)), offset, &mut skip);
        }
        skip.flush(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Position;
    use crate::wire::PacketReader;
    use crate::world::MemoryWorld;

    fn encode_region(world: &MemoryWorld, region: Region) -> OutputMessage {
        let viewer = Viewer::new(CreatureId(1), Position::new(100, 100, 7));
        let viewport = Viewport::default();
        let mut known = KnownEntityCache::default();
        let mut encoder = TileEncoder::new(
            world,
            &viewer,
            &viewport,
            &mut known,
            DEFAULT_TILE_ENTITY_CAP,
        );
        let mut msg = OutputMessage::new();
        let mut skip = SkipRun::new();
        encoder.describe_floor(&mut msg, region, 0, &mut skip);
        skip.flush(&mut msg);
        msg
    }

    #[test]
    fn test_empty_region_is_one_skip_marker() {
        let world = MemoryWorld::new(Position::new(100, 100, 7));
        let msg = encode_region(&world, Region::new(100, 100, 7, 5, 5));
        // 25 empty tiles: the marker's own slot plus 24 skipped.
        assert_eq!(msg.as_bytes(), &[24, 0xFF]);
    }

    #[test]
    fn test_long_empty_run_splits_at_255() {
        let world = MemoryWorld::new(Position::new(100, 100, 7));
        let msg = encode_region(&world, Region::new(100, 100, 7, 1, 300));
        // 256 tiles close the first marker, 44 remain.
        assert_eq!(msg.as_bytes(), &[0xFF, 0xFF, 43, 0xFF]);
    }

    #[test]
    fn test_adjacent_tiles_are_separated_by_zero_skip() {
        let world = MemoryWorld::new(Position::new(100, 100, 7));
        world.set_ground(Position::new(100, 100, 7), Item::new(10));
        world.set_ground(Position::new(100, 101, 7), Item::new(11));
        let msg = encode_region(&world, Region::new(100, 100, 7, 1, 2));
        assert_eq!(msg.as_bytes(), &[
            0, 0, 10, 0, 1, // tile 1
            0, 0xFF, // separator
            0, 0, 11, 0, 1, // tile 2
            0, 0xFF, // trailing flush
        ]);
    }

    #[test]
    fn test_tile_cap_stops_within_a_category() {
        let world = MemoryWorld::new(Position::new(100, 100, 7));
        let pos = Position::new(100, 100, 7);
        world.set_ground(pos, Item::new(100));
        for i in 0..11 {
            world.add_top_item(pos, Item::new(200 + i));
        }
        let tile = world.tile(pos).unwrap();

        let viewer = Viewer::new(CreatureId(1), pos);
        let viewport = Viewport::default();
        let mut known = KnownEntityCache::default();
        let mut encoder = TileEncoder::new(
            &world,
            &viewer,
            &viewport,
            &mut known,
            DEFAULT_TILE_ENTITY_CAP,
        );
        let mut msg = OutputMessage::new();
        assert_eq!(encoder.encode_tile(&mut msg, &tile), 10);
        // marker + 10 items of 3 bytes
        assert_eq!(msg.len(), 2 + 10 * 3);

        let mut reader = PacketReader::new(msg.as_bytes());
        reader.get_u16().unwrap();
        reader.get_u16().unwrap();
        reader.get_u8().unwrap();
        for i in 0..9 {
            assert_eq!(reader.get_u16().unwrap(), 200 + i);
            reader.get_u8().unwrap();
        }
        assert!(reader.is_empty());
    }

    #[test]
    fn test_creatures_newest_first_and_hidden_skipped() {
        let world = MemoryWorld::new(Position::new(100, 100, 7));
        let pos = Position::new(100, 100, 7);
        world.set_ground(pos, Item::new(100));
        world.place_creature(Creature::new(2, "Old", pos));
        let mut ghost = Creature::new(3, "Ghost", pos);
        ghost.ghost = true;
        world.place_creature(ghost);
        world.place_creature(Creature::new(4, "New", pos));
        let tile = world.tile(pos).unwrap();

        let viewer = Viewer::new(CreatureId(1), pos);
        let viewport = Viewport::default();
        let mut known = KnownEntityCache::default();
        known.insert(CreatureId(2), |_| true);
        let mut encoder = TileEncoder::new(&world, &viewer, &viewport, &mut known, 10);

        let mut msg = OutputMessage::new();
        assert_eq!(encoder.encode_tile(&mut msg, &tile), 3);

        let mut reader = PacketReader::new(msg.as_bytes());
        reader.get_u16().unwrap();
        assert_eq!(reader.get_u16().unwrap(), 100);
        reader.get_u8().unwrap();
        assert_eq!(reader.get_u16().unwrap(), entity_tag::UNKNOWN_CREATURE);
        assert_eq!(reader.get_u32().unwrap(), 0);
        assert_eq!(reader.get_u32().unwrap(), 4);
        assert_eq!(reader.get_string().unwrap(), "New");
    }

    #[test]
    fn test_descriptor_rounds_health_up() {
        let viewer = Viewer::new(CreatureId(1), Position::new(1, 1, 7));
        let mut creature = Creature::new(2, "Rat", Position::new(1, 1, 7));
        creature.health = 1;
        creature.max_health = 3;
        assert_eq!(CreatureDescriptor::new(&creature, &viewer).health_percent, 34);

        creature.health_hidden = true;
        assert_eq!(CreatureDescriptor::new(&creature, &viewer).health_percent, 0);

        creature.health_hidden = false;
        creature.max_health = 0;
        creature.health = 0;
        assert_eq!(CreatureDescriptor::new(&creature, &viewer).health_percent, 0);
    }

    #[test]
    fn test_descriptor_masks_invisible_outfit_and_staff_light() {
        let mut viewer = Viewer::new(CreatureId(1), Position::new(1, 1, 7));
        let mut creature = Creature::new(2, "Rat", Position::new(1, 1, 7));
        creature.outfit.look_type = 21;
        creature.light = Light { level: 3, color: 215 };
        creature.invisible = true;
        viewer.access = true;

        let descriptor = CreatureDescriptor::new(&creature, &viewer);
        assert_eq!(descriptor.outfit, Outfit::default());
        assert_eq!(descriptor.light.level, 0xFF);
        assert_eq!(descriptor.light.color, 215);
        assert_eq!(descriptor.speed, 110);
    }

    #[test]
    fn test_map_floors_surface_and_underground() {
        assert_eq!(map_floors(7), vec![7, 6, 5, 4, 3, 2, 1, 0]);
        assert_eq!(map_floors(3), vec![7, 6, 5, 4, 3, 2, 1, 0]);
        assert_eq!(map_floors(10), vec![8, 9, 10, 11, 12]);
        assert_eq!(map_floors(15), vec![13, 14, 15]);
    }
}
