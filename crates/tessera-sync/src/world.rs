//! The world as this crate sees it: read-only tile and creature lookups
//! behind [`WorldView`], plus an in-memory [`MemoryWorld`] used by the server
//! binary and by tests.

use std::path::Path;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::position::{Direction, Position};

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Server-wide creature identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CreatureId(pub u32);

/// A stackable or plain item lying on a tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Client-side type id. Must stay below `0xFF00`.
    pub id: u16,
    /// Stack count or subtype.
    #[serde(default = "default_count")]
    pub count: u8,
    /// Whether the item blocks movement onto its tile.
    #[serde(default)]
    pub blocking: bool,
}

fn default_count() -> u8 {
    1
}

impl Item {
    /// Creates a non-blocking item with count 1.
    pub fn new(id: u16) -> Self {
        Self {
            id,
            count: 1,
            blocking: false,
        }
    }

    /// Creates a blocking item with count 1.
    pub fn blocking(id: u16) -> Self {
        Self {
            id,
            count: 1,
            blocking: true,
        }
    }
}

/// Creature appearance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outfit {
    pub look_type: u16,
    pub head: u8,
    pub body: u8,
    pub legs: u8,
    pub feet: u8,
    /// Item id shown instead of a body when `look_type` is 0.
    pub look_item: u16,
}

/// Light emitted by a creature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Light {
    pub level: u8,
    pub color: u8,
}

/// Authoritative creature state as sampled from the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creature {
    pub id: CreatureId,
    pub name: String,
    pub position: Position,
    pub health: i32,
    pub max_health: i32,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub outfit: Outfit,
    #[serde(default)]
    pub light: Light,
    /// Step speed; the wire carries half of it.
    #[serde(default = "default_speed")]
    pub speed: u16,
    #[serde(default)]
    pub skull: u8,
    #[serde(default)]
    pub shield: u8,
    #[serde(default)]
    pub emblem: u8,
    #[serde(default)]
    pub health_hidden: bool,
    #[serde(default)]
    pub invisible: bool,
    #[serde(default)]
    pub ghost: bool,
}

fn default_speed() -> u16 {
    220
}

impl Creature {
    /// A plain visible creature with full health.
    pub fn new(id: u32, name: impl Into<String>, position: Position) -> Self {
        Self {
            id: CreatureId(id),
            name: name.into(),
            position,
            health: 100,
            max_health: 100,
            direction: Direction::South,
            outfit: Outfit::default(),
            light: Light::default(),
            speed: default_speed(),
            skull: 0,
            shield: 0,
            emblem: 0,
            health_hidden: false,
            invisible: false,
            ghost: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tile
// ---------------------------------------------------------------------------

/// Snapshot of one tile. Creatures appear in internal stacking order: the
/// most recently placed creature is last.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tile {
    pub ground: Option<Item>,
    pub top_items: Vec<Item>,
    pub creatures: Vec<Creature>,
    pub bottom_items: Vec<Item>,
}

impl Tile {
    /// Client stack index of `creature` as seen by `viewer`, counting the
    /// ground, top items, and the perceivable creatures placed after it.
    pub fn stack_position_of(&self, viewer: &Viewer, creature: CreatureId) -> Option<u8> {
        let mut index = usize::from(self.ground.is_some()) + self.top_items.len();
        for c in self.creatures.iter().rev() {
            if !viewer.can_perceive(c) {
                continue;
            }
            if c.id == creature {
                return u8::try_from(index).ok();
            }
            index += 1;
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Viewer
// ---------------------------------------------------------------------------

/// The player a connection synchronizes for, reduced to what perception and
/// visibility need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub id: CreatureId,
    pub position: Position,
    pub direction: Direction,
    /// Staff access: sees ghosts and invisible creatures, full light.
    pub access: bool,
    pub sees_invisible: bool,
}

impl Viewer {
    /// An ordinary player at `position`.
    pub fn new(id: CreatureId, position: Position) -> Self {
        Self {
            id,
            position,
            direction: Direction::South,
            access: false,
            sees_invisible: false,
        }
    }

    /// Perception rules, independent of distance.
    pub fn can_perceive(&self, creature: &Creature) -> bool {
        if creature.id == self.id {
            return true;
        }
        if creature.ghost && !self.access {
            return false;
        }
        if creature.invisible && !self.access && !self.sees_invisible {
            return false;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// WorldView
// ---------------------------------------------------------------------------

/// Read-only world queries. Implementations must return snapshots: a
/// returned [`Tile`] does not change while the caller holds it.
pub trait WorldView: Send + Sync {
    /// Tile content at `position`, or `None` for an empty cell.
    fn tile(&self, position: Position) -> Option<Tile>;

    /// Current state of a creature, or `None` if it no longer exists.
    fn creature(&self, id: CreatureId) -> Option<Creature>;

    /// Whether `walker` could step onto `position` right now.
    fn can_walk_to(&self, walker: CreatureId, position: Position) -> bool;
}

// ---------------------------------------------------------------------------
// MemoryWorld
// ---------------------------------------------------------------------------

/// Errors raised while loading a world fixture.
#[derive(Debug, thiserror::Error)]
pub enum WorldLoadError {
    /// Failed to read the fixture file.
    #[error("failed to read world fixture: {0}")]
    Read(#[source] std::io::Error),

    /// Failed to parse RON content.
    #[error("failed to parse world fixture: {0}")]
    Parse(#[source] ron::error::SpannedError),
}

/// Serialized form of one tile in a fixture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TileFixture {
    pub position: Position,
    pub ground: Option<Item>,
    pub top_items: Vec<Item>,
    pub bottom_items: Vec<Item>,
}

/// Serialized world: a spawn point, tiles, and creatures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldFixture {
    pub spawn: Position,
    pub tiles: Vec<TileFixture>,
    pub creatures: Vec<Creature>,
}

#[derive(Debug, Clone, Default)]
struct StoredTile {
    ground: Option<Item>,
    top_items: Vec<Item>,
    creatures: Vec<CreatureId>,
    bottom_items: Vec<Item>,
}

#[derive(Debug, Default)]
struct WorldState {
    tiles: FxHashMap<Position, StoredTile>,
    creatures: FxHashMap<CreatureId, Creature>,
}

/// Hash-map backed world. Reads clone out snapshots under a shared lock;
/// mutation takes the write lock briefly.
#[derive(Debug, Default)]
pub struct MemoryWorld {
    state: RwLock<WorldState>,
    spawn: Position,
}

impl MemoryWorld {
    /// An empty world with spawn at `spawn`.
    pub fn new(spawn: Position) -> Self {
        Self {
            state: RwLock::new(WorldState::default()),
            spawn,
        }
    }

    /// Builds a world from a parsed fixture.
    pub fn from_fixture(fixture: WorldFixture) -> Self {
        let world = Self::new(fixture.spawn);
        for tile in fixture.tiles {
            let mut state = world.state.write();
            let stored = state.tiles.entry(tile.position).or_default();
            stored.ground = tile.ground;
            stored.top_items = tile.top_items;
            stored.bottom_items = tile.bottom_items;
        }
        for creature in fixture.creatures {
            world.place_creature(creature);
        }
        world
    }

    /// Loads a RON fixture from disk.
    pub fn load(path: &Path) -> Result<Self, WorldLoadError> {
        let contents = std::fs::read_to_string(path).map_err(WorldLoadError::Read)?;
        let fixture: WorldFixture = ron::from_str(&contents).map_err(WorldLoadError::Parse)?;
        tracing::info!(
            "Loaded world fixture {} ({} tiles, {} creatures)",
            path.display(),
            fixture.tiles.len(),
            fixture.creatures.len()
        );
        Ok(Self::from_fixture(fixture))
    }

    /// Configured spawn point.
    pub fn spawn(&self) -> Position {
        self.spawn
    }

    /// Sets the ground item of a tile, creating the tile if needed.
    pub fn set_ground(&self, position: Position, ground: Item) {
        self.state.write().tiles.entry(position).or_default().ground = Some(ground);
    }

    /// Pushes an item onto the top stack of a tile.
    pub fn add_top_item(&self, position: Position, item: Item) {
        self.state
            .write()
            .tiles
            .entry(position)
            .or_default()
            .top_items
            .push(item);
    }

    /// Pushes an item onto the bottom stack of a tile.
    pub fn add_bottom_item(&self, position: Position, item: Item) {
        self.state
            .write()
            .tiles
            .entry(position)
            .or_default()
            .bottom_items
            .push(item);
    }

    /// Places a creature on its tile, replacing any earlier record with the
    /// same id.
    pub fn place_creature(&self, creature: Creature) {
        let mut state = self.state.write();
        if let Some(old) = state.creatures.remove(&creature.id) {
            if let Some(tile) = state.tiles.get_mut(&old.position) {
                tile.creatures.retain(|id| *id != creature.id);
            }
        }
        state
            .tiles
            .entry(creature.position)
            .or_default()
            .creatures
            .push(creature.id);
        state.creatures.insert(creature.id, creature);
    }

    /// Moves a creature to `to`, returning its previous position.
    pub fn move_creature(&self, id: CreatureId, to: Position) -> Option<Position> {
        let mut state = self.state.write();
        let from = state.creatures.get(&id)?.position;
        if let Some(tile) = state.tiles.get_mut(&from) {
            tile.creatures.retain(|c| *c != id);
        }
        state.tiles.entry(to).or_default().creatures.push(id);
        if let Some(creature) = state.creatures.get_mut(&id) {
            creature.position = to;
        }
        Some(from)
    }

    /// Sets a creature's facing direction.
    pub fn turn_creature(&self, id: CreatureId, direction: Direction) -> bool {
        match self.state.write().creatures.get_mut(&id) {
            Some(creature) => {
                creature.direction = direction;
                true
            }
            None => false,
        }
    }

    /// Removes a creature from the world entirely.
    pub fn remove_creature(&self, id: CreatureId) -> Option<Creature> {
        let mut state = self.state.write();
        let creature = state.creatures.remove(&id)?;
        if let Some(tile) = state.tiles.get_mut(&creature.position) {
            tile.creatures.retain(|c| *c != id);
        }
        Some(creature)
    }

    fn snapshot(state: &WorldState, stored: &StoredTile) -> Tile {
        Tile {
            ground: stored.ground.clone(),
            top_items: stored.top_items.clone(),
            creatures: stored
                .creatures
                .iter()
                .filter_map(|id| state.creatures.get(id).cloned())
                .collect(),
            bottom_items: stored.bottom_items.clone(),
        }
    }
}

impl WorldView for MemoryWorld {
    fn tile(&self, position: Position) -> Option<Tile> {
        let state = self.state.read();
        let stored = state.tiles.get(&position)?;
        if stored.ground.is_none()
            && stored.top_items.is_empty()
            && stored.creatures.is_empty()
            && stored.bottom_items.is_empty()
        {
            return None;
        }
        Some(Self::snapshot(&state, stored))
    }

    fn creature(&self, id: CreatureId) -> Option<Creature> {
        self.state.read().creatures.get(&id).cloned()
    }

    fn can_walk_to(&self, walker: CreatureId, position: Position) -> bool {
        let state = self.state.read();
        let Some(tile) = state.tiles.get(&position) else {
            return false;
        };
        tile.ground.is_some()
            && !tile
                .top_items
                .iter()
                .chain(tile.bottom_items.iter())
                .any(|item| item.blocking)
            && tile.creatures.iter().all(|id| *id == walker)
    }
}
