//! Tile coordinates, compass directions, and the floor constants that shape
//! what a client can see.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Floor constants
// ---------------------------------------------------------------------------

/// The surface floor. Floors `0..=GROUND_FLOOR` are above ground and are all
/// visible from the surface; deeper floors are underground.
pub const GROUND_FLOOR: u8 = 7;

/// Deepest floor in the world.
pub const MAX_FLOOR: u8 = 15;

/// How many floors above and below an underground viewer remain visible.
pub const UNDERGROUND_VIEW_RADIUS: u8 = 2;

/// Horizontal offset applied to the first floor layer backfilled during a
/// floor transition. Each further layer adds one tile.
pub const FLOOR_TRANSITION_OFFSET: i32 = 3;

/// Stack positions at or beyond this index are not addressable by the client.
pub const STACK_POSITION_LIMIT: u8 = 10;

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// Absolute tile coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    /// West-east coordinate.
    pub x: u16,
    /// North-south coordinate.
    pub y: u16,
    /// Floor, 0 is the highest.
    pub z: u8,
}

impl Position {
    /// Creates a new position.
    pub const fn new(x: u16, y: u16, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Builds a position from signed scan coordinates, returning `None` for
    /// anything outside the addressable grid.
    pub fn from_signed(x: i32, y: i32, z: i32) -> Option<Self> {
        let x = u16::try_from(x).ok()?;
        let y = u16::try_from(y).ok()?;
        let z = u8::try_from(z).ok().filter(|z| *z <= MAX_FLOOR)?;
        Some(Self { x, y, z })
    }

    /// Returns `true` if the position lies at or above the surface.
    pub fn is_above_ground(&self) -> bool {
        self.z <= GROUND_FLOOR
    }

    /// The neighbouring tile one step in `direction`. Steps off the grid
    /// leave the position unchanged.
    pub fn step(&self, direction: Direction) -> Self {
        let (dx, dy) = direction.delta();
        Self::from_signed(self.x as i32 + dx, self.y as i32 + dy, self.z as i32).unwrap_or(*self)
    }

    /// Signed `(dx, dy, dz)` from `self` to `other`.
    pub fn delta_to(&self, other: &Position) -> (i32, i32, i32) {
        (
            other.x as i32 - self.x as i32,
            other.y as i32 - self.y as i32,
            other.z as i32 - self.z as i32,
        )
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// The eight compass directions. The discriminant is the byte written on the
/// wire for outbound records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    #[default]
    North = 0,
    East = 1,
    South = 2,
    West = 3,
    SouthWest = 4,
    SouthEast = 5,
    NorthWest = 6,
    NorthEast = 7,
}

impl Direction {
    /// Maps a path code from a movement-intention packet. Codes run
    /// counter-clockwise from east: 1=E, 2=NE, 3=N, 4=NW, 5=W, 6=SW, 7=S, 8=SE.
    pub fn from_path_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::East),
            2 => Some(Self::NorthEast),
            3 => Some(Self::North),
            4 => Some(Self::NorthWest),
            5 => Some(Self::West),
            6 => Some(Self::SouthWest),
            7 => Some(Self::South),
            8 => Some(Self::SouthEast),
            _ => None,
        }
    }

    /// Inverse of [`Direction::from_path_code`].
    pub fn path_code(self) -> u8 {
        match self {
            Self::East => 1,
            Self::NorthEast => 2,
            Self::North => 3,
            Self::NorthWest => 4,
            Self::West => 5,
            Self::SouthWest => 6,
            Self::South => 7,
            Self::SouthEast => 8,
        }
    }

    /// Decodes an outbound direction byte.
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::North),
            1 => Some(Self::East),
            2 => Some(Self::South),
            3 => Some(Self::West),
            4 => Some(Self::SouthWest),
            5 => Some(Self::SouthEast),
            6 => Some(Self::NorthWest),
            7 => Some(Self::NorthEast),
            _ => None,
        }
    }

    /// Tile delta of one step. North is negative y.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Self::North => (0, -1),
            Self::East => (1, 0),
            Self::South => (0, 1),
            Self::West => (-1, 0),
            Self::SouthWest => (-1, 1),
            Self::SouthEast => (1, 1),
            Self::NorthWest => (-1, -1),
            Self::NorthEast => (1, -1),
        }
    }
}

// ---------------------------------------------------------------------------
// PathStep
// ---------------------------------------------------------------------------

/// One entry of a client-submitted path. Unrecognized codes still occupy a
/// slot in the path so step indices stay aligned with the client's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStep {
    /// Walk one tile.
    Move(Direction),
    /// Unrecognized code: stand still for this step.
    Idle,
}

impl PathStep {
    /// Decodes a path byte.
    pub fn from_code(code: u8) -> Self {
        Direction::from_path_code(code).map_or(Self::Idle, Self::Move)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_codes_roundtrip_all_directions() {
        for code in 1..=8u8 {
            let dir = Direction::from_path_code(code).unwrap();
            assert_eq!(dir.path_code(), code);
        }
        assert_eq!(Direction::from_path_code(0), None);
        assert_eq!(Direction::from_path_code(9), None);
    }

    #[test]
    fn test_unknown_path_code_is_idle() {
        assert_eq!(PathStep::from_code(0), PathStep::Idle);
        assert_eq!(PathStep::from_code(200), PathStep::Idle);
        assert_eq!(PathStep::from_code(3), PathStep::Move(Direction::North));
    }

    #[test]
    fn test_step_moves_one_tile() {
        let pos = Position::new(100, 100, 7);
        assert_eq!(pos.step(Direction::North), Position::new(100, 99, 7));
        assert_eq!(pos.step(Direction::SouthEast), Position::new(101, 101, 7));
    }

    #[test]
    fn test_step_off_grid_is_clamped() {
        let pos = Position::new(0, 0, 7);
        assert_eq!(pos.step(Direction::NorthWest), pos);
    }

    #[test]
    fn test_from_signed_rejects_out_of_range() {
        assert!(Position::from_signed(-1, 5, 7).is_none());
        assert!(Position::from_signed(5, 5, 16).is_none());
        assert_eq!(Position::from_signed(5, 6, 7), Some(Position::new(5, 6, 7)));
    }
}
