//! Rectangular region queries against a [`WorldView`].

use crate::position::Position;
use crate::world::{Tile, WorldView};

/// A single-floor rectangle of tiles, anchored at its north-west corner.
/// Coordinates are signed so regions may hang off the edge of the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn new(x: i32, y: i32, z: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            z,
            width,
            height,
        }
    }

    /// Number of cells covered.
    pub fn area(&self) -> usize {
        (self.width.max(0) as usize) * (self.height.max(0) as usize)
    }

    /// The same rectangle on another floor.
    pub fn on_floor(self, z: i32) -> Self {
        Self { z, ..self }
    }
}

/// Reads tile snapshots out of the world in the order the map stream
/// encodes them.
pub struct WorldSampler<'a, W: WorldView + ?Sized> {
    world: &'a W,
}

impl<'a, W: WorldView + ?Sized> WorldSampler<'a, W> {
    pub fn new(world: &'a W) -> Self {
        Self { world }
    }

    /// Tile at signed coordinates. Anything off the grid is empty.
    pub fn tile_at(&self, x: i32, y: i32, z: i32) -> Option<Tile> {
        Position::from_signed(x, y, z).and_then(|pos| self.world.tile(pos))
    }

    /// Samples `region` shifted diagonally by `offset` tiles, column by
    /// column: the outer loop runs over x, the inner over y.
    pub fn sample_floor(&self, region: Region, offset: i32) -> Vec<Option<Tile>> {
        let mut cells = Vec::with_capacity(region.area());
        for nx in 0..region.width {
            for ny in 0..region.height {
                cells.push(self.tile_at(
                    region.x + nx + offset,
                    region.y + ny + offset,
                    region.z,
                ));
            }
        }
        cells
    }
}
