//! The client's aware range: an odd-sized window centred on the player, and
//! the visibility predicate derived from it.

use crate::position::{GROUND_FLOOR, Position, UNDERGROUND_VIEW_RADIUS};

/// Default visible width in tiles.
pub const DEFAULT_VIEWPORT_WIDTH: u8 = 17;

/// Default visible height in tiles.
pub const DEFAULT_VIEWPORT_HEIGHT: u8 = 13;

/// Allowed viewport dimensions. Both bounds are odd and `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportBounds {
    pub min_width: u8,
    pub max_width: u8,
    pub min_height: u8,
    pub max_height: u8,
}

impl Default for ViewportBounds {
    fn default() -> Self {
        Self::new(15, 31, 11, 23)
    }
}

impl ViewportBounds {
    /// Normalizes raw bounds: each bound is pulled inward to the nearest odd
    /// value and `max` is raised to `min` if they cross.
    pub fn new(min_width: u8, max_width: u8, min_height: u8, max_height: u8) -> Self {
        let (min_width, max_width) = odd_range(min_width, max_width);
        let (min_height, max_height) = odd_range(min_height, max_height);
        Self {
            min_width,
            max_width,
            min_height,
            max_height,
        }
    }

    fn clamp_width(&self, requested: u8) -> u8 {
        clamp_odd(requested, self.min_width, self.max_width)
    }

    fn clamp_height(&self, requested: u8) -> u8 {
        clamp_odd(requested, self.min_height, self.max_height)
    }
}

fn odd_range(min: u8, max: u8) -> (u8, u8) {
    let min = if min % 2 == 0 { min.saturating_add(1) } else { min }.max(1);
    let max = if max % 2 == 0 { max.saturating_sub(1) } else { max };
    (min, max.max(min))
}

fn clamp_odd(requested: u8, min: u8, max: u8) -> u8 {
    let value = requested.clamp(min, max);
    if value % 2 == 0 { value - 1 } else { value }
}

// ---------------------------------------------------------------------------
// Viewport
// ---------------------------------------------------------------------------

/// Visible window around the player. The sampled region is one tile wider
/// and taller than the window, extending right and down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    width: u8,
    height: u8,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: DEFAULT_VIEWPORT_WIDTH,
            height: DEFAULT_VIEWPORT_HEIGHT,
        }
    }
}

impl Viewport {
    /// A viewport of the requested size, clamped to `bounds`.
    pub fn new(width: u8, height: u8, bounds: &ViewportBounds) -> Self {
        Self {
            width: bounds.clamp_width(width),
            height: bounds.clamp_height(height),
        }
    }

    /// Applies a client resize request. The result is always odd and within
    /// `bounds`.
    pub fn resize(&mut self, width: u8, height: u8, bounds: &ViewportBounds) {
        *self = Self::new(width, height, bounds);
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn height(&self) -> u8 {
        self.height
    }

    /// Tiles visible west of the player.
    pub fn left(&self) -> i32 {
        i32::from(self.width / 2)
    }

    /// Tiles visible east of the player, including the extra column.
    pub fn right(&self) -> i32 {
        self.left() + 1
    }

    /// Tiles visible north of the player.
    pub fn top(&self) -> i32 {
        i32::from(self.height / 2)
    }

    /// Tiles visible south of the player, including the extra row.
    pub fn bottom(&self) -> i32 {
        self.top() + 1
    }

    /// Width of a sampled region.
    pub fn horizontal(&self) -> i32 {
        i32::from(self.width) + 1
    }

    /// Height of a sampled region.
    pub fn vertical(&self) -> i32 {
        i32::from(self.height) + 1
    }

    /// Whether a viewer standing at `center` can see tile `(x, y, z)`.
    ///
    /// From the surface only floors `0..=7` are visible; underground the
    /// viewer sees two floors up and down. Lower floors appear shifted
    /// toward the south-east by one tile per floor.
    pub fn can_see(&self, center: Position, x: i32, y: i32, z: i32) -> bool {
        let cz = i32::from(center.z);
        if center.is_above_ground() {
            if z > i32::from(GROUND_FLOOR) {
                return false;
            }
        } else if (cz - z).abs() > i32::from(UNDERGROUND_VIEW_RADIUS) {
            return false;
        }

        let offset_z = cz - z;
        let cx = i32::from(center.x);
        let cy = i32::from(center.y);
        x >= cx - self.left() + offset_z
            && x <= cx + self.right() + offset_z
            && y >= cy - self.top() + offset_z
            && y <= cy + self.bottom() + offset_z
    }

    /// [`Viewport::can_see`] for a position.
    pub fn can_see_position(&self, center: Position, target: Position) -> bool {
        self.can_see(
            center,
            i32::from(target.x),
            i32::from(target.y),
            i32::from(target.z),
        )
    }
}
