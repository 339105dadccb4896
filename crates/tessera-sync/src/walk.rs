//! Reconciliation of client-predicted movement with server walkability.
//!
//! Each tile near the player carries a denial counter. Whenever the server
//! learns that a tile the client may predict onto is unwalkable, the counter
//! is bumped and sent to the client. Intentions carry the counter the client
//! believed in; a belief older than the server's value means the prediction
//! was made without knowing about the denial, and the intention is rejected.

use std::hash::Hash;

use rustc_hash::FxHashMap;

use crate::intent::MovementIntention;
use crate::position::Position;
use crate::sequence::WalkSequence;

/// Default half-width of the tracked window.
pub const DEFAULT_WALK_RADIUS_X: u16 = 8;

/// Default half-height of the tracked window.
pub const DEFAULT_WALK_RADIUS_Y: u16 = 6;

// ---------------------------------------------------------------------------
// OptimisticCounters
// ---------------------------------------------------------------------------

/// Sparse per-key version counters. Untracked keys read as zero.
#[derive(Debug, Clone)]
pub struct OptimisticCounters<K> {
    counters: FxHashMap<K, i32>,
}

impl<K> Default for OptimisticCounters<K> {
    fn default() -> Self {
        Self {
            counters: FxHashMap::default(),
        }
    }
}

impl<K: Hash + Eq + Copy> OptimisticCounters<K> {
    pub fn current(&self, key: K) -> i32 {
        self.counters.get(&key).copied().unwrap_or(0)
    }

    /// Increments the counter for `key` and returns the new value.
    pub fn bump(&mut self, key: K) -> i32 {
        let counter = self.counters.entry(key).or_insert(0);
        *counter = counter.saturating_add(1);
        *counter
    }

    /// Whether a holder who believed `belief` missed a later bump.
    pub fn is_outdated(&self, key: K, belief: i32) -> bool {
        belief < self.current(key)
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn clear(&mut self) {
        self.counters.clear();
    }

    /// Rebuilds the map, re-keying or dropping each entry.
    pub fn remap(&mut self, mut f: impl FnMut(K) -> Option<K>) {
        let old = std::mem::take(&mut self.counters);
        for (key, value) in old {
            if let Some(key) = f(key) {
                self.counters.insert(key, value);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// WalkMatrix
// ---------------------------------------------------------------------------

/// Denial counters keyed by offset from the player. Only offsets inside the
/// window exist; everything else reads as zero.
#[derive(Debug, Clone)]
pub struct WalkMatrix {
    center: Position,
    radius_x: i32,
    radius_y: i32,
    counters: OptimisticCounters<(i32, i32)>,
}

impl WalkMatrix {
    pub fn new(center: Position, radius_x: u16, radius_y: u16) -> Self {
        Self {
            center,
            radius_x: i32::from(radius_x),
            radius_y: i32::from(radius_y),
            counters: OptimisticCounters::default(),
        }
    }

    pub fn center(&self) -> Position {
        self.center
    }

    fn offset(&self, pos: Position) -> Option<(i32, i32)> {
        let (dx, dy, dz) = self.center.delta_to(&pos);
        (dz == 0 && dx.abs() <= self.radius_x && dy.abs() <= self.radius_y).then_some((dx, dy))
    }

    pub fn in_range(&self, pos: Position) -> bool {
        self.offset(pos).is_some()
    }

    pub fn get(&self, pos: Position) -> i32 {
        self.offset(pos)
            .map_or(0, |offset| self.counters.current(offset))
    }

    /// Bumps the counter at `pos` and returns it, or returns 0 without
    /// tracking anything when `pos` is outside the window.
    pub fn update(&mut self, pos: Position) -> i32 {
        match self.offset(pos) {
            Some(offset) => self.counters.bump(offset),
            None => 0,
        }
    }

    /// Moves the window with the player. Counters keep their absolute tile;
    /// those that fall outside the window, or any on a floor change, are
    /// dropped.
    pub fn recenter(&mut self, center: Position) {
        let (sx, sy, sz) = self.center.delta_to(&center);
        self.center = center;
        if sz != 0 {
            self.counters.clear();
            return;
        }
        let (rx, ry) = (self.radius_x, self.radius_y);
        self.counters.remap(|(dx, dy)| {
            let (nx, ny) = (dx - sx, dy - sy);
            (nx.abs() <= rx && ny.abs() <= ry).then_some((nx, ny))
        });
    }

    pub fn tracked(&self) -> usize {
        self.counters.len()
    }
}

// ---------------------------------------------------------------------------
// PredictiveMovementValidator
// ---------------------------------------------------------------------------

/// Verdict on a movement intention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentOutcome {
    /// Pass the intention to the movement processor.
    Forwarded,
    /// The client predicted onto a tile it did not know was denied. The
    /// walk sequence was bumped and the client must be resynced.
    Rejected {
        destination: Position,
        counter: i32,
        walk_sequence: u32,
    },
    /// Sent before the client saw the latest walk sequence bump.
    Stale,
}

#[derive(Debug, Clone)]
pub struct PredictiveMovementValidator {
    matrix: WalkMatrix,
    walk_sequence: WalkSequence,
}

impl PredictiveMovementValidator {
    pub fn new(center: Position, radius_x: u16, radius_y: u16) -> Self {
        Self {
            matrix: WalkMatrix::new(center, radius_x, radius_y),
            walk_sequence: WalkSequence::default(),
        }
    }

    pub fn matrix(&self) -> &WalkMatrix {
        &self.matrix
    }

    pub fn walk_sequence(&self) -> u32 {
        self.walk_sequence.current()
    }

    pub fn validate(&mut self, intent: &MovementIntention) -> IntentOutcome {
        let destination = intent.first_destination();
        let counter = self.matrix.get(destination);
        if intent.denial_token < counter {
            let walk_sequence = self.walk_sequence.bump();
            tracing::debug!(
                "Rejecting intention onto {}: token {} < counter {}, walk sequence now {}",
                destination,
                intent.denial_token,
                counter,
                walk_sequence
            );
            return IntentOutcome::Rejected {
                destination,
                counter,
                walk_sequence,
            };
        }

        if self.walk_sequence.is_stale(intent.walk_sequence) {
            tracing::trace!(
                "Dropping stale intention {} (current {})",
                intent.walk_sequence,
                self.walk_sequence.current()
            );
            return IntentOutcome::Stale;
        }

        IntentOutcome::Forwarded
    }

    /// Records that `pos` is unwalkable. Returns the new counter when `pos`
    /// is inside the window and the client needs a predictive cancel.
    pub fn mark_unwalkable(&mut self, pos: Position) -> Option<i32> {
        self.matrix
            .in_range(pos)
            .then(|| self.matrix.update(pos))
    }

    /// A refused step: the client must discard anything it sent so far.
    pub fn cancel_walk(&mut self) -> u32 {
        self.walk_sequence.bump()
    }

    pub fn recenter(&mut self, center: Position) {
        self.matrix.recenter(center);
    }
}
