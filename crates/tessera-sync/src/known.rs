//! Bounded record of the creatures a client already holds full descriptors
//! for.
//!
//! Members are kept in insertion order. When an insertion pushes the set past
//! capacity, the first member that is no longer visible is evicted; if every
//! member is visible, the oldest member other than the one just inserted
//! goes instead. The client frees its own record when told the evicted id.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use crate::world::CreatureId;

/// Default number of creatures a client can remember.
pub const DEFAULT_KNOWN_CAPACITY: usize = 1300;

/// Result of [`KnownEntityCache::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insertion {
    /// The id was not a member before this call.
    pub is_new: bool,
    /// Member removed to make room, if any.
    pub evicted: Option<CreatureId>,
}

#[derive(Debug, Clone)]
pub struct KnownEntityCache {
    order: VecDeque<CreatureId>,
    members: FxHashSet<CreatureId>,
    capacity: usize,
}

impl Default for KnownEntityCache {
    fn default() -> Self {
        Self::new(DEFAULT_KNOWN_CAPACITY)
    }
}

impl KnownEntityCache {
    /// An empty cache. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            members: FxHashSet::default(),
            capacity: capacity.max(1),
        }
    }

    /// Records `id` as known. `is_visible` is consulted only when an eviction
    /// is needed.
    pub fn insert(
        &mut self,
        id: CreatureId,
        mut is_visible: impl FnMut(CreatureId) -> bool,
    ) -> Insertion {
        if !self.members.insert(id) {
            return Insertion {
                is_new: false,
                evicted: None,
            };
        }
        self.order.push_back(id);

        if self.order.len() <= self.capacity {
            return Insertion {
                is_new: true,
                evicted: None,
            };
        }

        let victim = self
            .order
            .iter()
            .position(|member| *member != id && !is_visible(*member))
            .or_else(|| {
                tracing::debug!(
                    "All {} known creatures visible, evicting oldest",
                    self.order.len()
                );
                self.order.iter().position(|member| *member != id)
            });

        let evicted = victim.and_then(|index| self.order.remove(index));
        if let Some(evicted) = evicted {
            self.members.remove(&evicted);
        }
        Insertion {
            is_new: true,
            evicted,
        }
    }

    pub fn contains(&self, id: CreatureId) -> bool {
        self.members.contains(&id)
    }

    /// Forgets `id` without telling the client. Returns whether it was known.
    pub fn remove(&mut self, id: CreatureId) -> bool {
        if self.members.remove(&id) {
            self.order.retain(|member| *member != id);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = CreatureId> + '_ {
        self.order.iter().copied()
    }
}
