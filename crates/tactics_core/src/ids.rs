//! Identifier types and the placement id allocator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for entities in the world.
pub type EntityId = u64;

/// Identifier shared by every member of one placement.
///
/// Allocated by the authoritative peer and carried verbatim to replicas.
/// `0` is the invalid sentinel and `u32::MAX` is never issued, so the
/// allocator always has a successor to move to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct PlacementId(pub u32);

impl PlacementId {
    /// The reserved invalid id.
    pub const INVALID: Self = Self(0);

    /// Create a placement id from a raw value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Whether this id can refer to a real placement.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 > 0 && self.0 < u32::MAX
    }
}

impl fmt::Display for PlacementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Side of the battle an entity fights for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct TeamId(pub u8);

/// Player slot within the match.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct PlayerId(pub u8);

/// Pre-authenticated `(player, team)` pair supplied by the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Owner {
    /// Owning player.
    pub player: PlayerId,
    /// Team the player fights on.
    pub team: TeamId,
}

impl Owner {
    /// Create a new owner.
    #[must_use]
    pub const fn new(player: PlayerId, team: TeamId) -> Self {
        Self { player, team }
    }
}

/// Monotonic placement id source.
///
/// Owned by the authoritative registry only. Ids start at 1 and are never
/// reused within a match; ids learned from elsewhere (a restored snapshot, a
/// replayed log) are folded in with [`IdAllocator::observe`] so later local
/// allocations can't collide with them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    /// Create an allocator whose first id is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 1 }
    }

    /// Allocate the next placement id.
    pub fn allocate(&mut self) -> PlacementId {
        let id = PlacementId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }

    /// Record an id allocated elsewhere.
    pub fn observe(&mut self, id: PlacementId) {
        if id.0 >= self.next {
            self.next = id.0.saturating_add(1);
        }
    }

    /// The id the next call to [`allocate`](Self::allocate) will return.
    #[must_use]
    pub const fn peek(&self) -> PlacementId {
        PlacementId(self.next)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_starts_at_one() {
        let mut alloc = IdAllocator::new();
        assert_eq!(alloc.allocate(), PlacementId(1));
        assert_eq!(alloc.allocate(), PlacementId(2));
    }

    #[test]
    fn test_invalid_sentinel() {
        assert!(!PlacementId::INVALID.is_valid());
        assert!(PlacementId::new(1).is_valid());
        assert!(!PlacementId::new(u32::MAX).is_valid());
    }

    #[test]
    fn test_observe_saturates_at_the_top() {
        let mut alloc = IdAllocator::new();
        alloc.observe(PlacementId(u32::MAX));
        assert_eq!(alloc.peek(), PlacementId(u32::MAX));
    }

    #[test]
    fn test_observe_skips_past_external_ids() {
        let mut alloc = IdAllocator::new();
        alloc.observe(PlacementId(10));
        assert_eq!(alloc.allocate(), PlacementId(11));

        // Observing an older id never moves the counter backwards
        alloc.observe(PlacementId(3));
        assert_eq!(alloc.allocate(), PlacementId(12));
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut alloc = IdAllocator::new();
        assert_eq!(alloc.peek(), PlacementId(1));
        assert_eq!(alloc.peek(), PlacementId(1));
        assert_eq!(alloc.allocate(), PlacementId(1));
    }
}
