//! Entity storage referenced by the placement core.
//!
//! The simulation world is owned by the wider game; the placement core only
//! needs a handful of components on each entity. Entities are composed of
//! optional components, and only components that are `Some` are active.
//!
//! Entity ids come from a local counter. When a remote peer's allocation is
//! replayed the ids are inserted verbatim with [`World::spawn_with_id`], which
//! never touches the counter except to move it past the supplied id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::catalog::{Collection, UnitTypeId};
use crate::construction::BuilderTask;
use crate::coords::{Footprint, GridCell};
use crate::ids::{EntityId, Owner, PlacementId};
use crate::math::{fixed_serde, Fixed, Vec2Fixed};

/// World-space placement of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transform {
    /// Position on the ground plane.
    pub position: Vec2Fixed,
    /// Height above the ground plane's origin.
    #[serde(with = "fixed_serde")]
    pub height: Fixed,
}

impl Transform {
    /// Create a transform on the ground plane.
    #[must_use]
    pub const fn new(position: Vec2Fixed, height: Fixed) -> Self {
        Self { position, height }
    }
}

/// Physical presence on the grid. Entities with a body and a transform are
/// tracked by the spatial grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Body {
    /// Collection used by query filters.
    pub collection: Collection,
    /// Cells covered around the entity's anchor cell.
    pub footprint: Footprint,
}

/// Marks an entity as a member of a placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlacementTag {
    /// Placement this entity belongs to.
    pub placement_id: PlacementId,
    /// Owning player and team.
    pub owner: Owner,
    /// Type id within `collection`.
    pub unit_type: UnitTypeId,
    /// Collection of the placement.
    pub collection: Collection,
    /// Grid position the placement was requested at.
    pub grid_position: GridCell,
    /// Whether the building is still being constructed.
    pub under_construction: bool,
}

/// Construction capability. `task` is `None` while idle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Builder {
    /// Current construction task.
    pub task: Option<BuilderTask>,
}

/// Movement order handed to the pathfinding layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MoveOrder {
    /// Destination on the ground plane.
    pub target: Vec2Fixed,
    /// Terrain height at the destination.
    #[serde(with = "fixed_serde")]
    pub height: Fixed,
}

/// An entity with optional components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier for this entity.
    pub id: EntityId,
    /// World position.
    pub transform: Option<Transform>,
    /// Grid presence.
    pub body: Option<Body>,
    /// Placement membership.
    pub placement: Option<PlacementTag>,
    /// Construction capability and task.
    pub builder: Option<Builder>,
    /// Pending movement order.
    pub move_order: Option<MoveOrder>,
}

impl Entity {
    /// Create a new entity with the given ID and no components.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            transform: None,
            body: None,
            placement: None,
            builder: None,
            move_order: None,
        }
    }
}

/// Parameters for spawning a new entity.
///
/// All fields are optional - only provide the components you need.
#[derive(Debug, Clone, Default)]
pub struct EntityParams {
    /// Initial transform.
    pub transform: Option<Transform>,
    /// Grid presence.
    pub body: Option<Body>,
    /// Placement membership.
    pub placement: Option<PlacementTag>,
    /// Whether the entity can construct buildings.
    pub can_build: bool,
}

impl EntityParams {
    fn into_entity(self, id: EntityId) -> Entity {
        let mut entity = Entity::new(id);
        entity.transform = self.transform;
        entity.body = self.body;
        entity.placement = self.placement;
        if self.can_build {
            entity.builder = Some(Builder::default());
        }
        entity
    }
}

/// Storage for all entities.
///
/// Uses a `HashMap` for O(1) entity lookup by ID, with deterministic
/// iteration via sorted keys whenever order can affect state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct World {
    /// Map of entity ID to entity data.
    entities: HashMap<EntityId, Entity>,
    /// Next entity ID to assign.
    next_id: EntityId,
}

impl World {
    /// Create an empty world. The first allocated id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            next_id: 1,
        }
    }

    /// Spawn an entity with a locally allocated id.
    pub fn spawn(&mut self, params: EntityParams) -> EntityId {
        let id = self.next_id;
        self.next_id += 1;
        self.entities.insert(id, params.into_entity(id));
        id
    }

    /// Spawn an entity under an id chosen elsewhere.
    ///
    /// Returns `false` and changes nothing if the id is `0`, `EntityId::MAX`
    /// or already live.
    pub fn spawn_with_id(&mut self, id: EntityId, params: EntityParams) -> bool {
        if id == 0 || id == EntityId::MAX || self.entities.contains_key(&id) {
            return false;
        }
        if id >= self.next_id {
            self.next_id = id + 1;
        }
        self.entities.insert(id, params.into_entity(id));
        true
    }

    /// Remove an entity by ID.
    pub fn despawn(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    /// Get an entity by ID.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Get a mutable reference to an entity by ID.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// Check if an entity exists.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Get the number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if the world is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// The id the next local spawn will receive.
    #[must_use]
    pub const fn next_id(&self) -> EntityId {
        self.next_id
    }

    /// Get sorted entity IDs for deterministic iteration.
    #[must_use]
    pub fn sorted_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<_> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Iterate over all entities (not in deterministic order).
    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &Entity)> {
        self.entities.iter()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_allocates_sequential_ids() {
        let mut world = World::new();
        assert_eq!(world.spawn(EntityParams::default()), 1);
        assert_eq!(world.spawn(EntityParams::default()), 2);
        assert_eq!(world.len(), 2);
    }

    #[test]
    fn test_spawn_with_id_moves_counter_past_external_id() {
        let mut world = World::new();
        assert!(world.spawn_with_id(10, EntityParams::default()));
        assert_eq!(world.next_id(), 11);
        assert_eq!(world.spawn(EntityParams::default()), 11);

        // Lower ids do not move the counter back
        assert!(world.spawn_with_id(4, EntityParams::default()));
        assert_eq!(world.next_id(), 12);
    }

    #[test]
    fn test_spawn_with_id_rejects_live_and_zero_ids() {
        let mut world = World::new();
        let id = world.spawn(EntityParams::default());
        assert!(!world.spawn_with_id(id, EntityParams::default()));
        assert!(!world.spawn_with_id(0, EntityParams::default()));
        assert!(!world.spawn_with_id(EntityId::MAX, EntityParams::default()));
        assert_eq!(world.len(), 1);
        assert_eq!(world.next_id(), 2);
    }

    #[test]
    fn test_can_build_attaches_idle_builder() {
        let mut world = World::new();
        let id = world.spawn(EntityParams {
            can_build: true,
            ..Default::default()
        });
        let builder = world.get(id).unwrap().builder.as_ref().unwrap();
        assert!(builder.task.is_none());
    }

    #[test]
    fn test_sorted_ids() {
        let mut world = World::new();
        world.spawn_with_id(30, EntityParams::default());
        world.spawn_with_id(5, EntityParams::default());
        world.spawn_with_id(17, EntityParams::default());
        assert_eq!(world.sorted_ids(), vec![5, 17, 30]);
    }

    #[test]
    fn test_despawn() {
        let mut world = World::new();
        let id = world.spawn(EntityParams::default());
        assert!(world.despawn(id).is_some());
        assert!(!world.contains(id));
        assert!(world.despawn(id).is_none());
    }
}
