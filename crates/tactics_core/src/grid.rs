//! Sparse spatial index over the placement grid.
//!
//! Two maps are kept in lock-step:
//!
//! - `cells`: cell key → occupying entity ids (sorted, never empty)
//! - `entities`: entity id → anchor cell, covered cell keys, last position
//!
//! Every entity listed in a cell has a reverse-index entry naming that cell,
//! and every reverse-index entry's cells list the entity. [`SpatialGrid::verify`]
//! checks this; a violation is not repairable locally.
//!
//! Cell contents are kept sorted, so the final state never depends on the
//! order in which entities were inserted or updated.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::Collection;
use crate::coords::{CellKey, GridCell, GridLayout};
use crate::error::{GameError, Result};
use crate::ids::{EntityId, TeamId};
use crate::math::{Fixed, Vec2Fixed};
use crate::world::World;

/// Rejection from a grid mutation. The grid is unchanged when one is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GridError {
    /// A cell lies outside the grid.
    #[error("cell ({}, {}) is outside the grid", .0.x, .0.z)]
    OutOfBounds(GridCell),
}

/// What the grid records about an occupant besides its cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupant {
    /// Entity id.
    pub id: EntityId,
    /// World position used for distance checks.
    pub position: Vec2Fixed,
    /// Collection used for query filters.
    pub collection: Collection,
}

impl Occupant {
    /// Create a new occupant record.
    #[must_use]
    pub const fn new(id: EntityId, position: Vec2Fixed, collection: Collection) -> Self {
        Self {
            id,
            position,
            collection,
        }
    }
}

/// Reverse-index entry for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Occupancy {
    /// Anchor cell x (cell containing `position`).
    pub grid_x: i32,
    /// Anchor cell z.
    pub grid_z: i32,
    /// Keys of every cell the entity occupies, ascending.
    pub cell_keys: Vec<CellKey>,
    /// Last known world position.
    pub position: Vec2Fixed,
    /// Collection of the occupant.
    pub collection: Collection,
}

/// Counters from one [`SpatialGrid::incremental_update`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateStats {
    /// Tracked entities examined.
    pub scanned: usize,
    /// Entities whose anchor was unchanged and were skipped.
    pub unchanged: usize,
    /// Entities re-reserved after crossing a cell boundary.
    pub moved: usize,
    /// Entities seen for the first time.
    pub inserted: usize,
    /// Entries released because the entity is gone.
    pub removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct Cell {
    /// Occupying entity ids, ascending.
    entities: Vec<EntityId>,
}

/// Cell-indexed occupancy map with O(1)-amortized insert/remove/query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialGrid {
    layout: GridLayout,
    cells: HashMap<CellKey, Cell>,
    entities: HashMap<EntityId, Occupancy>,
}

impl SpatialGrid {
    /// Create an empty grid over `layout`.
    #[must_use]
    pub fn new(layout: GridLayout) -> Self {
        Self {
            layout,
            cells: HashMap::new(),
            entities: HashMap::new(),
        }
    }

    /// Grid dimensions and coordinate mapping.
    #[must_use]
    pub const fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Reserve `cells` for `occupant`.
    ///
    /// Reserving cells the entity already holds is a no-op, so calling this
    /// twice with the same arguments leaves the grid as after the first call.
    /// Additional cells are merged into the entity's existing set. Fails
    /// without mutation if any cell is off the grid.
    pub fn reserve(
        &mut self,
        cells: &[GridCell],
        occupant: Occupant,
    ) -> std::result::Result<(), GridError> {
        let mut keys = Vec::with_capacity(cells.len());
        for &cell in cells {
            let key = self
                .layout
                .cell_key(cell)
                .ok_or(GridError::OutOfBounds(cell))?;
            keys.push(key);
        }
        keys.sort_unstable();
        keys.dedup();

        let anchor = self.layout.world_to_grid(occupant.position);
        let entry = self
            .entities
            .entry(occupant.id)
            .or_insert_with(|| Occupancy {
                grid_x: anchor.x,
                grid_z: anchor.z,
                cell_keys: Vec::new(),
                position: occupant.position,
                collection: occupant.collection,
            });
        entry.grid_x = anchor.x;
        entry.grid_z = anchor.z;
        entry.position = occupant.position;
        entry.collection = occupant.collection;

        for key in keys {
            if let Err(slot) = entry.cell_keys.binary_search(&key) {
                entry.cell_keys.insert(slot, key);
                let cell = self.cells.entry(key).or_default();
                if let Err(pos) = cell.entities.binary_search(&occupant.id) {
                    cell.entities.insert(pos, occupant.id);
                }
            }
        }

        Ok(())
    }

    /// Remove `entity` from every cell it occupies.
    ///
    /// Emptied cells are pruned. Returns `false` if the entity was not tracked.
    pub fn release(&mut self, entity: EntityId) -> bool {
        let Some(occupancy) = self.entities.remove(&entity) else {
            return false;
        };

        for key in occupancy.cell_keys {
            let now_empty = match self.cells.get_mut(&key) {
                Some(cell) => {
                    if let Ok(pos) = cell.entities.binary_search(&entity) {
                        cell.entities.remove(pos);
                    }
                    cell.entities.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.cells.remove(&key);
            }
        }

        true
    }

    /// Whether every cell is on the grid and unoccupied.
    ///
    /// `team` is accepted for future side-aware rules; occupied cells block
    /// regardless of who holds them.
    #[must_use]
    pub fn is_valid_placement(&self, cells: &[GridCell], _team: TeamId) -> bool {
        cells.iter().all(|&cell| match self.layout.cell_key(cell) {
            Some(key) => !self.cells.contains_key(&key),
            None => false,
        })
    }

    /// The subset of `cells` that is currently occupied.
    #[must_use]
    pub fn occupied_among(&self, cells: &[GridCell]) -> Vec<GridCell> {
        cells
            .iter()
            .copied()
            .filter(|&cell| self.is_occupied(cell))
            .collect()
    }

    /// The subset of `cells` held by anyone other than `ignore`.
    #[must_use]
    pub fn occupied_by_others(&self, cells: &[GridCell], ignore: EntityId) -> Vec<GridCell> {
        cells
            .iter()
            .copied()
            .filter(|&cell| self.entities_at(cell).iter().any(|&id| id != ignore))
            .collect()
    }

    /// Whether any entity occupies `cell`.
    #[must_use]
    pub fn is_occupied(&self, cell: GridCell) -> bool {
        self.layout
            .cell_key(cell)
            .is_some_and(|key| self.cells.contains_key(&key))
    }

    /// Entities occupying `cell`, ascending.
    #[must_use]
    pub fn entities_at(&self, cell: GridCell) -> &[EntityId] {
        self.layout
            .cell_key(cell)
            .and_then(|key| self.cells.get(&key))
            .map_or(&[], |cell| cell.entities.as_slice())
    }

    /// Reverse-index entry for `entity`.
    #[must_use]
    pub fn occupancy(&self, entity: EntityId) -> Option<&Occupancy> {
        self.entities.get(&entity)
    }

    /// Cells occupied by `entity`, in key order.
    #[must_use]
    pub fn cells_of(&self, entity: EntityId) -> Vec<GridCell> {
        self.entities.get(&entity).map_or_else(Vec::new, |occ| {
            occ.cell_keys
                .iter()
                .map(|&key| self.layout.cell_from_key(key))
                .collect()
        })
    }

    /// Number of non-empty cells.
    #[must_use]
    pub fn occupied_cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Number of entities with a reverse-index entry.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.entities.len()
    }

    /// Entities within `radius` of `position`, sorted by id.
    ///
    /// Scans the square of cells `ceil(radius / cell_size)` around the
    /// position's cell, then keeps entities whose recorded position is within
    /// the true radius.
    #[must_use]
    pub fn query_nearby(
        &self,
        position: Vec2Fixed,
        radius: Fixed,
        exclude: Option<EntityId>,
        collection: Option<Collection>,
    ) -> Vec<EntityId> {
        if radius < Fixed::ZERO {
            return Vec::new();
        }

        let reach = self.layout.cell_radius(radius);
        let center = self.layout.world_to_grid(position);
        // None means every entity in the scanned square is within range
        let radius_sq = radius.checked_mul(radius);

        // Scan bounds saturate, then clamp to the grid
        let min_x = center.x.saturating_sub(reach).max(0);
        let min_z = center.z.saturating_sub(reach).max(0);
        let max_x = center.x.saturating_add(reach).min(self.layout.width() as i32 - 1);
        let max_z = center.z.saturating_add(reach).min(self.layout.depth() as i32 - 1);

        let mut found = BTreeSet::new();
        for z in min_z..=max_z {
            for x in min_x..=max_x {
                for &id in self.entities_at(GridCell::new(x, z)) {
                    if Some(id) == exclude || found.contains(&id) {
                        continue;
                    }
                    let Some(occ) = self.entities.get(&id) else {
                        continue;
                    };
                    if collection.is_some_and(|c| c != occ.collection) {
                        continue;
                    }
                    let within = radius_sq
                        .map_or(true, |r| occ.position.saturating_distance_squared(position) <= r);
                    if within {
                        found.insert(id);
                    }
                }
            }
        }

        found.into_iter().collect()
    }

    /// Bring the index in line with the world's transforms.
    ///
    /// Entities whose anchor cell is unchanged only get their stored position
    /// refreshed. Entities that crossed into another cell are released and
    /// re-reserved at their new footprint (clipped to the grid), new bodies
    /// are inserted, and entries for entities that no longer exist are
    /// released.
    pub fn incremental_update(&mut self, world: &World) -> UpdateStats {
        let mut stats = UpdateStats::default();

        for (&id, entity) in world.iter() {
            let (Some(transform), Some(body)) = (entity.transform, entity.body) else {
                continue;
            };
            stats.scanned += 1;

            let anchor = self.layout.world_to_grid(transform.position);
            match self.entities.get_mut(&id) {
                Some(occ) if occ.grid_x == anchor.x && occ.grid_z == anchor.z => {
                    occ.position = transform.position;
                    stats.unchanged += 1;
                    continue;
                }
                Some(_) => {
                    self.release(id);
                    stats.moved += 1;
                }
                None => stats.inserted += 1,
            }

            let cells: Vec<GridCell> = body
                .footprint
                .cells_at(anchor)
                .into_iter()
                .filter(|&cell| self.layout.in_bounds(cell))
                .collect();
            // Every cell was bounds-checked above
            let _ = self.reserve(
                &cells,
                Occupant::new(id, transform.position, body.collection),
            );
        }

        let stale: Vec<EntityId> = self
            .entities
            .keys()
            .copied()
            .filter(|&id| {
                world
                    .get(id)
                    .map_or(true, |e| e.transform.is_none() || e.body.is_none())
            })
            .collect();
        for id in stale {
            self.release(id);
            stats.removed += 1;
        }

        stats
    }

    /// Check that the cell map and reverse index agree.
    pub fn verify(&self) -> Result<()> {
        for (&key, cell) in &self.cells {
            if cell.entities.is_empty() {
                return Err(GameError::IndexCorrupted(format!(
                    "cell {key} is empty but not pruned"
                )));
            }
            for &id in &cell.entities {
                let listed = self
                    .entities
                    .get(&id)
                    .is_some_and(|occ| occ.cell_keys.binary_search(&key).is_ok());
                if !listed {
                    return Err(GameError::IndexCorrupted(format!(
                        "entity {id} is in cell {key} without a reverse entry"
                    )));
                }
            }
        }

        for (&id, occ) in &self.entities {
            for &key in &occ.cell_keys {
                let present = self
                    .cells
                    .get(&key)
                    .is_some_and(|cell| cell.entities.binary_search(&id).is_ok());
                if !present {
                    return Err(GameError::IndexCorrupted(format!(
                        "entity {id} claims cell {key} but is not listed there"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Sorted `(cell key, occupants)` pairs, for hashing and comparison.
    #[must_use]
    pub fn sorted_cells(&self) -> Vec<(CellKey, &[EntityId])> {
        let mut cells: Vec<_> = self
            .cells
            .iter()
            .map(|(&key, cell)| (key, cell.entities.as_slice()))
            .collect();
        cells.sort_unstable_by_key(|(key, _)| *key);
        cells
    }

    /// Drop every reservation.
    pub fn clear(&mut self) {
        self.cells.clear();
        self.entities.clear();
    }
}
