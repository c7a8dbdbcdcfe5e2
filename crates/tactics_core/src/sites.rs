//! Resource veins and the site constraints they impose on buildings.
//!
//! An extractor must cover exactly one vein's cells, and a vein can be held by
//! one extractor at a time. Every other building must stay off vein cells.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::coords::{CellRect, GridCell};
use crate::ids::PlacementId;

/// Identifier of a vein within a battlefield.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct VeinId(pub u32);

/// A patch of extractable ground.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceVein {
    /// Cells covered by the vein.
    pub area: CellRect,
    /// Placement of the extractor standing on it, if any.
    pub claimed_by: Option<PlacementId>,
}

/// All veins on the battlefield, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceVeins {
    veins: BTreeMap<VeinId, ResourceVein>,
    next_id: u32,
}

impl ResourceVeins {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an unclaimed vein covering `area`.
    pub fn add(&mut self, area: CellRect) -> VeinId {
        let id = VeinId(self.next_id);
        self.next_id += 1;
        self.veins.insert(
            id,
            ResourceVein {
                area,
                claimed_by: None,
            },
        );
        id
    }

    /// Look up a vein.
    #[must_use]
    pub fn get(&self, id: VeinId) -> Option<&ResourceVein> {
        self.veins.get(&id)
    }

    /// Vein whose area is exactly `rect`.
    #[must_use]
    pub fn exact_match(&self, rect: &CellRect) -> Option<VeinId> {
        self.veins
            .iter()
            .find(|(_, vein)| vein.area == *rect)
            .map(|(&id, _)| id)
    }

    /// Vein containing `cell`.
    #[must_use]
    pub fn vein_at(&self, cell: GridCell) -> Option<VeinId> {
        self.veins
            .iter()
            .find(|(_, vein)| vein.area.contains(cell))
            .map(|(&id, _)| id)
    }

    /// Whether any vein shares a cell with `rect`.
    #[must_use]
    pub fn overlaps(&self, rect: &CellRect) -> bool {
        self.veins.values().any(|vein| vein.area.intersects(rect))
    }

    /// Whether `id` is held by an extractor.
    #[must_use]
    pub fn is_claimed(&self, id: VeinId) -> bool {
        self.veins
            .get(&id)
            .is_some_and(|vein| vein.claimed_by.is_some())
    }

    /// Hand `id` to `placement`. Fails if the vein is unknown or already held.
    pub fn claim(&mut self, id: VeinId, placement: PlacementId) -> bool {
        match self.veins.get_mut(&id) {
            Some(vein) if vein.claimed_by.is_none() => {
                vein.claimed_by = Some(placement);
                true
            }
            _ => false,
        }
    }

    /// Free any vein held by `placement`.
    pub fn release(&mut self, placement: PlacementId) -> Option<VeinId> {
        let (&id, vein) = self
            .veins
            .iter_mut()
            .find(|(_, vein)| vein.claimed_by == Some(placement))?;
        vein.claimed_by = None;
        Some(id)
    }

    /// Drop every claim. Used before recomputing claims from entities.
    pub fn clear_claims(&mut self) {
        for vein in self.veins.values_mut() {
            vein.claimed_by = None;
        }
    }

    /// Iterate veins in id order.
    pub fn iter(&self) -> impl Iterator<Item = (VeinId, &ResourceVein)> {
        self.veins.iter().map(|(&id, vein)| (id, vein))
    }

    /// Number of veins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.veins.len()
    }

    /// Whether there are no veins.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.veins.is_empty()
    }
}
