//! # Tactics Core
//!
//! Deterministic placement and spatial-indexing core for a lock-step tactics
//! game.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No networking
//! - No system randomness
//! - No floating-point math (uses fixed-point)
//!
//! Two peers that feed the same commands to a [`Battlefield`] in the same
//! order reach the same [`Battlefield::state_hash`] after every step. The
//! authoritative peer allocates placement ids; replicas replay the
//! authority's placements with the ids and member entity ids it chose.
//!
//! ## Crate Structure
//!
//! - [`grid`] - Cell occupancy index and radius queries
//! - [`placement`] - Placement records, validation, and squad spawning
//! - [`construction`] - Pending → under construction → complete lifecycle
//! - [`adjacency`] - Free-cell search around buildings
//! - [`battlefield`] - One match: world, registry, ledger, and step loop
//! - [`replay`] - Command recording and playback
//! - [`wire`] - Binary encoding of placements and responses
//!
//! [`Battlefield`]: battlefield::Battlefield
//! [`Battlefield::state_hash`]: battlefield::Battlefield::state_hash

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod adjacency;
pub mod battlefield;
pub mod catalog;
pub mod config;
pub mod construction;
pub mod coords;
pub mod economy;
pub mod error;
pub mod grid;
pub mod ids;
pub mod math;
pub mod placement;
pub mod replay;
pub mod sites;
pub mod wire;
pub mod world;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::adjacency::{AdjacencySearch, Side};
    pub use crate::battlefield::{Battlefield, StepReport};
    pub use crate::catalog::{
        BuildingDescriptor, Catalog, CatalogData, Collection, Cost, Descriptor, SiteRequirement,
        UnitDescriptor, UnitTypeId,
    };
    pub use crate::config::{BattlefieldConfig, PeerRole, PlayerSetup, VeinData};
    pub use crate::construction::{
        BuilderTask, ConstructionEvent, ConstructionMessage, ConstructionStateMachine,
        PendingConstruction,
    };
    pub use crate::coords::{CellKey, CellRect, Footprint, GridCell, GridLayout, Terrain};
    pub use crate::economy::{Economy, PlayerResources, Treasury};
    pub use crate::error::{GameError, Result};
    pub use crate::grid::{GridError, Occupant, SpatialGrid, UpdateStats};
    pub use crate::ids::{EntityId, Owner, PlacementId, PlayerId, TeamId};
    pub use crate::math::{Fixed, Vec2Fixed};
    pub use crate::placement::{
        formation, FailureKind, Placement, PlacementFailure, PlacementRegistry, PlacementRequest,
        PruneReport,
    };
    pub use crate::replay::{Command, Replay, ReplayPlayer, ReplayRecorder};
    pub use crate::wire::PlacementResponse;
    pub use crate::world::World;
}
