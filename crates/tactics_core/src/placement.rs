//! Placement records, request validation, and squad spawning.
//!
//! The [`PlacementRegistry`] owns every placement record and the spatial grid
//! the placements occupy. Requests go through [`PlacementRegistry::validate`]
//! before anything is charged or spawned; every check returns a
//! [`PlacementFailure`] rather than panicking, so a network adapter always has
//! a response to send back.
//!
//! # Index
//!
//! `placement id → record` is kept current at spawn, destroy, member death
//! and construction transitions. The entities remain the source of truth:
//! [`PlacementRegistry::rebuild_index`] recomputes the whole index from
//! placement tags and builder tasks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{Catalog, Collection, Descriptor, SiteRequirement, UnitTypeId};
use crate::config::PeerRole;
use crate::construction::{BuilderTask, ConstructionStateMachine, PendingConstruction};
use crate::coords::{Footprint, GridCell, GridLayout, Terrain};
use crate::economy::PlayerResources;
use crate::grid::{GridError, Occupant, SpatialGrid};
use crate::ids::{EntityId, IdAllocator, Owner, PlacementId, PlayerId, TeamId};
use crate::math::ceil_isqrt;
use crate::sites::{ResourceVeins, VeinId};
use crate::world::{Body, EntityParams, PlacementTag, Transform, World};

// ============================================================================
// Records and requests
// ============================================================================

/// A tracked occupant of the grid.
///
/// `squad_units` lists the live members in ascending id order. A placement
/// waiting for its builder has no members and names the builder in
/// `assigned_builder`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placement {
    /// Shared id of every member.
    pub placement_id: PlacementId,
    /// Owning team.
    pub team: TeamId,
    /// Owning player.
    pub player: PlayerId,
    /// Type id within `collection`.
    pub unit_type: UnitTypeId,
    /// Unit or building.
    pub collection: Collection,
    /// Requested anchor cell.
    pub grid_position: GridCell,
    /// Member entity ids, ascending.
    pub squad_units: Vec<EntityId>,
    /// Whether the building is still being constructed.
    pub under_construction: bool,
    /// Builder responsible for a pending or unfinished building.
    pub assigned_builder: Option<EntityId>,
}

impl Placement {
    /// Owning `(player, team)` pair.
    #[must_use]
    pub const fn owner(&self) -> Owner {
        Owner::new(self.player, self.team)
    }

    /// Whether the placement is still waiting for its builder to arrive.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.squad_units.is_empty() && self.assigned_builder.is_some()
    }
}

/// A request to place a unit squad or a building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlacementRequest {
    /// Id chosen by the authority; `None` asks the local allocator.
    pub placement_id: Option<PlacementId>,
    /// Unit or building.
    pub collection: Collection,
    /// Type id within `collection`.
    pub unit_type: UnitTypeId,
    /// Anchor cell.
    pub grid_position: Option<GridCell>,
    /// Builder ordered to construct the building.
    pub builder: Option<EntityId>,
}

impl PlacementRequest {
    /// Request a unit squad at `cell`.
    #[must_use]
    pub const fn unit(unit_type: UnitTypeId, cell: GridCell) -> Self {
        Self {
            placement_id: None,
            collection: Collection::Unit,
            unit_type,
            grid_position: Some(cell),
            builder: None,
        }
    }

    /// Request a building at `cell`.
    #[must_use]
    pub const fn building(unit_type: UnitTypeId, cell: GridCell) -> Self {
        Self {
            placement_id: None,
            collection: Collection::Building,
            unit_type,
            grid_position: Some(cell),
            builder: None,
        }
    }

    /// Have `builder` walk to the site and construct the building.
    #[must_use]
    pub const fn with_builder(mut self, builder: EntityId) -> Self {
        self.builder = Some(builder);
        self
    }

    /// Use an id allocated elsewhere.
    #[must_use]
    pub const fn with_id(mut self, placement_id: PlacementId) -> Self {
        self.placement_id = Some(placement_id);
        self
    }

    /// Rebuild the request an authoritative placement was created from.
    #[must_use]
    pub fn from_placement(placement: &Placement) -> Self {
        Self {
            placement_id: Some(placement.placement_id),
            collection: placement.collection,
            unit_type: placement.unit_type,
            grid_position: Some(placement.grid_position),
            builder: if placement.squad_units.is_empty() {
                placement.assigned_builder
            } else {
                None
            },
        }
    }
}

// ============================================================================
// Failures
// ============================================================================

/// Broad class of a [`PlacementFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// The request is not allowed right now. Expected during play.
    Validation,
    /// The peers or the catalog disagree. Should never happen.
    InternalInconsistency,
}

/// Why a placement operation did not happen.
///
/// State is unchanged whenever one of these is returned, except where a
/// variant says otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum PlacementFailure {
    /// The player cannot pay the gold cost.
    #[error("insufficient funds: {required} gold required, {available} available")]
    InsufficientFunds {
        /// Gold cost.
        required: u32,
        /// Gold on hand.
        available: u32,
    },

    /// The squad would exceed the player's supply cap.
    #[error("supply capped: {required} supply required, {available} available")]
    SupplyCapped {
        /// Supply cost.
        required: u32,
        /// Supply still free.
        available: u32,
    },

    /// The request has no grid position.
    #[error("no target position given")]
    MissingTarget,

    /// The catalog has no such type.
    #[error("unknown {collection:?} type {}", .unit_type.0)]
    UnknownType {
        /// Collection searched.
        collection: Collection,
        /// Type id requested.
        unit_type: UnitTypeId,
    },

    /// Some target cells are already taken.
    #[error("target location is occupied")]
    CellsOccupied {
        /// The blocking cells.
        cells: Vec<GridCell>,
    },

    /// Part of the footprint lies off the battlefield.
    #[error("cell ({}, {}) is outside the battlefield", .cell.x, .cell.z)]
    OutOfBounds {
        /// First offending cell.
        cell: GridCell,
    },

    /// An extractor must sit exactly on a free resource vein.
    #[error("extractor must be placed exactly on an unclaimed resource vein")]
    SiteRequiresVein,

    /// Only extractors may be built on resource veins.
    #[error("cannot build on a resource vein")]
    SiteOnVein,

    /// The builder entity does not exist.
    #[error("builder {0} not found")]
    BuilderNotFound(EntityId),

    /// The entity cannot construct buildings, or belongs to someone else.
    #[error("entity {0} cannot build for this player")]
    NotABuilder(EntityId),

    /// The builder already has a construction task.
    #[error("builder {0} is already assigned a construction")]
    BuilderBusy(EntityId),

    /// The builder has nothing to materialize or cancel.
    #[error("builder {0} has no pending construction")]
    NoPendingBuild(EntityId),

    /// Materialization was requested twice.
    #[error("builder {builder} already materialized building {building}")]
    AlreadyMaterialized {
        /// Builder entity.
        builder: EntityId,
        /// Building entity created by the first call.
        building: EntityId,
    },

    /// The building has not been materialized yet.
    #[error("placement {0} has not been materialized")]
    NotMaterialized(PlacementId),

    /// This peer may not allocate placement ids.
    #[error("this peer cannot allocate placement ids")]
    NotAuthoritative,

    /// A supplied placement id is `0` or the reserved `u32::MAX`.
    #[error("placement id is missing or invalid")]
    MissingPlacementId,

    /// No placement carries this id.
    #[error("unknown placement {0}")]
    UnknownPlacement(PlacementId),

    /// A remote spawn supplied the wrong number of entity ids.
    #[error("expected {expected} entity ids, got {actual}")]
    EntityCountMismatch {
        /// Members the descriptor calls for.
        expected: usize,
        /// Ids supplied.
        actual: usize,
    },

    /// A remote spawn reuses a live (or invalid) entity id.
    #[error("entity id {0} is already in use")]
    EntityIdInUse(EntityId),

    /// A remote spawn reuses a live placement id.
    #[error("placement id {0} is already in use")]
    DuplicatePlacementId(PlacementId),
}

impl PlacementFailure {
    /// Broad class of the failure.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::InsufficientFunds { .. }
            | Self::SupplyCapped { .. }
            | Self::MissingTarget
            | Self::CellsOccupied { .. }
            | Self::OutOfBounds { .. }
            | Self::SiteRequiresVein
            | Self::SiteOnVein
            | Self::BuilderNotFound(_)
            | Self::NotABuilder(_)
            | Self::BuilderBusy(_)
            | Self::NoPendingBuild(_)
            | Self::NotMaterialized(_)
            | Self::UnknownPlacement(_) => FailureKind::Validation,
            Self::UnknownType { .. }
            | Self::AlreadyMaterialized { .. }
            | Self::NotAuthoritative
            | Self::MissingPlacementId
            | Self::EntityCountMismatch { .. }
            | Self::EntityIdInUse(_)
            | Self::DuplicatePlacementId(_) => FailureKind::InternalInconsistency,
        }
    }

    /// Display-ready reason text.
    #[must_use]
    pub fn reason(&self) -> String {
        self.to_string()
    }

    /// Stable numeric code used on the wire.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::InsufficientFunds { .. } => 1,
            Self::SupplyCapped { .. } => 2,
            Self::MissingTarget => 3,
            Self::UnknownType { .. } => 4,
            Self::CellsOccupied { .. } => 5,
            Self::OutOfBounds { .. } => 6,
            Self::SiteRequiresVein => 7,
            Self::SiteOnVein => 8,
            Self::BuilderNotFound(_) => 9,
            Self::NotABuilder(_) => 10,
            Self::BuilderBusy(_) => 11,
            Self::NoPendingBuild(_) => 12,
            Self::AlreadyMaterialized { .. } => 13,
            Self::NotMaterialized(_) => 14,
            Self::NotAuthoritative => 15,
            Self::MissingPlacementId => 16,
            Self::UnknownPlacement(_) => 17,
            Self::EntityCountMismatch { .. } => 18,
            Self::EntityIdInUse(_) => 19,
            Self::DuplicatePlacementId(_) => 20,
        }
    }
}

impl From<GridError> for PlacementFailure {
    fn from(err: GridError) -> Self {
        match err {
            GridError::OutOfBounds(cell) => Self::OutOfBounds { cell },
        }
    }
}

// ============================================================================
// Formation
// ============================================================================

/// Anchor cells of `count` squad members around `anchor`.
///
/// Members fill a near-square grid (`ceil(sqrt(count))` columns) in row-major
/// index order, each slot one footprint wide, with the block centred on
/// `anchor`. A single member always sits on `anchor` itself.
#[must_use]
pub fn formation(anchor: GridCell, footprint: Footprint, count: u32) -> Vec<GridCell> {
    if count == 0 {
        return Vec::new();
    }

    let cols = ceil_isqrt(count);
    let rows = count.div_ceil(cols);
    let fw = footprint.width as i32;
    let fd = footprint.depth as i32;
    let origin = anchor.offset(-((cols as i32 * fw) / 2), -((rows as i32 * fd) / 2));

    (0..count)
        .map(|i| {
            let col = (i % cols) as i32;
            let row = (i / cols) as i32;
            origin.offset(col * fw + fw / 2, row * fd + fd / 2)
        })
        .collect()
}

/// A request resolved against the catalog: what would be spawned, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementPlan {
    /// Resolved descriptor.
    pub descriptor: Descriptor,
    /// Requested anchor cell.
    pub anchor: GridCell,
    /// Anchor cell of each member, in member index order.
    pub member_anchors: Vec<GridCell>,
    /// Every cell the placement would cover.
    pub cells: Vec<GridCell>,
    /// Vein an extractor would stand on.
    pub vein: Option<VeinId>,
}

/// What [`PlacementRegistry::prune_dead`] removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Placements whose last member died.
    pub destroyed: Vec<Placement>,
    /// Pending builds whose builder is gone.
    pub orphaned: Vec<Placement>,
}

impl PruneReport {
    /// Whether nothing was removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.destroyed.is_empty() && self.orphaned.is_empty()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Allocates placement ids, creates and destroys placement entities, and
/// validates placement requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementRegistry {
    catalog: Catalog,
    grid: SpatialGrid,
    veins: ResourceVeins,
    terrain: Terrain,
    /// Present only on the authoritative peer.
    allocator: Option<IdAllocator>,
    /// Highest id ever assigned here, kept on replicas too so a promoted
    /// peer never hands out an id that was destroyed before promotion.
    high_water: PlacementId,
    placements: BTreeMap<PlacementId, Placement>,
}

impl PlacementRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(catalog: Catalog, layout: GridLayout, role: PeerRole) -> Self {
        Self {
            catalog,
            grid: SpatialGrid::new(layout),
            veins: ResourceVeins::new(),
            terrain: Terrain::default(),
            allocator: match role {
                PeerRole::Authoritative => Some(IdAllocator::new()),
                PeerRole::Replica => None,
            },
            high_water: PlacementId::INVALID,
            placements: BTreeMap::new(),
        }
    }

    /// Replace the terrain height source.
    #[must_use]
    pub fn with_terrain(mut self, terrain: Terrain) -> Self {
        self.terrain = terrain;
        self
    }

    /// Replace the resource veins.
    #[must_use]
    pub fn with_veins(mut self, veins: ResourceVeins) -> Self {
        self.veins = veins;
        self
    }

    /// Switch roles. A new authority resumes allocating past every id this
    /// registry has ever assigned, live or destroyed.
    pub fn set_role(&mut self, role: PeerRole) {
        self.allocator = match role {
            PeerRole::Authoritative => {
                let mut allocator = self.allocator.take().unwrap_or_default();
                allocator.observe(self.high_water);
                if let Some(&last) = self.placements.keys().next_back() {
                    allocator.observe(last);
                }
                Some(allocator)
            }
            PeerRole::Replica => None,
        };
    }

    /// Whether this registry may allocate ids.
    #[must_use]
    pub const fn is_authoritative(&self) -> bool {
        self.allocator.is_some()
    }

    /// Descriptor table.
    #[must_use]
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Occupancy index.
    #[must_use]
    pub const fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    /// Mutable occupancy index.
    pub fn grid_mut(&mut self) -> &mut SpatialGrid {
        &mut self.grid
    }

    /// Grid dimensions and coordinate mapping.
    #[must_use]
    pub const fn layout(&self) -> &GridLayout {
        self.grid.layout()
    }

    /// Terrain height source.
    #[must_use]
    pub const fn terrain(&self) -> &Terrain {
        &self.terrain
    }

    /// Resource veins.
    #[must_use]
    pub const fn veins(&self) -> &ResourceVeins {
        &self.veins
    }

    /// Allocate the next placement id.
    ///
    /// Ids are strictly increasing from 1. Replicas have no allocator.
    pub fn allocate_id(&mut self) -> Result<PlacementId, PlacementFailure> {
        let id = self
            .allocator
            .as_mut()
            .map(IdAllocator::allocate)
            .ok_or(PlacementFailure::NotAuthoritative)?;
        self.high_water = self.high_water.max(id);
        Ok(id)
    }

    /// The id the next allocation would return, if this peer allocates.
    #[must_use]
    pub fn peek_id(&self) -> Option<PlacementId> {
        self.allocator.as_ref().map(IdAllocator::peek)
    }

    // ------------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------------

    /// Resolve a request into the cells it would cover, without checking them.
    pub fn plan(&self, request: &PlacementRequest) -> Result<PlacementPlan, PlacementFailure> {
        let anchor = request
            .grid_position
            .ok_or(PlacementFailure::MissingTarget)?;
        let descriptor = self
            .catalog
            .resolve(request.collection, request.unit_type)
            .ok_or(PlacementFailure::UnknownType {
                collection: request.collection,
                unit_type: request.unit_type,
            })?;

        let footprint = descriptor.footprint();
        let member_anchors = formation(anchor, footprint, descriptor.squad_size());
        let cells = member_anchors
            .iter()
            .flat_map(|&member| footprint.cells_at(member))
            .collect();

        let vein = match descriptor {
            Descriptor::Building(building) if building.site == SiteRequirement::ResourceVein => {
                self.veins.exact_match(&footprint.rect_at(anchor))
            }
            _ => None,
        };

        Ok(PlacementPlan {
            descriptor: descriptor.clone(),
            anchor,
            member_anchors,
            cells,
            vein,
        })
    }

    /// Run every placement check in order, stopping at the first failure.
    ///
    /// 1. gold cost against funds
    /// 2. supply against the cap (units only)
    /// 3. target position and type present
    /// 4. cells on the grid and free
    /// 5. site constraints (resource veins)
    ///
    /// Building requests with a builder additionally require an idle builder
    /// owned by the requesting player. Nothing is mutated.
    pub fn validate(
        &self,
        world: &World,
        request: &PlacementRequest,
        owner: Owner,
        resources: PlayerResources,
    ) -> Result<PlacementPlan, PlacementFailure> {
        if let Some(descriptor) = self.catalog.resolve(request.collection, request.unit_type) {
            let cost = descriptor.cost();
            if !resources.can_afford(cost) {
                return Err(PlacementFailure::InsufficientFunds {
                    required: cost.gold,
                    available: resources.gold,
                });
            }
            if !descriptor.is_building() && cost.supply > resources.supply_available() {
                return Err(PlacementFailure::SupplyCapped {
                    required: cost.supply,
                    available: resources.supply_available(),
                });
            }
        }

        let plan = self.plan(request)?;
        self.check_cells(&plan.cells, owner.team)?;
        self.check_site(&plan)?;

        if plan.descriptor.is_building() {
            if let Some(builder) = request.builder {
                Self::check_builder(world, builder, owner)?;
            }
        }

        Ok(plan)
    }

    fn check_cells(&self, cells: &[GridCell], team: TeamId) -> Result<(), PlacementFailure> {
        if self.grid.is_valid_placement(cells, team) {
            return Ok(());
        }
        if let Some(&cell) = cells.iter().find(|&&c| !self.layout().in_bounds(c)) {
            return Err(PlacementFailure::OutOfBounds { cell });
        }
        Err(PlacementFailure::CellsOccupied {
            cells: self.grid.occupied_among(cells),
        })
    }

    /// Like `check_cells`, but the arriving builder stands on its own site.
    fn check_cells_around(&self, cells: &[GridCell], builder: EntityId) -> Result<(), PlacementFailure> {
        if let Some(&cell) = cells.iter().find(|&&c| !self.layout().in_bounds(c)) {
            return Err(PlacementFailure::OutOfBounds { cell });
        }
        let blocked = self.grid.occupied_by_others(cells, builder);
        if blocked.is_empty() {
            Ok(())
        } else {
            Err(PlacementFailure::CellsOccupied { cells: blocked })
        }
    }

    fn check_site(&self, plan: &PlacementPlan) -> Result<(), PlacementFailure> {
        let Descriptor::Building(building) = &plan.descriptor else {
            return Ok(());
        };
        match building.site {
            SiteRequirement::ResourceVein => match plan.vein {
                Some(vein) if !self.veins.is_claimed(vein) => Ok(()),
                _ => Err(PlacementFailure::SiteRequiresVein),
            },
            SiteRequirement::Open => {
                if self.veins.overlaps(&building.footprint.rect_at(plan.anchor)) {
                    Err(PlacementFailure::SiteOnVein)
                } else {
                    Ok(())
                }
            }
        }
    }

    fn check_builder(world: &World, builder: EntityId, owner: Owner) -> Result<(), PlacementFailure> {
        let entity = world
            .get(builder)
            .ok_or(PlacementFailure::BuilderNotFound(builder))?;
        let capability = entity
            .builder
            .as_ref()
            .ok_or(PlacementFailure::NotABuilder(builder))?;
        if entity
            .placement
            .is_some_and(|tag| tag.owner.player != owner.player)
        {
            return Err(PlacementFailure::NotABuilder(builder));
        }
        if capability.task.is_some() {
            return Err(PlacementFailure::BuilderBusy(builder));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Spawning
    // ------------------------------------------------------------------------

    /// Create the placement described by `request`.
    ///
    /// Members are created in index order. With `external_ids` the supplied
    /// ids are used verbatim and the world's allocator is never consulted.
    /// A building with a builder creates no entity: a pending construction is
    /// attached to the builder and a member-less placeholder is returned.
    ///
    /// Cost is not charged here and occupancy is not re-checked; call
    /// [`validate`](Self::validate) first on the authoritative path.
    pub fn spawn_squad(
        &mut self,
        world: &mut World,
        request: &PlacementRequest,
        owner: Owner,
        external_ids: Option<&[EntityId]>,
    ) -> Result<Placement, PlacementFailure> {
        let plan = self.plan(request)?;
        self.check_placement_id(request.placement_id)?;

        if let (Descriptor::Building(building), Some(builder)) = (&plan.descriptor, request.builder) {
            Self::check_builder(world, builder, owner)?;
            let placement_id = self.assign_id(request.placement_id)?;
            let pending = PendingConstruction {
                placement_id,
                owner,
                unit_type: request.unit_type,
                collection: request.collection,
                grid_position: plan.anchor,
                build_time: building.build_time,
                cost: plan.descriptor.cost(),
            };
            ConstructionStateMachine::setup_pending_build(world, self, builder, pending)?;

            let placeholder = Placement {
                placement_id,
                team: owner.team,
                player: owner.player,
                unit_type: request.unit_type,
                collection: request.collection,
                grid_position: plan.anchor,
                squad_units: Vec::new(),
                under_construction: true,
                assigned_builder: Some(builder),
            };
            self.placements.insert(placement_id, placeholder.clone());
            tracing::info!(
                placement_id = placement_id.0,
                builder,
                x = plan.anchor.x,
                z = plan.anchor.z,
                "Construction pending"
            );
            return Ok(placeholder);
        }

        if let Some(&cell) = plan.cells.iter().find(|&&c| !self.layout().in_bounds(c)) {
            return Err(PlacementFailure::OutOfBounds { cell });
        }
        Self::check_external_ids(world, plan.member_anchors.len(), external_ids)?;

        let placement_id = self.assign_id(request.placement_id)?;
        let squad_units = self.spawn_members(world, placement_id, owner, &plan, external_ids, false)?;
        if let Some(vein) = plan.vein {
            self.veins.claim(vein, placement_id);
        }

        let placement = Placement {
            placement_id,
            team: owner.team,
            player: owner.player,
            unit_type: request.unit_type,
            collection: request.collection,
            grid_position: plan.anchor,
            squad_units,
            under_construction: false,
            assigned_builder: None,
        };
        self.placements.insert(placement_id, placement.clone());
        tracing::info!(
            placement_id = placement_id.0,
            members = placement.squad_units.len(),
            x = plan.anchor.x,
            z = plan.anchor.z,
            "Placement spawned"
        );
        Ok(placement)
    }

    /// Create one entity per member of `plan` and reserve its cells.
    ///
    /// Returns the member ids in ascending order. `external_ids`, when given,
    /// must already have been checked against the world.
    pub fn spawn_members(
        &mut self,
        world: &mut World,
        placement_id: PlacementId,
        owner: Owner,
        plan: &PlacementPlan,
        external_ids: Option<&[EntityId]>,
        under_construction: bool,
    ) -> Result<Vec<EntityId>, PlacementFailure> {
        Self::check_external_ids(world, plan.member_anchors.len(), external_ids)?;

        let descriptor = &plan.descriptor;
        let footprint = descriptor.footprint();
        let collection = descriptor.collection();
        let can_build = matches!(descriptor, Descriptor::Unit(unit) if unit.can_build);

        let mut members = Vec::with_capacity(plan.member_anchors.len());
        for (index, &anchor) in plan.member_anchors.iter().enumerate() {
            let position = self.layout().footprint_center(anchor, footprint);
            let params = EntityParams {
                transform: Some(Transform::new(position, self.terrain.height_at(anchor))),
                body: Some(Body {
                    collection,
                    footprint,
                }),
                placement: Some(PlacementTag {
                    placement_id,
                    owner,
                    unit_type: descriptor.type_id(),
                    collection,
                    grid_position: plan.anchor,
                    under_construction,
                }),
                can_build,
            };

            let id = match external_ids {
                Some(ids) => {
                    let id = ids[index];
                    if !world.spawn_with_id(id, params) {
                        return Err(PlacementFailure::EntityIdInUse(id));
                    }
                    id
                }
                None => world.spawn(params),
            };

            self.grid.reserve(
                &footprint.cells_at(anchor),
                Occupant::new(id, position, collection),
            )?;
            members.push(id);
        }

        members.sort_unstable();
        Ok(members)
    }

    /// Re-check a pending build's site and create its building entity.
    ///
    /// Used by the construction state machine when the builder arrives. Cells
    /// held only by `builder` do not block: it shares the footprint with the
    /// new building until it walks off.
    pub(crate) fn materialize_site(
        &mut self,
        world: &mut World,
        pending: &PendingConstruction,
        builder: EntityId,
    ) -> Result<Placement, PlacementFailure> {
        let request = pending.request();
        let plan = self.plan(&request)?;
        self.check_cells_around(&plan.cells, builder)?;
        self.check_site(&plan)?;

        let squad_units = self.spawn_members(
            world,
            pending.placement_id,
            pending.owner,
            &plan,
            None,
            true,
        )?;
        if let Some(vein) = plan.vein {
            self.veins.claim(vein, pending.placement_id);
        }

        let placement = self
            .placements
            .entry(pending.placement_id)
            .or_insert_with(|| Placement {
                placement_id: pending.placement_id,
                team: pending.owner.team,
                player: pending.owner.player,
                unit_type: pending.unit_type,
                collection: pending.collection,
                grid_position: pending.grid_position,
                squad_units: Vec::new(),
                under_construction: true,
                assigned_builder: Some(builder),
            });
        placement.squad_units = squad_units;
        placement.under_construction = true;
        placement.assigned_builder = Some(builder);
        Ok(placement.clone())
    }

    fn check_placement_id(&self, placement_id: Option<PlacementId>) -> Result<(), PlacementFailure> {
        match placement_id {
            Some(id) if !id.is_valid() => Err(PlacementFailure::MissingPlacementId),
            Some(id) if self.placements.contains_key(&id) => {
                Err(PlacementFailure::DuplicatePlacementId(id))
            }
            Some(_) => Ok(()),
            None if self.is_authoritative() => Ok(()),
            None => Err(PlacementFailure::NotAuthoritative),
        }
    }

    fn assign_id(&mut self, placement_id: Option<PlacementId>) -> Result<PlacementId, PlacementFailure> {
        let id = match placement_id {
            Some(id) => {
                if let Some(allocator) = self.allocator.as_mut() {
                    allocator.observe(id);
                }
                id
            }
            None => self.allocate_id()?,
        };
        self.high_water = self.high_water.max(id);
        Ok(id)
    }

    /// Highest placement id this registry has assigned or replayed.
    #[must_use]
    pub const fn high_water(&self) -> PlacementId {
        self.high_water
    }

    fn check_external_ids(
        world: &World,
        expected: usize,
        external_ids: Option<&[EntityId]>,
    ) -> Result<(), PlacementFailure> {
        let Some(ids) = external_ids else {
            return Ok(());
        };
        if ids.len() != expected {
            return Err(PlacementFailure::EntityCountMismatch {
                expected,
                actual: ids.len(),
            });
        }
        for (index, &id) in ids.iter().enumerate() {
            let reserved = id == 0 || id == EntityId::MAX;
            if reserved || world.contains(id) || ids[..index].contains(&id) {
                return Err(PlacementFailure::EntityIdInUse(id));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Remove a placement: release its cells, despawn its members, free any
    /// claimed vein, and clear the builder task that refers to it.
    pub fn destroy(
        &mut self,
        world: &mut World,
        placement_id: PlacementId,
    ) -> Result<Placement, PlacementFailure> {
        let placement = self
            .placements
            .remove(&placement_id)
            .ok_or(PlacementFailure::UnknownPlacement(placement_id))?;

        for &member in &placement.squad_units {
            self.grid.release(member);
            world.despawn(member);
        }
        self.veins.release(placement_id);
        if let Some(builder) = placement.assigned_builder {
            clear_builder_task(world, builder, placement_id);
        }

        tracing::info!(placement_id = placement_id.0, "Placement destroyed");
        Ok(placement)
    }

    /// Drop the record of a pending build that never materialized.
    pub fn forget_pending(&mut self, placement_id: PlacementId) -> Option<Placement> {
        match self.placements.get(&placement_id) {
            Some(placement) if placement.squad_units.is_empty() => {
                self.placements.remove(&placement_id)
            }
            _ => None,
        }
    }

    /// Mark a materialized building finished and release its builder.
    pub fn complete(
        &mut self,
        world: &mut World,
        placement_id: PlacementId,
    ) -> Result<Placement, PlacementFailure> {
        let placement = self
            .placements
            .get_mut(&placement_id)
            .ok_or(PlacementFailure::UnknownPlacement(placement_id))?;
        if placement.squad_units.is_empty() {
            return Err(PlacementFailure::NotMaterialized(placement_id));
        }

        for &member in &placement.squad_units {
            if let Some(tag) = world.get_mut(member).and_then(|e| e.placement.as_mut()) {
                tag.under_construction = false;
            }
        }
        if let Some(builder) = placement.assigned_builder.take() {
            clear_builder_task(world, builder, placement_id);
        }
        placement.under_construction = false;

        tracing::info!(placement_id = placement_id.0, "Construction completed");
        Ok(placement.clone())
    }

    /// Drop dead members from every record.
    ///
    /// Placements with no members left are destroyed. Pending builds whose
    /// builder is gone, or no longer carries the task, are reported as
    /// orphaned so their cost can be refunded. A building whose builder is
    /// gone keeps standing without one.
    pub fn prune_dead(&mut self, world: &mut World) -> PruneReport {
        let mut report = PruneReport::default();
        let ids: Vec<PlacementId> = self.placements.keys().copied().collect();

        for placement_id in ids {
            let Some(placement) = self.placements.get_mut(&placement_id) else {
                continue;
            };

            let builder_holds_task = placement
                .assigned_builder
                .is_some_and(|builder| holds_task(world, builder, placement_id));

            if placement.squad_units.is_empty() {
                if !builder_holds_task {
                    if let Some(orphan) = self.placements.remove(&placement_id) {
                        tracing::info!(placement_id = placement_id.0, "Pending build orphaned");
                        report.orphaned.push(orphan);
                    }
                }
                continue;
            }

            if !builder_holds_task {
                placement.assigned_builder = None;
            }

            let grid = &mut self.grid;
            placement.squad_units.retain(|&member| {
                let alive = world.contains(member);
                if !alive {
                    grid.release(member);
                }
                alive
            });

            if placement.squad_units.is_empty() {
                if let Ok(destroyed) = self.destroy(world, placement_id) {
                    report.destroyed.push(destroyed);
                }
            }
        }

        report
    }

    /// Recompute the index from placement-tagged entities and builder tasks.
    ///
    /// Vein claims are recomputed too, and the allocator is moved past every
    /// id found or previously assigned.
    pub fn rebuild_index(&mut self, world: &World) {
        let mut placements: BTreeMap<PlacementId, Placement> = BTreeMap::new();

        for id in world.sorted_ids() {
            let Some(tag) = world.get(id).and_then(|e| e.placement) else {
                continue;
            };
            let record = placements
                .entry(tag.placement_id)
                .or_insert_with(|| Placement {
                    placement_id: tag.placement_id,
                    team: tag.owner.team,
                    player: tag.owner.player,
                    unit_type: tag.unit_type,
                    collection: tag.collection,
                    grid_position: tag.grid_position,
                    squad_units: Vec::new(),
                    under_construction: false,
                    assigned_builder: None,
                });
            record.squad_units.push(id);
            record.under_construction |= tag.under_construction;
        }

        for id in world.sorted_ids() {
            let Some(task) = world
                .get(id)
                .and_then(|e| e.builder.as_ref())
                .and_then(|b| b.task.as_ref())
            else {
                continue;
            };
            match task {
                BuilderTask::Pending(pending) => {
                    placements.insert(
                        pending.placement_id,
                        Placement {
                            placement_id: pending.placement_id,
                            team: pending.owner.team,
                            player: pending.owner.player,
                            unit_type: pending.unit_type,
                            collection: pending.collection,
                            grid_position: pending.grid_position,
                            squad_units: Vec::new(),
                            under_construction: true,
                            assigned_builder: Some(id),
                        },
                    );
                }
                BuilderTask::Constructing { order, .. } => {
                    if let Some(record) = placements.get_mut(&order.placement_id) {
                        record.assigned_builder = Some(id);
                    }
                }
            }
        }

        self.veins.clear_claims();
        for placement in placements.values() {
            if placement.squad_units.is_empty() {
                continue;
            }
            if let Some(Descriptor::Building(building)) =
                self.catalog.resolve(placement.collection, placement.unit_type)
            {
                if building.site == SiteRequirement::ResourceVein {
                    let rect = building.footprint.rect_at(placement.grid_position);
                    if let Some(vein) = self.veins.exact_match(&rect) {
                        self.veins.claim(vein, placement.placement_id);
                    }
                }
            }
        }

        if let Some(&last) = placements.keys().next_back() {
            self.high_water = self.high_water.max(last);
        }
        if let Some(allocator) = self.allocator.as_mut() {
            allocator.observe(self.high_water);
        }

        self.placements = placements;
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Look up a placement.
    #[must_use]
    pub fn placement_by_id(&self, placement_id: PlacementId) -> Option<&Placement> {
        self.placements.get(&placement_id)
    }

    /// Every placement owned by `team`, in id order.
    #[must_use]
    pub fn placements_for_side(&self, team: TeamId) -> Vec<&Placement> {
        self.placements
            .values()
            .filter(|placement| placement.team == team)
            .collect()
    }

    /// Every placement, in id order.
    pub fn placements(&self) -> impl Iterator<Item = &Placement> {
        self.placements.values()
    }

    /// Number of live placements (pending builds included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.placements.len()
    }

    /// Whether there are no placements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }
}

/// Clear `builder`'s task if it refers to `placement_id`.
fn holds_task(world: &World, builder: EntityId, placement_id: PlacementId) -> bool {
    world
        .get(builder)
        .and_then(|e| e.builder.as_ref())
        .and_then(|b| b.task.as_ref())
        .is_some_and(|task| task.placement_id() == placement_id)
}

fn clear_builder_task(world: &mut World, builder: EntityId, placement_id: PlacementId) {
    let Some(entity) = world.get_mut(builder) else {
        return;
    };
    let Some(capability) = entity.builder.as_mut() else {
        return;
    };
    if capability
        .task
        .as_ref()
        .is_some_and(|task| task.placement_id() == placement_id)
    {
        capability.task = None;
        entity.move_order = None;
    }
}
