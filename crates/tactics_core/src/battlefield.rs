//! The placement core of one match.
//!
//! A [`Battlefield`] owns the entity world, the placement registry (and with
//! it the spatial grid), the player ledger, and the construction inbox. Every
//! mutation goes through it so that charging, spawning, and refunding stay
//! paired.
//!
//! # Step Order
//!
//! Each [`Battlefield::step`] runs, in order:
//!
//! 1. Construction messages, oldest first
//! 2. Spatial grid refresh from entity transforms
//! 3. Pruning of dead members and orphaned pending builds
//!
//! Commands issued between two steps are applied immediately, in the order
//! they are issued. Two peers that issue the same commands in the same order
//! end every step with the same [`Battlefield::state_hash`].

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::adjacency::AdjacencySearch;
use crate::catalog::{Catalog, Collection, Cost, UnitTypeId};
use crate::config::{BattlefieldConfig, PeerRole};
use crate::construction::{
    ConstructionEvent, ConstructionMessage, ConstructionStateMachine, PendingConstruction,
};
use crate::coords::{Footprint, GridCell};
use crate::economy::{Economy, PlayerResources, Treasury};
use crate::error::{GameError, Result};
use crate::grid::{SpatialGrid, UpdateStats};
use crate::ids::{EntityId, Owner, PlacementId, PlayerId, TeamId};
use crate::math::{Fixed, Vec2Fixed};
use crate::placement::{
    FailureKind, Placement, PlacementFailure, PlacementRegistry, PlacementRequest, PruneReport,
};
use crate::world::{Body, EntityParams, Transform, World};

/// What happened during one [`Battlefield::step`].
#[derive(Debug, Clone, Default)]
pub struct StepReport {
    /// Tick reached by this step.
    pub tick: u64,
    /// Outcome of every construction message, in arrival order.
    pub construction: Vec<ConstructionEvent>,
    /// Grid refresh counters.
    pub grid: UpdateStats,
    /// Placements whose last member died.
    pub destroyed: Vec<Placement>,
    /// Pending builds refunded because their builder is gone.
    pub orphaned: Vec<Placement>,
}

/// World, registry, ledger, and construction inbox of one match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Battlefield {
    config: BattlefieldConfig,
    tick: u64,
    world: World,
    registry: PlacementRegistry,
    economy: Economy,
    construction: ConstructionStateMachine,
}

impl Battlefield {
    /// Create a battlefield from a validated config and a descriptor table.
    ///
    /// Every configured player starts with the configured gold and supply
    /// cap.
    pub fn new(config: BattlefieldConfig, catalog: Catalog) -> Result<Self> {
        config.validate()?;

        let registry = PlacementRegistry::new(catalog, config.layout(), config.role)
            .with_terrain(config.terrain())
            .with_veins(config.resource_veins());

        let mut economy = Economy::new();
        for setup in &config.players {
            economy.set_player(
                PlayerId(setup.player),
                PlayerResources::new(config.starting_gold, config.starting_supply_cap),
            );
        }

        tracing::info!(
            width = config.grid_width,
            depth = config.grid_depth,
            players = config.players.len(),
            veins = config.veins.len(),
            role = ?config.role,
            "Battlefield created"
        );

        Ok(Self {
            config,
            tick: 0,
            world: World::new(),
            registry,
            economy,
            construction: ConstructionStateMachine::new(),
        })
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Number of completed steps.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Match settings.
    #[must_use]
    pub const fn config(&self) -> &BattlefieldConfig {
        &self.config
    }

    /// Entity storage.
    #[must_use]
    pub const fn world(&self) -> &World {
        &self.world
    }

    /// Placement registry.
    #[must_use]
    pub const fn registry(&self) -> &PlacementRegistry {
        &self.registry
    }

    /// Occupancy index.
    #[must_use]
    pub const fn grid(&self) -> &SpatialGrid {
        self.registry.grid()
    }

    /// Player ledger.
    #[must_use]
    pub const fn economy(&self) -> &Economy {
        &self.economy
    }

    /// Current funds of `player`.
    #[must_use]
    pub fn resources(&self, player: PlayerId) -> PlayerResources {
        self.economy.resources(player)
    }

    /// Register (or reset) a player's funds.
    pub fn set_resources(&mut self, player: PlayerId, resources: PlayerResources) {
        self.economy.set_player(player, resources);
    }

    /// Construction messages waiting for the next step.
    pub fn pending_messages(&self) -> impl Iterator<Item = &ConstructionMessage> {
        self.construction.pending_messages()
    }

    /// Look up a placement.
    #[must_use]
    pub fn placement_by_id(&self, placement_id: PlacementId) -> Option<&Placement> {
        self.registry.placement_by_id(placement_id)
    }

    /// Every placement owned by `team`, in id order.
    #[must_use]
    pub fn placements_for_side(&self, team: TeamId) -> Vec<&Placement> {
        self.registry.placements_for_side(team)
    }

    // ------------------------------------------------------------------------
    // Placement
    // ------------------------------------------------------------------------

    /// Validate, charge, and spawn a placement on behalf of `owner`.
    ///
    /// On any failure nothing is charged and nothing is spawned.
    pub fn submit(
        &mut self,
        request: PlacementRequest,
        owner: Owner,
    ) -> std::result::Result<Placement, PlacementFailure> {
        let resources = self.economy.resources(owner.player);
        let plan = self
            .registry
            .validate(&self.world, &request, owner, resources)
            .map_err(|failure| {
                log_failure("submit", &failure);
                failure
            })?;

        let cost = plan.descriptor.cost();
        if !self.economy.deduct(owner.player, cost) {
            let failure = PlacementFailure::InsufficientFunds {
                required: cost.gold,
                available: self.economy.resources(owner.player).gold,
            };
            log_failure("submit", &failure);
            return Err(failure);
        }

        match self
            .registry
            .spawn_squad(&mut self.world, &request, owner, None)
        {
            Ok(placement) => Ok(placement),
            Err(failure) => {
                self.economy.refund(owner.player, cost);
                log_failure("submit", &failure);
                Err(failure)
            }
        }
    }

    /// Replay a placement committed by the authoritative peer.
    ///
    /// Member ids are taken verbatim from `placement`. A member-less building
    /// with a builder becomes a pending construction. The cost is charged
    /// locally after the spawn succeeds.
    pub fn apply_remote(
        &mut self,
        placement: &Placement,
    ) -> std::result::Result<Placement, PlacementFailure> {
        let owner = placement.owner();
        let cost = self.cost_of(placement.collection, placement.unit_type)?;
        let request = PlacementRequest::from_placement(placement);
        let external_ids =
            (!placement.squad_units.is_empty()).then_some(placement.squad_units.as_slice());

        let applied = self
            .registry
            .spawn_squad(&mut self.world, &request, owner, external_ids)
            .map_err(|failure| {
                log_failure("apply_remote", &failure);
                failure
            })?;

        if !self.economy.deduct(owner.player, cost) {
            tracing::warn!(
                placement_id = placement.placement_id.0,
                player = owner.player.0,
                gold = cost.gold,
                "Remote placement exceeds local funds"
            );
        }
        Ok(applied)
    }

    /// Remove a placement and everything it occupies.
    ///
    /// A pending build is refunded in full; otherwise the squad's supply is
    /// released.
    pub fn destroy_placement(
        &mut self,
        placement_id: PlacementId,
    ) -> std::result::Result<Placement, PlacementFailure> {
        let placement = self.registry.destroy(&mut self.world, placement_id)?;
        let cost = self.cost_of(placement.collection, placement.unit_type)?;
        if placement.squad_units.is_empty() {
            self.economy.refund(placement.player, cost);
        } else {
            self.economy.release_supply(placement.player, cost.supply);
        }
        Ok(placement)
    }

    fn cost_of(
        &self,
        collection: Collection,
        unit_type: UnitTypeId,
    ) -> std::result::Result<Cost, PlacementFailure> {
        self.registry
            .catalog()
            .resolve(collection, unit_type)
            .map(|descriptor| descriptor.cost())
            .ok_or(PlacementFailure::UnknownType {
                collection,
                unit_type,
            })
    }

    // ------------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------------

    /// Queue a builder-arrived notification for the next step.
    pub fn notify_builder_arrived(&mut self, builder: EntityId) {
        self.construction
            .enqueue(ConstructionMessage::BuilderArrived { builder });
    }

    /// Queue a cancellation for the next step.
    pub fn request_cancel(&mut self, builder: EntityId) {
        self.construction
            .enqueue(ConstructionMessage::CancelBuild { builder });
    }

    /// Cancel `builder`'s order right away and refund its cost.
    pub fn cancel_construction(
        &mut self,
        builder: EntityId,
    ) -> std::result::Result<PendingConstruction, PlacementFailure> {
        ConstructionStateMachine::cancel(
            &mut self.world,
            &mut self.registry,
            &mut self.economy,
            builder,
        )
        .map_err(|failure| {
            log_failure("cancel_construction", &failure);
            failure
        })
    }

    /// Finish a building under construction.
    pub fn complete_construction(
        &mut self,
        placement_id: PlacementId,
    ) -> std::result::Result<Placement, PlacementFailure> {
        ConstructionStateMachine::complete_construction(
            &mut self.world,
            &mut self.registry,
            placement_id,
        )
        .map_err(|failure| {
            log_failure("complete_construction", &failure);
            failure
        })
    }

    // ------------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------------

    /// Remove an entity at once and settle any placement it leaves empty.
    pub fn kill_entity(&mut self, id: EntityId) -> Result<PruneReport> {
        self.world.despawn(id).ok_or(GameError::EntityNotFound(id))?;
        self.registry.grid_mut().release(id);

        let report = self.registry.prune_dead(&mut self.world);
        self.settle(&report);
        Ok(report)
    }

    /// Move an entity. The grid picks the move up on the next step.
    pub fn move_entity(&mut self, id: EntityId, position: Vec2Fixed) -> Result<()> {
        let cell = self.registry.layout().world_to_grid(position);
        let height = self.registry.terrain().height_at(cell);
        let entity = self
            .world
            .get_mut(id)
            .ok_or(GameError::EntityNotFound(id))?;
        entity.transform = Some(Transform::new(position, height));
        Ok(())
    }

    /// Spawn a single-cell projectile. The grid tracks it from the next step.
    pub fn spawn_projectile(&mut self, position: Vec2Fixed) -> EntityId {
        let cell = self.registry.layout().world_to_grid(position);
        let height = self.registry.terrain().height_at(cell);
        self.world.spawn(EntityParams {
            transform: Some(Transform::new(position, height)),
            body: Some(Body {
                collection: Collection::Projectile,
                footprint: Footprint::default(),
            }),
            ..Default::default()
        })
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Entities within `radius` of `position`, ascending by id.
    #[must_use]
    pub fn query_nearby(
        &self,
        position: Vec2Fixed,
        radius: Fixed,
        exclude: Option<EntityId>,
        collection: Option<Collection>,
    ) -> Vec<EntityId> {
        self.registry
            .grid()
            .query_nearby(position, radius, exclude, collection)
    }

    /// Where a freshly produced `unit_type` would appear next to the building
    /// of `placement_id`, facing `target` when given.
    ///
    /// `Ok(None)` means every ring out to the configured radius is full.
    pub fn find_spawn_cell(
        &self,
        placement_id: PlacementId,
        unit_type: UnitTypeId,
        target: Option<Vec2Fixed>,
    ) -> std::result::Result<Option<GridCell>, PlacementFailure> {
        let placement = self
            .registry
            .placement_by_id(placement_id)
            .ok_or(PlacementFailure::UnknownPlacement(placement_id))?;
        let catalog = self.registry.catalog();
        let building = catalog
            .resolve(placement.collection, placement.unit_type)
            .ok_or(PlacementFailure::UnknownType {
                collection: placement.collection,
                unit_type: placement.unit_type,
            })?
            .footprint()
            .rect_at(placement.grid_position);
        let unit_footprint = catalog
            .resolve(Collection::Unit, unit_type)
            .ok_or(PlacementFailure::UnknownType {
                collection: Collection::Unit,
                unit_type,
            })?
            .footprint();

        let search = AdjacencySearch::new(
            self.registry.grid(),
            building,
            unit_footprint,
            self.config.adjacency_radius,
        );
        Ok(search.find(target))
    }

    // ------------------------------------------------------------------------
    // Step
    // ------------------------------------------------------------------------

    /// Advance by one step.
    pub fn step(&mut self) -> StepReport {
        let construction =
            self.construction
                .process(&mut self.world, &mut self.registry, &mut self.economy);
        for event in &construction {
            if let ConstructionEvent::Rejected { failure, .. } = event {
                log_failure("construction", failure);
            }
        }

        let grid = self.registry.grid_mut().incremental_update(&self.world);
        let pruned = self.registry.prune_dead(&mut self.world);
        self.settle(&pruned);

        self.tick += 1;

        #[cfg(feature = "debug-validation")]
        if let Err(e) = self.verify() {
            tracing::error!(tick = self.tick, error = %e, "Battlefield invariant violated");
        }

        #[cfg(debug_assertions)]
        {
            let hash = self.state_hash();
            tracing::debug!(tick = self.tick, state_hash = hash, "Battlefield state hash");
        }

        StepReport {
            tick: self.tick,
            construction,
            grid,
            destroyed: pruned.destroyed,
            orphaned: pruned.orphaned,
        }
    }

    /// Release supply of destroyed squads and refund orphaned builds.
    fn settle(&mut self, report: &PruneReport) {
        for placement in &report.destroyed {
            if let Ok(cost) = self.cost_of(placement.collection, placement.unit_type) {
                self.economy.release_supply(placement.player, cost.supply);
            }
        }
        for placement in &report.orphaned {
            if let Ok(cost) = self.cost_of(placement.collection, placement.unit_type) {
                self.economy.refund(placement.player, cost);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Consistency
    // ------------------------------------------------------------------------

    /// Check the grid and placement index against the entities.
    ///
    /// Holds after every step. Between steps, moved entities are not yet
    /// reflected in the grid.
    pub fn verify(&self) -> Result<()> {
        self.registry.grid().verify()?;

        let mut fresh = SpatialGrid::new(self.registry.layout().clone());
        fresh.incremental_update(&self.world);
        if fresh.sorted_cells() != self.registry.grid().sorted_cells() {
            return Err(GameError::IndexCorrupted(
                "grid occupancy differs from entity transforms".to_string(),
            ));
        }

        let mut rebuilt = self.registry.clone();
        rebuilt.rebuild_index(&self.world);
        if !rebuilt.placements().eq(self.registry.placements()) {
            return Err(GameError::IndexCorrupted(
                "placement index differs from entity tags".to_string(),
            ));
        }
        Ok(())
    }

    /// Hash of all simulation state, for desync detection.
    ///
    /// The peer role is not part of the state: an authority and its replica
    /// hash equal when they agree.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        self.tick.hash(&mut hasher);

        // Entities in id order
        let ids = self.world.sorted_ids();
        ids.len().hash(&mut hasher);
        self.world.next_id().hash(&mut hasher);
        for id in ids {
            if let Some(entity) = self.world.get(id) {
                entity.hash(&mut hasher);
            }
        }

        // Occupancy in cell order
        for (key, entities) in self.registry.grid().sorted_cells() {
            key.hash(&mut hasher);
            entities.hash(&mut hasher);
        }

        self.registry.len().hash(&mut hasher);
        for placement in self.registry.placements() {
            placement.hash(&mut hasher);
        }
        self.registry.veins().hash(&mut hasher);
        self.economy.hash(&mut hasher);
        for message in self.construction.pending_messages() {
            message.hash(&mut hasher);
        }

        hasher.finish()
    }

    // ------------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------------

    /// Serialize the whole battlefield.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| GameError::Serialization(format!("Failed to serialize battlefield: {e}")))
    }

    /// Restore a snapshot, taking the given role.
    ///
    /// The grid and the placement index are recomputed from the entities, so
    /// a snapshot taken by either peer restores to the same state.
    pub fn restore(bytes: &[u8], role: PeerRole) -> Result<Self> {
        let mut battlefield: Self = bincode::deserialize(bytes).map_err(|e| {
            GameError::Serialization(format!("Failed to deserialize battlefield: {e}"))
        })?;

        battlefield.config.role = role;
        battlefield.registry.set_role(role);
        battlefield.resync();
        battlefield.verify()?;

        tracing::info!(
            tick = battlefield.tick,
            entities = battlefield.world.len(),
            placements = battlefield.registry.len(),
            "Battlefield restored"
        );
        Ok(battlefield)
    }

    /// Recompute the grid and placement index from the entities.
    pub fn resync(&mut self) {
        let grid = self.registry.grid_mut();
        grid.clear();
        grid.incremental_update(&self.world);
        self.registry.rebuild_index(&self.world);
    }
}

fn log_failure(operation: &'static str, failure: &PlacementFailure) {
    match failure.kind() {
        FailureKind::Validation => {
            tracing::debug!(operation, code = failure.code(), reason = %failure, "Placement rejected");
        }
        FailureKind::InternalInconsistency => {
            tracing::warn!(operation, code = failure.code(), reason = %failure, "Placement state inconsistent");
        }
    }
}
