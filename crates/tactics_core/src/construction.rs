//! Deferred building creation.
//!
//! A building ordered with a builder does not exist until the builder walks
//! to the site. The order lives on the builder as a [`BuilderTask`]:
//!
//! ```text
//! idle ──setup_pending_build──▶ Pending ──BuilderArrived──▶ Constructing ──complete──▶ idle
//!                                  │                            │
//!                                  └────────CancelBuild─────────┴──▶ idle (refunded)
//! ```
//!
//! [`ConstructionStateMachine::materialize_pending_construction`] is the only
//! path from `Pending` to `Constructing`. The behavior layer never calls it
//! directly; it enqueues a [`ConstructionMessage`] and the battlefield step
//! drains the inbox in arrival order.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::catalog::{Collection, Cost, UnitTypeId};
use crate::coords::GridCell;
use crate::economy::Treasury;
use crate::ids::{EntityId, Owner, PlacementId};
use crate::placement::{FailureKind, Placement, PlacementFailure, PlacementRegistry, PlacementRequest};
use crate::world::{MoveOrder, World};

/// A building order waiting for its builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingConstruction {
    /// Id reserved for the building.
    pub placement_id: PlacementId,
    /// Player who paid for it.
    pub owner: Owner,
    /// Building type.
    pub unit_type: UnitTypeId,
    /// Always [`Collection::Building`] in practice.
    pub collection: Collection,
    /// Anchor cell of the site.
    pub grid_position: GridCell,
    /// Construction time in ticks.
    pub build_time: u32,
    /// Amount charged at order time, refunded on cancel.
    pub cost: Cost,
}

impl PendingConstruction {
    /// Placement request that recreates this order at the site.
    #[must_use]
    pub const fn request(&self) -> PlacementRequest {
        PlacementRequest {
            placement_id: Some(self.placement_id),
            collection: self.collection,
            unit_type: self.unit_type,
            grid_position: Some(self.grid_position),
            builder: None,
        }
    }
}

/// Construction state carried by a builder entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuilderTask {
    /// Walking to the site; nothing exists on the grid yet.
    Pending(PendingConstruction),
    /// The building entity exists and is under construction.
    Constructing {
        /// The original order.
        order: PendingConstruction,
        /// Building entity created on arrival.
        building: EntityId,
    },
}

impl BuilderTask {
    /// The order this task is working on.
    #[must_use]
    pub const fn order(&self) -> &PendingConstruction {
        match self {
            Self::Pending(order) | Self::Constructing { order, .. } => order,
        }
    }

    /// Placement the task belongs to.
    #[must_use]
    pub const fn placement_id(&self) -> PlacementId {
        self.order().placement_id
    }

    /// Building entity, once materialized.
    #[must_use]
    pub const fn building(&self) -> Option<EntityId> {
        match self {
            Self::Pending(_) => None,
            Self::Constructing { building, .. } => Some(*building),
        }
    }
}

/// Input from the behavior layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstructionMessage {
    /// The builder reached its site.
    BuilderArrived {
        /// Builder entity.
        builder: EntityId,
    },
    /// The player called the build off.
    CancelBuild {
        /// Builder entity.
        builder: EntityId,
    },
}

/// Result of handling one [`ConstructionMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstructionEvent {
    /// The building entity now exists.
    Materialized {
        /// Builder entity.
        builder: EntityId,
        /// The updated placement.
        placement: Placement,
    },
    /// The order was dropped and its cost returned.
    Cancelled {
        /// Builder entity.
        builder: EntityId,
        /// The dropped order.
        order: PendingConstruction,
    },
    /// The message could not be applied.
    Rejected {
        /// Builder entity.
        builder: EntityId,
        /// Why.
        failure: PlacementFailure,
    },
}

/// Message inbox plus the transitions of the construction lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructionStateMachine {
    inbox: VecDeque<ConstructionMessage>,
}

impl ConstructionStateMachine {
    /// Create a machine with an empty inbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message for the next step.
    pub fn enqueue(&mut self, message: ConstructionMessage) {
        self.inbox.push_back(message);
    }

    /// Messages waiting for the next step, oldest first.
    pub fn pending_messages(&self) -> impl Iterator<Item = &ConstructionMessage> {
        self.inbox.iter()
    }

    /// Handle every queued message in arrival order.
    pub fn process(
        &mut self,
        world: &mut World,
        registry: &mut PlacementRegistry,
        treasury: &mut dyn Treasury,
    ) -> Vec<ConstructionEvent> {
        let mut events = Vec::with_capacity(self.inbox.len());

        while let Some(message) = self.inbox.pop_front() {
            let event = match message {
                ConstructionMessage::BuilderArrived { builder } => {
                    match Self::materialize_pending_construction(world, registry, treasury, builder)
                    {
                        Ok(placement) => ConstructionEvent::Materialized { builder, placement },
                        Err(failure) => ConstructionEvent::Rejected { builder, failure },
                    }
                }
                ConstructionMessage::CancelBuild { builder } => {
                    match Self::cancel(world, registry, treasury, builder) {
                        Ok(order) => ConstructionEvent::Cancelled { builder, order },
                        Err(failure) => ConstructionEvent::Rejected { builder, failure },
                    }
                }
            };
            events.push(event);
        }

        events
    }

    /// Attach `pending` to `builder` and send it to the site.
    ///
    /// No grid cells are reserved until the building materializes.
    pub fn setup_pending_build(
        world: &mut World,
        registry: &PlacementRegistry,
        builder: EntityId,
        pending: PendingConstruction,
    ) -> Result<(), PlacementFailure> {
        let footprint = registry
            .catalog()
            .resolve(pending.collection, pending.unit_type)
            .ok_or(PlacementFailure::UnknownType {
                collection: pending.collection,
                unit_type: pending.unit_type,
            })?
            .footprint();
        let target = registry
            .layout()
            .footprint_center(pending.grid_position, footprint);
        let height = registry.terrain().height_at(pending.grid_position);

        let entity = world
            .get_mut(builder)
            .ok_or(PlacementFailure::BuilderNotFound(builder))?;
        let capability = entity
            .builder
            .as_mut()
            .ok_or(PlacementFailure::NotABuilder(builder))?;
        if capability.task.is_some() {
            return Err(PlacementFailure::BuilderBusy(builder));
        }

        capability.task = Some(BuilderTask::Pending(pending));
        entity.move_order = Some(MoveOrder { target, height });
        Ok(())
    }

    /// Create the building entity for `builder`'s pending order.
    ///
    /// Reserves the footprint and marks the placement under construction.
    /// A second call for the same order fails with
    /// [`PlacementFailure::AlreadyMaterialized`]. If the site was taken while
    /// the builder travelled, the order is cancelled, the cost refunded, and
    /// the site failure returned.
    pub fn materialize_pending_construction(
        world: &mut World,
        registry: &mut PlacementRegistry,
        treasury: &mut dyn Treasury,
        builder: EntityId,
    ) -> Result<Placement, PlacementFailure> {
        let pending = match Self::task_of(world, builder)? {
            None => return Err(PlacementFailure::NoPendingBuild(builder)),
            Some(BuilderTask::Constructing { building, .. }) if world.contains(building) => {
                tracing::debug!(builder, building, "Construction already materialized");
                return Err(PlacementFailure::AlreadyMaterialized { builder, building });
            }
            Some(BuilderTask::Constructing { .. }) => {
                Self::set_task(world, builder, None);
                return Err(PlacementFailure::NoPendingBuild(builder));
            }
            Some(BuilderTask::Pending(pending)) => pending,
        };

        match registry.materialize_site(world, &pending, builder) {
            Ok(placement) => {
                let Some(&building) = placement.squad_units.first() else {
                    return Err(PlacementFailure::EntityCountMismatch {
                        expected: 1,
                        actual: 0,
                    });
                };
                Self::set_task(
                    world,
                    builder,
                    Some(BuilderTask::Constructing {
                        order: pending,
                        building,
                    }),
                );
                tracing::info!(
                    placement_id = pending.placement_id.0,
                    builder,
                    building,
                    "Construction started"
                );
                Ok(placement)
            }
            Err(failure) if failure.kind() == FailureKind::Validation => {
                Self::set_task(world, builder, None);
                registry.forget_pending(pending.placement_id);
                treasury.refund(pending.owner.player, pending.cost);
                tracing::info!(
                    placement_id = pending.placement_id.0,
                    builder,
                    reason = %failure,
                    "Construction site lost, order refunded"
                );
                Err(failure)
            }
            Err(failure) => {
                tracing::warn!(
                    placement_id = pending.placement_id.0,
                    builder,
                    reason = %failure,
                    "Construction could not materialize"
                );
                Err(failure)
            }
        }
    }

    /// Drop `builder`'s order from either state and refund its cost.
    ///
    /// A materialized building is destroyed and its cells released.
    pub fn cancel(
        world: &mut World,
        registry: &mut PlacementRegistry,
        treasury: &mut dyn Treasury,
        builder: EntityId,
    ) -> Result<PendingConstruction, PlacementFailure> {
        let task = Self::task_of(world, builder)?.ok_or(PlacementFailure::NoPendingBuild(builder))?;
        let order = *task.order();

        Self::set_task(world, builder, None);
        match task {
            BuilderTask::Pending(_) => {
                registry.forget_pending(order.placement_id);
            }
            BuilderTask::Constructing { .. } => {
                let _ = registry.destroy(world, order.placement_id);
            }
        }
        treasury.refund(order.owner.player, order.cost);

        tracing::info!(
            placement_id = order.placement_id.0,
            builder,
            gold = order.cost.gold,
            "Construction cancelled"
        );
        Ok(order)
    }

    /// Finish a building: clears its under-construction flag and frees the
    /// builder.
    pub fn complete_construction(
        world: &mut World,
        registry: &mut PlacementRegistry,
        placement_id: PlacementId,
    ) -> Result<Placement, PlacementFailure> {
        registry.complete(world, placement_id)
    }

    fn task_of(world: &World, builder: EntityId) -> Result<Option<BuilderTask>, PlacementFailure> {
        let entity = world
            .get(builder)
            .ok_or(PlacementFailure::BuilderNotFound(builder))?;
        let capability = entity
            .builder
            .as_ref()
            .ok_or(PlacementFailure::NotABuilder(builder))?;
        Ok(capability.task)
    }

    fn set_task(world: &mut World, builder: EntityId, task: Option<BuilderTask>) {
        if let Some(entity) = world.get_mut(builder) {
            if let Some(capability) = entity.builder.as_mut() {
                capability.task = task;
            }
            if task.is_none() {
                entity.move_order = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BuildingDescriptor, Catalog, Descriptor, SiteRequirement, UnitDescriptor};
    use crate::config::PeerRole;
    use crate::coords::{Footprint, GridLayout};
    use crate::economy::{Economy, PlayerResources};
    use crate::ids::{PlayerId, TeamId};
    use crate::math::Fixed;

    const OWNER: Owner = Owner::new(PlayerId(1), TeamId(0));
    const WORKER: UnitTypeId = UnitTypeId(0);
    const DEPOT: UnitTypeId = UnitTypeId(0);

    struct Fixture {
        world: World,
        registry: PlacementRegistry,
        economy: Economy,
        builder: EntityId,
    }

    fn fixture() -> Fixture {
        let mut catalog = Catalog::new();
        catalog.insert(Descriptor::Unit(UnitDescriptor {
            type_id: WORKER,
            name: "worker".into(),
            cost: Cost::new(40, 1),
            footprint: Footprint::default(),
            squad_size: 1,
            can_build: true,
        }));
        catalog.insert(Descriptor::Building(BuildingDescriptor {
            type_id: DEPOT,
            name: "depot".into(),
            cost: Cost::new(120, 0),
            footprint: Footprint::square(2),
            build_time: 60,
            site: SiteRequirement::Open,
        }));

        let mut registry = PlacementRegistry::new(
            catalog,
            GridLayout::new(32, 32, Fixed::from_num(1)),
            PeerRole::Authoritative,
        );
        let mut world = World::new();
        let builder = registry
            .spawn_squad(&mut world, &PlacementRequest::unit(WORKER, GridCell::new(1, 1)), OWNER, None)
            .unwrap()
            .squad_units[0];

        let mut economy = Economy::new();
        economy.set_player(OWNER.player, PlayerResources::new(500, 10));

        Fixture {
            world,
            registry,
            economy,
            builder,
        }
    }

    /// Charge and order a depot at (5, 5), the way a submit would.
    fn order_depot(f: &mut Fixture) -> Placement {
        assert!(f.economy.deduct(OWNER.player, Cost::new(120, 0)));
        let request = PlacementRequest::building(DEPOT, GridCell::new(5, 5)).with_builder(f.builder);
        f.registry
            .spawn_squad(&mut f.world, &request, OWNER, None)
            .unwrap()
    }

    fn task(f: &Fixture) -> Option<BuilderTask> {
        f.world
            .get(f.builder)
            .and_then(|e| e.builder.as_ref())
            .and_then(|b| b.task)
    }

    // ------------------------------------------------------------------------
    // Setup Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_setup_leaves_grid_untouched() {
        let mut f = fixture();
        let occupied_before = f.registry.grid().occupied_cell_count();
        order_depot(&mut f);

        assert_eq!(f.registry.grid().occupied_cell_count(), occupied_before);
        assert!(matches!(task(&f), Some(BuilderTask::Pending(_))));

        let order = f.world.get(f.builder).unwrap().move_order.unwrap();
        let site = f.registry.layout().world_to_grid(order.target);
        assert_eq!(site, GridCell::new(5, 5));
    }

    #[test]
    fn test_setup_rejects_non_builders() {
        let mut f = fixture();
        let plain = f.world.spawn(crate::world::EntityParams::default());
        let pending = PendingConstruction {
            placement_id: PlacementId(50),
            owner: OWNER,
            unit_type: DEPOT,
            collection: Collection::Building,
            grid_position: GridCell::new(5, 5),
            build_time: 60,
            cost: Cost::new(120, 0),
        };
        assert_eq!(
            ConstructionStateMachine::setup_pending_build(&mut f.world, &f.registry, plain, pending),
            Err(PlacementFailure::NotABuilder(plain))
        );
        assert_eq!(
            ConstructionStateMachine::setup_pending_build(&mut f.world, &f.registry, 999, pending),
            Err(PlacementFailure::BuilderNotFound(999))
        );
    }

    // ------------------------------------------------------------------------
    // Materialize Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_materialize_reserves_footprint() {
        let mut f = fixture();
        let pending = order_depot(&mut f);

        let placement = ConstructionStateMachine::materialize_pending_construction(
            &mut f.world,
            &mut f.registry,
            &mut f.economy,
            f.builder,
        )
        .unwrap();

        assert_eq!(placement.placement_id, pending.placement_id);
        assert!(placement.under_construction);
        assert_eq!(placement.squad_units.len(), 1);
        let building = placement.squad_units[0];
        for cell in Footprint::square(2).cells_at(GridCell::new(5, 5)) {
            assert_eq!(f.registry.grid().entities_at(cell), &[building]);
        }
        assert_eq!(task(&f).and_then(|t| t.building()), Some(building));
        assert!(f.world.get(building).unwrap().placement.unwrap().under_construction);
    }

    #[test]
    fn test_materialize_twice_is_rejected() {
        let mut f = fixture();
        order_depot(&mut f);
        let first = ConstructionStateMachine::materialize_pending_construction(
            &mut f.world,
            &mut f.registry,
            &mut f.economy,
            f.builder,
        )
        .unwrap();
        let entities = f.world.len();

        let second = ConstructionStateMachine::materialize_pending_construction(
            &mut f.world,
            &mut f.registry,
            &mut f.economy,
            f.builder,
        );
        assert_eq!(
            second,
            Err(PlacementFailure::AlreadyMaterialized {
                builder: f.builder,
                building: first.squad_units[0],
            })
        );
        assert_eq!(f.world.len(), entities);
    }

    #[test]
    fn test_materialize_on_blocked_site_refunds() {
        let mut f = fixture();
        let pending = order_depot(&mut f);
        assert_eq!(f.economy.resources(OWNER.player).gold, 380);

        // Another squad walks onto the site while the builder travels
        f.registry
            .spawn_squad(&mut f.world, &PlacementRequest::unit(WORKER, GridCell::new(5, 5)), OWNER, None)
            .unwrap();

        let result = ConstructionStateMachine::materialize_pending_construction(
            &mut f.world,
            &mut f.registry,
            &mut f.economy,
            f.builder,
        );
        assert!(matches!(result, Err(PlacementFailure::CellsOccupied { .. })));
        assert_eq!(f.economy.resources(OWNER.player).gold, 500);
        assert!(task(&f).is_none());
        assert!(f.registry.placement_by_id(pending.placement_id).is_none());
    }

    #[test]
    fn test_materialize_without_order() {
        let mut f = fixture();
        assert_eq!(
            ConstructionStateMachine::materialize_pending_construction(
                &mut f.world,
                &mut f.registry,
                &mut f.economy,
                f.builder,
            ),
            Err(PlacementFailure::NoPendingBuild(f.builder))
        );
    }

    // ------------------------------------------------------------------------
    // Cancel / Complete Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_cancel_pending_refunds_exact_cost() {
        let mut f = fixture();
        let cells_before = f.registry.grid().occupied_cell_count();
        let pending = order_depot(&mut f);

        let order =
            ConstructionStateMachine::cancel(&mut f.world, &mut f.registry, &mut f.economy, f.builder)
                .unwrap();

        assert_eq!(order.cost, Cost::new(120, 0));
        assert_eq!(f.economy.resources(OWNER.player).gold, 500);
        assert_eq!(f.registry.grid().occupied_cell_count(), cells_before);
        assert!(f.registry.placement_by_id(pending.placement_id).is_none());
        assert!(task(&f).is_none());
        assert!(f.world.get(f.builder).unwrap().move_order.is_none());
    }

    #[test]
    fn test_cancel_constructing_destroys_building() {
        let mut f = fixture();
        order_depot(&mut f);
        let placement = ConstructionStateMachine::materialize_pending_construction(
            &mut f.world,
            &mut f.registry,
            &mut f.economy,
            f.builder,
        )
        .unwrap();
        let building = placement.squad_units[0];

        ConstructionStateMachine::cancel(&mut f.world, &mut f.registry, &mut f.economy, f.builder)
            .unwrap();

        assert!(!f.world.contains(building));
        assert!(!f.registry.grid().is_occupied(GridCell::new(5, 5)));
        assert_eq!(f.economy.resources(OWNER.player).gold, 500);
    }

    #[test]
    fn test_complete_clears_flag_and_task() {
        let mut f = fixture();
        order_depot(&mut f);
        let placement = ConstructionStateMachine::materialize_pending_construction(
            &mut f.world,
            &mut f.registry,
            &mut f.economy,
            f.builder,
        )
        .unwrap();

        let done = ConstructionStateMachine::complete_construction(
            &mut f.world,
            &mut f.registry,
            placement.placement_id,
        )
        .unwrap();

        assert!(!done.under_construction);
        assert!(task(&f).is_none());
        let building = f.world.get(placement.squad_units[0]).unwrap();
        assert!(!building.placement.unwrap().under_construction);
        assert_eq!(
            ConstructionStateMachine::cancel(&mut f.world, &mut f.registry, &mut f.economy, f.builder),
            Err(PlacementFailure::NoPendingBuild(f.builder))
        );
    }

    #[test]
    fn test_inbox_is_drained_in_order() {
        let mut f = fixture();
        order_depot(&mut f);
        let mut machine = ConstructionStateMachine::new();
        machine.enqueue(ConstructionMessage::BuilderArrived { builder: f.builder });
        machine.enqueue(ConstructionMessage::CancelBuild { builder: f.builder });
        machine.enqueue(ConstructionMessage::CancelBuild { builder: f.builder });

        let events = machine.process(&mut f.world, &mut f.registry, &mut f.economy);

        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], ConstructionEvent::Materialized { .. }));
        assert!(matches!(events[1], ConstructionEvent::Cancelled { .. }));
        assert!(matches!(
            events[2],
            ConstructionEvent::Rejected {
                failure: PlacementFailure::NoPendingBuild(_),
                ..
            }
        ));
        assert_eq!(machine.pending_messages().count(), 0);
        assert_eq!(f.economy.resources(OWNER.player).gold, 500);
    }
}
