//! Property tests for the grid index and id allocation.

use proptest::prelude::*;
use tactics_core::ids::IdAllocator;
use tactics_core::prelude::*;
use tactics_test_utils::determinism::strategies::{arb_cell, arb_script};
use tactics_test_utils::fixtures;

const SIZE: i32 = 24;

fn layout() -> GridLayout {
    GridLayout::new(SIZE as u32, SIZE as u32, Fixed::ONE)
}

fn snapshot(grid: &SpatialGrid) -> Vec<(CellKey, Vec<EntityId>)> {
    grid.sorted_cells()
        .into_iter()
        .map(|(key, ids)| (key, ids.to_vec()))
        .collect()
}

fn occupant_at(grid: &SpatialGrid, id: EntityId, cell: GridCell) -> Occupant {
    let position = grid.layout().footprint_center(cell, Footprint::square(1));
    Occupant::new(id, position, Collection::Unit)
}

fn arb_cells() -> impl Strategy<Value = Vec<GridCell>> {
    prop::collection::vec(arb_cell(SIZE, SIZE), 1..6)
}

#[derive(Debug, Clone, Copy)]
enum IdOp {
    Allocate,
    Observe(u32),
}

fn arb_id_op() -> impl Strategy<Value = IdOp> {
    prop_oneof![
        3 => Just(IdOp::Allocate),
        1 => (1u32..200).prop_map(IdOp::Observe),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_reserve_then_release_restores_grid(
        existing in prop::collection::vec(arb_cells(), 0..8),
        cells in arb_cells(),
    ) {
        let mut grid = SpatialGrid::new(layout());
        for (index, held) in existing.iter().enumerate() {
            let id = index as EntityId + 1;
            grid.reserve(held, occupant_at(&grid, id, held[0])).unwrap();
        }
        let before = snapshot(&grid);
        let tracked = grid.tracked_count();

        grid.reserve(&cells, occupant_at(&grid, 100, cells[0])).unwrap();
        for cell in &cells {
            prop_assert!(grid.entities_at(*cell).contains(&100));
        }
        prop_assert!(grid.release(100));

        prop_assert_eq!(snapshot(&grid), before);
        prop_assert_eq!(grid.tracked_count(), tracked);
        prop_assert!(grid.verify().is_ok());
    }

    #[test]
    fn test_reserve_is_idempotent(cells in arb_cells()) {
        let mut grid = SpatialGrid::new(layout());
        let occupant = occupant_at(&grid, 7, cells[0]);
        grid.reserve(&cells, occupant).unwrap();
        let once = snapshot(&grid);
        grid.reserve(&cells, occupant).unwrap();
        prop_assert_eq!(snapshot(&grid), once);
    }

    #[test]
    fn test_allocated_ids_strictly_increase(ops in prop::collection::vec(arb_id_op(), 1..64)) {
        let mut allocator = IdAllocator::new();
        let mut highest_seen = 0u32;
        for op in ops {
            match op {
                IdOp::Allocate => {
                    let id = allocator.allocate();
                    prop_assert!(id.is_valid());
                    prop_assert!(id.0 > highest_seen);
                    highest_seen = id.0;
                }
                IdOp::Observe(raw) => {
                    allocator.observe(PlacementId(raw));
                    highest_seen = highest_seen.max(raw);
                }
            }
            prop_assert!(allocator.peek().0 > highest_seen);
        }
    }

    #[test]
    fn test_query_nearby_ignores_insertion_order(
        (cells, shuffled) in prop::collection::vec(arb_cell(SIZE, SIZE), 1..16)
            .prop_flat_map(|cells| {
                let order: Vec<usize> = (0..cells.len()).collect();
                (Just(cells), Just(order).prop_shuffle())
            }),
        center in arb_cell(SIZE, SIZE),
        radius in 0i32..10,
    ) {
        let mut forward = SpatialGrid::new(layout());
        let mut permuted = SpatialGrid::new(layout());
        for (index, &cell) in cells.iter().enumerate() {
            let id = index as EntityId + 1;
            forward.reserve(&[cell], occupant_at(&forward, id, cell)).unwrap();
        }
        for &index in &shuffled {
            let cell = cells[index];
            let id = index as EntityId + 1;
            permuted.reserve(&[cell], occupant_at(&permuted, id, cell)).unwrap();
        }

        let at = layout().footprint_center(center, Footprint::square(1));
        let radius = Fixed::from_num(radius);
        let a = forward.query_nearby(at, radius, None, None);
        let b = permuted.query_nearby(at, radius, None, None);

        prop_assert_eq!(&a, &b);
        prop_assert!(a.windows(2).all(|pair| pair[0] < pair[1]));
        prop_assert_eq!(snapshot(&forward), snapshot(&permuted));
    }

    #[test]
    fn test_recorded_scripts_replay_exactly(script in arb_script(SIZE, SIZE, 12, 4)) {
        let mut recorder = ReplayRecorder::new("property", fixtures::battlefield()).unwrap();
        for tick in &script {
            for command in tick {
                recorder.issue(command.clone());
            }
            recorder.step();
        }
        let (replay, _) = recorder.finish();

        let mut player = ReplayPlayer::new(replay).unwrap();
        prop_assert!(player.verify().unwrap());
    }
}
