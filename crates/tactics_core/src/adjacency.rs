//! Free-cell search around a building.
//!
//! Used to pick where a freshly produced unit appears. The search walks
//! square rings around the building's footprint, one layer at a time, and
//! returns the first cell where the unit's footprint fits. Within a ring the
//! sides are visited in the fixed rotation west → north → east → south,
//! starting from the side facing the target, and the corners come last.
//!
//! North is −z and south is +z. Every tie is broken by coordinate order, so
//! both peers always pick the same cell.

use serde::{Deserialize, Serialize};

use crate::coords::{CellRect, Footprint, GridCell};
use crate::grid::SpatialGrid;
use crate::math::{Fixed, Vec2Fixed};

/// Side of a rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Smallest x.
    West,
    /// Smallest z.
    North,
    /// Largest x.
    East,
    /// Largest z.
    South,
}

impl Side {
    /// Fixed visiting rotation.
    pub const ROTATION: [Self; 4] = [Self::West, Self::North, Self::East, Self::South];

    /// The four sides in rotation order, beginning with `self`.
    #[must_use]
    pub fn rotation_from(self) -> [Self; 4] {
        let start = Self::ROTATION
            .iter()
            .position(|&side| side == self)
            .unwrap_or(0);
        std::array::from_fn(|i| Self::ROTATION[(start + i) % 4])
    }

    /// Side of a rectangle centred at `center` that faces `target`.
    ///
    /// The dominant axis of `target - center` wins, with ties going to x. A
    /// target on the centre, or no target, faces west.
    #[must_use]
    pub fn facing(center: Vec2Fixed, target: Option<Vec2Fixed>) -> Self {
        let Some(target) = target else {
            return Self::West;
        };
        let delta = target - center;
        if delta.x == Fixed::ZERO && delta.z == Fixed::ZERO {
            return Self::West;
        }
        if delta.x.abs() >= delta.z.abs() {
            if delta.x > Fixed::ZERO {
                Self::East
            } else {
                Self::West
            }
        } else if delta.z > Fixed::ZERO {
            Self::South
        } else {
            Self::North
        }
    }
}

/// Cells on one side of `ring`, corners excluded, in ascending coordinate
/// order.
fn side_cells(ring: &CellRect, side: Side) -> Vec<GridCell> {
    let CellRect { min, max } = *ring;
    match side {
        Side::West => ((min.z + 1)..max.z).map(|z| GridCell::new(min.x, z)).collect(),
        Side::East => ((min.z + 1)..max.z).map(|z| GridCell::new(max.x, z)).collect(),
        Side::North => ((min.x + 1)..max.x).map(|x| GridCell::new(x, min.z)).collect(),
        Side::South => ((min.x + 1)..max.x).map(|x| GridCell::new(x, max.z)).collect(),
    }
}

/// Corners of `ring` in the order NW, NE, SE, SW.
fn corners(ring: &CellRect) -> [GridCell; 4] {
    let CellRect { min, max } = *ring;
    [
        GridCell::new(min.x, min.z),
        GridCell::new(max.x, min.z),
        GridCell::new(max.x, max.z),
        GridCell::new(min.x, max.z),
    ]
}

/// Ring-by-ring search for a free cell next to a building.
#[derive(Debug, Clone, Copy)]
pub struct AdjacencySearch<'a> {
    grid: &'a SpatialGrid,
    building: CellRect,
    unit_footprint: Footprint,
    max_radius: u32,
}

impl<'a> AdjacencySearch<'a> {
    /// Search around `building` for a unit of `unit_footprint`, up to
    /// `max_radius` rings out.
    #[must_use]
    pub const fn new(
        grid: &'a SpatialGrid,
        building: CellRect,
        unit_footprint: Footprint,
        max_radius: u32,
    ) -> Self {
        Self {
            grid,
            building,
            unit_footprint,
            max_radius,
        }
    }

    /// World-space centre of the building footprint.
    #[must_use]
    pub fn building_center(&self) -> Vec2Fixed {
        let layout = self.grid.layout();
        let corner = layout.grid_to_world(self.building.min);
        let width = self.building.max.x - self.building.min.x + 1;
        let depth = self.building.max.z - self.building.min.z + 1;
        let two = Fixed::from_num(2);
        Vec2Fixed::new(
            corner.x + Fixed::from_num(width) * layout.cell_size() / two,
            corner.z + Fixed::from_num(depth) * layout.cell_size() / two,
        )
    }

    /// Every candidate in visiting order, without filtering.
    #[must_use]
    pub fn candidates(&self, target: Option<Vec2Fixed>) -> Vec<GridCell> {
        let start = Side::facing(self.building_center(), target);
        let mut out = Vec::new();
        for layer in 1..=self.max_radius as i32 {
            let ring = self.building.expand(layer);
            for side in start.rotation_from() {
                out.extend(side_cells(&ring, side));
            }
            out.extend(corners(&ring));
        }
        out
    }

    /// Whether a unit anchored at `cell` fits: clear of the building, fully
    /// on the grid, and on free cells.
    #[must_use]
    pub fn fits(&self, cell: GridCell) -> bool {
        let rect = self.unit_footprint.rect_at(cell);
        if rect.intersects(&self.building) {
            return false;
        }
        let layout = self.grid.layout();
        rect.cells()
            .into_iter()
            .all(|c| layout.in_bounds(c) && !self.grid.is_occupied(c))
    }

    /// First free cell in visiting order.
    #[must_use]
    pub fn find(&self, target: Option<Vec2Fixed>) -> Option<GridCell> {
        let start = Side::facing(self.building_center(), target);
        for layer in 1..=self.max_radius as i32 {
            let ring = self.building.expand(layer);
            for side in start.rotation_from() {
                if let Some(cell) = side_cells(&ring, side).into_iter().find(|&c| self.fits(c)) {
                    return Some(cell);
                }
            }
            if let Some(cell) = corners(&ring).into_iter().find(|&c| self.fits(c)) {
                return Some(cell);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Collection;
    use crate::coords::GridLayout;
    use crate::grid::Occupant;

    fn grid(size: u32) -> SpatialGrid {
        SpatialGrid::new(GridLayout::new(size, size, Fixed::from_num(1)))
    }

    fn block(grid: &mut SpatialGrid, id: u64, cells: &[GridCell]) {
        grid.reserve(
            cells,
            Occupant::new(id, Vec2Fixed::from_ints(cells[0].x, cells[0].z), Collection::Building),
        )
        .unwrap();
    }

    fn two_by_two_at(anchor: GridCell) -> CellRect {
        Footprint::square(2).rect_at(anchor)
    }

    #[test]
    fn test_facing_dominant_axis() {
        let c = Vec2Fixed::from_ints(10, 10);
        assert_eq!(Side::facing(c, None), Side::West);
        assert_eq!(Side::facing(c, Some(c)), Side::West);
        assert_eq!(Side::facing(c, Some(Vec2Fixed::from_ints(20, 12))), Side::East);
        assert_eq!(Side::facing(c, Some(Vec2Fixed::from_ints(0, 9))), Side::West);
        assert_eq!(Side::facing(c, Some(Vec2Fixed::from_ints(11, 0))), Side::North);
        assert_eq!(Side::facing(c, Some(Vec2Fixed::from_ints(9, 30))), Side::South);
        // Equal magnitudes favour x
        assert_eq!(Side::facing(c, Some(Vec2Fixed::from_ints(13, 13))), Side::East);
    }

    #[test]
    fn test_rotation_from() {
        assert_eq!(
            Side::East.rotation_from(),
            [Side::East, Side::South, Side::West, Side::North]
        );
        assert_eq!(Side::West.rotation_from(), Side::ROTATION);
    }

    #[test]
    fn test_due_east_target_returns_east_side() {
        let grid = grid(32);
        let building = two_by_two_at(GridCell::new(10, 10));
        let search = AdjacencySearch::new(&grid, building, Footprint::default(), 4);

        let target = Vec2Fixed::from_ints(25, 10);
        let cell = search.find(Some(target)).unwrap();
        assert_eq!(cell, GridCell::new(11, 9));
        assert!(cell.x > building.max.x);
    }

    #[test]
    fn test_default_side_is_west() {
        let grid = grid(32);
        let building = two_by_two_at(GridCell::new(10, 10));
        let search = AdjacencySearch::new(&grid, building, Footprint::default(), 4);
        assert_eq!(search.find(None), Some(GridCell::new(8, 9)));
    }

    #[test]
    fn test_ring_order() {
        let grid = grid(32);
        let building = Footprint::square(1).rect_at(GridCell::new(5, 5));
        let search = AdjacencySearch::new(&grid, building, Footprint::default(), 1);
        assert_eq!(
            search.candidates(None),
            vec![
                GridCell::new(4, 5), // west
                GridCell::new(5, 4), // north
                GridCell::new(6, 5), // east
                GridCell::new(5, 6), // south
                GridCell::new(4, 4), // NW
                GridCell::new(6, 4), // NE
                GridCell::new(6, 6), // SE
                GridCell::new(4, 6), // SW
            ]
        );
    }

    #[test]
    fn test_occupied_side_falls_through_rotation() {
        let mut grid = grid(32);
        let building = two_by_two_at(GridCell::new(10, 10));
        // Block the east side of the first ring
        block(&mut grid, 1, &[GridCell::new(11, 9), GridCell::new(11, 10)]);

        let search = AdjacencySearch::new(&grid, building, Footprint::default(), 4);
        // East → South is next in the rotation
        assert_eq!(
            search.find(Some(Vec2Fixed::from_ints(25, 10))),
            Some(GridCell::new(9, 11))
        );
    }

    #[test]
    fn test_large_unit_skips_cells_that_overlap_building() {
        let grid = grid(32);
        let building = two_by_two_at(GridCell::new(10, 10));
        let search = AdjacencySearch::new(&grid, building, Footprint::square(2), 4);

        // 2×2 units extend north-west of their anchor, so every first-ring
        // cell on the east and south sides would overlap the building
        let cell = search.find(Some(Vec2Fixed::from_ints(25, 10))).unwrap();
        assert_eq!(cell, GridCell::new(8, 9));
        assert!(!Footprint::square(2).rect_at(cell).intersects(&building));
        assert!(!search.fits(GridCell::new(11, 9)));
    }

    #[test]
    fn test_grid_edge_and_exhaustion() {
        let mut grid = grid(4);
        let building = Footprint::square(2).rect_at(GridCell::new(1, 1));
        let search = AdjacencySearch::new(&grid, building, Footprint::default(), 1);
        // West and north of the building are off the grid
        assert_eq!(search.find(None), Some(GridCell::new(2, 0)));

        let all: Vec<GridCell> = (0..4)
            .flat_map(|z| (0..4).map(move |x| GridCell::new(x, z)))
            .filter(|c| !building.contains(*c))
            .collect();
        block(&mut grid, 9, &all);
        let search = AdjacencySearch::new(&grid, building, Footprint::default(), 3);
        assert_eq!(search.find(None), None);
    }
}
