//! Grid coordinates, footprints, and the grid↔world coordinate service.
//!
//! The placement grid lives on the `x`/`z` plane. Cells are addressed by
//! signed integer coordinates so searches may step outside the map and be
//! rejected by a bounds check rather than wrapping; in-bounds cells map to a
//! dense integer [`CellKey`] of `x + z * width`.

use serde::{Deserialize, Serialize};

use crate::math::{fixed_serde, Fixed, Vec2Fixed};

/// Integer grid coordinate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct GridCell {
    /// Column (west to east).
    pub x: i32,
    /// Row (north to south).
    pub z: i32,
}

impl GridCell {
    /// Create a new grid cell.
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Offset this cell by a delta.
    #[must_use]
    pub const fn offset(self, dx: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            z: self.z + dz,
        }
    }
}

/// Dense key for an in-bounds cell: `x + z * width`.
pub type CellKey = u32;

/// Size of a unit or building in grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Footprint {
    /// Extent along x.
    pub width: u32,
    /// Extent along z.
    pub depth: u32,
}

impl Footprint {
    /// Create a new footprint.
    #[must_use]
    pub const fn new(width: u32, depth: u32) -> Self {
        Self { width, depth }
    }

    /// Create a square footprint.
    #[must_use]
    pub const fn square(size: u32) -> Self {
        Self {
            width: size,
            depth: size,
        }
    }

    /// Get the total number of cells this footprint covers.
    #[must_use]
    pub const fn cell_count(&self) -> u32 {
        self.width * self.depth
    }

    /// Bounding rectangle of this footprint when anchored at `anchor`.
    ///
    /// The anchor is the cell containing the occupant's world position; a
    /// footprint of width `w` spans `anchor.x - w/2 .. anchor.x - w/2 + w`.
    #[must_use]
    pub fn rect_at(&self, anchor: GridCell) -> CellRect {
        let min = anchor.offset(-((self.width / 2) as i32), -((self.depth / 2) as i32));
        CellRect {
            min,
            max: min.offset(self.width as i32 - 1, self.depth as i32 - 1),
        }
    }

    /// All cells covered when anchored at `anchor`, row-major.
    #[must_use]
    pub fn cells_at(&self, anchor: GridCell) -> Vec<GridCell> {
        self.rect_at(anchor).cells()
    }
}

impl Default for Footprint {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/// Inclusive rectangle of grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRect {
    /// North-west corner (smallest x and z).
    pub min: GridCell,
    /// South-east corner (largest x and z).
    pub max: GridCell,
}

impl CellRect {
    /// Bounding box of a set of cells. `None` for an empty slice.
    #[must_use]
    pub fn bounding(cells: &[GridCell]) -> Option<Self> {
        let first = *cells.first()?;
        let mut rect = Self {
            min: first,
            max: first,
        };
        for cell in &cells[1..] {
            rect.min.x = rect.min.x.min(cell.x);
            rect.min.z = rect.min.z.min(cell.z);
            rect.max.x = rect.max.x.max(cell.x);
            rect.max.z = rect.max.z.max(cell.z);
        }
        Some(rect)
    }

    /// Whether `cell` lies inside the rectangle.
    #[must_use]
    pub const fn contains(&self, cell: GridCell) -> bool {
        cell.x >= self.min.x && cell.x <= self.max.x && cell.z >= self.min.z && cell.z <= self.max.z
    }

    /// Whether two rectangles share at least one cell.
    #[must_use]
    pub const fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.z <= other.max.z
            && other.min.z <= self.max.z
    }

    /// Grow the rectangle by `n` cells on every side.
    #[must_use]
    pub const fn expand(&self, n: i32) -> Self {
        Self {
            min: self.min.offset(-n, -n),
            max: self.max.offset(n, n),
        }
    }

    /// All cells in the rectangle, row-major.
    #[must_use]
    pub fn cells(&self) -> Vec<GridCell> {
        let mut cells = Vec::new();
        for z in self.min.z..=self.max.z {
            for x in self.min.x..=self.max.x {
                cells.push(GridCell::new(x, z));
            }
        }
        cells
    }
}

/// Grid dimensions and the grid↔world mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridLayout {
    /// Grid width in cells (x).
    width: u32,
    /// Grid depth in cells (z).
    depth: u32,
    /// Size of each cell in world units.
    #[serde(with = "fixed_serde")]
    cell_size: Fixed,
}

impl GridLayout {
    /// Create a new layout.
    ///
    /// # Panics
    ///
    /// Panics if `width` or `depth` is zero, or if `cell_size` is not positive.
    #[must_use]
    pub fn new(width: u32, depth: u32, cell_size: Fixed) -> Self {
        assert!(width > 0, "GridLayout width must be positive");
        assert!(depth > 0, "GridLayout depth must be positive");
        assert!(cell_size > Fixed::ZERO, "GridLayout cell_size must be positive");

        Self {
            width,
            depth,
            cell_size,
        }
    }

    /// Grid width in cells.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Grid depth in cells.
    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    /// Cell size in world units.
    #[must_use]
    pub const fn cell_size(&self) -> Fixed {
        self.cell_size
    }

    /// Check if a cell is within grid bounds.
    #[must_use]
    pub const fn in_bounds(&self, cell: GridCell) -> bool {
        cell.x >= 0 && cell.z >= 0 && (cell.x as u32) < self.width && (cell.z as u32) < self.depth
    }

    /// Dense key of an in-bounds cell.
    #[must_use]
    pub const fn cell_key(&self, cell: GridCell) -> Option<CellKey> {
        if self.in_bounds(cell) {
            Some(cell.x as u32 + cell.z as u32 * self.width)
        } else {
            None
        }
    }

    /// Inverse of [`cell_key`](Self::cell_key).
    #[must_use]
    pub const fn cell_from_key(&self, key: CellKey) -> GridCell {
        GridCell::new((key % self.width) as i32, (key / self.width) as i32)
    }

    /// Convert a world position to the cell containing it.
    ///
    /// Positions off the map produce out-of-bounds cells rather than `None`
    /// so callers can decide how to treat them.
    #[must_use]
    pub fn world_to_grid(&self, pos: Vec2Fixed) -> GridCell {
        GridCell::new(
            pos.x.saturating_div(self.cell_size).floor().to_num::<i32>(),
            pos.z.saturating_div(self.cell_size).floor().to_num::<i32>(),
        )
    }

    /// Convert grid coordinates to world position (north-west corner of cell).
    #[must_use]
    pub fn grid_to_world(&self, cell: GridCell) -> Vec2Fixed {
        Vec2Fixed::new(
            Fixed::from_num(cell.x) * self.cell_size,
            Fixed::from_num(cell.z) * self.cell_size,
        )
    }

    /// World position of the centre of a footprint anchored at `anchor`.
    ///
    /// Converting the result back with [`world_to_grid`](Self::world_to_grid)
    /// yields `anchor` again for every footprint size.
    #[must_use]
    pub fn footprint_center(&self, anchor: GridCell, footprint: Footprint) -> Vec2Fixed {
        let rect = footprint.rect_at(anchor);
        let corner = self.grid_to_world(rect.min);
        Vec2Fixed::new(
            corner.x + Fixed::from_num(footprint.width) * self.cell_size / Fixed::from_num(2),
            corner.z + Fixed::from_num(footprint.depth) * self.cell_size / Fixed::from_num(2),
        )
    }

    /// Number of cells needed to cover `radius` world units: `ceil(radius / cell_size)`.
    #[must_use]
    pub fn cell_radius(&self, radius: Fixed) -> i32 {
        if radius <= Fixed::ZERO {
            return 0;
        }
        radius
            .saturating_div(self.cell_size)
            .saturating_ceil()
            .to_num::<i32>()
    }
}

/// Terrain height source.
///
/// Heights only affect the world-space targets handed to the movement layer;
/// occupancy is purely two-dimensional.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Terrain {
    /// Uniform height everywhere.
    Flat {
        /// Ground height.
        #[serde(with = "fixed_serde")]
        height: Fixed,
    },
    /// Per-cell elevation levels.
    Stepped {
        /// Row length of `levels` (matches the grid width).
        width: u32,
        /// Elevation level per cell, row-major.
        levels: Vec<u8>,
        /// World height of one elevation level.
        #[serde(with = "fixed_serde")]
        step: Fixed,
    },
}

impl Terrain {
    /// Flat terrain at height zero.
    #[must_use]
    pub const fn flat() -> Self {
        Self::Flat {
            height: Fixed::ZERO,
        }
    }

    /// Height of the ground in `cell`. Cells off the map read as level 0.
    #[must_use]
    pub fn height_at(&self, cell: GridCell) -> Fixed {
        match self {
            Self::Flat { height } => *height,
            Self::Stepped {
                width,
                levels,
                step,
            } => {
                if cell.x < 0 || cell.z < 0 || cell.x as u32 >= *width {
                    return Fixed::ZERO;
                }
                let index = cell.z as usize * *width as usize + cell.x as usize;
                levels
                    .get(index)
                    .map_or(Fixed::ZERO, |&level| Fixed::from_num(level) * *step)
            }
        }
    }
}

impl Default for Terrain {
    fn default() -> Self {
        Self::flat()
    }
}
