//! Test fixtures and helpers.
//!
//! The sample catalog and battlefield config are the files shipped in
//! `assets/data/`, so fixtures and data files cannot drift apart.

use fixed::types::I32F32;
use serde::Serialize;
use tactics_core::prelude::*;

/// Sample catalog, as shipped.
pub const CATALOG_RON: &str = include_str!("../../../assets/data/catalog.ron");

/// Sample battlefield config, as shipped.
pub const BATTLEFIELD_RON: &str = include_str!("../../../assets/data/battlefield.ron");

/// Three-member 1×1 infantry squad: 100 gold, 2 supply.
pub const RIFLE_SQUAD: UnitTypeId = UnitTypeId(1);
/// Single 1×1 builder: 50 gold, 1 supply.
pub const ENGINEER: UnitTypeId = UnitTypeId(2);
/// Single 2×2 unit: 200 gold, 3 supply.
pub const WALKER: UnitTypeId = UnitTypeId(3);

/// 2×2 open-ground building: 150 gold.
pub const BARRACKS: UnitTypeId = UnitTypeId(1);
/// 2×2 building that must cover a resource vein: 75 gold.
pub const EXTRACTOR: UnitTypeId = UnitTypeId(2);
/// 1×1 building: 25 gold.
pub const WALL: UnitTypeId = UnitTypeId(3);

/// Player 1 on team 0.
pub const BLUE: Owner = Owner::new(PlayerId(1), TeamId(0));
/// Player 2 on team 1.
pub const RED: Owner = Owner::new(PlayerId(2), TeamId(1));

/// The first configured vein covers these cells.
pub const VEIN_CELLS: [(i32, i32); 4] = [(20, 20), (21, 20), (20, 21), (21, 21)];

/// Anchor that makes a 2×2 footprint cover the first vein exactly.
#[must_use]
pub const fn vein_anchor() -> GridCell {
    GridCell::new(21, 21)
}

/// Parse the sample catalog.
///
/// # Panics
///
/// Panics if the shipped catalog is invalid.
#[must_use]
pub fn sample_catalog() -> Catalog {
    Catalog::from_ron_str(CATALOG_RON, "assets/data/catalog.ron")
        .expect("shipped catalog must parse")
}

/// Parse the sample battlefield config.
///
/// # Panics
///
/// Panics if the shipped config is invalid.
#[must_use]
pub fn sample_config() -> BattlefieldConfig {
    BattlefieldConfig::from_ron_str(BATTLEFIELD_RON, "assets/data/battlefield.ron")
        .expect("shipped config must parse")
}

/// An authoritative battlefield built from the sample data.
///
/// # Panics
///
/// Panics if the shipped data is invalid.
#[must_use]
pub fn battlefield() -> Battlefield {
    Battlefield::new(sample_config(), sample_catalog()).expect("shipped data must be valid")
}

/// A replica battlefield built from the sample data.
///
/// # Panics
///
/// Panics if the shipped data is invalid.
#[must_use]
pub fn replica() -> Battlefield {
    Battlefield::new(
        sample_config().with_role(PeerRole::Replica),
        sample_catalog(),
    )
    .expect("shipped data must be valid")
}

/// Shorthand for a grid cell.
#[must_use]
pub const fn cell(x: i32, z: i32) -> GridCell {
    GridCell::new(x, z)
}

/// Shorthand for a world position.
#[must_use]
pub fn pos(x: i32, z: i32) -> Vec2Fixed {
    Vec2Fixed::from_ints(x, z)
}

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// Place an engineer for `owner` at `at` and return its entity id.
///
/// # Panics
///
/// Panics if the placement is rejected.
pub fn spawn_engineer(battlefield: &mut Battlefield, owner: Owner, at: GridCell) -> EntityId {
    battlefield
        .submit(PlacementRequest::unit(ENGINEER, at), owner)
        .expect("engineer placement must succeed")
        .squad_units[0]
}

/// Render a value as pretty RON with struct names, for writing data files
/// in tests.
///
/// # Panics
///
/// Panics if the value cannot be represented in RON.
#[must_use]
pub fn to_ron<T: Serialize>(value: &T) -> String {
    let pretty = ron::ser::PrettyConfig::default().struct_names(true);
    ron::ser::to_string_pretty(value, pretty)
        .expect("value must serialize to RON")
}
