//! Unit and building descriptors, resolved from data-driven catalog files.
//!
//! Descriptors are loaded once from RON and looked up by
//! `(collection, unit type)`. The lookup hands back a tagged
//! [`Descriptor`] so callers never have to guess which kind of thing
//! they are placing.
//!
//! # Example RON
//!
//! ```ron
//! CatalogData(
//!     units: [
//!         UnitData(id: 0, name: "militia", cost: 50, supply: 1,
//!                  footprint: (width: 1, depth: 1), squad_size: 3),
//!     ],
//!     buildings: [
//!         BuildingData(id: 0, name: "barracks", cost: 150,
//!                      footprint: (width: 2, depth: 2), build_time: 200),
//!     ],
//! )
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::coords::Footprint;
use crate::error::{GameError, Result};

/// Which table a type id indexes into.
///
/// Serialized as a numeric code on every wire and file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Collection {
    /// Mobile units, spawned in squads.
    Unit,
    /// Static structures.
    Building,
    /// Short-lived projectiles tracked by the grid but never placed.
    Projectile,
}

impl Collection {
    /// Numeric wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Unit => 0,
            Self::Building => 1,
            Self::Projectile => 2,
        }
    }
}

impl From<Collection> for u8 {
    fn from(collection: Collection) -> Self {
        collection.code()
    }
}

impl TryFrom<u8> for Collection {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Unit),
            1 => Ok(Self::Building),
            2 => Ok(Self::Projectile),
            other => Err(format!("unknown collection code {other}")),
        }
    }
}

/// Index of a type within its collection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct UnitTypeId(pub u32);

impl UnitTypeId {
    /// Create a new unit type ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }
}

/// Price of a placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Cost {
    /// Gold charged up front.
    pub gold: u32,
    /// Supply consumed while the squad lives.
    pub supply: u32,
}

impl Cost {
    /// Create a new cost.
    #[must_use]
    pub const fn new(gold: u32, supply: u32) -> Self {
        Self { gold, supply }
    }

    /// No cost.
    pub const FREE: Self = Self { gold: 0, supply: 0 };
}

/// Where a building is allowed to stand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SiteRequirement {
    /// Anywhere free, except on top of a resource vein.
    #[default]
    Open,
    /// Must exactly cover one unclaimed resource vein.
    ResourceVein,
}

/// Resolved unit type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDescriptor {
    /// Type id within [`Collection::Unit`].
    pub type_id: UnitTypeId,
    /// Display name.
    pub name: String,
    /// Gold and supply per squad.
    pub cost: Cost,
    /// Cells taken by each squad member.
    pub footprint: Footprint,
    /// Members spawned per placement.
    pub squad_size: u32,
    /// Whether members can be ordered to construct buildings.
    pub can_build: bool,
}

/// Resolved building type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildingDescriptor {
    /// Type id within [`Collection::Building`].
    pub type_id: UnitTypeId,
    /// Display name.
    pub name: String,
    /// Gold cost (buildings never consume supply).
    pub cost: Cost,
    /// Cells covered by the building.
    pub footprint: Footprint,
    /// Construction time in ticks once the builder arrives.
    pub build_time: u32,
    /// Site constraint checked during validation.
    pub site: SiteRequirement,
}

/// A catalog entry, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Descriptor {
    /// A unit type.
    Unit(UnitDescriptor),
    /// A building type.
    Building(BuildingDescriptor),
}

impl Descriptor {
    /// Collection this descriptor belongs to.
    #[must_use]
    pub const fn collection(&self) -> Collection {
        match self {
            Self::Unit(_) => Collection::Unit,
            Self::Building(_) => Collection::Building,
        }
    }

    /// Type id within the collection.
    #[must_use]
    pub const fn type_id(&self) -> UnitTypeId {
        match self {
            Self::Unit(unit) => unit.type_id,
            Self::Building(building) => building.type_id,
        }
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Unit(unit) => &unit.name,
            Self::Building(building) => &building.name,
        }
    }

    /// Placement cost.
    #[must_use]
    pub const fn cost(&self) -> Cost {
        match self {
            Self::Unit(unit) => unit.cost,
            Self::Building(building) => Cost::new(building.cost.gold, 0),
        }
    }

    /// Footprint of a single member.
    #[must_use]
    pub const fn footprint(&self) -> Footprint {
        match self {
            Self::Unit(unit) => unit.footprint,
            Self::Building(building) => building.footprint,
        }
    }

    /// Members created per placement (always 1 for buildings).
    #[must_use]
    pub const fn squad_size(&self) -> u32 {
        match self {
            Self::Unit(unit) => unit.squad_size,
            Self::Building(_) => 1,
        }
    }

    /// Construction time in ticks (0 for units).
    #[must_use]
    pub const fn build_time(&self) -> u32 {
        match self {
            Self::Unit(_) => 0,
            Self::Building(building) => building.build_time,
        }
    }

    /// Whether this is a building.
    #[must_use]
    pub const fn is_building(&self) -> bool {
        matches!(self, Self::Building(_))
    }
}

// ============================================================================
// Data files
// ============================================================================

/// Unit entry as written in a catalog file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitData {
    /// Type id; must be unique among units.
    pub id: u32,
    /// Display name.
    pub name: String,
    /// Gold cost per squad.
    pub cost: u32,
    /// Supply per squad.
    #[serde(default)]
    pub supply: u32,
    /// Cells per member.
    #[serde(default)]
    pub footprint: Footprint,
    /// Members per squad.
    #[serde(default = "default_squad_size")]
    pub squad_size: u32,
    /// Whether members can construct buildings.
    #[serde(default)]
    pub can_build: bool,
}

/// Building entry as written in a catalog file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildingData {
    /// Type id; must be unique among buildings.
    pub id: u32,
    /// Display name.
    pub name: String,
    /// Gold cost.
    pub cost: u32,
    /// Cells covered.
    #[serde(default)]
    pub footprint: Footprint,
    /// Construction time in ticks.
    #[serde(default)]
    pub build_time: u32,
    /// Site constraint.
    #[serde(default)]
    pub site: SiteRequirement,
}

const fn default_squad_size() -> u32 {
    1
}

/// Root of a catalog file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogData {
    /// Unit types.
    #[serde(default)]
    pub units: Vec<UnitData>,
    /// Building types.
    #[serde(default)]
    pub buildings: Vec<BuildingData>,
}

impl CatalogData {
    /// Parse catalog data from a RON string.
    ///
    /// `label` is used in error messages (usually the file path).
    pub fn from_ron_str(source: &str, label: &str) -> Result<Self> {
        ron::from_str(source).map_err(|e| GameError::DataParseError {
            path: label.to_string(),
            message: e.to_string(),
        })
    }

    /// List every structural problem in this data.
    ///
    /// An empty list means [`Catalog::from_data`] will accept it.
    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let mut seen = BTreeSet::new();
        for unit in &self.units {
            if !seen.insert(unit.id) {
                problems.push(format!("duplicate unit id {}", unit.id));
            }
            if unit.footprint.cell_count() == 0 {
                problems.push(format!("unit '{}' has an empty footprint", unit.name));
            }
            if unit.squad_size == 0 {
                problems.push(format!("unit '{}' has a squad size of zero", unit.name));
            }
        }

        let mut seen = BTreeSet::new();
        for building in &self.buildings {
            if !seen.insert(building.id) {
                problems.push(format!("duplicate building id {}", building.id));
            }
            if building.footprint.cell_count() == 0 {
                problems.push(format!("building '{}' has an empty footprint", building.name));
            }
        }

        problems
    }
}

/// Descriptor lookup table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    units: BTreeMap<UnitTypeId, Descriptor>,
    buildings: BTreeMap<UnitTypeId, Descriptor>,
}

impl Catalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from parsed data, rejecting structural problems.
    pub fn from_data(data: &CatalogData) -> Result<Self> {
        let problems = data.problems();
        if !problems.is_empty() {
            return Err(GameError::InvalidCatalog(problems.join("; ")));
        }

        let mut catalog = Self::new();
        for unit in &data.units {
            catalog.insert(Descriptor::Unit(UnitDescriptor {
                type_id: UnitTypeId(unit.id),
                name: unit.name.clone(),
                cost: Cost::new(unit.cost, unit.supply),
                footprint: unit.footprint,
                squad_size: unit.squad_size,
                can_build: unit.can_build,
            }));
        }
        for building in &data.buildings {
            catalog.insert(Descriptor::Building(BuildingDescriptor {
                type_id: UnitTypeId(building.id),
                name: building.name.clone(),
                cost: Cost::new(building.cost, 0),
                footprint: building.footprint,
                build_time: building.build_time,
                site: building.site,
            }));
        }
        Ok(catalog)
    }

    /// Parse and build a catalog from a RON string.
    pub fn from_ron_str(source: &str, label: &str) -> Result<Self> {
        Self::from_data(&CatalogData::from_ron_str(source, label)?)
    }

    /// Add or replace a descriptor.
    pub fn insert(&mut self, descriptor: Descriptor) {
        let table = match descriptor.collection() {
            Collection::Building => &mut self.buildings,
            _ => &mut self.units,
        };
        table.insert(descriptor.type_id(), descriptor);
    }

    /// Resolve `(collection, type)` to a descriptor.
    ///
    /// Projectiles are never placed, so they never resolve.
    #[must_use]
    pub fn resolve(&self, collection: Collection, unit_type: UnitTypeId) -> Option<&Descriptor> {
        match collection {
            Collection::Unit => self.units.get(&unit_type),
            Collection::Building => self.buildings.get(&unit_type),
            Collection::Projectile => None,
        }
    }

    /// Number of descriptors in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len() + self.buildings.len()
    }

    /// Whether the catalog has no descriptors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        CatalogData(
            units: [
                UnitData(id: 0, name: "militia", cost: 50, supply: 1,
                         footprint: (width: 1, depth: 1), squad_size: 3),
                UnitData(id: 1, name: "worker", cost: 40, supply: 1, can_build: true),
            ],
            buildings: [
                BuildingData(id: 0, name: "barracks", cost: 150,
                             footprint: (width: 2, depth: 2), build_time: 200),
                BuildingData(id: 1, name: "mine", cost: 100,
                             footprint: (width: 2, depth: 2), build_time: 120,
                             site: ResourceVein),
            ],
        )
    "#;

    #[test]
    fn test_parse_sample_catalog() {
        let catalog = Catalog::from_ron_str(SAMPLE, "sample").unwrap();
        assert_eq!(catalog.len(), 4);

        let militia = catalog
            .resolve(Collection::Unit, UnitTypeId(0))
            .expect("militia should resolve");
        assert_eq!(militia.name(), "militia");
        assert_eq!(militia.squad_size(), 3);
        assert_eq!(militia.cost(), Cost::new(50, 1));
        assert!(!militia.is_building());

        let worker = catalog.resolve(Collection::Unit, UnitTypeId(1)).unwrap();
        assert_eq!(worker.squad_size(), 1);
        assert!(matches!(worker, Descriptor::Unit(u) if u.can_build));

        let mine = catalog.resolve(Collection::Building, UnitTypeId(1)).unwrap();
        assert!(matches!(
            mine,
            Descriptor::Building(b) if b.site == SiteRequirement::ResourceVein
        ));
        assert_eq!(mine.build_time(), 120);
    }

    #[test]
    fn test_collections_do_not_alias() {
        let catalog = Catalog::from_ron_str(SAMPLE, "sample").unwrap();
        let unit = catalog.resolve(Collection::Unit, UnitTypeId(0)).unwrap();
        let building = catalog.resolve(Collection::Building, UnitTypeId(0)).unwrap();
        assert_ne!(unit.name(), building.name());
        assert!(catalog.resolve(Collection::Projectile, UnitTypeId(0)).is_none());
        assert!(catalog.resolve(Collection::Unit, UnitTypeId(99)).is_none());
    }

    #[test]
    fn test_building_cost_has_no_supply() {
        let descriptor = Descriptor::Building(BuildingDescriptor {
            type_id: UnitTypeId(0),
            name: "tower".into(),
            cost: Cost::new(80, 5),
            footprint: Footprint::square(1),
            build_time: 10,
            site: SiteRequirement::Open,
        });
        assert_eq!(descriptor.cost(), Cost::new(80, 0));
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let data = CatalogData {
            units: vec![
                UnitData {
                    id: 3,
                    name: "a".into(),
                    cost: 1,
                    supply: 0,
                    footprint: Footprint::default(),
                    squad_size: 1,
                    can_build: false,
                },
                UnitData {
                    id: 3,
                    name: "b".into(),
                    cost: 1,
                    supply: 0,
                    footprint: Footprint::default(),
                    squad_size: 0,
                    can_build: false,
                },
            ],
            buildings: Vec::new(),
        };

        let problems = data.problems();
        assert_eq!(problems.len(), 2);
        assert!(matches!(
            Catalog::from_data(&data),
            Err(GameError::InvalidCatalog(_))
        ));
    }

    #[test]
    fn test_parse_error_names_the_source() {
        let err = Catalog::from_ron_str("CatalogData(units: [", "broken.ron").unwrap_err();
        assert!(err.to_string().contains("broken.ron"));
    }

    #[test]
    fn test_collection_codes() {
        for collection in [Collection::Unit, Collection::Building, Collection::Projectile] {
            assert_eq!(Collection::try_from(collection.code()), Ok(collection));
        }
        assert!(Collection::try_from(7).is_err());
    }
}
