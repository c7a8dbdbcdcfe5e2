//! Battlefield configuration, loaded from RON.
//!
//! # Example RON
//!
//! ```ron
//! BattlefieldConfig(
//!     grid_width: 64,
//!     grid_depth: 64,
//!     cell_size: 2,
//!     adjacency_radius: 6,
//!     starting_gold: 1000,
//!     starting_supply_cap: 20,
//!     role: Authoritative,
//!     veins: [VeinData(x: 10, z: 10, width: 2, depth: 2)],
//!     players: [PlayerSetup(player: 1, team: 0)],
//! )
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::coords::{CellRect, GridCell, GridLayout, Terrain};
use crate::error::{GameError, Result};
use crate::ids::{Owner, PlayerId, TeamId};
use crate::math::Fixed;
use crate::sites::ResourceVeins;

/// Which side of the lock-step pair this peer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PeerRole {
    /// Allocates placement ids and validates requests.
    #[default]
    Authoritative,
    /// Replays placements allocated by the authority.
    Replica,
}

/// A resource vein as written in a config file: north-west corner plus size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VeinData {
    /// Smallest x.
    pub x: i32,
    /// Smallest z.
    pub z: i32,
    /// Extent along x.
    pub width: u32,
    /// Extent along z.
    pub depth: u32,
}

impl VeinData {
    /// Cells covered by the vein.
    #[must_use]
    pub fn area(&self) -> CellRect {
        let min = GridCell::new(self.x, self.z);
        CellRect {
            min,
            max: min.offset(self.width as i32 - 1, self.depth as i32 - 1),
        }
    }
}

/// A player slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSetup {
    /// Player id.
    pub player: u8,
    /// Team id.
    pub team: u8,
}

impl PlayerSetup {
    /// The `(player, team)` pair.
    #[must_use]
    pub const fn owner(&self) -> Owner {
        Owner::new(PlayerId(self.player), TeamId(self.team))
    }
}

/// Per-match settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattlefieldConfig {
    /// Grid width in cells.
    #[serde(default = "default_grid_size")]
    pub grid_width: u32,
    /// Grid depth in cells.
    #[serde(default = "default_grid_size")]
    pub grid_depth: u32,
    /// World units per cell.
    #[serde(default = "default_cell_size")]
    pub cell_size: u32,
    /// Rings searched when looking for a spawn cell next to a building.
    #[serde(default = "default_adjacency_radius")]
    pub adjacency_radius: u32,
    /// Gold each player starts with.
    #[serde(default = "default_starting_gold")]
    pub starting_gold: u32,
    /// Supply cap each player starts with.
    #[serde(default = "default_supply_cap")]
    pub starting_supply_cap: u32,
    /// Whether this peer allocates ids.
    #[serde(default)]
    pub role: PeerRole,
    /// Uniform ground height.
    #[serde(default)]
    pub ground_height: i32,
    /// Resource veins.
    #[serde(default)]
    pub veins: Vec<VeinData>,
    /// Player slots.
    #[serde(default)]
    pub players: Vec<PlayerSetup>,
}

const fn default_grid_size() -> u32 {
    64
}

const fn default_cell_size() -> u32 {
    1
}

const fn default_adjacency_radius() -> u32 {
    8
}

const fn default_starting_gold() -> u32 {
    1000
}

const fn default_supply_cap() -> u32 {
    20
}

impl Default for BattlefieldConfig {
    fn default() -> Self {
        Self {
            grid_width: default_grid_size(),
            grid_depth: default_grid_size(),
            cell_size: default_cell_size(),
            adjacency_radius: default_adjacency_radius(),
            starting_gold: default_starting_gold(),
            starting_supply_cap: default_supply_cap(),
            role: PeerRole::default(),
            ground_height: 0,
            veins: Vec::new(),
            players: Vec::new(),
        }
    }
}

impl BattlefieldConfig {
    /// Load a config from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| GameError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_ron_str(&contents, &path.display().to_string())
    }

    /// Parse a config from a RON string.
    pub fn from_ron_str(source: &str, label: &str) -> Result<Self> {
        ron::from_str(source).map_err(|e| GameError::DataParseError {
            path: label.to_string(),
            message: e.to_string(),
        })
    }

    /// Same config with a different role.
    #[must_use]
    pub fn with_role(mut self, role: PeerRole) -> Self {
        self.role = role;
        self
    }

    /// List every problem with this config.
    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.grid_width == 0 || self.grid_depth == 0 {
            problems.push(format!(
                "grid must be at least 1x1, got {}x{}",
                self.grid_width, self.grid_depth
            ));
        }
        if self.cell_size == 0 {
            problems.push("cell_size must be positive".to_string());
        }
        if self.adjacency_radius == 0 {
            problems.push("adjacency_radius must be positive".to_string());
        }

        for (index, vein) in self.veins.iter().enumerate() {
            if vein.width == 0 || vein.depth == 0 {
                problems.push(format!("vein {index} has an empty area"));
                continue;
            }
            let area = vein.area();
            let on_grid = area.min.x >= 0
                && area.min.z >= 0
                && (area.max.x as i64) < i64::from(self.grid_width)
                && (area.max.z as i64) < i64::from(self.grid_depth);
            if !on_grid {
                problems.push(format!("vein {index} extends outside the grid"));
            }
            for (other_index, other) in self.veins.iter().enumerate().take(index) {
                if other.width > 0 && other.depth > 0 && other.area().intersects(&area) {
                    problems.push(format!("veins {other_index} and {index} overlap"));
                }
            }
        }

        let mut seen = BTreeSet::new();
        for setup in &self.players {
            if !seen.insert(setup.player) {
                problems.push(format!("player {} is listed twice", setup.player));
            }
        }

        problems
    }

    /// Reject configs with any problem.
    pub fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(GameError::InvalidConfig(problems.join("; ")))
        }
    }

    /// Grid layout described by this config. Call [`validate`](Self::validate)
    /// first; zero sizes panic.
    #[must_use]
    pub fn layout(&self) -> GridLayout {
        GridLayout::new(self.grid_width, self.grid_depth, Fixed::from_num(self.cell_size))
    }

    /// Terrain described by this config.
    #[must_use]
    pub fn terrain(&self) -> Terrain {
        Terrain::Flat {
            height: Fixed::from_num(self.ground_height),
        }
    }

    /// Vein registry described by this config, in listed order.
    #[must_use]
    pub fn resource_veins(&self) -> ResourceVeins {
        let mut veins = ResourceVeins::new();
        for vein in &self.veins {
            veins.add(vein.area());
        }
        veins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BattlefieldConfig::default();
        assert!(config.problems().is_empty());
        assert_eq!(config.role, PeerRole::Authoritative);
    }

    #[test]
    fn test_parse_ron_with_defaults() {
        let config = BattlefieldConfig::from_ron_str(
            "BattlefieldConfig(grid_width: 32, role: Replica, veins: [VeinData(x: 4, z: 4, width: 2, depth: 2)])",
            "inline",
        )
        .unwrap();

        assert_eq!(config.grid_width, 32);
        assert_eq!(config.grid_depth, 64);
        assert_eq!(config.role, PeerRole::Replica);
        assert_eq!(config.resource_veins().len(), 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_problems_are_reported() {
        let config = BattlefieldConfig {
            grid_width: 8,
            grid_depth: 8,
            cell_size: 0,
            veins: vec![
                VeinData { x: 6, z: 6, width: 4, depth: 1 },
                VeinData { x: 0, z: 0, width: 2, depth: 2 },
                VeinData { x: 1, z: 1, width: 2, depth: 2 },
            ],
            players: vec![
                PlayerSetup { player: 1, team: 0 },
                PlayerSetup { player: 1, team: 1 },
            ],
            ..Default::default()
        };

        let problems = config.problems();
        assert_eq!(problems.len(), 4, "{problems:?}");
        assert!(matches!(config.validate(), Err(GameError::InvalidConfig(_))));
    }

    #[test]
    fn test_vein_area() {
        let vein = VeinData { x: 3, z: 5, width: 2, depth: 3 };
        let area = vein.area();
        assert_eq!(area.min, GridCell::new(3, 5));
        assert_eq!(area.max, GridCell::new(4, 7));
    }

    #[test]
    fn test_parse_error_is_labelled() {
        let err = BattlefieldConfig::from_ron_str("BattlefieldConfig(", "match.ron").unwrap_err();
        assert!(err.to_string().contains("match.ron"));
    }
}
