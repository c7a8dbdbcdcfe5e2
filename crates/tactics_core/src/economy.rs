//! Player gold and supply ledger.
//!
//! The placement core only needs to read a player's funds, charge a cost on
//! commit, and give it back on cancellation. That surface is the
//! [`Treasury`] trait; [`Economy`] is the in-core implementation.
//!
//! All calculations use integer math for deterministic simulation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::Cost;
use crate::ids::PlayerId;

/// Snapshot of one player's funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PlayerResources {
    /// Current gold stockpile.
    pub gold: u32,
    /// Supply consumed by living squads.
    pub supply_used: u32,
    /// Maximum supply.
    pub supply_cap: u32,
}

impl PlayerResources {
    /// Create a new resource snapshot with no supply in use.
    #[must_use]
    pub const fn new(gold: u32, supply_cap: u32) -> Self {
        Self {
            gold,
            supply_used: 0,
            supply_cap,
        }
    }

    /// Supply still free.
    #[must_use]
    pub const fn supply_available(&self) -> u32 {
        self.supply_cap.saturating_sub(self.supply_used)
    }

    /// Check if player can afford the gold part of a cost.
    #[must_use]
    pub const fn can_afford(&self, cost: Cost) -> bool {
        self.gold >= cost.gold
    }
}

/// Gold/supply query and mutation surface consumed by the placement core.
pub trait Treasury {
    /// Current funds of `player` (zeroes for unknown players).
    fn resources(&self, player: PlayerId) -> PlayerResources;

    /// Charge `cost`. Returns `false` and changes nothing if unaffordable.
    fn deduct(&mut self, player: PlayerId, cost: Cost) -> bool;

    /// Return a previously charged `cost` in full.
    fn refund(&mut self, player: PlayerId, cost: Cost);

    /// Free supply held by a squad that no longer exists.
    fn release_supply(&mut self, player: PlayerId, supply: u32);
}

/// Per-player ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Economy {
    players: BTreeMap<PlayerId, PlayerResources>,
}

impl Economy {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or reset) a player's funds.
    pub fn set_player(&mut self, player: PlayerId, resources: PlayerResources) {
        self.players.insert(player, resources);
    }

    /// Add gold to a player's stockpile.
    pub fn deposit(&mut self, player: PlayerId, gold: u32) {
        let entry = self.players.entry(player).or_default();
        entry.gold = entry.gold.saturating_add(gold);
    }

    /// Registered players in id order.
    pub fn players(&self) -> impl Iterator<Item = (PlayerId, &PlayerResources)> {
        self.players.iter().map(|(id, res)| (*id, res))
    }
}

impl Treasury for Economy {
    fn resources(&self, player: PlayerId) -> PlayerResources {
        self.players.get(&player).copied().unwrap_or_default()
    }

    fn deduct(&mut self, player: PlayerId, cost: Cost) -> bool {
        let Some(entry) = self.players.get_mut(&player) else {
            return cost == Cost::FREE;
        };
        if !entry.can_afford(cost) {
            return false;
        }
        entry.gold -= cost.gold;
        entry.supply_used = entry.supply_used.saturating_add(cost.supply);
        true
    }

    fn refund(&mut self, player: PlayerId, cost: Cost) {
        let entry = self.players.entry(player).or_default();
        entry.gold = entry.gold.saturating_add(cost.gold);
        entry.supply_used = entry.supply_used.saturating_sub(cost.supply);
    }

    fn release_supply(&mut self, player: PlayerId, supply: u32) {
        if let Some(entry) = self.players.get_mut(&player) {
            entry.supply_used = entry.supply_used.saturating_sub(supply);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P1: PlayerId = PlayerId(1);

    #[test]
    fn test_deduct_and_refund_are_exact() {
        let mut economy = Economy::new();
        economy.set_player(P1, PlayerResources::new(200, 10));

        assert!(economy.deduct(P1, Cost::new(150, 2)));
        let after = economy.resources(P1);
        assert_eq!(after.gold, 50);
        assert_eq!(after.supply_used, 2);

        economy.refund(P1, Cost::new(150, 2));
        assert_eq!(economy.resources(P1), PlayerResources::new(200, 10));
    }

    #[test]
    fn test_deduct_rejects_unaffordable() {
        let mut economy = Economy::new();
        economy.set_player(P1, PlayerResources::new(100, 10));

        assert!(!economy.deduct(P1, Cost::new(150, 0)));
        assert_eq!(economy.resources(P1).gold, 100);
    }

    #[test]
    fn test_unknown_player_reads_as_broke() {
        let mut economy = Economy::new();
        assert_eq!(economy.resources(PlayerId(9)), PlayerResources::default());
        assert!(!economy.deduct(PlayerId(9), Cost::new(1, 0)));
        assert!(economy.deduct(PlayerId(9), Cost::FREE));
    }

    #[test]
    fn test_release_supply() {
        let mut economy = Economy::new();
        economy.set_player(P1, PlayerResources::new(100, 10));
        assert!(economy.deduct(P1, Cost::new(10, 4)));

        economy.release_supply(P1, 4);
        let res = economy.resources(P1);
        assert_eq!(res.supply_used, 0);
        assert_eq!(res.gold, 90);
        assert_eq!(res.supply_available(), 10);
    }

    #[test]
    fn test_deposit() {
        let mut economy = Economy::new();
        economy.deposit(P1, 25);
        economy.deposit(P1, 25);
        assert_eq!(economy.resources(P1).gold, 50);
    }
}
