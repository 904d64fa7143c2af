//! The deterministic combat simulation.
//!
//! This crate is a pure library: no I/O, no clocks, no global state. Every
//! random choice draws from a seeded generator carried inside the
//! [`GameState`], so identical inputs always produce identical outputs,
//! including across serialization round trips. The server invokes it
//! exclusively; clients may mirror it for prediction but are never trusted.

pub mod action;
pub mod ai;
pub mod combat;
pub mod error;
pub mod map;
pub mod rng;
pub mod state;
pub mod unit;

pub use action::execute_action;
pub use ai::monster_action;
pub use combat::start_combat;
pub use error::InvalidAction;
pub use map::{GameMap, MapOptions, Tile, generate_map};
pub use state::{CombatState, GameState, LootDrop, PlayerInventory, TurnState};
pub use unit::{PlayerUnitSpec, Unit, UnitOptions, UnitStats, generate_units};

/// XP needed per level. `level = xp / 1000 + 1`.
pub const XP_PER_LEVEL: u64 = 1000;

/// Derives the level from accumulated experience.
pub fn level_for_xp(xp: u64) -> u32 {
    (xp / XP_PER_LEVEL) as u32 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_derivation() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(999), 1);
        assert_eq!(level_for_xp(1000), 2);
        assert_eq!(level_for_xp(12500), 13);
    }
}
