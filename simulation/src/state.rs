//! The authoritative simulation snapshot.

use crate::map::GameMap;
use crate::rng::SeededRng;
use crate::unit::Unit;
use protocol::ids::{DropId, UnitId};
use protocol::{CombatPhase, GameEvent, GameEventKind, Position, Weapon};
use serde::{Deserialize, Serialize};

/// Per-turn counters of the unit currently at bat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnState {
    pub movement_remaining: u32,
    pub action_used: bool,
}

/// The combat block: phase, round counter and the fixed initiative order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatState {
    pub phase: CombatPhase,
    pub round: u32,
    /// Unit ids in turn order. Set once at combat start; entries only leave
    /// when their unit is defeated.
    pub initiative: Vec<UnitId>,
    /// Index into `initiative` of the unit whose turn it is.
    pub current_turn: usize,
    pub turn_state: TurnState,
}

/// One completed turn, kept for the session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    pub round: u32,
    pub unit_id: UnitId,
}

/// A loot drop lying on the floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LootDrop {
    pub id: DropId,
    pub position: Position,
    pub gold: u64,
    pub silver: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weapon: Option<Weapon>,
}

/// What the party collected so far this game.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInventory {
    pub gold: u64,
    pub silver: u64,
    #[serde(default)]
    pub weapons: Vec<Weapon>,
}

/// The full game state. Everything the simulation reads or writes lives
/// here, including the random stream, so a serialized snapshot continues
/// exactly where it left off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub map: GameMap,
    pub units: Vec<Unit>,
    pub combat: CombatState,
    pub turn_history: Vec<TurnRecord>,
    pub loot_drops: Vec<LootDrop>,
    pub player_inventory: PlayerInventory,
    pub(crate) rng: SeededRng,
    pub(crate) next_event_id: u64,
    pub(crate) next_drop_id: DropId,
}

impl GameState {
    /// Builds a fresh pre-combat state. `seed` drives every later draw.
    pub fn new(map: GameMap, units: Vec<Unit>, seed: u64) -> Self {
        Self {
            map,
            units,
            combat: CombatState {
                phase: CombatPhase::NotStarted,
                round: 1,
                initiative: Vec::new(),
                current_turn: 0,
                turn_state: TurnState { movement_remaining: 0, action_used: false },
            },
            turn_history: Vec::new(),
            loot_drops: Vec::new(),
            player_inventory: PlayerInventory::default(),
            rng: SeededRng::from_seed(seed),
            next_event_id: 1,
            next_drop_id: 1,
        }
    }

    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.iter().find(|u| u.id == id)
    }

    pub fn unit_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        self.units.iter_mut().find(|u| u.id == id)
    }

    /// The unit whose turn it currently is, if combat is running.
    pub fn current_unit_id(&self) -> Option<UnitId> {
        if self.combat.phase != CombatPhase::Active {
            return None;
        }
        self.combat.initiative.get(self.combat.current_turn).copied()
    }

    /// True if a living unit other than `excluding` stands on the tile.
    pub fn is_occupied(&self, position: Position, excluding: UnitId) -> bool {
        self.units
            .iter()
            .any(|u| u.id != excluding && u.is_alive() && u.position == position)
    }

    pub fn living_players(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter().filter(|u| u.is_player() && u.is_alive())
    }

    pub fn living_monsters(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter().filter(|u| !u.is_player() && u.is_alive())
    }

    /// Mints the next event. Ids are monotonic within the session.
    pub(crate) fn emit(&mut self, kind: GameEventKind) -> GameEvent {
        let event = GameEvent { id: self.next_event_id, kind };
        self.next_event_id += 1;
        event
    }

    pub(crate) fn take_drop_id(&mut self) -> DropId {
        let id = self.next_drop_id;
        self.next_drop_id += 1;
        id
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::map::{MapOptions, generate_map};
    use crate::unit::{PlayerUnitSpec, UnitOptions, generate_units};
    use protocol::CharacterClass;

    pub(crate) fn sample_state(seed: u64, players: usize) -> GameState {
        let map = generate_map(&MapOptions::with_seed(seed));
        let units = generate_units(
            &UnitOptions {
                seed,
                difficulty: protocol::Difficulty::Normal,
                players: (0..players)
                    .map(|i| PlayerUnitSpec {
                        name: format!("P{}", i + 1),
                        class: CharacterClass::Warrior,
                        xp: 0,
                        weapon: None,
                    })
                    .collect(),
            },
            &map,
        );
        GameState::new(map, units, seed)
    }

    #[test]
    fn event_ids_are_monotonic() {
        let mut state = sample_state(3, 2);
        let a = state.emit(GameEventKind::TurnEnded { unit_id: 0 });
        let b = state.emit(GameEventKind::TurnEnded { unit_id: 1 });
        assert!(b.id > a.id);
    }

    #[test]
    fn snapshot_round_trips_canonically() {
        let state = sample_state(9, 2);
        let json = serde_json::to_string(&state).unwrap();
        let back: GameState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }

    #[test]
    fn wire_paths_use_camel_case() {
        let state = sample_state(1, 2);
        let v = serde_json::to_value(&state).unwrap();
        assert!(v.get("playerInventory").is_some());
        assert!(v["combat"].get("turnState").is_some());
        assert!(v["combat"]["turnState"].get("movementRemaining").is_some());
    }
}
