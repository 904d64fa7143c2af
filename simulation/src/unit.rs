//! Units and their derived stats.

use crate::level_for_xp;
use crate::map::GameMap;
use crate::rng::SeededRng;
use protocol::ids::UnitId;
use protocol::{CharacterClass, Difficulty, Position, Weapon};
use serde::{Deserialize, Serialize};

/// Whether a unit is driven by a player or by the server AI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Player,
    Monster,
}

/// The combat-relevant numbers of a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitStats {
    pub hp: i32,
    pub max_hp: i32,
    pub attack: i32,
    pub defense: i32,
    /// Tiles of movement per turn.
    pub movement: u32,
    /// Attack range in tiles. Anything above 1 needs line of sight.
    pub range: u32,
    /// The flat part of the initiative roll.
    pub initiative: i32,
}

/// One fighting unit on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: UnitId,
    #[serde(rename = "type")]
    pub kind: UnitKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<CharacterClass>,
    pub position: Position,
    pub stats: UnitStats,
}

impl Unit {
    pub fn is_alive(&self) -> bool {
        self.stats.hp > 0
    }

    pub fn is_player(&self) -> bool {
        self.kind == UnitKind::Player
    }
}

/// The base stats of a class at level 1. Levels add on top.
pub fn class_stats(class: CharacterClass, level: u32) -> UnitStats {
    let bonus = level.saturating_sub(1) as i32;
    let (hp, attack, defense, movement, range, initiative) = match class {
        CharacterClass::Warrior => (24, 5, 3, 3, 1, 1),
        CharacterClass::Ranger => (16, 4, 1, 4, 5, 3),
        CharacterClass::Mage => (12, 6, 0, 3, 4, 2),
        CharacterClass::Rogue => (14, 4, 1, 5, 1, 4),
    };
    let hp = hp + 2 * bonus;
    UnitStats {
        hp,
        max_hp: hp,
        attack: attack + bonus / 2,
        defense: defense + bonus / 3,
        movement,
        range,
        initiative: initiative + bonus / 2,
    }
}

/// A player unit to place at game start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUnitSpec {
    pub name: String,
    pub class: CharacterClass,
    pub xp: u64,
    /// The equipped weapon, if any. Folded into the unit stats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weapon: Option<Weapon>,
}

/// Parameters of unit generation.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitOptions {
    pub seed: u64,
    pub difficulty: Difficulty,
    pub players: Vec<PlayerUnitSpec>,
}

const MONSTER_NAMES: [&str; 4] = ["Goblin", "Skeleton", "Orc", "Troll"];

fn monster_stats(difficulty: Difficulty, tier: usize) -> UnitStats {
    let (hp, attack, defense) = match difficulty {
        Difficulty::Easy => (4, 3, 0),
        Difficulty::Normal => (6, 4, 1),
        Difficulty::Hard => (9, 5, 2),
    };
    let tier = tier as i32;
    let hp = hp + 2 * tier;
    UnitStats {
        hp,
        max_hp: hp,
        attack: attack + tier,
        defense: defense + tier / 2,
        movement: 3,
        range: 1,
        initiative: tier,
    }
}

fn monster_count(difficulty: Difficulty, players: usize) -> usize {
    match difficulty {
        Difficulty::Easy => players.max(1),
        Difficulty::Normal => players + 1,
        Difficulty::Hard => players * 2,
    }
}

/// Places player units on the spawn tiles and a difficulty-scaled pack of
/// monsters on the monster spawns. Unit ids are dense: players first, in the
/// order given, then monsters. Identical inputs yield identical units.
pub fn generate_units(opts: &UnitOptions, map: &GameMap) -> Vec<Unit> {
    let mut rng = SeededRng::from_seed(opts.seed ^ 0x9e37_79b9_7f4a_7c15);
    let mut units: Vec<Unit> = Vec::new();
    let mut next_id: UnitId = 0;

    let mut spawns = map.spawn_points.iter().copied();
    for spec in &opts.players {
        let position = spawns
            .next()
            .unwrap_or_else(|| map.spawn_points[0]);
        let level = level_for_xp(spec.xp);
        let mut stats = class_stats(spec.class, level);
        if let Some(weapon) = &spec.weapon {
            stats.attack += weapon.attack_bonus;
            stats.range = stats.range.max(weapon.range);
        }
        units.push(Unit {
            id: next_id,
            kind: UnitKind::Player,
            name: spec.name.clone(),
            class: Some(spec.class),
            position,
            stats,
        });
        next_id += 1;
    }

    let count = monster_count(opts.difficulty, opts.players.len());
    let mut open: Vec<Position> = map
        .monster_spawns
        .iter()
        .copied()
        .filter(|p| units.iter().all(|u| u.position != *p))
        .collect();
    for index in 0..count {
        if open.is_empty() {
            break;
        }
        let slot = rng.range(0, open.len() as i32 - 1) as usize;
        let position = open.swap_remove(slot);
        let tier = index % MONSTER_NAMES.len();
        units.push(Unit {
            id: next_id,
            kind: UnitKind::Monster,
            name: format!("{} {}", MONSTER_NAMES[tier], index + 1),
            class: None,
            position,
            stats: monster_stats(opts.difficulty, tier),
        });
        next_id += 1;
    }

    units
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{MapOptions, generate_map};

    fn specs(n: usize) -> Vec<PlayerUnitSpec> {
        (0..n)
            .map(|i| PlayerUnitSpec {
                name: format!("Hero {i}"),
                class: CharacterClass::Warrior,
                xp: 0,
                weapon: None,
            })
            .collect()
    }

    #[test]
    fn generation_is_deterministic() {
        let map = generate_map(&MapOptions::with_seed(42));
        let opts = UnitOptions {
            seed: 42,
            difficulty: Difficulty::Normal,
            players: specs(2),
        };
        assert_eq!(generate_units(&opts, &map), generate_units(&opts, &map));
    }

    #[test]
    fn ids_are_dense_players_first() {
        let map = generate_map(&MapOptions::with_seed(1));
        let opts = UnitOptions {
            seed: 1,
            difficulty: Difficulty::Normal,
            players: specs(3),
        };
        let units = generate_units(&opts, &map);
        for (i, unit) in units.iter().enumerate() {
            assert_eq!(unit.id, i as UnitId);
        }
        assert!(units[..3].iter().all(|u| u.kind == UnitKind::Player));
        assert!(units[3..].iter().all(|u| u.kind == UnitKind::Monster));
        // Normal difficulty: players + 1 monsters.
        assert_eq!(units.len(), 3 + 4);
    }

    #[test]
    fn no_two_units_share_a_tile() {
        let map = generate_map(&MapOptions::with_seed(5));
        let opts = UnitOptions {
            seed: 5,
            difficulty: Difficulty::Hard,
            players: specs(4),
        };
        let units = generate_units(&opts, &map);
        for a in &units {
            for b in &units {
                if a.id != b.id {
                    assert_ne!(a.position, b.position, "{} vs {}", a.name, b.name);
                }
            }
        }
    }

    #[test]
    fn weapon_folds_into_stats() {
        let map = generate_map(&MapOptions::with_seed(2));
        let mut players = specs(2);
        players[0].weapon = Some(Weapon {
            id: "w1".into(),
            name: "Longbow".into(),
            attack_bonus: 2,
            range: 6,
        });
        let opts = UnitOptions { seed: 2, difficulty: Difficulty::Easy, players };
        let units = generate_units(&opts, &map);
        assert_eq!(units[0].stats.attack, units[1].stats.attack + 2);
        assert_eq!(units[0].stats.range, 6);
    }

    #[test]
    fn unit_kind_serializes_as_type() {
        let stats = class_stats(CharacterClass::Rogue, 1);
        let unit = Unit {
            id: 0,
            kind: UnitKind::Player,
            name: "Shade".into(),
            class: Some(CharacterClass::Rogue),
            position: Position::new(1, 1),
            stats,
        };
        let v = serde_json::to_value(&unit).unwrap();
        assert_eq!(v["type"], "player");
        assert_eq!(v["class"], "rogue");
        let back: Unit = serde_json::from_value(v).unwrap();
        assert_eq!(back, unit);
    }
}
