//! Game-facing types that both sides of the wire agree on: session
//! configuration, character personas, positions, weapons and the game events
//! the simulation emits.

use crate::ids::{CharacterId, DropId, UnitId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tile coordinate on the map. The origin is the top left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance, the metric for movement and melee range.
    pub fn distance(&self, other: &Position) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// True if the other tile is exactly one orthogonal step away.
    pub fn is_adjacent_step(&self, other: &Position) -> bool {
        self.distance(other) == 1
    }
}

/// The playable classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacterClass {
    Warrior,
    Ranger,
    Mage,
    Rogue,
}

/// The difficulty of a session, scales monster count and stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Normal,
    Hard,
}

/// The lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Lobby,
    Playing,
    Paused,
    Ended,
}

/// The connection state of a seat in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    Connected,
    Disconnected,
    Spectating,
}

/// The phase of the combat encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatPhase {
    NotStarted,
    Active,
    Victory,
    Defeat,
}

/// How a finished encounter went for the players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombatOutcome {
    Victory,
    Defeat,
}

/// Session settings chosen by the DM on creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub max_players: u8,
    pub map_seed: u64,
    pub difficulty: Difficulty,
    /// Per turn time limit in seconds, 0 disables the timeout.
    pub turn_time_limit: u64,
    pub allow_late_join: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_players: 4,
            map_seed: 0,
            difficulty: Difficulty::Normal,
            turn_time_limit: 0,
            allow_late_join: false,
        }
    }
}

/// The allowed player count bounds of a session.
pub const MIN_PLAYERS: u8 = 2;
pub const MAX_PLAYERS: u8 = 8;

impl SessionConfig {
    /// Checks the configured bounds. Invalid configs are rejected at creation.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_players < MIN_PLAYERS || self.max_players > MAX_PLAYERS {
            return Err(format!(
                "maxPlayers must be between {MIN_PLAYERS} and {MAX_PLAYERS}"
            ));
        }
        Ok(())
    }
}

/// A weapon, either carried in a character inventory or lying in a loot drop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Weapon {
    pub id: String,
    pub name: String,
    pub attack_bonus: i32,
    /// Attack range in tiles. 1 is melee, anything above needs line of sight.
    pub range: u32,
}

/// The player-owned persona part of a character. Progression is server owned
/// and never accepted from the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterPersona {
    pub id: CharacterId,
    pub name: String,
    pub class: CharacterClass,
    /// Free-form appearance record, forwarded to clients untouched.
    pub appearance: Value,
    #[serde(default)]
    pub backstory: String,
}

/// Bounds of a character name.
pub const NAME_MIN_LEN: usize = 3;
pub const NAME_MAX_LEN: usize = 30;

/// Validates a character name: 3 to 30 characters, alphanumeric plus space,
/// apostrophe and hyphen.
pub fn validate_character_name(name: &str) -> Result<(), String> {
    let count = name.chars().count();
    if count < NAME_MIN_LEN || count > NAME_MAX_LEN {
        return Err(format!(
            "name must be {NAME_MIN_LEN} to {NAME_MAX_LEN} characters"
        ));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, ' ' | '\'' | '-')))
    {
        return Err(format!("illegal character {bad:?} in name"));
    }
    Ok(())
}

impl CharacterPersona {
    /// Validates the persona fields against the schema.
    pub fn validate(&self) -> Result<(), String> {
        validate_character_name(&self.name)?;
        if !self.appearance.is_object() {
            return Err("appearance must be an object".into());
        }
        Ok(())
    }
}

/// A summary of a character as listed in `auth_result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterSummary {
    pub id: CharacterId,
    pub name: String,
    pub class: CharacterClass,
    pub level: u32,
    pub xp: u64,
}

/// One observable change produced by the simulation. Ids are monotonic
/// within a session, in generation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEvent {
    pub id: u64,
    #[serde(flatten)]
    pub kind: GameEventKind,
}

/// The event vocabulary of the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum GameEventKind {
    UnitMoved {
        unit_id: UnitId,
        path: Vec<Position>,
        to: Position,
    },
    UnitAttacked {
        attacker_id: UnitId,
        target_id: UnitId,
        damage: i32,
        target_hp: i32,
    },
    UnitDefeated {
        unit_id: UnitId,
        attacker_id: Option<UnitId>,
    },
    TurnStarted {
        unit_id: UnitId,
        round: u32,
    },
    TurnEnded {
        unit_id: UnitId,
    },
    LootDropped {
        drop_id: DropId,
        position: Position,
        gold: u64,
        silver: u64,
        weapon: Option<Weapon>,
    },
    LootCollected {
        drop_id: DropId,
        unit_id: UnitId,
        gold: u64,
        silver: u64,
        weapon: Option<Weapon>,
    },
    GameOver {
        outcome: CombatOutcome,
    },
}

/// Per-player reward entry broadcast in `game_ended`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerReward {
    pub user_id: UserId,
    pub character_id: CharacterId,
    pub xp: u64,
    pub gold: u64,
    pub silver: u64,
    pub kills: u32,
}
