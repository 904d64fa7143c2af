//! The persisted record shapes, one struct per table.

use protocol::ids::{CharacterId, SessionId, UnitId, UserId};
use protocol::{
    CharacterClass, CharacterPersona, CharacterSummary, GameEvent, PlayerStatus,
    SessionConfig, SessionStatus, Weapon,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use simulation::level_for_xp;

/// `users`: a stable identity from the identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    /// The provider subject this user was minted from.
    pub subject: String,
    pub display_name: String,
    pub email: Option<String>,
    pub created_at: u64,
    pub last_login_at: u64,
}

/// A character's weapon inventory: the owned list plus at most one equipped.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    pub weapons: Vec<Weapon>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipped_weapon_id: Option<String>,
}

impl Inventory {
    pub fn equipped(&self) -> Option<&Weapon> {
        let id = self.equipped_weapon_id.as_deref()?;
        self.weapons.iter().find(|w| w.id == id)
    }
}

/// `characters`: player-owned persona plus server-owned progression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub id: CharacterId,
    pub user_id: UserId,
    pub name: String,
    pub class: CharacterClass,
    pub appearance: Value,
    #[serde(default)]
    pub backstory: String,
    pub xp: u64,
    pub gold: u64,
    pub silver: u64,
    pub inventory: Inventory,
    pub games_played: u32,
    pub monsters_killed: u32,
    pub damage_dealt: u64,
    pub damage_taken: u64,
    pub deaths: u32,
    pub created_at: u64,
    pub updated_at: u64,
}

impl CharacterRecord {
    /// Builds a fresh level-1 character from a validated persona.
    pub fn from_persona(user_id: UserId, persona: &CharacterPersona, now: u64) -> Self {
        Self {
            id: persona.id,
            user_id,
            name: persona.name.clone(),
            class: persona.class,
            appearance: persona.appearance.clone(),
            backstory: persona.backstory.clone(),
            xp: 0,
            gold: 0,
            silver: 0,
            inventory: Inventory::default(),
            games_played: 0,
            monsters_killed: 0,
            damage_dealt: 0,
            damage_taken: 0,
            deaths: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The derived level: `xp / 1000 + 1`.
    pub fn level(&self) -> u32 {
        level_for_xp(self.xp)
    }

    pub fn summary(&self) -> CharacterSummary {
        CharacterSummary {
            id: self.id,
            name: self.name.clone(),
            class: self.class,
            level: self.level(),
            xp: self.xp,
        }
    }

    /// Overwrites the persona half, leaving progression untouched.
    pub fn apply_persona(&mut self, persona: &CharacterPersona, now: u64) {
        self.name = persona.name.clone();
        self.class = persona.class;
        self.appearance = persona.appearance.clone();
        self.backstory = persona.backstory.clone();
        self.updated_at = now;
    }
}

/// The server-computed progression changes of one finished game.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressionDelta {
    pub xp: u64,
    pub gold: u64,
    pub silver: u64,
    pub games_played: u32,
    pub monsters_killed: u32,
    pub damage_dealt: u64,
    pub damage_taken: u64,
    pub deaths: u32,
    pub weapons: Vec<Weapon>,
}

impl ProgressionDelta {
    /// Folds this delta into a character.
    pub fn apply_to(&self, character: &mut CharacterRecord, now: u64) {
        character.xp += self.xp;
        character.gold += self.gold;
        character.silver += self.silver;
        character.games_played += self.games_played;
        character.monsters_killed += self.monsters_killed;
        character.damage_dealt += self.damage_dealt;
        character.damage_taken += self.damage_taken;
        character.deaths += self.deaths;
        character
            .inventory
            .weapons
            .extend(self.weapons.iter().cloned());
        character.updated_at = now;
    }
}

/// `sessions`: one game instance. The game state, event log and version are
/// written together, always in a single atomic step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub join_code: String,
    pub dm_user_id: UserId,
    pub status: SessionStatus,
    pub config: SessionConfig,
    pub game_state: Option<Value>,
    pub event_log: Vec<GameEvent>,
    pub state_version: u64,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
}

/// `session_players`: the (session, user) junction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPlayerRecord {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub character_id: CharacterId,
    pub unit_id: Option<UnitId>,
    pub status: PlayerStatus,
    pub is_ready: bool,
    pub joined_at: u64,
    pub last_seen_at: u64,
}

/// The legal session status transitions. Everything not ended may end.
pub fn valid_transition(from: SessionStatus, to: SessionStatus) -> bool {
    use SessionStatus::*;
    matches!(
        (from, to),
        (Lobby, Playing) | (Playing, Paused) | (Paused, Playing)
    ) || (from != Ended && to == Ended)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table() {
        use SessionStatus::*;
        assert!(valid_transition(Lobby, Playing));
        assert!(valid_transition(Playing, Paused));
        assert!(valid_transition(Paused, Playing));
        assert!(valid_transition(Lobby, Ended));
        assert!(valid_transition(Playing, Ended));
        assert!(valid_transition(Paused, Ended));
        assert!(!valid_transition(Lobby, Paused));
        assert!(!valid_transition(Paused, Lobby));
        assert!(!valid_transition(Ended, Playing));
        assert!(!valid_transition(Ended, Ended));
    }

    #[test]
    fn progression_folds_in() {
        let persona = CharacterPersona {
            id: CharacterId::generate(),
            name: "Grim".into(),
            class: CharacterClass::Warrior,
            appearance: serde_json::json!({}),
            backstory: String::new(),
        };
        let mut character = CharacterRecord::from_persona(UserId::generate(), &persona, 5);
        let delta = ProgressionDelta {
            xp: 175,
            gold: 12,
            silver: 3,
            games_played: 1,
            monsters_killed: 1,
            damage_dealt: 9,
            damage_taken: 4,
            deaths: 0,
            weapons: vec![],
        };
        delta.apply_to(&mut character, 99);
        assert_eq!(character.xp, 175);
        assert_eq!(character.level(), 1);
        assert_eq!(character.games_played, 1);
        assert_eq!(character.updated_at, 99);
    }

    #[test]
    fn equipped_weapon_lookup() {
        let weapon = Weapon {
            id: "w1".into(),
            name: "Axe".into(),
            attack_bonus: 1,
            range: 1,
        };
        let inventory = Inventory {
            weapons: vec![weapon.clone()],
            equipped_weapon_id: Some("w1".into()),
        };
        assert_eq!(inventory.equipped(), Some(&weapon));
        let none = Inventory { weapons: vec![weapon], equipped_weapon_id: None };
        assert_eq!(none.equipped(), None);
    }
}
