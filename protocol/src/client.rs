//! Messages a client sends to the server. Every inbound frame carries one of
//! these, wrapped in a [`ClientEnvelope`](crate::envelope::ClientEnvelope).

use crate::game::{CharacterPersona, Position, SessionConfig};
use crate::ids::{CharacterId, DropId, UnitId, UserId};
use serde::{Deserialize, Serialize};

/// The inbound message union, dispatched by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Must be the first frame on a fresh connection.
    Auth(AuthPayload),
    /// Creates a session, the caller becomes DM.
    CreateGame(CreateGamePayload),
    /// Joins a session by code.
    JoinGame(JoinGamePayload),
    /// Leaves the current session.
    LeaveGame(EmptyPayload),
    /// Flags lobby readiness.
    Ready(ReadyPayload),
    /// A game action for the simulation.
    Action(GameAction),
    /// An elevated DM command.
    DmCommand(DmCommand),
    /// A chat message, optionally whispered to a single user.
    Chat(ChatPayload),
    /// Persona changes for one of the caller's characters.
    CharacterSync(CharacterSyncPayload),
    /// Protocol-level keepalive, answered with `pong`.
    Ping(EmptyPayload),
}

/// A payload without content. Spelled out so every frame has a payload object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmptyPayload {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGamePayload {
    pub character_id: CharacterId,
    #[serde(default)]
    pub config: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGamePayload {
    pub join_code: String,
    pub character_id: CharacterId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub message: String,
    /// Whisper target. Absent means the whole session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSyncPayload {
    pub character: CharacterPersona,
}

/// The actions the simulation understands. Validation happens server side,
/// clients may pre-apply optimistically but the server stays authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum GameAction {
    Move {
        unit_id: UnitId,
        path: Vec<Position>,
    },
    Attack {
        unit_id: UnitId,
        target_id: UnitId,
    },
    EndTurn {
        unit_id: UnitId,
    },
    CollectLoot {
        unit_id: UnitId,
        drop_id: DropId,
    },
}

impl GameAction {
    /// The unit this action claims to act for.
    pub fn unit_id(&self) -> UnitId {
        match self {
            GameAction::Move { unit_id, .. }
            | GameAction::Attack { unit_id, .. }
            | GameAction::EndTurn { unit_id }
            | GameAction::CollectLoot { unit_id, .. } => *unit_id,
        }
    }
}

/// The elevated commands only the DM may issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "command",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum DmCommand {
    StartGame,
    PauseGame,
    ResumeGame,
    EndGame,
    GrantWeapon {
        user_id: UserId,
        weapon: crate::game::Weapon,
    },
    GrantGold {
        user_id: UserId,
        #[serde(default)]
        gold: u64,
        #[serde(default)]
        silver: u64,
    },
    GrantXp {
        user_id: UserId,
        amount: u64,
    },
    SpawnMonster {
        name: String,
        position: Position,
        hp: i32,
        attack: i32,
        defense: i32,
    },
    RemoveMonster {
        unit_id: UnitId,
    },
    ModifyMonster {
        unit_id: UnitId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hp: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attack: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        defense: Option<i32>,
    },
    SkipTurn,
    KickPlayer {
        user_id: UserId,
    },
}
