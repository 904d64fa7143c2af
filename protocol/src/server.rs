//! Messages the server sends to clients.

use crate::delta::StateDelta;
use crate::error::ErrorCode;
use crate::game::{
    CharacterSummary, CombatOutcome, GameEvent, PlayerReward, PlayerStatus, SessionConfig,
    SessionStatus,
};
use crate::ids::{CharacterId, SessionId, UnitId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The outbound message union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthResult(AuthResultPayload),
    GameCreated(GameCreatedPayload),
    GameJoined(GameJoinedPayload),
    /// Full state sync. Resets the receiver's state and version.
    GameState(GameStatePayload),
    /// Versioned incremental update, gated on `previousVersion`.
    StateDelta(StateDelta),
    /// Simulation events, always broadcast before the matching delta.
    Events(EventsPayload),
    TurnChange(TurnChangePayload),
    PlayerJoined(PlayerJoinedPayload),
    PlayerLeft(PlayerLeftPayload),
    PlayerReady(PlayerReadyPayload),
    GameEnded(GameEndedPayload),
    Chat(ChatBroadcastPayload),
    Error(ErrorPayload),
    Pong(PongPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResultPayload {
    pub user_id: UserId,
    pub display_name: String,
    pub characters: Vec<CharacterSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameCreatedPayload {
    pub session_id: SessionId,
    pub join_code: String,
    pub config: SessionConfig,
}

/// A seat as listed to joining clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatView {
    pub user_id: UserId,
    pub display_name: String,
    pub character_id: CharacterId,
    pub character_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<UnitId>,
    pub status: PlayerStatus,
    pub is_ready: bool,
    pub is_dm: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameJoinedPayload {
    pub session_id: SessionId,
    pub join_code: String,
    pub config: SessionConfig,
    pub status: SessionStatus,
    pub players: Vec<SeatView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStatePayload {
    pub status: SessionStatus,
    /// The serialized simulation snapshot, None while still in the lobby.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsPayload {
    pub events: Vec<GameEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnChangePayload {
    pub unit_id: UnitId,
    /// The user owning the unit, absent for monster turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub round: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerJoinedPayload {
    pub seat: SeatView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLeftPayload {
    pub user_id: UserId,
    /// "left", "disconnected" or "kicked".
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerReadyPayload {
    pub user_id: UserId,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEndedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<CombatOutcome>,
    pub rewards: Vec<PlayerReward>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBroadcastPayload {
    pub from: UserId,
    pub display_name: String,
    pub message: String,
    pub whisper: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PongPayload {}
