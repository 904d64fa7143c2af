//! The durable store behind the session manager. One implementation on sled,
//! addressed through a trait so tests can run against temp databases.

mod records;
mod sled_store;

pub use records::{
    CharacterRecord, Inventory, ProgressionDelta, SessionPlayerRecord, SessionRecord,
    UserRecord, valid_transition,
};
pub use sled_store::SledStore;

use async_trait::async_trait;
use protocol::ids::{CharacterId, SessionId, UserId};
use protocol::{CharacterPersona, GameEvent, PlayerStatus, SessionConfig, SessionStatus};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// The failure categories of the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("illegal status transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },
    #[error("version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u64, got: u64 },
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// Transient failures are worth retrying with back-off.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Backend(_))
    }
}

/// How many events the session record keeps while live, and after archive.
pub const EVENT_LOG_CAP: usize = 1000;
pub const ARCHIVE_EVENT_TAIL: usize = 100;

/// The typed operations of the persistence layer.
#[async_trait]
pub trait Store: Send + Sync {
    /// Creates or refreshes a user keyed by provider subject. The display
    /// name and email follow the identity provider on every login.
    async fn upsert_user(
        &self,
        subject: &str,
        display_name: &str,
        email: Option<&str>,
    ) -> Result<UserRecord, StoreError>;

    async fn user(&self, id: UserId) -> Result<UserRecord, StoreError>;

    async fn insert_character(&self, record: CharacterRecord) -> Result<(), StoreError>;

    async fn character(&self, id: CharacterId) -> Result<CharacterRecord, StoreError>;

    async fn characters_by_owner(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CharacterRecord>, StoreError>;

    /// Overwrites the persona half of a character the user owns.
    async fn update_persona(
        &self,
        user_id: UserId,
        persona: &CharacterPersona,
    ) -> Result<CharacterRecord, StoreError>;

    /// Applies a progression delta to a single character.
    async fn update_progression(
        &self,
        character_id: CharacterId,
        delta: &ProgressionDelta,
    ) -> Result<CharacterRecord, StoreError>;

    /// Inserts a session with a freshly allocated, unique join code.
    async fn insert_session(
        &self,
        dm_user_id: UserId,
        config: SessionConfig,
    ) -> Result<SessionRecord, StoreError>;

    async fn session(&self, id: SessionId) -> Result<SessionRecord, StoreError>;

    async fn session_by_code(&self, code: &str) -> Result<SessionRecord, StoreError>;

    /// Moves the session through its status machine; illegal transitions are
    /// rejected with [`StoreError::InvalidTransition`].
    async fn update_session_status(
        &self,
        id: SessionId,
        status: SessionStatus,
    ) -> Result<(), StoreError>;

    /// Writes `{game_state, appended events, version}` in one atomic step.
    /// `version` must be exactly one above the stored version.
    async fn write_session_state(
        &self,
        id: SessionId,
        game_state: Value,
        events: &[GameEvent],
        version: u64,
    ) -> Result<(), StoreError>;

    /// Terminal archive: sets `ended`, truncates the event log to its tail,
    /// frees the join code and applies all progression deltas — one
    /// transaction across sessions and characters.
    async fn archive_session(
        &self,
        id: SessionId,
        progression: Vec<(CharacterId, ProgressionDelta)>,
    ) -> Result<(), StoreError>;

    async fn upsert_session_player(
        &self,
        record: SessionPlayerRecord,
    ) -> Result<(), StoreError>;

    async fn update_session_player_status(
        &self,
        session_id: SessionId,
        user_id: UserId,
        status: PlayerStatus,
        last_seen_at: u64,
    ) -> Result<(), StoreError>;

    async fn delete_session_player(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<(), StoreError>;

    async fn session_players(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<SessionPlayerRecord>, StoreError>;
}

/// Retry policy for transient store failures: bounded attempts with
/// exponential back-off, everything else surfaces immediately.
pub const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(20);

/// Runs a store operation, retrying transient failures.
pub async fn with_retry<T, F, Fut>(mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(error) if error.is_transient() && attempt + 1 < RETRY_ATTEMPTS => {
                attempt += 1;
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                tracing::warn!(?error, attempt, "transient store failure, retrying");
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}
