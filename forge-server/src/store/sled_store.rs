//! The sled-backed store. One tree per table plus lookup index trees,
//! records encoded as JSON.

use super::records::{
    CharacterRecord, ProgressionDelta, SessionPlayerRecord, SessionRecord, UserRecord,
    valid_transition,
};
use super::{ARCHIVE_EVENT_TAIL, EVENT_LOG_CAP, Store, StoreError};
use crate::now_ms;
use async_trait::async_trait;
use protocol::ids::{CharacterId, SessionId, UserId};
use protocol::{
    CharacterPersona, GameEvent, JOIN_CODE_ALPHABET, JOIN_CODE_LEN, PlayerStatus,
    SessionConfig, SessionStatus,
};
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sled::Transactional;
use sled::transaction::ConflictableTransactionError;
use std::path::Path;

pub struct SledStore {
    db: sled::Db,
    users: sled::Tree,
    users_by_subject: sled::Tree,
    users_by_email: sled::Tree,
    characters: sled::Tree,
    characters_by_owner: sled::Tree,
    sessions: sled::Tree,
    sessions_by_code: sled::Tree,
    session_players: sled::Tree,
}

fn backend(error: sled::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

fn corrupt(error: serde_json::Error) -> StoreError {
    StoreError::Corrupt(error.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(corrupt)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(corrupt)
}

/// Composite key for owner and junction indices.
fn pair_key(a: &[u8; 16], b: &[u8; 16]) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(a);
    key[16..].copy_from_slice(b);
    key
}

fn random_join_code() -> String {
    let mut rng = rand::thread_rng();
    (0..JOIN_CODE_LEN)
        .map(|_| {
            let pick = rng.gen_range(0..JOIN_CODE_ALPHABET.len());
            JOIN_CODE_ALPHABET[pick] as char
        })
        .collect()
}

const JOIN_CODE_ATTEMPTS: usize = 32;

impl SledStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(backend)?;
        let tree = |name: &str| db.open_tree(name).map_err(backend);
        Ok(Self {
            users: tree("users")?,
            users_by_subject: tree("users_by_subject")?,
            users_by_email: tree("users_by_email")?,
            characters: tree("characters")?,
            characters_by_owner: tree("characters_by_owner")?,
            sessions: tree("sessions")?,
            sessions_by_code: tree("sessions_by_code")?,
            session_players: tree("session_players")?,
            db,
        })
    }

    fn get_json<T: DeserializeOwned>(
        tree: &sled::Tree,
        key: &[u8],
    ) -> Result<Option<T>, StoreError> {
        tree.get(key)
            .map_err(backend)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn load_session(&self, id: SessionId) -> Result<SessionRecord, StoreError> {
        Self::get_json(&self.sessions, id.0.as_bytes())?
            .ok_or(StoreError::NotFound("session"))
    }

    fn put_session(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.sessions
            .insert(record.id.0.as_bytes(), encode(record)?)
            .map_err(backend)?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), StoreError> {
        self.db.flush_async().await.map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl Store for SledStore {
    async fn upsert_user(
        &self,
        subject: &str,
        display_name: &str,
        email: Option<&str>,
    ) -> Result<UserRecord, StoreError> {
        let now = now_ms();
        let existing_id = self
            .users_by_subject
            .get(subject.as_bytes())
            .map_err(backend)?;

        let mut record = match existing_id {
            Some(id_bytes) => {
                let mut record: UserRecord = Self::get_json(&self.users, &id_bytes)?
                    .ok_or(StoreError::NotFound("user"))?;
                record.display_name = display_name.to_string();
                record.last_login_at = now;
                record
            }
            None => UserRecord {
                id: UserId::generate(),
                subject: subject.to_string(),
                display_name: display_name.to_string(),
                email: None,
                created_at: now,
                last_login_at: now,
            },
        };

        // Email uniqueness across users. A taken address stays with its owner.
        if let Some(new_email) = email
            && record.email.as_deref() != Some(new_email)
        {
            if let Some(holder) = self
                .users_by_email
                .get(new_email.as_bytes())
                .map_err(backend)?
                && holder.as_ref() != record.id.0.as_bytes()
            {
                return Err(StoreError::Conflict(format!(
                    "email {new_email} is already registered"
                )));
            }
            if let Some(old_email) = &record.email {
                self.users_by_email
                    .remove(old_email.as_bytes())
                    .map_err(backend)?;
            }
            self.users_by_email
                .insert(new_email.as_bytes(), record.id.0.as_bytes().as_slice())
                .map_err(backend)?;
            record.email = Some(new_email.to_string());
        }

        self.users
            .insert(record.id.0.as_bytes(), encode(&record)?)
            .map_err(backend)?;
        self.users_by_subject
            .insert(subject.as_bytes(), record.id.0.as_bytes().as_slice())
            .map_err(backend)?;
        self.flush().await?;
        Ok(record)
    }

    async fn user(&self, id: UserId) -> Result<UserRecord, StoreError> {
        Self::get_json(&self.users, id.0.as_bytes())?.ok_or(StoreError::NotFound("user"))
    }

    async fn insert_character(&self, record: CharacterRecord) -> Result<(), StoreError> {
        self.characters
            .insert(record.id.0.as_bytes(), encode(&record)?)
            .map_err(backend)?;
        self.characters_by_owner
            .insert(
                pair_key(record.user_id.0.as_bytes(), record.id.0.as_bytes()),
                record.id.0.as_bytes().as_slice(),
            )
            .map_err(backend)?;
        self.flush().await
    }

    async fn character(&self, id: CharacterId) -> Result<CharacterRecord, StoreError> {
        Self::get_json(&self.characters, id.0.as_bytes())?
            .ok_or(StoreError::NotFound("character"))
    }

    async fn characters_by_owner(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CharacterRecord>, StoreError> {
        let mut out = Vec::new();
        for entry in self.characters_by_owner.scan_prefix(user_id.0.as_bytes()) {
            let (_, id_bytes) = entry.map_err(backend)?;
            if let Some(record) = Self::get_json(&self.characters, &id_bytes)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    async fn update_persona(
        &self,
        user_id: UserId,
        persona: &CharacterPersona,
    ) -> Result<CharacterRecord, StoreError> {
        let mut record = self.character(persona.id).await?;
        if record.user_id != user_id {
            return Err(StoreError::NotFound("character"));
        }
        record.apply_persona(persona, now_ms());
        self.characters
            .insert(record.id.0.as_bytes(), encode(&record)?)
            .map_err(backend)?;
        self.flush().await?;
        Ok(record)
    }

    async fn update_progression(
        &self,
        character_id: CharacterId,
        delta: &ProgressionDelta,
    ) -> Result<CharacterRecord, StoreError> {
        let mut record = self.character(character_id).await?;
        delta.apply_to(&mut record, now_ms());
        self.characters
            .insert(record.id.0.as_bytes(), encode(&record)?)
            .map_err(backend)?;
        self.flush().await?;
        Ok(record)
    }

    async fn insert_session(
        &self,
        dm_user_id: UserId,
        config: SessionConfig,
    ) -> Result<SessionRecord, StoreError> {
        let id = SessionId::generate();

        // Codes are unique across non-ended sessions. Allocation is a
        // compare-and-swap on the code index with bounded retry.
        let mut join_code = None;
        for _ in 0..JOIN_CODE_ATTEMPTS {
            let candidate = random_join_code();
            let swap = self
                .sessions_by_code
                .compare_and_swap(
                    candidate.as_bytes(),
                    None as Option<&[u8]>,
                    Some(id.0.as_bytes().as_slice()),
                )
                .map_err(backend)?;
            if swap.is_ok() {
                join_code = Some(candidate);
                break;
            }
        }
        let join_code = join_code.ok_or_else(|| {
            StoreError::Conflict("could not allocate a unique join code".into())
        })?;

        let record = SessionRecord {
            id,
            join_code,
            dm_user_id,
            status: SessionStatus::Lobby,
            config,
            game_state: None,
            event_log: Vec::new(),
            state_version: 0,
            created_at: now_ms(),
            started_at: None,
            ended_at: None,
        };
        self.put_session(&record)?;
        self.flush().await?;
        Ok(record)
    }

    async fn session(&self, id: SessionId) -> Result<SessionRecord, StoreError> {
        self.load_session(id)
    }

    async fn session_by_code(&self, code: &str) -> Result<SessionRecord, StoreError> {
        let id_bytes = self
            .sessions_by_code
            .get(code.as_bytes())
            .map_err(backend)?
            .ok_or(StoreError::NotFound("session"))?;
        Self::get_json(&self.sessions, &id_bytes)?.ok_or(StoreError::NotFound("session"))
    }

    async fn update_session_status(
        &self,
        id: SessionId,
        status: SessionStatus,
    ) -> Result<(), StoreError> {
        let mut record = self.load_session(id)?;
        if !valid_transition(record.status, status) {
            return Err(StoreError::InvalidTransition { from: record.status, to: status });
        }
        record.status = status;
        let now = now_ms();
        match status {
            SessionStatus::Playing if record.started_at.is_none() => {
                record.started_at = Some(now);
            }
            SessionStatus::Ended => record.ended_at = Some(now),
            _ => {}
        }
        self.put_session(&record)?;
        self.flush().await
    }

    async fn write_session_state(
        &self,
        id: SessionId,
        game_state: Value,
        events: &[GameEvent],
        version: u64,
    ) -> Result<(), StoreError> {
        let mut record = self.load_session(id)?;
        if version != record.state_version + 1 {
            return Err(StoreError::VersionMismatch {
                expected: record.state_version + 1,
                got: version,
            });
        }
        record.game_state = Some(game_state);
        record.state_version = version;
        record.event_log.extend_from_slice(events);
        if record.event_log.len() > EVENT_LOG_CAP {
            let overflow = record.event_log.len() - EVENT_LOG_CAP;
            record.event_log.drain(..overflow);
        }
        self.put_session(&record)?;
        self.flush().await
    }

    async fn archive_session(
        &self,
        id: SessionId,
        progression: Vec<(CharacterId, ProgressionDelta)>,
    ) -> Result<(), StoreError> {
        let now = now_ms();
        let result = (&self.sessions, &self.sessions_by_code, &self.characters).transaction(
            |(sessions, codes, characters)| {
                let bytes = sessions
                    .get(id.0.as_bytes())?
                    .ok_or_else(|| {
                        ConflictableTransactionError::Abort(StoreError::NotFound("session"))
                    })?;
                let mut record: SessionRecord = decode(&bytes)
                    .map_err(ConflictableTransactionError::Abort)?;

                if record.status != SessionStatus::Ended {
                    if !valid_transition(record.status, SessionStatus::Ended) {
                        return Err(ConflictableTransactionError::Abort(
                            StoreError::InvalidTransition {
                                from: record.status,
                                to: SessionStatus::Ended,
                            },
                        ));
                    }
                    record.status = SessionStatus::Ended;
                    record.ended_at = Some(now);
                }
                if record.event_log.len() > ARCHIVE_EVENT_TAIL {
                    let overflow = record.event_log.len() - ARCHIVE_EVENT_TAIL;
                    record.event_log.drain(..overflow);
                }
                codes.remove(record.join_code.as_bytes())?;
                sessions.insert(
                    id.0.as_bytes().as_slice(),
                    encode(&record).map_err(ConflictableTransactionError::Abort)?,
                )?;

                for (character_id, delta) in &progression {
                    let bytes = characters
                        .get(character_id.0.as_bytes())?
                        .ok_or_else(|| {
                            ConflictableTransactionError::Abort(StoreError::NotFound(
                                "character",
                            ))
                        })?;
                    let mut character: CharacterRecord = decode(&bytes)
                        .map_err(ConflictableTransactionError::Abort)?;
                    delta.apply_to(&mut character, now);
                    characters.insert(
                        character_id.0.as_bytes().as_slice(),
                        encode(&character).map_err(ConflictableTransactionError::Abort)?,
                    )?;
                }
                Ok(())
            },
        );
        match result {
            Ok(()) => self.flush().await,
            Err(sled::transaction::TransactionError::Abort(error)) => Err(error),
            Err(sled::transaction::TransactionError::Storage(error)) => {
                Err(backend(error))
            }
        }
    }

    async fn upsert_session_player(
        &self,
        record: SessionPlayerRecord,
    ) -> Result<(), StoreError> {
        self.session_players
            .insert(
                pair_key(record.session_id.0.as_bytes(), record.user_id.0.as_bytes()),
                encode(&record)?,
            )
            .map_err(backend)?;
        self.flush().await
    }

    async fn update_session_player_status(
        &self,
        session_id: SessionId,
        user_id: UserId,
        status: PlayerStatus,
        last_seen_at: u64,
    ) -> Result<(), StoreError> {
        let key = pair_key(session_id.0.as_bytes(), user_id.0.as_bytes());
        let mut record: SessionPlayerRecord = Self::get_json(&self.session_players, &key)?
            .ok_or(StoreError::NotFound("session player"))?;
        record.status = status;
        record.last_seen_at = last_seen_at;
        self.session_players
            .insert(key, encode(&record)?)
            .map_err(backend)?;
        self.flush().await
    }

    async fn delete_session_player(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<(), StoreError> {
        self.session_players
            .remove(pair_key(session_id.0.as_bytes(), user_id.0.as_bytes()))
            .map_err(backend)?;
        self.flush().await
    }

    async fn session_players(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<SessionPlayerRecord>, StoreError> {
        let mut out = Vec::new();
        for entry in self.session_players.scan_prefix(session_id.0.as_bytes()) {
            let (_, bytes) = entry.map_err(backend)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }
}
