//! The per-session actor.
//!
//! Every live session is owned by exactly one task that consumes commands
//! from a bounded queue, one at a time. Connections, the turn-timeout
//! scheduler and the monster scheduler all talk to the session through this
//! queue, which gives per-session single-writer semantics without any
//! global lock. Timers are spawned sleeps that enqueue a command on expiry.

use crate::connection::{ConnectionLink, Outbound};
use crate::registry::{SessionHandle, SessionRegistry};
use crate::store::{SessionPlayerRecord, SessionRecord, Store, with_retry};
use crate::now_ms;
use protocol::ids::{CharacterId, SessionId, UnitId, UserId};
use protocol::server::{
    ChatBroadcastPayload, GameJoinedPayload, GameStatePayload, PlayerJoinedPayload,
    PlayerLeftPayload, PlayerReadyPayload, SeatView,
};
use protocol::{
    CHANNEL_BUFFER_SIZE, CharacterClass, DISCONNECT_GRACE_SECS, DmCommand, ErrorCode,
    GameAction, GameEvent, PlayerStatus, SESSION_IDLE_TIMEOUT_SECS, SessionConfig,
    SessionStatus, ServerMessage, Weapon,
};
use simulation::GameState;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Whether a successful join should announce `game_created` or `game_joined`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Create,
    Join,
}

/// Everything a session actor can be asked to do.
pub enum SessionCommand {
    Join {
        user_id: UserId,
        display_name: String,
        character: crate::store::CharacterRecord,
        link: ConnectionLink,
        seq: u64,
        kind: JoinKind,
        /// Confirms to the connection whether it now belongs to this session.
        seated: oneshot::Sender<bool>,
    },
    Leave {
        user_id: UserId,
        seq: u64,
    },
    Ready {
        user_id: UserId,
        ready: bool,
        seq: u64,
    },
    Action {
        user_id: UserId,
        action: GameAction,
        seq: u64,
    },
    Dm {
        user_id: UserId,
        command: DmCommand,
        seq: u64,
    },
    Chat {
        user_id: UserId,
        message: String,
        target: Option<UserId>,
        seq: u64,
    },
    /// The transport of this user dropped.
    Disconnected {
        user_id: UserId,
        conn_id: Uuid,
    },
    /// The per-turn time limit ran out.
    TurnTimeout {
        epoch: u64,
    },
    /// Time for the monster whose turn it is to act.
    MonsterTurn {
        epoch: u64,
    },
    /// The disconnect grace window of this user closed.
    GraceExpired {
        user_id: UserId,
    },
    /// Periodic sweep; ends the session after prolonged emptiness.
    IdleCheck,
}

/// Loop control of the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

/// One member of the session.
pub(crate) struct Seat {
    pub user_id: UserId,
    pub display_name: String,
    pub character_id: CharacterId,
    pub character_name: String,
    pub class: CharacterClass,
    pub xp: u64,
    pub equipped: Option<Weapon>,
    pub unit_id: Option<UnitId>,
    pub status: PlayerStatus,
    pub is_ready: bool,
    pub link: Option<ConnectionLink>,
    pub grace: Option<JoinHandle<()>>,
    pub joined_at: u64,
}

impl Seat {
    pub(crate) fn view(&self, dm_user_id: UserId) -> SeatView {
        SeatView {
            user_id: self.user_id,
            display_name: self.display_name.clone(),
            character_id: self.character_id,
            character_name: self.character_name.clone(),
            unit_id: self.unit_id,
            status: self.status,
            is_ready: self.is_ready,
            is_dm: self.user_id == dm_user_id,
        }
    }

    pub(crate) fn player_record(&self, session_id: SessionId, now: u64) -> SessionPlayerRecord {
        SessionPlayerRecord {
            session_id,
            user_id: self.user_id,
            character_id: self.character_id,
            unit_id: self.unit_id,
            status: self.status,
            is_ready: self.is_ready,
            joined_at: self.joined_at,
            last_seen_at: now,
        }
    }
}

/// The actor state. Lobby handling lives here, the action pipeline and DM
/// commands in the coordinator half (`coordinator.rs`).
pub struct SessionActor {
    pub(crate) id: SessionId,
    pub(crate) join_code: String,
    pub(crate) dm_user_id: UserId,
    pub(crate) config: SessionConfig,
    pub(crate) status: SessionStatus,
    pub(crate) seats: Vec<Seat>,
    pub(crate) game: Option<GameState>,
    pub(crate) version: u64,
    /// The full event log of this run, the source for reward attribution.
    pub(crate) events: Vec<GameEvent>,
    /// Bumped on every turn change; timers carry the epoch they were armed
    /// in, stale ones are dropped.
    pub(crate) turn_epoch: u64,
    pub(crate) turn_timer: Option<JoinHandle<()>>,
    pub(crate) monster_timer: Option<JoinHandle<()>>,
    pub(crate) empty_since: Option<Instant>,
    /// How long a disconnected seat is held before consequences apply.
    /// [`DISCONNECT_GRACE_SECS`] in production, shortened in tests.
    pub(crate) grace_period: Duration,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) self_tx: mpsc::Sender<SessionCommand>,
}

impl SessionActor {
    /// Spawns the actor for a freshly inserted session record and returns
    /// its handle. The caller registers the handle; the actor deregisters
    /// itself when it stops.
    pub fn spawn(
        record: &SessionRecord,
        store: Arc<dyn Store>,
        registry: Arc<SessionRegistry>,
    ) -> SessionHandle {
        Self::spawn_with_grace(
            record,
            store,
            registry,
            Duration::from_secs(DISCONNECT_GRACE_SECS),
        )
    }

    /// Like [`spawn`](Self::spawn) with an explicit disconnect grace
    /// window, so tests can straddle the boundary without waiting 30 s.
    pub fn spawn_with_grace(
        record: &SessionRecord,
        store: Arc<dyn Store>,
        registry: Arc<SessionRegistry>,
        grace_period: Duration,
    ) -> SessionHandle {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let handle = SessionHandle {
            id: record.id,
            join_code: record.join_code.clone(),
            commands: tx.clone(),
        };
        let actor = SessionActor {
            id: record.id,
            join_code: record.join_code.clone(),
            dm_user_id: record.dm_user_id,
            config: record.config.clone(),
            status: record.status,
            seats: Vec::new(),
            game: None,
            version: record.state_version,
            events: Vec::new(),
            turn_epoch: 0,
            turn_timer: None,
            monster_timer: None,
            empty_since: None,
            grace_period,
            store,
            self_tx: tx,
        };
        let id = record.id;
        tokio::spawn(async move {
            actor.run(rx).await;
            registry.remove(id).await;
            tracing::info!(session = %id, "session actor stopped");
        });
        handle
    }

    async fn run(mut self, mut rx: mpsc::Receiver<SessionCommand>) {
        while let Some(command) = rx.recv().await {
            if self.handle_command(command).await == Flow::Stop {
                break;
            }
        }
        self.cancel_timers();
        for seat in &mut self.seats {
            if let Some(grace) = seat.grace.take() {
                grace.abort();
            }
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) -> Flow {
        match command {
            SessionCommand::Join { user_id, display_name, character, link, seq, kind, seated } => {
                self.handle_join(user_id, display_name, character, link, seq, kind, seated)
                    .await
            }
            SessionCommand::Leave { user_id, seq } => self.handle_leave(user_id, seq).await,
            SessionCommand::Ready { user_id, ready, seq } => {
                self.handle_ready(user_id, ready, seq).await
            }
            SessionCommand::Action { user_id, action, seq } => {
                self.handle_action(user_id, action, seq).await
            }
            SessionCommand::Dm { user_id, command, seq } => {
                self.handle_dm(user_id, command, seq).await
            }
            SessionCommand::Chat { user_id, message, target, seq } => {
                self.handle_chat(user_id, message, target, seq)
            }
            SessionCommand::Disconnected { user_id, conn_id } => {
                self.handle_disconnected(user_id, conn_id).await
            }
            SessionCommand::TurnTimeout { epoch } => self.handle_turn_timeout(epoch).await,
            SessionCommand::MonsterTurn { epoch } => self.handle_monster_turn(epoch).await,
            SessionCommand::GraceExpired { user_id } => {
                self.handle_grace_expired(user_id).await
            }
            SessionCommand::IdleCheck => self.handle_idle_check().await,
        }
    }

    // ---- seating -------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn handle_join(
        &mut self,
        user_id: UserId,
        display_name: String,
        character: crate::store::CharacterRecord,
        link: ConnectionLink,
        seq: u64,
        kind: JoinKind,
        seated: oneshot::Sender<bool>,
    ) -> Flow {
        // A returning user reclaims their seat, whatever the phase.
        if self.seats.iter().any(|s| s.user_id == user_id) {
            self.reseat(user_id, link, seq).await;
            let _ = seated.send(true);
            return Flow::Continue;
        }

        let as_spectator = match self.status {
            SessionStatus::Lobby => false,
            SessionStatus::Playing | SessionStatus::Paused => {
                if !self.config.allow_late_join {
                    link.try_send(Outbound::error(
                        ErrorCode::GameAlreadyStarted,
                        None,
                        Some(seq),
                    ));
                    let _ = seated.send(false);
                    return Flow::Continue;
                }
                true
            }
            SessionStatus::Ended => {
                link.try_send(Outbound::error(ErrorCode::GameNotFound, None, Some(seq)));
                let _ = seated.send(false);
                return Flow::Continue;
            }
        };

        let players = self
            .seats
            .iter()
            .filter(|s| s.status != PlayerStatus::Spectating)
            .count();
        if !as_spectator && players >= self.config.max_players as usize {
            link.try_send(Outbound::error(ErrorCode::GameFull, None, Some(seq)));
            let _ = seated.send(false);
            return Flow::Continue;
        }

        let now = now_ms();
        let seat = Seat {
            user_id,
            display_name,
            character_id: character.id,
            character_name: character.name.clone(),
            class: character.class,
            xp: character.xp,
            equipped: character.inventory.equipped().cloned(),
            unit_id: None,
            status: if as_spectator {
                PlayerStatus::Spectating
            } else {
                PlayerStatus::Connected
            },
            is_ready: false,
            link: Some(link.clone()),
            grace: None,
            joined_at: now,
        };
        let record = seat.player_record(self.id, now);
        self.seats.push(seat);
        self.empty_since = None;

        if let Err(error) = with_retry(|| self.store.upsert_session_player(record.clone())).await {
            tracing::error!(?error, session = %self.id, "failed to persist join");
        }

        let view = self
            .seats
            .last()
            .map(|s| s.view(self.dm_user_id))
            .expect("seat just pushed");
        let joined = GameJoinedPayload {
            session_id: self.id,
            join_code: self.join_code.clone(),
            config: self.config.clone(),
            status: self.status,
            players: self.seats.iter().map(|s| s.view(self.dm_user_id)).collect(),
        };
        let message = match kind {
            JoinKind::Create => {
                ServerMessage::GameCreated(protocol::server::GameCreatedPayload {
                    session_id: self.id,
                    join_code: self.join_code.clone(),
                    config: self.config.clone(),
                })
            }
            JoinKind::Join => ServerMessage::GameJoined(joined),
        };
        link.try_send(Outbound::response(message, seq));
        // A spectator entering a running game needs the current snapshot.
        if as_spectator && let Some(full) = self.full_state_message() {
            link.try_send(Outbound::message(full));
        }
        let _ = seated.send(true);

        self.broadcast_except(
            user_id,
            ServerMessage::PlayerJoined(PlayerJoinedPayload { seat: view }),
        )
        .await;
        Flow::Continue
    }

    /// A user who already has a seat comes back on a fresh connection.
    async fn reseat(&mut self, user_id: UserId, link: ConnectionLink, seq: u64) {
        let dm = self.dm_user_id;
        let Some(seat) = self.seats.iter_mut().find(|s| s.user_id == user_id) else {
            return;
        };
        if let Some(grace) = seat.grace.take() {
            grace.abort();
        }
        // A still-open previous connection gets replaced.
        if let Some(old) = seat.link.take()
            && old.conn_id != link.conn_id
        {
            old.try_send(Outbound::Close {
                code: 1000,
                reason: "signed in from another connection".into(),
            });
        }
        seat.link = Some(link.clone());
        if seat.status == PlayerStatus::Disconnected {
            seat.status = PlayerStatus::Connected;
        }
        let view = seat.view(dm);
        self.empty_since = None;

        let now = now_ms();
        let status = view.status;
        if let Err(error) = with_retry(|| {
            self.store
                .update_session_player_status(self.id, user_id, status, now)
        })
        .await
        {
            tracing::error!(?error, session = %self.id, "failed to persist reconnect");
        }

        link.try_send(Outbound::response(
            ServerMessage::GameJoined(GameJoinedPayload {
                session_id: self.id,
                join_code: self.join_code.clone(),
                config: self.config.clone(),
                status: self.status,
                players: self.seats.iter().map(|s| s.view(self.dm_user_id)).collect(),
            }),
            seq,
        ));
        // Resync: the full state resets the client's version.
        if let Some(full) = self.full_state_message() {
            link.try_send(Outbound::message(full));
        }
        self.broadcast_except(
            user_id,
            ServerMessage::PlayerJoined(PlayerJoinedPayload { seat: view }),
        )
        .await;
    }

    async fn handle_leave(&mut self, user_id: UserId, _seq: u64) -> Flow {
        let Some(index) = self.seats.iter().position(|s| s.user_id == user_id) else {
            return Flow::Continue;
        };
        let was_current = self.current_turn_user() == Some(user_id);
        let mut seat = self.seats.remove(index);
        if let Some(grace) = seat.grace.take() {
            grace.abort();
        }
        if let Err(error) =
            with_retry(|| self.store.delete_session_player(self.id, user_id)).await
        {
            tracing::error!(?error, session = %self.id, "failed to persist leave");
        }
        self.broadcast(ServerMessage::PlayerLeft(PlayerLeftPayload {
            user_id,
            reason: "left".into(),
        }))
        .await;

        // The DM walking out ends the session for everyone.
        if user_id == self.dm_user_id || self.seats.is_empty() {
            return self.end_session(None, "dm left").await;
        }
        if was_current && self.status == SessionStatus::Playing {
            return self.inject_end_turn().await;
        }
        Flow::Continue
    }

    async fn handle_ready(&mut self, user_id: UserId, ready: bool, seq: u64) -> Flow {
        if self.status != SessionStatus::Lobby {
            self.reply_error(user_id, seq, ErrorCode::InvalidAction, "not in lobby");
            return Flow::Continue;
        }
        let Some(seat) = self.seats.iter_mut().find(|s| s.user_id == user_id) else {
            return Flow::Continue;
        };
        seat.is_ready = ready;
        let record = seat.player_record(self.id, now_ms());
        if let Err(error) = with_retry(|| self.store.upsert_session_player(record.clone())).await {
            tracing::error!(?error, session = %self.id, "failed to persist ready flag");
        }
        self.broadcast(ServerMessage::PlayerReady(PlayerReadyPayload { user_id, ready }))
            .await;
        Flow::Continue
    }

    fn handle_chat(
        &mut self,
        user_id: UserId,
        message: String,
        target: Option<UserId>,
        seq: u64,
    ) -> Flow {
        let Some(seat) = self.seats.iter().find(|s| s.user_id == user_id) else {
            return Flow::Continue;
        };
        let payload = ChatBroadcastPayload {
            from: user_id,
            display_name: seat.display_name.clone(),
            message: sanitize_chat(&message),
            whisper: target.is_some(),
        };
        match target {
            Some(target_id) => {
                if !self.seats.iter().any(|s| s.user_id == target_id) {
                    self.reply_error(user_id, seq, ErrorCode::InvalidAction, "no such user");
                    return Flow::Continue;
                }
                // Whispers reach the target and echo back to the sender.
                for receiver in [target_id, user_id] {
                    self.send_to(receiver, ServerMessage::Chat(payload.clone()));
                }
            }
            None => {
                let message = ServerMessage::Chat(payload);
                for seat in &self.seats {
                    if let Some(link) = &seat.link {
                        link.try_send(Outbound::message(message.clone()));
                    }
                }
            }
        }
        Flow::Continue
    }

    async fn handle_disconnected(&mut self, user_id: UserId, conn_id: Uuid) -> Flow {
        let Some(seat) = self.seats.iter_mut().find(|s| s.user_id == user_id) else {
            return Flow::Continue;
        };
        // Ignore drops of connections that were already replaced.
        match &seat.link {
            Some(link) if link.conn_id == conn_id => {}
            _ => return Flow::Continue,
        }
        self.mark_disconnected(user_id).await;
        Flow::Continue
    }

    /// Marks a seat disconnected, starts its grace timer and tells the
    /// others. Shared by transport drops and lagging fan-out queues. The
    /// loop is iterative on purpose: the `player_left` broadcast may itself
    /// reveal further lagging seats.
    pub(crate) async fn mark_disconnected(&mut self, user_id: UserId) {
        let mut pending = vec![user_id];
        while let Some(user) = pending.pop() {
            if !self.detach_seat(user).await {
                continue;
            }
            let message = ServerMessage::PlayerLeft(PlayerLeftPayload {
                user_id: user,
                reason: "disconnected".into(),
            });
            pending.extend(self.fan_out(None, &message));
        }
    }

    /// Drops the link of a seat and arms its grace timer. Returns false when
    /// there was nothing to detach.
    async fn detach_seat(&mut self, user_id: UserId) -> bool {
        let Some(seat) = self.seats.iter_mut().find(|s| s.user_id == user_id) else {
            return false;
        };
        if seat.link.is_none() {
            return false;
        }
        seat.link = None;
        if seat.status == PlayerStatus::Connected {
            seat.status = PlayerStatus::Disconnected;
        }
        if let Some(old) = seat.grace.take() {
            old.abort();
        }
        let tx = self.self_tx.clone();
        let grace_period = self.grace_period;
        seat.grace = Some(tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            let _ = tx.send(SessionCommand::GraceExpired { user_id }).await;
        }));

        let now = now_ms();
        if let Err(error) = with_retry(|| {
            self.store.update_session_player_status(
                self.id,
                user_id,
                PlayerStatus::Disconnected,
                now,
            )
        })
        .await
        {
            tracing::error!(?error, session = %self.id, "failed to persist disconnect");
        }

        if self.seats.iter().all(|s| s.link.is_none()) {
            self.empty_since = Some(Instant::now());
        }
        true
    }

    async fn handle_grace_expired(&mut self, user_id: UserId) -> Flow {
        let Some(seat) = self.seats.iter_mut().find(|s| s.user_id == user_id) else {
            return Flow::Continue;
        };
        if seat.link.is_some() {
            // Reconnected in the meantime; the timer lost the race.
            return Flow::Continue;
        }
        seat.grace = None;

        match self.status {
            SessionStatus::Playing | SessionStatus::Paused => {
                // The seat and unit stay reserved; only a held turn is released.
                if self.status == SessionStatus::Playing
                    && self.current_turn_user() == Some(user_id)
                {
                    return self.inject_end_turn().await;
                }
            }
            SessionStatus::Lobby => {
                // No unit to hold in the lobby, the seat is freed.
                self.seats.retain(|s| s.user_id != user_id);
                if let Err(error) =
                    with_retry(|| self.store.delete_session_player(self.id, user_id)).await
                {
                    tracing::error!(?error, session = %self.id, "failed to drop lobby seat");
                }
                self.broadcast(ServerMessage::PlayerLeft(PlayerLeftPayload {
                    user_id,
                    reason: "left".into(),
                }))
                .await;
                if user_id == self.dm_user_id || self.seats.is_empty() {
                    return self.end_session(None, "lobby abandoned").await;
                }
            }
            SessionStatus::Ended => {}
        }
        Flow::Continue
    }

    async fn handle_idle_check(&mut self) -> Flow {
        let any_connected = self.seats.iter().any(|s| s.link.is_some());
        if any_connected {
            self.empty_since = None;
            return Flow::Continue;
        }
        let since = *self.empty_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= Duration::from_secs(SESSION_IDLE_TIMEOUT_SECS) {
            tracing::info!(session = %self.id, "ending idle session");
            return self.end_session(None, "inactivity").await;
        }
        Flow::Continue
    }

    // ---- plumbing ------------------------------------------------------

    pub(crate) fn seat(&self, user_id: UserId) -> Option<&Seat> {
        self.seats.iter().find(|s| s.user_id == user_id)
    }

    /// The user owning the unit whose turn it is, None for monster turns.
    pub(crate) fn current_turn_user(&self) -> Option<UserId> {
        let unit = self.game.as_ref()?.current_unit_id()?;
        self.seats
            .iter()
            .find(|s| s.unit_id == Some(unit))
            .map(|s| s.user_id)
    }

    /// The full-state sync message, used on (re)join and resume.
    pub(crate) fn full_state_message(&self) -> Option<ServerMessage> {
        let state = match &self.game {
            Some(game) => Some(serde_json::to_value(game).ok()?),
            None => None,
        };
        Some(ServerMessage::GameState(GameStatePayload {
            status: self.status,
            state,
            version: self.version,
        }))
    }

    pub(crate) fn send_to(&self, user_id: UserId, message: ServerMessage) {
        if let Some(link) = self.seat(user_id).and_then(|s| s.link.as_ref()) {
            link.try_send(Outbound::message(message));
        }
    }

    pub(crate) fn reply_error(
        &self,
        user_id: UserId,
        seq: u64,
        code: ErrorCode,
        detail: &str,
    ) {
        if let Some(link) = self.seat(user_id).and_then(|s| s.link.as_ref()) {
            link.try_send(Outbound::error(code, Some(detail.to_string()), Some(seq)));
        }
    }

    pub(crate) fn reply_ok(&self, user_id: UserId, seq: u64, message: ServerMessage) {
        if let Some(link) = self.seat(user_id).and_then(|s| s.link.as_ref()) {
            link.try_send(Outbound::response(message, seq));
        }
    }

    /// Fans a message out to every connected seat. A seat whose outbound
    /// queue is full is lagging beyond saving: it is dropped like a
    /// disconnect, including the grace window.
    pub(crate) async fn broadcast(&mut self, message: ServerMessage) {
        self.broadcast_except_inner(None, message).await;
    }

    pub(crate) async fn broadcast_except(&mut self, skip: UserId, message: ServerMessage) {
        self.broadcast_except_inner(Some(skip), message).await;
    }

    async fn broadcast_except_inner(&mut self, skip: Option<UserId>, message: ServerMessage) {
        let lagging = self.fan_out(skip, &message);
        for user_id in lagging {
            self.mark_disconnected(user_id).await;
        }
    }

    /// Delivers one message to every connected seat except `skip`. Seats
    /// whose bounded queue is full get a close frame and are reported back
    /// as lagging; the caller treats them as disconnects.
    fn fan_out(&self, skip: Option<UserId>, message: &ServerMessage) -> Vec<UserId> {
        let mut lagging = Vec::new();
        for seat in &self.seats {
            if Some(seat.user_id) == skip {
                continue;
            }
            if let Some(link) = &seat.link
                && !link.try_send(Outbound::message(message.clone()))
            {
                tracing::warn!(
                    session = %self.id,
                    user = %seat.user_id,
                    "outbound queue full, dropping connection"
                );
                link.try_send(Outbound::Close { code: 1008, reason: "lagging".into() });
                lagging.push(seat.user_id);
            }
        }
        lagging
    }

    pub(crate) fn cancel_timers(&mut self) {
        self.turn_epoch += 1;
        if let Some(timer) = self.turn_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.monster_timer.take() {
            timer.abort();
        }
    }
}

/// Strips the characters HTML injection needs. Chat stays plain text.
pub(crate) fn sanitize_chat(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for c in message.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_is_html_sanitized() {
        assert_eq!(
            sanitize_chat(r#"<script>alert("hi")</script>"#),
            "&lt;script&gt;alert(&quot;hi&quot;)&lt;/script&gt;"
        );
        assert_eq!(sanitize_chat("fine & dandy"), "fine &amp; dandy");
        assert_eq!(sanitize_chat("plain"), "plain");
    }
}
