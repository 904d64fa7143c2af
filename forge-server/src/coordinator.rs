//! The coordinator half of the session actor: executes validated actions
//! through the simulation, versions and persists the outcome, fans events
//! and deltas out, schedules turn timeouts and monster turns, and settles
//! rewards when the game ends.

use crate::connection::Outbound;
use crate::delta;
use crate::session::{Flow, SessionActor};
use crate::store::{ProgressionDelta, with_retry};
use protocol::ids::{CharacterId, UnitId, UserId};
use protocol::server::{
    EventsPayload, GameEndedPayload, GameStatePayload, PlayerLeftPayload,
    TurnChangePayload,
};
use protocol::{
    CombatOutcome, CombatPhase, DmCommand, ErrorCode, GameAction, GameEventKind,
    PlayerReward, ServerMessage, SessionStatus, StateDelta, Weapon,
};
use simulation::unit::{PlayerUnitSpec, Unit, UnitKind, UnitOptions, UnitStats};
use simulation::{GameState, MapOptions};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;
use tokio::sync::mpsc::Sender;

/// Delay before a monster takes its first step of the turn.
const MONSTER_TURN_DELAY: Duration = Duration::from_millis(800);
/// Delay between consecutive steps of the same monster turn.
const MONSTER_STEP_DELAY: Duration = Duration::from_millis(300);

impl SessionActor {
    // ---- inbound game actions ------------------------------------------

    pub(crate) async fn handle_action(
        &mut self,
        user_id: UserId,
        action: GameAction,
        seq: u64,
    ) -> Flow {
        if self.status != SessionStatus::Playing {
            self.reply_error(user_id, seq, ErrorCode::InvalidAction, "game is not running");
            return Flow::Continue;
        }
        let Some(seat) = self.seat(user_id) else {
            self.reply_error(user_id, seq, ErrorCode::Forbidden, "not in this session");
            return Flow::Continue;
        };
        let Some(unit_id) = seat.unit_id else {
            self.reply_error(user_id, seq, ErrorCode::Forbidden, "spectators cannot act");
            return Flow::Continue;
        };
        let current = self.game.as_ref().and_then(|g| g.current_unit_id());
        if current != Some(unit_id) || action.unit_id() != unit_id {
            self.reply_error(user_id, seq, ErrorCode::NotYourTurn, "not your turn");
            return Flow::Continue;
        }
        self.run_pipeline(action, Some((user_id, seq))).await
    }

    /// The single write path for game state: simulate, diff, version,
    /// persist, broadcast, then deal with turn changes and game end.
    ///
    /// Validation failures answer the requester only: no broadcast, no
    /// version bump. Persistence failures revert the in-memory state.
    pub(crate) async fn run_pipeline(
        &mut self,
        action: GameAction,
        requester: Option<(UserId, u64)>,
    ) -> Flow {
        let Some(game) = self.game.as_mut() else {
            if let Some((user_id, seq)) = requester {
                self.reply_error(user_id, seq, ErrorCode::InvalidAction, "no game running");
            }
            return Flow::Continue;
        };
        let snapshot = game.clone();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            simulation::execute_action(game, &action)
        }));
        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                // Quarantine: restore the snapshot, pause, tell everyone.
                tracing::error!(session = %self.id, "simulation panicked, quarantining session");
                self.game = Some(snapshot);
                return self.quarantine().await;
            }
        };

        let events = match result {
            Ok(events) => events,
            Err(error) => {
                if let Some((user_id, seq)) = requester {
                    self.reply_error(
                        user_id,
                        seq,
                        ErrorCode::InvalidAction,
                        error.reason(),
                    );
                }
                return Flow::Continue;
            }
        };

        let old_json = match serde_json::to_value(&snapshot) {
            Ok(v) => v,
            Err(error) => {
                tracing::error!(?error, "state serialization failed");
                self.game = Some(snapshot);
                return Flow::Continue;
            }
        };
        let new_json = match serde_json::to_value(self.game.as_ref().expect("set above")) {
            Ok(v) => v,
            Err(error) => {
                tracing::error!(?error, "state serialization failed");
                self.game = Some(snapshot);
                return Flow::Continue;
            }
        };
        let changes = delta::diff(&old_json, &new_json);
        let previous_version = self.version;
        let new_version = previous_version + 1;

        let persisted = with_retry(|| {
            self.store
                .write_session_state(self.id, new_json.clone(), &events, new_version)
        })
        .await;
        if let Err(error) = persisted {
            tracing::error!(?error, session = %self.id, "state write failed, reverting");
            self.game = Some(snapshot);
            if let Some((user_id, seq)) = requester {
                self.reply_error(user_id, seq, ErrorCode::InternalError, "write failed");
            }
            return Flow::Continue;
        }

        self.version = new_version;
        self.events.extend(events.iter().cloned());

        // Events first, then the delta: recipients see what happened before
        // their state advances to the version that reflects it.
        self.broadcast(ServerMessage::Events(EventsPayload { events: events.clone() }))
            .await;
        self.broadcast(ServerMessage::StateDelta(StateDelta {
            version: new_version,
            previous_version,
            changes,
        }))
        .await;

        if events
            .iter()
            .any(|e| matches!(e.kind, GameEventKind::TurnStarted { .. }))
        {
            self.on_turn_change().await;
        }

        let phase = self.game.as_ref().map(|g| g.combat.phase);
        match phase {
            Some(CombatPhase::Victory) => {
                self.end_session(Some(CombatOutcome::Victory), "victory").await
            }
            Some(CombatPhase::Defeat) => {
                self.end_session(Some(CombatOutcome::Defeat), "defeat").await
            }
            _ => Flow::Continue,
        }
    }

    /// Ends the current unit's turn on its behalf (timeout, leave, kick, DM
    /// skip).
    pub(crate) async fn inject_end_turn(&mut self) -> Flow {
        let Some(unit_id) = self.game.as_ref().and_then(|g| g.current_unit_id()) else {
            return Flow::Continue;
        };
        self.run_pipeline(GameAction::EndTurn { unit_id }, None).await
    }

    // ---- turn scheduling -----------------------------------------------

    /// Reacts to a `turn_started` event: new epoch, `turn_change` broadcast,
    /// fresh timer or monster schedule.
    pub(crate) async fn on_turn_change(&mut self) {
        self.cancel_timers();
        let Some(game) = self.game.as_ref() else {
            return;
        };
        let Some(unit_id) = game.current_unit_id() else {
            return;
        };
        let round = game.combat.round;
        let user_id = self
            .seats
            .iter()
            .find(|s| s.unit_id == Some(unit_id))
            .map(|s| s.user_id);
        self.broadcast(ServerMessage::TurnChange(TurnChangePayload {
            unit_id,
            user_id,
            round,
        }))
        .await;
        self.schedule_turn();
    }

    /// Arms the timers for the unit whose turn it is. Timers enqueue
    /// commands carrying the epoch they were armed in; a bumped epoch
    /// invalidates them.
    pub(crate) fn schedule_turn(&mut self) {
        if self.status != SessionStatus::Playing {
            return;
        }
        let Some(game) = self.game.as_ref() else {
            return;
        };
        let Some(unit_id) = game.current_unit_id() else {
            return;
        };
        let is_player = game.unit(unit_id).map(Unit::is_player).unwrap_or(false);
        let epoch = self.turn_epoch;
        let tx = self.self_tx.clone();

        if is_player {
            if self.config.turn_time_limit > 0 {
                let limit = Duration::from_secs(self.config.turn_time_limit);
                self.turn_timer = Some(tokio::spawn(timer(tx, limit, move || {
                    crate::session::SessionCommand::TurnTimeout { epoch }
                })));
            }
        } else {
            self.monster_timer = Some(tokio::spawn(timer(tx, MONSTER_TURN_DELAY, move || {
                crate::session::SessionCommand::MonsterTurn { epoch }
            })));
        }
    }

    pub(crate) async fn handle_turn_timeout(&mut self, epoch: u64) -> Flow {
        if epoch != self.turn_epoch || self.status != SessionStatus::Playing {
            return Flow::Continue;
        }
        tracing::debug!(session = %self.id, "turn time limit hit, ending turn");
        self.inject_end_turn().await
    }

    pub(crate) async fn handle_monster_turn(&mut self, epoch: u64) -> Flow {
        if epoch != self.turn_epoch || self.status != SessionStatus::Playing {
            return Flow::Continue;
        }
        let Some(game) = self.game.as_ref() else {
            return Flow::Continue;
        };
        let Some(unit_id) = game.current_unit_id() else {
            return Flow::Continue;
        };
        if game.unit(unit_id).map(Unit::is_player).unwrap_or(true) {
            return Flow::Continue;
        }

        let action = simulation::monster_action(game);
        let ends_turn = matches!(action, GameAction::EndTurn { .. });
        let flow = self.run_pipeline(action, None).await;
        if flow == Flow::Stop {
            return flow;
        }
        // Same epoch means the monster still holds the turn: take the next
        // step after a short pause.
        if !ends_turn && epoch == self.turn_epoch && self.status == SessionStatus::Playing {
            let tx = self.self_tx.clone();
            self.monster_timer = Some(tokio::spawn(timer(tx, MONSTER_STEP_DELAY, move || {
                crate::session::SessionCommand::MonsterTurn { epoch }
            })));
        }
        Flow::Continue
    }

    // ---- DM commands ---------------------------------------------------

    pub(crate) async fn handle_dm(
        &mut self,
        user_id: UserId,
        command: DmCommand,
        seq: u64,
    ) -> Flow {
        if user_id != self.dm_user_id {
            self.reply_error(user_id, seq, ErrorCode::NotDm, "only the DM can do this");
            return Flow::Continue;
        }
        match command {
            DmCommand::StartGame => self.start_game(user_id, seq).await,
            DmCommand::PauseGame => self.set_paused(user_id, seq, true).await,
            DmCommand::ResumeGame => self.set_paused(user_id, seq, false).await,
            DmCommand::EndGame => self.end_session(None, "dm command").await,
            DmCommand::GrantXp { user_id: target, amount } => {
                let delta = ProgressionDelta { xp: amount, ..Default::default() };
                self.grant(user_id, seq, target, delta).await
            }
            DmCommand::GrantGold { user_id: target, gold, silver } => {
                let delta = ProgressionDelta { gold, silver, ..Default::default() };
                self.grant(user_id, seq, target, delta).await
            }
            DmCommand::GrantWeapon { user_id: target, weapon } => {
                let delta = ProgressionDelta { weapons: vec![weapon], ..Default::default() };
                self.grant(user_id, seq, target, delta).await
            }
            DmCommand::SpawnMonster { name, position, hp, attack, defense } => {
                self.run_state_edit(user_id, seq, move |game| {
                    if !game.map.is_walkable(position) {
                        return Err("tile is not walkable".into());
                    }
                    if game.is_occupied(position, UnitId::MAX) {
                        return Err("tile is occupied".into());
                    }
                    let id = game.units.iter().map(|u| u.id).max().map_or(0, |m| m + 1);
                    let hp = hp.max(1);
                    game.units.push(Unit {
                        id,
                        kind: UnitKind::Monster,
                        name,
                        class: None,
                        position,
                        stats: UnitStats {
                            hp,
                            max_hp: hp,
                            attack,
                            defense,
                            movement: 3,
                            range: 1,
                            initiative: 0,
                        },
                    });
                    // Late spawns act last in the standing order.
                    game.combat.initiative.push(id);
                    Ok(())
                })
                .await
            }
            DmCommand::RemoveMonster { unit_id } => {
                self.run_state_edit(user_id, seq, move |game| {
                    let unit = game
                        .unit(unit_id)
                        .ok_or_else(|| "no such unit".to_string())?;
                    if unit.is_player() {
                        return Err("not a monster".into());
                    }
                    if game.current_unit_id() == Some(unit_id) {
                        return Err("cannot remove the unit whose turn it is".into());
                    }
                    if unit.is_alive() && game.living_monsters().count() == 1 {
                        return Err("cannot remove the last monster".into());
                    }
                    game.units.retain(|u| u.id != unit_id);
                    if let Some(index) =
                        game.combat.initiative.iter().position(|id| *id == unit_id)
                    {
                        game.combat.initiative.remove(index);
                        if index < game.combat.current_turn {
                            game.combat.current_turn -= 1;
                        } else if game.combat.current_turn >= game.combat.initiative.len()
                            && !game.combat.initiative.is_empty()
                        {
                            game.combat.current_turn = 0;
                        }
                    }
                    Ok(())
                })
                .await
            }
            DmCommand::ModifyMonster { unit_id, hp, attack, defense } => {
                self.run_state_edit(user_id, seq, move |game| {
                    let unit = game
                        .unit_mut(unit_id)
                        .ok_or_else(|| "no such unit".to_string())?;
                    if unit.kind != UnitKind::Monster {
                        return Err("not a monster".into());
                    }
                    if let Some(hp) = hp {
                        unit.stats.hp = hp.max(1);
                        unit.stats.max_hp = unit.stats.max_hp.max(unit.stats.hp);
                    }
                    if let Some(attack) = attack {
                        unit.stats.attack = attack;
                    }
                    if let Some(defense) = defense {
                        unit.stats.defense = defense;
                    }
                    Ok(())
                })
                .await
            }
            DmCommand::SkipTurn => {
                if self.status != SessionStatus::Playing {
                    self.reply_error(user_id, seq, ErrorCode::InvalidAction, "game is not running");
                    return Flow::Continue;
                }
                self.inject_end_turn().await
            }
            DmCommand::KickPlayer { user_id: target } => self.kick(user_id, seq, target).await,
        }
    }

    async fn start_game(&mut self, user_id: UserId, seq: u64) -> Flow {
        if self.status != SessionStatus::Lobby {
            self.reply_error(user_id, seq, ErrorCode::GameAlreadyStarted, "already started");
            return Flow::Continue;
        }
        if self.seats.len() < 2 {
            self.reply_error(user_id, seq, ErrorCode::InvalidAction, "need at least two players");
            return Flow::Continue;
        }
        if self
            .seats
            .iter()
            .any(|s| s.user_id != self.dm_user_id && !s.is_ready)
        {
            self.reply_error(user_id, seq, ErrorCode::InvalidAction, "players are not ready");
            return Flow::Continue;
        }

        let seed = self.config.map_seed;
        let map = simulation::generate_map(&MapOptions::with_seed(seed));
        let specs: Vec<PlayerUnitSpec> = self
            .seats
            .iter()
            .map(|s| PlayerUnitSpec {
                name: s.character_name.clone(),
                class: s.class,
                xp: s.xp,
                weapon: s.equipped.clone(),
            })
            .collect();
        let units = simulation::generate_units(
            &UnitOptions { seed, difficulty: self.config.difficulty, players: specs },
            &map,
        );
        let mut state = GameState::new(map, units, seed);
        let events = match simulation::start_combat(&mut state) {
            Ok(events) => events,
            Err(error) => {
                tracing::error!(?error, session = %self.id, "combat start failed");
                self.reply_error(user_id, seq, ErrorCode::InternalError, "combat start failed");
                return Flow::Continue;
            }
        };

        let state_json = match serde_json::to_value(&state) {
            Ok(v) => v,
            Err(error) => {
                tracing::error!(?error, "state serialization failed");
                self.reply_error(user_id, seq, ErrorCode::InternalError, "serialization failed");
                return Flow::Continue;
            }
        };
        if let Err(error) = with_retry(|| {
            self.store
                .update_session_status(self.id, SessionStatus::Playing)
        })
        .await
        {
            tracing::error!(?error, session = %self.id, "status write failed");
            self.reply_error(user_id, seq, ErrorCode::InternalError, "write failed");
            return Flow::Continue;
        }
        if let Err(error) = with_retry(|| {
            self.store
                .write_session_state(self.id, state_json.clone(), &events, 1)
        })
        .await
        {
            tracing::error!(?error, session = %self.id, "initial state write failed");
            self.reply_error(user_id, seq, ErrorCode::InternalError, "write failed");
            return Flow::Continue;
        }

        // Units were generated players-first in seat order.
        let now = crate::now_ms();
        for (index, seat) in self.seats.iter_mut().enumerate() {
            seat.unit_id = Some(index as UnitId);
        }
        let session_id = self.id;
        for seat in &self.seats {
            let record = seat.player_record(session_id, now);
            if let Err(error) =
                with_retry(|| self.store.upsert_session_player(record.clone())).await
            {
                tracing::error!(?error, session = %self.id, "seat write failed");
            }
        }

        self.status = SessionStatus::Playing;
        self.game = Some(state);
        self.version = 1;
        self.events = events.clone();

        tracing::info!(session = %self.id, players = self.seats.len(), seed, "game started");
        if let Some(full) = self.full_state_message() {
            self.broadcast(full).await;
        }
        self.broadcast(ServerMessage::Events(EventsPayload { events })).await;
        self.on_turn_change().await;
        Flow::Continue
    }

    async fn set_paused(&mut self, user_id: UserId, seq: u64, pause: bool) -> Flow {
        let (expected, next) = if pause {
            (SessionStatus::Playing, SessionStatus::Paused)
        } else {
            (SessionStatus::Paused, SessionStatus::Playing)
        };
        if self.status != expected {
            self.reply_error(user_id, seq, ErrorCode::InvalidAction, "wrong session state");
            return Flow::Continue;
        }
        if let Err(error) =
            with_retry(|| self.store.update_session_status(self.id, next)).await
        {
            tracing::error!(?error, session = %self.id, "status write failed");
            self.reply_error(user_id, seq, ErrorCode::InternalError, "write failed");
            return Flow::Continue;
        }
        self.status = next;
        self.cancel_timers();
        self.broadcast(ServerMessage::GameState(GameStatePayload {
            status: self.status,
            state: None,
            version: self.version,
        }))
        .await;
        if !pause {
            self.schedule_turn();
        }
        Flow::Continue
    }

    async fn grant(
        &mut self,
        dm: UserId,
        seq: u64,
        target: UserId,
        delta: ProgressionDelta,
    ) -> Flow {
        let Some(seat) = self.seat(target) else {
            self.reply_error(dm, seq, ErrorCode::CharacterNotFound, "user not in session");
            return Flow::Continue;
        };
        let character_id = seat.character_id;
        match with_retry(|| self.store.update_progression(character_id, &delta)).await {
            Ok(updated) => {
                // Keep the lobby snapshot in step for a later game start.
                if let Some(seat) = self.seats.iter_mut().find(|s| s.user_id == target) {
                    seat.xp = updated.xp;
                }
                self.reply_ok(dm, seq, ServerMessage::Pong(protocol::server::PongPayload {}));
                Flow::Continue
            }
            Err(error) => {
                tracing::error!(?error, session = %self.id, "progression write failed");
                self.reply_error(dm, seq, ErrorCode::InternalError, "write failed");
                Flow::Continue
            }
        }
    }

    /// DM edits that bypass the simulation: diffed, versioned, persisted
    /// and broadcast like any action, just without events.
    async fn run_state_edit<F>(&mut self, user_id: UserId, seq: u64, edit: F) -> Flow
    where
        F: FnOnce(&mut GameState) -> Result<(), String>,
    {
        if !matches!(self.status, SessionStatus::Playing | SessionStatus::Paused) {
            self.reply_error(user_id, seq, ErrorCode::InvalidAction, "game is not running");
            return Flow::Continue;
        }
        let Some(game) = self.game.as_mut() else {
            self.reply_error(user_id, seq, ErrorCode::InvalidAction, "no game state");
            return Flow::Continue;
        };
        let snapshot = game.clone();
        if let Err(reason) = edit(&mut *game) {
            *game = snapshot;
            self.reply_error(user_id, seq, ErrorCode::InvalidAction, &reason);
            return Flow::Continue;
        }

        let old_json = match serde_json::to_value(&snapshot) {
            Ok(v) => v,
            Err(_) => {
                self.game = Some(snapshot);
                self.reply_error(user_id, seq, ErrorCode::InternalError, "serialization failed");
                return Flow::Continue;
            }
        };
        let new_json = match serde_json::to_value(self.game.as_ref().expect("set above")) {
            Ok(v) => v,
            Err(_) => {
                self.game = Some(snapshot);
                self.reply_error(user_id, seq, ErrorCode::InternalError, "serialization failed");
                return Flow::Continue;
            }
        };
        let changes = delta::diff(&old_json, &new_json);
        let previous_version = self.version;
        let new_version = previous_version + 1;
        if let Err(error) = with_retry(|| {
            self.store
                .write_session_state(self.id, new_json.clone(), &[], new_version)
        })
        .await
        {
            tracing::error!(?error, session = %self.id, "state write failed, reverting");
            self.game = Some(snapshot);
            self.reply_error(user_id, seq, ErrorCode::InternalError, "write failed");
            return Flow::Continue;
        }
        self.version = new_version;
        self.broadcast(ServerMessage::StateDelta(StateDelta {
            version: new_version,
            previous_version,
            changes,
        }))
        .await;
        Flow::Continue
    }

    async fn kick(&mut self, dm: UserId, seq: u64, target: UserId) -> Flow {
        if target == dm {
            self.reply_error(dm, seq, ErrorCode::Forbidden, "cannot kick yourself");
            return Flow::Continue;
        }
        let Some(index) = self.seats.iter().position(|s| s.user_id == target) else {
            self.reply_error(dm, seq, ErrorCode::InvalidAction, "user not in session");
            return Flow::Continue;
        };
        let was_current = self.current_turn_user() == Some(target);
        let mut seat = self.seats.remove(index);
        if let Some(grace) = seat.grace.take() {
            grace.abort();
        }
        if let Some(link) = seat.link.take() {
            link.try_send(Outbound::error(
                ErrorCode::Forbidden,
                Some("kicked by the DM".into()),
                None,
            ));
            link.try_send(Outbound::Close { code: 1000, reason: "kicked".into() });
        }
        if let Err(error) =
            with_retry(|| self.store.delete_session_player(self.id, target)).await
        {
            tracing::error!(?error, session = %self.id, "failed to persist kick");
        }
        self.broadcast(ServerMessage::PlayerLeft(PlayerLeftPayload {
            user_id: target,
            reason: "kicked".into(),
        }))
        .await;
        if was_current && self.status == SessionStatus::Playing {
            return self.inject_end_turn().await;
        }
        Flow::Continue
    }

    // ---- end of game ---------------------------------------------------

    /// Terminal transition: rewards, archive, `game_ended` broadcast, stop.
    pub(crate) async fn end_session(
        &mut self,
        outcome: Option<CombatOutcome>,
        reason: &str,
    ) -> Flow {
        if self.status == SessionStatus::Ended {
            return Flow::Stop;
        }
        self.cancel_timers();

        let (rewards, progression) = self.compute_rewards(outcome);
        if let Err(error) =
            with_retry(|| self.store.archive_session(self.id, progression.clone())).await
        {
            tracing::error!(?error, session = %self.id, "archive failed");
        }
        self.status = SessionStatus::Ended;
        tracing::info!(session = %self.id, reason, ?outcome, "session ended");
        self.broadcast(ServerMessage::GameEnded(GameEndedPayload { outcome, rewards }))
            .await;
        Flow::Stop
    }

    /// Base 50 XP per participating player, +25 per kill, +100 on victory;
    /// coins and weapons go to whoever collected them. Damage and death
    /// counters come from the event log the same way.
    pub(crate) fn compute_rewards(
        &self,
        outcome: Option<CombatOutcome>,
    ) -> (Vec<PlayerReward>, Vec<(CharacterId, ProgressionDelta)>) {
        let Some(game) = &self.game else {
            return (Vec::new(), Vec::new());
        };
        let is_monster = |unit_id: UnitId| {
            game.unit(unit_id).map(|u| !u.is_player()).unwrap_or(false)
        };

        let mut rewards = Vec::new();
        let mut progression = Vec::new();
        for seat in &self.seats {
            let Some(unit_id) = seat.unit_id else {
                continue; // spectators earn nothing
            };
            let mut kills = 0u32;
            let mut deaths = 0u32;
            let mut damage_dealt = 0u64;
            let mut damage_taken = 0u64;
            let mut gold = 0u64;
            let mut silver = 0u64;
            let mut weapons: Vec<Weapon> = Vec::new();
            for event in &self.events {
                match &event.kind {
                    GameEventKind::UnitAttacked { attacker_id, target_id, damage, .. } => {
                        if *attacker_id == unit_id {
                            damage_dealt += *damage as u64;
                        }
                        if *target_id == unit_id {
                            damage_taken += *damage as u64;
                        }
                    }
                    GameEventKind::UnitDefeated { unit_id: defeated, attacker_id } => {
                        if *attacker_id == Some(unit_id) && is_monster(*defeated) {
                            kills += 1;
                        }
                        if *defeated == unit_id {
                            deaths += 1;
                        }
                    }
                    GameEventKind::LootCollected {
                        unit_id: collector,
                        gold: g,
                        silver: s,
                        weapon,
                        ..
                    } if *collector == unit_id => {
                        gold += g;
                        silver += s;
                        weapons.extend(weapon.iter().cloned());
                    }
                    _ => {}
                }
            }

            let mut xp = 50 + 25 * kills as u64;
            if outcome == Some(CombatOutcome::Victory) {
                xp += 100;
            }
            rewards.push(PlayerReward {
                user_id: seat.user_id,
                character_id: seat.character_id,
                xp,
                gold,
                silver,
                kills,
            });
            progression.push((
                seat.character_id,
                ProgressionDelta {
                    xp,
                    gold,
                    silver,
                    games_played: 1,
                    monsters_killed: kills,
                    damage_dealt,
                    damage_taken,
                    deaths,
                    weapons,
                },
            ));
        }
        (rewards, progression)
    }

    /// Fatal coordinator failure: the session is paused for manual recovery
    /// and every member is told.
    async fn quarantine(&mut self) -> Flow {
        if let Err(error) = with_retry(|| {
            self.store
                .update_session_status(self.id, SessionStatus::Paused)
        })
        .await
        {
            tracing::error!(?error, session = %self.id, "quarantine status write failed");
        }
        self.status = SessionStatus::Paused;
        self.cancel_timers();
        let notice = ServerMessage::Error(protocol::server::ErrorPayload {
            code: ErrorCode::InternalError,
            message: Some("session quarantined, waiting for recovery".into()),
        });
        self.broadcast(notice).await;
        Flow::Continue
    }
}

/// A one-shot timer task: sleep, then enqueue.
async fn timer<F>(tx: Sender<crate::session::SessionCommand>, delay: Duration, make: F)
where
    F: FnOnce() -> crate::session::SessionCommand + Send + 'static,
{
    tokio::time::sleep(delay).await;
    let _ = tx.send(make()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Seat;
    use crate::store::SledStore;
    use protocol::ids::SessionId;
    use protocol::{CharacterClass, GameEvent, PlayerStatus, Position, SessionConfig};
    use std::sync::Arc;

    fn player_seat(index: u32, xp: u64) -> Seat {
        Seat {
            user_id: protocol::ids::UserId::generate(),
            display_name: format!("Player {index}"),
            character_id: protocol::ids::CharacterId::generate(),
            character_name: format!("Hero {index}"),
            class: CharacterClass::Warrior,
            xp,
            equipped: None,
            unit_id: Some(index),
            status: PlayerStatus::Connected,
            is_ready: true,
            link: None,
            grace: None,
            joined_at: 0,
        }
    }

    /// An actor with two seated players and a started encounter, for
    /// exercising the synchronous coordinator pieces directly.
    fn rigged_actor() -> (tempfile::TempDir, SessionActor) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(SledStore::open(&dir.path().join("db")).unwrap());
        let (tx, _rx) = tokio::sync::mpsc::channel(8);

        let map = simulation::generate_map(&MapOptions::with_seed(42));
        let units = simulation::generate_units(
            &UnitOptions {
                seed: 42,
                difficulty: protocol::Difficulty::Normal,
                players: vec![
                    PlayerUnitSpec {
                        name: "Hero 0".into(),
                        class: CharacterClass::Warrior,
                        xp: 0,
                        weapon: None,
                    },
                    PlayerUnitSpec {
                        name: "Hero 1".into(),
                        class: CharacterClass::Ranger,
                        xp: 0,
                        weapon: None,
                    },
                ],
            },
            &map,
        );
        let mut game = GameState::new(map, units, 42);
        simulation::start_combat(&mut game).unwrap();

        let actor = SessionActor {
            id: SessionId::generate(),
            join_code: "ABC234".into(),
            dm_user_id: protocol::ids::UserId::generate(),
            config: SessionConfig::default(),
            status: SessionStatus::Playing,
            seats: vec![player_seat(0, 0), player_seat(1, 0)],
            game: Some(game),
            version: 1,
            events: Vec::new(),
            turn_epoch: 0,
            turn_timer: None,
            monster_timer: None,
            empty_since: None,
            grace_period: Duration::from_secs(protocol::DISCONNECT_GRACE_SECS),
            store,
            self_tx: tx,
        };
        (dir, actor)
    }

    fn event(id: u64, kind: GameEventKind) -> GameEvent {
        GameEvent { id, kind }
    }

    #[test]
    fn reward_math_matches_the_book() {
        let (_dir, mut actor) = rigged_actor();
        let monster_id = actor
            .game
            .as_ref()
            .unwrap()
            .living_monsters()
            .next()
            .unwrap()
            .id;
        actor.events = vec![
            event(1, GameEventKind::UnitAttacked {
                attacker_id: 0,
                target_id: monster_id,
                damage: 4,
                target_hp: 0,
            }),
            event(2, GameEventKind::UnitDefeated {
                unit_id: monster_id,
                attacker_id: Some(0),
            }),
            event(3, GameEventKind::LootCollected {
                drop_id: 1,
                unit_id: 1,
                gold: 9,
                silver: 3,
                weapon: None,
            }),
            event(4, GameEventKind::UnitAttacked {
                attacker_id: monster_id,
                target_id: 1,
                damage: 5,
                target_hp: 11,
            }),
        ];

        let (rewards, progression) = actor.compute_rewards(Some(CombatOutcome::Victory));
        assert_eq!(rewards.len(), 2);

        // Player 0: base 50 + 25 for the kill + 100 victory bonus.
        let first = &rewards[0];
        assert_eq!(first.xp, 175);
        assert_eq!(first.kills, 1);
        assert_eq!(first.gold, 0);

        // Player 1: base 50 + victory bonus, plus the collected coins.
        let second = &rewards[1];
        assert_eq!(second.xp, 150);
        assert_eq!(second.kills, 0);
        assert_eq!(second.gold, 9);
        assert_eq!(second.silver, 3);

        let delta_0 = &progression[0].1;
        assert_eq!(delta_0.games_played, 1);
        assert_eq!(delta_0.monsters_killed, 1);
        assert_eq!(delta_0.damage_dealt, 4);
        let delta_1 = &progression[1].1;
        assert_eq!(delta_1.damage_taken, 5);
        assert_eq!(delta_1.deaths, 0);
    }

    #[test]
    fn no_victory_means_no_bonus() {
        let (_dir, actor) = rigged_actor();
        let (rewards, _) = actor.compute_rewards(None);
        assert!(rewards.iter().all(|r| r.xp == 50));
    }

    #[test]
    fn spectators_are_skipped_in_rewards() {
        let (_dir, mut actor) = rigged_actor();
        let mut spectator = player_seat(9, 0);
        spectator.unit_id = None;
        spectator.status = PlayerStatus::Spectating;
        actor.seats.push(spectator);

        let (rewards, progression) = actor.compute_rewards(None);
        assert_eq!(rewards.len(), 2);
        assert_eq!(progression.len(), 2);
    }

    #[test]
    fn move_delta_addresses_position_and_movement() {
        let (_dir, actor) = rigged_actor();
        let mut game = actor.game.unwrap();
        let unit_id = game.current_unit_id().unwrap();
        let from = game.unit(unit_id).unwrap().position;
        let step = [(0, -1), (1, 0), (0, 1), (-1, 0)]
            .into_iter()
            .map(|(dx, dy)| Position::new(from.x + dx, from.y + dy))
            .find(|p| game.map.is_walkable(*p) && !game.is_occupied(*p, unit_id))
            .expect("spawn rooms always have a free neighbor");

        let old = serde_json::to_value(&game).unwrap();
        simulation::execute_action(
            &mut game,
            &GameAction::Move { unit_id, path: vec![step] },
        )
        .unwrap();
        let new = serde_json::to_value(&game).unwrap();

        let index = game.units.iter().position(|u| u.id == unit_id).unwrap();
        let ops = delta::diff(&old, &new);
        let paths: Vec<&str> = ops
            .iter()
            .map(|op| match op {
                protocol::DeltaOp::Set { path, .. } => path.as_str(),
                other => panic!("a plain move only sets fields, got {other:?}"),
            })
            .collect();
        assert!(paths.contains(&format!("units.{index}.position").as_str()));
        assert!(paths.contains(&"combat.turnState.movementRemaining"));
    }
}
