//! One task pair per authenticated connection, split over the socket like
//! the relay pattern: a send loop draining the bounded outbound queue plus
//! keepalive, and a receive loop dispatching inbound frames by type. If one
//! half finishes, the other is aborted.

use crate::handshake;
use crate::rate_limit::{ConnectionLimits, LimitOutcome};
use crate::registry::SessionHandle;
use crate::session::{JoinKind, SessionCommand};
use crate::store::{CharacterRecord, StoreError, UserRecord, with_retry};
use crate::{AppState, now_ms};
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::sink::SinkExt;
use futures_util::stream::{SplitSink, SplitStream, StreamExt};
use protocol::client::{CreateGamePayload, JoinGamePayload};
use protocol::ids::UserId;
use protocol::server::{ErrorPayload, PongPayload};
use protocol::{
    CHANNEL_BUFFER_SIZE, CHAT_MAX_LEN, CharacterPersona, ClientEnvelope, ClientMessage,
    ErrorCode, KEEPALIVE_INTERVAL_SECS, MAX_FRAME_BYTES, MessageClass, PONG_TIMEOUT_SECS,
    ServerEnvelope, ServerMessage,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc, oneshot};
use uuid::Uuid;

/// An item for a connection's outbound queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame {
        message: ServerMessage,
        req_seq: Option<u64>,
        success: Option<bool>,
        error: Option<String>,
    },
    /// Close the socket with this code after draining nothing further.
    Close { code: u16, reason: String },
}

impl Outbound {
    /// A plain push message.
    pub fn message(message: ServerMessage) -> Self {
        Outbound::Frame { message, req_seq: None, success: None, error: None }
    }

    /// A successful response to the request with sequence `req_seq`.
    pub fn response(message: ServerMessage, req_seq: u64) -> Self {
        Outbound::Frame {
            message,
            req_seq: Some(req_seq),
            success: Some(true),
            error: None,
        }
    }

    /// An error reply, addressed to the requester only.
    pub fn error(code: ErrorCode, detail: Option<String>, req_seq: Option<u64>) -> Self {
        Outbound::Frame {
            message: ServerMessage::Error(ErrorPayload { code, message: detail }),
            req_seq,
            success: Some(false),
            error: Some(code.to_string()),
        }
    }
}

/// The session side's address of a connection: ids plus the bounded queue.
/// Sessions hold these instead of the socket, so nothing outside the
/// connection task ever owns transport state.
#[derive(Clone)]
pub struct ConnectionLink {
    pub conn_id: Uuid,
    pub user_id: UserId,
    tx: mpsc::Sender<Outbound>,
}

impl ConnectionLink {
    pub fn new(conn_id: Uuid, user_id: UserId, tx: mpsc::Sender<Outbound>) -> Self {
        Self { conn_id, user_id, tx }
    }

    /// Non-blocking enqueue. False means the queue is full or gone, which
    /// the session treats as a lagging connection.
    pub fn try_send(&self, outbound: Outbound) -> bool {
        self.tx.try_send(outbound).is_ok()
    }
}

struct ConnContext {
    state: Arc<AppState>,
    user: UserRecord,
    link: ConnectionLink,
    /// The session this connection belongs to, shared with the teardown in
    /// `serve` so an aborted receive loop still reports the disconnect.
    session: Arc<Mutex<Option<SessionHandle>>>,
    limits: ConnectionLimits,
    last_seen: Arc<AtomicU64>,
}

/// Runs a connection from handshake to teardown.
pub async fn serve(socket: WebSocket, state: Arc<AppState>) {
    state.metrics.connections.fetch_add(1, Ordering::Relaxed);
    let result = serve_inner(socket, &state).await;
    state.metrics.connections.fetch_sub(1, Ordering::Relaxed);
    if let Some(()) = result {
        state.metrics.authenticated.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Returns `Some(())` if the connection got past authentication.
async fn serve_inner(socket: WebSocket, state: &Arc<AppState>) -> Option<()> {
    let (mut sender, mut receiver) = socket.split();

    let authed = handshake::authenticate(&mut sender, &mut receiver, state).await?;
    state.metrics.authenticated.fetch_add(1, Ordering::Relaxed);
    let user_id = authed.user.id;
    let conn_id = Uuid::new_v4();
    tracing::info!(%user_id, %conn_id, "connection authenticated");

    let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let last_seen = Arc::new(AtomicU64::new(now_ms()));
    let session = Arc::new(Mutex::new(None));

    let context = ConnContext {
        state: state.clone(),
        user: authed.user,
        link: ConnectionLink::new(conn_id, user_id, outbound_tx),
        session: session.clone(),
        limits: ConnectionLimits::default(),
        last_seen: last_seen.clone(),
    };

    let mut send_task = tokio::spawn(send_loop(sender, outbound_rx, last_seen));
    let mut receive_task = tokio::spawn(receive_loop(context, receiver));

    // If any one of the tasks runs to completion, we abort the other.
    tokio::select! {
        _ = &mut send_task => receive_task.abort(),
        _ = &mut receive_task => send_task.abort(),
    }

    // Whatever ended the connection, the session has to hear about it.
    if let Some(handle) = session.lock().await.take() {
        let _ = handle
            .commands
            .send(SessionCommand::Disconnected { user_id, conn_id })
            .await;
    }
    tracing::info!(%user_id, %conn_id, "connection closed");
    Some(())
}

/// Drains the outbound queue onto the socket in FIFO order, assigning the
/// per-connection sequence numbers, and runs the keepalive: a ping every
/// 30 seconds of silence, a close after 10 more without any sign of life.
async fn send_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    last_seen: Arc<AtomicU64>,
) {
    let mut seq: u64 = 0;
    let mut keepalive = tokio::time::interval(std::time::Duration::from_secs(PONG_TIMEOUT_SECS));
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            item = rx.recv() => match item {
                None => break,
                Some(Outbound::Frame { message, req_seq, success, error }) => {
                    seq += 1;
                    let envelope = ServerEnvelope {
                        message,
                        seq,
                        ts: now_ms(),
                        req_seq,
                        success,
                        error,
                    };
                    match serde_json::to_string(&envelope) {
                        Ok(text) => {
                            if sink.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(error) => {
                            tracing::error!(?error, "outbound frame serialization failed");
                        }
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
                        .await;
                    break;
                }
            },
            _ = keepalive.tick() => {
                let idle_ms = now_ms().saturating_sub(last_seen.load(Ordering::Relaxed));
                if idle_ms > (KEEPALIVE_INTERVAL_SECS + PONG_TIMEOUT_SECS) * 1000 {
                    tracing::debug!("keepalive timeout, closing");
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: 1001,
                            reason: "keepalive timeout".into(),
                        })))
                        .await;
                    break;
                }
                if idle_ms >= KEEPALIVE_INTERVAL_SECS * 1000
                    && sink.send(Message::Ping(Default::default())).await.is_err()
                {
                    break;
                }
            }
        }
    }
}

async fn receive_loop(mut context: ConnContext, mut receiver: SplitStream<WebSocket>) {
    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(_) => break,
        };
        context.last_seen.store(now_ms(), Ordering::Relaxed);
        match frame {
            Message::Text(text) => handle_frame(&mut context, text.as_str()).await,
            Message::Binary(_) => {
                context.link.try_send(Outbound::error(
                    ErrorCode::InvalidAction,
                    Some("binary frames are not part of the protocol".into()),
                    None,
                ));
            }
            // Axum answers pings itself; both directions refresh last_seen.
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => break,
        }
    }
}

/// Dispatches one inbound frame. Unknown or malformed frames answer with
/// `INVALID_ACTION` and keep the connection open.
async fn handle_frame(context: &mut ConnContext, text: &str) {
    if text.len() > MAX_FRAME_BYTES {
        context.link.try_send(Outbound::error(
            ErrorCode::InvalidAction,
            Some("oversize frame".into()),
            None,
        ));
        return;
    }
    let envelope: ClientEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::debug!(?error, "malformed inbound frame");
            context.link.try_send(Outbound::error(
                ErrorCode::InvalidAction,
                Some("malformed frame".into()),
                None,
            ));
            return;
        }
    };
    let seq = envelope.seq;

    match envelope.message {
        ClientMessage::Auth(_) => {
            context.link.try_send(Outbound::error(
                ErrorCode::InvalidAction,
                Some("already authenticated".into()),
                Some(seq),
            ));
        }
        ClientMessage::Ping(_) => {
            context
                .link
                .try_send(Outbound::response(ServerMessage::Pong(PongPayload {}), seq));
        }
        ClientMessage::CreateGame(payload) => create_game(context, payload, seq).await,
        ClientMessage::JoinGame(payload) => join_game(context, payload, seq).await,
        ClientMessage::LeaveGame(_) => {
            let handle = context.session.lock().await.take();
            match handle {
                Some(handle) => {
                    let _ = handle
                        .commands
                        .send(SessionCommand::Leave { user_id: context.user.id, seq })
                        .await;
                }
                None => reply_no_session(context, seq),
            }
        }
        ClientMessage::Ready(payload) => {
            forward(
                context,
                seq,
                SessionCommand::Ready { user_id: context.user.id, ready: payload.ready, seq },
            )
            .await;
        }
        ClientMessage::Action(action) => {
            if !admit(context, MessageClass::Action, seq) {
                return;
            }
            forward(
                context,
                seq,
                SessionCommand::Action { user_id: context.user.id, action, seq },
            )
            .await;
        }
        ClientMessage::DmCommand(command) => {
            if !admit(context, MessageClass::DmCommand, seq) {
                return;
            }
            forward(
                context,
                seq,
                SessionCommand::Dm { user_id: context.user.id, command, seq },
            )
            .await;
        }
        ClientMessage::Chat(payload) => {
            if !admit(context, MessageClass::Chat, seq) {
                return;
            }
            if payload.message.chars().count() > CHAT_MAX_LEN {
                context.link.try_send(Outbound::error(
                    ErrorCode::InvalidAction,
                    Some("chat message too long".into()),
                    Some(seq),
                ));
                return;
            }
            forward(
                context,
                seq,
                SessionCommand::Chat {
                    user_id: context.user.id,
                    message: payload.message,
                    target: payload.target,
                    seq,
                },
            )
            .await;
        }
        ClientMessage::CharacterSync(payload) => {
            character_sync(context, payload.character, seq).await;
        }
    }
}

/// Books the message against its rate limit class. Violations answer with
/// `RATE_LIMITED` and drop the message; a streak closes the connection.
fn admit(context: &mut ConnContext, class: MessageClass, seq: u64) -> bool {
    match context.limits.check(class) {
        LimitOutcome::Allowed => true,
        LimitOutcome::Limited => {
            context.link.try_send(Outbound::error(ErrorCode::RateLimited, None, Some(seq)));
            false
        }
        LimitOutcome::FatalViolation => {
            tracing::warn!(user = %context.user.id, "rate limit violation streak, closing");
            context.link.try_send(Outbound::error(ErrorCode::RateLimited, None, Some(seq)));
            context.link.try_send(Outbound::Close {
                code: 1008,
                reason: "rate limit exceeded".into(),
            });
            false
        }
    }
}

fn reply_no_session(context: &ConnContext, seq: u64) {
    context.link.try_send(Outbound::error(
        ErrorCode::GameNotFound,
        Some("join a game first".into()),
        Some(seq),
    ));
}

/// Sends a command to the session this connection belongs to.
async fn forward(context: &ConnContext, seq: u64, command: SessionCommand) {
    let handle = context.session.lock().await.clone();
    let Some(handle) = handle else {
        reply_no_session(context, seq);
        return;
    };
    if handle.commands.send(command).await.is_err() {
        // The actor is gone; the session ended under us.
        context.session.lock().await.take();
        reply_no_session(context, seq);
    }
}

/// Loads a character and checks ownership.
async fn owned_character(
    context: &ConnContext,
    id: protocol::ids::CharacterId,
    seq: u64,
) -> Option<CharacterRecord> {
    match context.state.store.character(id).await {
        Ok(record) if record.user_id == context.user.id => Some(record),
        Ok(_) | Err(StoreError::NotFound(_)) => {
            context.link.try_send(Outbound::error(
                ErrorCode::CharacterNotFound,
                None,
                Some(seq),
            ));
            None
        }
        Err(error) => {
            tracing::error!(?error, "character lookup failed");
            context
                .link
                .try_send(Outbound::error(ErrorCode::InternalError, None, Some(seq)));
            None
        }
    }
}

async fn create_game(context: &mut ConnContext, payload: CreateGamePayload, seq: u64) {
    if context.session.lock().await.is_some() {
        context.link.try_send(Outbound::error(
            ErrorCode::InvalidAction,
            Some("already in a session".into()),
            Some(seq),
        ));
        return;
    }
    if let Err(reason) = payload.config.validate() {
        context
            .link
            .try_send(Outbound::error(ErrorCode::InvalidAction, Some(reason), Some(seq)));
        return;
    }
    let Some(character) = owned_character(context, payload.character_id, seq).await else {
        return;
    };

    let state = &context.state;
    let record = match with_retry(|| {
        state.store.insert_session(context.user.id, payload.config.clone())
    })
    .await
    {
        Ok(record) => record,
        Err(error) => {
            tracing::error!(?error, "session insert failed");
            context
                .link
                .try_send(Outbound::error(ErrorCode::InternalError, None, Some(seq)));
            return;
        }
    };
    let handle = crate::session::SessionActor::spawn(
        &record,
        state.store.clone(),
        state.registry.clone(),
    );
    state.registry.insert(handle.clone()).await;
    tracing::info!(session = %record.id, code = record.join_code, dm = %context.user.id, "session created");

    seat_in(context, handle, character, JoinKind::Create, seq).await;
}

async fn join_game(context: &mut ConnContext, payload: JoinGamePayload, seq: u64) {
    if context.session.lock().await.is_some() {
        context.link.try_send(Outbound::error(
            ErrorCode::InvalidAction,
            Some("already in a session".into()),
            Some(seq),
        ));
        return;
    }
    let code = payload.join_code.trim().to_ascii_uppercase();
    let Some(handle) = context.state.registry.get_by_code(&code).await else {
        context
            .link
            .try_send(Outbound::error(ErrorCode::GameNotFound, None, Some(seq)));
        return;
    };
    let Some(character) = owned_character(context, payload.character_id, seq).await else {
        return;
    };
    seat_in(context, handle, character, JoinKind::Join, seq).await;
}

/// Hands the connection to a session actor and records the membership once
/// the actor confirms the seat.
async fn seat_in(
    context: &ConnContext,
    handle: SessionHandle,
    character: CharacterRecord,
    kind: JoinKind,
    seq: u64,
) {
    let (seated_tx, seated_rx) = oneshot::channel();
    let command = SessionCommand::Join {
        user_id: context.user.id,
        display_name: context.user.display_name.clone(),
        character,
        link: context.link.clone(),
        seq,
        kind,
        seated: seated_tx,
    };
    if handle.commands.send(command).await.is_err() {
        context
            .link
            .try_send(Outbound::error(ErrorCode::GameNotFound, None, Some(seq)));
        return;
    }
    if seated_rx.await == Ok(true) {
        *context.session.lock().await = Some(handle);
    }
}

/// `character_sync`: validates the persona and stores it, creating the
/// character on first sight. Progression fields are never taken from the
/// client.
async fn character_sync(context: &ConnContext, persona: CharacterPersona, seq: u64) {
    if let Err(reason) = persona.validate() {
        context
            .link
            .try_send(Outbound::error(ErrorCode::InvalidAction, Some(reason), Some(seq)));
        return;
    }
    let store = &context.state.store;
    let result = match store.character(persona.id).await {
        Ok(existing) if existing.user_id != context.user.id => {
            context.link.try_send(Outbound::error(
                ErrorCode::CharacterNotFound,
                None,
                Some(seq),
            ));
            return;
        }
        Ok(_) => with_retry(|| store.update_persona(context.user.id, &persona))
            .await
            .map(|_| ()),
        Err(StoreError::NotFound(_)) => {
            let record = CharacterRecord::from_persona(context.user.id, &persona, now_ms());
            with_retry(|| store.insert_character(record.clone())).await
        }
        Err(error) => Err(error),
    };
    match result {
        Ok(()) => {
            context
                .link
                .try_send(Outbound::response(ServerMessage::Pong(PongPayload {}), seq));
        }
        Err(error) => {
            tracing::error!(?error, "character sync failed");
            context
                .link
                .try_send(Outbound::error(ErrorCode::InternalError, None, Some(seq)));
        }
    }
}
