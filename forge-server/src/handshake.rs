//! The connection handshake. A fresh socket has five seconds to present a
//! valid `auth` frame; anything else is refused with close code 4001, a bad
//! credential with 4002.
//!
//! The functions are generic over the split sink and stream halves, which
//! is all they need from the socket; tests drive them with in-memory
//! halves instead of a live upgrade.

use crate::store::{CharacterRecord, UserRecord};
use crate::{AppState, now_ms};
use axum::extract::ws::{CloseFrame, Message};
use futures_util::sink::{Sink, SinkExt};
use futures_util::stream::{Stream, StreamExt};
use protocol::server::AuthResultPayload;
use protocol::{
    AUTH_DEADLINE_SECS, CLOSE_AUTH_REJECTED, CLOSE_AUTH_REQUIRED, ClientEnvelope,
    ClientMessage, ErrorCode, ServerEnvelope, ServerMessage,
};
use std::time::Duration;

/// The outcome of a successful handshake.
pub struct AuthedConnection {
    pub user: UserRecord,
    pub characters: Vec<CharacterRecord>,
}

enum FirstFrame {
    Text(String),
    /// A data frame that cannot be an `auth` message.
    Violation,
    Closed,
}

async fn first_frame<R, E>(receiver: &mut R) -> FirstFrame
where
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    loop {
        match receiver.next().await {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return FirstFrame::Closed,
            Some(Ok(Message::Text(text))) => return FirstFrame::Text(text.to_string()),
            Some(Ok(Message::Binary(_))) => return FirstFrame::Violation,
            // Control frames do not count against the handshake.
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
        }
    }
}

/// Sends an error envelope followed by a close frame with the given code.
async fn refuse<S>(
    sender: &mut S,
    code: ErrorCode,
    detail: &str,
    close_code: u16,
    req_seq: Option<u64>,
) where
    S: Sink<Message> + Unpin,
{
    let envelope = ServerEnvelope {
        message: ServerMessage::Error(protocol::server::ErrorPayload {
            code,
            message: Some(detail.to_string()),
        }),
        seq: 0,
        ts: now_ms(),
        req_seq,
        success: Some(false),
        error: Some(code.to_string()),
    };
    if let Ok(text) = serde_json::to_string(&envelope) {
        let _ = sender.send(Message::Text(text.into())).await;
    }
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code: close_code,
            reason: detail.to_string().into(),
        })))
        .await;
}

/// Runs the handshake. On success the `auth_result` frame has already been
/// sent; on failure the connection is closed and `None` returned.
pub async fn authenticate<S, R, E>(
    sender: &mut S,
    receiver: &mut R,
    state: &AppState,
) -> Option<AuthedConnection>
where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    let deadline = Duration::from_secs(AUTH_DEADLINE_SECS);
    let first = match tokio::time::timeout(deadline, first_frame(receiver)).await {
        Err(_) => {
            tracing::debug!("auth deadline expired");
            refuse(
                sender,
                ErrorCode::AuthRequired,
                "no auth message within the deadline",
                CLOSE_AUTH_REQUIRED,
                None,
            )
            .await;
            return None;
        }
        Ok(FirstFrame::Closed) => return None,
        Ok(FirstFrame::Violation) => {
            refuse(
                sender,
                ErrorCode::AuthRequired,
                "first frame must be auth",
                CLOSE_AUTH_REQUIRED,
                None,
            )
            .await;
            return None;
        }
        Ok(FirstFrame::Text(text)) => text,
    };

    let envelope: ClientEnvelope = match serde_json::from_str(&first) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::debug!(?error, "unparseable first frame");
            refuse(
                sender,
                ErrorCode::AuthRequired,
                "first frame must be auth",
                CLOSE_AUTH_REQUIRED,
                None,
            )
            .await;
            return None;
        }
    };
    let ClientMessage::Auth(payload) = envelope.message else {
        refuse(
            sender,
            ErrorCode::AuthRequired,
            "first frame must be auth",
            CLOSE_AUTH_REQUIRED,
            Some(envelope.seq),
        )
        .await;
        return None;
    };

    let user_id = match state.auth.validate(&payload.token) {
        Ok(user_id) => user_id,
        Err(error) => {
            tracing::debug!(%error, "credential rejected");
            refuse(
                sender,
                error.code(),
                &error.to_string(),
                CLOSE_AUTH_REJECTED,
                Some(envelope.seq),
            )
            .await;
            return None;
        }
    };
    let user = match state.store.user(user_id).await {
        Ok(user) => user,
        Err(error) => {
            tracing::warn!(?error, %user_id, "credential for unknown user");
            refuse(
                sender,
                ErrorCode::AuthInvalid,
                "unknown user",
                CLOSE_AUTH_REJECTED,
                Some(envelope.seq),
            )
            .await;
            return None;
        }
    };
    let characters = match state.store.characters_by_owner(user_id).await {
        Ok(characters) => characters,
        Err(error) => {
            tracing::error!(?error, %user_id, "character list unavailable");
            Vec::new()
        }
    };

    let result = ServerEnvelope {
        message: ServerMessage::AuthResult(AuthResultPayload {
            user_id: user.id,
            display_name: user.display_name.clone(),
            characters: characters.iter().map(CharacterRecord::summary).collect(),
        }),
        seq: 0,
        ts: now_ms(),
        req_seq: Some(envelope.seq),
        success: Some(true),
        error: None,
    };
    let text = serde_json::to_string(&result).ok()?;
    if sender.send(Message::Text(text.into())).await.is_err() {
        return None;
    }
    Some(AuthedConnection { user, characters })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthService, SessionKey};
    use crate::config::ServerConfig;
    use crate::registry::SessionRegistry;
    use crate::store::{SledStore, Store};
    use crate::Metrics;
    use futures_util::stream;
    use std::convert::Infallible;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tempfile::TempDir;

    const SECRET: &str = "handshake-test-secret";

    /// The sender half of a mock split pair: records every frame written.
    #[derive(Default)]
    struct VecSink {
        frames: Vec<Message>,
    }

    impl Sink<Message> for VecSink {
        type Error = Infallible;

        fn poll_ready(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
            self.get_mut().frames.push(item);
            Ok(())
        }

        fn poll_flush(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    fn test_state(dir: &TempDir) -> Arc<AppState> {
        let config = ServerConfig {
            port: 0,
            database_path: dir.path().join("db"),
            pocket_id_url: "http://idp.local".into(),
            pocket_id_client_id: "client".into(),
            pocket_id_client_secret: "secret".into(),
            session_secret: SECRET.into(),
        };
        let store = Arc::new(SledStore::open(&dir.path().join("db")).unwrap());
        let auth = AuthService::new(&config);
        Arc::new(AppState {
            config,
            store,
            auth,
            registry: Arc::new(SessionRegistry::default()),
            metrics: Metrics::default(),
        })
    }

    fn text_frame(json: &str) -> Result<Message, Infallible> {
        Ok(Message::Text(json.to_string().into()))
    }

    /// Asserts the refusal shape: an error envelope first, then a close
    /// frame with the expected code.
    fn assert_refused(frames: &[Message], error_code: &str, close_code: u16) {
        match frames.first() {
            Some(Message::Text(text)) => {
                assert!(
                    text.as_str().contains(error_code),
                    "error envelope should name {error_code}: {}",
                    text.as_str()
                );
            }
            other => panic!("expected an error envelope first, got {other:?}"),
        }
        match frames.last() {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, close_code),
            other => panic!("expected a close frame, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silence_past_the_deadline_closes_with_4001() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let mut sink = VecSink::default();
        let mut incoming = stream::pending::<Result<Message, Infallible>>();

        // Paused time: the five second deadline elapses instantly once the
        // stream proves silent.
        let result = authenticate(&mut sink, &mut incoming, &state).await;
        assert!(result.is_none());
        assert_refused(&sink.frames, "AUTH_REQUIRED", CLOSE_AUTH_REQUIRED);
    }

    #[tokio::test]
    async fn non_auth_first_frame_closes_with_4001() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        // A well-formed frame of the wrong type.
        let mut sink = VecSink::default();
        let mut incoming =
            stream::iter(vec![text_frame(r#"{"type":"ping","payload":{},"seq":4,"ts":0}"#)]);
        assert!(authenticate(&mut sink, &mut incoming, &state).await.is_none());
        assert_refused(&sink.frames, "AUTH_REQUIRED", CLOSE_AUTH_REQUIRED);

        // A binary frame cannot be an auth message at all.
        let mut sink = VecSink::default();
        let mut incoming = stream::iter(vec![Ok::<_, Infallible>(Message::Binary(
            vec![1u8, 2, 3].into(),
        ))]);
        assert!(authenticate(&mut sink, &mut incoming, &state).await.is_none());
        assert_refused(&sink.frames, "AUTH_REQUIRED", CLOSE_AUTH_REQUIRED);

        // Garbage that does not parse as an envelope.
        let mut sink = VecSink::default();
        let mut incoming = stream::iter(vec![text_frame("not json")]);
        assert!(authenticate(&mut sink, &mut incoming, &state).await.is_none());
        assert_refused(&sink.frames, "AUTH_REQUIRED", CLOSE_AUTH_REQUIRED);
    }

    #[tokio::test]
    async fn bad_credentials_close_with_4002() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        // A token that never validated.
        let mut sink = VecSink::default();
        let mut incoming = stream::iter(vec![text_frame(
            r#"{"type":"auth","payload":{"token":"garbage"},"seq":1,"ts":0}"#,
        )]);
        assert!(authenticate(&mut sink, &mut incoming, &state).await.is_none());
        assert_refused(&sink.frames, "AUTH_INVALID", CLOSE_AUTH_REJECTED);

        // A correctly signed token whose lifetime is long over.
        let user = state.store.upsert_user("sub-old", "Rip", None).await.unwrap();
        let stale = SessionKey::new(SECRET).issue(user.id, 0);
        let mut sink = VecSink::default();
        let json = format!(
            r#"{{"type":"auth","payload":{{"token":"{stale}"}},"seq":2,"ts":0}}"#
        );
        let mut incoming = stream::iter(vec![text_frame(&json)]);
        assert!(authenticate(&mut sink, &mut incoming, &state).await.is_none());
        assert_refused(&sink.frames, "AUTH_EXPIRED", CLOSE_AUTH_REJECTED);

        // A tampered token: someone else's signature.
        let other = SessionKey::new("some-other-secret").issue(user.id, now_ms());
        let mut sink = VecSink::default();
        let json = format!(
            r#"{{"type":"auth","payload":{{"token":"{other}"}},"seq":3,"ts":0}}"#
        );
        let mut incoming = stream::iter(vec![text_frame(&json)]);
        assert!(authenticate(&mut sink, &mut incoming, &state).await.is_none());
        assert_refused(&sink.frames, "AUTH_INVALID", CLOSE_AUTH_REJECTED);
    }

    #[tokio::test]
    async fn valid_credential_yields_auth_result() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let user = state
            .store
            .upsert_user("sub-fresh", "Alice", None)
            .await
            .unwrap();
        let token = state.auth.issue(user.id);

        let mut sink = VecSink::default();
        let json = format!(
            r#"{{"type":"auth","payload":{{"token":"{token}"}},"seq":7,"ts":0}}"#
        );
        let mut incoming = stream::iter(vec![text_frame(&json)]);
        let authed = authenticate(&mut sink, &mut incoming, &state)
            .await
            .expect("handshake should succeed");
        assert_eq!(authed.user.id, user.id);

        let sent = &sink.frames;
        assert_eq!(sent.len(), 1, "exactly the auth_result frame");
        let Message::Text(text) = &sent[0] else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["type"], "auth_result");
        assert_eq!(value["reqSeq"], 7);
        assert_eq!(value["success"], true);
        assert_eq!(value["payload"]["displayName"], "Alice");
    }
}
