//! The in-process directory of live sessions. Holds command channels to the
//! per-session actors, keyed by id and join code. Connections talk to
//! sessions exclusively through these handles; nothing here owns a socket.

use crate::session::SessionCommand;
use protocol::ids::SessionId;
use std::collections::HashMap;
use tokio::sync::{Mutex, mpsc};

/// The address of one live session actor.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub join_code: String,
    pub commands: mpsc::Sender<SessionCommand>,
}

#[derive(Default)]
struct Inner {
    by_id: HashMap<SessionId, SessionHandle>,
    by_code: HashMap<String, SessionId>,
}

/// The only process-wide mutable table of the server.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub async fn insert(&self, handle: SessionHandle) {
        let mut inner = self.inner.lock().await;
        inner.by_code.insert(handle.join_code.clone(), handle.id);
        inner.by_id.insert(handle.id, handle);
    }

    pub async fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.inner.lock().await.by_id.get(&id).cloned()
    }

    pub async fn get_by_code(&self, code: &str) -> Option<SessionHandle> {
        let inner = self.inner.lock().await;
        let id = inner.by_code.get(code)?;
        inner.by_id.get(id).cloned()
    }

    /// Drops a session from the directory. The actor calls this on its way
    /// out; lookups afterwards report `GAME_NOT_FOUND`.
    pub async fn remove(&self, id: SessionId) {
        let mut inner = self.inner.lock().await;
        if let Some(handle) = inner.by_id.remove(&id) {
            inner.by_code.remove(&handle.join_code);
        }
    }

    /// All live handles, for the periodic idle sweep.
    pub async fn handles(&self) -> Vec<SessionHandle> {
        self.inner.lock().await.by_id.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.by_id.len()
    }
}
