//! Process-wide map from session id to live session state.
//!
//! Connection handlers insert and remove their own key; the report and
//! health routes read concurrently. Each session's worker remains the sole
//! writer of the record behind the per-session lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::session::InterviewSession;

pub type SharedSession = Arc<Mutex<InterviewSession>>;

/// What the registry tracks per session: the record itself and the token
/// that stops its worker.
#[derive(Clone)]
pub struct SessionHandle {
    pub session: SharedSession,
    pub cancel: CancellationToken,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and registers a fresh session record.
    pub async fn create(&self, id: Uuid) -> SessionHandle {
        let handle = SessionHandle {
            session: Arc::new(Mutex::new(InterviewSession::new(id))),
            cancel: CancellationToken::new(),
        };
        self.inner.write().await.insert(id, handle.clone());
        handle
    }

    pub async fn get(&self, id: Uuid) -> Option<SharedSession> {
        self.inner.read().await.get(&id).map(|h| h.session.clone())
    }

    /// Removes the entry and cancels its worker. Removing an unknown id is
    /// a no-op; teardown paths may race with the linger sweep.
    pub async fn remove(&self, id: Uuid) {
        if let Some(handle) = self.inner.write().await.remove(&id) {
            handle.cancel.cancel();
        }
    }

    pub async fn active_count(&self) -> usize {
        self.inner.read().await.len()
    }
}
