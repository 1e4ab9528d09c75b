//! Session & Message Store (C8): libSQL-backed persistence for sessions,
//! ordered messages, and memory entries. Writers to the same session are
//! serialized by a per-session lock; reads are unlocked.

pub mod schema;
pub mod session;

pub use session::Store;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    SessionNotFound(Uuid),
    #[error("message {0} not found")]
    MessageNotFound(Uuid),
    #[error("database error: {0}")]
    Database(#[from] libsql::Error),
    #[error("stored value failed to deserialize: {0}")]
    Decode(String),
}

/// Per-session write-lock table, so concurrent writers to one session
/// serialize while different sessions proceed independently.
#[derive(Default)]
pub(crate) struct SessionLocks {
    locks: StdMutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    pub(crate) fn get(&self, session_id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().expect("session lock table poisoned");
        locks.entry(session_id).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }
}
