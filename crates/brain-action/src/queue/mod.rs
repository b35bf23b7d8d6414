//! Per-session action queue.
//!
//! Every read-modify-write of a session goes through a [`SessionLease`]: an
//! in-process per-session mutex plus a version-checked write to the backing
//! [`SessionStore`]. Concurrent turns for one session are serialized, and a
//! writer in another process loses with `VersionConflict` instead of silently
//! overwriting.

pub mod store;

pub use store::{InMemorySessionStore, SessionDelta, SessionStore};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::types::{QueuedAction, SessionState};

/// Exclusive, versioned access to one session's state.
pub struct SessionLease {
    session_id: String,
    state: SessionState,
    store: Arc<dyn SessionStore>,
    _guard: OwnedMutexGuard<()>,
}

impl SessionLease {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    /// Persist the whole document, conditional on the version it was read at.
    pub async fn commit(&mut self) -> Result<u64, StoreError> {
        let delta = SessionDelta::full(&self.state)?;
        let version = self
            .store
            .put(&self.session_id, delta, Some(self.state.version))
            .await?;
        self.state.version = version;
        debug!(session_id = %self.session_id, version, "Session committed");
        Ok(version)
    }
}

/// Owns read/merge/write of session state.
pub struct QueueStateStore {
    store: Arc<dyn SessionStore>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    max_commit_retries: u32,
}

impl QueueStateStore {
    pub fn new(store: Arc<dyn SessionStore>, max_commit_retries: u32) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            max_commit_retries,
        }
    }

    fn session_lock(&self, session_id: &str) -> Result<Arc<AsyncMutex<()>>, StoreError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| StoreError::Storage(format!("Lock poisoned: {}", e)))?;
        // Drop locks nobody is holding or waiting on.
        locks.retain(|id, lock| id == session_id || Arc::strong_count(lock) > 1);
        Ok(locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }

    /// Wait for exclusive access to a session and load its state.
    ///
    /// A session that has never been written starts from defaults at version 0.
    pub async fn lease(&self, session_id: &str) -> Result<SessionLease, StoreError> {
        let guard = self.session_lock(session_id)?.lock_owned().await;
        let state = self.store.get(session_id).await?.unwrap_or_default();
        Ok(SessionLease {
            session_id: session_id.to_string(),
            state,
            store: Arc::clone(&self.store),
            _guard: guard,
        })
    }

    /// Current state without taking the lease.
    pub async fn snapshot(&self, session_id: &str) -> Result<SessionState, StoreError> {
        Ok(self.store.get(session_id).await?.unwrap_or_default())
    }

    /// Fetch, apply `f`, persist. Retried on version conflicts.
    pub async fn mutate<T, F>(&self, session_id: &str, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut(&mut SessionState) -> T + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            let mut lease = self.lease(session_id).await?;
            let result = f(lease.state_mut());
            match lease.commit().await {
                Ok(_) => return Ok(result),
                Err(StoreError::VersionConflict { .. }) if attempt < self.max_commit_retries => {
                    attempt += 1;
                    warn!(session_id, attempt, "Session version conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Append an entry and return its queue index.
    pub async fn add_action(
        &self,
        session_id: &str,
        action: QueuedAction,
    ) -> Result<usize, StoreError> {
        let name = action.canonical_action.clone();
        let index = self
            .mutate(session_id, |state| {
                state.action_queue.push(action.clone());
                state.action_queue.len() - 1
            })
            .await?;
        info!(session_id, action = %name, index, "Action added to queue");
        Ok(index)
    }

    /// Apply `update` to the entry at `index`. Returns `false` if out of range.
    pub async fn update_action_at<F>(
        &self,
        session_id: &str,
        index: usize,
        mut update: F,
    ) -> Result<bool, StoreError>
    where
        F: FnMut(&mut QueuedAction) + Send,
    {
        self.mutate(session_id, |state| match state.action_queue.get_mut(index) {
            Some(action) => {
                update(action);
                true
            }
            None => false,
        })
        .await
    }

    pub async fn increment_current_index(&self, session_id: &str) -> Result<usize, StoreError> {
        self.mutate(session_id, |state| {
            state.current_action_index += 1;
            state.current_action_index
        })
        .await
    }

    pub async fn pause_queue(&self, session_id: &str, reason: &str) -> Result<(), StoreError> {
        self.mutate(session_id, |state| {
            state.queue_paused = true;
            state.queue_paused_reason = Some(reason.to_string());
        })
        .await?;
        info!(session_id, reason, "Queue paused");
        Ok(())
    }

    pub async fn resume_queue(&self, session_id: &str) -> Result<(), StoreError> {
        self.mutate(session_id, |state| {
            state.queue_paused = false;
            state.queue_paused_reason = None;
        })
        .await?;
        info!(session_id, "Queue resumed");
        Ok(())
    }

    pub async fn get_current_action(
        &self,
        session_id: &str,
    ) -> Result<Option<QueuedAction>, StoreError> {
        Ok(self.snapshot(session_id).await?.current_action().cloned())
    }

    pub async fn has_more_actions(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self.snapshot(session_id).await?.has_more_actions())
    }
}
