//! Session document persistence.
//!
//! A session is one JSON document. Writes merge a delta shallowly at the top
//! level and are guarded by a version stamp.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::types::SessionState;

/// Top-level fields to overwrite in a session document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionDelta(Map<String, Value>);

impl SessionDelta {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Delta carrying every field of `state` except the version stamp.
    pub fn full(state: &SessionState) -> Result<Self, StoreError> {
        match serde_json::to_value(state)? {
            Value::Object(mut fields) => {
                fields.remove("version");
                Ok(Self(fields))
            }
            other => Err(StoreError::Storage(format!(
                "session state serialized to non-object: {}",
                other
            ))),
        }
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// Key-value store of session documents.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Current document, or `None` if the session has never been written.
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>, StoreError>;

    /// Merge `delta` into the document and return the new version.
    ///
    /// With `expected_version`, the write fails with `VersionConflict` unless
    /// the stored version matches. A missing document has version 0.
    async fn put(
        &self,
        session_id: &str,
        delta: SessionDelta,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError>;
}

struct StoredDocument {
    body: Map<String, Value>,
    version: u64,
}

/// In-memory session store with compare-and-swap writes.
pub struct InMemorySessionStore {
    documents: Mutex<HashMap<String, StoredDocument>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
        }
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredDocument>>, StoreError> {
        self.documents
            .lock()
            .map_err(|e| StoreError::Storage(format!("Lock poisoned: {}", e)))
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        let documents = self.lock()?;
        let Some(doc) = documents.get(session_id) else {
            return Ok(None);
        };
        let mut state: SessionState = serde_json::from_value(Value::Object(doc.body.clone()))?;
        state.version = doc.version;
        Ok(Some(state))
    }

    async fn put(
        &self,
        session_id: &str,
        delta: SessionDelta,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        let mut documents = self.lock()?;
        let current = documents.get(session_id).map(|d| d.version).unwrap_or(0);
        if let Some(expected) = expected_version {
            if expected != current {
                return Err(StoreError::VersionConflict {
                    session_id: session_id.to_string(),
                    expected,
                    found: current,
                });
            }
        }

        let doc = documents
            .entry(session_id.to_string())
            .or_insert_with(|| StoredDocument {
                body: Map::new(),
                version: 0,
            });
        for (field, value) in delta.0 {
            doc.body.insert(field, value);
        }
        doc.version = current + 1;
        Ok(doc.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_session_is_none() {
        let store = InMemorySessionStore::new();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_merges_shallowly() {
        let store = InMemorySessionStore::new();
        let mut state = SessionState::default();
        state.active_task = Some("apply_job".to_string());
        state.previous_intents = vec!["apply_job".to_string()];
        store
            .put("s1", SessionDelta::full(&state).unwrap(), None)
            .await
            .unwrap();

        let delta = SessionDelta::new()
            .set("queue_paused", true)
            .set("queue_paused_reason", "maintenance");
        let version = store.put("s1", delta, None).await.unwrap();
        assert_eq!(version, 2);

        let loaded = store.get("s1").await.unwrap().unwrap();
        assert!(loaded.queue_paused);
        assert_eq!(loaded.queue_paused_reason.as_deref(), Some("maintenance"));
        assert_eq!(loaded.active_task.as_deref(), Some("apply_job"));
        assert_eq!(loaded.previous_intents, vec!["apply_job"]);
        assert_eq!(loaded.version, 2);
    }

    #[tokio::test]
    async fn test_nested_fields_are_replaced_not_merged() {
        let store = InMemorySessionStore::new();
        store
            .put(
                "s1",
                SessionDelta::new().set("conversation_context", json!({"a": 1, "b": 2})),
                None,
            )
            .await
            .unwrap();
        store
            .put(
                "s1",
                SessionDelta::new().set("conversation_context", json!({"c": 3})),
                None,
            )
            .await
            .unwrap();
        let loaded = store.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.conversation_context, json!({"c": 3}));
    }

    #[tokio::test]
    async fn test_compare_and_swap_rejects_stale_writer() {
        let store = InMemorySessionStore::new();
        assert_eq!(store.put("s1", SessionDelta::new(), Some(0)).await.unwrap(), 1);

        let err = store
            .put("s1", SessionDelta::new().set("queue_paused", true), Some(0))
            .await
            .unwrap_err();
        match err {
            StoreError::VersionConflict {
                expected, found, ..
            } => {
                assert_eq!(expected, 0);
                assert_eq!(found, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!store.get("s1").await.unwrap().unwrap().queue_paused);
    }

    #[test]
    fn test_full_delta_omits_version() {
        let state = SessionState {
            version: 9,
            ..SessionState::default()
        };
        let delta = SessionDelta::full(&state).unwrap();
        assert!(delta.fields().all(|(k, _)| k != "version"));
        assert!(!delta.is_empty());
    }
}
