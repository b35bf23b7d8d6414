//! Shared fakes for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use brain_core::config::SchemaConfig;
use brain_core::types::Timestamp;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::catalog::{CatalogDocument, InMemoryCatalog};
use crate::error::SchemaFetchError;
use crate::schema::{SchemaCompletenessChecker, SchemaDataClient, SchemaResponse};
use crate::types::{Entities, Intent, IntentStatus, NewIntent, UserProfile};

/// Catalog with two schemas and brand `b1`.
///
/// `user_profile` requires `email` and caches for 60s.
pub fn schema_catalog() -> InMemoryCatalog {
    let document: CatalogDocument = serde_json::from_value(json!({
        "schemas": [
            {"schema_key": "user_profile", "required_fields": ["email"],
             "api_endpoint": "/users/{user_id}/profile", "ttl_secs": 60},
            {"schema_key": "work_history", "required_fields": ["employer"],
             "api_endpoint": "/users/{user_id}/work"}
        ],
        "brands": [{"brand_id": "b1", "api_base_url": "https://api.example.com/"}]
    }))
    .unwrap();
    InMemoryCatalog::new(document)
}

enum Reply {
    Body(Value),
    Status(u16),
    Timeout,
}

/// Schema client returning a fixed reply and counting calls.
pub struct StubSchemaClient {
    reply: Reply,
    calls: AtomicUsize,
    last_url: Mutex<Option<String>>,
}

impl StubSchemaClient {
    fn with_reply(reply: Reply) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
            last_url: Mutex::new(None),
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::with_reply(Reply::Body(body))
    }

    pub fn status(status: u16) -> Self {
        Self::with_reply(Reply::Status(status))
    }

    pub fn timeout() -> Self {
        Self::with_reply(Reply::Timeout)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_url(&self) -> Option<String> {
        self.last_url.lock().unwrap().clone()
    }
}

#[async_trait]
impl SchemaDataClient for StubSchemaClient {
    async fn get(&self, url: &str, timeout: Duration) -> Result<SchemaResponse, SchemaFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_url.lock().unwrap() = Some(url.to_string());
        match &self.reply {
            Reply::Body(body) => Ok(SchemaResponse {
                status: 200,
                body: Some(body.clone()),
            }),
            Reply::Status(status) => Ok(SchemaResponse {
                status: *status,
                body: None,
            }),
            Reply::Timeout => Err(SchemaFetchError::Timeout(timeout.as_millis() as u64)),
        }
    }
}

pub fn schema_checker(client: StubSchemaClient) -> SchemaCompletenessChecker {
    SchemaCompletenessChecker::new(
        Arc::new(schema_catalog()),
        Arc::new(client),
        &SchemaConfig::default(),
    )
}

/// Authenticated premium user with a high trust score.
pub fn member_user(user_id: &str) -> UserProfile {
    UserProfile {
        user_id: user_id.to_string(),
        is_authenticated: true,
        trust_score: 0.9,
        tier: "premium".to_string(),
        acquisition_channel: None,
    }
}

/// Ledger row in `status`, created (and completed, if so) at `at`.
pub fn seeded_intent(
    session_id: &str,
    user_id: &str,
    action: &str,
    status: IntentStatus,
    at: Timestamp,
) -> Intent {
    Intent {
        id: Uuid::new_v4(),
        session_id: session_id.to_string(),
        user_id: user_id.to_string(),
        intent_type: "action".to_string(),
        canonical_action: Some(action.to_string()),
        canonical_intent_candidates: vec![action.to_string()],
        match_type: None,
        confidence: 1.0,
        turn_number: 1,
        sequence_order: 0,
        entities: Entities::new(),
        reasoning: None,
        status,
        blocked_reason: None,
        created_at: at,
        updated_at: at,
        completed_at: (status == IntentStatus::Completed).then_some(at),
    }
}

pub fn new_intent(session_id: &str, action: &str) -> NewIntent {
    NewIntent {
        session_id: session_id.to_string(),
        user_id: "u1".to_string(),
        intent_type: "action".to_string(),
        canonical_action: Some(action.to_string()),
        canonical_intent_candidates: vec![action.to_string()],
        confidence: 0.9,
        turn_number: 1,
        sequence_order: 0,
        entities: Entities::new(),
        reasoning: None,
    }
}
