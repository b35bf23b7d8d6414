//! Intent ledger.
//!
//! Append-only record of every detected intent and its lifecycle status.

pub mod state_machine;

use std::sync::Mutex;

use async_trait::async_trait;
use brain_core::error::BrainError;
use brain_core::types::Timestamp;
use tracing::debug;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::ledger::state_machine::validate_transition;
use crate::types::{Intent, IntentStatus, MatchType, NewIntent};

/// Persistence contract for ledger rows.
///
/// Every write takes the caller's clock so replayed turns stamp rows with
/// the turn time rather than the wall clock.
#[async_trait]
pub trait IntentLedger: Send + Sync {
    /// Append a new intent in `detected` status and return its id.
    async fn append(&self, intent: NewIntent, at: Timestamp) -> Result<Uuid, LedgerError>;

    /// Record which catalog action an intent resolved to.
    async fn record_match(
        &self,
        id: Uuid,
        canonical_action: Option<String>,
        match_type: MatchType,
        at: Timestamp,
    ) -> Result<(), LedgerError>;

    /// Move an intent to `status`, validating the transition.
    async fn update_status(
        &self,
        id: Uuid,
        status: IntentStatus,
        blocked_reason: Option<String>,
        at: Timestamp,
    ) -> Result<Intent, LedgerError>;

    async fn get(&self, id: Uuid) -> Result<Intent, LedgerError>;

    /// All intents of a session, sorted by `(turn_number, sequence_order)`.
    async fn session_history(&self, session_id: &str) -> Result<Vec<Intent>, LedgerError>;

    /// A user's intents for one action across all sessions, oldest first.
    async fn user_history(
        &self,
        user_id: &str,
        canonical_action: &str,
    ) -> Result<Vec<Intent>, LedgerError>;
}

/// In-memory ledger backed by a `Vec`.
pub struct InMemoryIntentLedger {
    intents: Mutex<Vec<Intent>>,
}

impl InMemoryIntentLedger {
    pub fn new() -> Self {
        Self {
            intents: Mutex::new(Vec::new()),
        }
    }

    /// Load rows recorded elsewhere, e.g. earlier sessions.
    pub fn import(&self, rows: Vec<Intent>) -> Result<(), LedgerError> {
        self.lock()?.extend(rows);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Intent>>, LedgerError> {
        self.intents
            .lock()
            .map_err(|e| LedgerError::Storage(BrainError::Storage(format!("Lock poisoned: {}", e))))
    }
}

impl Default for InMemoryIntentLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IntentLedger for InMemoryIntentLedger {
    async fn append(&self, new: NewIntent, at: Timestamp) -> Result<Uuid, LedgerError> {
        let intent = Intent {
            id: Uuid::new_v4(),
            session_id: new.session_id,
            user_id: new.user_id,
            intent_type: new.intent_type,
            canonical_action: new.canonical_action,
            canonical_intent_candidates: new.canonical_intent_candidates,
            match_type: None,
            confidence: new.confidence,
            turn_number: new.turn_number,
            sequence_order: new.sequence_order,
            entities: new.entities,
            reasoning: new.reasoning,
            status: IntentStatus::Detected,
            blocked_reason: None,
            created_at: at,
            updated_at: at,
            completed_at: None,
        };
        let id = intent.id;
        debug!(intent_id = %id, session_id = %intent.session_id, "Intent appended");
        self.lock()?.push(intent);
        Ok(id)
    }

    async fn record_match(
        &self,
        id: Uuid,
        canonical_action: Option<String>,
        match_type: MatchType,
        at: Timestamp,
    ) -> Result<(), LedgerError> {
        let mut intents = self.lock()?;
        let intent = intents
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(LedgerError::NotFound(id))?;
        if intent.status.is_terminal() {
            return Err(LedgerError::InvalidTransition(intent.status, intent.status));
        }
        intent.canonical_action = canonical_action;
        intent.match_type = Some(match_type);
        intent.updated_at = at;
        Ok(())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: IntentStatus,
        blocked_reason: Option<String>,
        at: Timestamp,
    ) -> Result<Intent, LedgerError> {
        let mut intents = self.lock()?;
        let intent = intents
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(LedgerError::NotFound(id))?;

        validate_transition(intent.status, status)?;

        intent.status = status;
        intent.updated_at = at;
        if blocked_reason.is_some() {
            intent.blocked_reason = blocked_reason;
        }
        if status == IntentStatus::Completed {
            intent.completed_at = Some(at);
        }
        Ok(intent.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Intent, LedgerError> {
        self.lock()?
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or(LedgerError::NotFound(id))
    }

    async fn session_history(&self, session_id: &str) -> Result<Vec<Intent>, LedgerError> {
        let mut rows: Vec<Intent> = self
            .lock()?
            .iter()
            .filter(|i| i.session_id == session_id)
            .cloned()
            .collect();
        // Stable: equal keys keep append order.
        rows.sort_by_key(|i| (i.turn_number, i.sequence_order));
        Ok(rows)
    }

    async fn user_history(
        &self,
        user_id: &str,
        canonical_action: &str,
    ) -> Result<Vec<Intent>, LedgerError> {
        let mut rows: Vec<Intent> = self
            .lock()?
            .iter()
            .filter(|i| i.user_id == user_id && i.canonical_action.as_deref() == Some(canonical_action))
            .cloned()
            .collect();
        rows.sort_by_key(|i| i.created_at);
        Ok(rows)
    }
}
