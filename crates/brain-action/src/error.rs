//! Error types for the orchestration engine.
//!
//! Only infrastructure and configuration failures live here. Ineligible
//! actions and unmatched intents are recorded on the ledger as data.

use crate::types::{ActionType, IntentStatus};
use brain_core::error::BrainError;
use uuid::Uuid;

/// Errors from action handler execution.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Action handler failed: {0}")]
    HandlerFailed(String),
    #[error("Action type not registered: {0}")]
    UnregisteredHandler(ActionType),
    #[error("Payload validation failed: {0}")]
    InvalidPayload(String),
}

/// Errors from the intent ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Intent not found: {0}")]
    NotFound(Uuid),
    #[error("Invalid status transition: {0} -> {1}")]
    InvalidTransition(IntentStatus, IntentStatus),
    #[error("Storage error: {0}")]
    Storage(#[from] BrainError),
}

/// Errors from the session document store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Version conflict for session {session_id}: expected {expected}, found {found}")]
    VersionConflict {
        session_id: String,
        expected: u64,
        found: u64,
    },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Prerequisite graph could not be ordered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("Cyclic prerequisites: {}", .0.join(" -> "))]
    CyclicPrerequisites(Vec<String>),
}

/// Transport-level failure from a schema data client.
#[derive(Debug, thiserror::Error)]
pub enum SchemaFetchError {
    #[error("Schema fetch timed out after {0} ms")]
    Timeout(u64),
    #[error("Schema fetch failed: {0}")]
    Transport(String),
    #[error("Schema response was not valid JSON: {0}")]
    InvalidBody(String),
}

/// Fatal errors that abort a turn.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Catalog unavailable: {0}")]
    Catalog(BrainError),
    #[error("Users unavailable: {0}")]
    Users(BrainError),
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] OrderError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_error_display() {
        let err = ActionError::HandlerFailed("connection reset".to_string());
        assert_eq!(err.to_string(), "Action handler failed: connection reset");

        let err = ActionError::UnregisteredHandler(ActionType::ExternalApi);
        assert_eq!(err.to_string(), "Action type not registered: EXTERNAL_API");

        let err = ActionError::InvalidPayload("missing url".to_string());
        assert_eq!(err.to_string(), "Payload validation failed: missing url");
    }

    #[test]
    fn test_ledger_error_display() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(
            LedgerError::NotFound(id).to_string(),
            "Intent not found: 550e8400-e29b-41d4-a716-446655440000"
        );

        let err = LedgerError::InvalidTransition(IntentStatus::Completed, IntentStatus::Queued);
        assert_eq!(err.to_string(), "Invalid status transition: completed -> queued");
    }

    #[test]
    fn test_ledger_error_from_brain_error() {
        let err: LedgerError = BrainError::Storage("disk full".to_string()).into();
        assert!(matches!(err, LedgerError::Storage(_)));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_store_version_conflict_display() {
        let err = StoreError::VersionConflict {
            session_id: "s1".to_string(),
            expected: 3,
            found: 4,
        };
        assert_eq!(
            err.to_string(),
            "Version conflict for session s1: expected 3, found 4"
        );
    }

    #[test]
    fn test_cycle_error_lists_path() {
        let err = OrderError::CyclicPrerequisites(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);
        assert_eq!(err.to_string(), "Cyclic prerequisites: a -> b -> a");
    }

    #[test]
    fn test_engine_error_conversions() {
        let err: EngineError = OrderError::CyclicPrerequisites(vec!["x".to_string()]).into();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert!(err.to_string().starts_with("Configuration error:"));

        let err: EngineError = StoreError::Storage("gone".to_string()).into();
        assert!(matches!(err, EngineError::Store(_)));

        let err: EngineError = LedgerError::NotFound(Uuid::new_v4()).into();
        assert!(matches!(err, EngineError::Ledger(_)));
    }

    #[test]
    fn test_schema_fetch_error_display() {
        assert_eq!(
            SchemaFetchError::Timeout(5000).to_string(),
            "Schema fetch timed out after 5000 ms"
        );
    }
}
