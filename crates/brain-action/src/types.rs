//! Core types and value objects for the orchestration engine.
//!
//! Defines ledger intents, queued actions, session state, and the inbound
//! and outbound turn payloads.

use std::collections::BTreeSet;
use std::fmt;

use brain_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entities extracted for an intent, keyed by parameter name.
pub type Entities = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// Enums
// =============================================================================

/// How a cataloged action is carried out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    #[default]
    SystemApi,
    ExternalApi,
    Workflow,
    Redirect,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::SystemApi => write!(f, "SYSTEM_API"),
            ActionType::ExternalApi => write!(f, "EXTERNAL_API"),
            ActionType::Workflow => write!(f, "WORKFLOW"),
            ActionType::Redirect => write!(f, "REDIRECT"),
        }
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SYSTEM_API" => Ok(ActionType::SystemApi),
            "EXTERNAL_API" => Ok(ActionType::ExternalApi),
            "WORKFLOW" => Ok(ActionType::Workflow),
            "REDIRECT" => Ok(ActionType::Redirect),
            _ => Err(format!("Unknown action type: {}", s)),
        }
    }
}

/// Lifecycle status of a ledger intent.
///
/// `detected -> queued -> (blocked | skipped | failed) | executing -> completed | cancelled`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Detected,
    Queued,
    Blocked,
    Skipped,
    Failed,
    Executing,
    Completed,
    Cancelled,
}

impl IntentStatus {
    /// Terminal statuses are never mutated again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IntentStatus::Completed
                | IntentStatus::Cancelled
                | IntentStatus::Failed
                | IntentStatus::Skipped
        )
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntentStatus::Detected => write!(f, "detected"),
            IntentStatus::Queued => write!(f, "queued"),
            IntentStatus::Blocked => write!(f, "blocked"),
            IntentStatus::Skipped => write!(f, "skipped"),
            IntentStatus::Failed => write!(f, "failed"),
            IntentStatus::Executing => write!(f, "executing"),
            IntentStatus::Completed => write!(f, "completed"),
            IntentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for IntentStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detected" => Ok(IntentStatus::Detected),
            "queued" => Ok(IntentStatus::Queued),
            "blocked" => Ok(IntentStatus::Blocked),
            "skipped" => Ok(IntentStatus::Skipped),
            "failed" => Ok(IntentStatus::Failed),
            "executing" => Ok(IntentStatus::Executing),
            "completed" => Ok(IntentStatus::Completed),
            "cancelled" => Ok(IntentStatus::Cancelled),
            _ => Err(format!("Unknown intent status: {}", s)),
        }
    }
}

/// Strategy that resolved a candidate to a cataloged action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Fuzzy,
    Synonym,
    NotFound,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchType::Exact => write!(f, "exact"),
            MatchType::Fuzzy => write!(f, "fuzzy"),
            MatchType::Synonym => write!(f, "synonym"),
            MatchType::NotFound => write!(f, "not_found"),
        }
    }
}

/// Runtime status of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuedActionStatus {
    Queued,
    CollectingParams,
    AwaitingConfirmation,
    Executing,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

impl QueuedActionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueuedActionStatus::Completed
                | QueuedActionStatus::Failed
                | QueuedActionStatus::Expired
                | QueuedActionStatus::Cancelled
        )
    }
}

impl fmt::Display for QueuedActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueuedActionStatus::Queued => write!(f, "queued"),
            QueuedActionStatus::CollectingParams => write!(f, "collecting_params"),
            QueuedActionStatus::AwaitingConfirmation => write!(f, "awaiting_confirmation"),
            QueuedActionStatus::Executing => write!(f, "executing"),
            QueuedActionStatus::Completed => write!(f, "completed"),
            QueuedActionStatus::Failed => write!(f, "failed"),
            QueuedActionStatus::Expired => write!(f, "expired"),
            QueuedActionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Whether a queue entry still needs parameters or can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionMode {
    CollectParams,
    Execute,
}

/// Where a queue entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSource {
    IntentDetector,
    Workflow,
}

// =============================================================================
// Ledger
// =============================================================================

/// An append-only ledger entry for one detected intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub id: Uuid,
    pub session_id: String,
    pub user_id: String,
    pub intent_type: String,
    pub canonical_action: Option<String>,
    pub canonical_intent_candidates: Vec<String>,
    pub match_type: Option<MatchType>,
    pub confidence: f32,
    pub turn_number: u32,
    pub sequence_order: u32,
    pub entities: Entities,
    pub reasoning: Option<String>,
    pub status: IntentStatus,
    pub blocked_reason: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

/// Fields supplied when appending an intent to the ledger.
#[derive(Debug, Clone)]
pub struct NewIntent {
    pub session_id: String,
    pub user_id: String,
    pub intent_type: String,
    pub canonical_action: Option<String>,
    pub canonical_intent_candidates: Vec<String>,
    pub confidence: f32,
    pub turn_number: u32,
    pub sequence_order: u32,
    pub entities: Entities,
    pub reasoning: Option<String>,
}

// =============================================================================
// Queue
// =============================================================================

/// An admitted action waiting in (or retired from) a session queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: Uuid,
    /// Originating ledger intent. `None` for workflow-sourced entries.
    pub intent_id: Option<Uuid>,
    pub canonical_action: String,
    pub action_type: ActionType,
    pub sequence: u32,
    pub priority: i32,
    pub status: QueuedActionStatus,
    pub mode: ActionMode,
    pub source: ActionSource,
    pub params_collected: Entities,
    pub params_missing: Vec<String>,
    pub blocked_reasons: Vec<String>,
    pub stuck_count: u32,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub confirmed: bool,
    pub created_at: Timestamp,
    pub last_activity_at: Timestamp,
    pub timeout_at: Option<Timestamp>,
    pub expired_at: Option<Timestamp>,
    pub expiry_reason: Option<String>,
}

impl QueuedAction {
    /// Build a fresh `queued` entry.
    pub fn new(
        canonical_action: String,
        action_type: ActionType,
        source: ActionSource,
        intent_id: Option<Uuid>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            intent_id,
            canonical_action,
            action_type,
            sequence: 0,
            priority: 0,
            status: QueuedActionStatus::Queued,
            mode: ActionMode::Execute,
            source,
            params_collected: Entities::new(),
            params_missing: Vec::new(),
            blocked_reasons: Vec::new(),
            stuck_count: 0,
            attempts: 0,
            confirmed: false,
            created_at: now,
            last_activity_at: now,
            timeout_at: None,
            expired_at: None,
            expiry_reason: None,
        }
    }

    /// Move into `status` and stamp the activity clock and state deadline.
    pub fn transition(&mut self, status: QueuedActionStatus, now: Timestamp, timeout_secs: Option<u64>) {
        self.status = status;
        self.last_activity_at = now;
        self.timeout_at = timeout_secs.map(|secs| now.plus_secs(secs));
    }
}

/// Structured question handed to the next turn's intent classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSheet {
    pub action: String,
    pub parameters: Vec<AnswerSheetParam>,
}

/// One awaited parameter and its enumerated options (empty = free text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSheetParam {
    pub name: String,
    pub options: Vec<String>,
}

/// The per-session JSON document: action queue plus the six wires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub action_queue: Vec<QueuedAction>,
    /// Retired queue entries, never deleted.
    #[serde(default)]
    pub action_history: Vec<QueuedAction>,
    #[serde(default)]
    pub current_action_index: usize,
    #[serde(default)]
    pub queue_paused: bool,
    #[serde(default)]
    pub queue_paused_reason: Option<String>,
    #[serde(default)]
    pub expecting_response: bool,
    #[serde(default)]
    pub answer_sheet: Option<AnswerSheet>,
    #[serde(default)]
    pub active_task: Option<String>,
    #[serde(default)]
    pub previous_intents: Vec<String>,
    #[serde(default = "empty_object")]
    pub conversation_context: serde_json::Value,
    #[serde(default)]
    pub available_signals: BTreeSet<String>,
    /// Optimistic concurrency stamp, bumped by the store on every write.
    #[serde(default)]
    pub version: u64,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            action_queue: Vec::new(),
            action_history: Vec::new(),
            current_action_index: 0,
            queue_paused: false,
            queue_paused_reason: None,
            expecting_response: false,
            answer_sheet: None,
            active_task: None,
            previous_intents: Vec::new(),
            conversation_context: empty_object(),
            available_signals: BTreeSet::new(),
            version: 0,
        }
    }
}

impl SessionState {
    /// `queue[current_action_index]`, or `None` once the queue is exhausted.
    pub fn current_action(&self) -> Option<&QueuedAction> {
        self.action_queue.get(self.current_action_index)
    }

    pub fn current_action_mut(&mut self) -> Option<&mut QueuedAction> {
        self.action_queue.get_mut(self.current_action_index)
    }

    pub fn has_more_actions(&self) -> bool {
        self.current_action_index < self.action_queue.len()
    }

    /// Non-terminal queue entries, in queue order.
    pub fn active_actions(&self) -> impl Iterator<Item = &QueuedAction> {
        self.action_queue.iter().filter(|a| !a.status.is_terminal())
    }

    /// Push `name` onto the `previous_intents` ring, keeping the newest `limit`.
    pub fn remember_intent(&mut self, name: &str, limit: usize) {
        self.previous_intents.push(name.to_string());
        if self.previous_intents.len() > limit {
            let overflow = self.previous_intents.len() - limit;
            self.previous_intents.drain(..overflow);
        }
    }
}

// =============================================================================
// Users
// =============================================================================

/// User attributes consulted by the authorization gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub is_authenticated: bool,
    #[serde(default)]
    pub trust_score: f64,
    #[serde(default = "guest_tier")]
    pub tier: String,
    #[serde(default)]
    pub acquisition_channel: Option<String>,
}

fn guest_tier() -> String {
    "guest".to_string()
}

impl UserProfile {
    /// Profile used when the user repository has no record.
    pub fn guest(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            is_authenticated: false,
            trust_score: 0.0,
            tier: guest_tier(),
            acquisition_channel: None,
        }
    }

    pub fn is_guest(&self) -> bool {
        !self.is_authenticated || self.tier == "guest"
    }
}

// =============================================================================
// Turn payloads
// =============================================================================

/// Inbound payload from the intent classification collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnPayload {
    pub session_id: String,
    pub user_id: String,
    pub instance_id: String,
    pub brand_id: String,
    pub turn_number: u32,
    #[serde(default)]
    pub intents: Vec<DetectedIntent>,
}

/// One intent as produced by the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedIntent {
    pub intent_type: String,
    #[serde(default)]
    pub canonical_intent: Option<String>,
    #[serde(default)]
    pub canonical_intent_candidates: Vec<String>,
    pub confidence: f32,
    #[serde(default)]
    pub entities: Entities,
    #[serde(default)]
    pub reasoning: Option<String>,
    /// Detector-assigned order; falls back to payload position.
    #[serde(default)]
    pub sequence_order: Option<u32>,
}

impl DetectedIntent {
    /// Reject intents the engine cannot act on.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0, 1]", self.confidence));
        }
        if self.canonical_intent_candidates.len() > 2 {
            return Err(format!(
                "{} candidates supplied, at most 2 allowed",
                self.canonical_intent_candidates.len()
            ));
        }
        let has_candidate = self
            .canonical_intent_candidates
            .iter()
            .any(|c| !c.trim().is_empty());
        let has_canonical = self
            .canonical_intent
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty());
        if !has_candidate && !has_canonical {
            return Err("no canonical intent or candidates".to_string());
        }
        Ok(())
    }
}

/// Overall outcome of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    Error,
}

/// Outbound payload for the response composition collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    pub text: String,
    pub status: TurnStatus,
    pub actions_completed: Vec<String>,
    pub actions_pending: Vec<String>,
}

/// Result returned by action handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
    pub output: Option<serde_json::Value>,
}

// =============================================================================
// Tests
// =============================================================================
