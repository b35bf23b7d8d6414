//! Action orchestration engine for Brain.
//!
//! Turns the intents detected in a conversational turn into a governed,
//! per-session queue of actions: matching, eligibility gating, conflict and
//! dependency ordering, workflow expansion, and timeout sweeping.

pub mod catalog;
pub mod definition;
pub mod eligibility;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod matcher;
pub mod orchestrator;
pub mod queue;
pub mod resolver;
pub mod schema;
pub mod sweeper;
pub mod types;
pub mod users;
pub mod wires;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_support;

pub use catalog::{ActionCatalog, BrandConfig, CatalogDocument, InMemoryCatalog};
pub use definition::{
    ActionDefinition, AuthConfig, ConfirmationConfig, LimitsConfig, ParamSpec, PrereqConfig,
    RetryPolicy, SchemaDependency, SkipCondition, WorkflowMembership,
};
pub use eligibility::{Admission, Eligibility, EligibilityPipeline};
pub use error::{ActionError, EngineError, LedgerError, OrderError, SchemaFetchError, StoreError};
pub use executor::{ActionExecutor, ActionHandler, ExecutionReport, HandlerRegistry};
pub use ledger::{InMemoryIntentLedger, IntentLedger};
pub use matcher::{ActionMatcher, MatchOutcome};
pub use orchestrator::{BrainOrchestrator, EngineDeps};
pub use queue::{InMemorySessionStore, QueueStateStore, SessionDelta, SessionLease, SessionStore};
pub use resolver::{detect_conflicts, order_by_dependencies, Conflict};
pub use schema::{
    HttpSchemaDataClient, SchemaCompletenessChecker, SchemaDataClient, SchemaDefinition,
    SchemaRegistry, SchemaResponse,
};
pub use sweeper::{SweepOutcome, SweepSummary, TimeoutSweeper};
pub use types::{
    ActionMode, ActionOutcome, ActionSource, ActionType, AnswerSheet, DetectedIntent, Entities,
    Intent, IntentStatus, MatchType, NewIntent, QueuedAction, QueuedActionStatus, SessionState,
    TurnPayload, TurnResponse, TurnStatus, UserProfile,
};
pub use users::{InMemoryUsers, UserRepository};
pub use workflow::{Expansion, ExpansionContext, WorkflowExpander};
