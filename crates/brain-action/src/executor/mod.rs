//! Queue execution.
//!
//! Walks a session queue from `current_action_index`, pausing on entries
//! that need user input and dispatching the rest to registered handlers.
//!
//! Entry lifecycle:
//! `queued -> collecting_params -> queued` (params supplied)
//! `queued -> awaiting_confirmation -> queued` (confirmed) or `cancelled` (declined)
//! `queued -> executing -> completed | failed`

pub mod redirect;

pub use redirect::RedirectHandler;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use brain_core::config::{BrainConfig, ExecutorConfig, QueueConfig};
use brain_core::types::Timestamp;
use tracing::{debug, info, warn};

use crate::catalog::ActionCatalog;
use crate::definition::ActionDefinition;
use crate::error::{ActionError, EngineError};
use crate::ledger::IntentLedger;
use crate::queue::QueueStateStore;
use crate::types::{
    ActionMode, ActionOutcome, ActionType, Entities, IntentStatus, QueuedAction,
    QueuedActionStatus, SessionState,
};
use crate::wires;

/// Executes one kind of action.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn action_type(&self) -> ActionType;

    async fn execute(
        &self,
        action: &QueuedAction,
        definition: &ActionDefinition,
    ) -> Result<ActionOutcome, ActionError>;

    /// Short human-readable description of what executing `action` does.
    fn describe(&self, action: &QueuedAction) -> String;
}

/// Handlers keyed by the action type they serve.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<ActionType, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same type.
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(handler.action_type(), handler);
    }

    /// Register the built-in handlers.
    pub fn register_defaults(&mut self) {
        self.register(Arc::new(RedirectHandler));
    }

    pub fn get(&self, action_type: ActionType) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&action_type).cloned()
    }
}

/// What a queue run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    /// Head action left waiting for the user, if any.
    pub waiting_on: Option<String>,
}

/// Move a `queued` head into the waiting state it needs, if any.
///
/// Returns true when the head is waiting on the user.
pub fn activate_head(
    state: &mut SessionState,
    definition: Option<&ActionDefinition>,
    now: Timestamp,
    config: &QueueConfig,
) -> bool {
    let Some(head) = state.current_action_mut() else {
        return false;
    };
    match head.status {
        QueuedActionStatus::CollectingParams | QueuedActionStatus::AwaitingConfirmation => true,
        QueuedActionStatus::Queued if head.mode == ActionMode::CollectParams => {
            head.transition(
                QueuedActionStatus::CollectingParams,
                now,
                Some(config.collecting_params_timeout_secs),
            );
            true
        }
        QueuedActionStatus::Queued
            if !head.confirmed && definition.is_some_and(|d| d.confirmation.required) =>
        {
            head.transition(
                QueuedActionStatus::AwaitingConfirmation,
                now,
                Some(config.awaiting_confirmation_timeout_secs),
            );
            true
        }
        _ => false,
    }
}

pub struct ActionExecutor {
    catalog: Arc<dyn ActionCatalog>,
    ledger: Arc<dyn IntentLedger>,
    queue: Arc<QueueStateStore>,
    registry: HandlerRegistry,
    config: ExecutorConfig,
    queue_config: QueueConfig,
}

impl ActionExecutor {
    pub fn new(
        catalog: Arc<dyn ActionCatalog>,
        ledger: Arc<dyn IntentLedger>,
        queue: Arc<QueueStateStore>,
        registry: HandlerRegistry,
        config: &BrainConfig,
    ) -> Self {
        Self {
            catalog,
            ledger,
            queue,
            registry,
            config: config.executor.clone(),
            queue_config: config.queue.clone(),
        }
    }

    async fn definition(
        &self,
        name: &str,
        brand_id: &str,
    ) -> Result<Option<ActionDefinition>, EngineError> {
        self.catalog
            .by_canonical_name(name, brand_id)
            .await
            .map_err(EngineError::Catalog)
    }

    /// Run every ready entry from the head until one waits or the queue ends.
    ///
    /// Operates on state already leased by the caller.
    pub async fn run_on_state(
        &self,
        state: &mut SessionState,
        brand_id: &str,
        now: Timestamp,
    ) -> Result<ExecutionReport, EngineError> {
        let mut report = ExecutionReport::default();
        if state.queue_paused {
            debug!(reason = ?state.queue_paused_reason, "Queue paused, nothing executed");
            return Ok(report);
        }

        while let Some(head) = state.current_action().cloned() {
            if head.status.is_terminal() {
                state.current_action_index += 1;
                continue;
            }

            let Some(definition) = self.definition(&head.canonical_action, brand_id).await? else {
                self.fail_head(state, "action_not_found", now).await?;
                report.failed.push(head.canonical_action);
                continue;
            };

            if activate_head(state, Some(&definition), now, &self.queue_config) {
                report.waiting_on = Some(head.canonical_action);
                break;
            }
            if head.status != QueuedActionStatus::Queued {
                // Executing under another owner; leave it alone.
                break;
            }

            if self.execute_head(state, &definition, now).await? {
                report.completed.push(head.canonical_action);
            } else {
                report.failed.push(head.canonical_action);
            }
        }
        Ok(report)
    }

    /// Execute the head with retries. Returns true on success.
    async fn execute_head(
        &self,
        state: &mut SessionState,
        definition: &ActionDefinition,
        now: Timestamp,
    ) -> Result<bool, EngineError> {
        let Some(head) = state.current_action_mut() else {
            return Ok(false);
        };
        head.transition(QueuedActionStatus::Executing, now, None);
        let action = head.clone();
        if let Some(id) = action.intent_id {
            self.ledger
                .update_status(id, IntentStatus::Executing, None, now)
                .await?;
        }

        let (result, attempts) = self.attempt(&action, definition).await;
        let succeeded = result.is_ok();

        if let Some(head) = state.current_action_mut() {
            head.attempts = attempts;
            match &result {
                Ok(_) => head.transition(QueuedActionStatus::Completed, now, None),
                Err(e) => {
                    head.blocked_reasons.push(e.to_string());
                    head.transition(QueuedActionStatus::Failed, now, None);
                }
            }
        }
        if let Some(id) = action.intent_id {
            match &result {
                Ok(_) => {
                    self.ledger
                        .update_status(id, IntentStatus::Completed, None, now)
                        .await?;
                }
                Err(e) => {
                    self.ledger
                        .update_status(id, IntentStatus::Failed, Some(e.to_string()), now)
                        .await?;
                }
            }
        }

        match result {
            Ok(outcome) => {
                info!(action = %action.canonical_action, attempts, message = %outcome.message, "Action completed")
            }
            Err(e) => {
                warn!(action = %action.canonical_action, attempts, error = %e, "Action failed")
            }
        }
        state.current_action_index += 1;
        Ok(succeeded)
    }

    /// Call the handler up to the retry policy's attempt count.
    async fn attempt(
        &self,
        action: &QueuedAction,
        definition: &ActionDefinition,
    ) -> (Result<ActionOutcome, ActionError>, u32) {
        let Some(handler) = self.registry.get(definition.action_type) else {
            return (
                Err(ActionError::UnregisteredHandler(definition.action_type)),
                0,
            );
        };
        debug!(description = %handler.describe(action), "Dispatching action");

        let max_attempts = definition.max_attempts(self.config.default_max_attempts);
        let backoff = Duration::from_millis(
            definition
                .retry_policy
                .as_ref()
                .and_then(|p| p.backoff_ms)
                .unwrap_or(self.config.retry_backoff_ms),
        );

        let mut last_error = ActionError::HandlerFailed("not attempted".to_string());
        for attempt in 1..=max_attempts {
            match handler.execute(action, definition).await {
                Ok(outcome) if outcome.success => return (Ok(outcome), attempt),
                Ok(outcome) => last_error = ActionError::HandlerFailed(outcome.message),
                Err(e) => last_error = e,
            }
            if attempt < max_attempts {
                warn!(action = %action.canonical_action, attempt, error = %last_error, "Attempt failed, retrying");
                tokio::time::sleep(backoff).await;
            }
        }
        (Err(last_error), max_attempts)
    }

    async fn fail_head(
        &self,
        state: &mut SessionState,
        reason: &str,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        let Some(head) = state.current_action_mut() else {
            return Ok(());
        };
        head.blocked_reasons.push(reason.to_string());
        head.transition(QueuedActionStatus::Failed, now, None);
        let intent_id = head.intent_id;
        warn!(action = %head.canonical_action, reason, "Queued action failed");
        if let Some(id) = intent_id {
            self.ledger
                .update_status(id, IntentStatus::Failed, Some(reason.to_string()), now)
                .await?;
        }
        state.current_action_index += 1;
        Ok(())
    }

    async fn refresh_wires(&self, state: &mut SessionState, brand_id: &str) -> Result<(), EngineError> {
        let definition = match state.current_action() {
            Some(head) => self.definition(&head.canonical_action, brand_id).await?,
            None => None,
        };
        wires::recompute(state, definition.as_ref());
        Ok(())
    }

    /// Lease the session, apply `prepare` to its state, run the queue, commit.
    async fn with_session<F>(
        &self,
        session_id: &str,
        brand_id: &str,
        prepare: F,
    ) -> Result<ExecutionReport, EngineError>
    where
        F: FnOnce(&mut SessionState, Timestamp) -> Result<(), EngineError>,
    {
        let mut lease = self.queue.lease(session_id).await?;
        let now = Timestamp::now();
        let state = lease.state_mut();
        prepare(state, now)?;
        let report = self.run_on_state(state, brand_id, now).await?;
        self.refresh_wires(state, brand_id).await?;
        lease.commit().await?;
        Ok(report)
    }

    /// Run whatever is ready in a session's queue.
    pub async fn run_ready(
        &self,
        session_id: &str,
        brand_id: &str,
    ) -> Result<ExecutionReport, EngineError> {
        self.with_session(session_id, brand_id, |_, _| Ok(())).await
    }

    /// Confirm the head awaiting confirmation and continue the queue.
    ///
    /// A head whose confirmation window has passed is left for the sweeper.
    pub async fn confirm_current(
        &self,
        session_id: &str,
        brand_id: &str,
    ) -> Result<ExecutionReport, EngineError> {
        self.with_session(session_id, brand_id, |state, now| {
            match state.current_action_mut() {
                Some(head)
                    if head.status == QueuedActionStatus::AwaitingConfirmation
                        && !head.timeout_at.is_some_and(|t| now > t) =>
                {
                    head.confirmed = true;
                    head.transition(QueuedActionStatus::Queued, now, None);
                    info!(action = %head.canonical_action, "Action confirmed");
                }
                _ => debug!("No action awaiting confirmation"),
            }
            Ok(())
        })
        .await
    }

    /// Decline the head awaiting confirmation, cancelling it and its intent.
    pub async fn decline_current(
        &self,
        session_id: &str,
        brand_id: &str,
    ) -> Result<ExecutionReport, EngineError> {
        let mut declined = None;
        let report = self
            .with_session(session_id, brand_id, |state, now| {
                if let Some(head) = state.current_action_mut() {
                    if head.status == QueuedActionStatus::AwaitingConfirmation {
                        head.blocked_reasons.push("declined_by_user".to_string());
                        head.transition(QueuedActionStatus::Cancelled, now, None);
                        info!(action = %head.canonical_action, "Action declined");
                        declined = head.intent_id.map(|id| (id, now));
                        state.current_action_index += 1;
                    }
                }
                Ok(())
            })
            .await?;
        if let Some((id, at)) = declined {
            self.ledger
                .update_status(
                    id,
                    IntentStatus::Cancelled,
                    Some("declined_by_user".to_string()),
                    at,
                )
                .await?;
        }
        Ok(report)
    }

    /// Merge user-supplied parameters into the head collecting them.
    ///
    /// Once every required parameter is present the head switches to execute
    /// mode and the queue runs.
    pub async fn provide_params(
        &self,
        session_id: &str,
        brand_id: &str,
        params: &Entities,
    ) -> Result<ExecutionReport, EngineError> {
        let head_name = self
            .queue
            .get_current_action(session_id)
            .await?
            .map(|a| a.canonical_action);
        let definition = match &head_name {
            Some(name) => self.definition(name, brand_id).await?,
            None => None,
        };
        let collecting_timeout = self.queue_config.collecting_params_timeout_secs;

        self.with_session(session_id, brand_id, |state, now| {
            let (Some(head), Some(definition)) = (state.current_action_mut(), definition.as_ref())
            else {
                return Ok(());
            };
            if head.mode != ActionMode::CollectParams
                || Some(&head.canonical_action) != head_name.as_ref()
            {
                return Ok(());
            }
            head.params_collected
                .extend(definition.collected_params(params));
            head.params_missing = definition.missing_params(&head.params_collected);
            if head.params_missing.is_empty() {
                head.mode = ActionMode::Execute;
                head.transition(QueuedActionStatus::Queued, now, None);
                info!(action = %head.canonical_action, "Parameters complete");
            } else {
                head.transition(
                    QueuedActionStatus::CollectingParams,
                    now,
                    Some(collecting_timeout),
                );
                debug!(action = %head.canonical_action, missing = ?head.params_missing, "Still collecting parameters");
            }
            Ok(())
        })
        .await
    }
}
