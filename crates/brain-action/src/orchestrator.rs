//! Turn-level entry point.
//!
//! One call per conversational turn:
//! `sweeping -> admission loop -> ordering -> queue commit -> wire recompute -> respond`.
//!
//! The session lease is held for the whole turn, so a second delivery of the
//! same turn waits and then sees the first one's queue.

use std::collections::HashSet;
use std::sync::Arc;

use brain_core::config::BrainConfig;
use brain_core::types::Timestamp;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::ActionCatalog;
use crate::definition::ActionDefinition;
use crate::eligibility::{Admission, AdmissionContext, Eligibility, EligibilityPipeline};
use crate::error::EngineError;
use crate::executor::{activate_head, ActionExecutor, ExecutionReport, HandlerRegistry};
use crate::ledger::IntentLedger;
use crate::matcher::{ActionMatcher, MatchOutcome};
use crate::queue::{QueueStateStore, SessionStore};
use crate::resolver::{detect_conflicts, order_by_dependencies};
use crate::schema::{SchemaCompletenessChecker, SchemaDataClient, SchemaRegistry};
use crate::sweeper::{SweepSummary, TimeoutSweeper};
use crate::types::{
    ActionSource, DetectedIntent, IntentStatus, MatchType, NewIntent, QueuedAction,
    QueuedActionStatus, SessionState, TurnPayload, TurnResponse, TurnStatus, UserProfile,
};
use crate::users::UserRepository;
use crate::wires;
use crate::workflow::{ExpansionContext, WorkflowExpander};

/// Collaborators the engine is built from.
pub struct EngineDeps {
    pub catalog: Arc<dyn ActionCatalog>,
    pub users: Arc<dyn UserRepository>,
    pub ledger: Arc<dyn IntentLedger>,
    pub sessions: Arc<dyn SessionStore>,
    pub schema_registry: Arc<dyn SchemaRegistry>,
    pub schema_client: Arc<dyn SchemaDataClient>,
}

/// An intent that passed the eligibility gate this turn.
struct Admitted {
    intent_id: Uuid,
    sequence_order: u32,
    definition: ActionDefinition,
    admission: Admission,
}

/// Per-turn tallies used to compose the response.
#[derive(Default)]
struct TurnOutcome {
    queued: Vec<String>,
    blocked: Vec<(String, String)>,
    skipped: Vec<(String, String)>,
    failed: Vec<String>,
    dropped: usize,
}

pub struct BrainOrchestrator {
    catalog: Arc<dyn ActionCatalog>,
    users: Arc<dyn UserRepository>,
    ledger: Arc<dyn IntentLedger>,
    queue: Arc<QueueStateStore>,
    schemas: Arc<SchemaCompletenessChecker>,
    matcher: ActionMatcher,
    eligibility: EligibilityPipeline,
    workflows: WorkflowExpander,
    sweeper: TimeoutSweeper,
    executor: Option<ActionExecutor>,
    config: BrainConfig,
}

impl BrainOrchestrator {
    pub fn new(deps: EngineDeps, config: &BrainConfig) -> Self {
        let schemas = Arc::new(SchemaCompletenessChecker::new(
            deps.schema_registry,
            deps.schema_client,
            &config.schema,
        ));
        let queue = Arc::new(QueueStateStore::new(
            deps.sessions,
            config.queue.max_commit_retries,
        ));
        Self {
            matcher: ActionMatcher::new(config.matcher.fuzzy_threshold),
            eligibility: EligibilityPipeline::new(deps.ledger.clone(), schemas.clone()),
            workflows: WorkflowExpander::new(
                deps.catalog.clone(),
                deps.ledger.clone(),
                schemas.clone(),
            ),
            sweeper: TimeoutSweeper::new(deps.ledger.clone(), &config.queue),
            catalog: deps.catalog,
            users: deps.users,
            ledger: deps.ledger,
            queue,
            schemas,
            executor: None,
            config: config.clone(),
        }
    }

    /// Attach an executor so ready actions run at the end of each turn.
    pub fn with_executor(mut self, registry: HandlerRegistry) -> Self {
        self.executor = Some(ActionExecutor::new(
            self.catalog.clone(),
            self.ledger.clone(),
            self.queue.clone(),
            registry,
            &self.config,
        ));
        self
    }

    pub fn queue(&self) -> &Arc<QueueStateStore> {
        &self.queue
    }

    pub fn schemas(&self) -> &Arc<SchemaCompletenessChecker> {
        &self.schemas
    }

    pub fn executor(&self) -> Option<&ActionExecutor> {
        self.executor.as_ref()
    }

    pub async fn process_turn(&self, payload: TurnPayload) -> Result<TurnResponse, EngineError> {
        self.process_turn_at(payload, Timestamp::now()).await
    }

    /// Process a turn as of `now`.
    ///
    /// Infrastructure and configuration failures abort the turn with the
    /// session document left as it was. Intents this turn already wrote to
    /// the ledger are failed, and expiries found by the sweep are only
    /// cascaded to the ledger once the session has been committed.
    pub async fn process_turn_at(
        &self,
        payload: TurnPayload,
        now: Timestamp,
    ) -> Result<TurnResponse, EngineError> {
        info!(
            session_id = %payload.session_id,
            turn = payload.turn_number,
            intents = payload.intents.len(),
            "Processing turn"
        );
        let mut lease = self.queue.lease(&payload.session_id).await?;
        let expired = self.sweeper.sweep(lease.state_mut(), now);
        let sweep = SweepSummary::from_outcomes(&expired);

        let mut turn_intents: Vec<Uuid> = Vec::new();
        let turn = self
            .run_turn(lease.state_mut(), &payload, &sweep, now, &mut turn_intents)
            .await;
        let result = match turn {
            Ok(response) => lease
                .commit()
                .await
                .map(|_| response)
                .map_err(EngineError::from),
            Err(e) => Err(e),
        };
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(session_id = %payload.session_id, error = %e, "Turn aborted");
                self.fail_turn_intents(&turn_intents, &e, now).await;
                return Err(e);
            }
        };

        self.sweeper.cancel_expired_intents(&expired, now).await;
        info!(session_id = %payload.session_id, status = ?response.status, "Turn processed");
        Ok(response)
    }

    /// Admission, ordering, enqueueing and wire recompute on leased state.
    ///
    /// Every ledger row appended is recorded in `turn_intents`.
    async fn run_turn(
        &self,
        state: &mut SessionState,
        payload: &TurnPayload,
        sweep: &SweepSummary,
        now: Timestamp,
        turn_intents: &mut Vec<Uuid>,
    ) -> Result<TurnResponse, EngineError> {
        let user = self
            .users
            .by_id(&payload.user_id)
            .await
            .map_err(EngineError::Users)?
            .unwrap_or_else(|| UserProfile::guest(&payload.user_id));
        let history = self.ledger.session_history(&payload.session_id).await?;
        let active_queue: Vec<String> = state
            .active_actions()
            .map(|a| a.canonical_action.clone())
            .collect();

        let mut intents: Vec<(u32, DetectedIntent)> = payload
            .intents
            .iter()
            .cloned()
            .enumerate()
            .map(|(position, intent)| (intent.sequence_order.unwrap_or(position as u32), intent))
            .collect();
        intents.sort_by_key(|(order, _)| *order);

        let mut outcome = TurnOutcome::default();
        let mut admitted: Vec<Admitted> = Vec::new();
        let mut admitted_names: Vec<String> = Vec::new();
        let mut instance_actions: Option<Vec<ActionDefinition>> = None;

        for (sequence_order, intent) in intents {
            if let Err(reason) = intent.validate() {
                warn!(intent_type = %intent.intent_type, %reason, "Dropping invalid intent");
                outcome.dropped += 1;
                continue;
            }

            let intent_id = self
                .ledger
                .append(
                    NewIntent {
                        session_id: payload.session_id.clone(),
                        user_id: payload.user_id.clone(),
                        intent_type: intent.intent_type.clone(),
                        canonical_action: intent.canonical_intent.clone(),
                        canonical_intent_candidates: intent.canonical_intent_candidates.clone(),
                        confidence: intent.confidence,
                        turn_number: payload.turn_number,
                        sequence_order,
                        entities: intent.entities.clone(),
                        reasoning: intent.reasoning.clone(),
                    },
                    now,
                )
                .await?;
            turn_intents.push(intent_id);

            let matched = self
                .match_intent(&intent, payload, &mut instance_actions)
                .await?;
            self.ledger
                .record_match(
                    intent_id,
                    matched.action.as_ref().map(|a| a.canonical_name.clone()),
                    matched.match_type,
                    now,
                )
                .await?;

            let label = intent_label(&intent, &matched);
            state.remember_intent(&label, self.config.queue.previous_intents_limit);

            let Some(definition) = matched.action else {
                warn!(intent = %label, "No catalog action matched");
                self.ledger
                    .update_status(
                        intent_id,
                        IntentStatus::Failed,
                        Some("action_not_found".to_string()),
                        now,
                    )
                    .await?;
                outcome.failed.push(label);
                continue;
            };

            let ctx = AdmissionContext {
                session_id: &payload.session_id,
                brand_id: &payload.brand_id,
                user: &user,
                session_history: &history,
                active_queue: &active_queue,
                admitted_this_turn: &admitted_names,
                now,
            };
            let eligibility = self
                .eligibility
                .evaluate(&definition, &ctx, &intent.entities)
                .await?;
            match eligibility {
                Eligibility::Eligible(admission) => {
                    admitted_names.push(definition.canonical_name.clone());
                    admitted.push(Admitted {
                        intent_id,
                        sequence_order,
                        definition,
                        admission,
                    });
                }
                rejected => {
                    let reason = rejected.reason().unwrap_or_default();
                    let skipped = matches!(rejected, Eligibility::Skipped { .. });
                    let status = if skipped {
                        IntentStatus::Skipped
                    } else {
                        IntentStatus::Blocked
                    };
                    self.ledger
                        .update_status(intent_id, status, Some(reason.clone()), now)
                        .await?;
                    let tally = if skipped {
                        &mut outcome.skipped
                    } else {
                        &mut outcome.blocked
                    };
                    tally.push((definition.canonical_name, reason));
                }
            }
        }

        // The later member of a conflicting pair loses.
        let definitions: Vec<ActionDefinition> =
            admitted.iter().map(|a| a.definition.clone()).collect();
        let mut conflicted: Vec<(usize, String)> = Vec::new();
        for conflict in detect_conflicts(&definitions) {
            if conflicted.iter().all(|(index, _)| *index != conflict.second) {
                conflicted.push((conflict.second, format!("conflicts_with:{}", conflict.first_name)));
            }
        }
        let losers: HashSet<usize> = conflicted.iter().map(|(index, _)| *index).collect();
        let survivors: Vec<usize> = (0..admitted.len()).filter(|i| !losers.contains(i)).collect();
        let survivor_definitions: Vec<ActionDefinition> = survivors
            .iter()
            .map(|&i| admitted[i].definition.clone())
            .collect();
        let order = order_by_dependencies(&survivor_definitions)?;

        for (index, reason) in conflicted {
            let loser = &admitted[index];
            self.ledger
                .update_status(
                    loser.intent_id,
                    IntentStatus::Blocked,
                    Some(reason.clone()),
                    now,
                )
                .await?;
            info!(action = %loser.definition.canonical_name, %reason, "Action blocked by conflict");
            outcome
                .blocked
                .push((loser.definition.canonical_name.clone(), reason));
        }

        for position in order {
            let entry = &admitted[survivors[position]];
            self.enqueue(state, entry, payload, now, &mut outcome).await?;
        }

        let report = match &self.executor {
            Some(executor) => executor.run_on_state(state, &payload.brand_id, now).await?,
            None => {
                if !state.queue_paused {
                    let head = self.head_definition(state, &payload.brand_id).await?;
                    activate_head(state, head.as_ref(), now, &self.config.queue);
                }
                ExecutionReport::default()
            }
        };

        wires::record_turn(state, payload.turn_number, &sweep.expired_action_names);
        let head = self.head_definition(state, &payload.brand_id).await?;
        wires::recompute(state, head.as_ref());

        debug!(
            session_id = %payload.session_id,
            queued = outcome.queued.len(),
            blocked = outcome.blocked.len(),
            skipped = outcome.skipped.len(),
            failed = outcome.failed.len(),
            "Turn admitted"
        );
        Ok(compose_response(sweep, &outcome, &report, state))
    }

    /// Fail the non-final ledger rows of an aborted turn.
    ///
    /// Best effort: when the ledger is itself the cause of the abort the
    /// rows are logged and left as they are.
    async fn fail_turn_intents(&self, turn_intents: &[Uuid], cause: &EngineError, now: Timestamp) {
        let reason = match cause {
            EngineError::Configuration(e) => format!("configuration_error:{}", e),
            other => format!("turn_aborted:{}", other),
        };
        for &intent_id in turn_intents {
            let status = match self.ledger.get(intent_id).await {
                Ok(intent) => intent.status,
                Err(e) => {
                    warn!(%intent_id, error = %e, "Could not read intent of aborted turn");
                    continue;
                }
            };
            if status.is_terminal() || status == IntentStatus::Blocked {
                continue;
            }
            if let Err(e) = self
                .ledger
                .update_status(intent_id, IntentStatus::Failed, Some(reason.clone()), now)
                .await
            {
                warn!(%intent_id, error = %e, "Could not fail intent of aborted turn");
            }
        }
    }

    /// Resolve an intent to a catalog action.
    ///
    /// Candidates go through the matcher against the instance's active
    /// actions; a bare canonical intent is looked up by name.
    async fn match_intent(
        &self,
        intent: &DetectedIntent,
        payload: &TurnPayload,
        instance_actions: &mut Option<Vec<ActionDefinition>>,
    ) -> Result<MatchOutcome, EngineError> {
        let candidates: Vec<String> = intent
            .canonical_intent_candidates
            .iter()
            .filter(|c| !c.trim().is_empty())
            .cloned()
            .collect();

        if !candidates.is_empty() {
            if instance_actions.is_none() {
                *instance_actions = Some(
                    self.catalog
                        .active_actions_for(&payload.instance_id)
                        .await
                        .map_err(EngineError::Catalog)?,
                );
            }
            let actions = instance_actions.as_deref().unwrap_or_default();
            return Ok(self.matcher.resolve(&candidates, actions));
        }

        let name = intent.canonical_intent.as_deref().unwrap_or("").trim();
        let found = self
            .catalog
            .by_canonical_name(name, &payload.brand_id)
            .await
            .map_err(EngineError::Catalog)?;
        Ok(match found {
            Some(action) => MatchOutcome {
                action: Some(action),
                match_type: MatchType::Exact,
                candidate: Some(name.to_string()),
                score: 1.0,
            },
            None => MatchOutcome::not_found(),
        })
    }

    /// Append an admitted action, or its workflow members, to the queue.
    async fn enqueue(
        &self,
        state: &mut SessionState,
        entry: &Admitted,
        payload: &TurnPayload,
        now: Timestamp,
        outcome: &mut TurnOutcome,
    ) -> Result<(), EngineError> {
        let definition = &entry.definition;

        if definition.is_workflow() {
            let ctx = ExpansionContext {
                session_id: &payload.session_id,
                user_id: &payload.user_id,
                brand_id: &payload.brand_id,
                turn_number: payload.turn_number,
                sequence_order: entry.sequence_order,
                now,
            };
            let expansion = self.workflows.expand(definition, &ctx).await?;
            if expansion.is_empty() {
                warn!(workflow = %definition.canonical_name, "Workflow has no members");
                self.ledger
                    .update_status(
                        entry.intent_id,
                        IntentStatus::Failed,
                        Some("workflow_not_found".to_string()),
                        now,
                    )
                    .await?;
                outcome.failed.push(definition.canonical_name.clone());
                return Ok(());
            }
            self.ledger
                .update_status(entry.intent_id, IntentStatus::Queued, None, now)
                .await?;
            for mut member in expansion.entries {
                member.sequence = state.action_queue.len() as u32;
                outcome.queued.push(member.canonical_action.clone());
                state.action_queue.push(member);
            }
            info!(workflow = %definition.canonical_name, skipped = ?expansion.skipped, "Workflow queued");
            return Ok(());
        }

        self.ledger
            .update_status(entry.intent_id, IntentStatus::Queued, None, now)
            .await?;
        let mut action = QueuedAction::new(
            definition.canonical_name.clone(),
            definition.action_type,
            ActionSource::IntentDetector,
            Some(entry.intent_id),
            now,
        );
        action.sequence = state.action_queue.len() as u32;
        action.priority = definition.priority;
        action.mode = entry.admission.mode;
        action.params_collected = entry.admission.params_collected.clone();
        action.params_missing = entry.admission.params_missing.clone();
        info!(action = %action.canonical_action, mode = ?action.mode, "Action queued");
        outcome.queued.push(action.canonical_action.clone());
        state.action_queue.push(action);
        Ok(())
    }

    async fn head_definition(
        &self,
        state: &SessionState,
        brand_id: &str,
    ) -> Result<Option<ActionDefinition>, EngineError> {
        match state.current_action() {
            Some(head) if !head.status.is_terminal() => self
                .catalog
                .by_canonical_name(&head.canonical_action, brand_id)
                .await
                .map_err(EngineError::Catalog),
            _ => Ok(None),
        }
    }
}

/// Name recorded in `previous_intents` and user-facing messages.
fn intent_label(intent: &DetectedIntent, matched: &MatchOutcome) -> String {
    if let Some(action) = &matched.action {
        return action.canonical_name.clone();
    }
    intent
        .canonical_intent
        .iter()
        .chain(intent.canonical_intent_candidates.iter())
        .map(|c| c.trim())
        .find(|c| !c.is_empty())
        .unwrap_or(intent.intent_type.as_str())
        .to_string()
}

fn compose_response(
    sweep: &SweepSummary,
    outcome: &TurnOutcome,
    report: &ExecutionReport,
    state: &SessionState,
) -> TurnResponse {
    let mut lines: Vec<String> = Vec::new();

    if sweep.should_notify {
        lines.push(format!(
            "Expired after waiting too long: {}.",
            sweep.expired_action_names.join(", ")
        ));
    }
    for name in &outcome.failed {
        lines.push(format!("I couldn't find an action for '{}'.", name));
    }
    for (name, reason) in &outcome.blocked {
        lines.push(format!("Can't do {} right now ({}).", name, reason));
    }
    for (name, reason) in &outcome.skipped {
        lines.push(format!("Skipped {} ({}).", name, reason));
    }
    if !outcome.queued.is_empty() {
        lines.push(format!("Queued: {}.", outcome.queued.join(", ")));
    }
    if !report.completed.is_empty() {
        lines.push(format!("Done: {}.", report.completed.join(", ")));
    }
    if !report.failed.is_empty() {
        lines.push(format!("Failed: {}.", report.failed.join(", ")));
    }
    if let Some(head) = state.current_action() {
        match head.status {
            QueuedActionStatus::CollectingParams => lines.push(format!(
                "To {} I still need: {}.",
                head.canonical_action,
                head.params_missing.join(", ")
            )),
            QueuedActionStatus::AwaitingConfirmation => {
                lines.push(format!("Please confirm {}.", head.canonical_action))
            }
            _ => {}
        }
    }
    if lines.is_empty() {
        lines.push("Nothing to do this turn.".to_string());
    }

    let nothing_admitted = outcome.queued.is_empty() && report.completed.is_empty();
    let status = if nothing_admitted && (!outcome.failed.is_empty() || outcome.dropped > 0) {
        TurnStatus::Error
    } else {
        TurnStatus::Completed
    };
    debug!(?status, "Turn response composed");

    TurnResponse {
        text: lines.join(" "),
        status,
        actions_completed: report.completed.clone(),
        actions_pending: state
            .active_actions()
            .map(|a| a.canonical_action.clone())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogDocument, InMemoryCatalog};
    use crate::executor::ActionHandler;
    use crate::ledger::InMemoryIntentLedger;
    use crate::queue::InMemorySessionStore;
    use crate::test_support::{member_user, seeded_intent, StubSchemaClient};
    use crate::types::{ActionMode, ActionOutcome, ActionType, Entities, Intent};
    use crate::users::InMemoryUsers;
    use crate::ActionError;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    const NOW: Timestamp = Timestamp(1_700_000_000);

    fn catalog() -> InMemoryCatalog {
        let document: CatalogDocument = serde_json::from_value(json!({
            "actions": [
                {"canonical_name": "apply_job", "synonyms": ["submit_job_application"],
                 "param_schema": {"job_id": {"required": true}},
                 "prereqs": {"prerequisite_actions": ["create_profile"]}},
                {"canonical_name": "create_profile"},
                {"canonical_name": "view_profile"},
                {"canonical_name": "subscribe_alerts",
                 "prereqs": {"opposite_action": "unsubscribe_alerts"}},
                {"canonical_name": "unsubscribe_alerts"},
                {"canonical_name": "delete_account", "confirmation": {"required": true},
                 "auth": {"requires_auth": true}},
                {"canonical_name": "onboarding", "action_type": "WORKFLOW",
                 "workflow": {"workflow_id": "wf_onboard"}},
                {"canonical_name": "verify_email",
                 "workflow": {"workflow_id": "wf_onboard", "sequence_number": 1}},
                {"canonical_name": "upload_cv",
                 "workflow": {"workflow_id": "wf_onboard", "sequence_number": 2}},
                {"canonical_name": "ghost_flow", "action_type": "WORKFLOW"}
            ],
            "schemas": [],
            "brands": [{"brand_id": "b1", "api_base_url": "https://api.example.com/"}]
        }))
        .unwrap();
        InMemoryCatalog::new(document)
    }

    struct Engine {
        ledger: Arc<InMemoryIntentLedger>,
        orchestrator: BrainOrchestrator,
    }

    fn engine() -> Engine {
        let catalog = Arc::new(catalog());
        let ledger = Arc::new(InMemoryIntentLedger::new());
        let deps = EngineDeps {
            catalog: catalog.clone(),
            users: Arc::new(InMemoryUsers::new([member_user("u1")])),
            ledger: ledger.clone(),
            sessions: Arc::new(InMemorySessionStore::new()),
            schema_registry: catalog,
            schema_client: Arc::new(StubSchemaClient::ok(json!({}))),
        };
        Engine {
            ledger,
            orchestrator: BrainOrchestrator::new(deps, &BrainConfig::default()),
        }
    }

    fn intent(candidates: &[&str], entities: Value) -> DetectedIntent {
        DetectedIntent {
            intent_type: "action".to_string(),
            canonical_intent: None,
            canonical_intent_candidates: candidates.iter().map(|c| c.to_string()).collect(),
            confidence: 0.9,
            entities: match entities {
                Value::Object(map) => map,
                _ => Entities::new(),
            },
            reasoning: None,
            sequence_order: None,
        }
    }

    fn turn(user: &str, turn_number: u32, intents: Vec<DetectedIntent>) -> TurnPayload {
        TurnPayload {
            session_id: "s1".to_string(),
            user_id: user.to_string(),
            instance_id: "i1".to_string(),
            brand_id: "b1".to_string(),
            turn_number,
            intents,
        }
    }

    async fn state(engine: &Engine) -> SessionState {
        engine.orchestrator.queue().snapshot("s1").await.unwrap()
    }

    #[tokio::test]
    async fn test_same_turn_prerequisite_ordered_first() {
        let engine = engine();
        let response = engine
            .orchestrator
            .process_turn_at(
                turn(
                    "u1",
                    1,
                    vec![
                        intent(&["create_profile"], json!({})),
                        intent(&["apply_job"], json!({"job_id": "J-1"})),
                    ],
                ),
                NOW,
            )
            .await
            .unwrap();
        assert_eq!(response.status, TurnStatus::Completed);
        assert_eq!(response.actions_pending, vec!["create_profile", "apply_job"]);
        assert!(response.actions_completed.is_empty());

        let state = state(&engine).await;
        assert_eq!(state.action_queue[1].params_collected["job_id"], "J-1");
        assert_eq!(state.action_queue[1].sequence, 1);
        assert_eq!(state.previous_intents, vec!["create_profile", "apply_job"]);
        assert_eq!(state.active_task.as_deref(), Some("create_profile"));

        let history = engine.ledger.session_history("s1").await.unwrap();
        assert!(history.iter().all(|i| i.status == IntentStatus::Queued));
    }

    #[tokio::test]
    async fn test_dependent_first_in_payload_is_still_ordered_after() {
        let engine = engine();
        let mut first = intent(&["apply_job"], json!({"job_id": "J-1"}));
        first.sequence_order = Some(2);
        let mut second = intent(&["create_profile"], json!({}));
        second.sequence_order = Some(1);
        let response = engine
            .orchestrator
            .process_turn_at(turn("u1", 1, vec![first, second]), NOW)
            .await
            .unwrap();
        assert_eq!(response.actions_pending, vec!["create_profile", "apply_job"]);
    }

    #[tokio::test]
    async fn test_missing_prerequisite_blocks() {
        let engine = engine();
        let response = engine
            .orchestrator
            .process_turn_at(turn("u1", 1, vec![intent(&["apply_job"], json!({}))]), NOW)
            .await
            .unwrap();
        assert!(response.actions_pending.is_empty());
        assert!(response.text.contains("missing_prerequisite:create_profile"));
        let history = engine.ledger.session_history("s1").await.unwrap();
        assert_eq!(history[0].status, IntentStatus::Blocked);
    }

    #[tokio::test]
    async fn test_unknown_intent_fails_without_aborting_turn() {
        let engine = engine();
        let response = engine
            .orchestrator
            .process_turn_at(
                turn(
                    "u1",
                    1,
                    vec![
                        intent(&["launch_rocket"], json!({})),
                        intent(&["view_profile"], json!({})),
                    ],
                ),
                NOW,
            )
            .await
            .unwrap();
        assert_eq!(response.status, TurnStatus::Completed);
        assert_eq!(response.actions_pending, vec!["view_profile"]);

        let history = engine.ledger.session_history("s1").await.unwrap();
        assert_eq!(history[0].status, IntentStatus::Failed);
        assert_eq!(history[0].blocked_reason.as_deref(), Some("action_not_found"));
        assert_eq!(history[0].match_type, Some(MatchType::NotFound));
    }

    #[tokio::test]
    async fn test_all_intents_failing_is_error_status() {
        let engine = engine();
        let mut invalid = intent(&["view_profile"], json!({}));
        invalid.confidence = 1.5;
        let response = engine
            .orchestrator
            .process_turn_at(
                turn("u1", 1, vec![invalid, intent(&["launch_rocket"], json!({}))]),
                NOW,
            )
            .await
            .unwrap();
        assert_eq!(response.status, TurnStatus::Error);
        // The invalid intent never reaches the ledger.
        assert_eq!(engine.ledger.session_history("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_canonical_intent_without_candidates() {
        let engine = engine();
        let mut direct = intent(&[], json!({}));
        direct.canonical_intent = Some("view_profile".to_string());
        engine
            .orchestrator
            .process_turn_at(turn("u1", 1, vec![direct]), NOW)
            .await
            .unwrap();
        let history = engine.ledger.session_history("s1").await.unwrap();
        assert_eq!(history[0].match_type, Some(MatchType::Exact));
        assert_eq!(history[0].status, IntentStatus::Queued);
    }

    #[tokio::test]
    async fn test_directional_conflict_blocks_later_member() {
        let engine = engine();
        let response = engine
            .orchestrator
            .process_turn_at(
                turn(
                    "u1",
                    1,
                    vec![
                        intent(&["subscribe_alerts"], json!({})),
                        intent(&["unsubscribe_alerts"], json!({})),
                    ],
                ),
                NOW,
            )
            .await
            .unwrap();
        assert_eq!(response.actions_pending, vec!["subscribe_alerts"]);
        let history = engine.ledger.session_history("s1").await.unwrap();
        assert_eq!(history[1].status, IntentStatus::Blocked);
        assert_eq!(
            history[1].blocked_reason.as_deref(),
            Some("conflicts_with:subscribe_alerts")
        );

        // Only the earlier action's opposite_action is consulted.
        let engine = self::engine();
        let response = engine
            .orchestrator
            .process_turn_at(
                turn(
                    "u1",
                    1,
                    vec![
                        intent(&["unsubscribe_alerts"], json!({})),
                        intent(&["subscribe_alerts"], json!({})),
                    ],
                ),
                NOW,
            )
            .await
            .unwrap();
        assert_eq!(
            response.actions_pending,
            vec!["unsubscribe_alerts", "subscribe_alerts"]
        );
    }

    #[tokio::test]
    async fn test_workflow_expands_members() {
        let engine = engine();
        let response = engine
            .orchestrator
            .process_turn_at(turn("u1", 1, vec![intent(&["onboarding"], json!({}))]), NOW)
            .await
            .unwrap();
        assert_eq!(response.actions_pending, vec!["verify_email", "upload_cv"]);
        let state = state(&engine).await;
        assert!(state
            .action_queue
            .iter()
            .all(|a| a.source == ActionSource::Workflow && a.intent_id.is_none()));
    }

    #[tokio::test]
    async fn test_workflow_without_members_fails() {
        let engine = engine();
        engine
            .orchestrator
            .process_turn_at(turn("u1", 1, vec![intent(&["ghost_flow"], json!({}))]), NOW)
            .await
            .unwrap();
        let history = engine.ledger.session_history("s1").await.unwrap();
        assert_eq!(history[0].status, IntentStatus::Failed);
        assert_eq!(history[0].blocked_reason.as_deref(), Some("workflow_not_found"));
    }

    #[tokio::test]
    async fn test_collect_params_head_sets_wires() {
        let engine = engine();
        engine
            .orchestrator
            .process_turn_at(
                turn(
                    "u1",
                    3,
                    vec![
                        intent(&["create_profile"], json!({})),
                        intent(&["apply_job"], json!({})),
                    ],
                ),
                NOW,
            )
            .await
            .unwrap();
        // create_profile is at the head and needs nothing, so nothing waits yet.
        let state = state(&engine).await;
        assert!(!state.expecting_response);
        assert_eq!(state.action_queue[1].mode, ActionMode::CollectParams);
        assert_eq!(state.conversation_context["turn_number"], 3);
        assert_eq!(
            state.conversation_context["pending_actions"],
            json!(["create_profile", "apply_job"])
        );
    }

    #[tokio::test]
    async fn test_confirmation_head_awaits_without_executor() {
        let engine = engine();
        let response = engine
            .orchestrator
            .process_turn_at(turn("u1", 1, vec![intent(&["delete_account"], json!({}))]), NOW)
            .await
            .unwrap();
        assert!(response.text.contains("Please confirm delete_account"));
        let state = state(&engine).await;
        assert_eq!(state.action_queue[0].status, QueuedActionStatus::AwaitingConfirmation);
        assert_eq!(state.action_queue[0].timeout_at, Some(NOW.plus_secs(60)));
        assert!(state.expecting_response);
    }

    #[tokio::test]
    async fn test_sweep_runs_before_admission() {
        let engine = engine();
        engine
            .orchestrator
            .process_turn_at(turn("u1", 1, vec![intent(&["delete_account"], json!({}))]), NOW)
            .await
            .unwrap();

        let later = Timestamp(NOW.0 + 61);
        let response = engine
            .orchestrator
            .process_turn_at(turn("u1", 2, vec![intent(&["delete_account"], json!({}))]), later)
            .await
            .unwrap();
        assert!(response.text.contains("Expired after waiting too long: delete_account"));
        // The expired entry no longer counts as queued, so it is admitted again.
        assert_eq!(response.actions_pending, vec!["delete_account"]);

        let state = state(&engine).await;
        assert_eq!(state.action_history.len(), 1);
        assert_eq!(
            state.conversation_context["last_expired"],
            json!(["delete_account"])
        );
        let history = engine.ledger.session_history("s1").await.unwrap();
        assert_eq!(history[0].status, IntentStatus::Cancelled);
        assert_eq!(
            history[0].blocked_reason.as_deref(),
            Some("expired:timeout_in_awaiting_confirmation")
        );
    }

    #[tokio::test]
    async fn test_cycle_aborts_turn_without_commit() {
        let document: CatalogDocument = serde_json::from_value(json!({
            "actions": [
                {"canonical_name": "a", "limits": {"allow_multiple": true},
                 "prereqs": {"prerequisite_actions": ["b"]}},
                {"canonical_name": "b", "limits": {"allow_multiple": true},
                 "prereqs": {"prerequisite_actions": ["a"]}}
            ]
        }))
        .unwrap();
        let catalog = Arc::new(InMemoryCatalog::new(document));
        let ledger = Arc::new(InMemoryIntentLedger::new());
        ledger
            .import(vec![
                seeded_intent("s1", "u1", "a", IntentStatus::Completed, Timestamp(NOW.0 - 100)),
                seeded_intent("s1", "u1", "b", IntentStatus::Completed, Timestamp(NOW.0 - 90)),
            ])
            .unwrap();
        let orchestrator = BrainOrchestrator::new(
            EngineDeps {
                catalog: catalog.clone(),
                users: Arc::new(InMemoryUsers::new([member_user("u1")])),
                ledger: ledger.clone(),
                sessions: Arc::new(InMemorySessionStore::new()),
                schema_registry: catalog,
                schema_client: Arc::new(StubSchemaClient::ok(json!({}))),
            },
            &BrainConfig::default(),
        );

        let err = orchestrator
            .process_turn_at(
                turn("u1", 5, vec![intent(&["a"], json!({})), intent(&["b"], json!({}))]),
                NOW,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));

        let state = orchestrator.queue().snapshot("s1").await.unwrap();
        assert_eq!(state.version, 0);
        assert!(state.action_queue.is_empty());
    }

    struct Succeed;

    #[async_trait]
    impl ActionHandler for Succeed {
        fn action_type(&self) -> ActionType {
            ActionType::SystemApi
        }

        async fn execute(
            &self,
            _action: &QueuedAction,
            _definition: &ActionDefinition,
        ) -> Result<ActionOutcome, ActionError> {
            Ok(ActionOutcome {
                success: true,
                message: "ok".to_string(),
                output: None,
            })
        }

        fn describe(&self, action: &QueuedAction) -> String {
            action.canonical_action.clone()
        }
    }

    #[tokio::test]
    async fn test_executor_runs_ready_actions_in_turn() {
        let engine = engine();
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Succeed));
        let Engine {
            ledger,
            orchestrator,
        } = engine;
        let orchestrator = orchestrator.with_executor(registry);

        let response = orchestrator
            .process_turn_at(
                turn(
                    "u1",
                    1,
                    vec![
                        intent(&["create_profile"], json!({})),
                        intent(&["apply_job"], json!({})),
                    ],
                ),
                NOW,
            )
            .await
            .unwrap();
        assert_eq!(response.actions_completed, vec!["create_profile"]);
        assert_eq!(response.actions_pending, vec!["apply_job"]);
        assert!(response.text.contains("I still need: job_id"));

        let state = orchestrator.queue().snapshot("s1").await.unwrap();
        assert_eq!(state.current_action_index, 1);
        assert!(state.expecting_response);
        assert_eq!(state.answer_sheet.as_ref().unwrap().action, "apply_job");

        let history = ledger.session_history("s1").await.unwrap();
        assert_eq!(history[0].status, IntentStatus::Completed);
        assert_eq!(history[1].status, IntentStatus::Queued);

        // Next turn: the completed entry is compacted into history.
        orchestrator
            .process_turn_at(turn("u1", 2, vec![]), Timestamp(NOW.0 + 5))
            .await
            .unwrap();
        let state = orchestrator.queue().snapshot("s1").await.unwrap();
        assert_eq!(state.current_action_index, 0);
        assert_eq!(state.action_history[0].canonical_action, "create_profile");
        assert_eq!(state.current_action().unwrap().canonical_action, "apply_job");
    }

    fn engine_from(document: Value) -> Engine {
        let document: CatalogDocument = serde_json::from_value(document).unwrap();
        let catalog = Arc::new(InMemoryCatalog::new(document));
        let ledger = Arc::new(InMemoryIntentLedger::new());
        let deps = EngineDeps {
            catalog: catalog.clone(),
            users: Arc::new(InMemoryUsers::new([member_user("u1")])),
            ledger: ledger.clone(),
            sessions: Arc::new(InMemorySessionStore::new()),
            schema_registry: catalog,
            schema_client: Arc::new(StubSchemaClient::ok(json!({}))),
        };
        Engine {
            ledger,
            orchestrator: BrainOrchestrator::new(deps, &BrainConfig::default()),
        }
    }

    #[tokio::test]
    async fn test_replayed_turns_measure_limits_on_turn_clock() {
        let Engine {
            ledger,
            orchestrator,
        } = engine_from(json!({
            "actions": [
                {"canonical_name": "refresh_feed",
                 "limits": {"allow_multiple": true, "min_interval_seconds": 60}}
            ]
        }));
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Succeed));
        let orchestrator = orchestrator.with_executor(registry);
        let refresh = || vec![intent(&["refresh_feed"], json!({}))];

        let response = orchestrator
            .process_turn_at(turn("u1", 1, refresh()), NOW)
            .await
            .unwrap();
        assert_eq!(response.actions_completed, vec!["refresh_feed"]);
        let history = ledger.session_history("s1").await.unwrap();
        assert_eq!(history[0].created_at, NOW);
        assert_eq!(history[0].completed_at, Some(NOW));

        let response = orchestrator
            .process_turn_at(turn("u1", 2, refresh()), NOW.plus_secs(30))
            .await
            .unwrap();
        assert!(response.actions_completed.is_empty());
        assert!(response
            .text
            .contains("min_interval_not_elapsed (30s remaining)"));

        let response = orchestrator
            .process_turn_at(turn("u1", 3, refresh()), NOW.plus_secs(3_600))
            .await
            .unwrap();
        assert_eq!(response.actions_completed, vec!["refresh_feed"]);
    }

    #[tokio::test]
    async fn test_aborted_turn_keeps_ledger_in_step_with_queue() {
        let engine = engine_from(json!({
            "actions": [
                {"canonical_name": "delete_account", "confirmation": {"required": true}},
                {"canonical_name": "a", "limits": {"allow_multiple": true},
                 "prereqs": {"prerequisite_actions": ["b"]}},
                {"canonical_name": "b", "limits": {"allow_multiple": true},
                 "prereqs": {"prerequisite_actions": ["a"]}}
            ]
        }));
        engine
            .ledger
            .import(vec![
                seeded_intent("s1", "u1", "a", IntentStatus::Completed, Timestamp(NOW.0 - 100)),
                seeded_intent("s1", "u1", "b", IntentStatus::Completed, Timestamp(NOW.0 - 90)),
            ])
            .unwrap();
        engine
            .orchestrator
            .process_turn_at(turn("u1", 1, vec![intent(&["delete_account"], json!({}))]), NOW)
            .await
            .unwrap();

        // The confirmation window has lapsed, but the turn aborts on the cycle.
        let err = engine
            .orchestrator
            .process_turn_at(
                turn("u1", 2, vec![intent(&["a"], json!({})), intent(&["b"], json!({}))]),
                NOW.plus_secs(61),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));

        let state = state(&engine).await;
        assert_eq!(state.action_queue[0].status, QueuedActionStatus::AwaitingConfirmation);
        assert!(state.action_history.is_empty());

        let history = engine.ledger.session_history("s1").await.unwrap();
        let pending = history
            .iter()
            .find(|i| i.canonical_action.as_deref() == Some("delete_account"))
            .unwrap();
        assert_eq!(pending.status, IntentStatus::Queued);

        let aborted: Vec<&Intent> = history.iter().filter(|i| i.turn_number == 2).collect();
        assert_eq!(aborted.len(), 2);
        for row in aborted {
            assert_eq!(row.status, IntentStatus::Failed);
            assert!(row
                .blocked_reason
                .as_deref()
                .unwrap()
                .starts_with("configuration_error:Cyclic prerequisites"));
        }

        // The next clean turn expires the entry and only then cancels its intent.
        let response = engine
            .orchestrator
            .process_turn_at(turn("u1", 3, vec![]), NOW.plus_secs(62))
            .await
            .unwrap();
        assert!(response.text.contains("Expired after waiting too long: delete_account"));
        let history = engine.ledger.session_history("s1").await.unwrap();
        let expired = history
            .iter()
            .find(|i| i.canonical_action.as_deref() == Some("delete_account"))
            .unwrap();
        assert_eq!(expired.status, IntentStatus::Cancelled);
        assert_eq!(expired.updated_at, NOW.plus_secs(62));
    }
}
