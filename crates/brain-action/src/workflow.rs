//! Workflow expansion.
//!
//! A `WORKFLOW` action is replaced in the queue by its member actions, in
//! `sequence_number` order. Members whose skip conditions hold are logged on
//! the ledger as skipped and left out.

use std::sync::Arc;

use brain_core::types::Timestamp;
use tracing::info;

use crate::catalog::ActionCatalog;
use crate::definition::{ActionDefinition, SkipCondition};
use crate::eligibility::Admission;
use crate::error::EngineError;
use crate::ledger::IntentLedger;
use crate::schema::SchemaCompletenessChecker;
use crate::types::{ActionSource, Entities, IntentStatus, NewIntent, QueuedAction};

/// Session coordinates of the intent being expanded.
pub struct ExpansionContext<'a> {
    pub session_id: &'a str,
    pub user_id: &'a str,
    pub brand_id: &'a str,
    pub turn_number: u32,
    pub sequence_order: u32,
    pub now: Timestamp,
}

/// Queue entries produced for a workflow.
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    pub entries: Vec<QueuedAction>,
    pub skipped: Vec<String>,
}

impl Expansion {
    /// True when the workflow has no members at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.skipped.is_empty()
    }
}

pub struct WorkflowExpander {
    catalog: Arc<dyn ActionCatalog>,
    ledger: Arc<dyn IntentLedger>,
    schemas: Arc<SchemaCompletenessChecker>,
}

impl WorkflowExpander {
    pub fn new(
        catalog: Arc<dyn ActionCatalog>,
        ledger: Arc<dyn IntentLedger>,
        schemas: Arc<SchemaCompletenessChecker>,
    ) -> Self {
        Self {
            catalog,
            ledger,
            schemas,
        }
    }

    pub async fn expand(
        &self,
        workflow: &ActionDefinition,
        ctx: &ExpansionContext<'_>,
    ) -> Result<Expansion, EngineError> {
        let workflow_id = workflow
            .workflow
            .as_ref()
            .map(|w| w.workflow_id.as_str())
            .unwrap_or(workflow.canonical_name.as_str());
        let members = self
            .catalog
            .workflow_members(workflow_id, ctx.brand_id)
            .await
            .map_err(EngineError::Catalog)?;

        let mut expansion = Expansion::default();
        for member in members {
            if let Some(reason) = self.skip_reason(&member, ctx).await {
                self.log_skipped(&member, &reason, ctx).await?;
                expansion.skipped.push(member.canonical_name);
                continue;
            }

            let admission = Admission::for_entities(&member, &Entities::new());
            let mut entry = QueuedAction::new(
                member.canonical_name.clone(),
                member.action_type,
                ActionSource::Workflow,
                None,
                ctx.now,
            );
            entry.priority = member.priority;
            entry.mode = admission.mode;
            entry.params_missing = admission.params_missing;
            expansion.entries.push(entry);
        }

        info!(
            workflow = workflow_id,
            queued = expansion.entries.len(),
            skipped = expansion.skipped.len(),
            "Workflow expanded"
        );
        Ok(expansion)
    }

    async fn skip_reason(&self, member: &ActionDefinition, ctx: &ExpansionContext<'_>) -> Option<String> {
        for condition in &member.skip_if_conditions {
            match condition {
                SkipCondition::SchemaComplete { schema_key } => {
                    if self
                        .schemas
                        .is_schema_complete(schema_key, ctx.user_id, ctx.brand_id)
                        .await
                    {
                        return Some(format!("schema_{}_already_complete", schema_key));
                    }
                }
            }
        }
        None
    }

    async fn log_skipped(
        &self,
        member: &ActionDefinition,
        reason: &str,
        ctx: &ExpansionContext<'_>,
    ) -> Result<(), EngineError> {
        let intent = NewIntent {
            session_id: ctx.session_id.to_string(),
            user_id: ctx.user_id.to_string(),
            intent_type: "workflow_member".to_string(),
            canonical_action: Some(member.canonical_name.clone()),
            canonical_intent_candidates: vec![member.canonical_name.clone()],
            confidence: 1.0,
            turn_number: ctx.turn_number,
            sequence_order: ctx.sequence_order,
            entities: Entities::new(),
            reasoning: None,
        };
        let id = self.ledger.append(intent, ctx.now).await?;
        self.ledger
            .update_status(id, IntentStatus::Skipped, Some(reason.to_string()), ctx.now)
            .await?;
        info!(action = %member.canonical_name, reason, "Workflow member skipped");
        Ok(())
    }
}
