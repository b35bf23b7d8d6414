//! Admission gate for a single action.
//!
//! Checks run in a fixed order and the pipeline stops at the first failing
//! step:
//!
//! 1. already completed / already queued
//! 2. authorization (all four checks run, reasons accumulate)
//! 3. execution limits
//! 4. schema completeness
//! 5. prerequisites and conflicts
//! 6. parameter completeness (never blocks, only selects the mode)

use std::sync::Arc;

use brain_core::types::Timestamp;
use tracing::debug;

use crate::definition::ActionDefinition;
use crate::error::LedgerError;
use crate::ledger::IntentLedger;
use crate::schema::SchemaCompletenessChecker;
use crate::types::{ActionMode, Entities, Intent, IntentStatus, UserProfile};

/// Queue-entry shape for an admitted action.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub mode: ActionMode,
    pub params_collected: Entities,
    pub params_missing: Vec<String>,
}

impl Admission {
    /// Mode and parameters derived from the supplied entities.
    pub fn for_entities(action: &ActionDefinition, entities: &Entities) -> Self {
        let params_missing = action.missing_params(entities);
        let mode = if params_missing.is_empty() {
            ActionMode::Execute
        } else {
            ActionMode::CollectParams
        };
        Self {
            mode,
            params_collected: action.collected_params(entities),
            params_missing,
        }
    }
}

/// Admission decision. Rejections are expected outcomes, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Eligibility {
    Eligible(Admission),
    Blocked { reasons: Vec<String> },
    Skipped { reason: String },
}

impl Eligibility {
    /// Reason string recorded on the ledger; `None` when eligible.
    pub fn reason(&self) -> Option<String> {
        match self {
            Eligibility::Eligible(_) => None,
            Eligibility::Blocked { reasons } => Some(reasons.join("; ")),
            Eligibility::Skipped { reason } => Some(reason.clone()),
        }
    }
}

/// Everything about the session the pipeline needs, loaded once per turn.
pub struct AdmissionContext<'a> {
    pub session_id: &'a str,
    pub brand_id: &'a str,
    pub user: &'a UserProfile,
    /// Ledger rows for this session as of the start of the turn.
    pub session_history: &'a [Intent],
    /// Canonical names of non-terminal entries already in the queue.
    pub active_queue: &'a [String],
    /// Canonical names admitted earlier in the current turn.
    pub admitted_this_turn: &'a [String],
    pub now: Timestamp,
}

impl AdmissionContext<'_> {
    fn completed_in_session(&self, action: &str) -> bool {
        self.session_history.iter().any(|i| {
            i.status == IntentStatus::Completed && i.canonical_action.as_deref() == Some(action)
        })
    }

    fn admitted(&self, action: &str) -> bool {
        self.admitted_this_turn.iter().any(|a| a == action)
    }
}

pub struct EligibilityPipeline {
    ledger: Arc<dyn IntentLedger>,
    schemas: Arc<SchemaCompletenessChecker>,
}

impl EligibilityPipeline {
    pub fn new(ledger: Arc<dyn IntentLedger>, schemas: Arc<SchemaCompletenessChecker>) -> Self {
        Self { ledger, schemas }
    }

    /// Decide whether `action` may join the queue.
    ///
    /// Only a failing ledger read is an error.
    pub async fn evaluate(
        &self,
        action: &ActionDefinition,
        ctx: &AdmissionContext<'_>,
        entities: &Entities,
    ) -> Result<Eligibility, LedgerError> {
        let name = action.canonical_name.as_str();

        if let Some(reason) = duplicate_guard(action, ctx) {
            debug!(action = name, %reason, "Action skipped");
            return Ok(Eligibility::Skipped { reason });
        }

        let reasons = authorization(action, ctx.user);
        if !reasons.is_empty() {
            return Ok(blocked(name, "authorization", reasons));
        }

        let reasons = self.execution_limits(action, ctx).await?;
        if !reasons.is_empty() {
            return Ok(blocked(name, "limits", reasons));
        }

        if !action.required_schemas.is_empty() {
            let check = self
                .schemas
                .check_multiple(&action.required_schemas, &ctx.user.user_id, ctx.brand_id)
                .await;
            if !check.complete {
                return Ok(blocked(name, "schema", check.reasons));
            }
        }

        let reasons = prerequisites(action, ctx);
        if !reasons.is_empty() {
            return Ok(blocked(name, "prerequisites", reasons));
        }

        let admission = Admission::for_entities(action, entities);
        debug!(action = name, mode = ?admission.mode, missing = ?admission.params_missing, "Action eligible");
        Ok(Eligibility::Eligible(admission))
    }

    async fn execution_limits(
        &self,
        action: &ActionDefinition,
        ctx: &AdmissionContext<'_>,
    ) -> Result<Vec<String>, LedgerError> {
        let limits = &action.limits;
        let name = action.canonical_name.as_str();
        let mut reasons = Vec::new();

        if let Some(max) = limits.max_per_session {
            let prior = ctx
                .session_history
                .iter()
                .filter(|i| {
                    i.canonical_action.as_deref() == Some(name)
                        && matches!(i.status, IntentStatus::Completed | IntentStatus::Executing)
                })
                .count();
            let this_turn = ctx.admitted_this_turn.iter().filter(|a| *a == name).count();
            if prior + this_turn >= max as usize {
                reasons.push(format!("max_per_session_reached ({})", max));
            }
        }

        let needs_user_history = limits.max_per_day.is_some()
            || limits.min_interval_seconds.is_some()
            || !limits.is_repeatable;
        if !needs_user_history {
            return Ok(reasons);
        }

        let completions: Vec<Timestamp> = self
            .ledger
            .user_history(&ctx.user.user_id, name)
            .await?
            .iter()
            .filter(|i| i.status == IntentStatus::Completed)
            .map(|i| i.completed_at.unwrap_or(i.updated_at))
            .collect();

        if let Some(max) = limits.max_per_day {
            let day_start = ctx.now.utc_day_start();
            let today = completions.iter().filter(|t| **t >= day_start).count();
            if today >= max as usize {
                reasons.push(format!("max_per_day_reached ({})", max));
            }
        }

        if let Some(interval) = limits.min_interval_seconds {
            if let Some(last) = completions.iter().max() {
                let elapsed = ctx.now.seconds_since(*last);
                if elapsed < interval as i64 {
                    reasons.push(format!(
                        "min_interval_not_elapsed ({}s remaining)",
                        interval as i64 - elapsed
                    ));
                }
            }
        }

        if !limits.is_repeatable && !completions.is_empty() {
            reasons.push("not_repeatable".to_string());
        }

        Ok(reasons)
    }
}

fn blocked(action: &str, step: &str, reasons: Vec<String>) -> Eligibility {
    debug!(action, step, ?reasons, "Action blocked");
    Eligibility::Blocked { reasons }
}

fn duplicate_guard(action: &ActionDefinition, ctx: &AdmissionContext<'_>) -> Option<String> {
    if action.limits.allow_multiple {
        return None;
    }
    let name = action.canonical_name.as_str();
    if ctx.completed_in_session(name) {
        return Some("already_completed".to_string());
    }
    if ctx.active_queue.iter().any(|a| a == name) || ctx.admitted(name) {
        return Some("already_queued".to_string());
    }
    None
}

fn authorization(action: &ActionDefinition, user: &UserProfile) -> Vec<String> {
    let auth = &action.auth;
    let mut reasons = Vec::new();

    if auth.requires_auth && user.is_guest() {
        reasons.push("requires_authentication".to_string());
    }
    if let Some(min) = auth.min_trust_score {
        if user.trust_score < min {
            reasons.push(format!(
                "insufficient_trust_score ({} < {})",
                user.trust_score, min
            ));
        }
    }
    if !auth.allowed_tiers.is_empty() && !auth.allowed_tiers.contains(&user.tier) {
        reasons.push(format!("tier_not_allowed:{}", user.tier));
    }
    if auth.blocked_tiers.contains(&user.tier) {
        reasons.push(format!("tier_blocked:{}", user.tier));
    }
    reasons
}

/// Prerequisites admitted earlier in the same turn count as satisfied.
fn prerequisites(action: &ActionDefinition, ctx: &AdmissionContext<'_>) -> Vec<String> {
    let mut reasons = Vec::new();
    for prereq in &action.prereqs.prerequisite_actions {
        if !ctx.completed_in_session(prereq) && !ctx.admitted(prereq) {
            reasons.push(format!("missing_prerequisite:{}", prereq));
        }
    }
    for conflict in &action.prereqs.conflicting_actions {
        if ctx.completed_in_session(conflict) {
            reasons.push(format!("conflicting_action_completed:{}", conflict));
        }
    }
    reasons
}
