//! Queue expiry.
//!
//! Runs at the start of every turn. An entry expires when its state deadline
//! has passed (`collecting_params`, `awaiting_confirmation`) or when it has
//! been in the queue longer than the absolute maximum age.
//!
//! Sweeping only touches the leased session state. The caller cancels the
//! originating ledger intents once that state has been committed, so an
//! aborted turn leaves queue and ledger in agreement.

use std::sync::Arc;

use brain_core::config::QueueConfig;
use brain_core::types::Timestamp;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::IntentLedger;
use crate::types::{IntentStatus, QueuedAction, QueuedActionStatus, SessionState};

/// One entry retired by a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepOutcome {
    pub action_id: Uuid,
    pub canonical_action: String,
    pub intent_id: Option<Uuid>,
    pub reason: String,
}

/// What the orchestrator reports back to the user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepSummary {
    pub cleaned_count: usize,
    pub expired_action_names: Vec<String>,
    pub should_notify: bool,
}

impl SweepSummary {
    pub fn from_outcomes(outcomes: &[SweepOutcome]) -> Self {
        Self {
            cleaned_count: outcomes.len(),
            expired_action_names: outcomes.iter().map(|o| o.canonical_action.clone()).collect(),
            should_notify: !outcomes.is_empty(),
        }
    }
}

pub struct TimeoutSweeper {
    ledger: Arc<dyn IntentLedger>,
    max_queue_age_secs: i64,
    collecting_params_timeout_secs: u64,
    awaiting_confirmation_timeout_secs: u64,
}

impl TimeoutSweeper {
    pub fn new(ledger: Arc<dyn IntentLedger>, config: &QueueConfig) -> Self {
        Self {
            ledger,
            max_queue_age_secs: config.max_queue_age_secs as i64,
            collecting_params_timeout_secs: config.collecting_params_timeout_secs,
            awaiting_confirmation_timeout_secs: config.awaiting_confirmation_timeout_secs,
        }
    }

    /// Timeout for a waiting state, if it has one.
    pub fn state_timeout(&self, status: QueuedActionStatus) -> Option<u64> {
        match status {
            QueuedActionStatus::CollectingParams => Some(self.collecting_params_timeout_secs),
            QueuedActionStatus::AwaitingConfirmation => {
                Some(self.awaiting_confirmation_timeout_secs)
            }
            _ => None,
        }
    }

    fn deadline(&self, action: &QueuedAction) -> Option<Timestamp> {
        action.timeout_at.or_else(|| {
            self.state_timeout(action.status)
                .map(|secs| action.last_activity_at.plus_secs(secs))
        })
    }

    fn expiry_reason(&self, action: &QueuedAction, now: Timestamp) -> Option<String> {
        if let Some(deadline) = self.deadline(action) {
            if now > deadline {
                return Some(format!("timeout_in_{}", action.status));
            }
        }
        if now.seconds_since(action.created_at) > self.max_queue_age_secs {
            return Some("max_queue_age_exceeded".to_string());
        }
        None
    }

    /// Expire stale entries in place.
    ///
    /// Whenever the queue holds terminal entries they are moved to
    /// `action_history` and `current_action_index` resets to 0.
    pub fn sweep(&self, state: &mut SessionState, now: Timestamp) -> Vec<SweepOutcome> {
        let mut expired = Vec::new();
        for action in state
            .action_queue
            .iter_mut()
            .filter(|a| !a.status.is_terminal())
        {
            let Some(reason) = self.expiry_reason(action, now) else {
                continue;
            };
            action.status = QueuedActionStatus::Expired;
            action.expired_at = Some(now);
            action.expiry_reason = Some(reason.clone());
            action.last_activity_at = now;
            info!(action = %action.canonical_action, %reason, "Queued action expired");
            expired.push(SweepOutcome {
                action_id: action.id,
                canonical_action: action.canonical_action.clone(),
                intent_id: action.intent_id,
                reason,
            });
        }

        if state.action_queue.iter().any(|a| a.status.is_terminal()) {
            let (retired, active): (Vec<_>, Vec<_>) = std::mem::take(&mut state.action_queue)
                .into_iter()
                .partition(|a| a.status.is_terminal());
            state.action_history.extend(retired);
            state.action_queue = active;
            state.current_action_index = 0;
        }
        expired
    }

    /// Cancel the ledger intents behind expired entries.
    ///
    /// A failed update is logged and the rest are still attempted.
    pub async fn cancel_expired_intents(&self, outcomes: &[SweepOutcome], at: Timestamp) {
        for outcome in outcomes {
            let Some(intent_id) = outcome.intent_id else {
                continue;
            };
            if let Err(e) = self
                .ledger
                .update_status(
                    intent_id,
                    IntentStatus::Cancelled,
                    Some(format!("expired:{}", outcome.reason)),
                    at,
                )
                .await
            {
                warn!(%intent_id, action = %outcome.canonical_action, error = %e, "Failed to cancel expired intent");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryIntentLedger;
    use crate::test_support::new_intent;
    use crate::types::{ActionSource, ActionType};

    const NOW: Timestamp = Timestamp(1_700_000_000);

    fn sweeper(ledger: Arc<InMemoryIntentLedger>) -> TimeoutSweeper {
        TimeoutSweeper::new(ledger, &QueueConfig::default())
    }

    fn entry(name: &str, status: QueuedActionStatus, age_secs: u64) -> QueuedAction {
        let created = Timestamp(NOW.0 - age_secs as i64);
        let mut action = QueuedAction::new(
            name.to_string(),
            ActionType::SystemApi,
            ActionSource::IntentDetector,
            None,
            created,
        );
        action.status = status;
        action
    }

    #[test]
    fn test_collecting_params_boundary() {
        let sweeper = sweeper(Arc::new(InMemoryIntentLedger::new()));
        let mut state = SessionState::default();
        state.action_queue = vec![
            entry("stale", QueuedActionStatus::CollectingParams, 301),
            entry("fresh", QueuedActionStatus::CollectingParams, 299),
            entry("edge", QueuedActionStatus::CollectingParams, 300),
        ];
        let expired = sweeper.sweep(&mut state, NOW);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].canonical_action, "stale");
        assert_eq!(expired[0].reason, "timeout_in_collecting_params");

        let active: Vec<&str> = state.action_queue.iter().map(|a| a.canonical_action.as_str()).collect();
        assert_eq!(active, vec!["fresh", "edge"]);
        assert_eq!(state.action_history.len(), 1);
        assert_eq!(state.action_history[0].status, QueuedActionStatus::Expired);
        assert_eq!(state.action_history[0].expired_at, Some(NOW));
    }

    #[test]
    fn test_explicit_timeout_at_wins() {
        let sweeper = sweeper(Arc::new(InMemoryIntentLedger::new()));
        let mut action = entry("confirm", QueuedActionStatus::AwaitingConfirmation, 10);
        action.timeout_at = Some(Timestamp(NOW.0 - 1));
        let mut state = SessionState::default();
        state.action_queue = vec![action];
        let expired = sweeper.sweep(&mut state, NOW);
        assert_eq!(expired[0].reason, "timeout_in_awaiting_confirmation");
    }

    #[test]
    fn test_awaiting_confirmation_uses_last_activity() {
        let sweeper = sweeper(Arc::new(InMemoryIntentLedger::new()));
        let mut action = entry("confirm", QueuedActionStatus::AwaitingConfirmation, 500);
        action.last_activity_at = Timestamp(NOW.0 - 59);
        let mut state = SessionState::default();
        state.action_queue = vec![action];
        assert!(sweeper.sweep(&mut state, NOW).is_empty());
        assert!(!sweeper.sweep(&mut state, Timestamp(NOW.0 + 2)).is_empty());
    }

    #[test]
    fn test_max_queue_age_applies_to_any_state() {
        let sweeper = sweeper(Arc::new(InMemoryIntentLedger::new()));
        let mut state = SessionState::default();
        state.action_queue = vec![
            entry("old", QueuedActionStatus::Queued, 1_801),
            entry("young", QueuedActionStatus::Queued, 1_799),
        ];
        let expired = sweeper.sweep(&mut state, NOW);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].reason, "max_queue_age_exceeded");
        assert_eq!(state.action_queue.len(), 1);
    }

    #[test]
    fn test_compaction_resets_index() {
        let sweeper = sweeper(Arc::new(InMemoryIntentLedger::new()));
        let mut state = SessionState::default();
        state.action_queue = vec![
            entry("done", QueuedActionStatus::Completed, 10),
            entry("next", QueuedActionStatus::Queued, 10),
        ];
        state.current_action_index = 1;
        assert!(sweeper.sweep(&mut state, NOW).is_empty());
        assert_eq!(state.current_action_index, 0);
        assert_eq!(state.current_action().unwrap().canonical_action, "next");
        assert_eq!(state.action_history[0].canonical_action, "done");
    }

    #[test]
    fn test_nothing_to_do_leaves_state_untouched() {
        let sweeper = sweeper(Arc::new(InMemoryIntentLedger::new()));
        let mut state = SessionState::default();
        state.action_queue = vec![entry("a", QueuedActionStatus::Queued, 10)];
        let before = state.clone();
        assert!(sweeper.sweep(&mut state, NOW).is_empty());
        assert_eq!(state, before);
    }

    #[tokio::test]
    async fn test_cancel_expired_intents_survives_ledger_failures() {
        let ledger = Arc::new(InMemoryIntentLedger::new());
        let sweeper = sweeper(ledger.clone());

        let intent_id = ledger.append(new_intent("s1", "apply_job"), NOW).await.unwrap();
        ledger
            .update_status(intent_id, IntentStatus::Queued, None, NOW)
            .await
            .unwrap();

        let mut unknown = entry("ghost", QueuedActionStatus::CollectingParams, 400);
        unknown.intent_id = Some(Uuid::new_v4());
        let mut tracked = entry("apply_job", QueuedActionStatus::CollectingParams, 400);
        tracked.intent_id = Some(intent_id);

        let mut state = SessionState::default();
        state.action_queue = vec![unknown, tracked];
        let outcomes = sweeper.sweep(&mut state, NOW);
        let summary = SweepSummary::from_outcomes(&outcomes);

        assert_eq!(summary.cleaned_count, 2);
        assert!(summary.should_notify);
        assert_eq!(summary.expired_action_names, vec!["ghost", "apply_job"]);

        // Sweeping alone leaves the ledger untouched.
        assert_eq!(ledger.get(intent_id).await.unwrap().status, IntentStatus::Queued);

        sweeper.cancel_expired_intents(&outcomes, NOW).await;
        let intent = ledger.get(intent_id).await.unwrap();
        assert_eq!(intent.status, IntentStatus::Cancelled);
        assert_eq!(intent.updated_at, NOW);
        assert_eq!(
            intent.blocked_reason.as_deref(),
            Some("expired:timeout_in_collecting_params")
        );
    }

    #[test]
    fn test_summary_without_expiries() {
        let sweeper = sweeper(Arc::new(InMemoryIntentLedger::new()));
        let mut state = SessionState::default();
        let outcomes = sweeper.sweep(&mut state, NOW);
        assert_eq!(SweepSummary::from_outcomes(&outcomes), SweepSummary::default());
    }
}
