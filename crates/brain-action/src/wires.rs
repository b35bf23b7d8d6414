//! Session wires handed to the next turn's intent classifier.
//!
//! Five of the six wires are derived from the queue head after every turn.
//! `previous_intents` is appended to by the orchestrator as intents arrive.

use serde_json::{json, Value};

use crate::definition::ActionDefinition;
use crate::types::{AnswerSheet, AnswerSheetParam, QueuedActionStatus, SessionState};

/// Parameter name used for yes/no confirmation questions.
pub const CONFIRMATION_PARAM: &str = "confirmation";

/// Recompute the derived wires from the queue.
///
/// `head_definition` is the catalog entry for the current head, used for
/// enumerated parameter options.
pub fn recompute(state: &mut SessionState, head_definition: Option<&ActionDefinition>) {
    let head = state.current_action().filter(|a| !a.status.is_terminal()).cloned();

    state.answer_sheet = head.as_ref().and_then(|action| match action.status {
        QueuedActionStatus::CollectingParams => Some(AnswerSheet {
            action: action.canonical_action.clone(),
            parameters: action
                .params_missing
                .iter()
                .map(|name| AnswerSheetParam {
                    name: name.clone(),
                    options: head_definition
                        .and_then(|def| def.param_schema.get(name))
                        .map(|spec| spec.enum_values.clone())
                        .unwrap_or_default(),
                })
                .collect(),
        }),
        QueuedActionStatus::AwaitingConfirmation => Some(AnswerSheet {
            action: action.canonical_action.clone(),
            parameters: vec![AnswerSheetParam {
                name: CONFIRMATION_PARAM.to_string(),
                options: vec!["yes".to_string(), "no".to_string()],
            }],
        }),
        _ => None,
    });
    state.expecting_response = state.answer_sheet.is_some();
    state.active_task = head.as_ref().map(|a| a.canonical_action.clone());

    state.available_signals.clear();
    if let Some(sheet) = &state.answer_sheet {
        for param in &sheet.parameters {
            state.available_signals.insert(param.name.clone());
            state.available_signals.extend(param.options.iter().cloned());
        }
    }

    let pending: Vec<&str> = state
        .active_actions()
        .map(|a| a.canonical_action.as_str())
        .collect();
    let update = json!({ "pending_actions": pending });
    merge_context(state, update);
}

/// Record the turn number and the actions expired at its start.
pub fn record_turn(state: &mut SessionState, turn_number: u32, expired: &[String]) {
    merge_context(
        state,
        json!({
            "turn_number": turn_number,
            "last_expired": expired,
        }),
    );
}

/// Overwrite top-level keys of `conversation_context`, keeping the others.
fn merge_context(state: &mut SessionState, update: Value) {
    match (&mut state.conversation_context, update) {
        (Value::Object(context), Value::Object(fields)) => context.extend(fields),
        (context, update) => *context = update,
    }
}
