//! Redirect action handler.
//!
//! Resolves the action's `redirect_url` template against the collected
//! parameters and hands the URL back to the caller.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::definition::ActionDefinition;
use crate::error::ActionError;
use crate::executor::ActionHandler;
use crate::types::{ActionOutcome, ActionType, QueuedAction};

/// Handler for `REDIRECT` actions. Only `http://` and `https://` targets are allowed.
pub struct RedirectHandler;

impl RedirectHandler {
    fn resolve_url(action: &QueuedAction, definition: &ActionDefinition) -> Result<String, ActionError> {
        let template = definition.redirect_url.as_deref().unwrap_or("");
        if template.is_empty() {
            return Err(ActionError::InvalidPayload(format!(
                "{} has no redirect_url",
                definition.canonical_name
            )));
        }

        let mut url = template.to_string();
        for (name, value) in &action.params_collected {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            url = url.replace(&format!("{{{}}}", name), &text);
        }

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ActionError::InvalidPayload(format!(
                "Unsupported URL scheme. Only http:// and https:// are allowed, got: {}",
                url
            )));
        }
        if url.contains('{') {
            return Err(ActionError::InvalidPayload(format!(
                "Unresolved placeholder in redirect URL: {}",
                url
            )));
        }
        Ok(url)
    }
}

#[async_trait]
impl ActionHandler for RedirectHandler {
    fn action_type(&self) -> ActionType {
        ActionType::Redirect
    }

    async fn execute(
        &self,
        action: &QueuedAction,
        definition: &ActionDefinition,
    ) -> Result<ActionOutcome, ActionError> {
        let url = Self::resolve_url(action, definition)?;
        tracing::info!(action = %action.canonical_action, url = %url, "Redirect resolved");
        Ok(ActionOutcome {
            success: true,
            message: format!("Redirect to {}", url),
            output: Some(json!({ "redirect_url": url })),
        })
    }

    fn describe(&self, action: &QueuedAction) -> String {
        format!("Redirect for {}", action.canonical_action)
    }
}
