//! Structured action definitions.
//!
//! Each concern of an action's configuration (authorization, limits,
//! prerequisites, parameters, retries, confirmation, workflow membership)
//! gets its own typed section, parsed once when the catalog loads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{ActionType, Entities};

/// A cataloged action, scoped to an instance and brand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub canonical_name: String,
    #[serde(default)]
    pub action_type: ActionType,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub brand_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub prereqs: PrereqConfig,
    #[serde(default)]
    pub param_schema: BTreeMap<String, ParamSpec>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub workflow: Option<WorkflowMembership>,
    #[serde(default)]
    pub required_schemas: Vec<SchemaDependency>,
    #[serde(default)]
    pub skip_if_conditions: Vec<SkipCondition>,
    /// Target for `REDIRECT` actions. `{param}` placeholders are filled from collected params.
    #[serde(default)]
    pub redirect_url: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ActionDefinition {
    /// A definition with every optional section at its default.
    pub fn new(canonical_name: &str, action_type: ActionType) -> Self {
        Self {
            canonical_name: canonical_name.to_string(),
            action_type,
            instance_id: None,
            brand_id: None,
            is_active: true,
            synonyms: Vec::new(),
            priority: 0,
            auth: AuthConfig::default(),
            limits: LimitsConfig::default(),
            prereqs: PrereqConfig::default(),
            param_schema: BTreeMap::new(),
            retry_policy: None,
            confirmation: ConfirmationConfig::default(),
            workflow: None,
            required_schemas: Vec::new(),
            skip_if_conditions: Vec::new(),
            redirect_url: None,
        }
    }

    pub fn is_workflow(&self) -> bool {
        self.action_type == ActionType::Workflow
    }

    /// Required parameters absent or null in `entities`, in schema order.
    pub fn missing_params(&self, entities: &Entities) -> Vec<String> {
        self.param_schema
            .iter()
            .filter(|(_, spec)| spec.required)
            .filter(|(name, _)| !entities.get(*name).is_some_and(|v| !v.is_null()))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// The subset of `entities` this action declares as parameters.
    pub fn collected_params(&self, entities: &Entities) -> Entities {
        entities
            .iter()
            .filter(|(name, value)| self.param_schema.contains_key(*name) && !value.is_null())
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Attempts allowed by the retry policy, or `default` when none is set.
    pub fn max_attempts(&self, default: u32) -> u32 {
        self.retry_policy
            .as_ref()
            .map(|p| p.max_attempts)
            .unwrap_or(default)
            .max(1)
    }
}

/// Who may run the action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub requires_auth: bool,
    pub min_trust_score: Option<f64>,
    /// Empty means every tier is allowed.
    pub allowed_tiers: Vec<String>,
    pub blocked_tiers: Vec<String>,
}

/// How often the action may run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub is_repeatable: bool,
    pub allow_multiple: bool,
    pub max_per_session: Option<u32>,
    pub max_per_day: Option<u32>,
    pub min_interval_seconds: Option<u64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            is_repeatable: true,
            allow_multiple: false,
            max_per_session: None,
            max_per_day: None,
            min_interval_seconds: None,
        }
    }
}

/// Ordering and exclusion rules against other actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrereqConfig {
    pub prerequisite_actions: Vec<String>,
    pub conflicting_actions: Vec<String>,
    /// Single action this one cancels out when both appear in a turn.
    pub opposite_action: Option<String>,
}

/// One declared parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamSpec {
    pub required: bool,
    #[serde(rename = "enum")]
    pub enum_values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub required: bool,
    pub prompt: Option<String>,
}

/// Position of an action inside a workflow.
///
/// On a `WORKFLOW` action, `workflow_id` names the workflow it expands to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMembership {
    pub workflow_id: String,
    #[serde(default)]
    pub sequence_number: u32,
    #[serde(default)]
    pub parallel_group: Option<String>,
}

/// External data an action needs before it may run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDependency {
    pub schema_key: String,
    /// Empty falls back to the schema definition's own required fields.
    #[serde(default)]
    pub required_fields: Vec<String>,
}

/// Condition under which a workflow member is left out of the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SkipCondition {
    SchemaComplete { schema_key: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_definition_parses_with_defaults() {
        let def: ActionDefinition =
            serde_json::from_value(json!({"canonical_name": "view_profile"})).unwrap();
        assert_eq!(def.action_type, ActionType::SystemApi);
        assert!(def.is_active);
        assert!(def.limits.is_repeatable);
        assert!(!def.limits.allow_multiple);
        assert!(!def.auth.requires_auth);
        assert!(def.param_schema.is_empty());
        assert_eq!(def, ActionDefinition::new("view_profile", ActionType::SystemApi));
    }

    #[test]
    fn test_full_definition_parses_sections() {
        let def: ActionDefinition = serde_json::from_value(json!({
            "canonical_name": "apply_job",
            "action_type": "EXTERNAL_API",
            "synonyms": ["submit_job_application"],
            "auth": {"requires_auth": true, "min_trust_score": 0.5, "allowed_tiers": ["premium"]},
            "limits": {"max_per_session": 1, "min_interval_seconds": 60},
            "prereqs": {"prerequisite_actions": ["create_profile"], "opposite_action": "withdraw_application"},
            "param_schema": {
                "job_id": {"required": true},
                "shift": {"required": false, "enum": ["day", "night"]}
            },
            "retry_policy": {"max_attempts": 3, "backoff_ms": 10},
            "confirmation": {"required": true, "prompt": "Apply now?"},
            "required_schemas": [{"schema_key": "user_profile", "required_fields": ["email"]}],
            "skip_if_conditions": [{"type": "schema_complete", "schema_key": "user_profile"}]
        }))
        .unwrap();

        assert_eq!(def.action_type, ActionType::ExternalApi);
        assert!(def.auth.requires_auth);
        assert_eq!(def.auth.min_trust_score, Some(0.5));
        assert_eq!(def.limits.max_per_session, Some(1));
        assert!(def.limits.is_repeatable);
        assert_eq!(def.prereqs.opposite_action.as_deref(), Some("withdraw_application"));
        assert_eq!(def.param_schema["shift"].enum_values, vec!["day", "night"]);
        assert_eq!(def.max_attempts(1), 3);
        assert!(def.confirmation.required);
        assert_eq!(
            def.skip_if_conditions[0],
            SkipCondition::SchemaComplete {
                schema_key: "user_profile".to_string()
            }
        );
    }

    #[test]
    fn test_missing_params_treats_null_as_absent() {
        let mut def = ActionDefinition::new("apply_job", ActionType::SystemApi);
        def.param_schema.insert(
            "job_id".to_string(),
            ParamSpec {
                required: true,
                enum_values: vec![],
            },
        );
        def.param_schema.insert(
            "cover_letter".to_string(),
            ParamSpec {
                required: false,
                enum_values: vec![],
            },
        );

        let mut entities = Entities::new();
        assert_eq!(def.missing_params(&entities), vec!["job_id"]);

        entities.insert("job_id".to_string(), serde_json::Value::Null);
        assert_eq!(def.missing_params(&entities), vec!["job_id"]);

        entities.insert("job_id".to_string(), json!("J-7"));
        entities.insert("unrelated".to_string(), json!(true));
        assert!(def.missing_params(&entities).is_empty());

        let collected = def.collected_params(&entities);
        assert_eq!(collected.len(), 1);
        assert_eq!(collected["job_id"], "J-7");
    }

    #[test]
    fn test_max_attempts_never_zero() {
        let mut def = ActionDefinition::new("a", ActionType::SystemApi);
        assert_eq!(def.max_attempts(2), 2);
        def.retry_policy = Some(RetryPolicy {
            max_attempts: 0,
            backoff_ms: None,
        });
        assert_eq!(def.max_attempts(2), 1);
    }
}
