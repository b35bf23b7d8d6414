//! Read-only lookup of action and workflow definitions.

use std::path::Path;

use async_trait::async_trait;
use brain_core::error::{BrainError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::definition::ActionDefinition;
use crate::schema::{SchemaDefinition, SchemaRegistry};

/// Catalog lookups, scoped to an instance or brand.
#[async_trait]
pub trait ActionCatalog: Send + Sync {
    /// Every active action visible to `instance_id`.
    async fn active_actions_for(&self, instance_id: &str) -> Result<Vec<ActionDefinition>>;

    async fn by_canonical_name(
        &self,
        name: &str,
        brand_id: &str,
    ) -> Result<Option<ActionDefinition>>;

    /// Active non-workflow members of a workflow, ordered by `sequence_number`.
    async fn workflow_members(
        &self,
        workflow_id: &str,
        brand_id: &str,
    ) -> Result<Vec<ActionDefinition>>;
}

/// Brand-level settings consulted when fetching schema data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandConfig {
    pub brand_id: String,
    pub api_base_url: String,
}

/// Serialized form of a catalog, as loaded from a JSON fixture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,
    #[serde(default)]
    pub schemas: Vec<SchemaDefinition>,
    #[serde(default)]
    pub brands: Vec<BrandConfig>,
}

/// Catalog held entirely in memory.
pub struct InMemoryCatalog {
    document: CatalogDocument,
}

fn in_scope(scope: &Option<String>, id: &str) -> bool {
    match scope {
        Some(s) => s == id,
        None => true,
    }
}

impl InMemoryCatalog {
    pub fn new(document: CatalogDocument) -> Self {
        Self { document }
    }

    /// Load a catalog from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let document: CatalogDocument = serde_json::from_str(&content)
            .map_err(|e| BrainError::Catalog(format!("{}: {}", path.display(), e)))?;
        info!(
            actions = document.actions.len(),
            schemas = document.schemas.len(),
            "Catalog loaded from {}",
            path.display()
        );
        Ok(Self::new(document))
    }
}

#[async_trait]
impl ActionCatalog for InMemoryCatalog {
    async fn active_actions_for(&self, instance_id: &str) -> Result<Vec<ActionDefinition>> {
        Ok(self
            .document
            .actions
            .iter()
            .filter(|a| a.is_active && in_scope(&a.instance_id, instance_id))
            .cloned()
            .collect())
    }

    async fn by_canonical_name(
        &self,
        name: &str,
        brand_id: &str,
    ) -> Result<Option<ActionDefinition>> {
        Ok(self
            .document
            .actions
            .iter()
            .find(|a| a.is_active && a.canonical_name == name && in_scope(&a.brand_id, brand_id))
            .cloned())
    }

    async fn workflow_members(
        &self,
        workflow_id: &str,
        brand_id: &str,
    ) -> Result<Vec<ActionDefinition>> {
        let mut members: Vec<ActionDefinition> = self
            .document
            .actions
            .iter()
            .filter(|a| {
                a.is_active
                    && !a.is_workflow()
                    && in_scope(&a.brand_id, brand_id)
                    && a.workflow.as_ref().is_some_and(|w| w.workflow_id == workflow_id)
            })
            .cloned()
            .collect();
        members.sort_by_key(|a| a.workflow.as_ref().map(|w| w.sequence_number).unwrap_or(0));
        Ok(members)
    }
}

#[async_trait]
impl SchemaRegistry for InMemoryCatalog {
    async fn schema_definition(&self, schema_key: &str) -> Result<Option<SchemaDefinition>> {
        Ok(self
            .document
            .schemas
            .iter()
            .find(|s| s.schema_key == schema_key)
            .cloned())
    }

    async fn brand_api_base_url(&self, brand_id: &str) -> Result<Option<String>> {
        Ok(self
            .document
            .brands
            .iter()
            .find(|b| b.brand_id == brand_id)
            .map(|b| b.api_base_url.clone()))
    }
}
