//! External schema data: fetching, TTL caching and completeness checks.
//!
//! A schema is a named per-user data shape (e.g. `user_profile`) served by a
//! brand API. Payloads are cached per `(schema_key, user_id)` and expire
//! lazily on read. Every fetch failure collapses to "no data", which callers
//! treat as all required fields missing.

pub mod client;

pub use client::{HttpSchemaDataClient, SchemaDataClient, SchemaResponse};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use brain_core::config::SchemaConfig;
use brain_core::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::definition::SchemaDependency;

/// Definition of an external data shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub schema_key: String,
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// Path appended to the brand's API base URL. `{user_id}` is substituted.
    pub api_endpoint: String,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

/// Source of schema definitions and brand API locations.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    async fn schema_definition(&self, schema_key: &str) -> Result<Option<SchemaDefinition>>;
    async fn brand_api_base_url(&self, brand_id: &str) -> Result<Option<String>>;
}

struct CachedSchemaData {
    payload: Value,
    fetched_at: Instant,
    ttl: Duration,
}

impl CachedSchemaData {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.fetched_at) < self.ttl
    }
}

/// Outcome of checking one schema's required fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Completeness {
    pub complete: bool,
    pub missing_fields: Vec<String>,
    /// False when no data could be fetched at all.
    pub fetched: bool,
}

/// Aggregate over several schema dependencies.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SchemaCheck {
    pub complete: bool,
    pub reasons: Vec<String>,
}

/// Resolve a dot-separated path. Any non-object ancestor yields `None`.
pub fn lookup_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(data, |node, key| node.as_object()?.get(key))
}

fn field_present(data: &Value, path: &str) -> bool {
    lookup_path(data, path).is_some_and(|v| !v.is_null())
}

pub struct SchemaCompletenessChecker {
    registry: Arc<dyn SchemaRegistry>,
    client: Arc<dyn SchemaDataClient>,
    cache: RwLock<HashMap<(String, String), CachedSchemaData>>,
    fetch_timeout: Duration,
    default_ttl: Duration,
}

impl SchemaCompletenessChecker {
    pub fn new(
        registry: Arc<dyn SchemaRegistry>,
        client: Arc<dyn SchemaDataClient>,
        config: &SchemaConfig,
    ) -> Self {
        Self {
            registry,
            client,
            cache: RwLock::new(HashMap::new()),
            fetch_timeout: Duration::from_millis(config.fetch_timeout_ms),
            default_ttl: Duration::from_secs(config.default_ttl_secs),
        }
    }

    /// Cached payload if fresh, otherwise fetch from the brand API.
    ///
    /// Returns `None` on any failure: unknown schema or brand, transport
    /// error, timeout, or a non-200 status.
    pub async fn fetch_schema_data(
        &self,
        schema_key: &str,
        user_id: &str,
        brand_id: &str,
        force_refresh: bool,
    ) -> Option<Value> {
        let key = (schema_key.to_string(), user_id.to_string());
        if !force_refresh {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&key) {
                if entry.is_fresh(Instant::now()) {
                    debug!(schema_key, user_id, "Schema cache hit");
                    return Some(entry.payload.clone());
                }
            }
        }

        let definition = match self.registry.schema_definition(schema_key).await {
            Ok(Some(def)) => def,
            Ok(None) => {
                warn!(schema_key, "Schema definition not found");
                return None;
            }
            Err(e) => {
                warn!(schema_key, error = %e, "Schema definition lookup failed");
                return None;
            }
        };
        let base_url = match self.registry.brand_api_base_url(brand_id).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                warn!(brand_id, "Brand has no API base URL");
                return None;
            }
            Err(e) => {
                warn!(brand_id, error = %e, "Brand lookup failed");
                return None;
            }
        };

        let url = format!(
            "{}{}",
            base_url.trim_end_matches('/'),
            definition.api_endpoint.replace("{user_id}", user_id)
        );
        let payload = match self.client.get(&url, self.fetch_timeout).await {
            Ok(SchemaResponse {
                status: 200,
                body: Some(body),
            }) => body,
            Ok(response) => {
                warn!(schema_key, user_id, status = response.status, "Schema fetch returned no data");
                return None;
            }
            Err(e) => {
                warn!(schema_key, user_id, error = %e, "Schema fetch failed");
                return None;
            }
        };

        let ttl = definition
            .ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_ttl);
        self.cache.write().await.insert(
            key,
            CachedSchemaData {
                payload: payload.clone(),
                fetched_at: Instant::now(),
                ttl,
            },
        );
        debug!(schema_key, user_id, ttl_secs = ttl.as_secs(), "Schema data cached");
        Some(payload)
    }

    /// Check `required_fields` against the user's schema data.
    pub async fn check_completeness(
        &self,
        schema_key: &str,
        required_fields: &[String],
        user_id: &str,
        brand_id: &str,
    ) -> Completeness {
        match self.fetch_schema_data(schema_key, user_id, brand_id, false).await {
            Some(data) => {
                let missing_fields: Vec<String> = required_fields
                    .iter()
                    .filter(|f| !field_present(&data, f))
                    .cloned()
                    .collect();
                Completeness {
                    complete: missing_fields.is_empty(),
                    missing_fields,
                    fetched: true,
                }
            }
            None => Completeness {
                complete: required_fields.is_empty(),
                missing_fields: required_fields.to_vec(),
                fetched: false,
            },
        }
    }

    async fn required_fields_for(&self, dependency: &SchemaDependency) -> Vec<String> {
        if !dependency.required_fields.is_empty() {
            return dependency.required_fields.clone();
        }
        match self.registry.schema_definition(&dependency.schema_key).await {
            Ok(Some(def)) => def.required_fields,
            _ => Vec::new(),
        }
    }

    /// Check every dependency and collect a reason per incomplete schema.
    pub async fn check_multiple(
        &self,
        dependencies: &[SchemaDependency],
        user_id: &str,
        brand_id: &str,
    ) -> SchemaCheck {
        let mut reasons = Vec::new();
        for dependency in dependencies {
            let fields = self.required_fields_for(dependency).await;
            let result = self
                .check_completeness(&dependency.schema_key, &fields, user_id, brand_id)
                .await;
            if result.complete {
                continue;
            }
            if result.fetched {
                reasons.push(format!(
                    "incomplete_schema:{}:{}",
                    dependency.schema_key,
                    result.missing_fields.join(",")
                ));
            } else {
                reasons.push(format!("schema_fetch_failed:{}", dependency.schema_key));
            }
        }
        SchemaCheck {
            complete: reasons.is_empty(),
            reasons,
        }
    }

    /// Completeness against the schema definition's own required fields.
    pub async fn is_schema_complete(&self, schema_key: &str, user_id: &str, brand_id: &str) -> bool {
        let dependency = SchemaDependency {
            schema_key: schema_key.to_string(),
            required_fields: Vec::new(),
        };
        let fields = self.required_fields_for(&dependency).await;
        self.check_completeness(schema_key, &fields, user_id, brand_id)
            .await
            .complete
    }

    pub async fn invalidate(&self, schema_key: &str, user_id: &str) {
        let removed = self
            .cache
            .write()
            .await
            .remove(&(schema_key.to_string(), user_id.to_string()))
            .is_some();
        if removed {
            info!(schema_key, user_id, "Schema cache entry invalidated");
        }
    }

    /// Drop every cached schema for a user.
    pub async fn invalidate_user(&self, user_id: &str) {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|(_, user), _| user != user_id);
        info!(user_id, removed = before - cache.len(), "Schema cache invalidated for user");
    }
}
