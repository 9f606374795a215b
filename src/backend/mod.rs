//! Database backend adapters. A backend provides the capability set
//! {connect, migrate, change stream} plus the document CRUD surface used by
//! the resource routes. Variants are selected by name through the registry.

pub mod postgres;
pub mod sqlite;

use crate::error::{AppError, StartupError};
use crate::model::{ModelDef, ModelRegistry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Buffered change events per subscriber before lagging clients drop events.
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

/// Emitted on the change stream after every successful write.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub doctype: String,
    pub name: String,
    pub action: ChangeAction,
}

/// Opaque connection record passed through to the chosen adapter. Each
/// factory checks its own required fields; `enable_cors` is consumed by the
/// orchestrator when composing the middleware chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionParams {
    #[serde(default)]
    pub db_path: Option<String>,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub enable_cors: bool,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for ConnectionParams {
    fn default() -> Self {
        ConnectionParams {
            db_path: None,
            database_url: None,
            max_connections: default_max_connections(),
            enable_cors: false,
        }
    }
}

/// A swappable database adapter. `connect` must complete before `migrate`;
/// the orchestrator guarantees both complete before any route is reachable.
#[async_trait]
pub trait DbBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn connect(&mut self) -> Result<(), StartupError>;

    /// Create storage for every registered model. Idempotent.
    async fn migrate(&self, models: &ModelRegistry) -> Result<(), StartupError>;

    /// Socket-binding capability: each live connection subscribes here for
    /// server-initiated push.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;

    async fn insert(&self, model: &ModelDef, doc: Map<String, Value>) -> Result<Value, AppError>;

    async fn get(&self, model: &ModelDef, name: &str) -> Result<Option<Value>, AppError>;

    async fn list(
        &self,
        model: &ModelDef,
        filters: &[(String, Value)],
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Value>, AppError>;

    async fn update(
        &self,
        model: &ModelDef,
        name: &str,
        patch: Map<String, Value>,
    ) -> Result<Option<Value>, AppError>;

    async fn delete(&self, model: &ModelDef, name: &str) -> Result<bool, AppError>;
}

impl std::fmt::Debug for dyn DbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbBackend").field("name", &self.name()).finish()
    }
}

pub type BackendFactory =
    Box<dyn Fn(&ConnectionParams) -> Result<Box<dyn DbBackend>, StartupError> + Send + Sync>;

/// Registry of backend constructors, keyed by name. Consumers may register
/// additional variants before bootstrap.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    pub fn empty() -> Self {
        BackendRegistry {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in variants: `sqlite` and `postgres`.
    pub fn with_builtin() -> Self {
        let mut registry = BackendRegistry::empty();
        registry.register("sqlite", Box::new(sqlite::SqliteBackend::from_params));
        registry.register("postgres", Box::new(postgres::PostgresBackend::from_params));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: BackendFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Construct the named variant. An unknown name fails before any connect attempt.
    pub fn create(
        &self,
        name: &str,
        params: &ConnectionParams,
    ) -> Result<Box<dyn DbBackend>, StartupError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| StartupError::UnknownBackend(name.to_string()))?;
        factory(params)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        BackendRegistry::with_builtin()
    }
}

/// Resolve the document name on insert: explicit `name` wins, else a UUID.
pub(crate) fn doc_name(doc: &Map<String, Value>) -> String {
    match doc.get("name").and_then(Value::as_str) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    }
}

/// Reject filter keys that are not fields of the model. Keys are interpolated
/// into JSON-extraction expressions, so only registered fieldnames may pass.
pub(crate) fn check_filter_fields(
    model: &ModelDef,
    filters: &[(String, Value)],
) -> Result<(), AppError> {
    for (field, _) in filters {
        if model.field(field).is_none() {
            return Err(AppError::BadRequest(format!(
                "unknown filter field '{}' for {}",
                field, model.name
            )));
        }
    }
    Ok(())
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
