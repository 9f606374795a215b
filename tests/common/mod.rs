//! Shared test helpers: an instrumented in-memory backend that records the
//! order of capability calls, plus option builders.

use async_trait::async_trait;
use chassis_sdk::{
    AppConfig, AuthConfig, BackendRegistry, Bootstrap, ChangeAction, ChangeEvent,
    ConnectionParams, DbBackend, FieldDef, FieldType, ModelDef, ModelRegistry, StartOptions,
    StartupError,
};
use chassis_sdk::AppError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

#[derive(Default)]
pub struct SharedLog {
    pub calls: Mutex<Vec<String>>,
    pub migrated_models: Mutex<Vec<String>>,
}

impl SharedLog {
    pub fn new() -> Arc<Self> {
        Arc::new(SharedLog::default())
    }

    pub fn push(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn migrated_models(&self) -> Vec<String> {
        self.migrated_models.lock().unwrap().clone()
    }
}

/// In-memory backend that records connect/migrate order and serves document
/// CRUD from a map, so routers can be probed without a real database.
pub struct RecordingBackend {
    log: Arc<SharedLog>,
    fail_connect: bool,
    fail_migrate: bool,
    docs: Mutex<BTreeMap<(String, String), Map<String, Value>>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl RecordingBackend {
    pub fn factory(
        log: Arc<SharedLog>,
        fail_connect: bool,
        fail_migrate: bool,
    ) -> chassis_sdk::BackendFactory {
        Box::new(move |_params: &ConnectionParams| {
            let (changes, _) = broadcast::channel(64);
            Ok(Box::new(RecordingBackend {
                log: log.clone(),
                fail_connect,
                fail_migrate,
                docs: Mutex::new(BTreeMap::new()),
                changes,
            }) as Box<dyn DbBackend>)
        })
    }
}

fn with_name(name: &str, payload: &Map<String, Value>) -> Value {
    let mut doc = payload.clone();
    doc.insert("name".into(), Value::String(name.to_string()));
    Value::Object(doc)
}

#[async_trait]
impl DbBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn connect(&mut self) -> Result<(), StartupError> {
        self.log.push("connect");
        if self.fail_connect {
            return Err(StartupError::Connection(sqlx::Error::PoolClosed));
        }
        Ok(())
    }

    async fn migrate(&self, models: &ModelRegistry) -> Result<(), StartupError> {
        self.log.push("migrate");
        if self.fail_migrate {
            return Err(StartupError::Migration(sqlx::Error::PoolClosed));
        }
        let mut seen = self.log.migrated_models.lock().unwrap();
        *seen = models.iter().map(|m| m.name.clone()).collect();
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    async fn insert(&self, model: &ModelDef, doc: Map<String, Value>) -> Result<Value, AppError> {
        let name = doc
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut payload = doc;
        payload.remove("name");
        let key = (model.name.clone(), name.clone());
        let mut docs = self.docs.lock().unwrap();
        if docs.contains_key(&key) {
            return Err(AppError::Conflict(format!(
                "{} '{}' already exists",
                model.name, name
            )));
        }
        docs.insert(key, payload.clone());
        let _ = self.changes.send(ChangeEvent {
            doctype: model.name.clone(),
            name: name.clone(),
            action: ChangeAction::Created,
        });
        Ok(with_name(&name, &payload))
    }

    async fn get(&self, model: &ModelDef, name: &str) -> Result<Option<Value>, AppError> {
        let docs = self.docs.lock().unwrap();
        Ok(docs
            .get(&(model.name.clone(), name.to_string()))
            .map(|payload| with_name(name, payload)))
    }

    async fn list(
        &self,
        model: &ModelDef,
        filters: &[(String, Value)],
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Value>, AppError> {
        let docs = self.docs.lock().unwrap();
        let out: Vec<Value> = docs
            .iter()
            .filter(|((doctype, _), payload)| {
                doctype == &model.name
                    && filters.iter().all(|(k, v)| payload.get(k) == Some(v))
            })
            .skip(offset as usize)
            .take(limit as usize)
            .map(|((_, name), payload)| with_name(name, payload))
            .collect();
        Ok(out)
    }

    async fn update(
        &self,
        model: &ModelDef,
        name: &str,
        patch: Map<String, Value>,
    ) -> Result<Option<Value>, AppError> {
        let mut docs = self.docs.lock().unwrap();
        let key = (model.name.clone(), name.to_string());
        let Some(payload) = docs.get_mut(&key) else {
            return Ok(None);
        };
        for (k, v) in patch {
            if k != "name" {
                payload.insert(k, v);
            }
        }
        let snapshot = payload.clone();
        let _ = self.changes.send(ChangeEvent {
            doctype: model.name.clone(),
            name: name.to_string(),
            action: ChangeAction::Updated,
        });
        Ok(Some(with_name(name, &snapshot)))
    }

    async fn delete(&self, model: &ModelDef, name: &str) -> Result<bool, AppError> {
        let mut docs = self.docs.lock().unwrap();
        let deleted = docs.remove(&(model.name.clone(), name.to_string())).is_some();
        if deleted {
            let _ = self.changes.send(ChangeEvent {
                doctype: model.name.clone(),
                name: name.to_string(),
                action: ChangeAction::Deleted,
            });
        }
        Ok(deleted)
    }
}

pub fn recording_bootstrap(log: Arc<SharedLog>) -> Bootstrap {
    let mut registry = BackendRegistry::empty();
    registry.register("recording", RecordingBackend::factory(log, false, false));
    Bootstrap::with_registry(registry)
}

pub fn todo_model() -> ModelDef {
    ModelDef {
        name: "ToDo".into(),
        fields: vec![
            FieldDef {
                fieldname: "subject".into(),
                label: Some("Subject".into()),
                fieldtype: FieldType::Data,
                required: true,
                default: None,
            },
            FieldDef {
                fieldname: "done".into(),
                label: Some("Done".into()),
                fieldtype: FieldType::Check,
                required: false,
                default: Some(Value::Bool(false)),
            },
            FieldDef {
                fieldname: "priority".into(),
                label: None,
                fieldtype: FieldType::Select {
                    options: vec!["Low".into(), "Medium".into(), "High".into()],
                },
                required: false,
                default: None,
            },
        ],
    }
}

pub fn base_options(backend: &str) -> StartOptions {
    StartOptions {
        backend: backend.into(),
        connection_params: ConnectionParams::default(),
        models: Some(vec![todo_model()]),
        auth: None,
        config: AppConfig::default(),
        bootstrap_identity: None,
    }
}

pub fn options_with_auth(backend: &str) -> StartOptions {
    let mut options = base_options(backend);
    options.auth = Some(AuthConfig::new("test-secret"));
    options
}
