//! SQLite-backed adapter. One table per model with the document payload
//! stored as a JSON column; filters go through json_extract.

use super::{
    check_filter_fields, doc_name, quote_ident, ChangeAction, ChangeEvent, ConnectionParams,
    DbBackend, CHANGE_CHANNEL_CAPACITY,
};
use crate::error::{AppError, StartupError};
use crate::model::{ModelDef, ModelRegistry};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{query::Query, Row, Sqlite};
use std::str::FromStr;
use tokio::sync::broadcast;

pub struct SqliteBackend {
    db_path: String,
    max_connections: u32,
    pool: Option<SqlitePool>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl SqliteBackend {
    /// Factory for the registry. Requires `db_path` in the connection params.
    pub fn from_params(params: &ConnectionParams) -> Result<Box<dyn DbBackend>, StartupError> {
        let db_path = params
            .db_path
            .clone()
            .ok_or(StartupError::MissingField("db_path"))?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Box::new(SqliteBackend {
            db_path,
            max_connections: params.max_connections,
            pool: None,
            changes,
        }))
    }

    fn pool(&self) -> Result<&SqlitePool, AppError> {
        self.pool.as_ref().ok_or(AppError::Db(sqlx::Error::PoolClosed))
    }

    fn publish(&self, doctype: &str, name: &str, action: ChangeAction) {
        let _ = self.changes.send(ChangeEvent {
            doctype: doctype.to_string(),
            name: name.to_string(),
            action,
        });
    }
}

fn bind_filter<'q>(
    q: Query<'q, Sqlite, SqliteArguments<'q>>,
    v: &'q Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match v {
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else {
                q.bind(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => q.bind(s.as_str()),
        other => q.bind(other.to_string()),
    }
}

fn doc_from_row(row: &SqliteRow) -> Result<Value, AppError> {
    let name: String = row.try_get("name")?;
    let payload: String = row.try_get("payload")?;
    let created_at: String = row.try_get("created_at")?;
    let modified_at: String = row.try_get("modified_at")?;
    let mut doc: Map<String, Value> = serde_json::from_str(&payload)
        .map_err(|e| AppError::BadRequest(format!("corrupt payload for '{}': {}", name, e)))?;
    doc.insert("name".into(), Value::String(name));
    doc.insert("created_at".into(), Value::String(created_at));
    doc.insert("modified_at".into(), Value::String(modified_at));
    Ok(Value::Object(doc))
}

fn assembled(name: &str, payload: &Map<String, Value>, created_at: &str, modified_at: &str) -> Value {
    let mut doc = payload.clone();
    doc.insert("name".into(), Value::String(name.to_string()));
    doc.insert("created_at".into(), Value::String(created_at.to_string()));
    doc.insert("modified_at".into(), Value::String(modified_at.to_string()));
    Value::Object(doc)
}

#[async_trait]
impl DbBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn connect(&mut self) -> Result<(), StartupError> {
        let url = if self.db_path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}", self.db_path)
        };
        let opts = SqliteConnectOptions::from_str(&url)
            .map_err(StartupError::Connection)?
            .create_if_missing(true);
        // A pooled in-memory database would give each connection its own db.
        let max = if self.db_path == ":memory:" { 1 } else { self.max_connections };
        let pool = SqlitePoolOptions::new()
            .max_connections(max)
            .connect_with(opts)
            .await
            .map_err(StartupError::Connection)?;
        self.pool = Some(pool);
        Ok(())
    }

    async fn migrate(&self, models: &ModelRegistry) -> Result<(), StartupError> {
        let pool = self
            .pool
            .as_ref()
            .ok_or(StartupError::Migration(sqlx::Error::PoolClosed))?;
        for model in models.iter() {
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {} (\n  name TEXT PRIMARY KEY,\n  payload TEXT NOT NULL,\n  created_at TEXT NOT NULL,\n  modified_at TEXT NOT NULL\n)",
                quote_ident(&model.table_name())
            );
            sqlx::query(&ddl)
                .execute(pool)
                .await
                .map_err(StartupError::Migration)?;
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    async fn insert(&self, model: &ModelDef, doc: Map<String, Value>) -> Result<Value, AppError> {
        let pool = self.pool()?;
        let name = doc_name(&doc);
        let mut payload = doc;
        payload.remove("name");
        let serialized = serde_json::to_string(&payload)
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            "INSERT INTO {} (name, payload, created_at, modified_at) VALUES (?, ?, ?, ?)",
            quote_ident(&model.table_name())
        );
        sqlx::query(&sql)
            .bind(&name)
            .bind(&serialized)
            .bind(&now)
            .bind(&now)
            .execute(pool)
            .await
            .map_err(|e| {
                if e.as_database_error().map(|d| d.is_unique_violation()).unwrap_or(false) {
                    AppError::Conflict(format!("{} '{}' already exists", model.name, name))
                } else {
                    AppError::Db(e)
                }
            })?;
        self.publish(&model.name, &name, ChangeAction::Created);
        Ok(assembled(&name, &payload, &now, &now))
    }

    async fn get(&self, model: &ModelDef, name: &str) -> Result<Option<Value>, AppError> {
        let pool = self.pool()?;
        let sql = format!(
            "SELECT name, payload, created_at, modified_at FROM {} WHERE name = ?",
            quote_ident(&model.table_name())
        );
        let row = sqlx::query(&sql).bind(name).fetch_optional(pool).await?;
        row.as_ref().map(doc_from_row).transpose()
    }

    async fn list(
        &self,
        model: &ModelDef,
        filters: &[(String, Value)],
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Value>, AppError> {
        let pool = self.pool()?;
        check_filter_fields(model, filters)?;
        let mut sql = format!(
            "SELECT name, payload, created_at, modified_at FROM {}",
            quote_ident(&model.table_name())
        );
        if !filters.is_empty() {
            let clauses: Vec<String> = filters
                .iter()
                .map(|(field, _)| format!("json_extract(payload, '$.{}') = ?", field))
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY name LIMIT ? OFFSET ?");
        let mut q = sqlx::query(&sql);
        for (_, v) in filters {
            q = bind_filter(q, v);
        }
        q = q.bind(i64::from(limit)).bind(i64::from(offset));
        let rows = q.fetch_all(pool).await?;
        rows.iter().map(doc_from_row).collect()
    }

    async fn update(
        &self,
        model: &ModelDef,
        name: &str,
        patch: Map<String, Value>,
    ) -> Result<Option<Value>, AppError> {
        let pool = self.pool()?;
        let select = format!(
            "SELECT payload, created_at, modified_at FROM {} WHERE name = ?",
            quote_ident(&model.table_name())
        );
        let sql = format!(
            "UPDATE {} SET payload = ?, modified_at = ? WHERE name = ? AND modified_at = ?",
            quote_ident(&model.table_name())
        );
        // read-merge-write guarded on modified_at; a lost race reloads and retries
        loop {
            let row = sqlx::query(&select).bind(name).fetch_optional(pool).await?;
            let Some(row) = row else {
                return Ok(None);
            };
            let current: String = row.try_get("payload")?;
            let created_at: String = row.try_get("created_at")?;
            let seen: String = row.try_get("modified_at")?;
            let mut payload: Map<String, Value> = serde_json::from_str(&current)
                .map_err(|e| AppError::BadRequest(format!("corrupt payload for '{}': {}", name, e)))?;
            for (k, v) in &patch {
                if k == "name" {
                    continue;
                }
                payload.insert(k.clone(), v.clone());
            }
            let serialized = serde_json::to_string(&payload)
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            let now = Utc::now().to_rfc3339();
            let result = sqlx::query(&sql)
                .bind(&serialized)
                .bind(&now)
                .bind(name)
                .bind(&seen)
                .execute(pool)
                .await?;
            if result.rows_affected() > 0 {
                self.publish(&model.name, name, ChangeAction::Updated);
                return Ok(Some(assembled(name, &payload, &created_at, &now)));
            }
        }
    }

    async fn delete(&self, model: &ModelDef, name: &str) -> Result<bool, AppError> {
        let pool = self.pool()?;
        let sql = format!("DELETE FROM {} WHERE name = ?", quote_ident(&model.table_name()));
        let result = sqlx::query(&sql).bind(name).execute(pool).await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            self.publish(&model.name, name, ChangeAction::Deleted);
        }
        Ok(deleted)
    }
}
