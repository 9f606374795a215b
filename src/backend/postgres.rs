//! PostgreSQL-backed adapter. Same storage scheme as the SQLite variant with
//! a JSONB payload column; filters go through the ->> operator.

use super::{
    check_filter_fields, doc_name, quote_ident, ChangeAction, ChangeEvent, ConnectionParams,
    DbBackend, CHANGE_CHANNEL_CAPACITY,
};
use crate::error::{AppError, StartupError};
use crate::model::{ModelDef, ModelRegistry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tokio::sync::broadcast;

pub struct PostgresBackend {
    database_url: String,
    max_connections: u32,
    pool: Option<PgPool>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl PostgresBackend {
    /// Factory for the registry. Requires `database_url` in the connection params.
    pub fn from_params(params: &ConnectionParams) -> Result<Box<dyn DbBackend>, StartupError> {
        let database_url = params
            .database_url
            .clone()
            .ok_or(StartupError::MissingField("database_url"))?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Box::new(PostgresBackend {
            database_url,
            max_connections: params.max_connections,
            pool: None,
            changes,
        }))
    }

    fn pool(&self) -> Result<&PgPool, AppError> {
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

/// Text form for ->> comparisons.
fn filter_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn doc_from_row(row: &PgRow) -> Result<Value, AppError> {
    let name: String = row.try_get("name")?;
    let payload: Value = row.try_get("payload")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let modified_at: DateTime<Utc> = row.try_get("modified_at")?;
    let Value::Object(mut doc) = payload else {
        return Err(AppError::BadRequest(format!("corrupt payload for '{}'", name)));
    };
    doc.insert("name".into(), Value::String(name));
    doc.insert("created_at".into(), Value::String(created_at.to_rfc3339()));
    doc.insert("modified_at".into(), Value::String(modified_at.to_rfc3339()));
    Ok(Value::Object(doc))
}

fn assembled(
    name: &str,
    payload: &Map<String, Value>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
) -> Value {
    let mut doc = payload.clone();
    doc.insert("name".into(), Value::String(name.to_string()));
    doc.insert("created_at".into(), Value::String(created_at.to_rfc3339()));
    doc.insert("modified_at".into(), Value::String(modified_at.to_rfc3339()));
    Value::Object(doc)
}

#[async_trait]
impl DbBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn connect(&mut self) -> Result<(), StartupError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
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
                "CREATE TABLE IF NOT EXISTS {} (\n  name TEXT PRIMARY KEY,\n  payload JSONB NOT NULL,\n  created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\n  modified_at TIMESTAMPTZ NOT NULL DEFAULT NOW()\n)",
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
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO {} (name, payload, created_at, modified_at) VALUES ($1, $2, $3, $4)",
            quote_ident(&model.table_name())
        );
        sqlx::query(&sql)
            .bind(&name)
            .bind(Value::Object(payload.clone()))
            .bind(now)
            .bind(now)
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
        Ok(assembled(&name, &payload, now, now))
    }

    async fn get(&self, model: &ModelDef, name: &str) -> Result<Option<Value>, AppError> {
        let pool = self.pool()?;
        let sql = format!(
            "SELECT name, payload, created_at, modified_at FROM {} WHERE name = $1",
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
                .enumerate()
                .map(|(i, (field, _))| format!("payload->>'{}' = ${}", field, i + 1))
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(
            " ORDER BY name LIMIT ${} OFFSET ${}",
            filters.len() + 1,
            filters.len() + 2
        ));
        let mut q = sqlx::query(&sql);
        for (_, v) in filters {
            q = q.bind(filter_text(v));
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
            "SELECT payload, created_at, modified_at FROM {} WHERE name = $1",
            quote_ident(&model.table_name())
        );
        let sql = format!(
            "UPDATE {} SET payload = $1, modified_at = $2 WHERE name = $3 AND modified_at = $4",
            quote_ident(&model.table_name())
        );
        // read-merge-write guarded on modified_at; a lost race reloads and retries
        loop {
            let row = sqlx::query(&select).bind(name).fetch_optional(pool).await?;
            let Some(row) = row else {
                return Ok(None);
            };
            let current: Value = row.try_get("payload")?;
            let created_at: DateTime<Utc> = row.try_get("created_at")?;
            let seen: DateTime<Utc> = row.try_get("modified_at")?;
            let Value::Object(mut payload) = current else {
                return Err(AppError::BadRequest(format!("corrupt payload for '{}'", name)));
            };
            for (k, v) in &patch {
                if k == "name" {
                    continue;
                }
                payload.insert(k.clone(), v.clone());
            }
            let now = Utc::now();
            let result = sqlx::query(&sql)
                .bind(Value::Object(payload.clone()))
                .bind(now)
                .bind(name)
                .bind(seen)
                .execute(pool)
                .await?;
            if result.rows_affected() > 0 {
                self.publish(&model.name, name, ChangeAction::Updated);
                return Ok(Some(assembled(name, &payload, created_at, now)));
            }
        }
    }

    async fn delete(&self, model: &ModelDef, name: &str) -> Result<bool, AppError> {
        let pool = self.pool()?;
        let sql = format!(
            "DELETE FROM {} WHERE name = $1",
            quote_ident(&model.table_name())
        );
        let result = sqlx::query(&sql).bind(name).execute(pool).await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            self.publish(&model.name, name, ChangeAction::Deleted);
        }
        Ok(deleted)
    }
}
