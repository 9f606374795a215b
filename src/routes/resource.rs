//! Resource REST API over registered models: list, create, read, update, delete.

use crate::error::AppError;
use crate::model::{validate_doc, FieldType, ModelDef};
use crate::response::{success_many, success_one, success_one_ok};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 500;

fn model_for(state: &AppState, doctype: &str) -> Result<ModelDef, AppError> {
    state
        .models()
        .get(doctype)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("no model named '{}'", doctype)))
}

fn body_to_map(value: Value) -> Result<Map<String, Value>, AppError> {
    match value {
        Value::Object(m) => Ok(m),
        _ => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}

/// Coerce a query-string filter value by the field's declared type.
fn filter_value(model: &ModelDef, field: &str, raw: &str) -> Value {
    match model.field(field).map(|f| &f.fieldtype) {
        Some(FieldType::Int) => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        Some(FieldType::Float) => raw
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        Some(FieldType::Check) => match raw {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => Value::String(raw.to_string()),
        },
        _ => Value::String(raw.to_string()),
    }
}

async fn list(
    State(state): State<AppState>,
    Path(doctype): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let model = model_for(&state, &doctype)?;

    let mut limit = DEFAULT_LIMIT;
    let mut offset = 0u32;
    let mut filters: Vec<(String, Value)> = Vec::new();
    for (k, v) in params {
        match k.as_str() {
            "limit" => limit = v.parse().unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT),
            "offset" => offset = v.parse().unwrap_or(0),
            _ => {
                let val = filter_value(&model, &k, &v);
                filters.push((k, val));
            }
        }
    }

    let rows = state.db.list(&model, &filters, limit, offset).await?;
    Ok(success_many(rows))
}

async fn create(
    State(state): State<AppState>,
    Path(doctype): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let model = model_for(&state, &doctype)?;
    let doc = body_to_map(body)?;
    validate_doc(&model, &doc, false)?;
    let created = state.db.insert(&model, doc).await?;
    Ok(success_one(created))
}

async fn read(
    State(state): State<AppState>,
    Path((doctype, name)): Path<(String, String)>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let model = model_for(&state, &doctype)?;
    let doc = state
        .db
        .get(&model, &name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} '{}'", doctype, name)))?;
    Ok(success_one_ok(doc))
}

async fn update(
    State(state): State<AppState>,
    Path((doctype, name)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let model = model_for(&state, &doctype)?;
    let patch = body_to_map(body)?;
    validate_doc(&model, &patch, true)?;
    let updated = state
        .db
        .update(&model, &name, patch)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} '{}'", doctype, name)))?;
    Ok(success_one_ok(updated))
}

async fn delete_doc(
    State(state): State<AppState>,
    Path((doctype, name)): Path<(String, String)>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let model = model_for(&state, &doctype)?;
    if !state.db.delete(&model, &name).await? {
        return Err(AppError::NotFound(format!("{} '{}'", doctype, name)));
    }
    Ok(success_one_ok(json!({ "name": name })))
}

pub fn resource_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/resource/:doctype", get(list).post(create))
        .route(
            "/api/resource/:doctype/:name",
            get(read).patch(update).delete(delete_doc),
        )
        .with_state(state)
}
