//! Print/PDF route. Conversion to a final PDF is delegated through the
//! PrintRenderer seam; the built-in renderer emits the print document the
//! external converter consumes.

use crate::error::AppError;
use crate::model::ModelDef;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

pub trait PrintRenderer: Send + Sync {
    fn content_type(&self) -> &'static str;
    fn render(&self, model: &ModelDef, doc: &Value) -> Result<Vec<u8>, AppError>;
}

/// Default renderer: a self-contained print HTML page listing every field.
pub struct HtmlPrintRenderer;

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl PrintRenderer for HtmlPrintRenderer {
    fn content_type(&self) -> &'static str {
        "text/html; charset=utf-8"
    }

    fn render(&self, model: &ModelDef, doc: &Value) -> Result<Vec<u8>, AppError> {
        let name = doc.get("name").and_then(Value::as_str).unwrap_or("");
        let mut rows = String::new();
        for field in &model.fields {
            let label = field.label.as_deref().unwrap_or(&field.fieldname);
            let value = match doc.get(&field.fieldname) {
                Some(Value::String(s)) => escape_html(s),
                Some(Value::Null) | None => String::new(),
                Some(other) => escape_html(&other.to_string()),
            };
            rows.push_str(&format!(
                "<tr><th>{}</th><td>{}</td></tr>\n",
                escape_html(label),
                value
            ));
        }
        let html = format!(
            "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>{title} {name}</title></head>\n<body><h1>{title} {name}</h1>\n<table>\n{rows}</table>\n</body></html>\n",
            title = escape_html(&model.name),
            name = escape_html(name),
            rows = rows
        );
        Ok(html.into_bytes())
    }
}

#[derive(Clone)]
struct PrintState {
    app: AppState,
    renderer: Arc<dyn PrintRenderer>,
}

#[derive(Deserialize)]
struct PrintRequest {
    doctype: String,
    name: String,
}

async fn render_doc(
    State(print): State<PrintState>,
    Json(req): Json<PrintRequest>,
) -> Result<Response, AppError> {
    let model = print
        .app
        .models()
        .get(&req.doctype)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("no model named '{}'", req.doctype)))?;
    let doc = print
        .app
        .db
        .get(&model, &req.name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} '{}'", req.doctype, req.name)))?;
    let bytes = print.renderer.render(&model, &doc)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, print.renderer.content_type())],
        bytes,
    )
        .into_response())
}

/// POST /api/method/pdf. Mounted by the orchestrator as the last route.
pub fn print_routes(app: AppState, renderer: Arc<dyn PrintRenderer>) -> Router {
    Router::new()
        .route("/api/method/pdf", post(render_doc))
        .with_state(PrintState { app, renderer })
}
