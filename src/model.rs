//! Data-model definitions and the process-wide model registry.
//! Built-in models are registered first; caller-supplied models are merged
//! on top (caller wins on name collisions).

use crate::error::{AppError, StartupError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Field names reserved for storage bookkeeping; they live outside the payload.
const RESERVED_FIELDNAMES: &[&str] = &["name", "created_at", "modified_at"];

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "fieldtype")]
pub enum FieldType {
    Data,
    Text,
    Int,
    Float,
    Check,
    Date,
    Select { options: Vec<String> },
    Link { target: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldDef {
    pub fieldname: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(flatten)]
    pub fieldtype: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl ModelDef {
    pub fn field(&self, fieldname: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.fieldname == fieldname)
    }

    /// Table name derived from the model name: lowercased, spaces to underscores.
    pub fn table_name(&self) -> String {
        self.name.to_lowercase().replace(' ', "_")
    }
}

/// Registered model definitions, keyed by model name. Owned by the
/// application context; mutated only during the bootstrap phase.
#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelDef>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        ModelRegistry::default()
    }

    /// Registry seeded with the framework's built-in models.
    pub fn builtin() -> Result<Self, StartupError> {
        let mut registry = ModelRegistry::new();
        registry.register_all(builtin_models())?;
        Ok(registry)
    }

    /// Register one model. Validates the model and field names; a model with
    /// the same name replaces the existing entry.
    pub fn register(&mut self, model: ModelDef) -> Result<(), StartupError> {
        validate_model(&model)?;
        self.models.insert(model.name.clone(), model);
        Ok(())
    }

    pub fn register_all(&mut self, models: Vec<ModelDef>) -> Result<(), StartupError> {
        for model in models {
            self.register(model)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ModelDef> {
        self.models.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDef> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn validate_model(model: &ModelDef) -> Result<(), StartupError> {
    let name_re = Regex::new(r"^[A-Z][A-Za-z0-9 ]*$")
        .map_err(|e| StartupError::InvalidModel(e.to_string()))?;
    let field_re = Regex::new(r"^[a-z][a-z0-9_]*$")
        .map_err(|e| StartupError::InvalidModel(e.to_string()))?;

    if !name_re.is_match(&model.name) {
        return Err(StartupError::InvalidModel(format!(
            "model name '{}' must start with an uppercase letter and contain only letters, digits, and spaces",
            model.name
        )));
    }
    for field in &model.fields {
        if RESERVED_FIELDNAMES.contains(&field.fieldname.as_str()) {
            return Err(StartupError::InvalidModel(format!(
                "{}: fieldname '{}' is reserved",
                model.name, field.fieldname
            )));
        }
        if !field_re.is_match(&field.fieldname) {
            return Err(StartupError::InvalidModel(format!(
                "{}: fieldname '{}' must be snake_case",
                model.name, field.fieldname
            )));
        }
        if let FieldType::Select { options } = &field.fieldtype {
            if options.is_empty() {
                return Err(StartupError::InvalidModel(format!(
                    "{}: select field '{}' has no options",
                    model.name, field.fieldname
                )));
            }
        }
    }
    Ok(())
}

/// Validate a document body against its model. With `partial`, required
/// fields may be absent (PATCH semantics); present fields are always checked.
pub fn validate_doc(model: &ModelDef, body: &Map<String, Value>, partial: bool) -> Result<(), AppError> {
    for field in &model.fields {
        let val = body.get(&field.fieldname);
        if !partial && field.required && (val.is_none() || val == Some(&Value::Null)) {
            return Err(AppError::Validation(format!("{} is required", field.fieldname)));
        }
        if let Some(v) = val {
            validate_field(field, v)?;
        }
    }
    for key in body.keys() {
        if key != "name" && model.field(key).is_none() {
            return Err(AppError::Validation(format!(
                "unknown field '{}' for {}",
                key, model.name
            )));
        }
    }
    Ok(())
}

fn validate_field(field: &FieldDef, v: &Value) -> Result<(), AppError> {
    if v.is_null() {
        return Ok(());
    }
    match &field.fieldtype {
        FieldType::Data | FieldType::Text | FieldType::Link { .. } => {
            if !v.is_string() {
                return Err(AppError::Validation(format!("{} must be a string", field.fieldname)));
            }
        }
        FieldType::Int => {
            if !v.is_i64() && !v.is_u64() {
                return Err(AppError::Validation(format!("{} must be an integer", field.fieldname)));
            }
        }
        FieldType::Float => {
            if !v.is_number() {
                return Err(AppError::Validation(format!("{} must be a number", field.fieldname)));
            }
        }
        FieldType::Check => {
            if !v.is_boolean() {
                return Err(AppError::Validation(format!("{} must be a boolean", field.fieldname)));
            }
        }
        FieldType::Date => {
            let ok = v
                .as_str()
                .map(|s| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok())
                .unwrap_or(false);
            if !ok {
                return Err(AppError::Validation(format!(
                    "{} must be a YYYY-MM-DD date",
                    field.fieldname
                )));
            }
        }
        FieldType::Select { options } => {
            let ok = v.as_str().map(|s| options.iter().any(|o| o == s)).unwrap_or(false);
            if !ok {
                return Err(AppError::Validation(format!(
                    "{} must be one of: {}",
                    field.fieldname,
                    options.join(", ")
                )));
            }
        }
    }
    Ok(())
}

fn builtin_models() -> Vec<ModelDef> {
    vec![
        ModelDef {
            name: "User".into(),
            fields: vec![
                FieldDef {
                    fieldname: "full_name".into(),
                    label: Some("Full Name".into()),
                    fieldtype: FieldType::Data,
                    required: false,
                    default: None,
                },
                FieldDef {
                    fieldname: "password_hash".into(),
                    label: None,
                    fieldtype: FieldType::Data,
                    required: false,
                    default: None,
                },
                FieldDef {
                    fieldname: "disabled".into(),
                    label: Some("Disabled".into()),
                    fieldtype: FieldType::Check,
                    required: false,
                    default: Some(Value::Bool(false)),
                },
            ],
        },
        ModelDef {
            name: "SystemSettings".into(),
            fields: vec![
                FieldDef {
                    fieldname: "date_format".into(),
                    label: Some("Date Format".into()),
                    fieldtype: FieldType::Select {
                        options: vec!["yyyy-mm-dd".into(), "dd-mm-yyyy".into(), "mm-dd-yyyy".into()],
                    },
                    required: false,
                    default: Some(Value::String("yyyy-mm-dd".into())),
                },
                FieldDef {
                    fieldname: "float_precision".into(),
                    label: Some("Float Precision".into()),
                    fieldtype: FieldType::Int,
                    required: false,
                    default: Some(Value::from(2)),
                },
            ],
        },
        ModelDef {
            name: "NumberSeries".into(),
            fields: vec![
                FieldDef {
                    fieldname: "current".into(),
                    label: Some("Current".into()),
                    fieldtype: FieldType::Int,
                    required: true,
                    default: Some(Value::from(0)),
                },
            ],
        },
    ]
}
