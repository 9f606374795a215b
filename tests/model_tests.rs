//! Model registry and document validation.

mod common;

use chassis_sdk::{validate_doc, FieldDef, FieldType, ModelDef, ModelRegistry, StartupError};
use common::todo_model;
use serde_json::{json, Map, Value};

fn as_map(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(m) => m,
        _ => panic!("expected object"),
    }
}

#[test]
fn builtin_registry_contains_framework_models() {
    let registry = ModelRegistry::builtin().unwrap();
    for name in ["User", "SystemSettings", "NumberSeries"] {
        assert!(registry.contains(name), "missing builtin model {}", name);
    }
}

#[test]
fn caller_model_replaces_builtin_on_name_collision() {
    let mut registry = ModelRegistry::builtin().unwrap();
    let custom_user = ModelDef {
        name: "User".into(),
        fields: vec![FieldDef {
            fieldname: "nickname".into(),
            label: None,
            fieldtype: FieldType::Data,
            required: false,
            default: None,
        }],
    };
    registry.register(custom_user).unwrap();
    let user = registry.get("User").unwrap();
    assert!(user.field("nickname").is_some());
    assert!(user.field("full_name").is_none());
}

#[test]
fn model_names_and_fieldnames_are_validated() {
    let mut registry = ModelRegistry::new();

    let bad_name = ModelDef {
        name: "lowercase".into(),
        fields: vec![],
    };
    assert!(matches!(
        registry.register(bad_name),
        Err(StartupError::InvalidModel(_))
    ));

    let reserved_field = ModelDef {
        name: "Thing".into(),
        fields: vec![FieldDef {
            fieldname: "name".into(),
            label: None,
            fieldtype: FieldType::Data,
            required: false,
            default: None,
        }],
    };
    assert!(matches!(
        registry.register(reserved_field),
        Err(StartupError::InvalidModel(_))
    ));
}

#[test]
fn table_name_is_lowercased_with_underscores() {
    let model = ModelDef {
        name: "Sales Invoice".into(),
        fields: vec![],
    };
    assert_eq!(model.table_name(), "sales_invoice");
}

#[test]
fn validate_doc_enforces_required_and_types() {
    let model = todo_model();

    let missing = as_map(json!({"done": true}));
    assert!(validate_doc(&model, &missing, false).is_err());

    // PATCH semantics: required fields may be absent
    assert!(validate_doc(&model, &missing, true).is_ok());

    let wrong_type = as_map(json!({"subject": "x", "done": "yes"}));
    assert!(validate_doc(&model, &wrong_type, false).is_err());

    let bad_select = as_map(json!({"subject": "x", "priority": "Urgent"}));
    assert!(validate_doc(&model, &bad_select, false).is_err());

    let unknown = as_map(json!({"subject": "x", "extra": 1}));
    assert!(validate_doc(&model, &unknown, false).is_err());

    let ok = as_map(json!({"subject": "x", "done": false, "priority": "High"}));
    assert!(validate_doc(&model, &ok, false).is_ok());
}

#[test]
fn field_defs_deserialize_with_tagged_types() {
    let raw = json!({
        "name": "Event",
        "fields": [
            {"fieldname": "title", "fieldtype": "Data", "required": true},
            {"fieldname": "kind", "fieldtype": "Select", "options": ["Public", "Private"]},
            {"fieldname": "owner", "fieldtype": "Link", "target": "User"}
        ]
    });
    let model: ModelDef = serde_json::from_value(raw).unwrap();
    assert_eq!(model.fields.len(), 3);
    assert!(matches!(
        model.field("kind").unwrap().fieldtype,
        FieldType::Select { .. }
    ));
    assert!(
        matches!(&model.field("owner").unwrap().fieldtype, FieldType::Link { target } if target == "User")
    );
}
