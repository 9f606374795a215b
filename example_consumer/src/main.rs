//! Example consumer: a small notes server over the sqlite backend, with
//! authentication enabled when AUTH_SECRET is set.

use chassis_sdk::{
    load_app_config, start, AppConfig, AuthConfig, ConnectionParams, FieldDef, FieldType, ModelDef,
    StartOptions,
};
use tracing_subscriber::EnvFilter;

fn note_model() -> ModelDef {
    ModelDef {
        name: "Note".into(),
        fields: vec![
            FieldDef {
                fieldname: "title".into(),
                label: Some("Title".into()),
                fieldtype: FieldType::Data,
                required: true,
                default: None,
            },
            FieldDef {
                fieldname: "body".into(),
                label: Some("Body".into()),
                fieldtype: FieldType::Text,
                required: false,
                default: None,
            },
            FieldDef {
                fieldname: "pinned".into(),
                label: Some("Pinned".into()),
                fieldtype: FieldType::Check,
                required: false,
                default: None,
            },
        ],
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("chassis_sdk=info".parse()?))
        .init();
    dotenvy::dotenv().ok();

    let config = match std::env::var("CONFIG_PATH") {
        Ok(path) => load_app_config(path).await?,
        Err(_) => AppConfig {
            port: std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8000),
            dev_mode: std::env::var("DEV_MODE").map(|v| v == "1").unwrap_or(false),
            ..AppConfig::default()
        },
    };

    let connection_params = ConnectionParams {
        db_path: Some(std::env::var("DB_PATH").unwrap_or_else(|_| "notes.db".into())),
        enable_cors: true,
        ..ConnectionParams::default()
    };

    let auth = std::env::var("AUTH_SECRET").ok().map(AuthConfig::new);

    let backend = std::env::var("BACKEND").unwrap_or_else(|_| "sqlite".into());
    tracing::info!(
        %backend,
        port = config.port,
        dev_mode = config.dev_mode,
        auth = auth.is_some(),
        "starting notes server"
    );

    start(StartOptions {
        backend,
        connection_params,
        models: Some(vec![note_model()]),
        auth,
        config,
        bootstrap_identity: None,
    })
    .await?;
    Ok(())
}
