//! Application configuration: asset paths, port, dev flag.
//! Built once at process start and never mutated; dev mode is an explicit
//! field rather than an ambient environment read, so the orchestrator stays
//! a function of its inputs.

use crate::error::StartupError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root directory served at `/` (built frontend bundle).
    pub dist_path: PathBuf,
    /// Directory served under `/static`.
    pub static_path: PathBuf,
    pub port: u16,
    /// Mounts dev-only no-cache asset serving under `/dev`.
    #[serde(default)]
    pub dev_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            dist_path: PathBuf::from("dist"),
            static_path: PathBuf::from("static"),
            port: 8000,
            dev_mode: false,
        }
    }
}

/// Load config from a JSON file.
pub async fn load_app_config(path: impl AsRef<Path>) -> Result<AppConfig, StartupError> {
    let raw = tokio::fs::read_to_string(path.as_ref())
        .await
        .map_err(|e| StartupError::ConfigLoad(e.to_string()))?;
    serde_json::from_str(&raw).map_err(|e| StartupError::ConfigLoad(e.to_string()))
}
