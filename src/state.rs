//! Shared application context passed to every route. Constructed once by the
//! orchestrator; replaces ambient process-global state.

use crate::backend::DbBackend;
use crate::config::AppConfig;
use crate::model::ModelRegistry;
use crate::session::Session;
use std::sync::{Arc, RwLock, RwLockReadGuard};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DbBackend>,
    /// Mutated only during the bootstrap phase; read by handlers afterwards.
    pub models: Arc<RwLock<ModelRegistry>>,
    pub config: Arc<AppConfig>,
    pub session: Arc<Session>,
}

impl AppState {
    /// Read access to the model registry, tolerant of lock poisoning.
    pub fn models(&self) -> RwLockReadGuard<'_, ModelRegistry> {
        self.models.read().unwrap_or_else(|e| e.into_inner())
    }
}
