//! Chassis SDK: bootstrap for model-driven application servers.

pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
pub mod model;
pub mod realtime;
pub mod response;
pub mod routes;
pub mod server;
pub mod session;
pub mod state;

pub use auth::{AuthConfig, AuthUser};
pub use backend::{
    BackendFactory, BackendRegistry, ChangeAction, ChangeEvent, ConnectionParams, DbBackend,
};
pub use config::{load_app_config, AppConfig};
pub use error::{AppError, StartupError};
pub use model::{validate_doc, FieldDef, FieldType, ModelDef, ModelRegistry};
pub use routes::{HtmlPrintRenderer, PrintRenderer};
pub use server::{init_db, start, Bootstrap, PreparedApp, StartOptions};
pub use session::{Session, DEFAULT_BOOTSTRAP_IDENTITY};
pub use state::AppState;
