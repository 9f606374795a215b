//! Bootstrap orchestrator: brings the process from cold start to a listening
//! server in a fixed, strictly sequential order. Every step completes before
//! the next begins; any failure propagates and aborts startup.

use crate::auth::{self, AuthConfig, AuthState};
use crate::backend::{BackendFactory, BackendRegistry, ConnectionParams, DbBackend};
use crate::config::AppConfig;
use crate::error::StartupError;
use crate::model::{ModelDef, ModelRegistry};
use crate::realtime::realtime_routes;
use crate::routes::{common_routes, print_routes, resource_routes, HtmlPrintRenderer, PrintRenderer};
use crate::session::{Session, DEFAULT_BOOTSTRAP_IDENTITY};
use crate::state::AppState;
use axum::http::{header, HeaderValue};
use axum::Router;
use std::sync::{Arc, RwLock};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Request bodies above this size are rejected before reaching a handler.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

pub struct StartOptions {
    /// Name of the backend variant; must be present in the registry.
    pub backend: String,
    pub connection_params: ConnectionParams,
    /// Additional models merged on top of the built-in set.
    pub models: Option<Vec<ModelDef>>,
    /// When present, enables the authentication routes and layers.
    pub auth: Option<AuthConfig>,
    pub config: AppConfig,
    /// Identity for the startup session; defaults to "Administrator".
    pub bootstrap_identity: Option<String>,
}

pub struct Bootstrap {
    backends: BackendRegistry,
    renderer: Arc<dyn PrintRenderer>,
}

impl Bootstrap {
    pub fn new() -> Self {
        Bootstrap {
            backends: BackendRegistry::with_builtin(),
            renderer: Arc::new(HtmlPrintRenderer),
        }
    }

    pub fn with_registry(backends: BackendRegistry) -> Self {
        Bootstrap {
            backends,
            renderer: Arc::new(HtmlPrintRenderer),
        }
    }

    /// Register an additional backend variant before bootstrap.
    pub fn register_backend(&mut self, name: impl Into<String>, factory: BackendFactory) {
        self.backends.register(name, factory);
    }

    /// Swap the print renderer (the PDF engine is an external collaborator).
    pub fn with_renderer(mut self, renderer: Arc<dyn PrintRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Steps 1-7 and 9 of the startup sequence. `PreparedApp::serve` is step
    /// 8. Database connect and migrate have both completed by the time this
    /// returns, so no route is reachable against an unmigrated schema.
    pub async fn prepare(&self, options: StartOptions) -> Result<PreparedApp, StartupError> {
        let StartOptions {
            backend,
            connection_params,
            models,
            auth,
            config,
            bootstrap_identity,
        } = options;

        // 1. framework state and the startup identity
        let session = Arc::new(Session::establish(
            bootstrap_identity.unwrap_or_else(|| DEFAULT_BOOTSTRAP_IDENTITY.to_string()),
        ));
        let mut registry = ModelRegistry::builtin()?;

        // 2. caller-supplied models merge on top of the built-in set
        if let Some(models) = models {
            registry.register_all(models)?;
        }

        // 3. construct the named adapter, connect, migrate
        let db = init_db(&self.backends, &backend, &connection_params, &registry).await?;

        let port = config.port;
        let state = AppState {
            db,
            models: Arc::new(RwLock::new(registry)),
            config: Arc::new(config),
            session,
        };

        // 4-7, 9. middleware chain, realtime binding, routes
        let router = build_router(&state, &connection_params, auth.as_ref(), self.renderer.clone());

        Ok(PreparedApp { router, state, port })
    }
}

impl Default for Bootstrap {
    fn default() -> Self {
        Bootstrap::new()
    }
}

/// Select the named backend variant, connect, then run schema migration, in
/// that exact order. An unknown name fails before any connect attempt;
/// migration never runs against an unconnected handle.
pub async fn init_db(
    backends: &BackendRegistry,
    backend: &str,
    params: &ConnectionParams,
    models: &ModelRegistry,
) -> Result<Arc<dyn DbBackend>, StartupError> {
    let mut db = backends.create(backend, params)?;
    db.connect().await?;
    db.migrate(models).await?;
    Ok(Arc::from(db))
}

fn build_router(
    state: &AppState,
    params: &ConnectionParams,
    auth: Option<&AuthConfig>,
    renderer: Arc<dyn PrintRenderer>,
) -> Router {
    // resource API, wrapped by the enforcement layer when auth is on
    let mut resources = resource_routes(state.clone());
    if auth.is_some() {
        resources = resources.route_layer(axum::middleware::from_fn(auth::enforce));
    }

    let mut app = Router::new()
        .merge(common_routes())
        .merge(realtime_routes(state.clone()))
        .merge(resources);

    // signup and login routes, then the initialization layer around everything
    if let Some(cfg) = auth {
        let auth_state = AuthState {
            app: state.clone(),
            config: cfg.clone(),
        };
        app = app
            .merge(auth::auth_routes(auth_state.clone()))
            .layer(axum::middleware::from_fn_with_state(auth_state, auth::initialize));
    }

    app = app
        .nest_service("/static", ServeDir::new(&state.config.static_path))
        .fallback_service(ServeDir::new(&state.config.dist_path));

    // dev-only: uncached asset serving; never mounted outside dev mode
    if state.config.dev_mode {
        let dev_assets = ServiceBuilder::new()
            .layer(SetResponseHeaderLayer::overriding(
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-store"),
            ))
            .service(ServeDir::new(&state.config.static_path));
        app = app.nest_service("/dev", dev_assets);
    }

    // the print route is the last mount of the sequence
    app = app.merge(print_routes(state.clone(), renderer));

    if params.enable_cors {
        app = app.layer(CorsLayer::permissive());
    }

    app.layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
}

/// Fully wired application, ready to listen.
pub struct PreparedApp {
    pub router: Router,
    pub state: AppState,
    port: u16,
}

impl std::fmt::Debug for PreparedApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedApp")
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl PreparedApp {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Step 8: bind the listener and serve. Startup is complete once the
    /// socket is listening; the announcement line is the only startup output.
    pub async fn serve(self) -> Result<(), StartupError> {
        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .await
            .map_err(StartupError::Listen)?;
        tracing::info!("chassis server running on http://localhost:{}", self.port);
        axum::serve(listener, self.router)
            .await
            .map_err(StartupError::Listen)?;
        Ok(())
    }
}

/// One-shot bootstrap: prepare and serve. Side effects are the contract; on
/// success this only returns when the server shuts down.
pub async fn start(options: StartOptions) -> Result<(), StartupError> {
    Bootstrap::new().prepare(options).await?.serve().await
}
