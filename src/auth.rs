//! Authentication: signup/login routes plus the token initialization and
//! enforcement layers. Installed by the orchestrator only when an AuthConfig
//! is supplied; order matters and is fixed there: signup, login, initialize,
//! enforce.

use crate::error::AppError;
use crate::model::ModelDef;
use crate::response::success_one;
use crate::state::AppState;
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

const DEFAULT_TOKEN_TTL_SECS: u64 = 86_400;

fn default_token_ttl() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    pub secret: String,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

impl AuthConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        AuthConfig {
            secret: secret.into(),
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }
}

#[derive(Clone)]
pub struct AuthState {
    pub app: AppState,
    pub config: AuthConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Request extension set by the initialization layer when a valid token is present.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub name: String,
}

#[derive(Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

fn user_model(state: &AppState) -> Result<ModelDef, AppError> {
    state
        .models()
        .get("User")
        .cloned()
        .ok_or_else(|| AppError::NotFound("User model not registered".into()))
}

async fn signup(
    State(auth): State<AuthState>,
    Json(creds): Json<Credentials>,
) -> Result<impl IntoResponse, AppError> {
    if !creds.email.contains('@') || creds.email.len() < 3 {
        return Err(AppError::Validation("email must be a valid address".into()));
    }
    if creds.password.is_empty() {
        return Err(AppError::Validation("password must not be empty".into()));
    }
    let model = user_model(&auth.app)?;

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(creds.password.as_bytes(), &salt)
        .map_err(|e| AppError::BadRequest(format!("password hashing failed: {}", e)))?
        .to_string();

    let mut doc = Map::new();
    doc.insert("name".into(), Value::String(creds.email.clone()));
    doc.insert("password_hash".into(), Value::String(hash));
    if let Some(full_name) = creds.full_name {
        doc.insert("full_name".into(), Value::String(full_name));
    }
    auth.app.db.insert(&model, doc).await?;
    Ok(success_one(json!({ "name": creds.email })))
}

async fn login(
    State(auth): State<AuthState>,
    Json(creds): Json<Credentials>,
) -> Result<impl IntoResponse, AppError> {
    let model = user_model(&auth.app)?;
    let invalid = || AppError::Unauthorized("invalid credentials".into());

    let doc = auth.app.db.get(&model, &creds.email).await?.ok_or_else(invalid)?;
    let stored = doc
        .get("password_hash")
        .and_then(Value::as_str)
        .ok_or_else(invalid)?
        .to_string();
    let parsed = PasswordHash::new(&stored).map_err(|_| invalid())?;
    Argon2::default()
        .verify_password(creds.password.as_bytes(), &parsed)
        .map_err(|_| invalid())?;

    let exp = Utc::now().timestamp() as usize + auth.config.token_ttl_secs as usize;
    let claims = Claims {
        sub: creds.email.clone(),
        exp,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(auth.config.secret.as_bytes()),
    )
    .map_err(|e| AppError::BadRequest(format!("token encoding failed: {}", e)))?;
    Ok(Json(json!({ "token": token, "user": creds.email })))
}

fn user_from_headers(headers: &HeaderMap, config: &AuthConfig) -> Option<AuthUser> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;
    Some(AuthUser {
        name: data.claims.sub,
    })
}

/// Initialization layer: resolves a Bearer token into an AuthUser extension.
/// Applied to all requests; never rejects on its own.
pub async fn initialize(State(auth): State<AuthState>, mut req: Request, next: Next) -> Response {
    if let Some(user) = user_from_headers(req.headers(), &auth.config) {
        req.extensions_mut().insert(user);
    }
    next.run(req).await
}

/// Enforcement layer for resource paths: rejects requests that carry no
/// authenticated user. Must be installed after the initialization layer.
pub async fn enforce(req: Request, next: Next) -> Response {
    if req.extensions().get::<AuthUser>().is_none() {
        return AppError::Unauthorized("authentication required".into()).into_response();
    }
    next.run(req).await
}

/// Signup and login routes. The orchestrator installs these before the
/// initialization and enforcement layers.
pub fn auth_routes(auth: AuthState) -> Router {
    Router::new()
        .route("/api/signup", post(signup))
        .route("/api/login", post(login))
        .with_state(auth)
}
