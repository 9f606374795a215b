//! Bootstrap identity established during startup. The original design logged
//! in as a fixed administrative user; here the identity is a configurable
//! parameter with the same default.

use chrono::{DateTime, Utc};

pub const DEFAULT_BOOTSTRAP_IDENTITY: &str = "Administrator";

#[derive(Clone, Debug)]
pub struct Session {
    pub user: String,
    pub established_at: DateTime<Utc>,
}

impl Session {
    /// Establish the startup session. Called exactly once, before model
    /// registration and database initialization.
    pub fn establish(user: impl Into<String>) -> Self {
        let user = user.into();
        tracing::info!(user = %user, "bootstrap identity established");
        Session {
            user,
            established_at: Utc::now(),
        }
    }
}
