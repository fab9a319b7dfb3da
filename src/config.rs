use std::path::PathBuf;

use rocket::figment::Figment;
use serde::Deserialize;

use crate::oauth::GoogleConfig;

/// Application settings, read from the `outlay` table of Rocket's
/// figment (`Rocket.toml` or `ROCKET_*` environment overrides).
/// The session cookie is signed with Rocket's own `secret_key`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_minutes: i64,
    /// Federated login is disabled when no provider is configured.
    #[serde(default)]
    pub google: Option<GoogleConfig>,
}

impl AppConfig {
    pub fn from_figment(figment: &Figment) -> Self {
        figment.extract_inner("outlay").unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            db_path: default_db_path(),
            session_ttl_minutes: default_session_ttl(),
            google: None,
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data").join("outlay.sqlite")
}

fn default_session_ttl() -> i64 {
    60 * 24 * 7
}
