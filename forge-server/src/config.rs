//! Server configuration, read once from the environment at startup.

use color_eyre::Result;
use std::env;
use std::path::PathBuf;

/// Everything the server needs from the outside world.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port for HTTP and WebSocket traffic.
    pub port: u16,
    /// Path of the embedded database.
    pub database_path: PathBuf,
    /// Base URL of the Pocket ID identity provider.
    pub pocket_id_url: String,
    pub pocket_id_client_id: String,
    pub pocket_id_client_secret: String,
    /// Secret for signing session credentials.
    pub session_secret: String,
}

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATABASE_PATH: &str = "forge.db";
const DEFAULT_POCKET_ID_URL: &str = "http://localhost:1411";
const DEV_SESSION_SECRET: &str = "insecure-dev-secret";

fn var_or(name: &str, fallback: &str) -> String {
    env::var(name).unwrap_or_else(|_| fallback.to_string())
}

impl ServerConfig {
    /// Reads `PORT`, `DATABASE_PATH`, `POCKET_ID_URL`, `POCKET_ID_CLIENT_ID`,
    /// `POCKET_ID_CLIENT_SECRET` and `SESSION_SECRET`. Unset values fall back
    /// to local development defaults, with a warning for the secret ones.
    pub fn from_env() -> Result<Self> {
        let port = match env::var("PORT") {
            Ok(raw) => raw.parse()?,
            Err(_) => DEFAULT_PORT,
        };

        let session_secret = var_or("SESSION_SECRET", DEV_SESSION_SECRET);
        if session_secret == DEV_SESSION_SECRET {
            tracing::warn!("SESSION_SECRET not set, using the development secret");
        }
        let pocket_id_client_secret = var_or("POCKET_ID_CLIENT_SECRET", "");
        if pocket_id_client_secret.is_empty() {
            tracing::warn!("POCKET_ID_CLIENT_SECRET not set, logins will fail");
        }

        Ok(Self {
            port,
            database_path: PathBuf::from(var_or("DATABASE_PATH", DEFAULT_DATABASE_PATH)),
            pocket_id_url: var_or("POCKET_ID_URL", DEFAULT_POCKET_ID_URL)
                .trim_end_matches('/')
                .to_string(),
            pocket_id_client_id: var_or("POCKET_ID_CLIENT_ID", "rune-forge"),
            pocket_id_client_secret,
            session_secret,
        })
    }

    /// The OIDC redirect URI registered with the identity provider.
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/auth/callback", self.port)
    }
}
