//! The auth adapter: OIDC authorization-code flow against the Pocket ID
//! provider, session credential issuing, and the HTTP endpoints around it.
//!
//! Flow: `/auth/login` redirects to the provider with a single-use state
//! nonce. `/auth/callback` verifies the nonce, exchanges the code, fetches
//! the userinfo, upserts the user and plants the credential as an HTTP-only
//! cookie. The same credential is what clients present in the WebSocket
//! `auth` handshake.

mod nonce;
mod token;

pub use nonce::NonceStore;
pub use token::{AuthError, SessionKey, TOKEN_TTL_MS};

use crate::config::ServerConfig;
use crate::store::Store;
use crate::{AppState, now_ms};
use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{AppendHeaders, IntoResponse, Redirect, Response};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use protocol::ids::UserId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// The cookie carrying the session credential.
pub const SESSION_COOKIE: &str = "forge_session";

/// Issues and validates credentials, talks to the identity provider.
pub struct AuthService {
    key: SessionKey,
    nonces: NonceStore,
    revoked: Mutex<HashSet<String>>,
    http: reqwest::Client,
    config: ServerConfig,
}

impl AuthService {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            key: SessionKey::new(&config.session_secret),
            nonces: NonceStore::default(),
            revoked: Mutex::new(HashSet::new()),
            http: reqwest::Client::new(),
            config: config.clone(),
        }
    }

    /// Resolves the user a credential was issued for.
    pub fn validate(&self, token: &str) -> Result<UserId, AuthError> {
        if self.revoked.lock().expect("revocation set poisoned").contains(token) {
            return Err(AuthError::Revoked);
        }
        self.key.validate(token, now_ms())
    }

    pub fn issue(&self, user_id: UserId) -> String {
        self.key.issue(user_id, now_ms())
    }

    /// Revokes a credential for the rest of its lifetime.
    pub fn revoke(&self, token: &str) {
        self.revoked
            .lock()
            .expect("revocation set poisoned")
            .insert(token.to_string());
    }

    /// The provider URL `/auth/login` redirects to.
    fn authorize_url(&self, state_nonce: &str) -> Result<String> {
        let mut url = reqwest::Url::parse(&format!("{}/authorize", self.config.pocket_id_url))
            .wrap_err("bad POCKET_ID_URL")?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.pocket_id_client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri())
            .append_pair("scope", "openid profile email")
            .append_pair("state", state_nonce);
        Ok(url.into())
    }

    /// Code exchange, userinfo fetch, user upsert, credential issue.
    async fn complete_login(&self, code: &str, store: &dyn Store) -> Result<String> {
        let tokens: TokenResponse = self
            .http
            .post(format!("{}/api/oidc/token", self.config.pocket_id_url))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", &self.config.redirect_uri()),
                ("client_id", &self.config.pocket_id_client_id),
                ("client_secret", &self.config.pocket_id_client_secret),
            ])
            .send()
            .await
            .wrap_err("token endpoint unreachable")?
            .error_for_status()
            .wrap_err("token exchange rejected")?
            .json()
            .await
            .wrap_err("malformed token response")?;

        let info: Userinfo = self
            .http
            .get(format!("{}/api/oidc/userinfo", self.config.pocket_id_url))
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .wrap_err("userinfo endpoint unreachable")?
            .error_for_status()
            .wrap_err("userinfo rejected")?
            .json()
            .await
            .wrap_err("malformed userinfo")?;

        let display_name = info
            .name
            .or(info.preferred_username)
            .unwrap_or_else(|| "Adventurer".to_string());
        let user = store
            .upsert_user(&info.sub, &display_name, info.email.as_deref())
            .await
            .map_err(|e| eyre!("user upsert failed: {e}"))?;
        tracing::info!(user = %user.id, subject = info.sub, "login completed");
        Ok(self.issue(user.id))
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct Userinfo {
    sub: String,
    name: Option<String>,
    preferred_username: Option<String>,
    email: Option<String>,
}

/// Pulls the credential out of the cookie header or a bearer header.
pub fn credential_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(cookies) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        for part in cookies.split(';') {
            if let Some((name, value)) = part.trim().split_once('=')
                && name == SESSION_COOKIE
            {
                return Some(value.to_string());
            }
        }
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn session_cookie(token: &str, max_age_secs: u64) -> String {
    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}")
}

/// `GET /auth/login`: 302 to the identity provider.
pub async fn login(State(state): State<Arc<AppState>>) -> Response {
    let nonce = state.auth.nonces.issue();
    match state.auth.authorize_url(&nonce) {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(error) => {
            tracing::error!(?error, "cannot build authorize url");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    code: String,
    state: String,
}

/// `GET /auth/callback`: verifies the state nonce, finishes the code flow
/// and plants the session cookie.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if !state.auth.nonces.consume(&query.state) {
        tracing::warn!("callback with unknown or reused state nonce");
        return (StatusCode::UNAUTHORIZED, "invalid state").into_response();
    }
    match state.auth.complete_login(&query.code, state.store.as_ref()).await {
        Ok(token) => {
            let cookie = session_cookie(&token, TOKEN_TTL_MS / 1000);
            (AppendHeaders([(header::SET_COOKIE, cookie)]), Redirect::to("/"))
                .into_response()
        }
        Err(error) => {
            tracing::error!(?error, "login failed");
            (StatusCode::BAD_GATEWAY, "login failed").into_response()
        }
    }
}

/// `POST /auth/logout`: revokes the presented credential, clears the cookie.
pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(token) = credential_from_headers(&headers) {
        state.auth.revoke(&token);
    }
    let cookie = session_cookie("", 0);
    (
        StatusCode::NO_CONTENT,
        AppendHeaders([(header::SET_COOKIE, cookie)]),
    )
        .into_response()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MeResponse {
    user_id: UserId,
    display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
}

/// `GET /auth/me`: the user behind the presented credential, or 401.
pub async fn me(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(token) = credential_from_headers(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let user_id = match state.auth.validate(&token) {
        Ok(id) => id,
        Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
    };
    match state.store.user(user_id).await {
        Ok(user) => Json(MeResponse {
            user_id: user.id,
            display_name: user.display_name,
            email: user.email,
        })
        .into_response(),
        Err(_) => StatusCode::UNAUTHORIZED.into_response(),
    }
}
