//! Administrator authentication
//!
//! A single password, stored as an Argon2 hash, guards the API. Successful
//! logins mint random session tokens; only their SHA-256 digests are kept in
//! memory, so sessions do not survive a restart.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use wgui_common::{Error, Result};

use crate::config::AuthConfig;
use crate::server::{ApiError, AppState};

/// Session cookie name
pub const SESSION_COOKIE: &str = "wgui_session";

/// Environment variable holding the first-start password
pub const ADMIN_PASSWORD_ENV: &str = "WGUI_ADMIN_PASSWORD";

const MIN_PASSWORD_LEN: usize = 8;

pub fn now_epoch_secs() -> i64 {
    Utc::now().timestamp()
}

/// On-disk credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Credentials {
    password_hash: String,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct Session {
    expires_at: i64,
}

#[derive(Debug, Default)]
struct Attempts {
    failed: u32,
    locked_until: i64,
}

/// Token handed to a client after login
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: i64,
}

/// Why a login was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginFailure {
    InvalidPassword,
    Locked { until: i64 },
}

/// Password and session manager
pub struct AuthManager {
    credentials_path: Option<PathBuf>,
    password_hash: RwLock<String>,
    sessions: Mutex<HashMap<String, Session>>,
    attempts: Mutex<Attempts>,
    settings: AuthConfig,
}

impl AuthManager {
    /// Load the stored hash, or create one on first start.
    ///
    /// Returns the generated password when neither a credentials file nor
    /// `WGUI_ADMIN_PASSWORD` was available.
    pub fn load_or_init(path: &Path, settings: AuthConfig) -> Result<(Self, Option<String>)> {
        let mut generated = None;
        let hash = if path.exists() {
            let data = std::fs::read(path).map_err(|e| {
                Error::Storage(format!("failed to read {}: {}", path.display(), e))
            })?;
            let creds: Credentials = serde_json::from_slice(&data).map_err(|e| {
                Error::Storage(format!("failed to parse {}: {}", path.display(), e))
            })?;
            creds.password_hash
        } else {
            let password = match std::env::var(ADMIN_PASSWORD_ENV) {
                Ok(p) if !p.is_empty() => p,
                _ => {
                    let p = hex::encode(rand::random::<[u8; 12]>());
                    generated = Some(p.clone());
                    p
                }
            };
            let hash = hash_password(&password)?;
            write_credentials(path, &hash)?;
            info!("Initialized administrator credentials at {}", path.display());
            hash
        };

        let manager = Self {
            credentials_path: Some(path.to_path_buf()),
            password_hash: RwLock::new(hash),
            sessions: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Attempts::default()),
            settings,
        };
        Ok((manager, generated))
    }

    /// Manager that keeps its hash in memory only
    pub fn in_memory(password: &str, settings: AuthConfig) -> Result<Self> {
        Ok(Self {
            credentials_path: None,
            password_hash: RwLock::new(hash_password(password)?),
            sessions: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Attempts::default()),
            settings,
        })
    }

    pub fn settings(&self) -> &AuthConfig {
        &self.settings
    }

    /// Check the password and open a session
    pub fn login(&self, password: &str, now: i64) -> std::result::Result<IssuedSession, LoginFailure> {
        {
            let attempts = self.attempts.lock();
            if attempts.locked_until > now {
                return Err(LoginFailure::Locked {
                    until: attempts.locked_until,
                });
            }
        }

        let hash = self.password_hash.read().clone();
        if !verify_password(password, &hash) {
            let mut attempts = self.attempts.lock();
            attempts.failed += 1;
            if attempts.failed >= self.settings.max_failed_attempts {
                attempts.locked_until = now + self.settings.lockout_secs as i64;
                attempts.failed = 0;
                warn!(
                    "Too many failed logins, locked until {}",
                    attempts.locked_until
                );
            }
            return Err(LoginFailure::InvalidPassword);
        }

        *self.attempts.lock() = Attempts::default();

        let token = hex::encode(rand::random::<[u8; 32]>());
        let expires_at = now + self.settings.session_ttl_secs as i64;
        let mut sessions = self.sessions.lock();
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(token_digest(&token), Session { expires_at });
        debug!("Opened session, {} active", sessions.len());

        Ok(IssuedSession { token, expires_at })
    }

    /// True when `token` names a live session
    pub fn validate(&self, token: &str, now: i64) -> bool {
        let digest = token_digest(token);
        let mut sessions = self.sessions.lock();
        match sessions.get(&digest) {
            Some(s) if s.expires_at > now => true,
            Some(_) => {
                sessions.remove(&digest);
                false
            }
            None => false,
        }
    }

    pub fn logout(&self, token: &str) {
        self.sessions.lock().remove(&token_digest(token));
    }

    /// Replace the password, ending every session except `keep`
    pub fn change_password(&self, current: &str, new: &str, keep: Option<&str>) -> Result<()> {
        let hash = self.password_hash.read().clone();
        if !verify_password(current, &hash) {
            return Err(Error::Unauthorized("Current password is incorrect".to_string()));
        }
        if new.chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let new_hash = hash_password(new)?;
        if let Some(path) = &self.credentials_path {
            write_credentials(path, &new_hash)?;
        }
        *self.password_hash.write() = new_hash;

        let keep = keep.map(token_digest);
        self.sessions
            .lock()
            .retain(|digest, _| Some(digest) == keep.as_ref());
        info!("Administrator password changed");
        Ok(())
    }
}

/// Session token from `Authorization: Bearer` or the session cookie
pub fn request_token(headers: &axum::http::HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    bearer.or_else(|| {
        CookieJar::from_headers(headers)
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
    })
}

/// Middleware that requires a live session
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    match request_token(request.headers()) {
        Some(token) if state.auth.validate(&token, now_epoch_secs()) => next.run(request).await,
        _ => ApiError(Error::Unauthorized("Not authenticated".to_string())).into_response(),
    }
}

fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| Error::Internal(format!("password hashing failed: {}", e)))
}

fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Stored password hash is unreadable: {}", e);
            false
        }
    }
}

fn write_credentials(path: &Path, hash: &str) -> Result<()> {
    let creds = Credentials {
        password_hash: hash.to_string(),
        updated_at: Utc::now(),
    };
    let mut content = serde_json::to_vec_pretty(&creds)?;
    content.push(b'\n');
    wgui_common::store::write_atomic(path, &content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AuthConfig {
        AuthConfig {
            max_failed_attempts: 3,
            lockout_secs: 60,
            session_ttl_secs: 100,
            ..Default::default()
        }
    }

    #[test]
    fn test_login_and_expiry() {
        let auth = AuthManager::in_memory("correct horse", settings()).unwrap();

        assert_eq!(
            auth.login("wrong", 1000).unwrap_err(),
            LoginFailure::InvalidPassword
        );
        let session = auth.login("correct horse", 1000).unwrap();
        assert_eq!(session.expires_at, 1100);
        assert!(auth.validate(&session.token, 1050));
        assert!(!auth.validate(&session.token, 1100));
        assert!(!auth.validate("bogus", 1050));
    }

    #[test]
    fn test_logout() {
        let auth = AuthManager::in_memory("correct horse", settings()).unwrap();
        let session = auth.login("correct horse", 0).unwrap();
        auth.logout(&session.token);
        assert!(!auth.validate(&session.token, 1));
    }

    #[test]
    fn test_lockout() {
        let auth = AuthManager::in_memory("correct horse", settings()).unwrap();
        for _ in 0..3 {
            assert_eq!(auth.login("nope", 1000).unwrap_err(), LoginFailure::InvalidPassword);
        }
        assert_eq!(
            auth.login("correct horse", 1010).unwrap_err(),
            LoginFailure::Locked { until: 1060 }
        );
        assert!(auth.login("correct horse", 1061).is_ok());
    }

    #[test]
    fn test_change_password_keeps_caller_session() {
        let auth = AuthManager::in_memory("correct horse", settings()).unwrap();
        let mine = auth.login("correct horse", 0).unwrap();
        let other = auth.login("correct horse", 0).unwrap();

        let err = auth.change_password("wrong", "battery staple", None).unwrap_err();
        assert_eq!(err.kind(), wgui_common::ErrorKind::Unauthorized);
        let err = auth.change_password("correct horse", "short", None).unwrap_err();
        assert_eq!(err.kind(), wgui_common::ErrorKind::Validation);

        auth.change_password("correct horse", "battery staple", Some(&mine.token))
            .unwrap();
        assert!(auth.validate(&mine.token, 1));
        assert!(!auth.validate(&other.token, 1));
        assert!(auth.login("battery staple", 2).is_ok());
    }

    #[test]
    fn test_credentials_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(
            &path,
            serde_json::to_vec(&Credentials {
                password_hash: hash_password("first password").unwrap(),
                updated_at: Utc::now(),
            })
            .unwrap(),
        )
        .unwrap();

        let (auth, generated) = AuthManager::load_or_init(&path, settings()).unwrap();
        assert!(generated.is_none());
        auth.change_password("first password", "second password", None).unwrap();

        let (reloaded, _) = AuthManager::load_or_init(&path, settings()).unwrap();
        assert!(reloaded.login("second password", 0).is_ok());
    }

    #[test]
    fn test_request_token_sources() {
        let mut headers = axum::http::HeaderMap::new();
        assert!(request_token(&headers).is_none());

        headers.insert("cookie", "wgui_session=abc123".parse().unwrap());
        assert_eq!(request_token(&headers).as_deref(), Some("abc123"));

        headers.insert(AUTHORIZATION, "Bearer xyz".parse().unwrap());
        assert_eq!(request_token(&headers).as_deref(), Some("xyz"));
    }
}
