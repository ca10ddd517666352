//! Accounts and signed sessions.
//!
//! Passwords are stored as argon2 hashes in the `users` collection. A successful
//! sign-in yields an HS256 JWT that later requests present either as a bearer token
//! or in a `session` cookie.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::http::{header, HeaderMap};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

use crate::{
    config::Config,
    datastore::{with_timeout, Datastore, Document, Filter},
    error::ApiError,
    models::{SessionResponse, SessionUser, User},
};

pub const USERS: &str = "users";
pub const SESSION_COOKIE: &str = "session";

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// A verified session attached to the request by the access middleware.
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub user: SessionUser,
    pub expires_at: i64,
}

#[derive(Clone)]
pub struct SessionAuth {
    store: Arc<dyn Datastore>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    max_age: Duration,
    timeout: Duration,
}

impl SessionAuth {
    pub fn new(store: Arc<dyn Datastore>, config: &Config) -> Self {
        let secret = match &config.session_secret {
            Some(secret) => secret.as_bytes().to_vec(),
            None => {
                warn!("SESSION_SECRET not set, using a random secret; sessions end on restart");
                let mut secret = vec![0u8; 32];
                rand::rng().fill_bytes(&mut secret);
                secret
            }
        };

        Self {
            store,
            encoding: EncodingKey::from_secret(&secret),
            decoding: DecodingKey::from_secret(&secret),
            max_age: config.session_max_age,
            timeout: config.datastore_timeout,
        }
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<(), ApiError> {
        let email = email.trim();
        if !email.contains('@') || password.trim().chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::Unprocessable(
                "Invalid input - password should be at least 6 characters long.".to_string(),
            ));
        }

        let exists = || ApiError::Unprocessable("User already exists!".to_string());

        // Skips the hash for the common case; the insert below is what enforces uniqueness.
        if self.find_user(email).await?.is_some() {
            return Err(exists());
        }

        let password = password.to_string();
        let hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| anyhow::anyhow!("password hashing task failed: {}", e))??;

        let mut doc = Document::new();
        doc.insert("email".into(), json!(email));
        doc.insert("password".into(), json!(hash));
        doc.insert("createdAt".into(), json!(Utc::now()));

        let created = with_timeout(
            self.timeout,
            self.store
                .create_if_absent(USERS, &Filter::eq("email", email), doc),
        )
        .await
        .map_err(|e| ApiError::persistence("Failed to create user", e))?;
        if created.is_none() {
            warn!("[POST /api/auth/register] Lost a race registering {}", email);
            return Err(exists());
        }

        info!("[POST /api/auth/register] ✅ User registered: {}", email);
        Ok(())
    }

    /// Check credentials and hand out a session token.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<SessionResponse, ApiError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(ApiError::Validation("Invalid credentials".to_string()));
        }

        let invalid = || ApiError::Unauthorized("Invalid email or password".to_string());

        let user = self.find_user(email).await?.ok_or_else(invalid)?;

        let password = password.to_string();
        let hash = user.password.clone();
        let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| anyhow::anyhow!("password check task failed: {}", e))?;
        if !matches {
            warn!("[POST /api/auth/login] Rejected sign-in for {}", email);
            return Err(invalid());
        }

        let session_user = SessionUser {
            id: user.id,
            email: user.email,
        };
        let (token, expires_at) = self.issue_session(&session_user, Utc::now().timestamp())?;
        info!("[POST /api/auth/login] ✅ Signed in {}", session_user.email);

        Ok(SessionResponse {
            token,
            expires_at,
            user: session_user,
        })
    }

    pub fn issue_session(&self, user: &SessionUser, now: i64) -> Result<(String, i64), ApiError> {
        let exp = now + self.max_age.as_secs() as i64;
        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            iat: now,
            exp,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| anyhow::anyhow!("failed to sign session: {}", e))?;
        Ok((token, exp))
    }

    /// `Set-Cookie` value that hands the token to browsers for the session's lifetime.
    pub fn session_cookie(&self, token: &str) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            SESSION_COOKIE,
            token,
            self.max_age.as_secs()
        )
    }

    pub fn verify_session(&self, token: &str) -> Option<Session> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding, &validation)
            .ok()
            .map(|data| Session {
                user: SessionUser {
                    id: data.claims.sub,
                    email: data.claims.email,
                },
                expires_at: data.claims.exp,
            })
    }

    /// Look for a session token in `Authorization: Bearer` first, then the session cookie.
    pub fn session_from_headers(&self, headers: &HeaderMap) -> Option<Session> {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);

        let cookie = || {
            headers
                .get_all(header::COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(';'))
                .filter_map(|pair| pair.trim().split_once('='))
                .find(|(name, _)| *name == SESSION_COOKIE)
                .map(|(_, value)| value.to_string())
        };

        match bearer {
            Some(token) => self.verify_session(token),
            None => cookie().and_then(|token| self.verify_session(&token)),
        }
    }

    async fn find_user(&self, email: &str) -> Result<Option<User>, ApiError> {
        let found = with_timeout(
            self.timeout,
            self.store.find_one(USERS, &Filter::eq("email", email)),
        )
        .await
        .map_err(|e| ApiError::persistence("Failed to look up user", e))?;

        found
            .map(|doc| serde_json::from_value::<User>(Value::Object(doc)))
            .transpose()
            .map_err(|e| ApiError::persistence("Failed to look up user", e.into()))
    }
}

/// `Set-Cookie` value that makes browsers drop the session cookie.
pub fn cleared_session_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}

fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("failed to hash password: {}", e))
}

/// A stored hash that does not parse never matches.
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
