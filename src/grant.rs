//! Short-lived upload grants for direct-to-CDN uploads.
//!
//! A grant is `token`, `expiresAt` and `signature = HMAC-SHA1(private_key, token || expiresAt)`,
//! hex encoded. Nothing is stored after issuance: whoever holds the private key can
//! recompute the signature and check the expiry.

use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use thiserror::Error;
use tracing::debug;

use crate::models::UploadGrant;

type HmacSha1 = Hmac<Sha1>;

/// Lifetime of a grant in seconds (40 minutes).
pub const GRANT_TTL_SECS: i64 = 2400;

const TOKEN_BYTES: usize = 16;

#[derive(Debug, Error)]
pub enum GrantError {
    #[error("upload signing key is not configured")]
    MissingPrivateKey,
    #[error("upload signing key was rejected: {0}")]
    InvalidKey(String),
}

#[derive(Clone)]
pub struct GrantIssuer {
    private_key: Option<String>,
}

impl GrantIssuer {
    pub fn new(private_key: Option<String>) -> Self {
        Self {
            private_key: private_key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.private_key.is_some()
    }

    /// Issue a grant valid for [`GRANT_TTL_SECS`] from now.
    pub fn issue(&self) -> Result<UploadGrant, GrantError> {
        self.issue_at(Utc::now().timestamp())
    }

    pub fn issue_at(&self, issued_at: i64) -> Result<UploadGrant, GrantError> {
        let key = self
            .private_key
            .as_deref()
            .ok_or(GrantError::MissingPrivateKey)?;

        let mut raw = [0u8; TOKEN_BYTES];
        rand::rng().fill_bytes(&mut raw);
        let token = hex::encode(raw);

        let expires_at = issued_at + GRANT_TTL_SECS;
        let signature = sign(key, &token, expires_at)?;

        debug!(expires_at, "upload grant issued");

        Ok(UploadGrant {
            token,
            expires_at,
            signature,
        })
    }
}

impl std::fmt::Debug for GrantIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantIssuer")
            .field("configured", &self.is_configured())
            .finish()
    }
}

fn mac_for(private_key: &str, token: &str, expires_at: i64) -> Result<HmacSha1, GrantError> {
    let mut mac = HmacSha1::new_from_slice(private_key.as_bytes())
        .map_err(|e| GrantError::InvalidKey(e.to_string()))?;
    mac.update(token.as_bytes());
    mac.update(expires_at.to_string().as_bytes());
    Ok(mac)
}

/// Hex HMAC-SHA1 of `token` followed by the decimal expiry.
pub fn sign(private_key: &str, token: &str, expires_at: i64) -> Result<String, GrantError> {
    let mac = mac_for(private_key, token, expires_at)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a grant the way the CDN does: signature must match and `now` must be before expiry.
pub fn verify(private_key: &str, grant: &UploadGrant, now: i64) -> bool {
    if now >= grant.expires_at {
        return false;
    }
    let Ok(expected) = hex::decode(&grant.signature) else {
        return false;
    };
    match mac_for(private_key, &grant.token, grant.expires_at) {
        Ok(mac) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}
