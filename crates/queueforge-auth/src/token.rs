//! Token signing, validation, and revocation
//!
//! Tokens are three base64url segments: header, claims, signature. The
//! signature is HMAC-SHA256 over `header.claims` with the key named by the
//! header's `kid`; verification is constant-time via the Mac interface.

use crate::keys::KeyManager;
use crate::rbac::Role;
use crate::{AuthError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Token segment header
#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
    kid: String,
}

/// Token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject the token was issued to
    pub sub: String,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
    /// Expiry, unix seconds
    pub exp: i64,
    /// Issue time, unix seconds
    pub iat: i64,
    /// Not valid before, unix seconds
    pub nbf: i64,
    /// Unique token id, the revocation handle
    pub jti: String,
    /// Id of the key that signed the token
    pub key_id: String,
    /// Granted roles
    pub roles: Vec<Role>,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Token type (always "bearer")
    pub token_type: String,
}

/// A revoked token entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokedToken {
    /// Revoked token id
    pub jwt_id: String,
    /// When it was revoked
    pub revoked_at: DateTime<Utc>,
    /// Operator-supplied reason
    pub reason: String,
}

/// Token issuance and validation settings
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Longest TTL a caller may request
    pub max_ttl: Duration,
    /// TTL applied when the caller requests none (or zero)
    pub default_ttl: Duration,
    /// Issuer written into claims
    pub issuer: String,
    /// Audience written into claims
    pub audience: String,
    /// Clock skew tolerated on nbf/exp checks (zero by default)
    pub clock_skew: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            max_ttl: Duration::from_secs(24 * 3_600),
            default_ttl: Duration::from_secs(3_600),
            issuer: "queueforge".to_string(),
            audience: "queueforge-api".to_string(),
            clock_skew: Duration::ZERO,
        }
    }
}

impl TokenConfig {
    /// Validate all fields
    pub fn validate(&self) -> Result<()> {
        if self.max_ttl.is_zero() {
            return Err(AuthError::Config {
                field: "token.max_ttl",
                reason: "duration must be positive".to_string(),
            });
        }
        if self.default_ttl > self.max_ttl {
            return Err(AuthError::Config {
                field: "token.default_ttl",
                reason: "must not exceed max_ttl".to_string(),
            });
        }
        Ok(())
    }
}

/// Issues, validates, and revokes signed tokens
pub struct TokenService {
    keys: Arc<KeyManager>,
    config: TokenConfig,
    revoked: RwLock<HashMap<String, RevokedToken>>,
}

impl TokenService {
    /// Create a service over a key manager
    pub fn new(keys: Arc<KeyManager>, config: TokenConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            keys,
            config,
            revoked: RwLock::new(HashMap::new()),
        })
    }

    /// Issue a token; a zero/absent TTL takes the default, and requests are
    /// clamped to the configured maximum
    pub fn generate(
        &self,
        subject: &str,
        roles: Vec<Role>,
        scopes: Vec<String>,
        ttl: Option<Duration>,
    ) -> Result<(String, Claims)> {
        let key = self.keys.current_key()?;
        let ttl = match ttl {
            None => self.config.default_ttl,
            Some(requested) if requested.is_zero() => self.config.default_ttl,
            Some(requested) => requested.min(self.config.max_ttl),
        };

        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            exp: now.timestamp() + ttl.as_secs() as i64,
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            key_id: key.id.clone(),
            roles,
            scopes,
            token_type: "bearer".to_string(),
        };

        let header = Header {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
            kid: key.id.clone(),
        };

        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
        let claims_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signing_input = format!("{}.{}", header_b64, claims_b64);

        let mut mac = HmacSha256::new_from_slice(&key.secret_bytes()?)
            .map_err(|_| AuthError::NoActiveKey)?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        debug!(subject, jti = %claims.jti, "token issued");
        Ok((format!("{}.{}", signing_input, signature), claims))
    }

    /// Validate a raw token or an `Authorization: Bearer ...` value
    pub fn validate(&self, bearer_or_raw: &str) -> Result<Claims> {
        let raw = strip_bearer(bearer_or_raw);
        if raw.is_empty() {
            return Err(AuthError::TokenMissing);
        }

        let mut segments = raw.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(AuthError::TokenMalformed("expected three segments".to_string()));
        };

        let header: Header = serde_json::from_slice(&decode_segment(header_b64)?)
            .map_err(|e| AuthError::TokenMalformed(format!("bad header: {}", e)))?;
        if header.alg != "HS256" {
            return Err(AuthError::TokenMalformed(format!("unsupported alg {}", header.alg)));
        }

        let key = self.keys.validation_key(&header.kid)?;

        let signing_input = format!("{}.{}", header_b64, claims_b64);
        let signature = decode_segment(signature_b64)?;
        let mut mac = HmacSha256::new_from_slice(&key.secret_bytes()?)
            .map_err(|_| AuthError::SignatureMismatch)?;
        mac.update(signing_input.as_bytes());
        // Mac::verify_slice is constant-time
        mac.verify_slice(&signature).map_err(|_| AuthError::SignatureMismatch)?;

        let claims: Claims = serde_json::from_slice(&decode_segment(claims_b64)?)
            .map_err(|e| AuthError::TokenMalformed(format!("bad claims: {}", e)))?;

        if self.revoked.read().contains_key(&claims.jti) {
            return Err(AuthError::TokenRevoked);
        }

        let now = Utc::now().timestamp();
        let skew = self.config.clock_skew.as_secs() as i64;
        if now < claims.nbf - skew {
            return Err(AuthError::TokenNotYetValid);
        }
        if now >= claims.exp + skew {
            return Err(AuthError::TokenExpired);
        }

        Ok(claims)
    }

    /// Revoke a token by id; subsequent validations fail with TOKEN_REVOKED
    pub fn revoke(&self, jti: &str, reason: impl Into<String>) {
        let entry = RevokedToken {
            jwt_id: jti.to_string(),
            revoked_at: Utc::now(),
            reason: reason.into(),
        };
        info!(jti, reason = %entry.reason, "token revoked");
        self.revoked.write().insert(jti.to_string(), entry);
    }

    /// Whether a token id is revoked
    pub fn is_revoked(&self, jti: &str) -> bool {
        self.revoked.read().contains_key(jti)
    }

    /// Drop revocations older than any token could still live
    /// (max TTL plus skew); returns how many were removed
    pub fn sweep_revoked(&self) -> usize {
        let horizon = chrono::Duration::from_std(self.config.max_ttl + self.config.clock_skew)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let cutoff = Utc::now() - horizon;
        let mut revoked = self.revoked.write();
        let before = revoked.len();
        revoked.retain(|_, entry| entry.revoked_at > cutoff);
        before - revoked.len()
    }
}

fn strip_bearer(value: &str) -> &str {
    let trimmed = value.trim();
    trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))
        .unwrap_or(trimmed)
        .trim()
}

fn decode_segment(segment: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AuthError::TokenMalformed(format!("bad base64: {}", e)))
}
