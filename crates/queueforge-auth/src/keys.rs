//! Signing key lifecycle: generation, rotation, grace-period validation

use crate::{AuthError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// A symmetric signing key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    /// Key id carried in token headers as `kid`
    pub id: String,
    /// Signing algorithm (always HS256)
    pub algorithm: String,
    /// Base64url-encoded 32-byte secret
    pub secret: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// End of the key's signing life; validation continues through grace
    pub expires_at: DateTime<Utc>,
    /// Whether this is the current signing key
    pub active: bool,
}

impl KeyPair {
    /// Decoded secret bytes
    pub fn secret_bytes(&self) -> Result<Vec<u8>> {
        URL_SAFE_NO_PAD
            .decode(&self.secret)
            .map_err(|e| AuthError::TokenMalformed(format!("bad key material: {}", e)))
    }
}

/// Key lifecycle configuration
#[derive(Debug, Clone)]
pub struct KeyConfig {
    /// How often a new signing key becomes current
    pub rotation_interval: Duration,
    /// How long an expired key continues to validate
    pub grace_period: Duration,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            rotation_interval: Duration::from_secs(24 * 3_600),
            grace_period: Duration::from_secs(2 * 3_600),
        }
    }
}

impl KeyConfig {
    /// Validate all fields
    pub fn validate(&self) -> Result<()> {
        if self.rotation_interval.is_zero() {
            return Err(AuthError::Config {
                field: "keys.rotation_interval",
                reason: "duration must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Key table with one current key and graceful retirement of old keys
pub struct KeyManager {
    config: KeyConfig,
    keys: RwLock<HashMap<String, KeyPair>>,
    current_id: RwLock<String>,
}

impl KeyManager {
    /// Create a manager with a freshly generated current key
    pub fn new(config: KeyConfig) -> Result<Self> {
        config.validate()?;
        let manager = Self {
            config,
            keys: RwLock::new(HashMap::new()),
            current_id: RwLock::new(String::new()),
        };
        manager.rotate();
        Ok(manager)
    }

    fn generate(&self) -> KeyPair {
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        let now = Utc::now();
        KeyPair {
            id: Uuid::new_v4().to_string(),
            algorithm: "HS256".to_string(),
            secret: URL_SAFE_NO_PAD.encode(secret),
            created_at: now,
            expires_at: now
                + ChronoDuration::from_std(self.config.rotation_interval)
                    .unwrap_or_else(|_| ChronoDuration::hours(24)),
            active: true,
        }
    }

    /// Make a new key current; the previous key stays valid through grace
    pub fn rotate(&self) -> KeyPair {
        let new_key = self.generate();
        let mut keys = self.keys.write();
        let mut current = self.current_id.write();

        if let Some(previous) = keys.get_mut(current.as_str()) {
            previous.active = false;
        }
        *current = new_key.id.clone();
        keys.insert(new_key.id.clone(), new_key.clone());
        info!(kid = %new_key.id, "signing key rotated");
        new_key
    }

    /// The current signing key
    pub fn current_key(&self) -> Result<KeyPair> {
        let current = self.current_id.read();
        self.keys
            .read()
            .get(current.as_str())
            .cloned()
            .ok_or(AuthError::NoActiveKey)
    }

    /// A key by id, for validation; expired-past-grace keys are not found
    pub fn validation_key(&self, kid: &str) -> Result<KeyPair> {
        let keys = self.keys.read();
        let key = keys.get(kid).ok_or_else(|| AuthError::KeyNotFound(kid.to_string()))?;

        let cutoff = key.expires_at
            + ChronoDuration::from_std(self.config.grace_period).unwrap_or(ChronoDuration::zero());
        if Utc::now() >= cutoff {
            return Err(AuthError::KeyNotFound(kid.to_string()));
        }
        Ok(key.clone())
    }

    /// Remove keys past expiry plus grace; returns how many were dropped
    pub fn sweep_expired(&self) -> usize {
        let grace =
            ChronoDuration::from_std(self.config.grace_period).unwrap_or(ChronoDuration::zero());
        let now = Utc::now();
        let current = self.current_id.read().clone();
        let mut keys = self.keys.write();
        let before = keys.len();
        keys.retain(|id, key| *id == current || now < key.expires_at + grace);
        let removed = before - keys.len();
        if removed > 0 {
            debug!(removed, "expired signing keys swept");
        }
        removed
    }

    /// Number of keys in the table
    pub fn key_count(&self) -> usize {
        self.keys.read().len()
    }

    /// Rotation cadence
    pub fn rotation_interval(&self) -> Duration {
        self.config.rotation_interval
    }
}
