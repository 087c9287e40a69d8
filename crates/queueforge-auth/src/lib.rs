//! QueueForge auth core
//!
//! Signed-token issuance and validation (HMAC-SHA256 with rotating keys),
//! role/scope authorization with decision caching, token revocation, and an
//! append-only audit log with rotation and sensitive-field redaction.

pub mod api;
pub mod audit;
pub mod keys;
pub mod rbac;
pub mod service;
pub mod token;

pub use api::{create_auth_router, AuthApiState};
pub use audit::{AuditConfig, AuditLogger, AuditQuery, AuditRecord};
pub use keys::{KeyConfig, KeyManager, KeyPair};
pub use rbac::{AuthorizationResult, Authorizer, AuthzConfig, Role};
pub use service::{AuthConfig, AuthService};
pub use token::{Claims, RevokedToken, TokenConfig, TokenService};

use thiserror::Error;

/// Auth core errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid configuration: {field}: {reason}")]
    Config {
        /// Offending configuration field
        field: &'static str,
        /// Why validation rejected it
        reason: String,
    },

    #[error("no token provided")]
    TokenMissing,

    #[error("malformed token: {0}")]
    TokenMalformed(String),

    #[error("token expired")]
    TokenExpired,

    #[error("token not yet valid")]
    TokenNotYetValid,

    #[error("token revoked")]
    TokenRevoked,

    #[error("unknown signing key: {0}")]
    KeyNotFound(String),

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("no active signing key")]
    NoActiveKey,

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl AuthError {
    /// Stable error code surfaced by the HTTP API
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "CONFIG_INVALID",
            Self::TokenMissing => "TOKEN_MISSING",
            Self::TokenMalformed(_) => "TOKEN_INVALID",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenNotYetValid => "TOKEN_NOT_YET_VALID",
            Self::TokenRevoked => "TOKEN_REVOKED",
            Self::KeyNotFound(_) => "KEY_NOT_FOUND",
            Self::SignatureMismatch => "SIGNATURE_MISMATCH",
            Self::NoActiveKey => "NO_ACTIVE_KEY",
            Self::AccessDenied(_) => "ACCESS_DENIED",
            Self::Io(_) => "IO_ERROR",
            Self::Serde(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
