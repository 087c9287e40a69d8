//! Role and scope authorization with decision caching

use crate::token::Claims;
use crate::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Built-in roles with fixed permission sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Read-only access
    Viewer,
    /// Day-to-day queue operation
    Operator,
    /// Snapshots, restores, and chaos runs
    Maintainer,
    /// Everything
    Admin,
}

/// Wildcard permission held by Admin
pub const WILDCARD: &str = "*";

const VIEWER_PERMISSIONS: &[&str] = &[
    "queue:read",
    "stats:read",
    "snapshot:read",
    "forecast:read",
    "chaos:read",
];

const OPERATOR_PERMISSIONS: &[&str] = &[
    "queue:read",
    "stats:read",
    "snapshot:read",
    "forecast:read",
    "chaos:read",
    "queue:write",
    "job:enqueue",
    "job:requeue",
    "backpressure:override",
];

const MAINTAINER_PERMISSIONS: &[&str] = &[
    "queue:read",
    "stats:read",
    "snapshot:read",
    "forecast:read",
    "chaos:read",
    "queue:write",
    "job:enqueue",
    "job:requeue",
    "backpressure:override",
    "queue:delete",
    "snapshot:write",
    "snapshot:restore",
    "chaos:write",
    "chaos:run",
];

impl Role {
    /// The role's default permission set
    pub fn permissions(&self) -> &'static [&'static str] {
        match self {
            Self::Viewer => VIEWER_PERMISSIONS,
            Self::Operator => OPERATOR_PERMISSIONS,
            Self::Maintainer => MAINTAINER_PERMISSIONS,
            Self::Admin => &[WILDCARD],
        }
    }

    /// Whether the role's permission set covers an action
    pub fn allows(&self, action: &str) -> bool {
        let permissions = self.permissions();
        permissions.contains(&WILDCARD) || permissions.contains(&action)
    }

    /// Stable string form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Operator => "operator",
            Self::Maintainer => "maintainer",
            Self::Admin => "admin",
        }
    }
}

/// Outcome of an authorization check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationResult {
    /// Whether the action is allowed
    pub allowed: bool,
    /// Which rule decided (admin role, scope, role permission, or denial)
    pub reason: String,
    /// Subject checked
    pub subject: String,
    /// Roles the subject held
    pub roles: Vec<Role>,
    /// Scopes the subject held
    pub scopes: Vec<String>,
}

/// Authorization settings
#[derive(Debug, Clone)]
pub struct AuthzConfig {
    /// How long decisions stay cached
    pub cache_ttl: Duration,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60),
        }
    }
}

/// Role/scope authorizer with a TTL decision cache
pub struct Authorizer {
    config: AuthzConfig,
    cache: RwLock<HashMap<String, (AuthorizationResult, Instant)>>,
}

impl Authorizer {
    /// Create an authorizer
    pub fn new(config: AuthzConfig) -> Self {
        Self {
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Decide whether the claims allow `action` on `resource`
    ///
    /// Order: any Admin role allows, then an exact scope match, then any
    /// role whose permission set contains the action. Decisions are cached
    /// under (subject, action, resource, sorted roles).
    pub fn authorize(&self, claims: &Claims, action: &str, resource: &str) -> Result<AuthorizationResult> {
        let key = cache_key(claims, action, resource);
        if let Some(result) = self.cached(&key) {
            return Ok(result);
        }

        let result = self.decide(claims, action);
        self.cache.write().insert(key, (result.clone(), Instant::now()));
        Ok(result)
    }

    fn decide(&self, claims: &Claims, action: &str) -> AuthorizationResult {
        let base = |allowed: bool, reason: String| AuthorizationResult {
            allowed,
            reason,
            subject: claims.sub.clone(),
            roles: claims.roles.clone(),
            scopes: claims.scopes.clone(),
        };

        if claims.roles.contains(&Role::Admin) {
            return base(true, "role admin holds the wildcard permission".to_string());
        }

        if claims.scopes.iter().any(|scope| scope == action) {
            return base(true, format!("scope {} grants the action", action));
        }

        for role in &claims.roles {
            if role.allows(action) {
                return base(true, format!("role {} permits {}", role.as_str(), action));
            }
        }

        debug!(subject = %claims.sub, action, "authorization denied");
        base(false, format!("no role or scope permits {}", action))
    }

    fn cached(&self, key: &str) -> Option<AuthorizationResult> {
        let cache = self.cache.read();
        let (result, inserted) = cache.get(key)?;
        if inserted.elapsed() >= self.config.cache_ttl {
            return None;
        }
        Some(result.clone())
    }

    /// Drop expired cache entries; returns how many were removed
    pub fn sweep_cache(&self) -> usize {
        let ttl = self.config.cache_ttl;
        let mut cache = self.cache.write();
        let before = cache.len();
        cache.retain(|_, (_, inserted)| inserted.elapsed() < ttl);
        before - cache.len()
    }

    /// Live cache entry count
    pub fn cache_len(&self) -> usize {
        self.cache.read().len()
    }
}

fn cache_key(claims: &Claims, action: &str, resource: &str) -> String {
    let mut roles: Vec<&'static str> = claims.roles.iter().map(Role::as_str).collect();
    roles.sort_unstable();
    format!("{}|{}|{}|{}", claims.sub, action, resource, roles.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(roles: Vec<Role>, scopes: Vec<String>) -> Claims {
        Claims {
            sub: "user@example.com".to_string(),
            iss: "queueforge".to_string(),
            aud: "queueforge-api".to_string(),
            exp: i64::MAX,
            iat: 0,
            nbf: 0,
            jti: "jti-1".to_string(),
            key_id: "kid-1".to_string(),
            roles,
            scopes,
            token_type: "bearer".to_string(),
        }
    }

    #[test]
    fn test_admin_allows_everything() {
        let authorizer = Authorizer::new(AuthzConfig::default());
        let claims = claims(vec![Role::Admin], vec![]);

        for action in ["queue:delete", "made:up", "snapshot:restore"] {
            let result = authorizer.authorize(&claims, action, "/api/v1/queues/dlq").unwrap();
            assert!(result.allowed, "admin denied {}", action);
            assert!(result.reason.contains("admin"));
        }
    }

    #[test]
    fn test_scope_grants_exact_action() {
        let authorizer = Authorizer::new(AuthzConfig::default());
        let claims = claims(vec![], vec!["queue:flush".to_string()]);

        let allowed = authorizer.authorize(&claims, "queue:flush", "/queues/x").unwrap();
        assert!(allowed.allowed);
        assert!(allowed.reason.contains("scope"));

        let denied = authorizer.authorize(&claims, "queue:delete", "/queues/x").unwrap();
        assert!(!denied.allowed);
    }

    #[test]
    fn test_role_permission_sets() {
        let authorizer = Authorizer::new(AuthzConfig::default());

        let viewer = claims(vec![Role::Viewer], vec![]);
        assert!(authorizer.authorize(&viewer, "queue:read", "/q").unwrap().allowed);
        assert!(!authorizer.authorize(&viewer, "queue:write", "/q").unwrap().allowed);

        let operator = claims(vec![Role::Operator], vec![]);
        assert!(authorizer.authorize(&operator, "queue:write", "/q").unwrap().allowed);
        assert!(!authorizer.authorize(&operator, "snapshot:restore", "/q").unwrap().allowed);

        let maintainer = claims(vec![Role::Maintainer], vec![]);
        assert!(authorizer.authorize(&maintainer, "snapshot:restore", "/q").unwrap().allowed);
        assert!(!authorizer.authorize(&maintainer, "made:up", "/q").unwrap().allowed);
    }

    #[test]
    fn test_role_allows_iff_in_permission_set() {
        for role in [Role::Viewer, Role::Operator, Role::Maintainer] {
            for action in role.permissions() {
                assert!(role.allows(action));
            }
            assert!(!role.allows("definitely:not:granted"));
        }
        assert!(Role::Admin.allows("definitely:not:granted"));
    }

    #[test]
    fn test_decision_cached() {
        let authorizer = Authorizer::new(AuthzConfig::default());
        let claims = claims(vec![Role::Viewer], vec![]);

        authorizer.authorize(&claims, "queue:read", "/q").unwrap();
        assert_eq!(authorizer.cache_len(), 1);
        authorizer.authorize(&claims, "queue:read", "/q").unwrap();
        assert_eq!(authorizer.cache_len(), 1);
        authorizer.authorize(&claims, "queue:read", "/other").unwrap();
        assert_eq!(authorizer.cache_len(), 2);
    }

    #[test]
    fn test_cache_expiry_and_sweep() {
        let authorizer = Authorizer::new(AuthzConfig {
            cache_ttl: Duration::from_millis(1),
        });
        let claims = claims(vec![Role::Viewer], vec![]);
        authorizer.authorize(&claims, "queue:read", "/q").unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(authorizer.sweep_cache(), 1);
        assert_eq!(authorizer.cache_len(), 0);
    }
}
