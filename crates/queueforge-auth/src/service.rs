//! Assembled auth service: keys, tokens, authorization, audit

use crate::audit::{AuditConfig, AuditLogger, AuditRecord};
use crate::keys::{KeyConfig, KeyManager};
use crate::rbac::{AuthorizationResult, Authorizer, AuthzConfig, Role};
use crate::token::{Claims, TokenConfig, TokenService};
use crate::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Full auth configuration
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Token issuance/validation settings
    pub token: TokenConfig,
    /// Key rotation settings
    pub keys: KeyConfig,
    /// Authorization cache settings
    pub authz: AuthzConfig,
    /// Audit log settings
    pub audit: AuditConfig,
}

/// Token, RBAC, and audit services behind one handle
pub struct AuthService {
    keys: Arc<KeyManager>,
    tokens: Arc<TokenService>,
    authorizer: Arc<Authorizer>,
    audit: Arc<AuditLogger>,
    stopped: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AuthService {
    /// Create a service; configuration errors are fatal here
    pub fn new(config: AuthConfig) -> Result<Self> {
        let keys = Arc::new(KeyManager::new(config.keys)?);
        let tokens = Arc::new(TokenService::new(keys.clone(), config.token)?);
        let authorizer = Arc::new(Authorizer::new(config.authz));
        let audit = Arc::new(AuditLogger::new(config.audit)?);
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            keys,
            tokens,
            authorizer,
            audit,
            stopped: AtomicBool::new(false),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Key manager
    pub fn keys(&self) -> Arc<KeyManager> {
        self.keys.clone()
    }

    /// Token service
    pub fn tokens(&self) -> Arc<TokenService> {
        self.tokens.clone()
    }

    /// Authorizer
    pub fn authorizer(&self) -> Arc<Authorizer> {
        self.authorizer.clone()
    }

    /// Audit logger
    pub fn audit(&self) -> Arc<AuditLogger> {
        self.audit.clone()
    }

    /// Issue a token and audit the issuance
    pub async fn issue_token(
        &self,
        subject: &str,
        roles: Vec<Role>,
        scopes: Vec<String>,
        ttl: Option<Duration>,
    ) -> Result<(String, Claims)> {
        let issued = self.tokens.generate(subject, roles, scopes, ttl);
        let result = if issued.is_ok() { "allowed" } else { "error" };
        self.audit
            .log(AuditRecord::new(subject, "auth:token:issue", "/auth/token", result))
            .await;
        issued
    }

    /// Validate a bearer token and authorize an action, auditing the check
    pub async fn check(
        &self,
        bearer: &str,
        action: &str,
        resource: &str,
    ) -> Result<AuthorizationResult> {
        let claims = match self.tokens.validate(bearer) {
            Ok(claims) => claims,
            Err(e) => {
                self.audit
                    .log(
                        AuditRecord::new("unknown", action, resource, "error")
                            .with_detail("error", e.code()),
                    )
                    .await;
                return Err(e);
            }
        };

        let result = self.authorizer.authorize(&claims, action, resource)?;
        self.audit
            .log(AuditRecord::new(
                &claims.sub,
                action,
                resource,
                if result.allowed { "allowed" } else { "denied" },
            ))
            .await;
        Ok(result)
    }

    /// Spawn the rotation/sweep task
    pub fn start(&self) {
        let keys = self.keys.clone();
        let tokens = self.tokens.clone();
        let authorizer = self.authorizer.clone();
        let interval = keys.rotation_interval();
        let mut shutdown = self.shutdown_tx.subscribe();

        self.tasks.lock().push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => break,
                }
                keys.rotate();
                let swept_keys = keys.sweep_expired();
                let swept_revocations = tokens.sweep_revoked();
                let swept_decisions = authorizer.sweep_cache();
                info!(
                    swept_keys,
                    swept_revocations, swept_decisions, "auth maintenance cycle"
                );
            }
        }));
        info!("auth service started");
    }

    /// Stop background tasks; idempotent, 10 second drain bound
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if tokio::time::timeout(Duration::from_secs(10), handle).await.is_err() {
                warn!("auth task failed to drain within 10s");
            }
        }
        info!("auth service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuthError;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> AuthService {
        let mut config = AuthConfig::default();
        config.audit.path = dir.path().join("audit.log");
        AuthService::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_token_lifecycle_end_to_end() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        let (token, claims) = service
            .issue_token(
                "admin@example.com",
                vec![Role::Admin],
                vec![],
                Some(Duration::from_secs(3_600)),
            )
            .await
            .unwrap();

        let validated = service.tokens().validate(&token).unwrap();
        assert_eq!(validated.sub, "admin@example.com");
        assert!(!validated.key_id.is_empty());

        let result = service
            .check(&token, "queue:delete", "/api/v1/queues/dlq")
            .await
            .unwrap();
        assert!(result.allowed);

        service.tokens().revoke(&claims.jti, "test teardown");
        assert!(matches!(
            service.tokens().validate(&token),
            Err(AuthError::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn test_denied_check_is_audited() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        let (token, _) = service
            .issue_token("viewer@example.com", vec![Role::Viewer], vec![], None)
            .await
            .unwrap();
        let result = service.check(&token, "queue:delete", "/queues/x").await.unwrap();
        assert!(!result.allowed);

        let denied = service
            .audit()
            .query(&crate::audit::AuditQuery {
                result: Some("denied".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].subject, "viewer@example.com");
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        service.start();
        service.stop().await;
        service.stop().await;
    }
}
