//! HTTP surface for tokens, authorization checks, and audit queries

use crate::audit::AuditQuery;
use crate::rbac::Role;
use crate::service::AuthService;
use crate::AuthError;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// API state shared by all handlers
#[derive(Clone)]
pub struct AuthApiState {
    /// The auth service under the API
    pub service: Arc<AuthService>,
}

/// Typed API error mapped to a status code and JSON body
#[derive(Debug)]
pub struct ApiError(AuthError);

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AuthError::TokenMissing
            | AuthError::TokenMalformed(_)
            | AuthError::TokenExpired
            | AuthError::TokenNotYetValid
            | AuthError::TokenRevoked
            | AuthError::KeyNotFound(_)
            | AuthError::SignatureMismatch => StatusCode::UNAUTHORIZED,
            AuthError::AccessDenied(_) => StatusCode::FORBIDDEN,
            AuthError::Config { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.to_string(),
            code: self.0.code(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self(e)
    }
}

/// Token issuance request
#[derive(Debug, Deserialize)]
pub struct IssueTokenRequest {
    /// Subject the token is for
    pub subject: String,
    /// Roles to grant
    pub roles: Vec<Role>,
    /// Scopes to grant
    #[serde(default)]
    pub scopes: Vec<String>,
    /// TTL in seconds; zero or absent takes the default
    #[serde(default)]
    pub ttl: Option<u64>,
}

/// Token issuance response
#[derive(Debug, Serialize)]
pub struct IssueTokenResponse {
    /// The signed token
    pub token: String,
    /// Subject issued to
    pub subject: String,
    /// Expiry time
    pub expires_at: DateTime<Utc>,
    /// Always "bearer"
    pub token_type: String,
}

/// Validation response
#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    /// Always true on 200
    pub valid: bool,
    /// Token subject
    pub subject: String,
    /// Expiry time
    pub expires_at: DateTime<Utc>,
}

/// Revocation request
#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    /// Token id (jti) to revoke
    pub token_id: String,
    /// Optional reason recorded in the revocation table
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckQuery {
    action: String,
    resource: String,
}

/// Simple acknowledgement body
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Human-readable outcome
    pub message: String,
}

fn bearer_from(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError(AuthError::TokenMissing))
}

/// Build the auth router mounted at `/auth` and `/audit`
pub fn create_auth_router(service: Arc<AuthService>) -> Router {
    let state = AuthApiState { service };
    Router::new()
        .route("/auth/token", post(issue_token))
        .route("/auth/validate", get(validate_token))
        .route("/auth/token/info", get(token_info))
        .route("/auth/token/revoke", post(revoke_token))
        .route("/auth/check", get(check))
        .route("/audit/query", get(audit_query))
        .with_state(state)
}

/// Issue a token
async fn issue_token(
    State(state): State<AuthApiState>,
    Json(request): Json<IssueTokenRequest>,
) -> Result<(StatusCode, Json<IssueTokenResponse>), ApiError> {
    let ttl = request.ttl.map(Duration::from_secs);
    let (token, claims) = state
        .service
        .issue_token(&request.subject, request.roles, request.scopes, ttl)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(IssueTokenResponse {
            token,
            subject: claims.sub,
            expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now),
            token_type: claims.token_type,
        }),
    ))
}

/// Validate the bearer token
async fn validate_token(
    State(state): State<AuthApiState>,
    headers: HeaderMap,
) -> Result<Json<ValidateResponse>, ApiError> {
    let claims = state.service.tokens().validate(bearer_from(&headers)?)?;
    Ok(Json(ValidateResponse {
        valid: true,
        subject: claims.sub,
        expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now),
    }))
}

/// Full claims of the bearer token
async fn token_info(
    State(state): State<AuthApiState>,
    headers: HeaderMap,
) -> Result<Json<crate::token::Claims>, ApiError> {
    let claims = state.service.tokens().validate(bearer_from(&headers)?)?;
    Ok(Json(claims))
}

/// Revoke a token by id
async fn revoke_token(
    State(state): State<AuthApiState>,
    Json(request): Json<RevokeRequest>,
) -> Json<StatusResponse> {
    let reason = request.reason.unwrap_or_else(|| "revoked via api".to_string());
    state.service.tokens().revoke(&request.token_id, reason);
    Json(StatusResponse {
        message: format!("token {} revoked", request.token_id),
    })
}

/// Authorize the bearer token for (action, resource)
async fn check(
    State(state): State<AuthApiState>,
    headers: HeaderMap,
    Query(query): Query<CheckQuery>,
) -> Result<Json<crate::rbac::AuthorizationResult>, ApiError> {
    let result = state
        .service
        .check(bearer_from(&headers)?, &query.action, &query.resource)
        .await?;
    if !result.allowed {
        return Err(ApiError(AuthError::AccessDenied(result.reason)));
    }
    Ok(Json(result))
}

/// Query the audit log
async fn audit_query(
    State(state): State<AuthApiState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<crate::audit::AuditRecord>>, ApiError> {
    Ok(Json(state.service.audit().query(&query).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::AuthConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    fn router(dir: &TempDir) -> Router {
        let mut config = AuthConfig::default();
        config.audit.path = dir.path().join("audit.log");
        create_auth_router(Arc::new(AuthService::new(config).unwrap()))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn issue(app: &Router, roles: &[&str]) -> String {
        let request = Request::builder()
            .method("POST")
            .uri("/auth/token")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "subject": "admin@example.com",
                    "roles": roles,
                    "ttl": 3600
                })
                .to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["token_type"], "bearer");
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_issue_validate_and_check() {
        let dir = TempDir::new().unwrap();
        let app = router(&dir);
        let token = issue(&app, &["admin"]).await;

        let validate = Request::builder()
            .uri("/auth/validate")
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(validate).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["subject"], "admin@example.com");

        let check = Request::builder()
            .uri("/auth/check?action=queue:delete&resource=/api/v1/queues/dlq")
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(check).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["allowed"], true);
    }

    #[tokio::test]
    async fn test_check_denied_is_403() {
        let dir = TempDir::new().unwrap();
        let app = router(&dir);
        let token = issue(&app, &["viewer"]).await;

        let check = Request::builder()
            .uri("/auth/check?action=queue:delete&resource=/queues/x")
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(check).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["code"], "ACCESS_DENIED");
    }

    #[tokio::test]
    async fn test_revoked_token_is_401() {
        let dir = TempDir::new().unwrap();
        let app = router(&dir);
        let token = issue(&app, &["admin"]).await;

        let info = Request::builder()
            .uri("/auth/token/info")
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(info).await.unwrap();
        let claims = body_json(response).await;
        let jti = claims["jti"].as_str().unwrap();

        let revoke = Request::builder()
            .method("POST")
            .uri("/auth/token/revoke")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"token_id": jti, "reason": "test"}).to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(revoke).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let validate = Request::builder()
            .uri("/auth/validate")
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(validate).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["code"], "TOKEN_REVOKED");
    }

    #[tokio::test]
    async fn test_missing_token_is_401() {
        let dir = TempDir::new().unwrap();
        let app = router(&dir);
        let validate = Request::builder()
            .uri("/auth/validate")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(validate).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_audit_query_endpoint() {
        let dir = TempDir::new().unwrap();
        let app = router(&dir);
        let _token = issue(&app, &["admin"]).await;

        let query = Request::builder()
            .uri("/audit/query?action=auth:token:issue&limit=10")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(query).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }
}
