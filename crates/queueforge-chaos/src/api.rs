//! Management API for the chaos harness

use crate::engine::ChaosHarness;
use crate::fault::{FaultParams, FaultScope, FaultSpec, FaultType};
use crate::load::LoadConfig;
use crate::scenario::{Guardrails, Scenario, ScenarioStatus, Stage};
use crate::ChaosError;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// API state shared by all handlers
#[derive(Clone)]
pub struct ChaosApiState {
    /// The harness under management
    pub harness: Arc<ChaosHarness>,
}

/// Typed API error mapped to a status code and JSON body
#[derive(Debug)]
pub struct ApiError(ChaosError);

/// JSON error body
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            ChaosError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ChaosError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_failed"),
            ChaosError::Stopped => (StatusCode::CONFLICT, "stopped"),
            ChaosError::Scenario(_) => (StatusCode::CONFLICT, "scenario_conflict"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        let body = ErrorBody {
            error: self.0.to_string(),
            code,
        };
        (status, Json(body)).into_response()
    }
}

impl From<ChaosError> for ApiError {
    fn from(e: ChaosError) -> Self {
        Self(e)
    }
}

/// Simple acknowledgement body
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Human-readable outcome
    pub message: String,
}

/// Injector creation request
#[derive(Debug, Deserialize)]
pub struct CreateInjectorRequest {
    /// Fault kind
    pub fault_type: FaultType,
    /// Scope kind
    pub scope: FaultScope,
    /// Scope selector for non-global scopes
    #[serde(default)]
    pub scope_value: Option<String>,
    /// Firing probability; defaults to 1.0
    #[serde(default)]
    pub probability: Option<f64>,
    /// Type-specific parameters
    #[serde(default)]
    pub params: FaultParams,
    /// TTL in seconds; defaults to the harness default
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

/// Scenario stage in API form
#[derive(Debug, Deserialize)]
pub struct StageRequest {
    /// Stage name
    pub name: String,
    /// Stage duration in seconds
    pub duration_seconds: u64,
    /// Injectors registered for the stage
    #[serde(default)]
    pub faults: Vec<CreateInjectorRequest>,
    /// Optional synthetic load
    #[serde(default)]
    pub load: Option<LoadConfig>,
}

/// Scenario creation request
#[derive(Debug, Deserialize)]
pub struct CreateScenarioRequest {
    /// Scenario name
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Stages executed in order
    pub stages: Vec<StageRequest>,
    /// Guardrails; defaults apply when omitted
    #[serde(default)]
    pub guardrails: Option<Guardrails>,
    /// Recovery window in seconds
    #[serde(default)]
    pub cooldown_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RunQuery {
    #[serde(default)]
    confirm: Option<bool>,
}

/// Harness status body
#[derive(Debug, Serialize)]
pub struct HarnessStatus {
    /// Whether injection is enabled
    pub enabled: bool,
    /// Registered injector count
    pub injector_count: usize,
    /// Registered scenarios with their states
    pub scenarios: Vec<ScenarioSummary>,
}

/// One scenario row in the status body
#[derive(Debug, Serialize)]
pub struct ScenarioSummary {
    /// Scenario id
    pub id: String,
    /// Scenario name
    pub name: String,
    /// Current state
    pub status: ScenarioStatus,
}

fn build_spec(request: CreateInjectorRequest) -> FaultSpec {
    let mut spec = FaultSpec::new(request.fault_type, request.scope);
    if let Some(value) = request.scope_value {
        spec = spec.with_scope_value(value);
    }
    if let Some(probability) = request.probability {
        spec = spec.with_probability(probability);
    }
    spec = spec.with_params(request.params);
    if let Some(ttl) = request.ttl_seconds {
        spec = spec.with_ttl(Duration::from_secs(ttl));
    }
    spec
}

/// Build the chaos management router mounted at `/{prefix}/chaos`
pub fn create_chaos_router(harness: Arc<ChaosHarness>) -> Router {
    let prefix = harness.engine().config().api_prefix.clone();
    let state = ChaosApiState { harness };

    let routes = Router::new()
        .route("/injectors", get(list_injectors).post(create_injector))
        .route("/injectors/{id}", get(get_injector).delete(delete_injector))
        .route("/injectors/{id}/toggle", post(toggle_injector))
        .route("/scenarios", get(list_scenarios).post(create_scenario))
        .route("/scenarios/{id}/run", post(run_scenario))
        .route("/scenarios/{id}/abort", post(abort_scenario))
        .route("/scenarios/{id}/report", get(scenario_report))
        .route("/status", get(harness_status))
        .route("/clear", post(clear_injectors))
        .with_state(state);

    Router::new().nest(&format!("/{}/chaos", prefix), routes)
}

/// List registered injectors
async fn list_injectors(State(state): State<ChaosApiState>) -> Json<Vec<FaultSpec>> {
    Json(state.harness.engine().list_faults())
}

/// Register an injector
async fn create_injector(
    State(state): State<ChaosApiState>,
    Json(request): Json<CreateInjectorRequest>,
) -> Result<(StatusCode, Json<FaultSpec>), ApiError> {
    let stored = state.harness.engine().add_fault(build_spec(request))?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// Fetch an injector by id
async fn get_injector(
    State(state): State<ChaosApiState>,
    Path(id): Path<String>,
) -> Result<Json<FaultSpec>, ApiError> {
    Ok(Json(state.harness.engine().get_fault(&id)?))
}

/// Remove an injector
async fn delete_injector(
    State(state): State<ChaosApiState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.harness.engine().remove_fault(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Flip an injector's enabled flag
async fn toggle_injector(
    State(state): State<ChaosApiState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let enabled = state.harness.engine().toggle_fault(&id)?;
    Ok(Json(StatusResponse {
        message: format!("injector {} {}", id, if enabled { "enabled" } else { "disabled" }),
    }))
}

/// List registered scenarios
async fn list_scenarios(State(state): State<ChaosApiState>) -> Json<Vec<Scenario>> {
    Json(state.harness.runner().list().await)
}

/// Register a scenario
async fn create_scenario(
    State(state): State<ChaosApiState>,
    Json(request): Json<CreateScenarioRequest>,
) -> Result<(StatusCode, Json<Scenario>), ApiError> {
    let mut scenario = Scenario::new(request.name);
    if let Some(description) = request.description {
        scenario = scenario.with_description(description);
    }
    if let Some(guardrails) = request.guardrails {
        scenario = scenario.with_guardrails(guardrails);
    }
    if let Some(cooldown) = request.cooldown_seconds {
        scenario = scenario.with_cooldown(Duration::from_secs(cooldown));
    }
    for stage_request in request.stages {
        let mut stage = Stage::new(
            stage_request.name,
            Duration::from_secs(stage_request.duration_seconds),
        );
        for fault in stage_request.faults {
            stage = stage.with_fault(build_spec(fault));
        }
        if let Some(load) = stage_request.load {
            stage = stage.with_load(load);
        }
        scenario = scenario.with_stage(stage);
    }

    let id = state.harness.runner().register(scenario).await?;
    let stored = state.harness.runner().get(&id).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// Start a scenario run in the background
async fn run_scenario(
    State(state): State<ChaosApiState>,
    Path(id): Path<String>,
    Query(query): Query<RunQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    // Surface registration/state errors synchronously before detaching
    let scenario = state.harness.runner().get(&id).await?;
    if scenario.status != ScenarioStatus::Pending {
        return Err(ChaosError::Scenario(format!(
            "scenario {} already ran (status {:?})",
            id, scenario.status
        ))
        .into());
    }
    if scenario.guardrails.require_confirm && !query.confirm.unwrap_or(false) {
        return Err(
            ChaosError::Validation("scenario requires explicit confirmation".to_string()).into()
        );
    }

    let runner = state.harness.runner();
    let confirm = query.confirm.unwrap_or(false);
    let run_id = id.clone();
    tokio::spawn(async move {
        if let Err(e) = runner.run_confirmed(&run_id, confirm).await {
            tracing::warn!(scenario = %run_id, error = %e, "scenario run failed");
        }
    });

    info!(scenario = %id, "scenario run requested");
    Ok(Json(StatusResponse {
        message: format!("scenario {} started", id),
    }))
}

/// Abort a running scenario
async fn abort_scenario(
    State(state): State<ChaosApiState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.harness.runner().abort(&id).await?;
    Ok(Json(StatusResponse {
        message: format!("scenario {} aborted", id),
    }))
}

/// Full scenario report
async fn scenario_report(
    State(state): State<ChaosApiState>,
    Path(id): Path<String>,
) -> Result<Json<Scenario>, ApiError> {
    Ok(Json(state.harness.runner().get(&id).await?))
}

/// Harness status summary
async fn harness_status(State(state): State<ChaosApiState>) -> Json<HarnessStatus> {
    let scenarios = state
        .harness
        .runner()
        .list()
        .await
        .into_iter()
        .map(|s| ScenarioSummary {
            id: s.id,
            name: s.name,
            status: s.status,
        })
        .collect();
    Json(HarnessStatus {
        enabled: state.harness.engine().config().enabled,
        injector_count: state.harness.engine().list_faults().len(),
        scenarios,
    })
}

/// Remove every injector
async fn clear_injectors(State(state): State<ChaosApiState>) -> Json<StatusResponse> {
    let removed = state.harness.engine().clear();
    Json(StatusResponse {
        message: format!("cleared {} injectors", removed),
    })
}
