//! Admin REST handlers for projects, microfrontends, versions and deployments.
//!
//! Each mutating handler emits one audit event (`audit = true`) carrying
//! the operation name, the ids involved and the final status code.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use frontgrid_core::now_secs;
use frontgrid_rollout::{InvalidState, NamedStrategy, validate_allocation};
use frontgrid_state::{
    AllocationState, DeploymentDetail, MicroFrontend, Project, StateError, TrafficAllocation,
    VersionPayload, VersionRecord,
};

use crate::ApiState;
use crate::response::{ApiError, ApiResponse, ApiResult};

// ── Audit ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Audit {
    method: &'static str,
    project_id: Option<String>,
    micro_frontend_id: Option<String>,
    version: Option<String>,
    deployment_id: Option<String>,
}

impl Audit {
    fn new(method: &'static str) -> Self {
        Self {
            method,
            ..Default::default()
        }
    }

    fn project(mut self, project_id: &str) -> Self {
        self.project_id = Some(project_id.to_string());
        self
    }

    fn micro_frontend(mut self, micro_frontend_id: &str) -> Self {
        self.micro_frontend_id = Some(micro_frontend_id.to_string());
        self
    }

    fn deployment(mut self, deployment_id: &str) -> Self {
        self.deployment_id = Some(deployment_id.to_string());
        self
    }
}

/// Render `result` and write its audit line.
fn audited(audit: Audit, result: ApiResult) -> Response {
    let response = result.unwrap_or_else(IntoResponse::into_response);
    let status = response.status().as_u16();
    let project_id = audit.project_id.as_deref().unwrap_or("-");
    let micro_frontend_id = audit.micro_frontend_id.as_deref().unwrap_or("-");
    let version = audit.version.as_deref().unwrap_or("-");
    let deployment_id = audit.deployment_id.as_deref().unwrap_or("-");
    if status < 400 {
        info!(audit = true, method = audit.method, project_id, micro_frontend_id, version, deployment_id, status, "admin request");
    } else {
        error!(audit = true, method = audit.method, project_id, micro_frontend_id, version, deployment_id, status, "admin request failed");
    }
    response
}

// ── Request / response bodies ──────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub start_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NameBody {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PatchMicroFrontendBody {
    pub name: Option<String>,
    pub active_versions: Option<Vec<TrafficAllocation>>,
    pub default: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostVersionBody {
    pub version: VersionPayload,
    pub deployment_strategy: Option<NamedStrategy>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDeploymentBody {
    pub target_version: String,
    pub deployment_strategy: NamedStrategy,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectSummary {
    id: String,
    name: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    deleted: bool,
}

impl From<Project> for ProjectSummary {
    fn from(p: Project) -> Self {
        Self {
            id: p.project_id,
            name: p.name,
            deleted: p.deleted,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectList {
    projects: Vec<ProjectSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MicroFrontendSummary {
    /// `{projectName}/{mfeName}`
    name: String,
    id: String,
    active_versions: Vec<TrafficAllocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deployment_id: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    deleted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MicroFrontendList {
    project_id: String,
    micro_frontends: Vec<MicroFrontendSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MicroFrontendUpdated {
    micro_frontend_id: String,
    name: String,
    active_versions: Vec<TrafficAllocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    default: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionList {
    project_id: String,
    micro_frontend_id: String,
    name: String,
    versions: Vec<VersionPayload>,
    active_versions: Vec<TrafficAllocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionCreated {
    micro_frontend_id: String,
    version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    deployment_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentView {
    deployment: DeploymentDetail,
    states: Vec<AllocationState>,
}

// ── Lookups ────────────────────────────────────────────────────

fn live_project(state: &ApiState, project_id: &str) -> Result<Project, ApiError> {
    match state.store.get_project(project_id)? {
        Some(project) if !project.deleted => Ok(project),
        _ => Err(ApiError::NotFound(format!("project {project_id} not found"))),
    }
}

fn any_project(state: &ApiState, project_id: &str) -> Result<Project, ApiError> {
    state
        .store
        .get_project(project_id)?
        .ok_or_else(|| ApiError::NotFound(format!("project {project_id} not found")))
}

fn live_micro_frontend(
    state: &ApiState,
    project_id: &str,
    micro_frontend_id: &str,
) -> Result<MicroFrontend, ApiError> {
    match state.store.get_micro_frontend(project_id, micro_frontend_id)? {
        Some(mfe) if !mfe.deleted => Ok(mfe),
        _ => Err(ApiError::NotFound(format!(
            "microfrontend {project_id}/{micro_frontend_id} not found"
        ))),
    }
}

// ── Projects ───────────────────────────────────────────────────

/// GET /api/v1/projects
pub async fn list_projects(State(state): State<ApiState>, Query(query): Query<PageQuery>) -> Response {
    match state
        .store
        .list_projects(query.start_token.as_deref(), state.admin.page_size)
    {
        Ok(page) => ApiResponse::ok(ProjectList {
            projects: page.items.into_iter().map(ProjectSummary::from).collect(),
            next_token: page.next_token,
        })
        .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// POST /api/v1/projects
pub async fn create_project(State(state): State<ApiState>, Json(body): Json<NameBody>) -> Response {
    let project_id = Uuid::new_v4().to_string();
    let project = Project::new(&project_id, &body.name);
    let result = state
        .store
        .put_project(&project)
        .map(|()| (StatusCode::CREATED, ApiResponse::ok(ProjectSummary::from(project))).into_response())
        .map_err(ApiError::from);
    audited(Audit::new("CreateProject").project(&project_id), result)
}

/// PATCH /api/v1/projects/{projectId}
pub async fn update_project(
    State(state): State<ApiState>,
    Path(project_id): Path<String>,
    Json(body): Json<NameBody>,
) -> Response {
    let result = rename_project(&state, &project_id, &body.name);
    audited(Audit::new("UpdateProject").project(&project_id), result)
}

fn rename_project(state: &ApiState, project_id: &str, name: &str) -> ApiResult {
    let mut project = live_project(state, project_id)?;
    project.name = name.to_string();
    state.store.put_project(&project)?;
    Ok(ApiResponse::ok(ProjectSummary::from(project)).into_response())
}

/// DELETE /api/v1/projects/{projectId}
pub async fn delete_project(State(state): State<ApiState>, Path(project_id): Path<String>) -> Response {
    let expires_at = now_secs() + state.admin.project_delete_expiry_secs;
    let result = state
        .store
        .soft_delete_project(&project_id, expires_at)
        .map(|_| {
            (
                StatusCode::ACCEPTED,
                ApiResponse::ok(serde_json::json!({ "id": project_id, "expiresAt": expires_at })),
            )
                .into_response()
        })
        .map_err(ApiError::from);
    audited(Audit::new("DeleteProject").project(&project_id), result)
}

// ── Microfrontends ─────────────────────────────────────────────

/// GET /api/v1/projects/{projectId}/microFrontends
pub async fn list_micro_frontends(
    State(state): State<ApiState>,
    Path(project_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response {
    let result = (|| -> ApiResult {
        let project = any_project(&state, &project_id)?;
        let page = state.store.list_micro_frontends_page(
            &project_id,
            query.start_token.as_deref(),
            state.admin.page_size,
        )?;
        let micro_frontends = page
            .items
            .into_iter()
            .map(|mfe| MicroFrontendSummary {
                name: format!("{}/{}", project.name, mfe.name),
                id: mfe.micro_frontend_id,
                active_versions: mfe.active_versions,
                default: mfe.default,
                deployment_id: mfe.deployment_id,
                deleted: mfe.deleted,
            })
            .collect();
        Ok(ApiResponse::ok(MicroFrontendList {
            project_id: project_id.clone(),
            micro_frontends,
            next_token: page.next_token,
        })
        .into_response())
    })();
    result.unwrap_or_else(IntoResponse::into_response)
}

/// POST /api/v1/projects/{projectId}/microFrontends
pub async fn create_micro_frontend(
    State(state): State<ApiState>,
    Path(project_id): Path<String>,
    Json(body): Json<NameBody>,
) -> Response {
    let micro_frontend_id = Uuid::new_v4().to_string();
    let result = (|| -> ApiResult {
        live_project(&state, &project_id)?;
        let mfe = MicroFrontend::new(&project_id, &micro_frontend_id, &body.name);
        state.store.put_micro_frontend(&mfe)?;
        Ok((
            StatusCode::CREATED,
            ApiResponse::ok(serde_json::json!({
                "microFrontendId": micro_frontend_id,
                "name": body.name,
            })),
        )
            .into_response())
    })();
    audited(
        Audit::new("CreateMicroFrontend")
            .project(&project_id)
            .micro_frontend(&micro_frontend_id),
        result,
    )
}

/// PATCH /api/v1/projects/{projectId}/microFrontends/{microFrontendId}
pub async fn update_micro_frontend(
    State(state): State<ApiState>,
    Path((project_id, micro_frontend_id)): Path<(String, String)>,
    Json(body): Json<PatchMicroFrontendBody>,
) -> Response {
    let result = patch_micro_frontend(&state, &project_id, &micro_frontend_id, body);
    audited(
        Audit::new("UpdateMicroFrontend")
            .project(&project_id)
            .micro_frontend(&micro_frontend_id),
        result,
    )
}

fn patch_micro_frontend(
    state: &ApiState,
    project_id: &str,
    micro_frontend_id: &str,
    body: PatchMicroFrontendBody,
) -> ApiResult {
    let mfe = live_micro_frontend(state, project_id, micro_frontend_id)?;
    let reallocating = body.active_versions.is_some();
    if reallocating && mfe.deployment_id.is_some() {
        return Err(InvalidState::DeploymentInProgress.into());
    }
    if let Some(active) = &body.active_versions {
        for allocation in active {
            match state.store.get_version(micro_frontend_id, &allocation.version)? {
                Some(v) if !v.deleted => {}
                _ => {
                    return Err(ApiError::NotFound(format!(
                        "version {} not found",
                        allocation.version
                    )));
                }
            }
        }
    }

    // Validate against the stored allocation inside the write so a
    // concurrent rollout step cannot slip in between.
    let mut rejected: Option<InvalidState> = None;
    let PatchMicroFrontendBody {
        name,
        active_versions,
        default,
    } = body;
    let written = state
        .store
        .modify_micro_frontend(project_id, micro_frontend_id, |current| {
            if current.deleted {
                return Err(StateError::NotFound(format!("microfrontend {}", current.table_key())));
            }
            if reallocating && current.deployment_id.is_some() {
                rejected = Some(InvalidState::DeploymentInProgress);
                return Err(StateError::ConditionFailed("deployment in progress".to_string()));
            }
            match validate_allocation(&current.allocation(), active_versions, default) {
                Ok(next) => current.apply_allocation(&next),
                Err(e) => {
                    rejected = Some(e);
                    return Err(StateError::ConditionFailed("invalid allocation".to_string()));
                }
            }
            if let Some(name) = name {
                current.name = name;
            }
            Ok(())
        });

    let stored = match (written, rejected) {
        (Ok(stored), _) => stored,
        (Err(_), Some(invalid)) => return Err(invalid.into()),
        (Err(e), None) => return Err(e.into()),
    };

    Ok(ApiResponse::ok(MicroFrontendUpdated {
        micro_frontend_id: stored.micro_frontend_id,
        name: stored.name,
        active_versions: stored.active_versions,
        default: stored.default,
    })
    .into_response())
}

/// DELETE /api/v1/projects/{projectId}/microFrontends/{microFrontendId}
pub async fn delete_micro_frontend(
    State(state): State<ApiState>,
    Path((project_id, micro_frontend_id)): Path<(String, String)>,
) -> Response {
    let expires_at = now_secs() + state.admin.delete_expiry_minutes * 60;
    let result = state
        .store
        .soft_delete_micro_frontend(&project_id, &micro_frontend_id, expires_at)
        .map(|_| {
            (
                StatusCode::ACCEPTED,
                ApiResponse::ok(serde_json::json!({
                    "microFrontendId": micro_frontend_id,
                    "expiresAt": expires_at,
                })),
            )
                .into_response()
        })
        .map_err(ApiError::from);
    audited(
        Audit::new("DeleteMicroFrontend")
            .project(&project_id)
            .micro_frontend(&micro_frontend_id),
        result,
    )
}

// ── Versions ───────────────────────────────────────────────────

/// GET /api/v1/projects/{projectId}/microFrontends/{microFrontendId}/versions
pub async fn list_versions(
    State(state): State<ApiState>,
    Path((project_id, micro_frontend_id)): Path<(String, String)>,
    Query(query): Query<PageQuery>,
) -> Response {
    let result = (|| -> ApiResult {
        let project = any_project(&state, &project_id)?;
        let mfe = state
            .store
            .get_micro_frontend(&project_id, &micro_frontend_id)?
            .ok_or_else(|| {
                ApiError::NotFound(format!("microfrontend {project_id}/{micro_frontend_id} not found"))
            })?;
        let page = state.store.list_versions_page(
            &micro_frontend_id,
            query.start_token.as_deref(),
            state.admin.page_size,
        )?;
        let versions = page
            .items
            .into_iter()
            .filter(|v| !v.deleted)
            .map(|v| v.data)
            .collect();
        Ok(ApiResponse::ok(VersionList {
            project_id: project_id.clone(),
            micro_frontend_id: micro_frontend_id.clone(),
            name: format!("{}/{}", project.name, mfe.name),
            versions,
            active_versions: mfe.active_versions,
            default: mfe.default,
            next_token: page.next_token,
        })
        .into_response())
    })();
    result.unwrap_or_else(IntoResponse::into_response)
}

/// POST /api/v1/projects/{projectId}/microFrontends/{microFrontendId}/versions
pub async fn create_version(
    State(state): State<ApiState>,
    Path((project_id, micro_frontend_id)): Path<(String, String)>,
    Json(body): Json<PostVersionBody>,
) -> Response {
    let mut audit = Audit::new("CreateVersion")
        .project(&project_id)
        .micro_frontend(&micro_frontend_id);
    audit.version = Some(body.version.metadata.version.clone());
    let result = register_version(&state, &project_id, &micro_frontend_id, body, &mut audit).await;
    audited(audit, result)
}

async fn register_version(
    state: &ApiState,
    project_id: &str,
    micro_frontend_id: &str,
    body: PostVersionBody,
    audit: &mut Audit,
) -> ApiResult {
    let mfe = live_micro_frontend(state, project_id, micro_frontend_id)?;
    let version = body.version.metadata.version.clone();

    if body.deployment_strategy.is_some() {
        if mfe.active_versions.len() > 1 {
            return Err(InvalidState::SplitAllocation.into());
        }
        state.orchestrator.check_can_deploy(&mfe, None)?;
    }

    state
        .store
        .put_version(&VersionRecord::new(micro_frontend_id, body.version))?;

    let mut deployment_id = None;
    if let Some(preset) = body.deployment_strategy {
        let id = state
            .orchestrator
            .create(&mfe, &version, &preset.strategy())
            .await?;
        audit.deployment_id = Some(id.clone());
        deployment_id = Some(id);
    } else if mfe.active_versions.is_empty() {
        let first = state
            .store
            .modify_micro_frontend(project_id, micro_frontend_id, |current| {
                if !current.active_versions.is_empty() {
                    return Err(StateError::ConditionFailed("allocation already set".to_string()));
                }
                current.active_versions = vec![TrafficAllocation::new(&version, 100)];
                current.default = Some(version.clone());
                Ok(())
            });
        match first {
            Ok(_) | Err(StateError::ConditionFailed(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok((
        StatusCode::CREATED,
        ApiResponse::ok(VersionCreated {
            micro_frontend_id: micro_frontend_id.to_string(),
            version,
            deployment_id,
        }),
    )
        .into_response())
}

// ── Deployments ────────────────────────────────────────────────

/// POST /api/v1/projects/{projectId}/microFrontends/{microFrontendId}/deployment
pub async fn create_deployment(
    State(state): State<ApiState>,
    Path((project_id, micro_frontend_id)): Path<(String, String)>,
    Json(body): Json<PostDeploymentBody>,
) -> Response {
    let mut audit = Audit::new("CreateDeployment")
        .project(&project_id)
        .micro_frontend(&micro_frontend_id);
    audit.version = Some(body.target_version.clone());

    let result = match live_micro_frontend(&state, &project_id, &micro_frontend_id) {
        Ok(mfe) => state
            .orchestrator
            .create(&mfe, &body.target_version, &body.deployment_strategy.strategy())
            .await
            .map_err(ApiError::from),
        Err(e) => Err(e),
    };
    let result = result.map(|deployment_id| {
        audit.deployment_id = Some(deployment_id.clone());
        (
            StatusCode::CREATED,
            ApiResponse::ok(serde_json::json!({ "deploymentId": deployment_id })),
        )
            .into_response()
    });
    audited(audit, result)
}

/// Load a deployment, checking it belongs to the microfrontend in the path.
fn owned_deployment(
    state: &ApiState,
    project_id: &str,
    micro_frontend_id: &str,
    deployment_id: &str,
) -> Result<frontgrid_state::DeploymentRecord, ApiError> {
    let record = state.orchestrator.get(deployment_id)?;
    if record.detail.project_id != project_id || record.detail.micro_frontend_id != micro_frontend_id {
        return Err(ApiError::NotFound(format!("deployment {deployment_id} not found")));
    }
    Ok(record)
}

/// GET /api/v1/projects/{projectId}/microFrontends/{microFrontendId}/deployment/{deploymentId}
pub async fn get_deployment(
    State(state): State<ApiState>,
    Path((project_id, micro_frontend_id, deployment_id)): Path<(String, String, String)>,
) -> Response {
    match owned_deployment(&state, &project_id, &micro_frontend_id, &deployment_id) {
        Ok(record) => ApiResponse::ok(DeploymentView {
            deployment: record.detail,
            states: record.states.into_iter().map(|row| row.state).collect(),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// DELETE /api/v1/projects/{projectId}/microFrontends/{microFrontendId}/deployment/{deploymentId}
pub async fn cancel_deployment(
    State(state): State<ApiState>,
    Path((project_id, micro_frontend_id, deployment_id)): Path<(String, String, String)>,
) -> Response {
    let result = match owned_deployment(&state, &project_id, &micro_frontend_id, &deployment_id) {
        Ok(_) => state
            .orchestrator
            .cancel(&deployment_id)
            .await
            .map(|_| StatusCode::NO_CONTENT.into_response())
            .map_err(ApiError::from),
        Err(e) => Err(e),
    };
    audited(
        Audit::new("DeleteDeployment")
            .project(&project_id)
            .micro_frontend(&micro_frontend_id)
            .deployment(&deployment_id),
        result,
    )
}
