//! Domain types for the FrontGrid state store.
//!
//! These types represent the persisted state of projects, microfrontends,
//! versions, deployments and the consumer-facing view. All types are
//! serializable to/from JSON (camelCase on the wire) for storage in redb
//! tables and for the HTTP API.

use serde::{Deserialize, Serialize};

use crate::tables::composite_key;

/// Unique identifier for a project.
pub type ProjectId = String;

/// Unique identifier for a microfrontend within a project.
pub type MicroFrontendId = String;

/// Unique identifier for a deployment (also the executor's execution id).
pub type DeploymentId = String;

/// Step key of a deployment's detail row.
pub const DETAIL_STEP_KEY: &str = "detail";

// ── Project ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub project_id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub deleted: bool,
    /// Unix timestamp after which a tombstoned record may be reclaimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl Project {
    pub fn new(project_id: &str, name: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            name: name.to_string(),
            deleted: false,
            expires_at: None,
        }
    }
}

// ── MicroFrontend ─────────────────────────────────────────────────

/// One entry of an active version allocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrafficAllocation {
    pub version: String,
    /// Share of traffic in percent (0-100).
    pub traffic: u32,
}

impl TrafficAllocation {
    pub fn new(version: &str, traffic: u32) -> Self {
        Self {
            version: version.to_string(),
            traffic,
        }
    }
}

/// Why a record was tombstoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    /// Cascade-deleted together with its project.
    Project,
    /// Deleted on its own.
    Mfe,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MicroFrontend {
    pub project_id: ProjectId,
    pub micro_frontend_id: MicroFrontendId,
    pub name: String,
    #[serde(default)]
    pub active_versions: Vec<TrafficAllocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Set while a progressive deployment owns the allocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<DeploymentId>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_mode: Option<DeleteMode>,
    /// Bumped by the store on every write; copied into the consumer view.
    #[serde(default)]
    pub revision: u64,
}

impl MicroFrontend {
    pub fn new(project_id: &str, micro_frontend_id: &str, name: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            micro_frontend_id: micro_frontend_id.to_string(),
            name: name.to_string(),
            active_versions: Vec::new(),
            default: None,
            deployment_id: None,
            deleted: false,
            expires_at: None,
            delete_mode: None,
            revision: 0,
        }
    }

    /// Build the composite key for the microfrontends table.
    pub fn table_key(&self) -> String {
        composite_key(&self.project_id, &self.micro_frontend_id)
    }

    /// The version currently receiving all traffic, if any.
    pub fn stable_version(&self) -> Option<&TrafficAllocation> {
        self.active_versions.iter().find(|a| a.traffic == 100)
    }

    /// Snapshot of the current allocation.
    pub fn allocation(&self) -> AllocationState {
        AllocationState {
            active_versions: self.active_versions.clone(),
            default: self.default.clone(),
        }
    }

    /// Replace the allocation with `state`.
    pub fn apply_allocation(&mut self, state: &AllocationState) {
        self.active_versions = state.active_versions.clone();
        self.default = state.default.clone();
    }
}

// ── Version ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionMetadata {
    pub integrity: String,
    pub version: String,
}

/// Opaque payload describing where a version is served from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionPayload {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_url: Option<String>,
    pub metadata: VersionMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub micro_frontend_id: MicroFrontendId,
    pub version: String,
    pub data: VersionPayload,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_mode: Option<DeleteMode>,
}

impl VersionRecord {
    /// Wrap a payload; the record is keyed by `payload.metadata.version`.
    pub fn new(micro_frontend_id: &str, data: VersionPayload) -> Self {
        Self {
            micro_frontend_id: micro_frontend_id.to_string(),
            version: data.metadata.version.clone(),
            data,
            deleted: false,
            expires_at: None,
            delete_mode: None,
        }
    }

    /// Build the composite key for the versions table.
    pub fn table_key(&self) -> String {
        composite_key(&self.micro_frontend_id, &self.version)
    }
}

// ── Deployment ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Started,
    Complete,
    Cancelled,
}

impl DeploymentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DeploymentStatus::Started)
    }
}

/// A traffic split: the allocation in force after one rollout step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AllocationState {
    pub active_versions: Vec<TrafficAllocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl AllocationState {
    /// Traffic share currently assigned to `version`.
    pub fn share_of(&self, version: &str) -> u32 {
        self.active_versions
            .iter()
            .filter(|a| a.version == version)
            .map(|a| a.traffic)
            .sum()
    }
}

/// The `detail` row of a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentDetail {
    pub deployment_id: DeploymentId,
    pub current_state_index: usize,
    pub status: DeploymentStatus,
    pub project_id: ProjectId,
    pub micro_frontend_id: MicroFrontendId,
    pub target_version: String,
    /// Strategy label (preset name or description).
    pub strategy: String,
    /// Seconds between steps, kept so an interrupted execution can resume.
    #[serde(default)]
    pub step_wait_secs: u64,
    pub started_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<u64>,
    pub expires_at: u64,
}

impl DeploymentDetail {
    pub fn table_key(&self) -> String {
        composite_key(&self.deployment_id, DETAIL_STEP_KEY)
    }
}

/// One `state#N` row of a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStateRow {
    pub deployment_id: DeploymentId,
    pub index: usize,
    pub state: AllocationState,
    pub expires_at: u64,
}

impl DeploymentStateRow {
    pub fn step_key(index: usize) -> String {
        format!("state#{index}")
    }

    pub fn table_key(&self) -> String {
        composite_key(&self.deployment_id, &Self::step_key(self.index))
    }
}

/// A deployment assembled from its detail row and its ordered state rows.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentRecord {
    pub detail: DeploymentDetail,
    /// Sorted by `index`.
    pub states: Vec<DeploymentStateRow>,
}

impl DeploymentRecord {
    /// The pre-deployment snapshot (`state#0`).
    pub fn initial_state(&self) -> Option<&AllocationState> {
        self.states.iter().find(|s| s.index == 0).map(|s| &s.state)
    }

    pub fn state(&self, index: usize) -> Option<&AllocationState> {
        self.states.iter().find(|s| s.index == index).map(|s| &s.state)
    }
}

// ── Consumer view ─────────────────────────────────────────────────

/// Traffic annotation copied from the allocation into the view.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewDeployment {
    pub traffic: u32,
    pub default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewVersion {
    #[serde(flatten)]
    pub payload: VersionPayload,
    pub deployment: ViewDeployment,
}

/// Denormalized, resolver-ready projection of one microfrontend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerView {
    pub project_id: ProjectId,
    pub micro_frontend_id: MicroFrontendId,
    pub project_name: String,
    pub mfe_name: String,
    #[serde(default)]
    pub versions: Vec<ViewVersion>,
    /// Revision of the microfrontend this row was built from.
    #[serde(default)]
    pub revision: u64,
}

impl ConsumerView {
    pub fn table_key(&self) -> String {
        composite_key(&self.project_id, &self.micro_frontend_id)
    }
}

/// One page of a prefix query.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Pass back as `start_after` to continue; `None` on the last page.
    pub next_token: Option<String>,
}
