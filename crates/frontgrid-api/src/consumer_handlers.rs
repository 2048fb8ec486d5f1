//! Consumer endpoint: frontend discovery for end users.
//!
//! Unlike the admin API this returns the discovery document directly,
//! without the `ApiResponse` envelope, since browsers and shells consume
//! it against a published schema.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use frontgrid_state::VersionPayload;

use crate::ApiState;
use crate::response::error_response;
use crate::user_tracking::UserId;

/// Schema advertised in every discovery document.
pub const DISCOVERY_SCHEMA: &str =
    "https://raw.githubusercontent.com/awslabs/frontend-discovery/main/schema/v1-pre.json";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub start_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryDocument {
    pub schema: String,
    /// Keyed by `{projectName}/{mfeName}`; one resolved version each.
    pub micro_frontends: BTreeMap<String, Vec<VersionPayload>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

/// GET /projects/{projectId}/microFrontends
pub async fn get_frontends(
    State(state): State<ApiState>,
    Path(project_id): Path<String>,
    Query(query): Query<PageQuery>,
    Extension(UserId(user_id)): Extension<UserId>,
) -> Response {
    let page = match state.store.query_views(
        &project_id,
        query.start_token.as_deref(),
        state.consumer.page_size,
    ) {
        Ok(page) => page,
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response();
        }
    };
    if page.items.is_empty() {
        return error_response("The specified project does not exist.", StatusCode::NOT_FOUND)
            .into_response();
    }

    let mut micro_frontends = BTreeMap::new();
    for view in &page.items {
        if view.versions.is_empty() {
            continue;
        }
        if let Some(chosen) = frontgrid_resolver::resolve(view, &user_id) {
            micro_frontends.insert(
                format!("{}/{}", view.project_name, view.mfe_name),
                vec![chosen.payload.clone()],
            );
        }
    }

    debug!(%project_id, user = %user_id, resolved = micro_frontends.len(), "frontends resolved");

    Json(DiscoveryDocument {
        schema: DISCOVERY_SCHEMA.to_string(),
        micro_frontends,
        next_token: page.next_token,
    })
    .into_response()
}
