//! frontgrid-api — REST API for FrontGrid.
//!
//! Two surfaces share one router: the admin API under `/api/v1`, wrapped
//! in the `{success, data, error}` envelope, and the consumer discovery
//! endpoint, which returns the discovery document as-is.
//!
//! # Admin routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/projects` | List projects |
//! | POST | `/api/v1/projects` | Create a project |
//! | PATCH | `/api/v1/projects/{projectId}` | Rename a project |
//! | DELETE | `/api/v1/projects/{projectId}` | Delete a project and cascade |
//! | GET | `/api/v1/projects/{projectId}/microFrontends` | List microfrontends |
//! | POST | `/api/v1/projects/{projectId}/microFrontends` | Create a microfrontend |
//! | PATCH | `/api/v1/projects/{projectId}/microFrontends/{mfeId}` | Rename or reallocate |
//! | DELETE | `/api/v1/projects/{projectId}/microFrontends/{mfeId}` | Delete a microfrontend |
//! | GET | `.../{mfeId}/versions` | List versions |
//! | POST | `.../{mfeId}/versions` | Register a version, optionally deploying it |
//! | POST | `.../{mfeId}/deployment` | Start a deployment |
//! | GET | `.../{mfeId}/deployment/{deploymentId}` | Deployment detail and plan |
//! | DELETE | `.../{mfeId}/deployment/{deploymentId}` | Cancel a deployment |
//!
//! # Consumer routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/projects/{projectId}/microFrontends` | Resolve one version per microfrontend |

pub mod admin_handlers;
pub mod consumer_handlers;
mod response;
pub mod user_tracking;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::middleware;
use axum::routing::{get, patch, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use frontgrid_core::FrontgridConfig;
use frontgrid_core::config::{AdminConfig, ConsumerConfig};
use frontgrid_rollout::DeploymentOrchestrator;
use frontgrid_state::StateStore;

use crate::user_tracking::{UserTracking, track_user};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub orchestrator: DeploymentOrchestrator,
    pub admin: AdminConfig,
    pub consumer: ConsumerConfig,
}

impl ApiState {
    pub fn new(store: StateStore, orchestrator: DeploymentOrchestrator, config: &FrontgridConfig) -> Self {
        Self {
            store,
            orchestrator,
            admin: config.admin.clone(),
            consumer: config.consumer.clone(),
        }
    }
}

/// Build the complete API router (admin + consumer).
pub fn build_router(state: ApiState) -> Router {
    use admin_handlers as admin;

    let mfe = "/projects/{projectId}/microFrontends/{microFrontendId}";
    let admin_routes = Router::new()
        .route("/projects", get(admin::list_projects).post(admin::create_project))
        .route(
            "/projects/{projectId}",
            patch(admin::update_project).delete(admin::delete_project),
        )
        .route(
            "/projects/{projectId}/microFrontends",
            get(admin::list_micro_frontends).post(admin::create_micro_frontend),
        )
        .route(
            mfe,
            patch(admin::update_micro_frontend).delete(admin::delete_micro_frontend),
        )
        .route(
            &format!("{mfe}/versions"),
            get(admin::list_versions).post(admin::create_version),
        )
        .route(&format!("{mfe}/deployment"), post(admin::create_deployment))
        .route(
            &format!("{mfe}/deployment/{{deploymentId}}"),
            get(admin::get_deployment).delete(admin::cancel_deployment),
        )
        .with_state(state.clone());

    let tracking = UserTracking::from(&state.consumer);
    let mut consumer_routes = Router::new()
        .route(
            "/projects/{projectId}/microFrontends",
            get(consumer_handlers::get_frontends),
        )
        .layer(middleware::from_fn_with_state(tracking, track_user))
        .with_state(state.clone());

    if let Some(origin) = &state.consumer.allow_origin {
        match HeaderValue::from_str(origin) {
            Ok(origin) => {
                consumer_routes = consumer_routes.layer(
                    CorsLayer::new()
                        .allow_origin(origin)
                        .allow_credentials(true)
                        .allow_methods([Method::GET])
                        .allow_headers([header::CONTENT_TYPE]),
                );
            }
            Err(e) => warn!(origin = %origin, error = %e, "ignoring invalid consumer allow_origin"),
        }
    }

    Router::new()
        .nest("/api/v1", admin_routes)
        .merge(consumer_routes)
        .layer(TraceLayer::new_for_http())
}


#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use frontgrid_state::{ConsumerView, ViewDeployment, ViewVersion};
    use tower::ServiceExt;

    use super::test_support::*;
    use super::*;
    use crate::consumer_handlers::DiscoveryDocument;

    fn seed_view(state: &ApiState) {
        state
            .store
            .put_view(&ConsumerView {
                project_id: "p1".to_string(),
                micro_frontend_id: "m1".to_string(),
                project_name: "shop".to_string(),
                mfe_name: "checkout".to_string(),
                versions: vec![ViewVersion {
                    payload: payload("1.0.0"),
                    deployment: ViewDeployment {
                        traffic: 100,
                        default: true,
                    },
                }],
                revision: 1,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn consumer_resolves_and_sets_cookie() {
        let state = test_state();
        seed_view(&state);
        let router = build_router(state);

        let req = Request::builder()
            .uri("/projects/p1/microFrontends")
            .header("cookie", "USER_TOKEN=user-42")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let cookie = resp.headers().get("set-cookie").unwrap().to_str().unwrap();
        assert!(cookie.starts_with("USER_TOKEN=user-42"));

        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let doc: DiscoveryDocument = serde_json::from_slice(&body).unwrap();
        let versions = &doc.micro_frontends["shop/checkout"];
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].metadata.version, "1.0.0");
        assert!(doc.next_token.is_none());
    }

    #[tokio::test]
    async fn consumer_issues_new_user_id() {
        let state = test_state();
        seed_view(&state);
        let router = build_router(state);

        let req = Request::builder()
            .uri("/projects/p1/microFrontends")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let cookie = resp.headers().get("set-cookie").unwrap().to_str().unwrap();
        let value = cookie.trim_start_matches("USER_TOKEN=");
        assert_eq!(value.len(), 36, "expected a uuid, got {value}");
    }

    #[tokio::test]
    async fn consumer_unknown_project_is_404() {
        let router = build_router(test_state());
        let req = Request::builder()
            .uri("/projects/nope/microFrontends")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        // The cookie is still issued on errors.
        assert!(resp.headers().contains_key("set-cookie"));
    }

    #[tokio::test]
    async fn admin_routes_are_nested() {
        let state = test_state();
        seed(&state);
        let router = build_router(state);

        let req = Request::builder()
            .uri("/api/v1/projects/p1/microFrontends/m1/versions")
            .body(Body::empty())
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["name"], "shop/checkout");
        assert_eq!(json["data"]["versions"].as_array().unwrap().len(), 2);

        // The admin API does not go through user tracking.
        let req = Request::builder()
            .uri("/api/v1/projects")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!resp.headers().contains_key("set-cookie"));
    }

    #[tokio::test]
    async fn cors_headers_when_origin_configured() {
        let mut state = test_state();
        state.consumer.allow_origin = Some("https://shop.example.com".to_string());
        seed_view(&state);
        let router = build_router(state);

        let req = Request::builder()
            .uri("/projects/p1/microFrontends")
            .header("origin", "https://shop.example.com")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("access-control-allow-origin").unwrap(),
            "https://shop.example.com"
        );
        assert_eq!(
            resp.headers().get("access-control-allow-credentials").unwrap(),
            "true"
        );
    }
}
