//! Standalone regression tests.
//!
//! Wires the store, change feed, synchronizer, orchestrator and API the
//! way the daemon does, then drives the full delivery flow through the
//! router: project, microfrontend, versions, discovery, deployment.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use frontgrid_api::{ApiState, build_router};
use frontgrid_core::FrontgridConfig;
use frontgrid_rollout::{DeploymentOrchestrator, LocalRolloutExecutor};
use frontgrid_state::{
    ChangeReceiver, MicroFrontend, Project, StateStore, TrafficAllocation, VersionRecord,
    change_feed,
};
use frontgrid_sync::ViewSynchronizer;

struct Harness {
    router: Router,
    store: StateStore,
    synchronizer: ViewSynchronizer,
    changes: ChangeReceiver,
}

impl Harness {
    fn new() -> Self {
        let (change_tx, changes) = change_feed();
        let store = StateStore::open_in_memory().unwrap().with_change_feed(change_tx);
        let executor = Arc::new(LocalRolloutExecutor::new(store.clone()));
        let orchestrator = DeploymentOrchestrator::new(store.clone(), executor);
        let router = build_router(ApiState::new(
            store.clone(),
            orchestrator,
            &FrontgridConfig::default(),
        ));
        Self {
            router,
            synchronizer: ViewSynchronizer::new(store.clone()),
            store,
            changes,
        }
    }

    /// Deliver every pending change record, including echoes of the
    /// synchronizer's own writes.
    fn sync(&mut self) {
        loop {
            let mut batch = Vec::new();
            while let Ok(record) = self.changes.try_recv() {
                batch.push(record);
            }
            if batch.is_empty() {
                return;
            }
            let report = self.synchronizer.process_batch(&batch);
            assert_eq!(report.failed, 0);
        }
    }

    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn discover(&self, project_id: &str, user: &str) -> (StatusCode, Value) {
        let req = Request::builder()
            .uri(format!("/projects/{project_id}/microFrontends"))
            .header("cookie", format!("USER_TOKEN={user}"))
            .body(Body::empty())
            .unwrap();
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    /// Create project "shop" with microfrontend "checkout" serving 1.0.0.
    async fn seed(&mut self) -> (String, String) {
        let (status, json) = self.send("POST", "/api/v1/projects", Some(json!({"name": "shop"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let project_id = json["data"]["id"].as_str().unwrap().to_string();

        let (status, json) = self
            .send(
                "POST",
                &format!("/api/v1/projects/{project_id}/microFrontends"),
                Some(json!({"name": "checkout"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let mfe_id = json["data"]["microFrontendId"].as_str().unwrap().to_string();

        for version in ["1.0.0", "1.1.0"] {
            let (status, _) = self
                .send(
                    "POST",
                    &format!("/api/v1/projects/{project_id}/microFrontends/{mfe_id}/versions"),
                    Some(json!({"version": payload(version)})),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
        }
        self.sync();
        (project_id, mfe_id)
    }
}

fn payload(version: &str) -> Value {
    json!({
        "url": format!("https://cdn.example.com/checkout/{version}/index.js"),
        "metadata": {"integrity": "sha384-regression", "version": version},
    })
}

#[tokio::test]
async fn standalone_discovery_serves_first_version() {
    let mut h = Harness::new();
    let (project_id, _) = h.seed().await;

    let (status, doc) = h.discover(&project_id, "user-1").await;
    assert_eq!(status, StatusCode::OK);
    assert!(doc["schema"].as_str().unwrap().contains("frontend-discovery"));
    let versions = doc["microFrontends"]["shop/checkout"].as_array().unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0]["metadata"]["version"], "1.0.0");
    // The traffic annotation is not exposed to consumers.
    assert!(versions[0].get("deployment").is_none());
}

#[tokio::test]
async fn standalone_split_allocation_is_sticky() {
    let mut h = Harness::new();
    let (project_id, mfe_id) = h.seed().await;

    let (status, _) = h
        .send(
            "PATCH",
            &format!("/api/v1/projects/{project_id}/microFrontends/{mfe_id}"),
            Some(json!({
                "activeVersions": [
                    {"version": "1.0.0", "traffic": 50},
                    {"version": "1.1.0", "traffic": 50}
                ]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    h.sync();

    let mut seen = std::collections::HashSet::new();
    for user in 0..100 {
        let user = format!("user-{user}");
        let (_, first) = h.discover(&project_id, &user).await;
        let (_, again) = h.discover(&project_id, &user).await;
        let version = first["microFrontends"]["shop/checkout"][0]["metadata"]["version"].clone();
        assert_eq!(version, again["microFrontends"]["shop/checkout"][0]["metadata"]["version"]);
        seen.insert(version.as_str().unwrap().to_string());
    }
    assert_eq!(seen.len(), 2, "both versions should be served across 100 users");
}

#[tokio::test]
async fn standalone_deployment_cancel_restores_allocation() {
    let mut h = Harness::new();
    let (project_id, mfe_id) = h.seed().await;
    let base = format!("/api/v1/projects/{project_id}/microFrontends/{mfe_id}");

    let (status, json) = h
        .send(
            "POST",
            &format!("{base}/deployment"),
            Some(json!({
                "targetVersion": "1.1.0",
                "deploymentStrategy": "Linear10PercentEvery10Minutes"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let deployment_id = json["data"]["deploymentId"].as_str().unwrap().to_string();

    let (status, json) = h.send("GET", &format!("{base}/deployment/{deployment_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["deployment"]["status"], "STARTED");
    assert_eq!(json["data"]["states"].as_array().unwrap().len(), 11);

    let (status, _) = h.send("DELETE", &format!("{base}/deployment/{deployment_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, json) = h.send("GET", &format!("{base}/versions"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json["data"]["activeVersions"],
        json!([{"version": "1.0.0", "traffic": 100}])
    );
}

#[tokio::test]
async fn standalone_all_at_once_deployment_completes() {
    let mut h = Harness::new();
    let (project_id, mfe_id) = h.seed().await;

    let (status, _) = h
        .send(
            "POST",
            &format!("/api/v1/projects/{project_id}/microFrontends/{mfe_id}/deployment"),
            Some(json!({"targetVersion": "1.1.0", "deploymentStrategy": "AllAtOnce"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // The executor applies the single step without waiting.
    let mut released = false;
    for _ in 0..200 {
        let mfe = h.store.get_micro_frontend(&project_id, &mfe_id).unwrap().unwrap();
        if mfe.deployment_id.is_none() {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(released, "deployment did not complete");
    h.sync();

    let (status, doc) = h.discover(&project_id, "user-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["microFrontends"]["shop/checkout"][0]["metadata"]["version"], "1.1.0");
}

#[tokio::test]
async fn standalone_project_delete_removes_discovery() {
    let mut h = Harness::new();
    let (project_id, mfe_id) = h.seed().await;

    let (status, _) = h.send("DELETE", &format!("/api/v1/projects/{project_id}"), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    h.sync();

    let (status, _) = h.discover(&project_id, "user-1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let mfe = h.store.get_micro_frontend(&project_id, &mfe_id).unwrap().unwrap();
    assert!(mfe.deleted);
    let version = h.store.get_version(&mfe_id, "1.0.0").unwrap().unwrap();
    assert!(version.deleted);
}

#[test]
fn standalone_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config: FrontgridConfig = toml_config(dir.path());
    {
        let store = StateStore::open(&config.db_path()).unwrap();
        store.put_project(&Project::new("p1", "shop")).unwrap();
    }
    let store = StateStore::open(&config.db_path()).unwrap();
    assert_eq!(store.get_project("p1").unwrap().unwrap().name, "shop");
}

#[test]
fn standalone_restart_rebuilds_lost_views() {
    let dir = tempfile::tempdir().unwrap();
    let config: FrontgridConfig = toml_config(dir.path());
    {
        // The process exits before the synchronizer sees these changes.
        let (change_tx, changes) = change_feed();
        let store = StateStore::open(&config.db_path()).unwrap().with_change_feed(change_tx);
        drop(changes);
        store.put_project(&Project::new("p1", "shop")).unwrap();
        let version = serde_json::from_value(payload("1.0.0")).unwrap();
        store.put_version(&VersionRecord::new("m1", version)).unwrap();
        let mut mfe = MicroFrontend::new("p1", "m1", "checkout");
        mfe.active_versions = vec![TrafficAllocation::new("1.0.0", 100)];
        mfe.default = Some("1.0.0".to_string());
        store.put_micro_frontend(&mfe).unwrap();
        assert!(store.get_view("p1", "m1").unwrap().is_none());
    }

    let (change_tx, _changes) = change_feed();
    let store = StateStore::open(&config.db_path()).unwrap().with_change_feed(change_tx);
    let report = ViewSynchronizer::new(store.clone()).reconcile().unwrap();
    assert_eq!(report.applied, 1);

    let view = store.get_view("p1", "m1").unwrap().unwrap();
    assert_eq!(view.project_name, "shop");
    assert_eq!(view.versions[0].payload.metadata.version, "1.0.0");
}

fn toml_config(data_dir: &std::path::Path) -> FrontgridConfig {
    let path = data_dir.join("frontgrid.toml");
    std::fs::write(
        &path,
        format!(
            "[server]\nport = 9000\n\n[store]\ndata_dir = \"{}\"\n",
            data_dir.display()
        ),
    )
    .unwrap();
    let config = FrontgridConfig::from_file(&path).unwrap();
    assert_eq!(config.server.port, 9000);
    config
}
