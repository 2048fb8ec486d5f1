//! Deployment orchestrator: creates and cancels progressive deployments.
//!
//! Creating a deployment plans every allocation state up front, claims the
//! microfrontend, persists the plan and hands it to the executor. At most
//! one deployment may own a microfrontend at a time; the claim is a
//! conditional write, so concurrent creates cannot both succeed.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use frontgrid_core::now_secs;
use frontgrid_state::{
    AllocationState, DeploymentDetail, DeploymentId, DeploymentRecord, DeploymentStateRow, DeploymentStatus,
    MicroFrontend, StateError, StateStore, WriteOp, chunk_ops,
};

use crate::error::{InvalidState, RolloutError, RolloutResult};
use crate::executor::{ExecutionInput, RolloutExecutor};
use crate::planner::plan;
use crate::strategy::RolloutStrategy;

/// Cause passed to the executor when a deployment is cancelled.
pub const CANCEL_CAUSE: &str = "Deployment was cancelled";

/// Extra lifetime of deployment state rows past the planned end.
const STATE_ROW_GRACE_SECS: u64 = 3600;
/// Extra lifetime of the detail row past the state rows.
const DETAIL_ROW_GRACE_SECS: u64 = 86_400;
const RESUME_PAGE_SIZE: usize = 100;

#[derive(Clone)]
pub struct DeploymentOrchestrator {
    store: StateStore,
    executor: Arc<dyn RolloutExecutor>,
}

impl DeploymentOrchestrator {
    pub fn new(store: StateStore, executor: Arc<dyn RolloutExecutor>) -> Self {
        Self { store, executor }
    }

    /// Check that `mfe` can start a deployment: no deployment attached and
    /// one version on 100%. With a target, it must differ from that
    /// version and exist.
    pub fn check_can_deploy(&self, mfe: &MicroFrontend, target_version: Option<&str>) -> RolloutResult<()> {
        if mfe.deployment_id.is_some() {
            return Err(InvalidState::DeploymentInProgress.into());
        }
        let stable = mfe.stable_version().ok_or(InvalidState::NoStableVersion)?;
        if let Some(target) = target_version {
            if stable.version == target {
                return Err(InvalidState::TargetAlreadyActive(target.to_string()).into());
            }
            match self.store.get_version(&mfe.micro_frontend_id, target)? {
                Some(version) if !version.deleted => {}
                _ => return Err(InvalidState::UnknownTargetVersion(target.to_string()).into()),
            }
        }
        Ok(())
    }

    /// Start a deployment of `target_version` onto `mfe`.
    pub async fn create(
        &self,
        mfe: &MicroFrontend,
        target_version: &str,
        strategy: &RolloutStrategy,
    ) -> RolloutResult<DeploymentId> {
        if mfe.deleted {
            return Err(RolloutError::NotFound(format!("microfrontend {}", mfe.table_key())));
        }
        self.check_can_deploy(mfe, Some(target_version))?;

        let current = mfe.allocation();
        let states = plan(&current, target_version, strategy)?;
        let deployment_id = Uuid::new_v4().to_string();

        match self.store.claim_deployment(
            &mfe.project_id,
            &mfe.micro_frontend_id,
            &deployment_id,
            &current,
        ) {
            Ok(_) => {}
            Err(StateError::ConditionFailed(reason)) => {
                warn!(
                    project_id = %mfe.project_id,
                    micro_frontend_id = %mfe.micro_frontend_id,
                    %reason,
                    "deployment claim rejected"
                );
                return Err(InvalidState::DeploymentInProgress.into());
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self
            .persist_and_start(mfe, &deployment_id, target_version, strategy, states)
            .await
        {
            if let Err(release_err) =
                self.store
                    .release_deployment(&mfe.project_id, &mfe.micro_frontend_id, &deployment_id)
            {
                warn!(%deployment_id, error = %release_err, "failed to release deployment claim");
            }
            // Rows may already be written; a STARTED detail would be resumed.
            let cancelled = self.store.modify_deployment_detail(&deployment_id, |d| {
                d.status = DeploymentStatus::Cancelled;
                d.ended_at = Some(now_secs());
                Ok(())
            });
            match cancelled {
                Ok(_) | Err(StateError::NotFound(_)) => {}
                Err(cancel_err) => {
                    warn!(%deployment_id, error = %cancel_err, "failed to cancel unstarted deployment");
                }
            }
            return Err(e);
        }

        info!(
            %deployment_id,
            project_id = %mfe.project_id,
            micro_frontend_id = %mfe.micro_frontend_id,
            target_version,
            %strategy,
            "deployment started"
        );
        Ok(deployment_id)
    }

    async fn persist_and_start(
        &self,
        mfe: &MicroFrontend,
        deployment_id: &str,
        target_version: &str,
        strategy: &RolloutStrategy,
        states: Vec<AllocationState>,
    ) -> RolloutResult<()> {
        let now = now_secs();
        let step_wait_secs = strategy.step_wait_secs();
        let state_count = states.len();
        let final_state_index = state_count - 1;
        let states_expire_at = now
            .saturating_add(step_wait_secs.saturating_mul(state_count as u64))
            .saturating_add(STATE_ROW_GRACE_SECS);

        let mut ops: Vec<WriteOp> = states
            .into_iter()
            .enumerate()
            .map(|(index, state)| {
                WriteOp::PutDeploymentState(DeploymentStateRow {
                    deployment_id: deployment_id.to_string(),
                    index,
                    state,
                    expires_at: states_expire_at,
                })
            })
            .collect();
        ops.push(WriteOp::PutDeploymentDetail(DeploymentDetail {
            deployment_id: deployment_id.to_string(),
            current_state_index: 0,
            status: DeploymentStatus::Started,
            project_id: mfe.project_id.clone(),
            micro_frontend_id: mfe.micro_frontend_id.clone(),
            target_version: target_version.to_string(),
            strategy: strategy.to_string(),
            step_wait_secs,
            started_at: now,
            ended_at: None,
            expires_at: states_expire_at.saturating_add(DETAIL_ROW_GRACE_SECS),
        }));

        for chunk in chunk_ops(ops) {
            self.store.batch_write(chunk)?;
        }

        let input = ExecutionInput {
            project_id: mfe.project_id.clone(),
            micro_frontend_id: mfe.micro_frontend_id.clone(),
            step_wait_secs,
            final_state_index,
        };
        self.executor
            .start(deployment_id, input)
            .await
            .map_err(|e| RolloutError::Executor(e.to_string()))
    }

    /// Stop a running deployment and put back the allocation it started from.
    pub async fn cancel(&self, deployment_id: &str) -> RolloutResult<DeploymentDetail> {
        let record = self.get(deployment_id)?;
        if record.detail.status.is_terminal() {
            return Err(InvalidState::DeploymentFinished(deployment_id.to_string()).into());
        }
        let initial = record
            .initial_state()
            .cloned()
            .ok_or_else(|| RolloutError::NotFound(format!("deployment {deployment_id} state#0")))?;

        if let Err(e) = self.executor.stop(deployment_id, CANCEL_CAUSE).await {
            warn!(%deployment_id, error = %e, "failed to stop rollout execution");
        }

        let detail = &record.detail;
        self.store
            .restore_allocation(&detail.project_id, &detail.micro_frontend_id, &initial)?;

        let cancelled = self.store.modify_deployment_detail(deployment_id, |d| {
            d.status = DeploymentStatus::Cancelled;
            d.ended_at = Some(now_secs());
            Ok(())
        })?;

        info!(
            %deployment_id,
            project_id = %cancelled.project_id,
            micro_frontend_id = %cancelled.micro_frontend_id,
            "deployment cancelled"
        );
        Ok(cancelled)
    }

    /// Restart executions for every deployment still `STARTED`, picking
    /// up from its recorded step. Run once at startup; returns how many
    /// executions were resumed.
    pub async fn resume_in_flight(&self) -> RolloutResult<usize> {
        let mut resumed = 0;
        let mut start_after: Option<String> = None;
        loop {
            let page = self.store.list_projects(start_after.as_deref(), RESUME_PAGE_SIZE)?;
            for project in &page.items {
                for mfe in self.store.list_micro_frontends(&project.project_id)? {
                    let Some(deployment_id) = mfe.deployment_id.as_deref() else {
                        continue;
                    };
                    match self.resume(&mfe, deployment_id).await {
                        Ok(true) => resumed += 1,
                        Ok(false) => {}
                        Err(e) => warn!(%deployment_id, error = %e, "failed to resume deployment"),
                    }
                }
            }
            match page.next_token {
                Some(token) => start_after = Some(token),
                None => break,
            }
        }
        Ok(resumed)
    }

    async fn resume(&self, mfe: &MicroFrontend, deployment_id: &str) -> RolloutResult<bool> {
        let record = self.get(deployment_id)?;
        if record.detail.status != DeploymentStatus::Started {
            return Ok(false);
        }
        let Some(final_state_index) = record.states.len().checked_sub(1) else {
            return Ok(false);
        };
        let input = ExecutionInput {
            project_id: mfe.project_id.clone(),
            micro_frontend_id: mfe.micro_frontend_id.clone(),
            step_wait_secs: record.detail.step_wait_secs,
            final_state_index,
        };
        self.executor
            .start(deployment_id, input)
            .await
            .map_err(|e| RolloutError::Executor(e.to_string()))?;
        info!(
            %deployment_id,
            step = record.detail.current_state_index,
            final_state_index,
            "deployment resumed"
        );
        Ok(true)
    }

    /// Load a deployment with all its state rows.
    pub fn get(&self, deployment_id: &str) -> RolloutResult<DeploymentRecord> {
        self.store
            .get_deployment(deployment_id)?
            .ok_or_else(|| RolloutError::NotFound(format!("deployment {deployment_id}")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use frontgrid_state::{TrafficAllocation, VersionMetadata, VersionPayload, VersionRecord};

    use super::*;
    use crate::executor::ExecutorError;

    #[derive(Default)]
    struct RecordingExecutor {
        attempted: Mutex<Vec<String>>,
        started: Mutex<Vec<(String, ExecutionInput)>>,
        stopped: Mutex<Vec<(String, String)>>,
        fail_start: bool,
    }

    #[async_trait]
    impl RolloutExecutor for RecordingExecutor {
        async fn start(&self, execution_id: &str, input: ExecutionInput) -> Result<(), ExecutorError> {
            self.attempted.lock().unwrap().push(execution_id.to_string());
            if self.fail_start {
                return Err(ExecutorError::Failed("boom".to_string()));
            }
            self.started.lock().unwrap().push((execution_id.to_string(), input));
            Ok(())
        }

        async fn stop(&self, execution_id: &str, cause: &str) -> Result<(), ExecutorError> {
            self.stopped
                .lock()
                .unwrap()
                .push((execution_id.to_string(), cause.to_string()));
            Ok(())
        }
    }

    fn version(mfe_id: &str, v: &str) -> VersionRecord {
        VersionRecord::new(
            mfe_id,
            VersionPayload {
                url: format!("https://cdn.example.com/{v}/index.js"),
                fallback_url: None,
                metadata: VersionMetadata {
                    integrity: "sha384-abc".to_string(),
                    version: v.to_string(),
                },
                extras: None,
            },
        )
    }

    fn setup(executor: Arc<RecordingExecutor>) -> (StateStore, DeploymentOrchestrator, MicroFrontend) {
        let store = StateStore::open_in_memory().unwrap();
        let mut mfe = MicroFrontend::new("p1", "m1", "checkout");
        mfe.active_versions = vec![TrafficAllocation::new("1.0.0", 100)];
        mfe.default = Some("1.0.0".to_string());
        let mfe = store.put_micro_frontend(&mfe).unwrap();
        store.put_version(&version("m1", "1.0.0")).unwrap();
        store.put_version(&version("m1", "2.0.0")).unwrap();
        let orchestrator = DeploymentOrchestrator::new(store.clone(), executor);
        (store, orchestrator, mfe)
    }

    #[tokio::test]
    async fn create_persists_plan_and_starts_execution() {
        let executor = Arc::new(RecordingExecutor::default());
        let (store, orchestrator, mfe) = setup(executor.clone());

        let id = orchestrator
            .create(&mfe, "2.0.0", &RolloutStrategy::linear(5, 1))
            .await
            .unwrap();

        let record = store.get_deployment(&id).unwrap().unwrap();
        assert_eq!(record.states.len(), 21);
        assert_eq!(record.detail.status, DeploymentStatus::Started);
        assert_eq!(record.detail.current_state_index, 0);
        assert_eq!(record.initial_state(), Some(&mfe.allocation()));
        assert!(record.detail.expires_at > record.states[0].expires_at);

        let claimed = store.get_micro_frontend("p1", "m1").unwrap().unwrap();
        assert_eq!(claimed.deployment_id.as_deref(), Some(id.as_str()));

        let started = executor.started.lock().unwrap();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].0, id);
        assert_eq!(started[0].1.final_state_index, 20);
        assert_eq!(started[0].1.step_wait_secs, 60);
    }

    #[tokio::test]
    async fn second_create_is_rejected() {
        let executor = Arc::new(RecordingExecutor::default());
        let (store, orchestrator, mfe) = setup(executor);

        orchestrator
            .create(&mfe, "2.0.0", &RolloutStrategy::all_at_once())
            .await
            .unwrap();

        // Stale snapshot without the deployment id still loses the claim.
        let err = orchestrator
            .create(&mfe, "2.0.0", &RolloutStrategy::all_at_once())
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::InvalidState(InvalidState::DeploymentInProgress)));

        let fresh = store.get_micro_frontend("p1", "m1").unwrap().unwrap();
        let err = orchestrator
            .create(&fresh, "2.0.0", &RolloutStrategy::all_at_once())
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::InvalidState(InvalidState::DeploymentInProgress)));
    }

    #[tokio::test]
    async fn create_checks_preconditions() {
        let executor = Arc::new(RecordingExecutor::default());
        let (_store, orchestrator, mut mfe) = setup(executor.clone());

        let err = orchestrator
            .create(&mfe, "1.0.0", &RolloutStrategy::all_at_once())
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::InvalidState(InvalidState::TargetAlreadyActive(_))));

        let err = orchestrator
            .create(&mfe, "9.9.9", &RolloutStrategy::all_at_once())
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::InvalidState(InvalidState::UnknownTargetVersion(_))));

        mfe.active_versions = vec![
            TrafficAllocation::new("1.0.0", 50),
            TrafficAllocation::new("2.0.0", 50),
        ];
        let err = orchestrator
            .create(&mfe, "2.0.0", &RolloutStrategy::all_at_once())
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::InvalidState(InvalidState::NoStableVersion)));

        mfe.deleted = true;
        let err = orchestrator
            .create(&mfe, "2.0.0", &RolloutStrategy::all_at_once())
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::NotFound(_)));

        assert!(executor.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn executor_failure_releases_claim_and_cancels() {
        let executor = Arc::new(RecordingExecutor {
            fail_start: true,
            ..Default::default()
        });
        let (store, orchestrator, mfe) = setup(executor.clone());

        let err = orchestrator
            .create(&mfe, "2.0.0", &RolloutStrategy::all_at_once())
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::Executor(_)));

        let after = store.get_micro_frontend("p1", "m1").unwrap().unwrap();
        assert!(after.deployment_id.is_none());

        let id = executor.attempted.lock().unwrap()[0].clone();
        let detail = store.get_deployment_detail(&id).unwrap().unwrap();
        assert_eq!(detail.status, DeploymentStatus::Cancelled);
        assert!(detail.ended_at.is_some());
    }

    #[tokio::test]
    async fn cancel_restores_initial_allocation() {
        let executor = Arc::new(RecordingExecutor::default());
        let (store, orchestrator, mfe) = setup(executor.clone());
        let id = orchestrator
            .create(&mfe, "2.0.0", &RolloutStrategy::linear(10, 1))
            .await
            .unwrap();

        // Simulate a few executed steps.
        store.advance_deployment("p1", "m1", &id, 3, false, 0).unwrap();
        let midway = store.get_micro_frontend("p1", "m1").unwrap().unwrap();
        assert_eq!(midway.allocation().share_of("2.0.0"), 30);

        let detail = orchestrator.cancel(&id).await.unwrap();
        assert_eq!(detail.status, DeploymentStatus::Cancelled);
        assert!(detail.ended_at.is_some());

        let restored = store.get_micro_frontend("p1", "m1").unwrap().unwrap();
        assert_eq!(restored.allocation(), mfe.allocation());
        assert!(restored.deployment_id.is_none());

        let stopped = executor.stopped.lock().unwrap();
        assert_eq!(stopped.as_slice(), &[(id.clone(), CANCEL_CAUSE.to_string())]);
    }

    #[tokio::test]
    async fn cancel_unknown_deployment_has_no_side_effects() {
        let executor = Arc::new(RecordingExecutor::default());
        let (store, orchestrator, mfe) = setup(executor.clone());

        let err = orchestrator.cancel("nope").await.unwrap_err();
        assert!(matches!(err, RolloutError::NotFound(_)));
        assert!(executor.stopped.lock().unwrap().is_empty());
        let after = store.get_micro_frontend("p1", "m1").unwrap().unwrap();
        assert_eq!(after.revision, mfe.revision);
    }

    #[tokio::test]
    async fn cancel_finished_deployment_is_rejected() {
        let executor = Arc::new(RecordingExecutor::default());
        let (_store, orchestrator, mfe) = setup(executor);
        let id = orchestrator
            .create(&mfe, "2.0.0", &RolloutStrategy::all_at_once())
            .await
            .unwrap();

        orchestrator.cancel(&id).await.unwrap();
        let err = orchestrator.cancel(&id).await.unwrap_err();
        assert!(matches!(err, RolloutError::InvalidState(InvalidState::DeploymentFinished(_))));
    }

    #[tokio::test]
    async fn resume_restarts_only_started_deployments() {
        let executor = Arc::new(RecordingExecutor::default());
        let (store, orchestrator, mfe) = setup(executor);
        store.put_project(&frontgrid_state::Project::new("p1", "shop")).unwrap();
        let id = orchestrator
            .create(&mfe, "2.0.0", &RolloutStrategy::linear(25, 2))
            .await
            .unwrap();
        store
            .modify_deployment_detail(&id, |d| {
                d.current_state_index = 2;
                Ok(())
            })
            .unwrap();

        // A fresh executor, as after a daemon restart.
        let restarted = Arc::new(RecordingExecutor::default());
        let orchestrator = DeploymentOrchestrator::new(store.clone(), restarted.clone());
        assert_eq!(orchestrator.resume_in_flight().await.unwrap(), 1);
        {
            let started = restarted.started.lock().unwrap();
            assert_eq!(started[0].0, id);
            assert_eq!(started[0].1.final_state_index, 4);
            assert_eq!(started[0].1.step_wait_secs, 120);
        }

        orchestrator.cancel(&id).await.unwrap();
        let idle = Arc::new(RecordingExecutor::default());
        let orchestrator = DeploymentOrchestrator::new(store, idle.clone());
        assert_eq!(orchestrator.resume_in_flight().await.unwrap(), 0);
        assert!(idle.started.lock().unwrap().is_empty());
    }
}
