//! Rollout executor: walks a persisted deployment forward step by step.
//!
//! The orchestrator only knows the [`RolloutExecutor`] trait. The
//! in-process [`LocalRolloutExecutor`] spawns one background task per
//! execution; each task sleeps for the step wait, then applies the next
//! stored state to the microfrontend until the final state is reached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use frontgrid_core::now_secs;
use frontgrid_state::{StateError, StateResult, StateStore};

/// Everything an execution needs besides the deployment rows themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionInput {
    pub project_id: String,
    pub micro_frontend_id: String,
    pub step_wait_secs: u64,
    /// Index of the last `state#N` row.
    pub final_state_index: usize,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("execution {0} is already running")]
    AlreadyRunning(String),

    #[error("execution {0} is not running")]
    NotRunning(String),

    #[error("execution failed: {0}")]
    Failed(String),
}

/// Starts and stops step executions. Execution id equals deployment id.
#[async_trait]
pub trait RolloutExecutor: Send + Sync {
    async fn start(&self, execution_id: &str, input: ExecutionInput) -> Result<(), ExecutorError>;

    async fn stop(&self, execution_id: &str, cause: &str) -> Result<(), ExecutorError>;
}

struct ExecutionSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

type Executions = Arc<RwLock<HashMap<String, ExecutionSlot>>>;

/// Runs executions as tokio tasks inside the daemon.
pub struct LocalRolloutExecutor {
    store: StateStore,
    executions: Executions,
}

impl LocalRolloutExecutor {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            executions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Ids of executions that have not finished yet.
    pub async fn active_executions(&self) -> Vec<String> {
        let executions = self.executions.read().await;
        executions.keys().cloned().collect()
    }

    pub async fn is_running(&self, execution_id: &str) -> bool {
        let executions = self.executions.read().await;
        executions.contains_key(execution_id)
    }

    /// Stop all executions (for graceful shutdown). Deployments stay
    /// `STARTED` in the store.
    pub async fn stop_all(&self) {
        let mut executions = self.executions.write().await;
        for (id, slot) in executions.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(execution_id = %id, "execution stopped");
        }
        info!("all rollout executions stopped");
    }
}

#[async_trait]
impl RolloutExecutor for LocalRolloutExecutor {
    async fn start(&self, execution_id: &str, input: ExecutionInput) -> Result<(), ExecutorError> {
        // Hold the lock across spawn so a task that finishes immediately
        // cannot try to remove its slot before it is inserted.
        let mut executions = self.executions.write().await;
        if executions.contains_key(execution_id) {
            return Err(ExecutorError::AlreadyRunning(execution_id.to_string()));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let id = execution_id.to_string();
        let store = self.store.clone();
        let registry = Arc::clone(&self.executions);
        let steps = input.final_state_index;

        let handle = tokio::spawn(async move {
            run_execution(&id, &input, &store, shutdown_rx).await;
            registry.write().await.remove(&id);
        });

        executions.insert(
            execution_id.to_string(),
            ExecutionSlot {
                handle,
                shutdown_tx,
            },
        );

        info!(%execution_id, steps, "rollout execution started");
        Ok(())
    }

    async fn stop(&self, execution_id: &str, cause: &str) -> Result<(), ExecutorError> {
        let slot = self
            .executions
            .write()
            .await
            .remove(execution_id)
            .ok_or_else(|| ExecutorError::NotRunning(execution_id.to_string()))?;
        let _ = slot.shutdown_tx.send(true);
        slot.handle.abort();
        info!(%execution_id, %cause, "rollout execution stopped");
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StepOutcome {
    Applied,
    Halted,
}

/// The step loop for a single execution.
async fn run_execution(
    execution_id: &str,
    input: &ExecutionInput,
    store: &StateStore,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut index = match store.get_deployment_detail(execution_id) {
        Ok(Some(detail)) => detail.current_state_index,
        Ok(None) => {
            error!(%execution_id, "deployment detail missing, execution aborted");
            return;
        }
        Err(e) => {
            error!(%execution_id, error = %e, "failed to read deployment detail");
            return;
        }
    };

    debug!(%execution_id, from = index, to = input.final_state_index, "execution loop starting");

    while index < input.final_state_index {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(input.step_wait_secs)) => {}
            _ = shutdown.changed() => {
                debug!(%execution_id, "execution loop shutting down");
                return;
            }
        }

        let next = index + 1;
        match advance(store, execution_id, input, next) {
            Ok(StepOutcome::Applied) => {
                debug!(%execution_id, step = next, "rollout step applied");
                index = next;
            }
            Ok(StepOutcome::Halted) => {
                info!(%execution_id, step = next, "deployment no longer active, execution halted");
                return;
            }
            Err(e) => {
                error!(%execution_id, step = next, error = %e, "rollout step failed");
                return;
            }
        }
    }

    info!(%execution_id, "rollout execution complete");
}

/// Apply `state#next` and record progress in a single store write, so a
/// released microfrontend always comes with a COMPLETE detail row.
fn advance(
    store: &StateStore,
    execution_id: &str,
    input: &ExecutionInput,
    next: usize,
) -> StateResult<StepOutcome> {
    let is_final = next == input.final_state_index;
    let result = store.advance_deployment(
        &input.project_id,
        &input.micro_frontend_id,
        execution_id,
        next,
        is_final,
        now_secs(),
    );

    match result {
        Ok(_) => Ok(StepOutcome::Applied),
        Err(StateError::ConditionFailed(reason)) => {
            warn!(%execution_id, %reason, "rollout step skipped");
            Ok(StepOutcome::Halted)
        }
        Err(e) => Err(e),
    }
}
