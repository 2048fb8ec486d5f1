//! Typed multi-item writes applied in a single transaction.

use crate::types::*;

/// Hard ceiling on the number of operations in one [`WriteOp`] batch.
pub const MAX_BATCH_WRITE: usize = 25;

/// One item of a batched write.
#[derive(Debug, Clone)]
pub enum WriteOp {
    PutProject(Project),
    PutMicroFrontend(MicroFrontend),
    PutVersion(VersionRecord),
    PutDeploymentDetail(DeploymentDetail),
    PutDeploymentState(DeploymentStateRow),
    /// Revision-guarded like [`crate::StateStore::put_view`].
    PutView(ConsumerView),
    DeleteView {
        project_id: ProjectId,
        micro_frontend_id: MicroFrontendId,
    },
}

/// What a batch actually did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub applied: usize,
    /// View puts rejected as stale and view deletes of absent rows.
    pub skipped: usize,
}

/// Split `ops` into batches no larger than [`MAX_BATCH_WRITE`].
pub fn chunk_ops(ops: Vec<WriteOp>) -> Vec<Vec<WriteOp>> {
    let mut batches = Vec::new();
    let mut iter = ops.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(MAX_BATCH_WRITE).collect());
    }
    batches
}
