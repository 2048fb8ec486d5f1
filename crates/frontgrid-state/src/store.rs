//! StateStore: redb-backed state persistence for FrontGrid.
//!
//! Provides typed operations over projects, microfrontends, versions,
//! deployments and consumer views. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).
//!
//! Every write runs in a single redb write transaction. Because redb
//! serializes write transactions, read-modify-write helpers such as
//! [`StateStore::claim_deployment`] behave as genuine conditional writes.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableHandle, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::batch::{BatchOutcome, MAX_BATCH_WRITE, WriteOp};
use crate::change::{ChangeRecord, ChangeSender, EventName};
use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    feed: Option<ChangeSender>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            feed: None,
        };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            feed: None,
        };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Publish project and microfrontend mutations to `feed` after each commit.
    pub fn with_change_feed(mut self, feed: ChangeSender) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in [PROJECTS, MICRO_FRONTENDS, VERSIONS, DEPLOYMENTS, CONSUMER_VIEWS] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Projects ───────────────────────────────────────────────────

    /// Insert or update a project.
    pub fn put_project(&self, project: &Project) -> StateResult<()> {
        self.write(|txn, changes| txn_put_project(txn, project, changes))?;
        debug!(project_id = %project.project_id, "project stored");
        Ok(())
    }

    pub fn get_project(&self, project_id: &str) -> StateResult<Option<Project>> {
        self.read_one(PROJECTS, project_id)
    }

    /// List projects in key order, `limit` per page.
    pub fn list_projects(
        &self,
        start_after: Option<&str>,
        limit: usize,
    ) -> StateResult<Page<Project>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
        let mut items: Vec<Project> = Vec::new();
        let mut next_token = None;
        let iter = match start_after {
            Some(after) => table.range(after..).map_err(map_err!(Read))?,
            None => table.iter().map_err(map_err!(Read))?,
        };
        for entry in iter {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if start_after == Some(key.value()) {
                continue;
            }
            if items.len() >= limit {
                next_token = items.last().map(|p| p.project_id.clone());
                break;
            }
            items.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(Page { items, next_token })
    }

    /// Tombstone a project. Fails with `NotFound` if it is absent or
    /// already deleted.
    pub fn soft_delete_project(&self, project_id: &str, expires_at: u64) -> StateResult<Project> {
        self.write(|txn, changes| {
            let mut project: Project = txn_get(txn, PROJECTS, project_id)?
                .filter(|p: &Project| !p.deleted)
                .ok_or_else(|| StateError::NotFound(format!("project {project_id}")))?;
            project.deleted = true;
            project.expires_at = Some(expires_at);
            txn_put_project(txn, &project, changes)?;
            Ok(project)
        })
    }

    // ── Microfrontends ─────────────────────────────────────────────

    /// Insert or update a microfrontend. Returns the stored record with
    /// its new revision.
    pub fn put_micro_frontend(&self, mfe: &MicroFrontend) -> StateResult<MicroFrontend> {
        let stored = self.write(|txn, changes| txn_put_micro_frontend(txn, mfe.clone(), changes))?;
        debug!(key = %stored.table_key(), revision = stored.revision, "microfrontend stored");
        Ok(stored)
    }

    pub fn get_micro_frontend(
        &self,
        project_id: &str,
        micro_frontend_id: &str,
    ) -> StateResult<Option<MicroFrontend>> {
        self.read_one(MICRO_FRONTENDS, &composite_key(project_id, micro_frontend_id))
    }

    /// All microfrontends of a project, deleted ones included.
    pub fn list_micro_frontends(&self, project_id: &str) -> StateResult<Vec<MicroFrontend>> {
        Ok(self.scan_prefix(MICRO_FRONTENDS, project_id, None, None)?.items)
    }

    /// One page of a project's microfrontends.
    pub fn list_micro_frontends_page(
        &self,
        project_id: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> StateResult<Page<MicroFrontend>> {
        self.scan_prefix(MICRO_FRONTENDS, project_id, start_after, Some(limit))
    }

    /// Read-modify-write a microfrontend in one transaction.
    ///
    /// `f` may reject the change by returning an error, in which case
    /// nothing is written.
    pub fn modify_micro_frontend<F>(
        &self,
        project_id: &str,
        micro_frontend_id: &str,
        f: F,
    ) -> StateResult<MicroFrontend>
    where
        F: FnOnce(&mut MicroFrontend) -> StateResult<()>,
    {
        let key = composite_key(project_id, micro_frontend_id);
        self.write(|txn, changes| {
            let mut mfe: MicroFrontend = txn_get(txn, MICRO_FRONTENDS, &key)?
                .ok_or_else(|| StateError::NotFound(format!("microfrontend {key}")))?;
            f(&mut mfe)?;
            txn_put_micro_frontend(txn, mfe, changes)
        })
    }

    /// Tombstone a microfrontend. Fails with `NotFound` if it is absent or
    /// already deleted.
    pub fn soft_delete_micro_frontend(
        &self,
        project_id: &str,
        micro_frontend_id: &str,
        expires_at: u64,
    ) -> StateResult<MicroFrontend> {
        self.modify_micro_frontend(project_id, micro_frontend_id, |mfe| {
            if mfe.deleted {
                return Err(StateError::NotFound(format!("microfrontend {}", mfe.table_key())));
            }
            mfe.deleted = true;
            mfe.expires_at = Some(expires_at);
            Ok(())
        })
    }

    /// Attach `deployment_id` to a live microfrontend, only if no other
    /// deployment is attached and its allocation still equals `expected`
    /// (the snapshot the rollout was planned from).
    pub fn claim_deployment(
        &self,
        project_id: &str,
        micro_frontend_id: &str,
        deployment_id: &str,
        expected: &AllocationState,
    ) -> StateResult<MicroFrontend> {
        self.modify_micro_frontend(project_id, micro_frontend_id, |mfe| {
            if mfe.deleted {
                return Err(StateError::NotFound(format!("microfrontend {}", mfe.table_key())));
            }
            if let Some(existing) = &mfe.deployment_id {
                return Err(StateError::ConditionFailed(format!(
                    "deployment {existing} already attached"
                )));
            }
            if mfe.allocation() != *expected {
                return Err(StateError::ConditionFailed(
                    "allocation changed since the rollout was planned".to_string(),
                ));
            }
            mfe.deployment_id = Some(deployment_id.to_string());
            Ok(())
        })
    }

    /// Detach `deployment_id` if it is still attached. Returns whether
    /// anything changed.
    pub fn release_deployment(
        &self,
        project_id: &str,
        micro_frontend_id: &str,
        deployment_id: &str,
    ) -> StateResult<bool> {
        let result = self.modify_micro_frontend(project_id, micro_frontend_id, |mfe| {
            if mfe.deployment_id.as_deref() != Some(deployment_id) {
                return Err(StateError::ConditionFailed("deployment not attached".to_string()));
            }
            mfe.deployment_id = None;
            Ok(())
        });
        match result {
            Ok(_) => Ok(true),
            Err(StateError::ConditionFailed(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Apply step `next` of a deployment to its microfrontend and record
    /// the step on the detail row, both in one transaction. With `release`
    /// (the final step) the deployment is detached from the microfrontend
    /// and marked COMPLETE at `ended_at`.
    ///
    /// Fails with `ConditionFailed`, writing nothing, if the deployment is
    /// no longer STARTED or no longer owns the microfrontend.
    pub fn advance_deployment(
        &self,
        project_id: &str,
        micro_frontend_id: &str,
        deployment_id: &str,
        next: usize,
        release: bool,
        ended_at: u64,
    ) -> StateResult<DeploymentDetail> {
        let detail_key = composite_key(deployment_id, DETAIL_STEP_KEY);
        let state_key = composite_key(deployment_id, &DeploymentStateRow::step_key(next));
        let mfe_key = composite_key(project_id, micro_frontend_id);
        self.write(|txn, changes| {
            let mut detail: DeploymentDetail = txn_get(txn, DEPLOYMENTS, &detail_key)?
                .ok_or_else(|| StateError::NotFound(format!("deployment {deployment_id}")))?;
            if detail.status != DeploymentStatus::Started {
                return Err(StateError::ConditionFailed(format!(
                    "deployment is {:?}",
                    detail.status
                )));
            }
            let step: DeploymentStateRow = txn_get(txn, DEPLOYMENTS, &state_key)?
                .ok_or_else(|| StateError::NotFound(format!("deployment state {state_key}")))?;
            let mut mfe: MicroFrontend = txn_get(txn, MICRO_FRONTENDS, &mfe_key)?
                .ok_or_else(|| StateError::NotFound(format!("microfrontend {mfe_key}")))?;
            if mfe.deployment_id.as_deref() != Some(deployment_id) {
                return Err(StateError::ConditionFailed("deployment not attached".to_string()));
            }

            mfe.apply_allocation(&step.state);
            if release {
                mfe.deployment_id = None;
            }
            txn_put_micro_frontend(txn, mfe, changes)?;

            detail.current_state_index = next;
            if release {
                detail.status = DeploymentStatus::Complete;
                detail.ended_at = Some(ended_at);
            }
            txn_put(txn, DEPLOYMENTS, &detail_key, &detail)?;
            Ok(detail)
        })
    }

    /// Unconditionally restore an allocation and detach any deployment.
    pub fn restore_allocation(
        &self,
        project_id: &str,
        micro_frontend_id: &str,
        state: &AllocationState,
    ) -> StateResult<MicroFrontend> {
        self.modify_micro_frontend(project_id, micro_frontend_id, |mfe| {
            mfe.apply_allocation(state);
            mfe.deployment_id = None;
            Ok(())
        })
    }

    // ── Versions ───────────────────────────────────────────────────

    pub fn put_version(&self, version: &VersionRecord) -> StateResult<()> {
        let key = version.table_key();
        self.write(|txn, _| txn_put(txn, VERSIONS, &key, version).map(|_| ()))?;
        debug!(%key, "version stored");
        Ok(())
    }

    pub fn get_version(
        &self,
        micro_frontend_id: &str,
        version: &str,
    ) -> StateResult<Option<VersionRecord>> {
        self.read_one(VERSIONS, &composite_key(micro_frontend_id, version))
    }

    /// All versions of a microfrontend, deleted ones included.
    pub fn list_versions(&self, micro_frontend_id: &str) -> StateResult<Vec<VersionRecord>> {
        Ok(self.scan_prefix(VERSIONS, micro_frontend_id, None, None)?.items)
    }

    /// One page of a microfrontend's versions, in version-key order.
    pub fn list_versions_page(
        &self,
        micro_frontend_id: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> StateResult<Page<VersionRecord>> {
        self.scan_prefix(VERSIONS, micro_frontend_id, start_after, Some(limit))
    }

    // ── Deployments ────────────────────────────────────────────────

    pub fn get_deployment_detail(&self, deployment_id: &str) -> StateResult<Option<DeploymentDetail>> {
        self.read_one(DEPLOYMENTS, &composite_key(deployment_id, DETAIL_STEP_KEY))
    }

    pub fn get_deployment_state(
        &self,
        deployment_id: &str,
        index: usize,
    ) -> StateResult<Option<DeploymentStateRow>> {
        let key = composite_key(deployment_id, &DeploymentStateRow::step_key(index));
        self.read_one(DEPLOYMENTS, &key)
    }

    /// Load the detail row and every state row of a deployment.
    ///
    /// Returns `None` when the deployment has no detail row.
    pub fn get_deployment(&self, deployment_id: &str) -> StateResult<Option<DeploymentRecord>> {
        let prefix = child_prefix(deployment_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut detail = None;
        let mut states: Vec<DeploymentStateRow> = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let Some(step_key) = key.value().strip_prefix(prefix.as_str()) else {
                break;
            };
            if step_key == DETAIL_STEP_KEY {
                detail = Some(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
            } else {
                states.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
            }
        }
        // `state#10` sorts before `state#2` lexically.
        states.sort_by_key(|s| s.index);
        Ok(detail.map(|detail| DeploymentRecord { detail, states }))
    }

    /// Read-modify-write a deployment's detail row.
    pub fn modify_deployment_detail<F>(
        &self,
        deployment_id: &str,
        f: F,
    ) -> StateResult<DeploymentDetail>
    where
        F: FnOnce(&mut DeploymentDetail) -> StateResult<()>,
    {
        let key = composite_key(deployment_id, DETAIL_STEP_KEY);
        self.write(|txn, _| {
            let mut detail: DeploymentDetail = txn_get(txn, DEPLOYMENTS, &key)?
                .ok_or_else(|| StateError::NotFound(format!("deployment {deployment_id}")))?;
            f(&mut detail)?;
            txn_put(txn, DEPLOYMENTS, &key, &detail)?;
            Ok(detail)
        })
    }

    // ── Consumer views ─────────────────────────────────────────────

    pub fn get_view(
        &self,
        project_id: &str,
        micro_frontend_id: &str,
    ) -> StateResult<Option<ConsumerView>> {
        self.read_one(CONSUMER_VIEWS, &composite_key(project_id, micro_frontend_id))
    }

    /// One page of a project's consumer views, ordered by microfrontend id.
    pub fn query_views(
        &self,
        project_id: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> StateResult<Page<ConsumerView>> {
        self.scan_prefix(CONSUMER_VIEWS, project_id, start_after, Some(limit))
    }

    /// Upsert a view unless the stored row was built from a newer
    /// microfrontend revision. Returns whether the row was written.
    pub fn put_view(&self, view: &ConsumerView) -> StateResult<bool> {
        let written = self.write(|txn, _| txn_put_view(txn, view))?;
        debug!(key = %view.table_key(), revision = view.revision, written, "consumer view upsert");
        Ok(written)
    }

    pub fn delete_view(&self, project_id: &str, micro_frontend_id: &str) -> StateResult<bool> {
        let key = composite_key(project_id, micro_frontend_id);
        self.write(|txn, _| txn_remove(txn, CONSUMER_VIEWS, &key))
    }

    // ── Batches ────────────────────────────────────────────────────

    /// Apply up to [`MAX_BATCH_WRITE`] operations in one transaction.
    pub fn batch_write(&self, ops: Vec<WriteOp>) -> StateResult<BatchOutcome> {
        if ops.len() > MAX_BATCH_WRITE {
            return Err(StateError::BatchTooLarge {
                size: ops.len(),
                max: MAX_BATCH_WRITE,
            });
        }
        let size = ops.len();
        let outcome = self.write(|txn, changes| {
            let mut outcome = BatchOutcome::default();
            for op in ops {
                if apply_op(txn, op, changes)? {
                    outcome.applied += 1;
                } else {
                    outcome.skipped += 1;
                }
            }
            Ok(outcome)
        })?;
        debug!(size, applied = outcome.applied, skipped = outcome.skipped, "batch written");
        Ok(outcome)
    }

    // ── Internals ──────────────────────────────────────────────────

    /// Run `f` inside a write transaction, commit, then publish the
    /// change records it collected.
    fn write<R, F>(&self, f: F) -> StateResult<R>
    where
        F: FnOnce(&WriteTransaction, &mut Vec<ChangeRecord>) -> StateResult<R>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut changes = Vec::new();
        let result = match f(&txn, &mut changes) {
            Ok(result) => result,
            Err(e) => {
                let _ = txn.abort();
                return Err(e);
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        self.publish(changes);
        Ok(result)
    }

    fn publish(&self, changes: Vec<ChangeRecord>) {
        let Some(feed) = &self.feed else {
            return;
        };
        for change in changes {
            if feed.send(change).is_err() {
                debug!("change feed receiver dropped");
                return;
            }
        }
    }

    fn read_one<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Range-scan every `{parent}/...` key, optionally resuming after the
    /// child id `start_after` and stopping after `limit` items.
    fn scan_prefix<T: DeserializeOwned>(
        &self,
        table: JsonTable,
        parent: &str,
        start_after: Option<&str>,
        limit: Option<usize>,
    ) -> StateResult<Page<T>> {
        let prefix = child_prefix(parent);
        let start = match start_after {
            Some(after) => composite_key(parent, after),
            None => prefix.clone(),
        };
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut items: Vec<T> = Vec::new();
        let mut last_child: Option<String> = None;
        let mut next_token = None;
        for entry in table.range(start.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let Some(child) = key.value().strip_prefix(prefix.as_str()) else {
                break;
            };
            if start_after == Some(child) {
                continue;
            }
            if limit.is_some_and(|limit| items.len() >= limit) {
                next_token = last_child.take();
                break;
            }
            items.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
            last_child = Some(child.to_string());
        }
        Ok(Page { items, next_token })
    }
}

// ── Transaction helpers ────────────────────────────────────────────

fn txn_get<T: DeserializeOwned>(
    txn: &WriteTransaction,
    table: JsonTable,
    key: &str,
) -> StateResult<Option<T>> {
    let table = txn.open_table(table).map_err(map_err!(Table))?;
    let raw = table
        .get(key)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value().to_vec());
    raw.map(|bytes| serde_json::from_slice(&bytes).map_err(map_err!(Deserialize)))
        .transpose()
}

/// Returns whether the key existed before.
fn txn_put<T: Serialize>(
    txn: &WriteTransaction,
    table: JsonTable,
    key: &str,
    value: &T,
) -> StateResult<bool> {
    let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
    let mut table = txn.open_table(table).map_err(map_err!(Table))?;
    let existed = table
        .insert(key, bytes.as_slice())
        .map_err(map_err!(Write))?
        .is_some();
    Ok(existed)
}

fn txn_remove(txn: &WriteTransaction, table: JsonTable, key: &str) -> StateResult<bool> {
    let mut table = txn.open_table(table).map_err(map_err!(Table))?;
    let existed = table.remove(key).map_err(map_err!(Write))?.is_some();
    Ok(existed)
}

fn txn_put_project(
    txn: &WriteTransaction,
    project: &Project,
    changes: &mut Vec<ChangeRecord>,
) -> StateResult<()> {
    let existed = txn_put(txn, PROJECTS, &project.project_id, project)?;
    let keys = BTreeMap::from([("projectId".to_string(), project.project_id.clone())]);
    changes.push(change_record(PROJECTS, existed, keys, project)?);
    Ok(())
}

fn txn_put_micro_frontend(
    txn: &WriteTransaction,
    mut mfe: MicroFrontend,
    changes: &mut Vec<ChangeRecord>,
) -> StateResult<MicroFrontend> {
    let key = mfe.table_key();
    let previous: Option<MicroFrontend> = txn_get(txn, MICRO_FRONTENDS, &key)?;
    mfe.revision = previous.map_or(0, |p| p.revision) + 1;
    let existed = txn_put(txn, MICRO_FRONTENDS, &key, &mfe)?;
    let keys = BTreeMap::from([
        ("projectId".to_string(), mfe.project_id.clone()),
        ("microFrontendId".to_string(), mfe.micro_frontend_id.clone()),
    ]);
    changes.push(change_record(MICRO_FRONTENDS, existed, keys, &mfe)?);
    Ok(mfe)
}

fn txn_put_view(txn: &WriteTransaction, view: &ConsumerView) -> StateResult<bool> {
    let key = view.table_key();
    let existing: Option<ConsumerView> = txn_get(txn, CONSUMER_VIEWS, &key)?;
    if existing.is_some_and(|e| e.revision > view.revision) {
        return Ok(false);
    }
    txn_put(txn, CONSUMER_VIEWS, &key, view)?;
    Ok(true)
}

fn apply_op(
    txn: &WriteTransaction,
    op: WriteOp,
    changes: &mut Vec<ChangeRecord>,
) -> StateResult<bool> {
    match op {
        WriteOp::PutProject(project) => txn_put_project(txn, &project, changes).map(|_| true),
        WriteOp::PutMicroFrontend(mfe) => txn_put_micro_frontend(txn, mfe, changes).map(|_| true),
        WriteOp::PutVersion(version) => {
            txn_put(txn, VERSIONS, &version.table_key(), &version).map(|_| true)
        }
        WriteOp::PutDeploymentDetail(detail) => {
            txn_put(txn, DEPLOYMENTS, &detail.table_key(), &detail).map(|_| true)
        }
        WriteOp::PutDeploymentState(row) => {
            txn_put(txn, DEPLOYMENTS, &row.table_key(), &row).map(|_| true)
        }
        WriteOp::PutView(view) => txn_put_view(txn, &view),
        WriteOp::DeleteView {
            project_id,
            micro_frontend_id,
        } => txn_remove(txn, CONSUMER_VIEWS, &composite_key(&project_id, &micro_frontend_id)),
    }
}

fn change_record<T: Serialize>(
    table: JsonTable,
    existed: bool,
    keys: BTreeMap<String, String>,
    image: &T,
) -> StateResult<ChangeRecord> {
    Ok(ChangeRecord {
        source: table.name().to_string(),
        event_name: if existed {
            EventName::Modify
        } else {
            EventName::Insert
        },
        keys,
        new_image: Some(serde_json::to_value(image).map_err(map_err!(Serialize))?),
    })
}
