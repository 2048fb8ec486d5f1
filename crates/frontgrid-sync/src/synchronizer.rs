//! View synchronizer: materializes consumer views from change events.

use std::collections::BTreeSet;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use frontgrid_state::{
    BatchOutcome, ChangeReceiver, ChangeRecord, ConsumerView, DeleteMode, MicroFrontend, Project,
    StateStore, ViewDeployment, ViewVersion, WriteOp, chunk_ops,
};

use crate::error::{SyncError, SyncResult};
use crate::event::ChangeEvent;

/// Tombstone lifetime added on top of the expiry inherited from a
/// deleted parent.
const CASCADE_EXPIRY_GRACE_SECS: u64 = 3600;

/// Records pulled off the feed per delivery batch.
const DELIVERY_BATCH: usize = 100;

/// Views read per page while walking a project.
const VIEW_PAGE_SIZE: usize = 100;

/// Result of handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Applied,
    Skipped,
}

/// Per-batch tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct ViewSynchronizer {
    store: StateStore,
}

impl ViewSynchronizer {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Process one delivery batch. Failures are logged per record and do
    /// not stop the remaining records.
    pub fn process_batch(&self, records: &[ChangeRecord]) -> SyncReport {
        let mut report = SyncReport::default();
        for record in records {
            match self.process_record(record) {
                Ok(Handled::Applied) => report.applied += 1,
                Ok(Handled::Skipped) => report.skipped += 1,
                Err(e) => {
                    error!(
                        source = %record.source,
                        event = ?record.event_name,
                        keys = ?record.keys,
                        error = %e,
                        "failed to process change record"
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }

    pub fn process_record(&self, record: &ChangeRecord) -> SyncResult<Handled> {
        let event = ChangeEvent::parse(record)?;
        self.handle(event)
    }

    pub fn handle(&self, event: ChangeEvent) -> SyncResult<Handled> {
        match event {
            ChangeEvent::ProjectUpdated { project_id, name } => {
                self.update_project(&project_id, &name)
            }
            ChangeEvent::ProjectDeleted {
                project_id,
                expires_at,
            } => self.delete_project(&project_id, expires_at),
            ChangeEvent::MicroFrontendUpdated(mfe) => {
                if mfe.active_versions.is_empty() {
                    debug!(project_id = %mfe.project_id, micro_frontend_id = %mfe.micro_frontend_id, "no active versions, view left as is");
                    return Ok(Handled::Skipped);
                }
                self.update_micro_frontend(&mfe.project_id, &mfe.micro_frontend_id)
            }
            ChangeEvent::MicroFrontendDeleted {
                project_id,
                micro_frontend_id,
                expires_at,
            } => self.delete_micro_frontend(&project_id, &micro_frontend_id, expires_at),
            ChangeEvent::MicroFrontendCascaded {
                project_id,
                micro_frontend_id,
            } => {
                debug!(%project_id, %micro_frontend_id, "cascade-deleted microfrontend, skipping");
                Ok(Handled::Skipped)
            }
            ChangeEvent::Unhandled { source, event_name } => {
                warn!(%source, event = ?event_name, "unhandled change record");
                Ok(Handled::Skipped)
            }
        }
    }

    /// Drain the change feed until it closes or `shutdown` fires.
    pub async fn run(self, mut changes: ChangeReceiver, mut shutdown: watch::Receiver<bool>) {
        info!("view synchronizer started");
        let mut batch = Vec::with_capacity(DELIVERY_BATCH);
        loop {
            tokio::select! {
                received = changes.recv_many(&mut batch, DELIVERY_BATCH) => {
                    if received == 0 {
                        info!("change feed closed");
                        break;
                    }
                    let report = self.process_batch(&batch);
                    debug!(
                        records = received,
                        applied = report.applied,
                        skipped = report.skipped,
                        failed = report.failed,
                        "change batch processed"
                    );
                    batch.clear();
                }
                _ = shutdown.changed() => {
                    let pending = drain_pending(&mut changes);
                    if !pending.is_empty() {
                        let report = self.process_batch(&pending);
                        info!(
                            records = pending.len(),
                            applied = report.applied,
                            failed = report.failed,
                            "pending changes processed before shutdown"
                        );
                    }
                    debug!("view synchronizer shutting down");
                    break;
                }
            }
        }
    }

    /// Rebuild the view table from the project and microfrontend rows.
    ///
    /// The change feed is in memory, so records queued when the process
    /// stopped are gone. Running this before following the feed restores
    /// every view those records would have produced, and finishes any
    /// deletion cascade that was cut short.
    pub fn reconcile(&self) -> SyncResult<SyncReport> {
        let mut report = SyncReport::default();
        let mut start_after: Option<String> = None;
        loop {
            let page = self.store.list_projects(start_after.as_deref(), VIEW_PAGE_SIZE)?;
            for project in &page.items {
                if let Err(e) = self.reconcile_project(project, &mut report) {
                    error!(project_id = %project.project_id, error = %e, "failed to reconcile project");
                    report.failed += 1;
                }
            }
            match page.next_token {
                Some(token) => start_after = Some(token),
                None => break,
            }
        }
        info!(
            applied = report.applied,
            skipped = report.skipped,
            failed = report.failed,
            "consumer views reconciled"
        );
        Ok(report)
    }

    fn reconcile_project(&self, project: &Project, report: &mut SyncReport) -> SyncResult<()> {
        let project_id = project.project_id.as_str();
        let frontends = self.store.list_micro_frontends(project_id)?;

        if project.deleted {
            if frontends.iter().any(|mfe| !mfe.deleted) {
                self.delete_project(project_id, project.expires_at.unwrap_or_default())?;
                report.applied += 1;
                return Ok(());
            }
            let removed = self.remove_views(project_id, &BTreeSet::new())?;
            report.applied += removed;
            return Ok(());
        }

        let mut live = BTreeSet::new();
        for mfe in &frontends {
            if !mfe.deleted {
                live.insert(mfe.micro_frontend_id.clone());
            }
            match self.reconcile_micro_frontend(mfe) {
                Ok(Handled::Applied) => report.applied += 1,
                Ok(Handled::Skipped) => report.skipped += 1,
                Err(e) => {
                    error!(
                        %project_id,
                        micro_frontend_id = %mfe.micro_frontend_id,
                        error = %e,
                        "failed to reconcile microfrontend"
                    );
                    report.failed += 1;
                }
            }
        }
        report.applied += self.remove_views(project_id, &live)?;
        Ok(())
    }

    fn reconcile_micro_frontend(&self, mfe: &MicroFrontend) -> SyncResult<Handled> {
        let (project_id, micro_frontend_id) = (&mfe.project_id, &mfe.micro_frontend_id);
        if !mfe.deleted {
            if mfe.active_versions.is_empty() {
                return Ok(Handled::Skipped);
            }
            return self.update_micro_frontend(project_id, micro_frontend_id);
        }

        let pending_versions = self
            .store
            .list_versions(micro_frontend_id)?
            .iter()
            .any(|v| !v.deleted);
        if mfe.delete_mode != Some(DeleteMode::Project) && pending_versions {
            return self.delete_micro_frontend(
                project_id,
                micro_frontend_id,
                mfe.expires_at.unwrap_or_default(),
            );
        }
        // Views of deleted microfrontends are removed with the stale views.
        Ok(Handled::Skipped)
    }

    /// Delete every view of `project_id` whose microfrontend is not in
    /// `live`. Returns the number removed.
    fn remove_views(&self, project_id: &str, live: &BTreeSet<String>) -> SyncResult<usize> {
        let deletes: Vec<WriteOp> = self
            .all_views(project_id)?
            .into_iter()
            .filter(|view| !live.contains(&view.micro_frontend_id))
            .map(|view| WriteOp::DeleteView {
                project_id: view.project_id,
                micro_frontend_id: view.micro_frontend_id,
            })
            .collect();
        if deletes.is_empty() {
            return Ok(0);
        }
        let outcome = self.write_chunked(deletes)?;
        debug!(%project_id, views = outcome.applied, "stale consumer views removed");
        Ok(outcome.applied)
    }

    fn update_project(&self, project_id: &str, name: &str) -> SyncResult<Handled> {
        let views = self.all_views(project_id)?;
        if views.is_empty() {
            return Ok(Handled::Skipped);
        }
        let ops = views
            .into_iter()
            .map(|mut view| {
                view.project_name = name.to_string();
                WriteOp::PutView(view)
            })
            .collect();
        let outcome = self.write_chunked(ops)?;
        info!(%project_id, %name, views = outcome.applied, "project name propagated");
        Ok(Handled::Applied)
    }

    fn delete_project(&self, project_id: &str, expires_at: u64) -> SyncResult<Handled> {
        let expiry = expires_at.saturating_add(CASCADE_EXPIRY_GRACE_SECS);

        let deletes = self
            .all_views(project_id)?
            .into_iter()
            .map(|view| WriteOp::DeleteView {
                project_id: view.project_id,
                micro_frontend_id: view.micro_frontend_id,
            })
            .collect();
        let removed = self.write_chunked(deletes)?;

        let frontends = self.store.list_micro_frontends(project_id)?;
        let tombstones = frontends
            .iter()
            .cloned()
            .map(|mut mfe| {
                mfe.deleted = true;
                mfe.expires_at = Some(expiry);
                mfe.delete_mode = Some(DeleteMode::Project);
                WriteOp::PutMicroFrontend(mfe)
            })
            .collect();
        self.write_chunked(tombstones)?;

        let version_expiry = expiry.saturating_add(CASCADE_EXPIRY_GRACE_SECS);
        let mut versions = 0;
        for mfe in &frontends {
            versions += self.mark_versions_deleted(&mfe.micro_frontend_id, version_expiry, DeleteMode::Project)?;
        }

        info!(
            %project_id,
            views = removed.applied,
            micro_frontends = frontends.len(),
            versions,
            "project deletion cascaded"
        );
        Ok(Handled::Applied)
    }

    fn update_micro_frontend(&self, project_id: &str, micro_frontend_id: &str) -> SyncResult<Handled> {
        let Some(view) = self.generate_view(project_id, micro_frontend_id)? else {
            return Ok(Handled::Skipped);
        };
        if self.store.put_view(&view)? {
            debug!(%project_id, %micro_frontend_id, revision = view.revision, "consumer view updated");
            Ok(Handled::Applied)
        } else {
            debug!(%project_id, %micro_frontend_id, revision = view.revision, "stale consumer view discarded");
            Ok(Handled::Skipped)
        }
    }

    fn delete_micro_frontend(
        &self,
        project_id: &str,
        micro_frontend_id: &str,
        expires_at: u64,
    ) -> SyncResult<Handled> {
        let removed = self.store.delete_view(project_id, micro_frontend_id)?;
        let expiry = expires_at.saturating_add(CASCADE_EXPIRY_GRACE_SECS);
        let versions = self.mark_versions_deleted(micro_frontend_id, expiry, DeleteMode::Mfe)?;
        info!(%project_id, %micro_frontend_id, view_removed = removed, versions, "microfrontend deletion cascaded");
        Ok(Handled::Applied)
    }

    /// Build the view row for a microfrontend from its current state.
    ///
    /// Returns `None` when the microfrontend is gone, deleted or has no
    /// active versions by the time it is read.
    pub fn generate_view(
        &self,
        project_id: &str,
        micro_frontend_id: &str,
    ) -> SyncResult<Option<ConsumerView>> {
        let project = self
            .store
            .get_project(project_id)?
            .ok_or_else(|| SyncError::NotFound(format!("project {project_id}")))?;
        let Some(mfe) = self.store.get_micro_frontend(project_id, micro_frontend_id)? else {
            return Ok(None);
        };
        if mfe.deleted || mfe.active_versions.is_empty() {
            return Ok(None);
        }

        let mut versions = Vec::with_capacity(mfe.active_versions.len());
        for allocation in &mfe.active_versions {
            let record = self
                .store
                .get_version(micro_frontend_id, &allocation.version)?
                .ok_or_else(|| {
                    SyncError::NotFound(format!("version {micro_frontend_id}/{}", allocation.version))
                })?;
            versions.push(ViewVersion {
                payload: record.data,
                deployment: ViewDeployment {
                    traffic: allocation.traffic,
                    default: mfe.default.as_deref() == Some(allocation.version.as_str()),
                },
            });
        }

        Ok(Some(ConsumerView {
            project_id: project_id.to_string(),
            micro_frontend_id: micro_frontend_id.to_string(),
            project_name: project.name,
            mfe_name: mfe.name,
            versions,
            revision: mfe.revision,
        }))
    }

    fn all_views(&self, project_id: &str) -> SyncResult<Vec<ConsumerView>> {
        let mut views = Vec::new();
        let mut start_after: Option<String> = None;
        loop {
            let page = self
                .store
                .query_views(project_id, start_after.as_deref(), VIEW_PAGE_SIZE)?;
            views.extend(page.items);
            match page.next_token {
                Some(token) => start_after = Some(token),
                None => break,
            }
        }
        Ok(views)
    }

    fn mark_versions_deleted(
        &self,
        micro_frontend_id: &str,
        expires_at: u64,
        mode: DeleteMode,
    ) -> SyncResult<usize> {
        let ops = self
            .store
            .list_versions(micro_frontend_id)?
            .into_iter()
            .map(|mut version| {
                version.deleted = true;
                version.expires_at = Some(expires_at);
                version.delete_mode = Some(mode);
                WriteOp::PutVersion(version)
            })
            .collect();
        Ok(self.write_chunked(ops)?.applied)
    }

    fn write_chunked(&self, ops: Vec<WriteOp>) -> SyncResult<BatchOutcome> {
        let mut total = BatchOutcome::default();
        for chunk in chunk_ops(ops) {
            let outcome = self.store.batch_write(chunk)?;
            total.applied += outcome.applied;
            total.skipped += outcome.skipped;
        }
        Ok(total)
    }
}

/// Records already queued on the feed, without waiting for more.
fn drain_pending(changes: &mut ChangeReceiver) -> Vec<ChangeRecord> {
    let mut pending = Vec::new();
    while let Ok(record) = changes.try_recv() {
        pending.push(record);
    }
    pending
}
