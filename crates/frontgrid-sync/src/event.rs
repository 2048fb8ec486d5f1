//! Typed change events parsed from raw feed records.

use frontgrid_state::tables::{MICRO_FRONTENDS_TABLE, PROJECTS_TABLE};
use frontgrid_state::{ChangeRecord, DeleteMode, EventName, MicroFrontend, Project};

use crate::error::{SyncError, SyncResult};

/// What a change record means for the consumer view.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A live project was created or changed.
    ProjectUpdated { project_id: String, name: String },
    /// A project was soft-deleted.
    ProjectDeleted { project_id: String, expires_at: u64 },
    /// A live microfrontend was created or changed.
    MicroFrontendUpdated(MicroFrontend),
    /// A microfrontend was soft-deleted on its own.
    MicroFrontendDeleted {
        project_id: String,
        micro_frontend_id: String,
        expires_at: u64,
    },
    /// A microfrontend tombstoned by its project's cascade.
    MicroFrontendCascaded {
        project_id: String,
        micro_frontend_id: String,
    },
    /// Anything else (removals, other tables).
    Unhandled { source: String, event_name: EventName },
}

impl ChangeEvent {
    pub fn parse(record: &ChangeRecord) -> SyncResult<Self> {
        let upsert = matches!(record.event_name, EventName::Insert | EventName::Modify);
        if !upsert {
            return Ok(Self::unhandled(record));
        }

        if record.source == PROJECTS_TABLE {
            let project_id = key(record, "projectId")?;
            let project: Project = image(record)?;
            if project.deleted {
                let expires_at = project.expires_at.ok_or(SyncError::MissingField("expiresAt"))?;
                Ok(Self::ProjectDeleted {
                    project_id,
                    expires_at,
                })
            } else {
                Ok(Self::ProjectUpdated {
                    project_id,
                    name: project.name,
                })
            }
        } else if record.source == MICRO_FRONTENDS_TABLE {
            let project_id = key(record, "projectId")?;
            let micro_frontend_id = key(record, "microFrontendId")?;
            let mut mfe: MicroFrontend = image(record)?;
            if mfe.delete_mode == Some(DeleteMode::Project) {
                return Ok(Self::MicroFrontendCascaded {
                    project_id,
                    micro_frontend_id,
                });
            }
            if mfe.deleted {
                let expires_at = mfe.expires_at.ok_or(SyncError::MissingField("expiresAt"))?;
                return Ok(Self::MicroFrontendDeleted {
                    project_id,
                    micro_frontend_id,
                    expires_at,
                });
            }
            // Keys are authoritative over the image.
            mfe.project_id = project_id;
            mfe.micro_frontend_id = micro_frontend_id;
            Ok(Self::MicroFrontendUpdated(mfe))
        } else {
            Ok(Self::unhandled(record))
        }
    }

    fn unhandled(record: &ChangeRecord) -> Self {
        Self::Unhandled {
            source: record.source.clone(),
            event_name: record.event_name,
        }
    }
}

fn key(record: &ChangeRecord, name: &'static str) -> SyncResult<String> {
    record.keys.get(name).cloned().ok_or(SyncError::MissingKey(name))
}

fn image<T: serde::de::DeserializeOwned>(record: &ChangeRecord) -> SyncResult<T> {
    let image = record.new_image.clone().ok_or(SyncError::MissingImage)?;
    Ok(serde_json::from_value(image)?)
}
