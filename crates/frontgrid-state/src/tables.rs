//! redb table definitions for the FrontGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Composite keys follow the pattern `{parent_id}/{child_id}` so that every
//! child of a parent is reachable with a single prefix range scan.

use redb::TableDefinition;

/// Shape shared by every table in the store.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Table name carried as `source` on project change records.
pub const PROJECTS_TABLE: &str = "projects";

/// Table name carried as `source` on microfrontend change records.
pub const MICRO_FRONTENDS_TABLE: &str = "micro_frontends";

/// Projects keyed by `{project_id}`.
pub const PROJECTS: JsonTable = TableDefinition::new(PROJECTS_TABLE);

/// Microfrontends keyed by `{project_id}/{micro_frontend_id}`.
pub const MICRO_FRONTENDS: JsonTable = TableDefinition::new(MICRO_FRONTENDS_TABLE);

/// Version records keyed by `{micro_frontend_id}/{version}`.
pub const VERSIONS: JsonTable = TableDefinition::new("versions");

/// Deployment rows keyed by `{deployment_id}/{step_key}`, where the step key
/// is `detail` or `state#N`.
pub const DEPLOYMENTS: JsonTable = TableDefinition::new("deployments");

/// Consumer views keyed by `{project_id}/{micro_frontend_id}`.
pub const CONSUMER_VIEWS: JsonTable = TableDefinition::new("consumer_views");

/// Build a composite `{parent}/{child}` key.
pub fn composite_key(parent: &str, child: &str) -> String {
    format!("{parent}/{child}")
}

/// Prefix matching every child of `parent`.
pub fn child_prefix(parent: &str) -> String {
    format!("{parent}/")
}
