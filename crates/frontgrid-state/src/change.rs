//! Change feed: per-record mutation events emitted after each commit.
//!
//! Records are deliberately loosely typed (table name, key map, JSON image)
//! so that consumers parse them once at their own boundary. Delivery is
//! in commit order on a single in-memory channel and is not durable:
//! records still queued when the process exits are dropped. Consumers
//! that derive state from the feed rebuild it from the tables at startup.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventName {
    Insert,
    Modify,
    Remove,
}

/// A single mutation of a Project or MicroFrontend row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Name of the source table (`projects`, `micro_frontends`).
    pub source: String,
    pub event_name: EventName,
    /// Key attributes of the changed row, e.g. `projectId`.
    pub keys: BTreeMap<String, String>,
    /// Row contents after the change; absent for removals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_image: Option<serde_json::Value>,
}

pub type ChangeSender = mpsc::UnboundedSender<ChangeRecord>;
pub type ChangeReceiver = mpsc::UnboundedReceiver<ChangeRecord>;

/// Create a connected sender/receiver pair for a store's change feed.
pub fn change_feed() -> (ChangeSender, ChangeReceiver) {
    mpsc::unbounded_channel()
}
