//! frontgrid-state — embedded state store for FrontGrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state management for projects, microfrontends, versions, deployments and
//! the consumer-facing view.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{project_id}/{micro_frontend_id}`,
//! `{deployment_id}/state#N`) enable prefix range scans for related records.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. Writes to projects and
//! microfrontends are published on an optional change feed.

pub mod batch;
pub mod change;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use batch::{BatchOutcome, MAX_BATCH_WRITE, WriteOp, chunk_ops};
pub use change::{ChangeReceiver, ChangeRecord, ChangeSender, EventName, change_feed};
pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
