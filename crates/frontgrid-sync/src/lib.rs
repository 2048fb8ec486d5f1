//! FrontGrid view synchronizer.
//!
//! Consumes the state store's change feed and keeps the consumer view
//! table in step with projects and microfrontends: renames propagate,
//! allocation changes rebuild the affected view row, and soft-deletes
//! cascade down to microfrontends and versions.
//!
//! Every handler is idempotent, so redelivered records converge to the
//! same end state. A record that fails is logged and skipped without
//! affecting the rest of its batch. Since the feed does not survive a
//! restart, [`ViewSynchronizer::reconcile`] rebuilds the view table from
//! the source rows before the feed is followed.

pub mod error;
pub mod event;
pub mod synchronizer;

pub use error::{SyncError, SyncResult};
pub use event::ChangeEvent;
pub use synchronizer::{Handled, SyncReport, ViewSynchronizer};
