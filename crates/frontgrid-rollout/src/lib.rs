//! FrontGrid progressive delivery: strategies, planning, orchestration.
//!
//! This crate turns a request to move a microfrontend onto a new version
//! into a precomputed sequence of traffic splits, persists that sequence
//! and drives it forward one step at a time.
//!
//! # Components
//!
//! - **`strategy`**: Rollout strategy configuration and named presets
//! - **`planner`**: Pure computation of the ordered allocation states
//! - **`allocation`**: Validation of operator-supplied allocations
//! - **`executor`**: Step executor seam and the in-process implementation
//! - **`orchestrator`**: Create and cancel deployments

pub mod allocation;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod planner;
pub mod strategy;

pub use allocation::validate_allocation;
pub use error::{InvalidState, RolloutError, RolloutResult};
pub use executor::{ExecutionInput, ExecutorError, LocalRolloutExecutor, RolloutExecutor};
pub use orchestrator::{CANCEL_CAUSE, DeploymentOrchestrator};
pub use planner::plan;
pub use strategy::{Increment, NamedStrategy, RolloutStrategy, StrategyError};
