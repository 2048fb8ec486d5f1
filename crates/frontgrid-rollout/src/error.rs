use frontgrid_state::StateError;
use thiserror::Error;

use crate::strategy::StrategyError;

/// A precondition on the current state of a microfrontend or deployment
/// was not met. Surfaced to API callers as 422.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidState {
    #[error("the total traffic for activeVersions should equal 100, got {0}")]
    TrafficSum(u64),

    #[error("traffic for version {version} must be between 0 and 100, got {traffic}")]
    TrafficShareOutOfRange { version: String, traffic: u32 },

    #[error("default version {0} is not one of the active versions")]
    DefaultNotActive(String),

    #[error("there is an existing automated deployment")]
    DeploymentInProgress,

    #[error("no existing version is receiving 100% of traffic")]
    NoStableVersion,

    #[error("version {0} is already receiving all traffic")]
    TargetAlreadyActive(String),

    #[error("version {0} does not exist")]
    UnknownTargetVersion(String),

    #[error("unable to deploy a new version while traffic is split between versions")]
    SplitAllocation,

    #[error("deployment {0} has already finished")]
    DeploymentFinished(String),

    #[error("invalid deployment strategy: {0}")]
    Strategy(#[from] StrategyError),
}

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidState(#[from] InvalidState),

    #[error("executor error: {0}")]
    Executor(String),

    #[error("state store error: {0}")]
    State(StateError),
}

impl From<StateError> for RolloutError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(what) => RolloutError::NotFound(what),
            other => RolloutError::State(other),
        }
    }
}

impl From<StrategyError> for RolloutError {
    fn from(err: StrategyError) -> Self {
        RolloutError::InvalidState(InvalidState::Strategy(err))
    }
}

pub type RolloutResult<T> = Result<T, RolloutError>;
