use frontgrid_state::StateError;
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("change record is missing key {0}")]
    MissingKey(&'static str),

    #[error("change record has no new image")]
    MissingImage,

    #[error("change record image is missing {0}")]
    MissingField(&'static str),

    #[error("malformed change record image: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}
