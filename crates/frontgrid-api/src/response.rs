//! Response envelope and error mapping shared by the admin handlers.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use frontgrid_rollout::{InvalidState, RolloutError};
use frontgrid_state::StateError;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
pub(crate) struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// Handler failure, rendered through [`error_response`].
#[derive(Debug)]
pub(crate) enum ApiError {
    /// 404
    NotFound(String),
    /// 422
    InvalidState(String),
    /// 500
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(msg) => error_response(&msg, StatusCode::NOT_FOUND).into_response(),
            ApiError::InvalidState(msg) => {
                error_response(&msg, StatusCode::UNPROCESSABLE_ENTITY).into_response()
            }
            ApiError::Internal(msg) => {
                error_response(&msg, StatusCode::INTERNAL_SERVER_ERROR).into_response()
            }
        }
    }
}

impl From<StateError> for ApiError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<InvalidState> for ApiError {
    fn from(err: InvalidState) -> Self {
        ApiError::InvalidState(err.to_string())
    }
}

impl From<RolloutError> for ApiError {
    fn from(err: RolloutError) -> Self {
        match err {
            RolloutError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            RolloutError::InvalidState(state) => state.into(),
            RolloutError::State(e) => e.into(),
            RolloutError::Executor(msg) => ApiError::Internal(msg),
        }
    }
}

pub(crate) type ApiResult = Result<Response, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollout_errors_map_to_status_codes() {
        let cases = [
            (RolloutError::NotFound("deployment d1".into()), StatusCode::NOT_FOUND),
            (
                RolloutError::InvalidState(InvalidState::DeploymentInProgress),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                RolloutError::State(StateError::Write("disk full".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (RolloutError::Executor("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn state_not_found_is_404() {
        let err = ApiError::from(StateError::NotFound("project p1".into()));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
