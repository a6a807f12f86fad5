use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::{content::ContentError, storage::StorageError},
    state::PlanError,
};

/// Credential failures. Shown inline and never retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The join link carried no team id.
    #[error("Invalid team link")]
    MissingLink,
    /// No record exists for the team id.
    #[error("Invalid team")]
    TeamNotFound,
    /// The passcode does not match the stored one.
    #[error("Incorrect passcode")]
    WrongPasscode,
}

/// Reasons a selection is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// No question is open for answering.
    #[error("no question is open for answering")]
    NotAnswering,
    /// The timer of the active question reached zero.
    #[error("time is up for this question")]
    TimeExpired,
    /// The option is not part of the active question.
    #[error("`{0}` is not an option of the active question")]
    UnknownOption(String),
}

/// Errors surfaced by a participant session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Authentication failed.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// The store could not be read or written; the session can retry.
    #[error("unable to sync with the store, retry")]
    StoreUnavailable(#[from] StorageError),
    /// Neither the level content nor the default set could be loaded.
    #[error("quiz content unavailable")]
    ContentUnavailable(#[from] ContentError),
    /// Selection refused.
    #[error(transparent)]
    Selection(#[from] SelectionError),
    /// Phase transition refused by the session state machine.
    #[error("invalid session transition")]
    Transition(PlanError),
    /// The session task has stopped.
    #[error("session closed")]
    Closed,
}

impl From<PlanError> for SessionError {
    fn from(err: PlanError) -> Self {
        SessionError::Transition(err)
    }
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<SessionError> for ServiceError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Auth(auth) => match auth {
                AuthError::MissingLink => ServiceError::InvalidInput(auth.to_string()),
                AuthError::TeamNotFound => ServiceError::NotFound(auth.to_string()),
                AuthError::WrongPasscode => ServiceError::Unauthorized(auth.to_string()),
            },
            SessionError::StoreUnavailable(source) => ServiceError::Unavailable(source),
            SessionError::ContentUnavailable(source) => {
                ServiceError::InvalidState(format!("quiz content unavailable: {source}"))
            }
            SessionError::Selection(selection) => ServiceError::InvalidState(selection.to_string()),
            SessionError::Transition(PlanError::AlreadyPending) => {
                ServiceError::InvalidState("session transition already pending".into())
            }
            SessionError::Transition(PlanError::InvalidTransition(invalid)) => {
                ServiceError::InvalidState(invalid.to_string())
            }
            SessionError::Closed => ServiceError::NotFound("session closed".into()),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        ServiceError::from(err).into()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
