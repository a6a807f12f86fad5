use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    routing::{get, post},
};
use axum_valid::Valid;
use futures::Stream;
use tracing::info;

use crate::{
    dto::{
        session::{JoinRequest, SelectRequest, SessionView},
        validation::validate_passcode_length,
    },
    error::AppError,
    services::{session_service, sse_service},
    state::SharedState,
};

/// Participant session endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/session", post(join))
        .route("/session/{team_id}", get(current_view).delete(leave))
        .route("/session/{team_id}/select", post(select_option))
        .route("/session/{team_id}/retry", post(retry))
        .route("/session/{team_id}/events", get(events))
}

/// Authenticate a team from its join link and passcode and start its session.
#[utoipa::path(
    post,
    path = "/session",
    tag = "session",
    request_body = JoinRequest,
    responses(
        (status = 200, description = "Team verified; current view", body = SessionView),
        (status = 400, description = "Missing team link or malformed passcode"),
        (status = 401, description = "Incorrect passcode"),
        (status = 404, description = "Unknown team"),
        (status = 503, description = "Store unavailable")
    )
)]
pub async fn join(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<JoinRequest>>,
) -> Result<Json<SessionView>, AppError> {
    validate_passcode_length(&payload.passcode, state.config().passcode_length())
        .map_err(|err| AppError::BadRequest(err.to_string()))?;
    let view = session_service::open_session(&state, payload.team, payload.passcode).await?;
    Ok(Json(view))
}

/// Latest view of a running session.
#[utoipa::path(
    get,
    path = "/session/{team_id}",
    tag = "session",
    params(("team_id" = String, Path, description = "Team identifier")),
    responses(
        (status = 200, description = "Current view", body = SessionView),
        (status = 404, description = "No running session for this team")
    )
)]
pub async fn current_view(
    State(state): State<SharedState>,
    Path(team_id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(session_service::current_view(&state, &team_id)?))
}

/// Pick an option for the active question; picking again replaces it.
#[utoipa::path(
    post,
    path = "/session/{team_id}/select",
    tag = "session",
    params(("team_id" = String, Path, description = "Team identifier")),
    request_body = SelectRequest,
    responses(
        (status = 200, description = "Selection recorded", body = SessionView),
        (status = 409, description = "No question open, time is up or unknown option"),
        (status = 503, description = "Selection could not be stored; retry")
    )
)]
pub async fn select_option(
    State(state): State<SharedState>,
    Path(team_id): Path<String>,
    Valid(Json(payload)): Valid<Json<SelectRequest>>,
) -> Result<Json<SessionView>, AppError> {
    let view = session_service::select_option(&state, &team_id, payload.option).await?;
    Ok(Json(view))
}

/// Re-read the store and flush writes that failed earlier.
#[utoipa::path(
    post,
    path = "/session/{team_id}/retry",
    tag = "session",
    params(("team_id" = String, Path, description = "Team identifier")),
    responses(
        (status = 200, description = "Session back in sync", body = SessionView),
        (status = 503, description = "Store still unavailable")
    )
)]
pub async fn retry(
    State(state): State<SharedState>,
    Path(team_id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(session_service::retry(&state, &team_id).await?))
}

/// Stop a session.
#[utoipa::path(
    delete,
    path = "/session/{team_id}",
    tag = "session",
    params(("team_id" = String, Path, description = "Team identifier")),
    responses(
        (status = 204, description = "Session stopped"),
        (status = 404, description = "No running session for this team")
    )
)]
pub async fn leave(
    State(state): State<SharedState>,
    Path(team_id): Path<String>,
) -> Result<StatusCode, AppError> {
    session_service::close_session(&state, &team_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stream every view the session publishes.
#[utoipa::path(
    get,
    path = "/session/{team_id}/events",
    tag = "sse",
    params(("team_id" = String, Path, description = "Team identifier")),
    responses(
        (status = 200, description = "Session view stream", content_type = "text/event-stream", body = String),
        (status = 404, description = "No running session for this team")
    )
)]
pub async fn events(
    State(state): State<SharedState>,
    Path(team_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (receiver, handshake) = sse_service::subscribe_session(&state, &team_id)?;
    info!(team_id, "new session SSE connection");
    Ok(sse_service::to_sse_stream(receiver, handshake))
}
