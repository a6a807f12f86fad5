use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
};
use axum_valid::Valid;

use crate::{
    dto::admin::{
        ActionResponse, CreateTeamRequest, PublishQuestionRequest, RoundView, StartQuizRequest,
        TeamStatusRequest, WaitingRoomRequest,
    },
    error::AppError,
    services::admin_service,
    state::SharedState,
};

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Admin-only endpoints driving the round and team status.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/admin/round", get(current_round))
        .route("/admin/round/waiting-room", post(set_waiting_room))
        .route("/admin/round/start", post(start_quiz))
        .route("/admin/round/end", post(end_quiz))
        .route("/admin/round/question", post(publish_question))
        .route("/admin/round/expire", post(expire_question))
        .route("/admin/teams", post(create_team))
        .route("/admin/teams/{team_id}", put(set_team_status))
        .route_layer(middleware::from_fn_with_state(state, require_admin_token))
}

/// Read the round document.
#[utoipa::path(
    get,
    path = "/admin/round",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Configured admin token")),
    responses((status = 200, description = "Current round state", body = RoundView))
)]
pub async fn current_round(State(state): State<SharedState>) -> Result<Json<RoundView>, AppError> {
    Ok(Json(admin_service::round(&state).await?.into()))
}

/// Open or close the waiting room.
#[utoipa::path(
    post,
    path = "/admin/round/waiting-room",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Configured admin token")),
    request_body = WaitingRoomRequest,
    responses((status = 200, description = "Waiting room updated", body = ActionResponse))
)]
pub async fn set_waiting_room(
    State(state): State<SharedState>,
    Json(payload): Json<WaitingRoomRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(admin_service::set_waiting_room(&state, payload.open).await?))
}

/// Start the quiz at a level.
#[utoipa::path(
    post,
    path = "/admin/round/start",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Configured admin token")),
    request_body = StartQuizRequest,
    responses((status = 200, description = "Quiz started", body = ActionResponse))
)]
pub async fn start_quiz(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<StartQuizRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(admin_service::start_quiz(&state, payload.level).await?))
}

/// Stop the quiz.
#[utoipa::path(
    post,
    path = "/admin/round/end",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Configured admin token")),
    responses((status = 200, description = "Quiz ended", body = ActionResponse))
)]
pub async fn end_quiz(State(state): State<SharedState>) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(admin_service::end_quiz(&state).await?))
}

/// Open a question for every team.
#[utoipa::path(
    post,
    path = "/admin/round/question",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Configured admin token")),
    request_body = PublishQuestionRequest,
    responses(
        (status = 200, description = "Question published", body = ActionResponse),
        (status = 409, description = "Quiz not running")
    )
)]
pub async fn publish_question(
    State(state): State<SharedState>,
    Json(payload): Json<PublishQuestionRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(admin_service::publish_question(&state, payload.index).await?))
}

/// Push a zero countdown, ending the open question early.
#[utoipa::path(
    post,
    path = "/admin/round/expire",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Configured admin token")),
    responses((status = 200, description = "Question expired", body = ActionResponse))
)]
pub async fn expire_question(
    State(state): State<SharedState>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(admin_service::expire_question(&state).await?))
}

/// Register a team.
#[utoipa::path(
    post,
    path = "/admin/teams",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Configured admin token")),
    request_body = CreateTeamRequest,
    responses(
        (status = 200, description = "Team created", body = ActionResponse),
        (status = 409, description = "Team already exists")
    )
)]
pub async fn create_team(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateTeamRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(admin_service::create_team(&state, payload).await?))
}

/// Qualify a team or move it to another level.
#[utoipa::path(
    put,
    path = "/admin/teams/{team_id}",
    tag = "admin",
    params(
        ("X-Admin-Token" = String, Header, description = "Configured admin token"),
        ("team_id" = String, Path, description = "Team identifier")
    ),
    request_body = TeamStatusRequest,
    responses(
        (status = 200, description = "Team updated", body = ActionResponse),
        (status = 404, description = "Unknown team")
    )
)]
pub async fn set_team_status(
    State(state): State<SharedState>,
    Path(team_id): Path<String>,
    Valid(Json(payload)): Valid<Json<TeamStatusRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(
        admin_service::set_team_status(&state, &team_id, payload).await?,
    ))
}

async fn require_admin_token(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .ok_or_else(|| {
            AppError::Unauthorized("missing admin token header `X-Admin-Token`".into())
        })?;

    match state.config().admin_token() {
        Some(token) if token == provided.as_str() => Ok(next.run(req).await),
        Some(_) => Err(AppError::Unauthorized("invalid admin token".into())),
        None => Err(AppError::Unauthorized("admin routes are disabled".into())),
    }
}
