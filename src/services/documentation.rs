use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for the quiz room server.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::session::join,
        crate::routes::session::current_view,
        crate::routes::session::select_option,
        crate::routes::session::retry,
        crate::routes::session::leave,
        crate::routes::session::events,
        crate::routes::admin::current_round,
        crate::routes::admin::set_waiting_room,
        crate::routes::admin::start_quiz,
        crate::routes::admin::end_quiz,
        crate::routes::admin::publish_question,
        crate::routes::admin::expire_question,
        crate::routes::admin::create_team,
        crate::routes::admin::set_team_status,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::session::JoinRequest,
            crate::dto::session::SelectRequest,
            crate::dto::session::SessionView,
            crate::dto::session::QuestionView,
            crate::dto::session::SyncStatus,
            crate::dto::phase::VisibleSessionPhase,
            crate::dto::sse::Handshake,
            crate::dto::admin::RoundView,
            crate::dto::admin::WaitingRoomRequest,
            crate::dto::admin::StartQuizRequest,
            crate::dto::admin::PublishQuestionRequest,
            crate::dto::admin::CreateTeamRequest,
            crate::dto::admin::TeamStatusRequest,
            crate::dto::admin::ActionResponse,
            crate::state::screen::Screen,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "session", description = "Participant sessions"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "admin", description = "Round and team administration"),
    )
)]
pub struct ApiDoc;
