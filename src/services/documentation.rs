use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for DashFlag Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::session::create_session,
        crate::routes::session::probe_session,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::phase::VisibleStatus,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::ChallengeInput,
            crate::dto::session::CreateSessionResponse,
            crate::dto::session::SessionProbe,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "session", description = "Session creation and lookup"),
        (name = "players", description = "WebSocket channel for players and hosts"),
    )
)]
pub struct ApiDoc;
