use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};

use crate::{
    dto::session::{CreateSessionRequest, CreateSessionResponse, SessionProbe},
    error::AppError,
    services::session_service,
    state::SharedState,
};

/// Routes handling session creation and lookup.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/create", post(create_session))
        .route("/sessions/{code}", get(probe_session))
}

/// Create a waiting session and return its join code and host secret.
#[utoipa::path(
    post,
    path = "/create",
    tag = "session",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created", body = CreateSessionResponse),
        (status = 400, description = "Invalid settings or challenges")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    payload: Option<Json<CreateSessionRequest>>,
) -> Result<Json<CreateSessionResponse>, AppError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let response = session_service::create_session(&state, request)?;
    Ok(Json(response))
}

/// Report whether a session exists and its current status.
#[utoipa::path(
    get,
    path = "/sessions/{code}",
    tag = "session",
    params(("code" = String, Path, description = "Join code of the session")),
    responses(
        (status = 200, description = "Session found", body = SessionProbe),
        (status = 404, description = "No session with this code")
    )
)]
pub async fn probe_session(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<SessionProbe>, AppError> {
    let probe = session_service::probe(&state, &code).await?;
    Ok(Json(probe))
}
