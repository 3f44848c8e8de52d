use tracing::debug;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Respond with a static health payload carrying the number of live sessions.
pub fn health_status(state: &SharedState) -> HealthResponse {
    let sessions = state.session_count();
    debug!(sessions, "health check");
    HealthResponse::ok(sessions)
}
