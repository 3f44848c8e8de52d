use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tracing::{debug, error, info};
use validator::Validate;

use crate::{
    dto::{
        session::{CreateSessionRequest, CreateSessionResponse, SessionProbe},
        ws::{InboundMessage, OutboundMessage},
    },
    error::{ServiceError, SessionError},
    services::websocket_service,
    state::{
        ConnectionId, SessionHandle, SharedState,
        catalog::{ChallengeDefinition, default_challenges},
        outbox::Outbox,
        session::Session,
    },
};

/// Validate a creation request and register the new session.
pub fn create_session(
    state: &SharedState,
    request: CreateSessionRequest,
) -> Result<CreateSessionResponse, ServiceError> {
    request
        .validate()
        .map_err(|err| ServiceError::InvalidInput(format!("validation failed: {err}")))?;

    let settings = request.settings();
    let catalog = if request.challenges.is_empty() {
        default_challenges()
    } else {
        request
            .challenges
            .into_iter()
            .map(ChallengeDefinition::from)
            .collect()
    };
    let challenge_count = catalog.len();

    let credentials = state.create_session(settings, catalog, OffsetDateTime::now_utc());
    info!(
        code = %credentials.code,
        challenges = challenge_count,
        teams_enabled = settings.teams_enabled,
        duration = %settings.duration,
        "session created"
    );
    Ok(credentials.into())
}

/// Public summary of a session, used by clients before opening a socket.
pub async fn probe(state: &SharedState, code: &str) -> Result<SessionProbe, ServiceError> {
    let handle = state
        .session(code)
        .ok_or_else(|| ServiceError::NotFound(format!("session `{code}` not found")))?;
    let session = handle.session.lock().await;
    Ok(SessionProbe {
        game_code: handle.code.clone(),
        status: session.status().into(),
        teams_enabled: session.settings().teams_enabled,
    })
}

/// Attach a freshly opened socket to its session.
pub async fn open_connection(state: &SharedState, handle: &SessionHandle, connection: ConnectionId) {
    run_on_session(state, handle, connection, |session, outbox| {
        session.connect(connection, OffsetDateTime::now_utc(), outbox);
        Ok(())
    })
    .await;
}

/// Route one inbound frame to the session owning the connection.
pub async fn handle_message(
    state: &SharedState,
    handle: &SessionHandle,
    connection: ConnectionId,
    message: InboundMessage,
) {
    run_on_session(state, handle, connection, |session, outbox| {
        session.handle(connection, message, OffsetDateTime::now_utc(), outbox)
    })
    .await;
}

/// The socket went away; unbind it while keeping its player.
pub async fn close_connection(state: &SharedState, handle: &SessionHandle, connection: ConnectionId) {
    run_on_session(state, handle, connection, |session, outbox| {
        session.disconnect(connection, OffsetDateTime::now_utc(), outbox);
        Ok(())
    })
    .await;
}

/// Expire overdue games and evict sessions idle for longer than the configured TTL.
pub async fn sweep(state: &SharedState, now: OffsetDateTime) {
    let ttl = Duration::try_from(state.config().session_idle_ttl).unwrap_or(Duration::HOUR);

    for handle in state.sessions() {
        let mut session = handle.session.lock().await;
        let mut outbox = Outbox::new();
        if session.expire_if_due(now, &mut outbox) {
            info!(code = %handle.code, "game time elapsed");
        }

        if session.is_idle(now, ttl) {
            // Retired and unregistered under the lock so no socket can attach in between.
            session.terminate(&mut outbox);
            state.remove_session(&handle.code);
            info!(code = %handle.code, "evicted idle session");
        }
        websocket_service::dispatch(state, outbox);
    }
    debug!(sessions = state.session_count(), "session sweep finished");
}

/// Run `work` under the session lock on behalf of `connection` and deliver what it queued.
///
/// A failing handler tears the whole session down; other sessions keep running.
async fn run_on_session<F>(
    state: &SharedState,
    handle: &SessionHandle,
    connection: ConnectionId,
    work: F,
)
where
    F: FnOnce(&mut Session, &mut Outbox) -> Result<(), SessionError>,
{
    let mut session = handle.session.lock().await;
    let mut outbox = Outbox::new();

    if session.is_retired() {
        debug!(code = %handle.code, connection = %connection, "session already closed");
        outbox.send(
            connection,
            OutboundMessage::error("INVALID_CODE", "this game no longer exists"),
        );
        outbox.close(connection);
        websocket_service::dispatch(state, outbox);
        return;
    }

    if let Err(err) = work(&mut session, &mut outbox) {
        error!(code = %handle.code, error = %err, "terminating session");
        session.terminate(&mut outbox);
        state.remove_session(&handle.code);
    }

    // Delivered while the lock is held so every connection sees updates in order.
    websocket_service::dispatch(state, outbox);
}

/// Shared handle of a registered session.
pub fn find_session(state: &SharedState, code: &str) -> Option<Arc<SessionHandle>> {
    state.session(code)
}
