pub mod catalog;
pub mod membership;
pub mod outbox;
pub mod projector;
pub mod router;
pub mod scoring;
pub mod session;
pub mod state_machine;

use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::{DashMap, mapref::entry::Entry};
use rand::Rng;
use time::OffsetDateTime;
use tokio::sync::{Mutex, mpsc, watch};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    state::{
        catalog::ChallengeDefinition,
        session::{Session, SessionSettings},
    },
};

/// Application state shared by every handler.
pub type SharedState = Arc<AppState>;
/// Identifier assigned to every accepted WebSocket.
pub type ConnectionId = Uuid;

/// Number of letters in a join code.
pub const SESSION_CODE_LENGTH: usize = 4;

#[derive(Clone)]
/// Handle used to push messages to a connected client.
pub struct ClientConnection {
    /// Identifier of the socket.
    pub id: ConnectionId,
    /// Join code of the session the socket belongs to.
    pub session_code: String,
    /// Queue drained by the socket writer task.
    pub tx: mpsc::UnboundedSender<Message>,
    /// Flipped to `true` to make the reader loop stop.
    pub shutdown: watch::Sender<bool>,
}

/// A registered session and the lock serializing every mutation of it.
#[derive(Debug)]
pub struct SessionHandle {
    /// Join code under which the session is registered.
    pub code: String,
    /// Session state, locked for the duration of one event.
    pub session: Mutex<Session>,
}

/// Secrets handed back to the creator of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    /// Join code shared with players.
    pub code: String,
    /// Secret granting the host role.
    pub admin_token: String,
}

/// Central application state: the session registry and the live sockets.
pub struct AppState {
    config: AppConfig,
    sessions: DashMap<String, Arc<SessionHandle>>,
    connections: DashMap<ConnectionId, ClientConnection>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(config: AppConfig) -> SharedState {
        Arc::new(Self {
            config,
            sessions: DashMap::new(),
            connections: DashMap::new(),
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Register a new waiting session under a fresh code.
    pub fn create_session(
        &self,
        settings: SessionSettings,
        catalog: Vec<ChallengeDefinition>,
        now: OffsetDateTime,
    ) -> SessionCredentials {
        let admin_token = Uuid::new_v4().simple().to_string();
        loop {
            let code = generate_session_code();
            // The vacant entry keeps the shard locked, so two creators cannot claim one code.
            if let Entry::Vacant(slot) = self.sessions.entry(code.clone()) {
                let session = Session::new(
                    code.clone(),
                    admin_token.clone(),
                    settings,
                    catalog,
                    now,
                );
                slot.insert(Arc::new(SessionHandle {
                    code: code.clone(),
                    session: Mutex::new(session),
                }));
                return SessionCredentials { code, admin_token };
            }
        }
    }

    /// Look a session up by code, ignoring case.
    pub fn session(&self, code: &str) -> Option<Arc<SessionHandle>> {
        self.sessions
            .get(&code.trim().to_ascii_uppercase())
            .map(|entry| entry.value().clone())
    }

    /// Drop a session from the registry.
    pub fn remove_session(&self, code: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.remove(code).map(|(_, handle)| handle)
    }

    /// Snapshot of every registered session.
    pub fn sessions(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Registry of open sockets keyed by connection id.
    pub fn connections(&self) -> &DashMap<ConnectionId, ClientConnection> {
        &self.connections
    }
}

/// Random code of [`SESSION_CODE_LENGTH`] uppercase letters.
fn generate_session_code() -> String {
    let mut rng = rand::rng();
    (0..SESSION_CODE_LENGTH)
        .map(|_| char::from(rng.random_range(b'A'..=b'Z')))
        .collect()
}
