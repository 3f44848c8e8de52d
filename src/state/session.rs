//! One competition: its lifecycle, membership, scoring counters and message handling.
//!
//! Every handler runs to completion under the session lock and records the pushes it wants
//! performed in an [`Outbox`]; nothing here touches a socket.

use std::collections::{HashMap, HashSet};

use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use crate::{
    dto::ws::{InboundMessage, OutboundMessage, ToastLevel},
    error::SessionError,
    state::{
        ConnectionId,
        catalog::ChallengeDefinition,
        membership::{MembershipError, Placement, Player, Roster, RosterLimits},
        outbox::Outbox,
        projector,
        router::ConnectionRouter,
        scoring,
        state_machine::{EndReason, SessionEvent, SessionStateMachine, SessionStatus},
    },
};

const KICKED_BY_HOST: &str = "You were removed by the host.";
const LEFT_ELSEWHERE: &str = "You left the game from another window.";
const SESSION_TERMINATED: &str = "The game was shut down.";

/// Settings fixed at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// When false only solo play is possible.
    pub teams_enabled: bool,
    /// Maximum members per team, 0 meaning unlimited.
    pub max_team_size: usize,
    /// Maximum players in the session, 0 meaning unlimited.
    pub max_players: usize,
    /// How long the game runs once started.
    pub duration: Duration,
}

/// One line of a challenge solve history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveLogEntry {
    /// Team credited with the solve.
    pub team_name: String,
    /// Time since the start, formatted as minutes and seconds.
    pub elapsed: String,
}

/// How a connection wants to enter the game.
enum Enrollment {
    NewTeam(String),
    ExistingTeam(String),
    Solo,
}

/// In-memory state of a single competition.
#[derive(Debug)]
pub struct Session {
    code: String,
    admin_secret: String,
    settings: SessionSettings,
    catalog: Vec<ChallengeDefinition>,
    machine: SessionStateMachine,
    roster: Roster,
    router: ConnectionRouter,
    challenge_stats: HashMap<String, u32>,
    solve_log: HashMap<String, Vec<SolveLogEntry>>,
    admin_connection: Option<ConnectionId>,
    connections: HashSet<ConnectionId>,
    started_at: Option<OffsetDateTime>,
    ends_at: Option<OffsetDateTime>,
    last_activity: OffsetDateTime,
    retired: bool,
}

impl Session {
    /// Build a waiting session.
    pub fn new(
        code: String,
        admin_secret: String,
        settings: SessionSettings,
        catalog: Vec<ChallengeDefinition>,
        now: OffsetDateTime,
    ) -> Self {
        let roster = Roster::new(RosterLimits {
            teams_enabled: settings.teams_enabled,
            max_team_size: settings.max_team_size,
            max_players: settings.max_players,
        });
        let challenge_stats = catalog.iter().map(|c| (c.id.clone(), 0)).collect();

        Self {
            code,
            admin_secret,
            settings,
            catalog,
            machine: SessionStateMachine::new(),
            roster,
            router: ConnectionRouter::new(),
            challenge_stats,
            solve_log: HashMap::new(),
            admin_connection: None,
            connections: HashSet::new(),
            started_at: None,
            ends_at: None,
            last_activity: now,
            retired: false,
        }
    }

    /// Join code of the session.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Current lifecycle status.
    pub fn status(&self) -> SessionStatus {
        self.machine.status()
    }

    /// Creation settings.
    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    /// Challenge catalog, in creation order.
    pub fn catalog(&self) -> &[ChallengeDefinition] {
        &self.catalog
    }

    /// Teams and players.
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Connection bindings.
    pub fn router(&self) -> &ConnectionRouter {
        &self.router
    }

    /// Number of teams that solved `challenge_id`.
    pub fn solve_count(&self, challenge_id: &str) -> u32 {
        self.challenge_stats.get(challenge_id).copied().unwrap_or(0)
    }

    /// Solve history of `challenge_id`.
    pub fn solve_log(&self, challenge_id: &str) -> &[SolveLogEntry] {
        self.solve_log
            .get(challenge_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Connection currently holding the host role.
    pub fn admin_connection(&self) -> Option<ConnectionId> {
        self.admin_connection
    }

    /// Every open connection attached to this session.
    pub fn connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.connections.iter().copied()
    }

    /// Start timestamp, set on activation.
    pub fn started_at(&self) -> Option<OffsetDateTime> {
        self.started_at
    }

    /// End timestamp: the planned expiry while active, the actual end once ended.
    pub fn ends_at(&self) -> Option<OffsetDateTime> {
        self.ends_at
    }

    /// Whether the session was torn down and must not accept connections anymore.
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Whether the session can be evicted: nobody attached and no activity for `ttl`.
    pub fn is_idle(&self, now: OffsetDateTime, ttl: Duration) -> bool {
        self.connections.is_empty()
            && self.admin_connection.is_none()
            && now - self.last_activity >= ttl
    }

    /// Attach a freshly opened connection and send it the current view.
    pub fn connect(&mut self, connection: ConnectionId, now: OffsetDateTime, outbox: &mut Outbox) {
        self.last_activity = now;
        self.connections.insert(connection);
        outbox.send(connection, projector::view_for(self, connection));
    }

    /// Process one inbound message from `connection`.
    pub fn handle(
        &mut self,
        connection: ConnectionId,
        message: InboundMessage,
        now: OffsetDateTime,
        outbox: &mut Outbox,
    ) -> Result<(), SessionError> {
        if !self.connections.contains(&connection) {
            debug!(
                code = %self.code,
                connection = %connection,
                "ignoring message from detached connection"
            );
            return Ok(());
        }
        self.last_activity = now;

        match message {
            InboundMessage::AdminLogin { admin_token } => {
                self.authenticate_admin(connection, &admin_token, outbox)
            }
            InboundMessage::Reconnect { player_id } => self.reconnect(connection, &player_id, outbox),
            InboundMessage::CreateTeam {
                team_name,
                nickname,
            } => self.enroll(connection, Enrollment::NewTeam(team_name), &nickname, outbox),
            InboundMessage::JoinTeam {
                team_code,
                nickname,
            } => self.enroll(
                connection,
                Enrollment::ExistingTeam(team_code),
                &nickname,
                outbox,
            ),
            InboundMessage::JoinSolo { nickname } => {
                self.enroll(connection, Enrollment::Solo, &nickname, outbox)
            }
            InboundMessage::StartGame => self.start(connection, now, outbox),
            InboundMessage::EndGame => self.end(connection, now, outbox),
            InboundMessage::CheckTime => self.check_time(connection, now, outbox),
            InboundMessage::SubmitFlag { challenge_id, flag } => {
                return self.submit(connection, &challenge_id, &flag, now, outbox);
            }
            InboundMessage::KickPlayer { player_id } => {
                self.kick_player(connection, &player_id, outbox)
            }
            InboundMessage::KickTeam { team_id } => self.kick_team(connection, &team_id, outbox),
            InboundMessage::Leave => self.leave(connection, outbox),
            InboundMessage::RequestState => {
                outbox.send(connection, projector::view_for(self, connection));
            }
            InboundMessage::Unknown => {
                debug!(code = %self.code, connection = %connection, "ignoring unknown message");
            }
        }

        Ok(())
    }

    /// The transport reported that `connection` went away.
    ///
    /// Siblings are left open and the player keeps its score so it can reconnect later.
    pub fn disconnect(&mut self, connection: ConnectionId, now: OffsetDateTime, outbox: &mut Outbox) {
        self.last_activity = now;
        self.connections.remove(&connection);

        if self.admin_connection == Some(connection) {
            self.admin_connection = None;
            info!(code = %self.code, connection = %connection, "host connection closed");
        }

        if let Some(player_id) = self.router.unbind(&mut self.roster, connection) {
            debug!(code = %self.code, player = %player_id, "player connection closed");
            projector::broadcast(self, outbox);
        }
    }

    /// End the session when its timer ran out. Returns true when a transition happened.
    pub fn expire_if_due(&mut self, now: OffsetDateTime, outbox: &mut Outbox) -> bool {
        let due = self.status() == SessionStatus::Active
            && self.ends_at.is_some_and(|ends_at| now >= ends_at);
        if !due {
            return false;
        }

        self.finish(EndReason::Expired, now);
        projector::broadcast(self, outbox);
        true
    }

    /// Close every connection of the session, used when its state can no longer be trusted.
    pub fn terminate(&mut self, outbox: &mut Outbox) {
        let message = OutboundMessage::Kicked {
            reason: SESSION_TERMINATED.into(),
        };
        for connection in self.connections.drain() {
            outbox.send(connection, message.clone());
            outbox.close(connection);
        }
        self.admin_connection = None;
        self.retired = true;
    }

    fn is_admin(&self, connection: ConnectionId) -> bool {
        self.admin_connection == Some(connection)
    }

    fn authenticate_admin(&mut self, connection: ConnectionId, token: &str, outbox: &mut Outbox) {
        if token != self.admin_secret {
            warn!(code = %self.code, connection = %connection, "rejected admin token");
            outbox.send(
                connection,
                OutboundMessage::error("INVALID_TOKEN", "admin token does not match"),
            );
            return;
        }

        if let Some(previous) = self.admin_connection.replace(connection) {
            if previous != connection {
                info!(code = %self.code, previous = %previous, "host role moved to a new connection");
            }
        }
        info!(code = %self.code, connection = %connection, "host authenticated");
        outbox.send(connection, OutboundMessage::AdminConfirmed);
        outbox.send(connection, projector::view_for(self, connection));
    }

    fn reconnect(&mut self, connection: ConnectionId, player_id: &str, outbox: &mut Outbox) {
        if !self.router.bind(&mut self.roster, connection, player_id) {
            debug!(code = %self.code, connection = %connection, "unknown player id on reconnect");
            outbox.send(connection, OutboundMessage::SelectTeam);
            return;
        }

        let Some((team, player)) = self.roster.find_player(player_id) else {
            outbox.send(connection, OutboundMessage::SelectTeam);
            return;
        };
        info!(code = %self.code, player = %player.name, team = %team.name, "player reconnected");
        outbox.send(
            connection,
            OutboundMessage::SessionRestored {
                player_id: player.id.clone(),
                team_id: team.id.clone(),
                team_name: team.name.clone(),
                is_solo: team.is_solo,
                solves: team.solves.clone(),
            },
        );
        projector::broadcast(self, outbox);
    }

    fn enroll(
        &mut self,
        connection: ConnectionId,
        enrollment: Enrollment,
        nickname: &str,
        outbox: &mut Outbox,
    ) {
        if self.status() == SessionStatus::Ended {
            outbox.send(connection, OutboundMessage::error("GAME_OVER", "the game is over"));
            return;
        }

        let result: Result<Placement, MembershipError> = match &enrollment {
            Enrollment::NewTeam(team_name) => self.roster.create_team(team_name, nickname),
            Enrollment::ExistingTeam(code) => self.roster.join_team(code, nickname),
            Enrollment::Solo => self.roster.create_solo_team(nickname),
        };

        let placement = match result {
            Ok(placement) => placement,
            Err(err) => {
                debug!(code = %self.code, connection = %connection, error = %err, "enrollment rejected");
                outbox.send(connection, OutboundMessage::error(err.code(), err.to_string()));
                return;
            }
        };

        self.router
            .bind(&mut self.roster, connection, &placement.player_id);
        info!(
            code = %self.code,
            team = %placement.team_name,
            nickname = %nickname.trim(),
            "player joined"
        );
        outbox.send(
            connection,
            OutboundMessage::Joined {
                player_id: placement.player_id,
                team_id: placement.team_id,
                team_name: placement.team_name,
                is_solo: placement.is_solo,
            },
        );
        projector::broadcast(self, outbox);
    }

    fn start(&mut self, connection: ConnectionId, now: OffsetDateTime, outbox: &mut Outbox) {
        if !self.is_admin(connection) {
            debug!(code = %self.code, connection = %connection, "ignoring start from non-host");
            return;
        }

        let Some(ends_at) = now.checked_add(self.settings.duration) else {
            warn!(code = %self.code, duration = %self.settings.duration, "game end out of range");
            outbox.send(
                connection,
                OutboundMessage::error("INVALID_DURATION", "game duration is out of range"),
            );
            return;
        };

        if let Err(err) = self.machine.apply(SessionEvent::Start) {
            debug!(code = %self.code, error = %err, "ignoring start request");
            return;
        }

        self.started_at = Some(now);
        self.ends_at = Some(ends_at);
        self.challenge_stats = self.catalog.iter().map(|c| (c.id.clone(), 0)).collect();
        self.solve_log.clear();
        info!(code = %self.code, duration = %self.settings.duration, "game started");
        projector::broadcast(self, outbox);
    }

    fn end(&mut self, connection: ConnectionId, now: OffsetDateTime, outbox: &mut Outbox) {
        if !self.is_admin(connection) {
            debug!(code = %self.code, connection = %connection, "ignoring end from non-host");
            return;
        }

        if self.status() != SessionStatus::Active {
            debug!(code = %self.code, status = ?self.status(), "ignoring end request");
            return;
        }

        self.finish(EndReason::ManualStop, now);
        projector::broadcast(self, outbox);
    }

    // Caller checked the session is active.
    fn finish(&mut self, reason: EndReason, now: OffsetDateTime) {
        if let Err(err) = self.machine.apply(SessionEvent::Finish(reason)) {
            warn!(code = %self.code, error = %err, "finish rejected by state machine");
            return;
        }
        self.ends_at = Some(match self.ends_at {
            Some(planned) if planned <= now => planned,
            _ => now,
        });
        info!(code = %self.code, reason = ?reason, "game ended");
    }

    fn check_time(&mut self, connection: ConnectionId, now: OffsetDateTime, outbox: &mut Outbox) {
        self.expire_if_due(now, outbox);

        let remaining_seconds = match self.status() {
            SessionStatus::Active => self
                .ends_at
                .map(|ends_at| (ends_at - now).whole_seconds().max(0)),
            SessionStatus::Ended => Some(0),
            SessionStatus::Waiting => None,
        };
        outbox.send(
            connection,
            OutboundMessage::TimeStatus {
                status: self.status().into(),
                remaining_seconds,
            },
        );
    }

    fn submit(
        &mut self,
        connection: ConnectionId,
        challenge_id: &str,
        flag: &str,
        now: OffsetDateTime,
        outbox: &mut Outbox,
    ) -> Result<(), SessionError> {
        self.expire_if_due(now, outbox);
        match self.status() {
            SessionStatus::Waiting => {
                outbox.send(
                    connection,
                    OutboundMessage::error("GAME_NOT_STARTED", "the game has not started yet"),
                );
                return Ok(());
            }
            SessionStatus::Ended => {
                outbox.send(connection, OutboundMessage::error("GAME_OVER", "the game is over"));
                return Ok(());
            }
            SessionStatus::Active => {}
        }

        let Some(player_id) = self.router.player_for(connection).cloned() else {
            debug!(code = %self.code, connection = %connection, "submission from unbound connection");
            return Ok(());
        };
        let Some((team, player)) = self.roster.find_player(&player_id) else {
            warn!(code = %self.code, player = %player_id, "submission from player without team");
            return Ok(());
        };
        let Some(challenge) = self.catalog.iter().find(|c| c.id == challenge_id).cloned() else {
            debug!(code = %self.code, challenge = %challenge_id, "submission for unknown challenge");
            return Ok(());
        };

        if team.has_solved(&challenge.id) {
            outbox.send(
                connection,
                OutboundMessage::error("ALREADY_SOLVED", "your team already solved this challenge"),
            );
            return Ok(());
        }

        if flag.trim() != challenge.flag {
            debug!(code = %self.code, player = %player.name, challenge = %challenge.id, "wrong flag");
            outbox.send(connection, OutboundMessage::error("WRONG_FLAG", "incorrect flag"));
            return Ok(());
        }

        let team_id = team.id.clone();
        let team_name = team.name.clone();
        let player_name = player.name.clone();

        let prior = *self
            .challenge_stats
            .get(&challenge.id)
            .ok_or_else(|| self.corrupted(format!("no solve counter for `{}`", challenge.id)))?;
        let awarded = scoring::points(&challenge, prior);
        let elapsed = format_elapsed(now - self.started_at.unwrap_or(now));

        let team = self
            .roster
            .team_mut(&team_id)
            .ok_or_else(|| corrupted(&self.code, format!("team `{team_id}` vanished")))?;
        team.solves.push(challenge.id.clone());
        let player: &mut Player = team
            .members
            .get_mut(&player_id)
            .ok_or_else(|| corrupted(&self.code, format!("player `{player_id}` vanished")))?;
        player.add_points(awarded);
        player.solves.push(challenge.id.clone());
        let team_connections = team.connections().collect::<Vec<_>>();

        if let Some(counter) = self.challenge_stats.get_mut(&challenge.id) {
            *counter += 1;
        }
        self.solve_log
            .entry(challenge.id.clone())
            .or_default()
            .push(SolveLogEntry {
                team_name: team_name.clone(),
                elapsed,
            });

        info!(
            code = %self.code,
            team = %team_name,
            player = %player_name,
            challenge = %challenge.id,
            points = awarded,
            "challenge solved"
        );

        outbox.send_all(
            team_connections,
            &OutboundMessage::toast(
                ToastLevel::Success,
                format!("{player_name} solved {} for {awarded} points", challenge.title),
            ),
        );
        outbox.send(
            connection,
            OutboundMessage::Solved {
                challenge_id: challenge.id.clone(),
                points: awarded,
            },
        );
        if prior == 0 {
            outbox.send_all(
                self.connections.iter().copied(),
                &OutboundMessage::FirstBlood {
                    team_name,
                    challenge_id: challenge.id.clone(),
                    challenge_title: challenge.title.clone(),
                },
            );
        }
        projector::broadcast(self, outbox);
        Ok(())
    }

    fn kick_player(&mut self, connection: ConnectionId, player_id: &str, outbox: &mut Outbox) {
        if !self.is_admin(connection) {
            debug!(code = %self.code, connection = %connection, "ignoring kick from non-host");
            return;
        }

        if self.evict_player(player_id, outbox) {
            projector::broadcast(self, outbox);
        } else {
            debug!(code = %self.code, player = %player_id, "kick target not found");
        }
    }

    fn kick_team(&mut self, connection: ConnectionId, team_id: &str, outbox: &mut Outbox) {
        if !self.is_admin(connection) {
            debug!(code = %self.code, connection = %connection, "ignoring kick from non-host");
            return;
        }

        let Some(team) = self.roster.team(team_id) else {
            debug!(code = %self.code, team = %team_id, "kick target not found");
            return;
        };
        let members = team.members.keys().cloned().collect::<Vec<_>>();
        info!(code = %self.code, team = %team.name, "kicking team");
        for player_id in members {
            self.evict_player(&player_id, outbox);
        }
        // A team is only ever empty transiently; drop it in case it had no members at all.
        self.roster.delete_team(team_id);
        projector::broadcast(self, outbox);
    }

    /// Remove a player, notify and close all of its connections.
    fn evict_player(&mut self, player_id: &str, outbox: &mut Outbox) -> bool {
        let Some(departure) = self.roster.remove_player(player_id) else {
            return false;
        };
        info!(
            code = %self.code,
            player = %departure.player.name,
            team_deleted = departure.team_deleted,
            "player kicked"
        );

        let notice = OutboundMessage::Kicked {
            reason: KICKED_BY_HOST.into(),
        };
        for connection in departure.player.connections {
            self.router.forget(connection);
            self.connections.remove(&connection);
            if self.admin_connection == Some(connection) {
                self.admin_connection = None;
            }
            outbox.send(connection, notice.clone());
            outbox.close(connection);
        }
        true
    }

    fn leave(&mut self, connection: ConnectionId, outbox: &mut Outbox) {
        self.connections.remove(&connection);
        if self.admin_connection == Some(connection) {
            self.admin_connection = None;
        }

        let Some(player_id) = self.router.player_for(connection).cloned() else {
            outbox.close(connection);
            return;
        };

        if self.status() == SessionStatus::Ended {
            self.router.unbind(&mut self.roster, connection);
            debug!(code = %self.code, player = %player_id, "player left after the end");
            outbox.close(connection);
            projector::broadcast(self, outbox);
            return;
        }

        let Some(departure) = self.roster.remove_player(&player_id) else {
            self.router.forget(connection);
            outbox.close(connection);
            return;
        };
        info!(
            code = %self.code,
            player = %departure.player.name,
            team_deleted = departure.team_deleted,
            "player left"
        );

        let notice = OutboundMessage::Kicked {
            reason: LEFT_ELSEWHERE.into(),
        };
        for sibling in departure.player.connections {
            self.router.forget(sibling);
            self.connections.remove(&sibling);
            if sibling != connection {
                outbox.send(sibling, notice.clone());
                outbox.close(sibling);
            }
        }
        self.router.forget(connection);
        outbox.close(connection);
        projector::broadcast(self, outbox);
    }

    fn corrupted(&self, detail: String) -> SessionError {
        corrupted(&self.code, detail)
    }
}

fn corrupted(code: &str, detail: String) -> SessionError {
    SessionError::Corrupted {
        code: code.to_string(),
        detail,
    }
}

/// Format a duration as `<minutes>m <seconds>s`.
fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.whole_seconds().max(0);
    format!("{}m {:02}s", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::{
        dto::{
            phase::VisibleStatus,
            ws::{SessionView, TeamStanding},
        },
        state::outbox::Delivery,
    };

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn t0() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    fn at(seconds: i64) -> OffsetDateTime {
        t0() + Duration::seconds(seconds)
    }

    fn challenge(id: &str, base: u32, floor: u32, decay: u32) -> ChallengeDefinition {
        ChallengeDefinition {
            id: id.into(),
            title: format!("Challenge {id}"),
            category: "WEB".into(),
            base_points: base,
            floor_points: floor,
            decay,
            description: String::new(),
            flag: format!("flag{{{id}}}"),
            files: Vec::new(),
        }
    }

    fn session_with(settings: SessionSettings) -> Session {
        Session::new(
            "ABCD".into(),
            SECRET.into(),
            settings,
            vec![challenge("web1", 500, 100, 50), challenge("misc1", 100, 100, 0)],
            t0(),
        )
    }

    fn session() -> Session {
        session_with(SessionSettings {
            teams_enabled: true,
            max_team_size: 0,
            max_players: 0,
            duration: Duration::seconds(60),
        })
    }

    fn open(session: &mut Session) -> ConnectionId {
        let connection = Uuid::new_v4();
        let mut outbox = Outbox::new();
        session.connect(connection, t0(), &mut outbox);
        connection
    }

    fn send(
        session: &mut Session,
        connection: ConnectionId,
        message: InboundMessage,
        now: OffsetDateTime,
    ) -> Outbox {
        let mut outbox = Outbox::new();
        session.handle(connection, message, now, &mut outbox).unwrap();
        outbox
    }

    fn admin(session: &mut Session) -> ConnectionId {
        let connection = open(session);
        let outbox = send(
            session,
            connection,
            InboundMessage::AdminLogin {
                admin_token: SECRET.into(),
            },
            t0(),
        );
        assert_eq!(
            outbox.messages_for(connection).next(),
            Some(&OutboundMessage::AdminConfirmed)
        );
        connection
    }

    fn solo(session: &mut Session, nickname: &str) -> (ConnectionId, String, String) {
        let connection = open(session);
        let outbox = send(
            session,
            connection,
            InboundMessage::JoinSolo {
                nickname: nickname.into(),
            },
            t0(),
        );
        joined(&outbox, connection)
    }

    fn create_team(session: &mut Session, team: &str, nickname: &str) -> (ConnectionId, String, String) {
        let connection = open(session);
        let outbox = send(
            session,
            connection,
            InboundMessage::CreateTeam {
                team_name: team.into(),
                nickname: nickname.into(),
            },
            t0(),
        );
        joined(&outbox, connection)
    }

    fn join_team(session: &mut Session, code: &str, nickname: &str) -> (ConnectionId, String, String) {
        let connection = open(session);
        let outbox = send(
            session,
            connection,
            InboundMessage::JoinTeam {
                team_code: code.into(),
                nickname: nickname.into(),
            },
            t0(),
        );
        joined(&outbox, connection)
    }

    fn joined(outbox: &Outbox, connection: ConnectionId) -> (ConnectionId, String, String) {
        match outbox.messages_for(connection).next() {
            Some(OutboundMessage::Joined {
                player_id, team_id, ..
            }) => (connection, player_id.clone(), team_id.clone()),
            other => panic!("expected JOINED, got {other:?}"),
        }
    }

    fn submit(
        session: &mut Session,
        connection: ConnectionId,
        challenge_id: &str,
        flag: &str,
        now: OffsetDateTime,
    ) -> Outbox {
        send(
            session,
            connection,
            InboundMessage::SubmitFlag {
                challenge_id: challenge_id.into(),
                flag: flag.into(),
            },
            now,
        )
    }

    fn start(session: &mut Session, admin: ConnectionId) {
        send(session, admin, InboundMessage::StartGame, t0());
        assert_eq!(session.status(), SessionStatus::Active);
    }

    fn error_code(outbox: &Outbox, connection: ConnectionId) -> Option<String> {
        outbox.messages_for(connection).find_map(|message| match message {
            OutboundMessage::Error { code, .. } => Some(code.clone()),
            _ => None,
        })
    }

    fn player_view(outbox: &Outbox, connection: ConnectionId) -> Option<SessionView> {
        outbox
            .messages_for(connection)
            .filter_map(|message| match message {
                OutboundMessage::StateUpdate(view) => Some(view.clone()),
                _ => None,
            })
            .last()
    }

    fn admin_view(outbox: &Outbox, connection: ConnectionId) -> Option<SessionView> {
        outbox
            .messages_for(connection)
            .filter_map(|message| match message {
                OutboundMessage::AdminUpdate(view) => Some(view.clone()),
                _ => None,
            })
            .last()
    }

    fn standing<'a>(view: &'a SessionView, name: &str) -> Option<&'a TeamStanding> {
        view.leaderboard.iter().find(|team| team.name == name)
    }

    fn score(session: &Session, player_id: &str) -> u32 {
        session.roster().find_player(player_id).unwrap().1.score
    }

    #[test]
    fn connect_sends_the_player_view() {
        let mut session = session();
        let connection = Uuid::new_v4();
        let mut outbox = Outbox::new();
        session.connect(connection, t0(), &mut outbox);

        let view = player_view(&outbox, connection).unwrap();
        assert_eq!(view.status, VisibleStatus::Waiting);
        assert_eq!(view.challenges.len(), 2);
    }

    #[test]
    fn solo_join_creates_a_one_member_team() {
        let mut session = session();
        let (connection, player_id, team_id) = solo(&mut session, "Eve");

        let team = session.roster().team(&team_id).unwrap();
        assert!(team.is_solo);
        assert_eq!(team.name, "Eve");
        assert_eq!(team.members.len(), 1);
        assert_eq!(
            session.router().player_for(connection),
            Some(&player_id)
        );
    }

    #[test]
    fn duplicate_names_are_rejected_with_a_notice() {
        let mut session = session();
        create_team(&mut session, "Red", "alice");

        let connection = open(&mut session);
        let outbox = send(
            &mut session,
            connection,
            InboundMessage::CreateTeam {
                team_name: "red".into(),
                nickname: "bob".into(),
            },
            t0(),
        );
        assert_eq!(error_code(&outbox, connection).as_deref(), Some("TEAM_NAME_TAKEN"));
        assert_eq!(session.roster().teams().count(), 1);
        assert!(session.router().player_for(connection).is_none());
    }

    #[test]
    fn joining_after_the_end_is_refused() {
        let mut session = session();
        let host = admin(&mut session);
        start(&mut session, host);
        send(&mut session, host, InboundMessage::EndGame, at(5));

        let connection = open(&mut session);
        let outbox = send(
            &mut session,
            connection,
            InboundMessage::JoinSolo {
                nickname: "late".into(),
            },
            at(6),
        );
        assert_eq!(error_code(&outbox, connection).as_deref(), Some("GAME_OVER"));
    }

    #[test]
    fn wrong_admin_token_is_rejected() {
        let mut session = session();
        let connection = open(&mut session);
        let outbox = send(
            &mut session,
            connection,
            InboundMessage::AdminLogin {
                admin_token: "guess".into(),
            },
            t0(),
        );
        assert_eq!(error_code(&outbox, connection).as_deref(), Some("INVALID_TOKEN"));
        assert_eq!(session.admin_connection(), None);
    }

    #[test]
    fn non_admin_cannot_start_or_end() {
        let mut session = session();
        let (player, _, _) = solo(&mut session, "Eve");

        let outbox = send(&mut session, player, InboundMessage::StartGame, t0());
        assert!(outbox.deliveries().is_empty());
        assert_eq!(session.status(), SessionStatus::Waiting);

        let host = admin(&mut session);
        start(&mut session, host);
        send(&mut session, player, InboundMessage::EndGame, at(1));
        assert_eq!(session.status(), SessionStatus::Active);
    }

    #[test]
    fn start_sets_the_timer_and_resets_counters() {
        let mut session = session();
        let host = admin(&mut session);
        start(&mut session, host);

        assert_eq!(session.started_at(), Some(t0()));
        assert_eq!(session.ends_at(), Some(at(60)));
        assert_eq!(session.solve_count("web1"), 0);
        assert!(session.solve_log("web1").is_empty());
    }

    #[test]
    fn unrepresentable_end_time_keeps_the_game_waiting() {
        let mut session = session_with(SessionSettings {
            teams_enabled: true,
            max_team_size: 0,
            max_players: 0,
            duration: Duration::seconds(i64::MAX),
        });
        let host = admin(&mut session);

        let outbox = send(&mut session, host, InboundMessage::StartGame, t0());
        assert_eq!(error_code(&outbox, host).as_deref(), Some("INVALID_DURATION"));
        assert_eq!(session.status(), SessionStatus::Waiting);
        assert!(session.started_at().is_none());
        assert!(session.ends_at().is_none());
    }

    #[test]
    fn decaying_award_across_teams() {
        let mut session = session();
        let host = admin(&mut session);
        let teams = ["A", "B", "C", "D", "E"]
            .iter()
            .map(|name| solo(&mut session, name))
            .collect::<Vec<_>>();
        start(&mut session, host);

        let awarded = teams
            .iter()
            .enumerate()
            .map(|(i, (connection, player_id, _))| {
                submit(&mut session, *connection, "web1", "flag{web1}", at(i as i64 + 1));
                score(&session, player_id)
            })
            .collect::<Vec<_>>();

        assert_eq!(awarded, vec![500, 450, 400, 350, 300]);
        assert_eq!(session.solve_count("web1"), 5);
    }

    #[test]
    fn correct_flag_notifies_team_and_announces_first_blood() {
        let mut session = session();
        let host = admin(&mut session);
        let (alice, alice_id, team_id) = create_team(&mut session, "Red", "alice");
        let (bob, _, _) = join_team(&mut session, &team_id, "bob");
        let (eve, _, _) = solo(&mut session, "Eve");
        start(&mut session, host);

        let outbox = submit(&mut session, alice, "web1", "  flag{web1} ", at(75 - 60));
        assert!(outbox.messages_for(alice).any(|m| *m
            == OutboundMessage::Solved {
                challenge_id: "web1".into(),
                points: 500
            }));
        assert!(outbox
            .messages_for(bob)
            .any(|m| matches!(m, OutboundMessage::Toast { level: ToastLevel::Success, .. })));
        assert!(!outbox
            .messages_for(eve)
            .any(|m| matches!(m, OutboundMessage::Toast { .. })));
        for connection in [alice, bob, eve, host] {
            assert!(outbox
                .messages_for(connection)
                .any(|m| matches!(m, OutboundMessage::FirstBlood { .. })));
        }

        assert_eq!(score(&session, &alice_id), 500);
        assert_eq!(
            session.solve_log("web1"),
            &[SolveLogEntry {
                team_name: "Red".into(),
                elapsed: "0m 15s".into()
            }]
        );

        let outbox = submit(&mut session, eve, "web1", "flag{web1}", at(20));
        assert!(!outbox
            .messages_for(eve)
            .any(|m| matches!(m, OutboundMessage::FirstBlood { .. })));
    }

    #[test]
    fn a_team_is_credited_once_per_challenge() {
        let mut session = session();
        let host = admin(&mut session);
        let (alice, alice_id, team_id) = create_team(&mut session, "Red", "alice");
        let (bob, bob_id, _) = join_team(&mut session, &team_id, "bob");
        start(&mut session, host);

        submit(&mut session, alice, "web1", "flag{web1}", at(1));
        let outbox = submit(&mut session, bob, "web1", "flag{web1}", at(2));
        let again = submit(&mut session, alice, "web1", "flag{web1}", at(3));

        assert_eq!(error_code(&outbox, bob).as_deref(), Some("ALREADY_SOLVED"));
        assert_eq!(error_code(&again, alice).as_deref(), Some("ALREADY_SOLVED"));
        assert_eq!(score(&session, &alice_id), 500);
        assert_eq!(score(&session, &bob_id), 0);
        assert_eq!(session.solve_count("web1"), 1);
        assert_eq!(session.roster().team(&team_id).unwrap().solves, vec!["web1"]);
    }

    #[test]
    fn wrong_flag_only_notifies_the_submitter() {
        let mut session = session();
        let host = admin(&mut session);
        let (alice, alice_id, team_id) = create_team(&mut session, "Red", "alice");
        let (bob, _, _) = join_team(&mut session, &team_id, "bob");
        start(&mut session, host);

        let outbox = submit(&mut session, alice, "web1", "flag{nope}", at(1));
        assert_eq!(error_code(&outbox, alice).as_deref(), Some("WRONG_FLAG"));
        assert_eq!(outbox.messages_for(bob).count(), 0);
        assert_eq!(outbox.messages_for(host).count(), 0);
        assert_eq!(score(&session, &alice_id), 0);
        assert_eq!(session.solve_count("web1"), 0);
    }

    #[test]
    fn unknown_challenge_and_unbound_connections_are_ignored() {
        let mut session = session();
        let host = admin(&mut session);
        let (alice, _, _) = solo(&mut session, "alice");
        start(&mut session, host);

        assert!(submit(&mut session, alice, "nope", "x", at(1)).deliveries().is_empty());
        let stranger = open(&mut session);
        assert!(submit(&mut session, stranger, "web1", "flag{web1}", at(1))
            .deliveries()
            .is_empty());
    }

    #[test]
    fn submitting_before_start_is_rejected() {
        let mut session = session();
        let (alice, alice_id, _) = solo(&mut session, "alice");
        let outbox = submit(&mut session, alice, "web1", "flag{web1}", t0());
        assert_eq!(error_code(&outbox, alice).as_deref(), Some("GAME_NOT_STARTED"));
        assert_eq!(score(&session, &alice_id), 0);
    }

    #[test]
    fn submitting_after_the_end_is_rejected() {
        let mut session = session();
        let host = admin(&mut session);
        let (alice, alice_id, _) = solo(&mut session, "alice");
        start(&mut session, host);
        send(&mut session, host, InboundMessage::EndGame, at(10));
        assert_eq!(session.status(), SessionStatus::Ended);
        assert_eq!(session.ends_at(), Some(at(10)));

        let outbox = submit(&mut session, alice, "web1", "flag{web1}", at(11));
        assert_eq!(error_code(&outbox, alice).as_deref(), Some("GAME_OVER"));
        assert_eq!(score(&session, &alice_id), 0);
        assert_eq!(session.solve_count("web1"), 0);
    }

    #[test]
    fn late_submission_detects_expiry() {
        let mut session = session();
        let host = admin(&mut session);
        let (alice, alice_id, _) = solo(&mut session, "alice");
        start(&mut session, host);

        let outbox = submit(&mut session, alice, "web1", "flag{web1}", at(61));
        assert_eq!(error_code(&outbox, alice).as_deref(), Some("GAME_OVER"));
        assert_eq!(session.status(), SessionStatus::Ended);
        assert_eq!(session.ends_at(), Some(at(60)));
        assert_eq!(score(&session, &alice_id), 0);
    }

    #[test]
    fn check_time_reports_and_expires() {
        let mut session = session();
        let host = admin(&mut session);
        let (alice, _, _) = solo(&mut session, "alice");

        let outbox = send(&mut session, alice, InboundMessage::CheckTime, t0());
        assert!(outbox.messages_for(alice).any(|m| *m
            == OutboundMessage::TimeStatus {
                status: VisibleStatus::Waiting,
                remaining_seconds: None
            }));

        start(&mut session, host);
        let outbox = send(&mut session, alice, InboundMessage::CheckTime, at(20));
        assert!(outbox.messages_for(alice).any(|m| *m
            == OutboundMessage::TimeStatus {
                status: VisibleStatus::Active,
                remaining_seconds: Some(40)
            }));

        let outbox = send(&mut session, alice, InboundMessage::CheckTime, at(90));
        assert_eq!(session.status(), SessionStatus::Ended);
        assert_eq!(session.ends_at(), Some(at(60)));
        assert_eq!(
            player_view(&outbox, alice).unwrap().status,
            VisibleStatus::Ended
        );
    }

    #[test]
    fn expire_if_due_is_a_no_op_before_the_deadline() {
        let mut session = session();
        let host = admin(&mut session);
        start(&mut session, host);

        let mut outbox = Outbox::new();
        assert!(!session.expire_if_due(at(59), &mut outbox));
        assert!(session.expire_if_due(at(60), &mut outbox));
        assert!(!session.expire_if_due(at(61), &mut outbox));
    }

    #[test]
    fn reconnect_restores_score_and_solves() {
        let mut session = session();
        let host = admin(&mut session);
        let (alice, alice_id, team_id) = solo(&mut session, "alice");
        start(&mut session, host);
        submit(&mut session, alice, "web1", "flag{web1}", at(1));

        let mut outbox = Outbox::new();
        session.disconnect(alice, at(2), &mut outbox);
        assert!(!session.roster().find_player(&alice_id).unwrap().1.is_connected);

        let fresh = open(&mut session);
        let reconnect = InboundMessage::Reconnect {
            player_id: alice_id.clone(),
        };
        let outbox = send(&mut session, fresh, reconnect.clone(), at(3));
        assert!(outbox.messages_for(fresh).any(|m| *m
            == OutboundMessage::SessionRestored {
                player_id: alice_id.clone(),
                team_id: team_id.clone(),
                team_name: "alice".into(),
                is_solo: true,
                solves: vec!["web1".into()],
            }));

        send(&mut session, fresh, reconnect, at(4));
        let (_, player) = session.roster().find_player(&alice_id).unwrap();
        assert_eq!(player.score, 500);
        assert_eq!(player.solves, vec!["web1"]);
        assert_eq!(player.connections, vec![fresh]);
        assert_eq!(session.router().len(), 1);
    }

    #[test]
    fn reconnect_with_unknown_id_asks_for_a_team() {
        let mut session = session();
        let connection = open(&mut session);
        let outbox = send(
            &mut session,
            connection,
            InboundMessage::Reconnect {
                player_id: "stale".into(),
            },
            t0(),
        );
        assert_eq!(
            outbox.messages_for(connection).next(),
            Some(&OutboundMessage::SelectTeam)
        );
    }

    #[test]
    fn kicking_a_player_closes_all_connections_and_drops_the_team() {
        let mut session = session();
        let host = admin(&mut session);
        let (first, player_id, _) = solo(&mut session, "Mallory");
        let second = open(&mut session);
        send(
            &mut session,
            second,
            InboundMessage::Reconnect {
                player_id: player_id.clone(),
            },
            t0(),
        );

        let outbox = send(
            &mut session,
            host,
            InboundMessage::KickPlayer {
                player_id: player_id.clone(),
            },
            at(1),
        );

        for connection in [first, second] {
            assert!(outbox
                .messages_for(connection)
                .any(|m| matches!(m, OutboundMessage::Kicked { .. })));
            assert!(outbox.closes(connection));
        }
        assert!(session.roster().find_player(&player_id).is_none());
        assert_eq!(session.roster().teams().count(), 0);
        assert!(session.router().is_empty());
        let view = admin_view(&outbox, host).unwrap();
        assert!(standing(&view, "Mallory").is_none());
    }

    #[test]
    fn kicked_connection_cannot_rejoin_or_pin_the_session() {
        let mut session = session();
        let host = admin(&mut session);
        let (mallory, player_id, _) = solo(&mut session, "Mallory");
        send(&mut session, host, InboundMessage::KickPlayer { player_id }, at(1));
        let mut outbox = Outbox::new();
        session.disconnect(host, at(1), &mut outbox);

        let outbox = send(
            &mut session,
            mallory,
            InboundMessage::JoinSolo {
                nickname: "Ghost".into(),
            },
            at(2),
        );
        assert!(outbox.deliveries().is_empty());
        assert_eq!(session.roster().teams().count(), 0);
        assert_eq!(session.connections().count(), 0);
        assert!(session.is_idle(at(61), Duration::seconds(60)));
    }

    #[test]
    fn host_kicking_its_own_player_releases_the_host_slot() {
        let mut session = session();
        let host = admin(&mut session);
        let outbox = send(
            &mut session,
            host,
            InboundMessage::JoinSolo {
                nickname: "Boss".into(),
            },
            t0(),
        );
        let (_, player_id, _) = joined(&outbox, host);

        let outbox = send(&mut session, host, InboundMessage::KickPlayer { player_id }, at(1));
        assert!(outbox.closes(host));
        assert_eq!(session.admin_connection(), None);
        assert!(session.is_idle(at(61), Duration::seconds(60)));
    }

    #[test]
    fn kick_from_non_admin_is_ignored() {
        let mut session = session();
        let (alice, _, _) = solo(&mut session, "alice");
        let (_, bob_id, _) = solo(&mut session, "bob");

        let outbox = send(
            &mut session,
            alice,
            InboundMessage::KickPlayer {
                player_id: bob_id.clone(),
            },
            t0(),
        );
        assert!(outbox.deliveries().is_empty());
        assert!(session.roster().find_player(&bob_id).is_some());
    }

    #[test]
    fn kicking_a_team_removes_every_member() {
        let mut session = session();
        let host = admin(&mut session);
        let (alice, _, team_id) = create_team(&mut session, "Red", "alice");
        let (bob, _, _) = join_team(&mut session, &team_id, "bob");
        let (eve, _, _) = solo(&mut session, "Eve");

        let outbox = send(
            &mut session,
            host,
            InboundMessage::KickTeam {
                team_id: team_id.clone(),
            },
            t0(),
        );

        assert!(outbox.closes(alice) && outbox.closes(bob));
        assert!(!outbox.closes(eve));
        assert!(session.roster().team(&team_id).is_none());
        let view = player_view(&outbox, eve).unwrap();
        assert_eq!(view.leaderboard.len(), 1);
    }

    #[test]
    fn leaving_before_the_end_removes_the_player() {
        let mut session = session();
        let (first, player_id, team_id) = solo(&mut session, "alice");
        let second = open(&mut session);
        send(
            &mut session,
            second,
            InboundMessage::Reconnect {
                player_id: player_id.clone(),
            },
            t0(),
        );

        let outbox = send(&mut session, first, InboundMessage::Leave, t0());
        assert!(outbox.closes(first));
        assert!(outbox.closes(second));
        assert!(outbox
            .messages_for(second)
            .any(|m| matches!(m, OutboundMessage::Kicked { .. })));
        assert!(session.roster().team(&team_id).is_none());
        assert!(session.router().is_empty());
    }

    #[test]
    fn leaving_after_the_end_keeps_the_record() {
        let mut session = session();
        let host = admin(&mut session);
        let (alice, alice_id, _) = solo(&mut session, "alice");
        start(&mut session, host);
        submit(&mut session, alice, "misc1", "flag{misc1}", at(1));
        send(&mut session, host, InboundMessage::EndGame, at(2));

        let outbox = send(&mut session, alice, InboundMessage::Leave, at(3));
        assert!(outbox.closes(alice));
        let (_, player) = session.roster().find_player(&alice_id).unwrap();
        assert_eq!(player.score, 100);
        assert!(!player.is_connected);

        let fresh = open(&mut session);
        let outbox = send(
            &mut session,
            fresh,
            InboundMessage::Reconnect { player_id: alice_id },
            at(4),
        );
        assert!(outbox
            .messages_for(fresh)
            .any(|m| matches!(m, OutboundMessage::SessionRestored { .. })));
    }

    #[test]
    fn closing_the_admin_connection_clears_the_slot() {
        let mut session = session();
        let host = admin(&mut session);
        let mut outbox = Outbox::new();
        session.disconnect(host, t0(), &mut outbox);
        assert_eq!(session.admin_connection(), None);
        assert_eq!(session.status(), SessionStatus::Waiting);
    }

    #[test]
    fn admin_view_carries_solve_history_and_player_view_does_not() {
        let mut session = session();
        let host = admin(&mut session);
        let (alice, _, _) = solo(&mut session, "alice");
        start(&mut session, host);

        let outbox = submit(&mut session, alice, "web1", "flag{web1}", at(65 - 60));
        let admin = admin_view(&outbox, host).unwrap();
        let player = player_view(&outbox, alice).unwrap();
        assert!(player_view(&outbox, host).is_none());

        let admin_web = admin.challenges.iter().find(|c| c.id == "web1").unwrap();
        let player_web = player.challenges.iter().find(|c| c.id == "web1").unwrap();
        assert_eq!(admin_web.solve_log.as_ref().map(Vec::len), Some(1));
        assert!(player_web.solve_log.is_none());
        assert_eq!(player_web.points, 450);
        assert_eq!(player_web.solves, 1);
        assert!(admin.leaderboard[0].id.is_some());
        assert!(player.leaderboard[0].id.is_none());
    }

    #[test]
    fn leaderboard_scores_match_member_sums() {
        let mut session = session();
        let host = admin(&mut session);
        let (alice, _, team_id) = create_team(&mut session, "Red", "alice");
        let (bob, _, _) = join_team(&mut session, &team_id, "bob");
        let (eve, _, _) = solo(&mut session, "Eve");
        start(&mut session, host);

        submit(&mut session, eve, "web1", "flag{web1}", at(1));
        submit(&mut session, alice, "web1", "flag{web1}", at(2));
        let outbox = submit(&mut session, bob, "misc1", "flag{misc1}", at(3));

        let view = player_view(&outbox, eve).unwrap();
        for team in &view.leaderboard {
            let sum = team.members.iter().map(|m| m.score).sum::<u32>();
            assert_eq!(team.score, sum);
        }
        assert_eq!(standing(&view, "Red").unwrap().score, 550);
        assert_eq!(standing(&view, "Eve").unwrap().score, 500);
        assert_eq!(view.leaderboard[0].name, "Red");
    }

    #[test]
    fn terminate_closes_every_connection() {
        let mut session = session();
        let host = admin(&mut session);
        let (alice, _, _) = solo(&mut session, "alice");
        let mut outbox = Outbox::new();
        session.terminate(&mut outbox);
        assert!(outbox.closes(host) && outbox.closes(alice));
        assert!(matches!(
            outbox.deliveries().first(),
            Some(Delivery::Message { .. })
        ));
        assert_eq!(session.connections().count(), 0);
        assert!(session.is_retired());
    }

    #[test]
    fn idle_detection_requires_no_connections() {
        let mut session = session();
        let connection = Uuid::new_v4();
        let mut outbox = Outbox::new();
        session.connect(connection, t0(), &mut outbox);
        assert!(!session.is_idle(at(3600), Duration::seconds(60)));

        session.disconnect(connection, t0(), &mut outbox);
        assert!(!session.is_idle(at(30), Duration::seconds(60)));
        assert!(session.is_idle(at(60), Duration::seconds(60)));
    }

    #[test]
    fn elapsed_is_formatted_as_minutes_and_seconds() {
        assert_eq!(format_elapsed(Duration::seconds(0)), "0m 00s");
        assert_eq!(format_elapsed(Duration::seconds(125)), "2m 05s");
        assert_eq!(format_elapsed(Duration::seconds(-3)), "0m 00s");
    }
}
