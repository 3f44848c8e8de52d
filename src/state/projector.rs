//! Builds the host and player projections of a session and fans them out.

use crate::{
    dto::{
        format_time,
        ws::{ChallengeView, OutboundMessage, PlayerStanding, SessionView, SolveLogView, TeamStanding},
    },
    state::{
        ConnectionId,
        membership::{Player, Team},
        outbox::Outbox,
        scoring,
        session::Session,
        state_machine::SessionStatus,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Audience {
    Host,
    Players,
}

impl Audience {
    fn is_host(self) -> bool {
        self == Audience::Host
    }
}

/// Projection without identifiers or solve history.
pub fn player_view(session: &Session) -> SessionView {
    project(session, Audience::Players)
}

/// Full projection for the host.
pub fn admin_view(session: &Session) -> SessionView {
    project(session, Audience::Host)
}

/// The state message matching the role of `connection`.
pub fn view_for(session: &Session, connection: ConnectionId) -> OutboundMessage {
    if session.admin_connection() == Some(connection) {
        OutboundMessage::AdminUpdate(admin_view(session))
    } else {
        OutboundMessage::StateUpdate(player_view(session))
    }
}

/// Queue the host view for the host and the player view for every other attached connection.
pub fn broadcast(session: &Session, outbox: &mut Outbox) {
    let admin = session.admin_connection();
    let players = OutboundMessage::StateUpdate(player_view(session));
    outbox.send_all(
        session.connections().filter(|connection| Some(*connection) != admin),
        &players,
    );

    if let Some(admin) = admin {
        outbox.send(admin, OutboundMessage::AdminUpdate(admin_view(session)));
    }
}

fn project(session: &Session, audience: Audience) -> SessionView {
    let settings = session.settings();
    SessionView {
        code: session.code().to_string(),
        status: session.status().into(),
        teams_enabled: settings.teams_enabled,
        max_team_size: settings.max_team_size,
        start_time: session.started_at().map(format_time),
        end_time: session.ends_at().map(format_time),
        leaderboard: leaderboard(session, audience),
        challenges: challenges(session, audience),
    }
}

fn leaderboard(session: &Session, audience: Audience) -> Vec<TeamStanding> {
    let mut teams = session.roster().teams().collect::<Vec<_>>();
    // Stable sort keeps discovery order between tied teams.
    teams.sort_by(|a, b| b.points().cmp(&a.points()));
    teams
        .into_iter()
        .map(|team| team_standing(team, audience))
        .collect()
}

fn team_standing(team: &Team, audience: Audience) -> TeamStanding {
    let mut members = team.members.values().collect::<Vec<_>>();
    members.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));

    TeamStanding {
        id: audience.is_host().then(|| team.id.clone()),
        name: team.name.clone(),
        score: team.points(),
        is_solo: team.is_solo,
        members: members
            .into_iter()
            .map(|player| player_standing(player, audience))
            .collect(),
    }
}

fn player_standing(player: &Player, audience: Audience) -> PlayerStanding {
    PlayerStanding {
        id: audience.is_host().then(|| player.id.clone()),
        name: player.name.clone(),
        score: player.score,
        solves: player.solves.clone(),
        is_connected: player.is_connected,
    }
}

fn challenges(session: &Session, audience: Audience) -> Vec<ChallengeView> {
    session
        .catalog()
        .iter()
        .map(|challenge| {
            let solves = session.solve_count(&challenge.id);
            let points = match session.status() {
                SessionStatus::Waiting => challenge.base_points,
                SessionStatus::Active | SessionStatus::Ended => {
                    scoring::points(challenge, solves)
                }
            };
            let solve_log = audience.is_host().then(|| {
                session
                    .solve_log(&challenge.id)
                    .iter()
                    .map(|entry| SolveLogView {
                        team_name: entry.team_name.clone(),
                        elapsed: entry.elapsed.clone(),
                    })
                    .collect()
            });

            ChallengeView {
                id: challenge.id.clone(),
                title: challenge.title.clone(),
                category: challenge.category.clone(),
                points,
                solves,
                description: challenge.description.clone(),
                files: challenge.files.clone(),
                solve_log,
            }
        })
        .collect()
}
