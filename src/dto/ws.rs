use serde::{Deserialize, Serialize};

use crate::dto::phase::VisibleStatus;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
/// Messages accepted from WebSocket clients.
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
    /// Claim the host role with the secret returned at creation.
    AdminLogin {
        /// Secret issued by `POST /create`.
        admin_token: String,
    },
    /// Resume a previously issued player identity.
    Reconnect {
        /// Identifier received in `JOINED`.
        player_id: String,
    },
    /// Found a new team and join it.
    CreateTeam {
        /// Display name of the new team.
        team_name: String,
        /// Display name of the player.
        nickname: String,
    },
    /// Join an existing team by its code.
    JoinTeam {
        /// Code of the team to join.
        team_code: String,
        /// Display name of the player.
        nickname: String,
    },
    /// Play alone in a one-member team.
    JoinSolo {
        /// Display name of the player, also used as team name.
        nickname: String,
    },
    /// Host starts the clock.
    StartGame,
    /// Host closes the game early.
    EndGame,
    /// Ask whether the game is over yet.
    CheckTime,
    /// Submit a flag for a challenge.
    SubmitFlag {
        /// Target challenge.
        challenge_id: String,
        /// Candidate answer.
        flag: String,
    },
    /// Host removes a single player.
    KickPlayer {
        /// Player to remove.
        player_id: String,
    },
    /// Host removes a whole team.
    KickTeam {
        /// Team to remove.
        team_id: String,
    },
    /// Leave the game.
    Leave,
    /// Ask for the current view to be re-sent.
    RequestState,
    /// Any other `type`, ignored.
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Parse an inbound text frame.
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
/// Severity of a toast notification.
pub enum ToastLevel {
    /// Something went right for the recipient.
    Success,
    /// Neutral announcement.
    Info,
    /// Something went wrong for the recipient.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Messages pushed to WebSocket clients.
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    /// Rejection notice addressed to the offending connection only.
    Error {
        /// Machine readable reason.
        code: String,
        /// Human readable explanation.
        message: String,
    },
    /// The connection now holds the host role.
    AdminConfirmed,
    /// Identity restored after a reconnect.
    SessionRestored {
        /// Restored player.
        player_id: String,
        /// Team of the player.
        team_id: String,
        /// Display name of the team.
        team_name: String,
        /// Whether the team is a one-member solo team.
        is_solo: bool,
        /// Challenges the player solved.
        solves: Vec<String>,
    },
    /// The presented identity is unknown; the client must pick a team.
    SelectTeam,
    /// Enrollment succeeded.
    Joined {
        /// Identifier to present when reconnecting.
        player_id: String,
        /// Team code, shareable with teammates.
        team_id: String,
        /// Display name of the team.
        team_name: String,
        /// Whether the team is a one-member solo team.
        is_solo: bool,
    },
    /// Short notification for the UI.
    Toast {
        /// Severity.
        level: ToastLevel,
        /// Text to display.
        message: String,
    },
    /// Confirmation sent to the solver.
    Solved {
        /// Solved challenge.
        challenge_id: String,
        /// Points credited to the solver.
        points: u32,
    },
    /// First team ever to solve a challenge.
    FirstBlood {
        /// Team that solved first.
        team_name: String,
        /// Solved challenge.
        challenge_id: String,
        /// Title of the solved challenge.
        challenge_title: String,
    },
    /// The connection is being closed by the server.
    Kicked {
        /// Why the connection is closed.
        reason: String,
    },
    /// Reply to a time check.
    TimeStatus {
        /// Lifecycle status after the check.
        status: VisibleStatus,
        /// Seconds left while the game is running.
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining_seconds: Option<i64>,
    },
    /// Player projection of the session.
    StateUpdate(SessionView),
    /// Host projection of the session, including solve history.
    AdminUpdate(SessionView),
}

impl OutboundMessage {
    /// Build a rejection notice.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Build a toast notification.
    pub fn toast(level: ToastLevel, message: impl Into<String>) -> Self {
        Self::Toast {
            level,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Projection of a session pushed to clients.
pub struct SessionView {
    /// Join code.
    pub code: String,
    /// Lifecycle status.
    pub status: VisibleStatus,
    /// Whether teams can be created and joined.
    pub teams_enabled: bool,
    /// Maximum members per team, 0 for unlimited.
    pub max_team_size: usize,
    /// RFC 3339 start time, once started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    /// RFC 3339 planned or actual end time, once started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    /// Teams sorted by score, ties in discovery order.
    pub leaderboard: Vec<TeamStanding>,
    /// Catalog in creation order.
    pub challenges: Vec<ChallengeView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Leaderboard entry for a team.
pub struct TeamStanding {
    /// Team code, only exposed to the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name.
    pub name: String,
    /// Sum of the member scores.
    pub score: u32,
    /// Whether the team is a one-member solo team.
    pub is_solo: bool,
    /// Members sorted by score, then name.
    pub members: Vec<PlayerStanding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Member line inside a team standing.
pub struct PlayerStanding {
    /// Player identifier, only exposed to the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name.
    pub name: String,
    /// Points earned by this player.
    pub score: u32,
    /// Challenges solved by this player.
    pub solves: Vec<String>,
    /// Whether at least one socket is bound to the player.
    pub is_connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Challenge as shown to clients. The flag is never included.
pub struct ChallengeView {
    /// Challenge identifier.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Category label.
    pub category: String,
    /// Current award for the next solver.
    pub points: u32,
    /// Number of teams that solved it.
    pub solves: u32,
    /// Statement shown to players.
    pub description: String,
    /// Attachment links.
    pub files: Vec<String>,
    /// Solve history, only present in the host projection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solve_log: Option<Vec<SolveLogView>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// One line of a challenge solve history.
pub struct SolveLogView {
    /// Solving team.
    pub team_name: String,
    /// Time since the start, as `<minutes>m <seconds>s`.
    pub elapsed: String,
}
