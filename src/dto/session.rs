use serde::{Deserialize, Serialize};
use time::Duration;
use utoipa::ToSchema;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    dto::{
        phase::VisibleStatus,
        validation::{validate_point_range, validate_unique_ids},
    },
    state::{SessionCredentials, catalog::ChallengeDefinition, session::SessionSettings},
};

fn default_teams_enabled() -> bool {
    true
}

/// Longest game accepted at creation: one week.
pub const MAX_DURATION_SECONDS: i64 = 7 * 24 * 60 * 60;

fn default_duration_seconds() -> i64 {
    1800
}

/// Payload accepted by `POST /create`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    /// When false players can only join solo.
    #[serde(default = "default_teams_enabled")]
    pub teams_enabled: bool,
    /// Maximum members per team, 0 for unlimited.
    #[serde(default)]
    pub max_team_size: usize,
    /// Maximum players in the session, 0 for unlimited.
    #[serde(default)]
    pub max_players: usize,
    /// Challenge catalog; the built-in catalog is used when empty.
    #[serde(default)]
    pub challenges: Vec<ChallengeInput>,
    /// Game length once started.
    #[serde(default = "default_duration_seconds")]
    pub duration_seconds: i64,
}

impl Default for CreateSessionRequest {
    fn default() -> Self {
        Self {
            teams_enabled: default_teams_enabled(),
            max_team_size: 0,
            max_players: 0,
            challenges: Vec::new(),
            duration_seconds: default_duration_seconds(),
        }
    }
}

impl CreateSessionRequest {
    /// Session settings carried by the request.
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            teams_enabled: self.teams_enabled,
            max_team_size: self.max_team_size,
            max_players: self.max_players,
            duration: Duration::seconds(self.duration_seconds),
        }
    }
}

impl Validate for CreateSessionRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.duration_seconds <= 0 {
            let mut err = ValidationError::new("duration_positive");
            err.message = Some("duration_seconds must be greater than zero".into());
            errors.add("duration_seconds", err);
        } else if self.duration_seconds > MAX_DURATION_SECONDS {
            let mut err = ValidationError::new("duration_max");
            err.message =
                Some(format!("duration_seconds must not exceed {MAX_DURATION_SECONDS}").into());
            errors.add("duration_seconds", err);
        }

        if let Err(e) = validate_unique_ids(self.challenges.iter().map(|c| c.id.as_str())) {
            errors.add("challenges", e);
        }

        for challenge in &self.challenges {
            if let Err(e) = validate_point_range(challenge.points, challenge.floor_points()) {
                errors.add("challenges", e);
            }
            if let Err(challenge_errors) = challenge.validate() {
                let mut err = ValidationError::new("challenge_invalid");
                err.message = Some(format!("challenge `{}`: {challenge_errors}", challenge.id).into());
                errors.add("challenges", err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Challenge definition supplied by the host.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct ChallengeInput {
    /// Identifier unique within the catalog.
    #[validate(length(min = 1))]
    pub id: String,
    /// Display title.
    #[validate(length(min = 1))]
    pub title: String,
    /// Free-form category label.
    #[serde(default)]
    pub category: String,
    /// Award for the first solver.
    pub points: u32,
    /// Lowest award reachable through decay.
    #[serde(default)]
    pub min_points: Option<u32>,
    /// Points lost per prior solve.
    #[serde(default)]
    pub decay: u32,
    /// Statement shown to players.
    #[serde(default, rename = "desc")]
    pub description: String,
    /// Expected answer, compared after trimming.
    #[validate(length(min = 1))]
    pub flag: String,
    /// Attachment links.
    #[serde(default)]
    pub files: Vec<String>,
}

impl ChallengeInput {
    fn floor_points(&self) -> u32 {
        self.min_points.unwrap_or(self.points)
    }
}

impl From<ChallengeInput> for ChallengeDefinition {
    fn from(value: ChallengeInput) -> Self {
        let floor_points = value.floor_points();
        Self {
            id: value.id.trim().to_string(),
            title: value.title,
            category: value.category,
            base_points: value.points,
            floor_points,
            decay: value.decay,
            description: value.description,
            flag: value.flag.trim().to_string(),
            files: value.files,
        }
    }
}

/// Secrets returned to the session creator.
#[derive(Debug, Serialize, ToSchema)]
pub struct CreateSessionResponse {
    /// Join code shared with players.
    pub game_code: String,
    /// Secret granting the host role.
    pub admin_token: String,
}

impl From<SessionCredentials> for CreateSessionResponse {
    fn from(value: SessionCredentials) -> Self {
        Self {
            game_code: value.code,
            admin_token: value.admin_token,
        }
    }
}

/// Public summary returned by `GET /sessions/{code}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionProbe {
    /// Join code of the session.
    pub game_code: String,
    /// Current lifecycle status.
    pub status: VisibleStatus,
    /// Whether teams can be created and joined.
    pub teams_enabled: bool,
}
