//! Teams, players and the rules binding them together inside one session.

use std::collections::HashMap;

use indexmap::IndexMap;
use rand::Rng;
use thiserror::Error;
use uuid::Uuid;

use crate::state::ConnectionId;

/// Identifier handed to a player; doubles as the reconnection credential.
pub type PlayerId = String;
/// Digits-only team code, shared with teammates so they can join.
pub type TeamId = String;

const TEAM_CODE_LENGTH: usize = 6;

/// Individual participant.
#[derive(Debug, Clone)]
pub struct Player {
    /// Unique identifier.
    pub id: PlayerId,
    /// Display name, unique case-insensitively across the session.
    pub name: String,
    /// Cumulative points.
    pub score: u32,
    /// Challenge ids solved by this player, in solve order.
    pub solves: Vec<String>,
    /// Connections currently open for this player.
    pub connections: Vec<ConnectionId>,
    /// True while at least one connection is open.
    pub is_connected: bool,
}

impl Player {
    /// Build a player with a fresh identifier and no connection.
    pub fn new(name: String) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            name,
            score: 0,
            solves: Vec::new(),
            connections: Vec::new(),
            is_connected: false,
        }
    }

    /// Current points of the player.
    pub fn points(&self) -> u32 {
        self.score
    }

    /// Credit the player with `points`.
    pub fn add_points(&mut self, points: u32) {
        self.score = self.score.saturating_add(points);
    }

    /// Record `connection` as open for this player. Attaching twice is a no-op.
    pub fn attach(&mut self, connection: ConnectionId) {
        if !self.connections.contains(&connection) {
            self.connections.push(connection);
        }
        self.refresh_connectivity();
    }

    /// Forget `connection`, returning whether it was attached.
    pub fn detach(&mut self, connection: ConnectionId) -> bool {
        let before = self.connections.len();
        self.connections.retain(|existing| *existing != connection);
        self.refresh_connectivity();
        before != self.connections.len()
    }

    fn refresh_connectivity(&mut self) {
        self.is_connected = !self.connections.is_empty();
    }
}

/// Group of players sharing solve credit and a leaderboard entry.
#[derive(Debug, Clone)]
pub struct Team {
    /// Digits-only join code.
    pub id: TeamId,
    /// Display name, unique case-insensitively among teams.
    pub name: String,
    /// Solo teams hold exactly one player and cannot be joined.
    pub is_solo: bool,
    /// Members keyed by player id.
    pub members: HashMap<PlayerId, Player>,
    /// Challenge ids credited to the team.
    pub solves: Vec<String>,
}

impl Team {
    fn new(id: TeamId, name: String, is_solo: bool) -> Self {
        Self {
            id,
            name,
            is_solo,
            members: HashMap::new(),
            solves: Vec::new(),
        }
    }

    /// Derived team score: the sum of member scores.
    pub fn points(&self) -> u32 {
        self.members
            .values()
            .fold(0u32, |total, player| total.saturating_add(player.points()))
    }

    /// Whether the team has already been credited for `challenge_id`.
    pub fn has_solved(&self, challenge_id: &str) -> bool {
        self.solves.iter().any(|id| id == challenge_id)
    }

    /// Insert `player` into the team.
    pub fn add_member(&mut self, player: Player) {
        self.members.insert(player.id.clone(), player);
    }

    /// Remove a member, leaving the team empty if it was the last one.
    pub fn remove_member(&mut self, player_id: &str) -> Option<Player> {
        self.members.remove(player_id)
    }

    /// Every open connection of every member.
    pub fn connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.members
            .values()
            .flat_map(|player| player.connections.iter().copied())
    }
}

/// Capacity and mode settings applied by the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterLimits {
    /// When false only solo teams can be formed.
    pub teams_enabled: bool,
    /// Maximum members per team, 0 meaning unlimited.
    pub max_team_size: usize,
    /// Maximum players in the session, 0 meaning unlimited.
    pub max_players: usize,
}

/// User-correctable reasons for refusing a membership change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MembershipError {
    /// Blank nickname or team name.
    #[error("name must not be empty")]
    EmptyName,
    /// Another player already uses this nickname.
    #[error("nickname `{0}` is already taken")]
    NameTaken(String),
    /// Another team already uses this name.
    #[error("team name `{0}` is already taken")]
    TeamNameTaken(String),
    /// No team with this code.
    #[error("team `{0}` does not exist")]
    TeamNotFound(String),
    /// Team reached its capacity, or is a solo team.
    #[error("team is full")]
    TeamFull,
    /// Session reached its player capacity.
    #[error("session is full")]
    SessionFull,
    /// Only solo play is allowed in this session.
    #[error("teams are disabled for this game")]
    TeamsDisabled,
}

impl MembershipError {
    /// Wire code sent with the rejection notice.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyName => "EMPTY_NAME",
            Self::NameTaken(_) => "NAME_TAKEN",
            Self::TeamNameTaken(_) => "TEAM_NAME_TAKEN",
            Self::TeamNotFound(_) => "TEAM_NOT_FOUND",
            Self::TeamFull => "TEAM_FULL",
            Self::SessionFull => "SESSION_FULL",
            Self::TeamsDisabled => "TEAMS_DISABLED",
        }
    }
}

/// Where a newly enrolled player ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Identifier issued to the player.
    pub player_id: PlayerId,
    /// Code of the team the player belongs to.
    pub team_id: TeamId,
    /// Name of that team.
    pub team_name: String,
    /// Whether the team is a solo team.
    pub is_solo: bool,
}

/// Player removed from the roster, with the fate of its former team.
#[derive(Debug, Clone)]
pub struct Departure {
    /// Team the player belonged to.
    pub team_id: TeamId,
    /// The removed player, including its open connections.
    pub player: Player,
    /// True when the team became empty and was deleted.
    pub team_deleted: bool,
}

/// All teams of a session, in discovery order.
#[derive(Debug, Clone)]
pub struct Roster {
    teams: IndexMap<TeamId, Team>,
    limits: RosterLimits,
}

impl Roster {
    /// Empty roster enforcing `limits`.
    pub fn new(limits: RosterLimits) -> Self {
        Self {
            teams: IndexMap::new(),
            limits,
        }
    }

    /// Settings enforced by this roster.
    pub fn limits(&self) -> RosterLimits {
        self.limits
    }

    /// Teams in discovery order.
    pub fn teams(&self) -> impl Iterator<Item = &Team> {
        self.teams.values()
    }

    /// Look a team up by code.
    pub fn team(&self, team_id: &str) -> Option<&Team> {
        self.teams.get(team_id)
    }

    /// Mutable team lookup.
    pub fn team_mut(&mut self, team_id: &str) -> Option<&mut Team> {
        self.teams.get_mut(team_id)
    }

    /// Total number of players across all teams.
    pub fn player_count(&self) -> usize {
        self.teams.values().map(|team| team.members.len()).sum()
    }

    /// Find the team owning `player_id` together with the player.
    pub fn find_player(&self, player_id: &str) -> Option<(&Team, &Player)> {
        self.teams
            .values()
            .find_map(|team| team.members.get(player_id).map(|player| (team, player)))
    }

    /// Mutable player lookup.
    pub fn player_mut(&mut self, player_id: &str) -> Option<&mut Player> {
        self.teams
            .values_mut()
            .find_map(|team| team.members.get_mut(player_id))
    }

    /// Create a regular team named `team_name` and enroll `nickname` as its first member.
    pub fn create_team(
        &mut self,
        team_name: &str,
        nickname: &str,
    ) -> Result<Placement, MembershipError> {
        if !self.limits.teams_enabled {
            return Err(MembershipError::TeamsDisabled);
        }
        let team_name = normalized(team_name)?;
        let nickname = normalized(nickname)?;
        self.ensure_player_slot()?;
        self.ensure_team_name_free(&team_name)?;
        self.ensure_nickname_free(&nickname)?;

        let team_id = self.insert_team(team_name, false);
        self.commit_member(&team_id, nickname)
    }

    /// Create a one-member team named after the player.
    pub fn create_solo_team(&mut self, nickname: &str) -> Result<Placement, MembershipError> {
        let nickname = normalized(nickname)?;
        self.ensure_player_slot()?;
        self.ensure_team_name_free(&nickname)?;
        self.ensure_nickname_free(&nickname)?;

        let team_id = self.insert_team(nickname.clone(), true);
        self.commit_member(&team_id, nickname)
    }

    /// Enroll `nickname` in the existing team identified by `code`.
    pub fn join_team(&mut self, code: &str, nickname: &str) -> Result<Placement, MembershipError> {
        if !self.limits.teams_enabled {
            return Err(MembershipError::TeamsDisabled);
        }
        let code = code.trim();
        let nickname = normalized(nickname)?;
        let team = self
            .teams
            .get(code)
            .ok_or_else(|| MembershipError::TeamNotFound(code.to_string()))?;
        if team.is_solo
            || (self.limits.max_team_size > 0 && team.members.len() >= self.limits.max_team_size)
        {
            return Err(MembershipError::TeamFull);
        }
        self.ensure_player_slot()?;
        self.ensure_nickname_free(&nickname)?;

        self.commit_member(code, nickname)
    }

    /// Add an already built player to `team_id`.
    pub fn add_member(&mut self, team_id: &str, player: Player) -> Result<(), MembershipError> {
        let team = self
            .teams
            .get_mut(team_id)
            .ok_or_else(|| MembershipError::TeamNotFound(team_id.to_string()))?;
        team.add_member(player);
        Ok(())
    }

    /// Remove `player_id` from `team_id`. An emptied team stays in place.
    pub fn remove_member(&mut self, team_id: &str, player_id: &str) -> Option<Player> {
        self.teams.get_mut(team_id)?.remove_member(player_id)
    }

    /// Delete a team and everything it owns.
    pub fn delete_team(&mut self, team_id: &str) -> Option<Team> {
        self.teams.shift_remove(team_id)
    }

    /// Remove a player wherever it is, deleting its team when it becomes empty.
    pub fn remove_player(&mut self, player_id: &str) -> Option<Departure> {
        let team_id = self.find_player(player_id).map(|(team, _)| team.id.clone())?;
        let player = self.remove_member(&team_id, player_id)?;
        let team_deleted = self
            .teams
            .get(&team_id)
            .is_some_and(|team| team.members.is_empty());
        if team_deleted {
            self.delete_team(&team_id);
        }
        Some(Departure {
            team_id,
            player,
            team_deleted,
        })
    }

    fn ensure_player_slot(&self) -> Result<(), MembershipError> {
        if self.limits.max_players > 0 && self.player_count() >= self.limits.max_players {
            return Err(MembershipError::SessionFull);
        }
        Ok(())
    }

    fn ensure_team_name_free(&self, name: &str) -> Result<(), MembershipError> {
        let wanted = name.to_lowercase();
        if self
            .teams
            .values()
            .any(|team| team.name.to_lowercase() == wanted)
        {
            return Err(MembershipError::TeamNameTaken(name.to_string()));
        }
        Ok(())
    }

    fn ensure_nickname_free(&self, nickname: &str) -> Result<(), MembershipError> {
        let wanted = nickname.to_lowercase();
        if self
            .teams
            .values()
            .flat_map(|team| team.members.values())
            .any(|player| player.name.to_lowercase() == wanted)
        {
            return Err(MembershipError::NameTaken(nickname.to_string()));
        }
        Ok(())
    }

    fn insert_team(&mut self, name: String, is_solo: bool) -> TeamId {
        let team_id = self.generate_team_code();
        self.teams
            .insert(team_id.clone(), Team::new(team_id.clone(), name, is_solo));
        team_id
    }

    fn commit_member(
        &mut self,
        team_id: &str,
        nickname: String,
    ) -> Result<Placement, MembershipError> {
        let player = Player::new(nickname);
        let player_id = player.id.clone();
        self.add_member(team_id, player)?;
        let team = self
            .teams
            .get(team_id)
            .ok_or_else(|| MembershipError::TeamNotFound(team_id.to_string()))?;
        Ok(Placement {
            player_id,
            team_id: team.id.clone(),
            team_name: team.name.clone(),
            is_solo: team.is_solo,
        })
    }

    fn generate_team_code(&self) -> TeamId {
        let mut rng = rand::rng();
        loop {
            let code = (0..TEAM_CODE_LENGTH)
                .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
                .collect::<String>();
            if !self.teams.contains_key(&code) {
                return code;
            }
        }
    }
}

fn normalized(name: &str) -> Result<String, MembershipError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(MembershipError::EmptyName);
    }
    Ok(trimmed.to_string())
}
