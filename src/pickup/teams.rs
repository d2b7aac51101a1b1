//! Team partitioning and captain selection for formed matches

use crate::types::{Gametype, Match, PlayerIdentity};
use crate::utils::{generate_match_id, random_index};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How each team's captain is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptainPolicy {
    /// First player assigned to the team
    #[default]
    First,
    /// Any member of the team
    Random,
}

impl std::str::FromStr for CaptainPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first" => Ok(CaptainPolicy::First),
            "random" => Ok(CaptainPolicy::Random),
            other => Err(format!("Unknown captain policy: {}", other)),
        }
    }
}

/// Rosters and captains for a match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamAssignment {
    pub teams: Vec<Vec<PlayerIdentity>>,
    pub captains: Vec<PlayerIdentity>,
    pub has_teams: bool,
}

/// Trait for turning an ordered roster into teams
pub trait TeamAssigner: Send + Sync {
    /// Partition `players` (already in match order) for `gametype`
    fn assign(&self, gametype: &Gametype, players: Vec<PlayerIdentity>) -> TeamAssignment;
}

/// Round-robin assignment: the i-th player joins team `i mod team_count`
#[derive(Debug, Clone, Default)]
pub struct RoundRobinAssigner {
    captain_policy: CaptainPolicy,
}

impl RoundRobinAssigner {
    pub fn new(captain_policy: CaptainPolicy) -> Self {
        Self { captain_policy }
    }

    pub fn captain_policy(&self) -> CaptainPolicy {
        self.captain_policy
    }

    fn pick_captain(&self, team: &[PlayerIdentity]) -> Option<PlayerIdentity> {
        if team.is_empty() {
            return None;
        }
        let index = match self.captain_policy {
            CaptainPolicy::First => 0,
            CaptainPolicy::Random => random_index(team.len()),
        };
        team.get(index).cloned()
    }
}

impl TeamAssigner for RoundRobinAssigner {
    fn assign(&self, gametype: &Gametype, players: Vec<PlayerIdentity>) -> TeamAssignment {
        if !gametype.has_teams() {
            return TeamAssignment {
                teams: vec![players],
                captains: Vec::new(),
                has_teams: false,
            };
        }

        let team_count = gametype.team_count;
        let mut teams: Vec<Vec<PlayerIdentity>> = vec![Vec::new(); team_count];
        for (i, player) in players.into_iter().enumerate() {
            if let Some(team) = teams.get_mut(i % team_count) {
                team.push(player);
            }
        }

        // Forced starts can leave trailing teams empty; they get no captain
        let captains = teams
            .iter()
            .filter_map(|team| self.pick_captain(team))
            .collect();

        TeamAssignment {
            teams,
            captains,
            has_teams: true,
        }
    }
}

/// Build the match record for a drained roster
pub fn form_match(
    assigner: &dyn TeamAssigner,
    gametype: &Gametype,
    players: Vec<PlayerIdentity>,
    forced: bool,
    formed_at: DateTime<Utc>,
) -> Match {
    let assignment = assigner.assign(gametype, players);
    Match {
        id: generate_match_id(),
        gametype: gametype.title.clone(),
        teams: assignment.teams,
        captains: assignment.captains,
        has_teams: assignment.has_teams,
        forced,
        formed_at,
    }
}
