//! Common types used throughout the pickup engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use crate::error::PickupError;

/// Unique identifier for formed matches
pub type MatchId = Uuid;

/// Chat backend a player identity is anchored to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Irc,
    Discord,
    Matrix,
}

impl Platform {
    /// All platforms in announcement order
    pub const ALL: [Platform; 3] = [Platform::Irc, Platform::Discord, Platform::Matrix];
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Irc => write!(f, "irc"),
            Platform::Discord => write!(f, "discord"),
            Platform::Matrix => write!(f, "matrix"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = PickupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "irc" => Ok(Platform::Irc),
            "discord" => Ok(Platform::Discord),
            "matrix" => Ok(Platform::Matrix),
            other => Err(PickupError::Configuration {
                message: format!("Unknown platform: {}", other),
            }),
        }
    }
}

/// A player as seen by one chat platform
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerIdentity {
    pub platform: Platform,
    pub handle: String,
}

impl PlayerIdentity {
    pub fn new(platform: Platform, handle: impl Into<String>) -> Self {
        Self {
            platform,
            handle: handle.into(),
        }
    }

    pub fn irc(handle: impl Into<String>) -> Self {
        Self::new(Platform::Irc, handle)
    }

    pub fn discord(handle: impl Into<String>) -> Self {
        Self::new(Platform::Discord, handle)
    }

    pub fn matrix(handle: impl Into<String>) -> Self {
        Self::new(Platform::Matrix, handle)
    }
}

impl std::fmt::Display for PlayerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.handle)
    }
}

/// A configured pickup mode (e.g. duel, 2v2tdm)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gametype {
    pub title: String,
    pub required_players: usize,
    pub team_count: usize,
    /// Game type code used by the external stats service
    pub stats_name: Option<String>,
}

impl Gametype {
    /// Build a validated gametype
    pub fn new(
        title: impl Into<String>,
        required_players: usize,
        team_count: usize,
        stats_name: Option<String>,
    ) -> Result<Self, PickupError> {
        let gametype = Self {
            title: title.into().trim().to_string(),
            required_players,
            team_count,
            stats_name,
        };
        gametype.validate()?;
        Ok(gametype)
    }

    pub fn validate(&self) -> Result<(), PickupError> {
        if self.title.is_empty() || self.title.chars().any(char::is_whitespace) {
            return Err(PickupError::InvalidGametype {
                reason: format!("title '{}' must be a single non-empty word", self.title),
            });
        }
        if self.required_players == 0 {
            return Err(PickupError::InvalidGametype {
                reason: format!("{} needs at least one player", self.title),
            });
        }
        if self.team_count == 0 {
            return Err(PickupError::InvalidGametype {
                reason: format!("{} needs at least one team", self.title),
            });
        }
        if self.team_count > self.required_players {
            return Err(PickupError::InvalidGametype {
                reason: format!(
                    "{} cannot split {} players into {} teams",
                    self.title, self.required_players, self.team_count
                ),
            });
        }
        Ok(())
    }

    /// Whether matches of this gametype are announced as teams
    pub fn has_teams(&self) -> bool {
        self.team_count > 1
    }
}

/// A player's pending reservation for a gametype
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub gametype: String,
    pub player: PlayerIdentity,
    pub joined_at: DateTime<Utc>,
    pub warned_at: Option<DateTime<Utc>>,
    /// Insertion order, breaks ties between equal join times
    pub seq: u64,
}

/// A formed pickup game, returned to the caller for announcement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub gametype: String,
    /// One roster per team; a single roster when `has_teams` is false
    pub teams: Vec<Vec<PlayerIdentity>>,
    /// One captain per team; empty when `has_teams` is false
    pub captains: Vec<PlayerIdentity>,
    pub has_teams: bool,
    /// Started by an admin before the queue was full
    pub forced: bool,
    pub formed_at: DateTime<Utc>,
}

impl Match {
    /// Every player of the match in team order
    pub fn players(&self) -> Vec<PlayerIdentity> {
        self.teams.iter().flatten().cloned().collect()
    }

    pub fn player_count(&self) -> usize {
        self.teams.iter().map(Vec::len).sum()
    }
}

/// Result of an add (or push) request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddOutcome {
    /// At least one entry was inserted
    pub ok: bool,
    /// Gametypes the player was inserted into
    pub added: Vec<String>,
    pub errors: Vec<PickupError>,
    pub match_formed: Option<Match>,
}

/// Current state of one non-empty gametype queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveQueue {
    pub gametype: String,
    pub count: usize,
    pub required: usize,
    /// Waiting players in join order
    pub players: Vec<PlayerIdentity>,
    pub players_by_platform: BTreeMap<Platform, Vec<String>>,
}

/// A queue entry removed by the expiry scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eviction {
    pub gametype: String,
    pub player: PlayerIdentity,
    pub joined_at: DateTime<Utc>,
}

/// A player told that their reservations are about to expire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryWarning {
    pub gametype: String,
    pub player: PlayerIdentity,
    /// Time left until the entry is evicted
    pub expires_in: Duration,
}

/// Outcome of one expiry scheduler step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Delay until the next deadline; `None` once the scheduler went idle
    pub next_wake_delay: Option<Duration>,
    pub evicted: Vec<Eviction>,
    pub warned: Vec<ExpiryWarning>,
    pub queue_text_changed: bool,
}

/// Result of removing one gametype from the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GametypeRemoval {
    pub gametype: String,
    pub cleared_entries: usize,
    pub cleared_subscriptions: usize,
}

/// Result of a `removegametype` request over several titles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveGametypesOutcome {
    pub removed: Vec<GametypeRemoval>,
    pub errors: Vec<PickupError>,
}

/// Promotion targets for a gametype
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub gametype: String,
    pub broadcast: String,
    pub notify: Vec<PlayerIdentity>,
}
