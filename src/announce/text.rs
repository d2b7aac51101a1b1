//! Rendering of engine results into chat text

use crate::identity::IdentityResolver;
use crate::types::{ActiveQueue, Eviction, ExpiryWarning, Match, Platform, PlayerIdentity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Prefix of the pickup topic line
pub const PICKUP_TEXT_PREFIX: &str = "Pickups: ";

/// One message rendered for each platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformText {
    pub irc: String,
    pub discord: String,
    pub matrix: String,
}

impl PlatformText {
    /// The same text on every platform
    pub fn same(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            irc: text.clone(),
            discord: text.clone(),
            matrix: text,
        }
    }

    pub fn get(&self, platform: Platform) -> &str {
        match platform {
            Platform::Irc => &self.irc,
            Platform::Discord => &self.discord,
            Platform::Matrix => &self.matrix,
        }
    }

    fn set(&mut self, platform: Platform, text: String) {
        match platform {
            Platform::Irc => self.irc = text,
            Platform::Discord => self.discord = text,
            Platform::Matrix => self.matrix = text,
        }
    }
}

/// Renders pickup state with names resolved per platform
#[derive(Clone)]
pub struct Announcer {
    resolver: Arc<dyn IdentityResolver>,
}

impl Announcer {
    pub fn new(resolver: Arc<dyn IdentityResolver>) -> Self {
        Self { resolver }
    }

    /// `"Pickups: duel (1/2) 2v2tdm (1/4)"`, or just the prefix when idle
    pub fn pickup_text(&self, active: &[ActiveQueue]) -> String {
        let games: Vec<String> = active
            .iter()
            .map(|queue| format!("{} ({}/{})", queue.gametype, queue.count, queue.required))
            .collect();
        format!("{}{}", PICKUP_TEXT_PREFIX, games.join(" "))
    }

    /// One `"duel (1/2): alice, bob"` line per active gametype, in join order
    pub fn who_lines(&self, active: &[ActiveQueue]) -> Vec<String> {
        active
            .iter()
            .map(|queue| {
                let names: Vec<String> = queue
                    .players
                    .iter()
                    .map(|player| self.resolver.display_name(player, player.platform))
                    .collect();
                format!(
                    "{} ({}/{}): {}",
                    queue.gametype,
                    queue.count,
                    queue.required,
                    names.join(", ")
                )
            })
            .collect()
    }

    /// Announcement of a formed match on every platform
    pub fn match_text(&self, formed: &Match) -> PlatformText {
        let mut text = PlatformText::default();
        for platform in Platform::ALL {
            text.set(platform, self.match_lines(formed, platform).join("\n"));
        }
        text
    }

    /// Lines announcing `formed` to `platform`
    pub fn match_lines(&self, formed: &Match, platform: Platform) -> Vec<String> {
        let headline = if formed.forced {
            format!("{} was started with {} players!", formed.gametype, formed.player_count())
        } else {
            format!("{} is ready!", formed.gametype)
        };

        if !formed.has_teams {
            let names = self.names(&formed.players(), platform);
            return vec![format!("{} Players: {}", headline, names.join(", "))];
        }

        let mut lines = vec![headline];
        for (index, team) in formed.teams.iter().enumerate() {
            let names = self.names(team, platform);
            match formed.captains.iter().find(|captain| team.contains(captain)) {
                Some(captain) => lines.push(format!(
                    "Team {} (captain: {}): {}",
                    index + 1,
                    self.resolver.display_name(captain, platform),
                    names.join(", ")
                )),
                None => lines.push(format!("Team {}: {}", index + 1, names.join(", "))),
            }
        }
        lines
    }

    /// Notice sent to a player whose reservation is about to expire
    pub fn warning_text(&self, warning: &ExpiryWarning) -> String {
        let minutes = warning.expires_in.as_secs().div_ceil(60);
        format!(
            "{} your added games will expire in {} minutes, type !renew to renew your games",
            self.resolver
                .display_name(&warning.player, warning.player.platform),
            minutes
        )
    }

    /// Broadcast listing reservations removed by the expiry scheduler
    pub fn eviction_text(&self, evicted: &[Eviction]) -> String {
        let removed: Vec<String> = evicted
            .iter()
            .map(|eviction| format!("{} ({})", eviction.player.handle, eviction.gametype))
            .collect();
        format!("Removed inactive players: {}", removed.join(", "))
    }

    /// Notice pinging one subscriber about a promoted gametype
    pub fn promotion_notice(&self, player: &PlayerIdentity, broadcast: &str) -> String {
        format!(
            "{}: {}",
            self.resolver.display_name(player, player.platform),
            broadcast
        )
    }

    fn names(&self, players: &[PlayerIdentity], platform: Platform) -> Vec<String> {
        players
            .iter()
            .map(|player| self.resolver.display_name(player, platform))
            .collect()
    }
}
