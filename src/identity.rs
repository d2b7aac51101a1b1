//! Cross-platform identity lookup
//!
//! A player registered on several platforms is announced under the name
//! their audience knows on each one. Linking itself is managed elsewhere;
//! the engine only consumes the lookup.

use crate::types::{Platform, PlayerIdentity};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::warn;

/// Names of one player on every platform they linked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkedIdentities {
    pub irc: Option<String>,
    pub discord: Option<String>,
    pub matrix: Option<String>,
}

impl LinkedIdentities {
    /// Identities of a player that has linked nothing besides `player`
    pub fn only(player: &PlayerIdentity) -> Self {
        let mut linked = Self::default();
        linked.set(player.platform, player.handle.clone());
        linked
    }

    pub fn get(&self, platform: Platform) -> Option<&str> {
        match platform {
            Platform::Irc => self.irc.as_deref(),
            Platform::Discord => self.discord.as_deref(),
            Platform::Matrix => self.matrix.as_deref(),
        }
    }

    pub fn set(&mut self, platform: Platform, handle: String) {
        let slot = match platform {
            Platform::Irc => &mut self.irc,
            Platform::Discord => &mut self.discord,
            Platform::Matrix => &mut self.matrix,
        };
        *slot = Some(handle);
    }
}

/// Resolves a player to their linked identities
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, player: &PlayerIdentity) -> LinkedIdentities;

    /// Name to show for `player` on `platform`, falling back to the raw handle
    fn display_name(&self, player: &PlayerIdentity, platform: Platform) -> String {
        self.resolve(player)
            .get(platform)
            .map(str::to_string)
            .unwrap_or_else(|| player.handle.clone())
    }
}

/// Resolver for deployments without account linking
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLinks;

impl IdentityResolver for NoLinks {
    fn resolve(&self, player: &PlayerIdentity) -> LinkedIdentities {
        LinkedIdentities::only(player)
    }
}

/// In-memory table of linked accounts
#[derive(Debug, Default)]
pub struct InMemoryIdentityDirectory {
    links: RwLock<HashMap<PlayerIdentity, LinkedIdentities>>,
}

impl InMemoryIdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link every identity in `identities` to the same account
    pub fn link(&self, identities: &[PlayerIdentity]) {
        let mut linked = LinkedIdentities::default();
        for identity in identities {
            linked.set(identity.platform, identity.handle.clone());
        }

        match self.links.write() {
            Ok(mut links) => {
                for identity in identities {
                    links.insert(identity.clone(), linked.clone());
                }
            }
            Err(_) => warn!("Identity directory lock poisoned, link dropped"),
        }
    }

    pub fn len(&self) -> usize {
        self.links.read().map(|links| links.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IdentityResolver for InMemoryIdentityDirectory {
    fn resolve(&self, player: &PlayerIdentity) -> LinkedIdentities {
        self.links
            .read()
            .ok()
            .and_then(|links| links.get(player).cloned())
            .unwrap_or_else(|| LinkedIdentities::only(player))
    }
}
