//! Subscription registry
//!
//! Tracks which players want to hear about which gametypes. Membership is
//! a plain set per gametype and never expires on its own.

use crate::types::PlayerIdentity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A single (gametype, player) interest record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subscription {
    pub gametype: String,
    pub player: PlayerIdentity,
}

/// Set of subscribers per gametype
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    by_gametype: BTreeMap<String, BTreeSet<PlayerIdentity>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_subscriptions(subscriptions: Vec<Subscription>) -> Self {
        let mut registry = Self::new();
        for subscription in subscriptions {
            registry.subscribe(subscription.player, &subscription.gametype);
        }
        registry
    }

    /// Returns true if the subscription is new
    pub fn subscribe(&mut self, player: PlayerIdentity, gametype: &str) -> bool {
        self.by_gametype
            .entry(gametype.to_string())
            .or_default()
            .insert(player)
    }

    /// Returns true if a subscription was removed
    pub fn unsubscribe(&mut self, player: &PlayerIdentity, gametype: &str) -> bool {
        let removed = match self.by_gametype.get_mut(gametype) {
            Some(subscribers) => subscribers.remove(player),
            None => false,
        };
        if self
            .by_gametype
            .get(gametype)
            .is_some_and(|subscribers| subscribers.is_empty())
        {
            self.by_gametype.remove(gametype);
        }
        removed
    }

    /// Remove every subscription of `player`, returning the gametypes left
    pub fn unsubscribe_all(&mut self, player: &PlayerIdentity) -> Vec<String> {
        let gametypes = self.subscriptions_of(player);
        for gametype in &gametypes {
            self.unsubscribe(player, gametype);
        }
        gametypes
    }

    /// Drop every subscription to `gametype`, returning how many there were
    pub fn clear_gametype(&mut self, gametype: &str) -> usize {
        self.by_gametype
            .remove(gametype)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    pub fn subscriptions_of(&self, player: &PlayerIdentity) -> Vec<String> {
        self.by_gametype
            .iter()
            .filter(|(_, subscribers)| subscribers.contains(player))
            .map(|(gametype, _)| gametype.clone())
            .collect()
    }

    pub fn subscribers_of(&self, gametype: &str) -> Vec<PlayerIdentity> {
        self.by_gametype
            .get(gametype)
            .map(|subscribers| subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, player: &PlayerIdentity, gametype: &str) -> bool {
        self.by_gametype
            .get(gametype)
            .is_some_and(|subscribers| subscribers.contains(player))
    }

    /// Flatten into records for persistence
    pub fn to_subscriptions(&self) -> Vec<Subscription> {
        self.by_gametype
            .iter()
            .flat_map(|(gametype, subscribers)| {
                subscribers.iter().map(move |player| Subscription {
                    gametype: gametype.clone(),
                    player: player.clone(),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_gametype.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_gametype.is_empty()
    }
}
