//! Promotion target computation
//!
//! Presence is a platform concern, so the online check is supplied by the
//! caller. Nothing here delivers messages.

use crate::types::{PlayerIdentity, Promotion};

/// Answers whether a player is currently reachable on their platform
pub trait Presence: Send + Sync {
    fn is_online(&self, player: &PlayerIdentity) -> bool;
}

impl<F> Presence for F
where
    F: Fn(&PlayerIdentity) -> bool + Send + Sync,
{
    fn is_online(&self, player: &PlayerIdentity) -> bool {
        self(player)
    }
}

/// Presence source that treats everyone as online
#[derive(Debug, Default, Clone, Copy)]
pub struct EveryoneOnline;

impl Presence for EveryoneOnline {
    fn is_online(&self, _player: &PlayerIdentity) -> bool {
        true
    }
}

/// Broadcast line inviting players to a queue
pub fn promotion_text(gametype: &str, count: usize, required: usize) -> String {
    format!("{} ({}/{}) please add!", gametype, count, required)
}

/// Subscribers that are online and not already waiting in the queue
pub fn promotion_targets(
    subscribers: Vec<PlayerIdentity>,
    queued: &[PlayerIdentity],
    presence: &dyn Presence,
) -> Vec<PlayerIdentity> {
    subscribers
        .into_iter()
        .filter(|player| !queued.contains(player))
        .filter(|player| presence.is_online(player))
        .collect()
}

/// Assemble the promotion for a gametype
pub fn build_promotion(
    gametype: &str,
    required: usize,
    subscribers: Vec<PlayerIdentity>,
    queued: &[PlayerIdentity],
    presence: &dyn Presence,
) -> Promotion {
    Promotion {
        gametype: gametype.to_string(),
        broadcast: promotion_text(gametype, queued.len(), required),
        notify: promotion_targets(subscribers, queued, presence),
    }
}
