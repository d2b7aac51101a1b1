//! Test fixtures and builders for integration testing

#![allow(dead_code)]

use pickup_room::announce::{Announcer, MockPublisher};
use pickup_room::command::{CommandDispatcher, Reply};
use pickup_room::expiry::ExpiryPolicy;
use pickup_room::identity::NoLinks;
use pickup_room::pickup::{PickupManager, PickupOptions};
use pickup_room::subscription::{EveryoneOnline, Presence};
use pickup_room::types::{Gametype, PlayerIdentity};
use pickup_room::utils::ManualClock;
use std::sync::Arc;

/// Gametypes most tests run against
pub fn standard_gametypes() -> Vec<Gametype> {
    vec![
        Gametype::new("duel", 2, 2, Some("duel".to_string())).unwrap(),
        Gametype::new("2v2tdm", 4, 2, Some("tdm".to_string())).unwrap(),
        Gametype::new("ffa", 3, 1, None).unwrap(),
    ]
}

/// Manager with the standard gametypes and a clock the test controls
pub fn create_test_manager(options: PickupOptions) -> (Arc<PickupManager>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let manager = PickupManager::new(options).with_clock(clock.clone());
    manager.seed_gametypes(standard_gametypes()).unwrap();
    (Arc::new(manager), clock)
}

/// Manager on the real clock with a short expiry, for scheduler tests
pub fn create_fast_expiry_manager(warn_ms: i64, delete_ms: i64) -> Arc<PickupManager> {
    let options = PickupOptions {
        expiry: ExpiryPolicy::new(
            chrono::Duration::milliseconds(warn_ms),
            chrono::Duration::milliseconds(delete_ms),
        ),
        ..PickupOptions::default()
    };
    let manager = PickupManager::new(options);
    manager.seed_gametypes(standard_gametypes()).unwrap();
    Arc::new(manager)
}

pub fn test_announcer() -> Announcer {
    Announcer::new(Arc::new(NoLinks))
}

/// Complete command-handling system around a fresh manager
pub struct TestSystem {
    pub manager: Arc<PickupManager>,
    pub clock: Arc<ManualClock>,
    pub dispatcher: CommandDispatcher,
    pub publisher: Arc<MockPublisher>,
}

impl TestSystem {
    pub fn new() -> Self {
        Self::with_presence(Arc::new(EveryoneOnline))
    }

    pub fn with_presence(presence: Arc<dyn Presence>) -> Self {
        let (manager, clock) = create_test_manager(PickupOptions::default());
        let dispatcher = CommandDispatcher::new(manager.clone(), test_announcer(), presence);
        Self {
            manager,
            clock,
            dispatcher,
            publisher: Arc::new(MockPublisher::new()),
        }
    }

    /// Run a chat line from a regular player
    pub fn say(&self, player: &PlayerIdentity, line: &str) -> Vec<Reply> {
        self.dispatcher.handle_line(player.clone(), false, line)
    }

    /// Run a chat line from an operator
    pub fn op(&self, player: &PlayerIdentity, line: &str) -> Vec<Reply> {
        self.dispatcher.handle_line(player.clone(), true, line)
    }
}

pub fn irc(handle: &str) -> PlayerIdentity {
    PlayerIdentity::irc(handle)
}

/// Notice texts addressed to `player`
pub fn notices_for(replies: &[Reply], player: &PlayerIdentity) -> Vec<String> {
    replies
        .iter()
        .filter_map(|reply| match reply {
            Reply::Notice { to, text } if to == player => Some(text.clone()),
            _ => None,
        })
        .collect()
}

/// Broadcast texts as rendered for IRC
pub fn broadcasts(replies: &[Reply]) -> Vec<String> {
    replies
        .iter()
        .filter_map(|reply| match reply {
            Reply::Broadcast(text) => Some(text.irc.clone()),
            _ => None,
        })
        .collect()
}

pub fn topic(replies: &[Reply]) -> Option<String> {
    replies.iter().rev().find_map(|reply| match reply {
        Reply::Topic(text) => Some(text.clone()),
        _ => None,
    })
}
