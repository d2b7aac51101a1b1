//! Gametype registry
//!
//! The catalog of configured gametypes. Each registered gametype owns the
//! queue that collects its reservations, so looking a title up yields the
//! critical section for that gametype.

use crate::error::PickupError;
use crate::pickup::queue::GametypeQueue;
use crate::types::Gametype;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Shared handle to one gametype's queue
pub type SharedQueue = Arc<Mutex<GametypeQueue>>;

#[derive(Debug)]
struct Slot {
    gametype: Gametype,
    queue: SharedQueue,
}

/// Catalog of gametypes keyed by title
#[derive(Debug, Default)]
pub struct GametypeRegistry {
    slots: BTreeMap<String, Slot>,
}

impl GametypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of gametypes, rejecting duplicates
    pub fn with_gametypes(gametypes: Vec<Gametype>) -> Result<Self, PickupError> {
        let mut registry = Self::new();
        for gametype in gametypes {
            registry.register(gametype)?;
        }
        Ok(registry)
    }

    /// Register a new gametype and create its empty queue
    pub fn register(&mut self, gametype: Gametype) -> Result<SharedQueue, PickupError> {
        gametype.validate()?;

        if self.slots.contains_key(&gametype.title) {
            return Err(PickupError::DuplicateGametype {
                gametype: gametype.title,
            });
        }

        let queue = Arc::new(Mutex::new(GametypeQueue::new(gametype.clone())));
        self.slots.insert(
            gametype.title.clone(),
            Slot {
                gametype,
                queue: Arc::clone(&queue),
            },
        );
        Ok(queue)
    }

    /// Remove a gametype, handing back its queue so the caller can drain it
    pub fn unregister(&mut self, title: &str) -> Result<SharedQueue, PickupError> {
        self.slots
            .remove(title.trim())
            .map(|slot| slot.queue)
            .ok_or_else(|| PickupError::unknown_gametype(title))
    }

    pub fn get(&self, title: &str) -> Result<&Gametype, PickupError> {
        self.slots
            .get(title.trim())
            .map(|slot| &slot.gametype)
            .ok_or_else(|| PickupError::unknown_gametype(title))
    }

    pub fn queue(&self, title: &str) -> Result<SharedQueue, PickupError> {
        self.slots
            .get(title.trim())
            .map(|slot| Arc::clone(&slot.queue))
            .ok_or_else(|| PickupError::unknown_gametype(title))
    }

    pub fn contains(&self, title: &str) -> bool {
        self.slots.contains_key(title.trim())
    }

    /// All gametypes ordered by title
    pub fn list(&self) -> Vec<Gametype> {
        self.slots.values().map(|slot| slot.gametype.clone()).collect()
    }

    pub fn titles(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    /// Every queue ordered by title
    pub fn queues(&self) -> Vec<SharedQueue> {
        self.slots
            .values()
            .map(|slot| Arc::clone(&slot.queue))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
