//! Per-gametype queue of pending reservations
//!
//! A `GametypeQueue` is the unit of mutual exclusion: every add, withdraw,
//! renew, eviction and match drain happens while its mutex is held, so a
//! queue is never observed over-full or half-drained.

use crate::error::PickupError;
use crate::expiry::policy::ExpiryPolicy;
use crate::types::{Eviction, ExpiryWarning, Gametype, PlayerIdentity, QueueEntry};
use chrono::{DateTime, Utc};
use tracing::{debug, error};

/// Entries removed or flagged by one expiry pass over a queue
#[derive(Debug, Default)]
pub struct ExpiryStep {
    pub evicted: Vec<Eviction>,
    pub warned: Vec<ExpiryWarning>,
    /// Earliest deadline still pending after the pass
    pub next_deadline: Option<DateTime<Utc>>,
}

/// Ordered set of reservations for one gametype
#[derive(Debug)]
pub struct GametypeQueue {
    gametype: Gametype,
    entries: Vec<QueueEntry>,
    next_seq: u64,
    /// Set once the gametype is removed from the registry
    retired: bool,
}

impl GametypeQueue {
    pub fn new(gametype: Gametype) -> Self {
        Self {
            gametype,
            entries: Vec::new(),
            next_seq: 0,
            retired: false,
        }
    }

    pub fn gametype(&self) -> &Gametype {
        &self.gametype
    }

    pub fn title(&self) -> &str {
        &self.gametype.title
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.gametype.required_players
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn contains(&self, player: &PlayerIdentity) -> bool {
        self.entries.iter().any(|entry| &entry.player == player)
    }

    /// Insert a reservation for `player`
    pub fn add(&mut self, player: PlayerIdentity, now: DateTime<Utc>) -> Result<(), PickupError> {
        if self.retired {
            return Err(PickupError::unknown_gametype(self.title()));
        }

        if self.contains(&player) {
            return Err(PickupError::AlreadyQueued {
                player: player.handle,
                gametype: self.gametype.title.clone(),
            });
        }

        // A full queue is drained in the same critical section that filled it
        if self.is_full() {
            error!(
                "Queue {} already holds {}/{} entries, refusing insert of '{}'",
                self.gametype.title,
                self.entries.len(),
                self.gametype.required_players,
                player.handle
            );
            return Err(PickupError::Internal {
                message: format!("queue {} is over capacity", self.gametype.title),
            });
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        debug!(
            "Queued '{}' ({}) for {} - {}/{}",
            player.handle,
            player.platform,
            self.gametype.title,
            self.entries.len() + 1,
            self.gametype.required_players
        );

        self.entries.push(QueueEntry {
            gametype: self.gametype.title.clone(),
            player,
            joined_at: now,
            warned_at: None,
            seq,
        });
        Ok(())
    }

    /// Remove the reservation of `player`, returning whether one existed
    pub fn withdraw(&mut self, player: &PlayerIdentity) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| &entry.player != player);
        before != self.entries.len()
    }

    /// Reset the join time of `player`, returning whether they were queued
    pub fn renew(&mut self, player: &PlayerIdentity, now: DateTime<Utc>) -> bool {
        match self.entries.iter_mut().find(|entry| &entry.player == player) {
            Some(entry) => {
                entry.joined_at = now;
                entry.warned_at = None;
                true
            }
            None => false,
        }
    }

    /// Entries ordered by join time, ties broken by insertion order
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        let mut entries = self.entries.clone();
        sort_entries(&mut entries);
        entries
    }

    pub fn players(&self) -> Vec<PlayerIdentity> {
        self.snapshot().into_iter().map(|entry| entry.player).collect()
    }

    /// Pop every entry in match order, leaving the queue empty
    pub fn drain_ordered(&mut self) -> Vec<QueueEntry> {
        let mut entries: Vec<_> = self.entries.drain(..).collect();
        sort_entries(&mut entries);
        entries
    }

    /// Drain the queue and refuse any further inserts
    pub fn retire(&mut self) -> usize {
        self.retired = true;
        self.entries.drain(..).count()
    }

    /// Evict expired entries, flag entries due a warning and report the
    /// next pending deadline
    pub fn expire(&mut self, now: DateTime<Utc>, policy: &ExpiryPolicy) -> ExpiryStep {
        let mut step = ExpiryStep::default();
        let title = self.gametype.title.clone();

        self.entries.retain(|entry| {
            if policy.delete_deadline(entry) <= now {
                step.evicted.push(Eviction {
                    gametype: title.clone(),
                    player: entry.player.clone(),
                    joined_at: entry.joined_at,
                });
                false
            } else {
                true
            }
        });

        for entry in self.entries.iter_mut() {
            if entry.warned_at.is_none() && policy.warn_deadline(entry) <= now {
                entry.warned_at = Some(now);
                step.warned.push(ExpiryWarning {
                    gametype: title.clone(),
                    player: entry.player.clone(),
                    expires_in: policy.remaining(entry, now),
                });
            }
        }

        step.next_deadline = self
            .entries
            .iter()
            .map(|entry| policy.next_deadline(entry))
            .min();

        step
    }
}

fn sort_entries(entries: &mut [QueueEntry]) {
    entries.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.seq.cmp(&b.seq)));
}
