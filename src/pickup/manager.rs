//! Pickup manager
//!
//! `PickupManager` owns the gametype registry, the per-gametype queues, the
//! subscription registry and the expiry scheduler flag. Every chat command
//! ends up here, as does the scheduler's periodic `tick`.
//!
//! Lock order is scheduler flag, then registry, then subscriptions or a
//! single queue. Adds never hold a queue lock while arming the scheduler.
//! Adds and forced starts take the formation lock before the registry and
//! keep it until a formed match's players have left every other queue.

use crate::error::{PickupError, Result};
use crate::expiry::policy::ExpiryPolicy;
use crate::expiry::scheduler::{SchedulerHandle, SchedulerState};
use crate::metrics::MetricsCollector;
use crate::pickup::queue::GametypeQueue;
use crate::pickup::registry::{GametypeRegistry, SharedQueue};
use crate::pickup::teams::{form_match, RoundRobinAssigner, TeamAssigner};
use crate::storage::{InMemoryStateStore, PersistedState, StateStore};
use crate::subscription::{build_promotion, Presence, SubscriptionRegistry};
use crate::types::{
    ActiveQueue, AddOutcome, Gametype, GametypeRemoval, Match, PlayerIdentity, Promotion,
    QueueEntry, RemoveGametypesOutcome, TickReport,
};
use crate::utils::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What `force_start` does with a queue below capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialStartPolicy {
    /// Start with exactly the players present
    #[default]
    Present,
    /// Refuse with `NotEnoughPlayers`
    Reject,
}

impl std::str::FromStr for PartialStartPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "present" => Ok(PartialStartPolicy::Present),
            "reject" => Ok(PartialStartPolicy::Reject),
            other => Err(format!("Unknown partial start policy: {}", other)),
        }
    }
}

/// Behaviour switches of the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickupOptions {
    pub expiry: ExpiryPolicy,
    pub partial_start: PartialStartPolicy,
    /// Drop matched players from the other queues they were waiting in
    pub withdraw_matched_elsewhere: bool,
}

impl Default for PickupOptions {
    fn default() -> Self {
        Self {
            expiry: ExpiryPolicy::default(),
            partial_start: PartialStartPolicy::default(),
            withdraw_matched_elsewhere: true,
        }
    }
}

/// Statistics about pickup manager operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickupStats {
    /// Registered gametypes
    pub gametypes: usize,
    /// Stored subscriptions
    pub subscriptions: usize,
    /// Players currently waiting, over all queues
    pub players_waiting: usize,
    /// Players waiting per gametype (all registered gametypes)
    pub waiting_by_gametype: BTreeMap<String, usize>,
    pub scheduler_armed: bool,
    /// Reservations inserted since start
    pub players_queued: u64,
    /// Matches formed since start
    pub matches_formed: u64,
    pub evictions: u64,
    pub warnings: u64,
}

#[derive(Debug, Default)]
struct Counters {
    players_queued: u64,
    matches_formed: u64,
    evictions: u64,
    warnings: u64,
}

/// The pickup matchmaking engine
pub struct PickupManager {
    registry: RwLock<GametypeRegistry>,
    subscriptions: RwLock<SubscriptionRegistry>,
    scheduler: Arc<SchedulerHandle>,
    clock: Arc<dyn Clock>,
    assigner: Arc<dyn TeamAssigner>,
    store: Arc<dyn StateStore>,
    options: PickupOptions,
    counters: Mutex<Counters>,
    /// Serializes snapshot-and-save so saves land in mutation order
    persist_lock: Mutex<()>,
    /// Held from a queue mutation that may form a match until the matched
    /// players are gone from every other queue
    formation_lock: Mutex<()>,
    metrics: Arc<MetricsCollector>,
}

impl PickupManager {
    /// Create an empty manager with in-memory persistence
    pub fn new(options: PickupOptions) -> Self {
        Self::with_metrics(options, Arc::new(MetricsCollector::default()))
    }

    /// Create an empty manager reporting to `metrics`
    pub fn with_metrics(options: PickupOptions, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            registry: RwLock::new(GametypeRegistry::new()),
            subscriptions: RwLock::new(SubscriptionRegistry::new()),
            scheduler: Arc::new(SchedulerHandle::new()),
            clock: Arc::new(SystemClock),
            assigner: Arc::new(RoundRobinAssigner::default()),
            store: Arc::new(InMemoryStateStore::new()),
            options,
            counters: Mutex::new(Counters::default()),
            persist_lock: Mutex::new(()),
            formation_lock: Mutex::new(()),
            metrics,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_assigner(mut self, assigner: Arc<dyn TeamAssigner>) -> Self {
        self.assigner = assigner;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = store;
        self
    }

    /// Restore gametypes and subscriptions from the state store
    pub fn load_state(&self) -> Result<usize> {
        let state = self.store.load()?;
        let mut restored = 0;

        let mut registry = self.write_registry()?;
        for gametype in state.gametypes {
            let title = gametype.title.clone();
            match registry.register(gametype) {
                Ok(_) => restored += 1,
                Err(e) => warn!("Skipping persisted gametype '{}': {}", title, e),
            }
        }

        let mut subscriptions = self.write_subscriptions()?;
        for subscription in state.subscriptions {
            if registry.contains(&subscription.gametype) {
                subscriptions.subscribe(subscription.player, &subscription.gametype);
            } else {
                warn!(
                    "Dropping subscription of '{}' to unknown gametype '{}'",
                    subscription.player.handle, subscription.gametype
                );
            }
        }

        info!(
            "Restored {} gametypes and {} subscriptions",
            restored,
            subscriptions.len()
        );
        Ok(restored)
    }

    /// Register configured gametypes that are not known yet
    pub fn seed_gametypes(&self, gametypes: Vec<Gametype>) -> Result<usize> {
        let mut added = 0;
        {
            let mut registry = self.write_registry()?;
            for gametype in gametypes {
                if registry.contains(&gametype.title) {
                    debug!("Gametype '{}' already registered", gametype.title);
                    continue;
                }
                registry.register(gametype)?;
                added += 1;
            }
        }

        if added > 0 {
            info!("Seeded {} gametypes from configuration", added);
            self.persist()?;
        }
        Ok(added)
    }

    pub fn options(&self) -> &PickupOptions {
        &self.options
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn scheduler(&self) -> Arc<SchedulerHandle> {
        Arc::clone(&self.scheduler)
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    // ---- queue operations ----

    /// Add `player` to each gametype in order.
    ///
    /// Stops at the first gametype whose queue fills up; the formed match is
    /// returned and the remaining gametypes are not processed.
    pub fn add_player(
        &self,
        player: &PlayerIdentity,
        gametypes: &[String],
        on_behalf_of: Option<&PlayerIdentity>,
    ) -> AddOutcome {
        let timer = self.metrics.start_timer();
        let now = self.clock.now();
        let mut outcome = AddOutcome::default();

        match on_behalf_of {
            Some(admin) => info!(
                "'{}' pushes '{}' ({}) into {:?}",
                admin.handle, player.handle, player.platform, gametypes
            ),
            None => info!(
                "'{}' ({}) adds to {:?}",
                player.handle, player.platform, gametypes
            ),
        }

        match self.formation() {
            Ok(_formation) => {
                let mut seen = BTreeSet::new();
                for title in gametypes {
                    let title = title.trim();
                    if !seen.insert(title) {
                        continue;
                    }

                    match self.add_to_queue(player, title, now) {
                        Ok(formed) => {
                            outcome.added.push(title.to_string());
                            self.metrics.record_player_queued(title);

                            if let Some((formed, waits)) = formed {
                                self.record_match(&formed, &waits);
                                outcome.match_formed = Some(formed);
                                break;
                            }
                        }
                        Err(e) => {
                            debug!("Add of '{}' to {} refused: {}", player.handle, title, e);
                            outcome.errors.push(e);
                        }
                    }
                }

                if let Some(formed) = &outcome.match_formed {
                    if self.options.withdraw_matched_elsewhere {
                        self.withdraw_matched(formed);
                    }
                }
            }
            Err(e) => outcome.errors.push(e),
        }

        outcome.ok = !outcome.added.is_empty();

        if outcome.ok {
            self.bump(|counters| counters.players_queued += outcome.added.len() as u64);
            self.arm_scheduler(&mut outcome.errors);
        }

        self.metrics.record_operation("add", timer.stop());
        outcome
    }

    /// Admin wrapper over `add_player` for an arbitrary identity
    pub fn push(
        &self,
        player: &PlayerIdentity,
        gametypes: &[String],
        admin: &PlayerIdentity,
    ) -> AddOutcome {
        self.add_player(player, gametypes, Some(admin))
    }

    /// Remove `player` from the given gametypes (all when `None` or empty).
    ///
    /// Returns the number of entries removed. Unknown titles are skipped.
    pub fn withdraw_player(&self, player: &PlayerIdentity, gametypes: Option<&[String]>) -> usize {
        let timer = self.metrics.start_timer();
        let removed = self.withdraw_from(player, gametypes, "withdraw");
        self.metrics.record_operation("withdraw", timer.stop());

        if removed > 0 {
            info!("'{}' withdrew from {} queue(s)", player.handle, removed);
        } else {
            debug!("'{}' had nothing to withdraw", player.handle);
        }
        removed
    }

    /// Admin wrapper removing `player` from every queue
    pub fn pull(&self, player: &PlayerIdentity, admin: &PlayerIdentity) -> usize {
        let removed = self.withdraw_from(player, None, "pulled");
        info!(
            "'{}' pulled '{}' from {} queue(s)",
            admin.handle, player.handle, removed
        );
        removed
    }

    /// Reset the join time of `player`'s entries.
    ///
    /// An empty list renews every entry the player holds. Failures are
    /// reported per gametype without aborting the rest.
    pub fn renew(&self, player: &PlayerIdentity, gametypes: &[String]) -> Vec<PickupError> {
        let now = self.clock.now();
        let mut errors = Vec::new();

        if gametypes.is_empty() {
            let queues = match self.read_registry() {
                Ok(registry) => registry.queues(),
                Err(e) => return vec![e],
            };

            let mut renewed = 0;
            for queue in queues {
                match lock_queue(&queue) {
                    Ok(mut queue) => {
                        if queue.renew(player, now) {
                            renewed += 1;
                        }
                    }
                    Err(e) => errors.push(e),
                }
            }

            if renewed == 0 && errors.is_empty() {
                errors.push(PickupError::NothingQueued {
                    player: player.handle.clone(),
                });
            }
            info!("'{}' renewed {} entries", player.handle, renewed);
            return errors;
        }

        for title in gametypes {
            let result = self.queue_for(title).and_then(|queue| {
                let mut queue = lock_queue(&queue)?;
                if queue.renew(player, now) {
                    Ok(())
                } else {
                    Err(PickupError::NotQueued {
                        player: player.handle.clone(),
                        gametype: queue.title().to_string(),
                    })
                }
            });

            match result {
                Ok(()) => debug!("'{}' renewed {}", player.handle, title),
                Err(e) => errors.push(e),
            }
        }
        errors
    }

    /// Form a match from whatever is queued for `gametype`
    pub fn force_start(&self, gametype: &str) -> std::result::Result<Match, PickupError> {
        let timer = self.metrics.start_timer();
        let now = self.clock.now();
        let _formation = self.formation()?;

        let (formed, waits) = {
            let queue = self.queue_for(gametype)?;
            let mut queue = lock_queue(&queue)?;

            if queue.is_empty() {
                return Err(PickupError::EmptyQueue {
                    gametype: queue.title().to_string(),
                });
            }

            let required = queue.gametype().required_players;
            if queue.len() < required && self.options.partial_start == PartialStartPolicy::Reject
            {
                return Err(PickupError::NotEnoughPlayers {
                    gametype: queue.title().to_string(),
                    present: queue.len(),
                    required,
                });
            }

            let entries = queue.drain_ordered();
            self.form_from_entries(queue.gametype(), entries, now, true)
        };

        self.record_match(&formed, &waits);
        if self.options.withdraw_matched_elsewhere {
            self.withdraw_matched(&formed);
        }

        self.metrics.record_operation("force_start", timer.stop());
        Ok(formed)
    }

    /// Entries of `gametype` in match order
    pub fn snapshot(&self, gametype: &str) -> std::result::Result<Vec<QueueEntry>, PickupError> {
        let queue = self.queue_for(gametype)?;
        let queue = lock_queue(&queue)?;
        Ok(queue.snapshot())
    }

    /// Whether any gametype has at least one entry
    pub fn has_active(&self) -> std::result::Result<bool, PickupError> {
        let queues = self.read_registry()?.queues();
        for queue in queues {
            if !lock_queue(&queue)?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Every non-empty queue ordered by title
    pub fn list_active(&self) -> std::result::Result<Vec<ActiveQueue>, PickupError> {
        let queues = self.read_registry()?.queues();
        let mut active = Vec::new();

        for queue in queues {
            let queue = lock_queue(&queue)?;
            if queue.is_empty() {
                continue;
            }

            let players: Vec<PlayerIdentity> = queue
                .snapshot()
                .into_iter()
                .map(|entry| entry.player)
                .collect();
            let mut players_by_platform: BTreeMap<_, Vec<String>> = BTreeMap::new();
            for player in &players {
                players_by_platform
                    .entry(player.platform)
                    .or_default()
                    .push(player.handle.clone());
            }

            active.push(ActiveQueue {
                gametype: queue.title().to_string(),
                count: queue.len(),
                required: queue.gametype().required_players,
                players,
                players_by_platform,
            });
        }
        Ok(active)
    }

    // ---- expiry ----

    /// Warn and evict entries whose deadlines have passed at `now`.
    ///
    /// Returns `next_wake_delay: None` only after switching the scheduler to
    /// idle with every queue confirmed empty.
    pub fn tick(&self, now: DateTime<Utc>) -> std::result::Result<TickReport, PickupError> {
        let timer = self.metrics.start_timer();
        let policy = self.options.expiry;
        let queues = self.read_registry()?.queues();

        let mut report = TickReport::default();
        let mut next_deadline: Option<DateTime<Utc>> = None;

        for queue in queues {
            let step = lock_queue(&queue)?.expire(now, &policy);
            report.evicted.extend(step.evicted);
            report.warned.extend(step.warned);
            next_deadline = match (next_deadline, step.next_deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }

        for eviction in &report.evicted {
            info!(
                "Evicted '{}' from {} (joined {})",
                eviction.player.handle, eviction.gametype, eviction.joined_at
            );
            self.metrics.record_eviction(&eviction.gametype);
        }
        for warning in &report.warned {
            debug!(
                "Warned '{}' about {} expiring in {:?}",
                warning.player.handle, warning.gametype, warning.expires_in
            );
            self.metrics.record_warning(&warning.gametype);
        }
        let (evicted, warned) = (report.evicted.len() as u64, report.warned.len() as u64);
        self.bump(|counters| {
            counters.evictions += evicted;
            counters.warnings += warned;
        });
        report.queue_text_changed = !report.evicted.is_empty();

        report.next_wake_delay = match next_deadline {
            Some(deadline) => Some((deadline - now).to_std().unwrap_or(Duration::ZERO)),
            None => {
                // Re-check under the flag so a concurrent add is never missed
                let mut state = self.scheduler.lock()?;
                if self.has_active()? {
                    Some(Duration::ZERO)
                } else {
                    if *state == SchedulerState::Armed {
                        info!("No reservations left, expiry scheduler going idle");
                    }
                    *state = SchedulerState::Idle;
                    self.metrics.set_scheduler_armed(false);
                    None
                }
            }
        };

        self.metrics.record_tick(timer.stop());
        Ok(report)
    }

    // ---- gametype registry ----

    pub fn add_gametype(&self, gametype: Gametype) -> std::result::Result<(), PickupError> {
        let title = gametype.title.clone();
        self.write_registry()?.register(gametype)?;
        info!("Gametype '{}' added", title);
        self.persist()
    }

    /// Remove gametypes, clearing their queues and subscriptions
    pub fn remove_gametypes(&self, titles: &[String]) -> RemoveGametypesOutcome {
        let mut outcome = RemoveGametypesOutcome::default();

        for title in titles {
            match self.remove_gametype(title) {
                Ok(removal) => {
                    info!(
                        "Gametype '{}' removed ({} entries, {} subscriptions cleared)",
                        removal.gametype, removal.cleared_entries, removal.cleared_subscriptions
                    );
                    self.metrics.forget_gametype(&removal.gametype);
                    outcome.removed.push(removal);
                }
                Err(e) => outcome.errors.push(e),
            }
        }

        if !outcome.removed.is_empty() {
            if let Err(e) = self.persist() {
                outcome.errors.push(e);
            }
        }
        outcome
    }

    pub fn list_gametypes(&self) -> std::result::Result<Vec<Gametype>, PickupError> {
        Ok(self.read_registry()?.list())
    }

    pub fn gametype(&self, title: &str) -> std::result::Result<Gametype, PickupError> {
        self.read_registry()?.get(title).cloned()
    }

    // ---- subscriptions ----

    /// Returns true if the subscription is new
    pub fn subscribe(
        &self,
        player: &PlayerIdentity,
        gametype: &str,
    ) -> std::result::Result<bool, PickupError> {
        let created = {
            let registry = self.read_registry()?;
            let title = registry.get(gametype)?.title.clone();
            self.write_subscriptions()?.subscribe(player.clone(), &title)
        };

        if created {
            info!("'{}' subscribed to {}", player.handle, gametype.trim());
            self.persist()?;
        }
        Ok(created)
    }

    /// Remove one subscription, or all of them when `gametype` is `None`.
    ///
    /// Returns the gametypes that were unsubscribed.
    pub fn unsubscribe(
        &self,
        player: &PlayerIdentity,
        gametype: Option<&str>,
    ) -> std::result::Result<Vec<String>, PickupError> {
        let removed = {
            let mut subscriptions = self.write_subscriptions()?;
            match gametype {
                Some(title) => {
                    let title = title.trim();
                    if subscriptions.unsubscribe(player, title) {
                        vec![title.to_string()]
                    } else {
                        Vec::new()
                    }
                }
                None => subscriptions.unsubscribe_all(player),
            }
        };

        if !removed.is_empty() {
            info!("'{}' unsubscribed from {:?}", player.handle, removed);
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn list_subscriptions(
        &self,
        player: &PlayerIdentity,
    ) -> std::result::Result<Vec<String>, PickupError> {
        Ok(self.read_subscriptions()?.subscriptions_of(player))
    }

    pub fn list_subscribers(
        &self,
        gametype: &str,
    ) -> std::result::Result<Vec<PlayerIdentity>, PickupError> {
        Ok(self.read_subscriptions()?.subscribers_of(gametype.trim()))
    }

    /// Invite subscribed, online players that are not queued yet
    pub fn promote(
        &self,
        gametype: &str,
        presence: &dyn Presence,
    ) -> std::result::Result<Promotion, PickupError> {
        let (title, queued, required) = {
            let queue = self.queue_for(gametype)?;
            let queue = lock_queue(&queue)?;
            (
                queue.title().to_string(),
                queue.players(),
                queue.gametype().required_players,
            )
        };

        if queued.is_empty() {
            warn!("No active pickup to promote for {}", title);
            return Err(PickupError::EmptyQueue { gametype: title });
        }

        let subscribers = self.read_subscriptions()?.subscribers_of(&title);
        let promotion = build_promotion(&title, required, subscribers, &queued, presence);
        info!(
            "Promoting {} to {} subscriber(s)",
            title,
            promotion.notify.len()
        );
        Ok(promotion)
    }

    // ---- statistics ----

    pub fn stats(&self) -> std::result::Result<PickupStats, PickupError> {
        let mut stats = PickupStats::default();

        {
            let registry = self.read_registry()?;
            stats.gametypes = registry.len();
            for queue in registry.queues() {
                let queue = lock_queue(&queue)?;
                stats.players_waiting += queue.len();
                stats
                    .waiting_by_gametype
                    .insert(queue.title().to_string(), queue.len());
            }
        }

        stats.subscriptions = self.read_subscriptions()?.len();
        stats.scheduler_armed = self.scheduler.is_armed();

        let counters = self
            .counters
            .lock()
            .map_err(|_| PickupError::lock_poisoned("stats"))?;
        stats.players_queued = counters.players_queued;
        stats.matches_formed = counters.matches_formed;
        stats.evictions = counters.evictions;
        stats.warnings = counters.warnings;

        Ok(stats)
    }

    // ---- internals ----

    /// Taken before any queue lock by operations that can form a match
    fn formation(&self) -> std::result::Result<MutexGuard<'_, ()>, PickupError> {
        self.formation_lock
            .lock()
            .map_err(|_| PickupError::lock_poisoned("match formation"))
    }

    fn add_to_queue(
        &self,
        player: &PlayerIdentity,
        title: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<Option<(Match, Vec<Duration>)>, PickupError> {
        let queue = self.queue_for(title)?;
        let mut queue = lock_queue(&queue)?;
        queue.add(player.clone(), now)?;

        if !queue.is_full() {
            return Ok(None);
        }

        let entries = queue.drain_ordered();
        Ok(Some(self.form_from_entries(
            queue.gametype(),
            entries,
            now,
            false,
        )))
    }

    fn form_from_entries(
        &self,
        gametype: &Gametype,
        entries: Vec<QueueEntry>,
        now: DateTime<Utc>,
        forced: bool,
    ) -> (Match, Vec<Duration>) {
        let waits = entries
            .iter()
            .map(|entry| (now - entry.joined_at).to_std().unwrap_or(Duration::ZERO))
            .collect();
        let players = entries.into_iter().map(|entry| entry.player).collect();
        let formed = form_match(self.assigner.as_ref(), gametype, players, forced, now);

        info!(
            "Match {} formed for {} with {} players (forced: {})",
            formed.id,
            formed.gametype,
            formed.player_count(),
            formed.forced
        );
        (formed, waits)
    }

    fn record_match(&self, formed: &Match, waits: &[Duration]) {
        self.metrics.record_match_formed(formed, waits);
        self.bump(|counters| counters.matches_formed += 1);
    }

    /// Drop the players of `formed` from every other queue
    fn withdraw_matched(&self, formed: &Match) {
        let queues = match self.read_registry() {
            Ok(registry) => registry.queues(),
            Err(e) => {
                error!("Cannot withdraw matched players: {}", e);
                return;
            }
        };

        let players = formed.players();
        for queue in queues {
            let mut queue = match lock_queue(&queue) {
                Ok(queue) => queue,
                Err(e) => {
                    error!("Cannot withdraw matched players: {}", e);
                    continue;
                }
            };
            if queue.title() == formed.gametype {
                continue;
            }

            let removed = players
                .iter()
                .filter(|player| queue.withdraw(player))
                .count();
            if removed > 0 {
                debug!(
                    "Withdrew {} matched player(s) from {}",
                    removed,
                    queue.title()
                );
                self.metrics
                    .record_players_withdrawn(queue.title(), "matched", removed);
            }
        }
    }

    fn withdraw_from(
        &self,
        player: &PlayerIdentity,
        gametypes: Option<&[String]>,
        reason: &str,
    ) -> usize {
        let queues = match self.read_registry() {
            Ok(registry) => match gametypes {
                Some(titles) if !titles.is_empty() => titles
                    .iter()
                    .filter_map(|title| registry.queue(title).ok())
                    .collect(),
                _ => registry.queues(),
            },
            Err(e) => {
                error!("Withdraw of '{}' aborted: {}", player.handle, e);
                return 0;
            }
        };

        let mut removed = 0;
        for queue in queues {
            match lock_queue(&queue) {
                Ok(mut queue) => {
                    if queue.withdraw(player) {
                        removed += 1;
                        self.metrics
                            .record_players_withdrawn(queue.title(), reason, 1);
                    }
                }
                Err(e) => error!("Withdraw of '{}' skipped a queue: {}", player.handle, e),
            }
        }
        removed
    }

    fn remove_gametype(&self, title: &str) -> std::result::Result<GametypeRemoval, PickupError> {
        let mut registry = self.write_registry()?;
        let queue = registry.unregister(title)?;
        let cleared_entries = lock_queue(&queue)?.retire();
        let cleared_subscriptions = self.write_subscriptions()?.clear_gametype(title.trim());

        Ok(GametypeRemoval {
            gametype: title.trim().to_string(),
            cleared_entries,
            cleared_subscriptions,
        })
    }

    fn arm_scheduler(&self, errors: &mut Vec<PickupError>) {
        match self.scheduler.arm() {
            Ok(true) => {
                info!("First reservation in an idle system, expiry scheduler armed");
                self.metrics.set_scheduler_armed(true);
            }
            Ok(false) => {}
            Err(e) => {
                error!("Failed to arm expiry scheduler: {}", e);
                errors.push(e);
            }
        }
    }

    fn persist(&self) -> std::result::Result<(), PickupError> {
        let _guard = self
            .persist_lock
            .lock()
            .map_err(|_| PickupError::lock_poisoned("persistence"))?;

        let state = {
            let registry = self.read_registry()?;
            PersistedState {
                gametypes: registry.list(),
                subscriptions: self.read_subscriptions()?.to_subscriptions(),
            }
        };

        self.store.save(&state).map_err(|e| {
            error!("Failed to persist pickup state: {:#}", e);
            PickupError::Persistence {
                message: e.to_string(),
            }
        })
    }

    fn bump(&self, update: impl FnOnce(&mut Counters)) {
        match self.counters.lock() {
            Ok(mut counters) => update(&mut counters),
            Err(_) => warn!("Stats lock poisoned, counters not updated"),
        }
    }

    fn queue_for(&self, title: &str) -> std::result::Result<SharedQueue, PickupError> {
        self.read_registry()?.queue(title)
    }

    fn read_registry(
        &self,
    ) -> std::result::Result<RwLockReadGuard<'_, GametypeRegistry>, PickupError> {
        self.registry
            .read()
            .map_err(|_| PickupError::lock_poisoned("registry"))
    }

    fn write_registry(
        &self,
    ) -> std::result::Result<RwLockWriteGuard<'_, GametypeRegistry>, PickupError> {
        self.registry
            .write()
            .map_err(|_| PickupError::lock_poisoned("registry"))
    }

    fn read_subscriptions(
        &self,
    ) -> std::result::Result<RwLockReadGuard<'_, SubscriptionRegistry>, PickupError> {
        self.subscriptions
            .read()
            .map_err(|_| PickupError::lock_poisoned("subscriptions"))
    }

    fn write_subscriptions(
        &self,
    ) -> std::result::Result<RwLockWriteGuard<'_, SubscriptionRegistry>, PickupError> {
        self.subscriptions
            .write()
            .map_err(|_| PickupError::lock_poisoned("subscriptions"))
    }
}

fn lock_queue(queue: &SharedQueue) -> std::result::Result<MutexGuard<'_, GametypeQueue>, PickupError> {
    queue.lock().map_err(|_| PickupError::lock_poisoned("queue"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pickup::teams::CaptainPolicy;
    use crate::subscription::EveryoneOnline;
    use crate::utils::ManualClock;
    use chrono::Duration as ChronoDuration;
    use proptest::prelude::*;

    fn gametypes(titles: &[&str]) -> Vec<String> {
        titles.iter().map(|t| t.to_string()).collect()
    }

    fn irc(handle: &str) -> PlayerIdentity {
        PlayerIdentity::irc(handle)
    }

    fn create_test_manager() -> (PickupManager, Arc<ManualClock>) {
        create_manager_with(PickupOptions::default())
    }

    fn create_manager_with(options: PickupOptions) -> (PickupManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let manager = PickupManager::with_metrics(options, Arc::new(MetricsCollector::new().unwrap()))
            .with_clock(clock.clone());
        manager
            .seed_gametypes(vec![
                Gametype::new("duel", 2, 2, Some("duel".to_string())).unwrap(),
                Gametype::new("2v2tdm", 4, 2, Some("tdm".to_string())).unwrap(),
                Gametype::new("ffa", 4, 1, None).unwrap(),
            ])
            .unwrap();
        (manager, clock)
    }

    #[test]
    fn test_duel_forms_match() {
        let (manager, _clock) = create_test_manager();

        let first = manager.add_player(&irc("a"), &gametypes(&["duel"]), None);
        assert!(first.ok);
        assert!(first.match_formed.is_none());
        assert_eq!(manager.scheduler_state(), SchedulerState::Armed);

        let second = manager.add_player(&irc("b"), &gametypes(&["duel"]), None);
        let formed = second.match_formed.expect("duel should start");
        assert!(formed.has_teams);
        assert_eq!(formed.teams, vec![vec![irc("a")], vec![irc("b")]]);
        assert!(manager.snapshot("duel").unwrap().is_empty());
    }

    #[test]
    fn test_2v2_teams_and_captains() {
        let (manager, clock) = create_test_manager();
        let mut last = AddOutcome::default();
        for handle in ["p1", "p2", "p3", "p4"] {
            last = manager.add_player(&irc(handle), &gametypes(&["2v2tdm"]), None);
            clock.advance(ChronoDuration::seconds(1));
        }

        let formed = last.match_formed.expect("2v2tdm should start");
        assert_eq!(
            formed.teams,
            vec![vec![irc("p1"), irc("p3")], vec![irc("p2"), irc("p4")]]
        );
        // First player assigned to each team
        assert_eq!(formed.captains, vec![irc("p1"), irc("p2")]);
    }

    #[test]
    fn test_duplicate_add_reports_already_queued() {
        let (manager, _clock) = create_test_manager();
        manager.add_player(&irc("a"), &gametypes(&["2v2tdm"]), None);

        let outcome = manager.add_player(&irc("a"), &gametypes(&["2v2tdm"]), None);
        assert!(!outcome.ok);
        assert_eq!(
            outcome.errors,
            vec![PickupError::AlreadyQueued {
                player: "a".to_string(),
                gametype: "2v2tdm".to_string()
            }]
        );
        assert_eq!(manager.snapshot("2v2tdm").unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_gametype_does_not_abort_other_adds() {
        let (manager, _clock) = create_test_manager();

        let outcome = manager.add_player(&irc("a"), &gametypes(&["ctf", "2v2tdm"]), None);
        assert!(outcome.ok);
        assert_eq!(outcome.added, vec!["2v2tdm"]);
        assert!(matches!(
            outcome.errors.as_slice(),
            [PickupError::UnknownGametype { .. }]
        ));
    }

    #[test]
    fn test_match_withdraws_players_elsewhere_and_stops_processing() {
        let (manager, _clock) = create_test_manager();
        manager.add_player(&irc("a"), &gametypes(&["duel", "2v2tdm"]), None);

        let outcome = manager.add_player(&irc("b"), &gametypes(&["duel", "ffa"]), None);
        assert!(outcome.match_formed.is_some());
        assert_eq!(outcome.added, vec!["duel"]);

        // a left 2v2tdm when the duel started; b never reached ffa
        assert!(manager.snapshot("2v2tdm").unwrap().is_empty());
        assert!(manager.snapshot("ffa").unwrap().is_empty());
    }

    #[test]
    fn test_matched_players_stay_elsewhere_when_disabled() {
        let (manager, _clock) = create_manager_with(PickupOptions {
            withdraw_matched_elsewhere: false,
            ..PickupOptions::default()
        });
        manager.add_player(&irc("a"), &gametypes(&["2v2tdm", "duel"]), None);
        manager.add_player(&irc("b"), &gametypes(&["duel"]), None);

        assert_eq!(manager.snapshot("2v2tdm").unwrap().len(), 1);
    }

    #[test]
    fn test_withdraw() {
        let (manager, _clock) = create_test_manager();
        manager.add_player(&irc("a"), &gametypes(&["2v2tdm", "ffa"]), None);

        assert_eq!(manager.withdraw_player(&irc("nobody"), None), 0);
        assert_eq!(
            manager.withdraw_player(&irc("a"), Some(&gametypes(&["ffa"]))),
            1
        );
        assert_eq!(manager.withdraw_player(&irc("a"), None), 1);
        assert_eq!(manager.withdraw_player(&irc("a"), None), 0);
        assert!(!manager.has_active().unwrap());
    }

    #[test]
    fn test_push_and_pull() {
        let (manager, _clock) = create_test_manager();
        let admin = PlayerIdentity::discord("mod");

        let outcome = manager.push(&irc("afk"), &gametypes(&["ffa"]), &admin);
        assert!(outcome.ok);
        assert_eq!(manager.pull(&irc("afk"), &admin), 1);
        assert_eq!(manager.pull(&irc("afk"), &admin), 0);
    }

    #[test]
    fn test_renew_reports_per_gametype() {
        let (manager, _clock) = create_test_manager();
        manager.add_player(&irc("a"), &gametypes(&["2v2tdm"]), None);

        let errors = manager.renew(&irc("a"), &gametypes(&["2v2tdm", "ffa", "ctf"]));
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], PickupError::NotQueued { .. }));
        assert!(matches!(errors[1], PickupError::UnknownGametype { .. }));

        assert!(manager.renew(&irc("a"), &[]).is_empty());
        assert_eq!(
            manager.renew(&irc("b"), &[]),
            vec![PickupError::NothingQueued {
                player: "b".to_string()
            }]
        );
    }

    #[test]
    fn test_warn_then_evict() {
        let (manager, clock) = create_test_manager();
        let t0 = manager.now();
        manager.add_player(&irc("a"), &gametypes(&["2v2tdm"]), None);

        let report = manager.tick(t0 + ChronoDuration::seconds(1199)).unwrap();
        assert!(report.warned.is_empty());
        assert_eq!(report.next_wake_delay, Some(Duration::from_secs(1)));

        let report = manager.tick(t0 + ChronoDuration::seconds(1200)).unwrap();
        assert_eq!(report.warned.len(), 1);
        assert_eq!(report.next_wake_delay, Some(Duration::from_secs(600)));

        let report = manager.tick(t0 + ChronoDuration::seconds(1500)).unwrap();
        assert!(report.warned.is_empty());

        clock.set(t0 + ChronoDuration::seconds(1800));
        let report = manager.tick(manager.now()).unwrap();
        assert_eq!(report.evicted.len(), 1);
        assert!(report.queue_text_changed);
        assert_eq!(report.next_wake_delay, None);
        assert_eq!(manager.scheduler_state(), SchedulerState::Idle);
        assert!(!manager.has_active().unwrap());
    }

    #[test]
    fn test_every_due_warning_is_returned() {
        let (manager, _clock) = create_test_manager();
        let t0 = manager.now();
        manager.add_player(&irc("a"), &gametypes(&["2v2tdm"]), None);
        manager.add_player(&irc("b"), &gametypes(&["ffa"]), None);

        let report = manager.tick(t0 + ChronoDuration::seconds(1200)).unwrap();
        assert_eq!(report.warned.len(), 2);
    }

    #[test]
    fn test_renew_survives_original_deadline() {
        let (manager, clock) = create_test_manager();
        let t0 = manager.now();
        manager.add_player(&irc("a"), &gametypes(&["2v2tdm"]), None);

        manager.tick(t0 + ChronoDuration::seconds(1200)).unwrap();
        clock.set(t0 + ChronoDuration::seconds(1700));
        assert!(manager.renew(&irc("a"), &gametypes(&["2v2tdm"])).is_empty());

        let report = manager.tick(t0 + ChronoDuration::seconds(1800)).unwrap();
        assert!(report.evicted.is_empty());
        assert_eq!(manager.snapshot("2v2tdm").unwrap().len(), 1);
        assert!(manager.snapshot("2v2tdm").unwrap()[0].warned_at.is_none());
    }

    #[test]
    fn test_force_start_policies() {
        let (manager, _clock) = create_test_manager();
        assert!(matches!(
            manager.force_start("2v2tdm"),
            Err(PickupError::EmptyQueue { .. })
        ));

        manager.add_player(&irc("a"), &gametypes(&["2v2tdm"]), None);
        manager.add_player(&irc("b"), &gametypes(&["2v2tdm"]), None);
        manager.add_player(&irc("c"), &gametypes(&["2v2tdm"]), None);

        let formed = manager.force_start("2v2tdm").unwrap();
        assert!(formed.forced);
        assert_eq!(formed.teams[0].len(), 2);
        assert_eq!(formed.teams[1].len(), 1);

        let (strict, _clock) = create_manager_with(PickupOptions {
            partial_start: PartialStartPolicy::Reject,
            ..PickupOptions::default()
        });
        strict.add_player(&irc("a"), &gametypes(&["2v2tdm"]), None);
        assert_eq!(
            strict.force_start("2v2tdm"),
            Err(PickupError::NotEnoughPlayers {
                gametype: "2v2tdm".to_string(),
                present: 1,
                required: 4
            })
        );
        assert_eq!(strict.snapshot("2v2tdm").unwrap().len(), 1);
    }

    #[test]
    fn test_list_active() {
        let (manager, _clock) = create_test_manager();
        manager.add_player(&irc("a"), &gametypes(&["duel"]), None);
        manager.add_player(&PlayerIdentity::discord("b"), &gametypes(&["2v2tdm"]), None);

        let active = manager.list_active().unwrap();
        let summary: Vec<_> = active
            .iter()
            .map(|q| (q.gametype.as_str(), q.count, q.required))
            .collect();
        assert_eq!(summary, vec![("2v2tdm", 1, 4), ("duel", 1, 2)]);
    }

    #[test]
    fn test_gametype_registry_operations() {
        let (manager, _clock) = create_test_manager();

        assert_eq!(
            manager.add_gametype(Gametype::new("duel", 2, 2, None).unwrap()),
            Err(PickupError::DuplicateGametype {
                gametype: "duel".to_string()
            })
        );
        manager
            .add_gametype(Gametype::new("ctf", 8, 2, Some("ctf".to_string())).unwrap())
            .unwrap();
        assert_eq!(manager.list_gametypes().unwrap().len(), 4);

        manager.add_player(&irc("a"), &gametypes(&["ctf"]), None);
        manager.subscribe(&irc("b"), "ctf").unwrap();

        let outcome = manager.remove_gametypes(&gametypes(&["ctf", "nope"]));
        assert_eq!(
            outcome.removed,
            vec![GametypeRemoval {
                gametype: "ctf".to_string(),
                cleared_entries: 1,
                cleared_subscriptions: 1
            }]
        );
        assert_eq!(outcome.errors.len(), 1);
        assert!(manager.list_subscriptions(&irc("b")).unwrap().is_empty());
        assert!(matches!(
            manager.add_player(&irc("a"), &gametypes(&["ctf"]), None).errors[0],
            PickupError::UnknownGametype { .. }
        ));
    }

    #[test]
    fn test_subscriptions() {
        let (manager, _clock) = create_test_manager();
        let a = irc("a");

        assert!(manager.subscribe(&a, "duel").unwrap());
        assert!(!manager.subscribe(&a, "duel").unwrap());
        assert!(manager.subscribe(&a, "ffa").unwrap());
        assert!(matches!(
            manager.subscribe(&a, "ctf"),
            Err(PickupError::UnknownGametype { .. })
        ));

        assert_eq!(manager.list_subscribers("duel").unwrap(), vec![a.clone()]);
        assert_eq!(manager.unsubscribe(&a, Some("duel")).unwrap(), vec!["duel"]);
        assert!(manager.unsubscribe(&a, Some("duel")).unwrap().is_empty());
        assert_eq!(manager.unsubscribe(&a, None).unwrap(), vec!["ffa"]);
        assert!(manager.list_subscriptions(&a).unwrap().is_empty());
    }

    #[test]
    fn test_promote_notifies_unqueued_online_subscribers() {
        let (manager, _clock) = create_test_manager();
        for handle in ["a", "b", "c"] {
            manager.subscribe(&irc(handle), "2v2tdm").unwrap();
        }
        manager.add_player(&irc("a"), &gametypes(&["2v2tdm"]), None);

        let promotion = manager.promote("2v2tdm", &EveryoneOnline).unwrap();
        assert_eq!(promotion.broadcast, "2v2tdm (1/4) please add!");
        assert_eq!(promotion.notify, vec![irc("b"), irc("c")]);

        assert!(matches!(
            manager.promote("duel", &EveryoneOnline),
            Err(PickupError::EmptyQueue { .. })
        ));
    }

    #[test]
    fn test_state_survives_restart() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let first = PickupManager::new(PickupOptions::default()).with_store(store.clone());
        first
            .add_gametype(Gametype::new("duel", 2, 2, None).unwrap())
            .unwrap();
        first.subscribe(&irc("a"), "duel").unwrap();

        let second = PickupManager::new(PickupOptions::default()).with_store(store);
        assert_eq!(second.load_state().unwrap(), 1);
        assert_eq!(second.list_subscribers("duel").unwrap(), vec![irc("a")]);
    }

    #[test]
    fn test_stats() {
        let (manager, _clock) = create_test_manager();
        manager.add_player(&irc("a"), &gametypes(&["duel"]), None);
        manager.add_player(&irc("b"), &gametypes(&["duel"]), None);
        manager.add_player(&irc("c"), &gametypes(&["ffa"]), None);

        let stats = manager.stats().unwrap();
        assert_eq!(stats.gametypes, 3);
        assert_eq!(stats.players_queued, 3);
        assert_eq!(stats.matches_formed, 1);
        assert_eq!(stats.players_waiting, 1);
        assert_eq!(stats.waiting_by_gametype.get("ffa"), Some(&1));
        assert!(stats.scheduler_armed);
    }

    #[test]
    fn test_random_captains_come_from_teams() {
        let (manager, _clock) = create_test_manager();
        let manager = manager.with_assigner(Arc::new(RoundRobinAssigner::new(CaptainPolicy::Random)));

        let mut formed = None;
        for handle in ["p1", "p2", "p3", "p4"] {
            formed = manager
                .add_player(&irc(handle), &gametypes(&["2v2tdm"]), None)
                .match_formed;
        }
        let formed = formed.unwrap();
        for (team, captain) in formed.teams.iter().zip(&formed.captains) {
            assert!(team.contains(captain));
        }
    }

    #[test]
    fn test_racing_for_last_slot_forms_one_match() {
        let (manager, _clock) = create_test_manager();
        let manager = Arc::new(manager);
        for handle in ["p1", "p2", "p3"] {
            manager.add_player(&irc(handle), &gametypes(&["2v2tdm"]), None);
        }

        let matches: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let manager = Arc::clone(&manager);
                    scope.spawn(move || {
                        manager
                            .add_player(&irc(&format!("racer{}", i)), &gametypes(&["2v2tdm"]), None)
                            .match_formed
                            .is_some() as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(matches, 1);
        // The three racers that lost start the next queue
        assert_eq!(manager.snapshot("2v2tdm").unwrap().len(), 3);
    }

    /// Assigner that parks inside the drain of `hold` until released
    struct ParkingAssigner {
        hold: &'static str,
        entered: std::sync::Barrier,
        release: std::sync::Barrier,
        inner: RoundRobinAssigner,
    }

    impl TeamAssigner for ParkingAssigner {
        fn assign(
            &self,
            gametype: &Gametype,
            players: Vec<PlayerIdentity>,
        ) -> crate::pickup::teams::TeamAssignment {
            if gametype.title == self.hold {
                self.entered.wait();
                self.release.wait();
            }
            self.inner.assign(gametype, players)
        }
    }

    #[test]
    fn test_player_never_lands_in_two_concurrent_matches() {
        let assigner = Arc::new(ParkingAssigner {
            hold: "2v2tdm",
            entered: std::sync::Barrier::new(2),
            release: std::sync::Barrier::new(2),
            inner: RoundRobinAssigner::default(),
        });
        let (manager, _clock) = create_test_manager();
        let manager = Arc::new(manager.with_assigner(assigner.clone()));

        let both = irc("both");
        manager.add_player(&both, &gametypes(&["duel", "2v2tdm"]), None);
        for handle in ["q1", "q2"] {
            manager.add_player(&irc(handle), &gametypes(&["2v2tdm"]), None);
        }

        let (tdm, duel) = std::thread::scope(|scope| {
            let filler = {
                let manager = Arc::clone(&manager);
                scope.spawn(move || manager.add_player(&irc("q3"), &gametypes(&["2v2tdm"]), None))
            };

            // The 2v2tdm match is being formed; now complete the duel queue
            assigner.entered.wait();
            let rival = {
                let manager = Arc::clone(&manager);
                scope.spawn(move || manager.add_player(&irc("b"), &gametypes(&["duel"]), None))
            };
            std::thread::sleep(std::time::Duration::from_millis(50));
            assigner.release.wait();

            (filler.join().unwrap(), rival.join().unwrap())
        });

        let tdm = tdm.match_formed.unwrap();
        assert!(tdm.players().contains(&both));

        assert!(duel.ok);
        assert!(duel.match_formed.is_none());
        let waiting: Vec<_> = manager
            .snapshot("duel")
            .unwrap()
            .into_iter()
            .map(|entry| entry.player)
            .collect();
        assert_eq!(waiting, vec![irc("b")]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(usize),
        Withdraw(usize),
        Start,
        Tick(i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0usize..6).prop_map(Op::Add),
            2 => (0usize..6).prop_map(Op::Withdraw),
            1 => Just(Op::Start),
            1 => (0i64..2000).prop_map(Op::Tick),
        ]
    }

    proptest! {
        #[test]
        fn prop_queue_never_exceeds_capacity(ops in proptest::collection::vec(op_strategy(), 1..60)) {
            let (manager, clock) = create_test_manager();
            let titles = gametypes(&["2v2tdm"]);

            for op in ops {
                match op {
                    Op::Add(i) => {
                        let outcome = manager.add_player(&irc(&format!("p{}", i)), &titles, None);
                        if let Some(formed) = outcome.match_formed {
                            prop_assert_eq!(formed.player_count(), 4);
                            let mut players = formed.players();
                            players.sort();
                            players.dedup();
                            prop_assert_eq!(players.len(), 4);
                        }
                    }
                    Op::Withdraw(i) => {
                        manager.withdraw_player(&irc(&format!("p{}", i)), None);
                    }
                    Op::Start => {
                        let _ = manager.force_start("2v2tdm");
                    }
                    Op::Tick(secs) => {
                        clock.advance(ChronoDuration::seconds(secs));
                        manager.tick(manager.now()).unwrap();
                    }
                }
                prop_assert!(manager.snapshot("2v2tdm").unwrap().len() <= 4);
            }
        }
    }
}
