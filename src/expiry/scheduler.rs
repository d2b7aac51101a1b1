//! Expiry scheduler
//!
//! One logical timer per engine. `SchedulerHandle` owns the Idle/Armed flag
//! and the wake-up signal; `ExpiryScheduler` is the background task that
//! sleeps until the next deadline, asks the manager to tick and publishes
//! the resulting warnings and evictions.

use crate::announce::publisher::ChatPublisher;
use crate::announce::text::Announcer;
use crate::error::PickupError;
use crate::pickup::manager::PickupManager;
use crate::types::TickReport;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Whether the expiry timer is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    #[default]
    Idle,
    Armed,
}

/// Idle/Armed flag plus the signal that wakes the scheduler task
#[derive(Debug, Default)]
pub struct SchedulerHandle {
    state: Mutex<SchedulerState>,
    wake: Notify,
}

impl SchedulerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SchedulerState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    pub fn is_armed(&self) -> bool {
        self.state() == SchedulerState::Armed
    }

    /// Arm the timer after a queue gained an entry.
    ///
    /// Returns true on the Idle to Armed transition. The task is woken either
    /// way so it can recompute its sleep.
    pub fn arm(&self) -> Result<bool, PickupError> {
        let mut state = self.lock()?;
        let transitioned = *state == SchedulerState::Idle;
        *state = SchedulerState::Armed;
        drop(state);

        if transitioned {
            debug!("Expiry scheduler armed");
        }
        self.wake.notify_one();
        Ok(transitioned)
    }

    /// Lock the flag so the caller can re-check the queues before going idle
    pub fn lock(&self) -> Result<MutexGuard<'_, SchedulerState>, PickupError> {
        self.state
            .lock()
            .map_err(|_| PickupError::lock_poisoned("scheduler"))
    }

    /// Wait until `arm` is called (returns immediately if a wake is pending)
    pub async fn notified(&self) {
        self.wake.notified().await;
    }
}

/// Background task driving `PickupManager::tick`
pub struct ExpiryScheduler {
    manager: Arc<PickupManager>,
    publisher: Arc<dyn ChatPublisher>,
    announcer: Announcer,
}

impl ExpiryScheduler {
    pub fn new(
        manager: Arc<PickupManager>,
        publisher: Arc<dyn ChatPublisher>,
        announcer: Announcer,
    ) -> Self {
        Self {
            manager,
            publisher,
            announcer,
        }
    }

    /// Spawn the scheduler loop; it stops when `shutdown` fires
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run until shutdown
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let handle = self.manager.scheduler();
        info!("Expiry scheduler task started");

        loop {
            if !handle.is_armed() {
                tokio::select! {
                    _ = handle.notified() => continue,
                    _ = shutdown.recv() => break,
                }
            }

            let report = match self.manager.tick(self.manager.now()) {
                Ok(report) => report,
                Err(e) => {
                    error!("Expiry tick failed: {}", e);
                    // Back off instead of spinning on a broken lock
                    TickReport {
                        next_wake_delay: Some(std::time::Duration::from_secs(1)),
                        ..TickReport::default()
                    }
                }
            };

            self.publish(&report).await;

            match report.next_wake_delay {
                Some(delay) => {
                    debug!("Expiry scheduler sleeping for {:?}", delay);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = handle.notified() => {}
                        _ = shutdown.recv() => break,
                    }
                }
                None => debug!("Expiry scheduler went idle"),
            }
        }

        info!("Expiry scheduler task stopped");
    }

    async fn publish(&self, report: &TickReport) {
        for warning in &report.warned {
            let text = self.announcer.warning_text(warning);
            if let Err(e) = self.publisher.notify(&warning.player, &text).await {
                warn!(
                    "Failed to deliver expiry warning to '{}': {}",
                    warning.player.handle, e
                );
            }
        }

        if !report.evicted.is_empty() {
            let text = self.announcer.eviction_text(&report.evicted);
            if let Err(e) = self.publisher.broadcast_text(&text).await {
                warn!("Failed to announce evictions: {}", e);
            }
        }

        if report.queue_text_changed {
            match self.manager.list_active() {
                Ok(active) => {
                    let topic = self.announcer.pickup_text(&active);
                    if let Err(e) = self.publisher.set_topic(&topic).await {
                        warn!("Failed to publish pickup text: {}", e);
                    }
                }
                Err(e) => warn!("Failed to snapshot queues for pickup text: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_transitions_once() {
        let handle = SchedulerHandle::new();
        assert_eq!(handle.state(), SchedulerState::Idle);

        assert!(handle.arm().unwrap());
        assert!(!handle.arm().unwrap());
        assert!(handle.is_armed());

        *handle.lock().unwrap() = SchedulerState::Idle;
        assert_eq!(handle.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_pending_wake_is_not_lost() {
        let handle = SchedulerHandle::new();
        handle.arm().unwrap();

        // The permit stored by `arm` satisfies a later wait
        tokio::time::timeout(std::time::Duration::from_millis(100), handle.notified())
            .await
            .expect("wake-up was lost");
    }
}
