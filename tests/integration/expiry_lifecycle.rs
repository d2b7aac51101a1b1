//! Reservation expiry driven by the background scheduler
//!
//! These tests run the real scheduler task against a manager with a very
//! short expiry policy and watch what reaches the chat publisher.

use pickup_room::announce::{ChatPublisher, MockPublisher};
use pickup_room::expiry::{ExpiryScheduler, SchedulerState};
use pickup_room::pickup::PickupManager;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Duration};

use crate::fixtures::{create_fast_expiry_manager, irc, test_announcer};

/// Poll until `check` holds or two seconds have passed
async fn wait_for(check: impl Fn() -> bool) -> bool {
    timeout(Duration::from_secs(2), async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

fn start_scheduler(
    manager: &Arc<PickupManager>,
    publisher: &Arc<MockPublisher>,
) -> (broadcast::Sender<()>, tokio::task::JoinHandle<()>) {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let chat: Arc<dyn ChatPublisher> = publisher.clone();
    let handle = ExpiryScheduler::new(manager.clone(), chat, test_announcer()).spawn(shutdown_rx);
    (shutdown_tx, handle)
}

#[tokio::test]
async fn test_reservation_is_warned_then_evicted() {
    let manager = create_fast_expiry_manager(100, 250);
    let publisher = Arc::new(MockPublisher::new());
    let (shutdown_tx, handle) = start_scheduler(&manager, &publisher);

    let alice = irc("alice");
    let outcome = manager.add_player(&alice, &["duel".to_string()], None);
    assert!(outcome.ok);

    assert!(
        wait_for(|| !publisher.broadcasts().is_empty()).await,
        "eviction was never announced"
    );

    let warnings = publisher.notices_to(&alice);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("type !renew to renew your games"));
    assert_eq!(
        publisher.broadcasts(),
        vec!["Removed inactive players: alice (duel)"]
    );
    assert_eq!(publisher.last_topic().as_deref(), Some("Pickups: "));

    assert!(wait_for(|| manager.scheduler_state() == SchedulerState::Idle).await);
    assert!(!manager.has_active().unwrap());

    shutdown_tx.send(()).unwrap();
    timeout(Duration::from_secs(1), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_idle_scheduler_rearms_on_next_add() {
    let manager = create_fast_expiry_manager(50, 100);
    let publisher = Arc::new(MockPublisher::new());
    let (shutdown_tx, handle) = start_scheduler(&manager, &publisher);

    manager.add_player(&irc("alice"), &["ffa".to_string()], None);
    assert!(wait_for(|| publisher.broadcasts().len() == 1).await);
    assert!(wait_for(|| manager.scheduler_state() == SchedulerState::Idle).await);

    // A later add must wake the idle task
    manager.add_player(&irc("bob"), &["ffa".to_string()], None);
    assert!(manager.scheduler().is_armed());
    assert!(wait_for(|| publisher.broadcasts().len() == 2).await);
    assert_eq!(
        publisher.broadcasts()[1],
        "Removed inactive players: bob (ffa)"
    );

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_matched_players_are_never_evicted() {
    let manager = create_fast_expiry_manager(50, 100);
    let publisher = Arc::new(MockPublisher::new());
    let (shutdown_tx, handle) = start_scheduler(&manager, &publisher);

    manager.add_player(&irc("alice"), &["duel".to_string()], None);
    let outcome = manager.add_player(&irc("bob"), &["duel".to_string()], None);
    assert!(outcome.match_formed.is_some());

    sleep(Duration::from_millis(300)).await;
    assert!(publisher.broadcasts().is_empty());
    assert!(publisher.notices_to(&irc("alice")).is_empty());

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}
