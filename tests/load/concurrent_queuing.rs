//! High concurrency tests for queue operations
//!
//! These tests validate that matches are formed exactly once when many
//! players race for the same queue.

use pickup_room::pickup::PickupOptions;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Barrier;

use crate::fixtures::{create_test_manager, irc};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_for_last_slot_forms_one_match() {
    let (manager, _clock) = create_test_manager(PickupOptions::default());
    manager.add_player(&irc("first"), &["duel".to_string()], None);

    let racers = 8;
    let barrier = Arc::new(Barrier::new(racers));
    let tasks: Vec<_> = (0..racers)
        .map(|i| {
            let manager = manager.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                manager.add_player(&irc(&format!("racer_{}", i)), &["duel".to_string()], None)
            })
        })
        .collect();

    let outcomes = futures::future::join_all(tasks).await;
    let formed: Vec<_> = outcomes
        .into_iter()
        .filter_map(|outcome| outcome.unwrap().match_formed)
        .collect();

    // Racers pair up: the first one matches "first", the rest pair off
    assert_eq!(formed.len(), 4);
    assert!(formed
        .iter()
        .any(|m| m.players().contains(&irc("first"))));
    for m in &formed {
        assert_eq!(m.player_count(), 2);
    }
    assert_eq!(manager.snapshot("duel").unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_100_concurrent_adds() {
    let (manager, _clock) = create_test_manager(PickupOptions::default());
    let concurrent_requests = 100;

    let start_time = Instant::now();

    let tasks: Vec<_> = (0..concurrent_requests)
        .map(|i| {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager.add_player(
                    &irc(&format!("load_test_player_{}", i)),
                    &["2v2tdm".to_string()],
                    None,
                )
            })
        })
        .collect();

    let outcomes = futures::future::join_all(tasks).await;
    let elapsed = start_time.elapsed();

    let mut matches = 0;
    let mut matched_players = 0;
    for outcome in outcomes {
        let outcome = outcome.unwrap();
        assert!(outcome.ok);
        if let Some(formed) = outcome.match_formed {
            matches += 1;
            matched_players += formed.player_count();
        }
    }

    println!(
        "Processed {} adds in {:?} ({} matches)",
        concurrent_requests, elapsed, matches
    );

    assert_eq!(matches, 25);
    assert_eq!(matched_players, 100);
    assert!(!manager.has_active().unwrap());
    assert_eq!(manager.stats().unwrap().matches_formed, 25);
}
