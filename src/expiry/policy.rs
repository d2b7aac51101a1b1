//! Deadline arithmetic for queue reservations

use crate::types::QueueEntry;
use chrono::{DateTime, Duration, Utc};

/// How long a reservation lives before it is warned and then evicted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    warn_after: Duration,
    delete_after: Duration,
}

impl ExpiryPolicy {
    pub fn new(warn_after: Duration, delete_after: Duration) -> Self {
        Self {
            warn_after,
            delete_after,
        }
    }

    pub fn from_secs(warn_after_seconds: u64, delete_after_seconds: u64) -> Self {
        Self::new(
            Duration::seconds(warn_after_seconds as i64),
            Duration::seconds(delete_after_seconds as i64),
        )
    }

    pub fn warn_after(&self) -> Duration {
        self.warn_after
    }

    pub fn delete_after(&self) -> Duration {
        self.delete_after
    }

    pub fn warn_deadline(&self, entry: &QueueEntry) -> DateTime<Utc> {
        entry.joined_at + self.warn_after
    }

    pub fn delete_deadline(&self, entry: &QueueEntry) -> DateTime<Utc> {
        entry.joined_at + self.delete_after
    }

    /// The next instant at which this entry needs attention
    pub fn next_deadline(&self, entry: &QueueEntry) -> DateTime<Utc> {
        let delete = self.delete_deadline(entry);
        if entry.warned_at.is_some() {
            delete
        } else {
            self.warn_deadline(entry).min(delete)
        }
    }

    /// Time left before the entry is evicted
    pub fn remaining(&self, entry: &QueueEntry, now: DateTime<Utc>) -> std::time::Duration {
        (self.delete_deadline(entry) - now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self::from_secs(1200, 1800)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PlayerIdentity;

    fn entry(joined_at: DateTime<Utc>, warned: bool) -> QueueEntry {
        QueueEntry {
            gametype: "duel".to_string(),
            player: PlayerIdentity::irc("alice"),
            joined_at,
            warned_at: warned.then_some(joined_at),
            seq: 0,
        }
    }

    #[test]
    fn test_deadlines() {
        let policy = ExpiryPolicy::default();
        let t0 = Utc::now();
        let e = entry(t0, false);

        assert_eq!(policy.warn_deadline(&e), t0 + Duration::seconds(1200));
        assert_eq!(policy.delete_deadline(&e), t0 + Duration::seconds(1800));
        assert_eq!(policy.next_deadline(&e), t0 + Duration::seconds(1200));

        let warned = entry(t0, true);
        assert_eq!(policy.next_deadline(&warned), t0 + Duration::seconds(1800));
    }

    #[test]
    fn test_remaining_never_negative() {
        let policy = ExpiryPolicy::from_secs(10, 20);
        let t0 = Utc::now();
        let e = entry(t0, false);

        assert_eq!(
            policy.remaining(&e, t0 + Duration::seconds(5)),
            std::time::Duration::from_secs(15)
        );
        assert_eq!(
            policy.remaining(&e, t0 + Duration::seconds(30)),
            std::time::Duration::ZERO
        );
    }

    #[test]
    fn test_warn_after_delete_collapses_to_delete() {
        let policy = ExpiryPolicy::from_secs(60, 30);
        let t0 = Utc::now();
        assert_eq!(
            policy.next_deadline(&entry(t0, false)),
            t0 + Duration::seconds(30)
        );
    }
}
