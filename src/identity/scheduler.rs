//! Refresh scheduler
//!
//! A min-heap of `(due, session, generation)` entries shared by one worker
//! loop. Entries are never removed early; a session whose generation has
//! moved on simply ignores the stale entry when it fires.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScheduledRefresh {
    pub due: DateTime<Utc>,
    seq: u64,
    pub session_id: String,
    pub generation: u64,
}

#[derive(Debug, Default)]
pub struct RefreshScheduler {
    heap: Mutex<BinaryHeap<Reverse<ScheduledRefresh>>>,
    seq: AtomicU64,
    notify: Notify,
}

impl RefreshScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a refresh and wake the worker
    pub fn schedule(&self, session_id: impl Into<String>, generation: u64, due: DateTime<Utc>) {
        let entry = ScheduledRefresh {
            due,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            session_id: session_id.into(),
            generation,
        };
        self.heap.lock().push(Reverse(entry));
        self.notify.notify_one();
    }

    /// Remove and return every entry due at or before `now`, earliest first
    pub fn pop_due(&self, now: DateTime<Utc>) -> Vec<ScheduledRefresh> {
        let mut heap = self.heap.lock();
        let mut due = Vec::new();
        while heap.peek().is_some_and(|Reverse(e)| e.due <= now) {
            if let Some(Reverse(entry)) = heap.pop() {
                due.push(entry);
            }
        }
        due
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.heap.lock().peek().map(|Reverse(e)| e.due)
    }

    /// Time until the earliest entry, zero when overdue
    pub fn next_wait(&self) -> Option<Duration> {
        self.next_due()
            .map(|due| (due - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Resolves after the next `schedule` call (or immediately if one
    /// happened since the last wait)
    pub async fn changed(&self) {
        self.notify.notified().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_pops_in_due_order() {
        let scheduler = RefreshScheduler::new();
        let now = Utc::now();
        scheduler.schedule("late", 1, now + ChronoDuration::seconds(60));
        scheduler.schedule("b", 1, now - ChronoDuration::seconds(5));
        scheduler.schedule("a", 1, now - ChronoDuration::seconds(10));

        let due = scheduler.pop_due(now);
        let ids: Vec<_> = due.iter().map(|e| e.session_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.next_due(), Some(now + ChronoDuration::seconds(60)));
    }

    #[test]
    fn test_overdue_wait_is_zero() {
        let scheduler = RefreshScheduler::new();
        assert!(scheduler.next_wait().is_none());
        scheduler.schedule("x", 1, Utc::now() - ChronoDuration::seconds(1));
        assert_eq!(scheduler.next_wait(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_schedule_wakes_waiter() {
        let scheduler = std::sync::Arc::new(RefreshScheduler::new());
        let waiter = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.changed().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.schedule("x", 1, Utc::now());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
