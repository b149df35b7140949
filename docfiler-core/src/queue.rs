//! Per-path deduplicating work queue.
//!
//! A path enters the in-flight set when it is enqueued and leaves it only when
//! the worker that claimed it calls [`IngestionQueue::complete`]. While it is
//! in flight, further enqueues of the same path are ignored, so a notifier
//! that reports both "created" and "modified" for one write produces a single
//! processing run.

use crate::types::WorkItem;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<WorkItem>,
    in_flight: HashSet<PathBuf>,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct IngestionQueue {
    state: Mutex<QueueState>,
    available: Notify,
}

impl IngestionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `path` for processing. Returns `false` (and does nothing) if the
    /// path is already in flight or the queue is closed.
    pub fn enqueue(&self, path: PathBuf) -> bool {
        {
            let mut state = self.lock();
            if state.closed {
                debug!(path = %path.display(), "Queue closed, not enqueuing");
                return false;
            }
            if !state.in_flight.insert(path.clone()) {
                debug!(path = %path.display(), "Already in flight, ignoring duplicate");
                return false;
            }
            state.pending.push_back(WorkItem::new(path));
        }
        self.available.notify_one();
        true
    }

    /// Wait for the next item. Returns `None` once the queue is closed, even if
    /// items are still pending; those files stay in the input directory.
    pub async fn dequeue(&self) -> Option<WorkItem> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register interest before checking so a close or enqueue between
            // the check and the await is not missed
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(item) = state.pending.pop_front() {
                    return Some(item);
                }
            }

            notified.await;
        }
    }

    /// Mark the claimed path as finished, allowing it to be enqueued again.
    pub fn complete(&self, path: &Path) {
        self.lock().in_flight.remove(path);
    }

    /// Stop handing out work and wake every waiting worker.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_in_flight(&self, path: &Path) -> bool {
        self.lock().in_flight.contains(path)
    }

    /// Items waiting for a worker
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Paths queued or being processed
    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_duplicate_enqueue_is_ignored() {
        let queue = IngestionQueue::new();
        assert!(queue.enqueue(PathBuf::from("/in/a.pdf")));
        assert!(!queue.enqueue(PathBuf::from("/in/a.pdf")));
        assert_eq!(queue.len(), 1);

        let item = queue.dequeue().await.unwrap();
        assert_eq!(item.path, PathBuf::from("/in/a.pdf"));
        assert_eq!(item.attempt_count, 0);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_path_stays_in_flight_until_complete() {
        let queue = IngestionQueue::new();
        let path = PathBuf::from("/in/a.pdf");
        queue.enqueue(path.clone());
        let _item = queue.dequeue().await.unwrap();

        // Claimed but not finished: a late notifier event is still a duplicate
        assert!(queue.is_in_flight(&path));
        assert!(!queue.enqueue(path.clone()));

        queue.complete(&path);
        assert!(!queue.is_in_flight(&path));
        assert!(queue.enqueue(path.clone()), "replaced file can be reprocessed");
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = IngestionQueue::new();
        for name in ["a", "b", "c"] {
            queue.enqueue(PathBuf::from(format!("/in/{name}.pdf")));
        }
        for name in ["a", "b", "c"] {
            let item = queue.dequeue().await.unwrap();
            assert_eq!(item.path, PathBuf::from(format!("/in/{name}.pdf")));
        }
        assert_eq!(queue.in_flight_count(), 3);
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = Arc::new(IngestionQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.enqueue(PathBuf::from("/in/late.pdf"));
        let item = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(item.path, PathBuf::from("/in/late.pdf"));
    }

    #[tokio::test]
    async fn test_close_wakes_all_waiters_and_stops_dequeue() {
        let queue = Arc::new(IngestionQueue::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.dequeue().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        for waiter in waiters {
            let result = tokio::time::timeout(Duration::from_secs(5), waiter)
                .await
                .unwrap()
                .unwrap();
            assert!(result.is_none());
        }
    }

    #[tokio::test]
    async fn test_no_dequeue_after_close_even_with_pending() {
        let queue = IngestionQueue::new();
        queue.enqueue(PathBuf::from("/in/a.pdf"));
        queue.close();
        assert!(queue.is_closed());
        assert!(queue.dequeue().await.is_none());
        assert!(!queue.enqueue(PathBuf::from("/in/b.pdf")));
    }
}
