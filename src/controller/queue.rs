/*
 * Copyright Nitro Agility S.r.l.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *      https://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Rate-limited work queue.
//!
//! A key is never handed to two workers at once. A key added while it is
//! being processed is queued again when the worker calls [`WorkQueue::done`].
//! Failed keys come back after an exponential, per-key delay.

use super::Request;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// First retry delay
pub const BASE_DELAY: Duration = Duration::from_millis(5);

/// Retry delay ceiling
pub const MAX_DELAY: Duration = Duration::from_secs(1000);

/// Delay before retry number `failures` (1-based).
pub fn backoff(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(31);
    BASE_DELAY.saturating_mul(1 << exp).min(MAX_DELAY)
}

#[derive(Default)]
struct State {
    queue: VecDeque<Request>,
    /// Waiting to be processed (queued, or re-added while processing)
    dirty: HashSet<Request>,
    processing: HashSet<Request>,
    failures: HashMap<Request, u32>,
    shutting_down: bool,
}

/// Deduplicating work queue shared by the reconcile workers
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<State>,
    notify: Notify,
    /// Delayed re-adds, cancelled on shutdown
    requeues: TaskTracker,
    stop: CancellationToken,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `request` unless it is already waiting.
    pub fn add(&self, request: Request) {
        let mut state = self.state.lock().unwrap();
        if state.shutting_down || !state.dirty.insert(request.clone()) {
            return;
        }
        if state.processing.contains(&request) {
            return;
        }
        state.queue.push_back(request);
        drop(state);
        self.notify.notify_one();
    }

    /// Next request, waiting if the queue is empty. `None` after shutdown.
    pub async fn get(&self) -> Option<Request> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().unwrap();
                if let Some(request) = state.queue.pop_front() {
                    state.dirty.remove(&request);
                    state.processing.insert(request.clone());
                    return Some(request);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `request` as finished processing.
    pub fn done(&self, request: &Request) {
        let mut state = self.state.lock().unwrap();
        state.processing.remove(request);
        if state.dirty.contains(request) && !state.shutting_down {
            state.queue.push_back(request.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Clear the failure history of `request` after a clean result.
    pub fn forget(&self, request: &Request) {
        self.state.lock().unwrap().failures.remove(request);
    }

    /// Record a failure and return the delay before the retry.
    pub fn record_failure(&self, request: &Request) -> Duration {
        let mut state = self.state.lock().unwrap();
        let failures = state.failures.entry(request.clone()).or_insert(0);
        *failures = failures.saturating_add(1);
        backoff(*failures)
    }

    pub fn failures(&self, request: &Request) -> u32 {
        self.state
            .lock()
            .unwrap()
            .failures
            .get(request)
            .copied()
            .unwrap_or(0)
    }

    /// Re-add `request` after its backoff delay.
    pub fn requeue_rate_limited(self: &Arc<Self>, request: Request) -> Duration {
        let delay = self.record_failure(&request);
        debug!(request = %request, delay = ?delay, "Requeueing with backoff");

        let queue = Arc::clone(self);
        let stop = self.stop.clone();
        self.requeues.spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.add(request),
            }
        });
        delay
    }

    /// Delayed re-adds still waiting out their backoff
    pub fn pending_requeues(&self) -> usize {
        self.requeues.len()
    }

    /// Wait for every delayed re-add to finish. Returns once the queue is
    /// shut down and the cancelled sleeps have exited.
    pub async fn drained(&self) {
        self.requeues.wait().await
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out work; blocked `get` calls return `None` and pending
    /// delayed re-adds are dropped.
    pub fn shut_down(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutting_down = true;
        state.queue.clear();
        state.dirty.clear();
        drop(state);
        self.stop.cancel();
        self.requeues.close();
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().unwrap().shutting_down
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ObjectKey;
    use tokio::time::timeout;

    fn req(name: &str) -> Request {
        Request::new(ObjectKey::new("ns", name))
    }

    #[test]
    fn test_backoff() {
        assert_eq!(backoff(1), Duration::from_millis(5));
        assert_eq!(backoff(2), Duration::from_millis(10));
        assert_eq!(backoff(4), Duration::from_millis(40));
        assert_eq!(backoff(40), MAX_DELAY);
        assert_eq!(backoff(u32::MAX), MAX_DELAY);
    }

    #[tokio::test]
    async fn test_dedup_pending() {
        let queue = WorkQueue::new();
        queue.add(req("a"));
        queue.add(req("a"));
        queue.add(req("b"));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get().await, Some(req("a")));
        assert_eq!(queue.get().await, Some(req("b")));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_no_concurrent_processing_of_same_key() {
        let queue = WorkQueue::new();
        queue.add(req("a"));
        let first = queue.get().await.unwrap();

        // Re-added while in flight: held back until done.
        queue.add(req("a"));
        assert!(queue.is_empty());

        queue.done(&first);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some(req("a")));
    }

    #[tokio::test]
    async fn test_get_waits_for_add() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;

        queue.add(req("a"));
        let got = timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
        assert_eq!(got, Some(req("a")));
    }

    #[tokio::test]
    async fn test_shut_down_releases_waiters() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;

        queue.shut_down();
        let got = timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
        assert_eq!(got, None);

        queue.add(req("a"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_failures_and_forget() {
        let queue = Arc::new(WorkQueue::new());
        let a = req("a");

        assert_eq!(queue.record_failure(&a), Duration::from_millis(5));
        assert_eq!(queue.record_failure(&a), Duration::from_millis(10));
        assert_eq!(queue.failures(&a), 2);

        queue.forget(&a);
        assert_eq!(queue.failures(&a), 0);

        let delay = queue.requeue_rate_limited(a.clone());
        assert_eq!(delay, Duration::from_millis(5));
        let got = timeout(Duration::from_secs(5), queue.get()).await.unwrap();
        assert_eq!(got, Some(a));
    }

    #[tokio::test]
    async fn test_shut_down_cancels_delayed_requeues() {
        let queue = Arc::new(WorkQueue::new());
        let a = req("a");
        for _ in 0..20 {
            queue.record_failure(&a);
        }

        assert_eq!(queue.requeue_rate_limited(a), MAX_DELAY);
        assert_eq!(queue.pending_requeues(), 1);

        queue.shut_down();
        timeout(Duration::from_secs(5), queue.drained())
            .await
            .expect("delayed requeue outlived shutdown");
        assert_eq!(queue.pending_requeues(), 0);
        assert!(queue.is_empty());
    }
}
