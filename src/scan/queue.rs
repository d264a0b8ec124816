use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use super::cancel::CancelToken;

/// How often a waiter re-checks its cancel token.
const CANCEL_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Default)]
struct State {
    items: VecDeque<u16>,
    pending: u64,
    closed: bool,
    shutdown: bool,
    enqueued: u64,
    fetched: u64,
    done: u64,
}

/// Snapshot of the queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub enqueued: u64,
    pub fetched: u64,
    pub done: u64,
}

/// Ports waiting to be probed.
///
/// Removal (`fetch`) and completion (`mark_done`) are tracked separately, so
/// `wait_all_done` only returns once the last fetched port has actually been
/// processed, not when the queue merely looks empty.
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<State>,
    available: Condvar,
    finished: Condvar,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Workers never panic while holding the lock, the state stays consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pushes every port in `lower..=upper`, ascending.
    pub fn enqueue_all(&self, lower: u16, upper: u16) {
        let mut state = self.lock();
        let before = state.items.len();
        state.items.extend(lower..=upper);

        let added = (state.items.len() - before) as u64;
        state.pending += added;
        state.enqueued += added;
        drop(state);

        self.available.notify_all();
    }

    /// Takes the next port, parking while the queue is empty.
    ///
    /// Returns `None` once the queue was shut down, or closed and drained.
    pub fn fetch(&self) -> Option<u16> {
        let mut state = self.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(port) = state.items.pop_front() {
                state.fetched += 1;
                return Some(port);
            }
            if state.closed {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Records that a fetched port was fully processed, whatever the outcome.
    pub fn mark_done(&self) {
        let mut state = self.lock();
        debug_assert!(state.pending > 0, "mark_done without a pending port");
        state.pending = state.pending.saturating_sub(1);
        state.done += 1;

        if state.pending == 0 {
            drop(state);
            self.finished.notify_all();
        }
    }

    /// Blocks until every enqueued port was marked done, or the queue is shut down.
    pub fn wait_all_done(&self) {
        let mut state = self.lock();
        while state.pending > 0 && !state.shutdown {
            state = self
                .finished
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`WorkQueue::wait_all_done`], but gives up when `cancel` fires,
    /// shutting the queue down on the way out.
    ///
    /// Returns `true` only if every port was marked done.
    pub fn wait_all_done_or_cancel(&self, cancel: &CancelToken) -> bool {
        let mut state = self.lock();
        loop {
            if state.pending == 0 {
                return true;
            }
            if state.shutdown {
                return false;
            }
            if cancel.is_cancelled() {
                drop(state);
                self.shutdown();
                return false;
            }
            state = self
                .finished
                .wait_timeout(state, CANCEL_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// No more ports will be enqueued. Parked fetchers drain what is left.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    /// Stops handing out ports. Undelivered ports are dropped and never
    /// count as done.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.shutdown = true;
        state.items.clear();
        drop(state);

        self.available.notify_all();
        self.finished.notify_all();
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            enqueued: state.enqueued,
            fetched: state.fetched,
            done: state.done,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn fetches_in_ascending_order() {
        let queue = WorkQueue::new();
        queue.enqueue_all(1, 5);
        queue.close();

        let ports: Vec<_> = std::iter::from_fn(|| queue.fetch()).collect();
        assert_eq!(ports, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn empty_range_enqueues_nothing() {
        let queue = WorkQueue::new();
        queue.enqueue_all(10, 9);
        queue.close();

        assert_eq!(queue.fetch(), None);
        assert_eq!(queue.stats().enqueued, 0);
        queue.wait_all_done();
    }

    #[test]
    fn full_range_has_every_port_once() {
        let queue = WorkQueue::new();
        queue.enqueue_all(1, u16::MAX);
        queue.close();

        let mut expected = 1u32;
        while let Some(port) = queue.fetch() {
            assert_eq!(port as u32, expected);
            expected += 1;
            queue.mark_done();
        }

        assert_eq!(expected, 65536);
        queue.wait_all_done();
        assert_eq!(
            queue.stats(),
            QueueStats {
                enqueued: 65535,
                fetched: 65535,
                done: 65535,
            }
        );
    }

    #[test]
    fn removal_alone_does_not_complete() {
        let queue = WorkQueue::new();
        queue.enqueue_all(1, 1);
        queue.close();
        assert_eq!(queue.fetch(), Some(1));

        // Empty but still in flight.
        assert!(!queue.wait_all_done_or_cancel(&{
            let token = CancelToken::new();
            token.cancel();
            token
        }));
    }

    #[test]
    fn waiter_unblocks_after_last_mark_done() {
        let queue = Arc::new(WorkQueue::new());
        queue.enqueue_all(1, 100);
        queue.close();

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    while queue.fetch().is_some() {
                        queue.mark_done();
                    }
                })
            })
            .collect();

        queue.wait_all_done();
        let stats = queue.stats();
        assert_eq!(stats.fetched, 100);
        assert_eq!(stats.done, 100);

        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn parked_fetcher_wakes_on_enqueue() {
        let queue = Arc::new(WorkQueue::new());
        let fetcher = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.fetch())
        };

        thread::sleep(Duration::from_millis(50));
        queue.enqueue_all(42, 42);

        assert_eq!(fetcher.join().unwrap(), Some(42));
    }

    #[test]
    fn close_releases_parked_fetchers() {
        let queue = Arc::new(WorkQueue::new());
        let fetchers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.fetch())
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        queue.close();

        for fetcher in fetchers {
            assert_eq!(fetcher.join().unwrap(), None);
        }
    }

    #[test]
    fn shutdown_drops_undelivered_ports() {
        let queue = WorkQueue::new();
        queue.enqueue_all(1, 10);
        assert_eq!(queue.fetch(), Some(1));
        queue.mark_done();

        queue.shutdown();
        assert_eq!(queue.fetch(), None);
        // Returns despite nine ports never being processed.
        queue.wait_all_done();

        let stats = queue.stats();
        assert_eq!(stats.enqueued, 10);
        assert_eq!(stats.fetched, 1);
        assert_eq!(stats.done, 1);
    }

    #[test]
    fn cancel_interrupts_waiter() {
        let queue = Arc::new(WorkQueue::new());
        queue.enqueue_all(1, 3);
        let token = CancelToken::new();

        let waiter = {
            let queue = Arc::clone(&queue);
            let token = token.clone();
            thread::spawn(move || queue.wait_all_done_or_cancel(&token))
        };

        thread::sleep(Duration::from_millis(50));
        token.cancel();

        assert!(!waiter.join().unwrap());
        assert_eq!(queue.fetch(), None);
    }
}
