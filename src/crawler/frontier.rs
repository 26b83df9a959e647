//! Crawl frontier
//!
//! FIFO queue plus the visited set, behind one mutex. The visited set is the only
//! deduplication authority: a URL is marked visited when it is queued, so it can never
//! enter the queue a second time.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use url::Url;

/// A URL waiting to be fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub url: Url,
    pub depth: u32,
    pub parent: Option<String>,
    /// Enqueue order within the crawl
    pub seq: u64,
}

/// Result of offering a URL to the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    AlreadyVisited,
    /// Deeper than `max_depth`
    TooDeep,
    /// `max_pages` URLs already visited
    BudgetExhausted,
    Closed,
}

#[derive(Debug, Default)]
struct FrontierState {
    queue: VecDeque<FrontierEntry>,
    visited: HashSet<String>,
    in_flight: usize,
    closed: bool,
    next_seq: u64,
}

/// Work queue shared by the crawl's workers
#[derive(Debug)]
pub struct Frontier {
    max_depth: u32,
    max_pages: usize,
    idle_poll: Duration,
    state: Mutex<FrontierState>,
    changed: Notify,
}

impl Frontier {
    pub fn new(max_depth: u32, max_pages: usize, idle_poll: Duration) -> Self {
        Self {
            max_depth,
            max_pages,
            idle_poll,
            state: Mutex::new(FrontierState::default()),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrontierState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Offers a URL at `depth`; only `Queued` changes any state
    pub fn enqueue(&self, url: Url, depth: u32, parent: Option<&Url>) -> EnqueueOutcome {
        let outcome = {
            let mut state = self.lock();
            if state.closed {
                EnqueueOutcome::Closed
            } else if state.visited.contains(url.as_str()) {
                EnqueueOutcome::AlreadyVisited
            } else if depth > self.max_depth {
                EnqueueOutcome::TooDeep
            } else if state.visited.len() >= self.max_pages {
                EnqueueOutcome::BudgetExhausted
            } else {
                state.visited.insert(url.as_str().to_string());
                let seq = state.next_seq;
                state.next_seq += 1;
                state.queue.push_back(FrontierEntry {
                    url,
                    depth,
                    parent: parent.map(|p| p.to_string()),
                    seq,
                });
                EnqueueOutcome::Queued
            }
        };

        if outcome == EnqueueOutcome::Queued {
            self.changed.notify_one();
        }
        outcome
    }

    /// Pops the next entry, waiting while other workers may still produce more
    ///
    /// Returns `None` once the queue is empty with nothing in flight, when the frontier
    /// is closed, or when `cancel` fires. Every `Some` must be paired with
    /// [`Frontier::complete`].
    pub async fn next(&self, cancel: &CancellationToken) -> Option<FrontierEntry> {
        loop {
            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(entry) = state.queue.pop_front() {
                    state.in_flight += 1;
                    return Some(entry);
                }
                if state.in_flight == 0 {
                    drop(state);
                    // Wake the other idle workers so they see the drained state too
                    self.changed.notify_waiters();
                    return None;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.changed.notified() => {}
                _ = tokio::time::sleep(self.idle_poll) => {}
            }
        }
    }

    /// Marks one popped entry as finished
    pub fn complete(&self) {
        {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.changed.notify_waiters();
    }

    /// Stops accepting work and drops everything still queued
    ///
    /// Returns the number of entries dropped.
    pub fn close(&self) -> usize {
        let dropped = {
            let mut state = self.lock();
            state.closed = true;
            let dropped = state.queue.len();
            state.queue.clear();
            dropped
        };
        self.changed.notify_waiters();
        dropped
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn visited_len(&self) -> usize {
        self.lock().visited.len()
    }

    pub fn queued_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }
}
