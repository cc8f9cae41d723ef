//! Deduplicating priority URL queue.

use parking_lot::Mutex;
use seine_types::{CrawlError, UrlRequest};
use seine_util::normalized_key;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Upper bound on a single wait cycle inside [`UrlQueue::pop`]; waiters
/// recheck the closed flag and cancellation at least this often.
const MAX_WAIT_CYCLE: Duration = Duration::from_secs(10);

/// Heap entry ordered by `(depth, priority, seq)`: shallowest first, then
/// lowest priority value, then FIFO.
struct QueueEntry {
    depth: u32,
    priority: u8,
    seq: u64,
    request: UrlRequest,
}

impl QueueEntry {
    fn key(&self) -> (u32, u8, u64) {
        (self.depth, self.priority, self.seq)
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

struct Inner {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    seen: HashSet<String>,
    closed: bool,
    seq: u64,
}

/// Outcome of a bounded-wait pop.
#[derive(Debug)]
pub enum Popped {
    Item(UrlRequest),
    TimedOut,
    Closed,
}

/// Priority queue with normalized-URL deduplication and blocking pop.
///
/// The seen set grows monotonically for the queue's lifetime and is only
/// consulted under the queue lock; a URL is enqueued at most once no matter
/// how many equivalent spellings are pushed.
pub struct UrlQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Default for UrlQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                seen: HashSet::new(),
                closed: false,
                seq: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue a request. Returns false without mutation when the normalized
    /// URL was already seen or the queue is closed; the caller uses the
    /// return value to keep progress counters exact.
    pub fn push(&self, request: UrlRequest) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        let key = normalized_key(&request.url);
        if !inner.seen.insert(key) {
            return false;
        }
        let seq = inner.seq;
        inner.seq += 1;
        inner.heap.push(Reverse(QueueEntry {
            depth: request.depth,
            priority: request.priority,
            seq,
            request,
        }));
        drop(inner);
        self.notify.notify_one();
        true
    }

    /// Wait up to `timeout` for an item. Returns `Closed` once the queue is
    /// closed and drained, `TimedOut` when the deadline passes, and an error
    /// on cancellation. Waits are internally bounded so a waker loss can
    /// never park a worker forever.
    pub async fn pop(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<Popped, CrawlError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(Reverse(entry)) = inner.heap.pop() {
                    return Ok(Popped::Item(entry.request));
                }
                if inner.closed {
                    return Ok(Popped::Closed);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Popped::TimedOut);
            }
            let wait = (deadline - now).min(MAX_WAIT_CYCLE);
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this URL (in normalized form) was ever enqueued here.
    pub fn contains(&self, url: &Url) -> bool {
        self.inner.lock().seen.contains(&normalized_key(url))
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.heap.clear();
        inner.seen.clear();
    }

    /// Close the queue and wake every waiter; subsequent pushes are refused.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
