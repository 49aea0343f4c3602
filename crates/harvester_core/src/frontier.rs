//! Bounded, deduplicated containers of pending queries.
//!
//! Three disciplines share the [`Frontier`] trait:
//!
//! * [`UnorderedFrontier`]: a set drained in insertion order, soft capacity.
//! * [`BlockingFrontier`]: fixed-capacity queue; `add` waits up to a timeout for
//!   room, `take` waits for an entry, `try_take` never waits.
//! * [`PriorityFrontier`]: max-heap on score, capacity advisory only.
//!
//! Every implementation is internally synchronised so one harvester can be
//! shared by the workers of a harvest round.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub trait Frontier: Send + Sync {
    /// Inserts `query` unless an entry with the same string is present.
    /// Returns whether the query was accepted.
    fn add(&self, query: &str, score: f64) -> bool;

    /// Removes the next query according to the discipline.
    ///
    /// [`BlockingFrontier`] blocks until an entry is available; the other
    /// disciplines return `None` when empty.
    fn take(&self) -> Option<String>;

    /// Removes the next query without waiting, `None` when empty.
    ///
    /// Disciplines whose `take` blocks must override this.
    fn try_take(&self) -> Option<String> {
        self.take()
    }

    fn len(&self) -> usize;

    fn capacity(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `add` refuses entries once `capacity` is reached.
    fn enforces_capacity(&self) -> bool {
        true
    }

    /// Fraction of capacity in use, in `[0, 1]`; 0.5 when capacity is 0.
    fn fill_ratio(&self) -> f64 {
        let capacity = self.capacity();
        if capacity == 0 {
            return 0.5;
        }
        (self.len() as f64 / capacity as f64).clamp(0.0, 1.0)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct InsertionOrdered {
    order: VecDeque<String>,
    members: HashSet<String>,
}

/// Set discipline: removal in insertion order, `add` refused once the size
/// exceeds the capacity. A capacity of 0 means unbounded.
pub struct UnorderedFrontier {
    capacity: usize,
    inner: Mutex<InsertionOrdered>,
}

impl UnorderedFrontier {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(InsertionOrdered::default()),
        }
    }
}

impl Frontier for UnorderedFrontier {
    fn add(&self, query: &str, _score: f64) -> bool {
        let mut inner = lock(&self.inner);
        if self.capacity > 0 && inner.members.len() > self.capacity {
            return false;
        }
        if !inner.members.insert(query.to_string()) {
            return false;
        }
        inner.order.push_back(query.to_string());
        true
    }

    fn take(&self) -> Option<String> {
        let mut inner = lock(&self.inner);
        let query = inner.order.pop_front()?;
        inner.members.remove(&query);
        Some(query)
    }

    fn len(&self) -> usize {
        lock(&self.inner).members.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Fixed-capacity FIFO with bounded backpressure on `add`.
///
/// When several producers race for the last slots, the ones that cannot get
/// room within `add_timeout` give up and drop their query instead of
/// waiting forever.
pub struct BlockingFrontier {
    capacity: usize,
    add_timeout: Duration,
    queue: Mutex<VecDeque<String>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl BlockingFrontier {
    /// A capacity of 0 is raised to 1.
    pub fn new(capacity: usize, add_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            add_timeout,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn add_timeout(&self) -> Duration {
        self.add_timeout
    }
}

impl Frontier for BlockingFrontier {
    fn add(&self, query: &str, _score: f64) -> bool {
        let deadline = Instant::now() + self.add_timeout;
        let mut queue = lock(&self.queue);
        if queue.iter().any(|pending| pending == query) {
            return false;
        }
        while queue.len() >= self.capacity {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .not_full
                .wait_timeout(queue, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            queue = guard;
            // Another producer may have queued the same string while we waited.
            if queue.iter().any(|pending| pending == query) {
                return false;
            }
        }
        queue.push_back(query.to_string());
        self.not_empty.notify_one();
        true
    }

    fn take(&self) -> Option<String> {
        let mut queue = lock(&self.queue);
        loop {
            if let Some(query) = queue.pop_front() {
                self.not_full.notify_one();
                return Some(query);
            }
            queue = self
                .not_empty
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn try_take(&self) -> Option<String> {
        let query = lock(&self.queue).pop_front()?;
        self.not_full.notify_one();
        Some(query)
    }

    fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug)]
struct Ranked {
    score: f64,
    seq: u64,
    query: String,
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    // Higher score first; among equal scores the earlier insertion wins.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Heap {
    entries: BinaryHeap<Ranked>,
    members: HashSet<String>,
    next_seq: u64,
}

/// Score-ordered discipline.
///
/// The configured capacity is reported through [`Frontier::capacity`] and
/// feeds the explore/exploit ratio, but inserts beyond it are still
/// accepted. Re-adding a present query keeps its original score.
pub struct PriorityFrontier {
    capacity: usize,
    inner: Mutex<Heap>,
}

impl PriorityFrontier {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Heap::default()),
        }
    }
}

impl Frontier for PriorityFrontier {
    fn add(&self, query: &str, score: f64) -> bool {
        let mut inner = lock(&self.inner);
        if !inner.members.insert(query.to_string()) {
            return false;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.push(Ranked {
            score,
            seq,
            query: query.to_string(),
        });
        true
    }

    fn take(&self) -> Option<String> {
        let mut inner = lock(&self.inner);
        let ranked = inner.entries.pop()?;
        inner.members.remove(&ranked.query);
        Some(ranked.query)
    }

    fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn enforces_capacity(&self) -> bool {
        false
    }
}
