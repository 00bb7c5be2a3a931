// One-shot deferred tasks keyed by wall-clock milliseconds.
//
// Humanized notes that land a few milliseconds after the tick that produced
// them wait here until due. Note-offs are not queued: every note carries its
// duration and the output ends it. Entries are
// ordered by `(due_ms, sequence)`, where `sequence` is a monotonic counter,
// so tasks due at the same instant fire in scheduling order and the queue is
// fully deterministic.
//
// `schedule()` returns a `TimerHandle`; `cancel()` marks the handle dead and
// the entry is discarded when it reaches the front. The engine drains due
// tasks at the start of every tick and from `Engine::poll_timers()`.

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(pub u64);

#[derive(Debug, Clone)]
struct Entry<T> {
    due_ms: f64,
    sequence: u64,
    task: T,
}

// Min-heap on (due_ms, sequence) over std's max-heap: reverse the order.
impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due_ms
            .total_cmp(&self.due_ms)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Debug, Clone)]
pub struct TimerQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    cancelled: BTreeSet<u64>,
    next_sequence: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        TimerQueue {
            heap: BinaryHeap::new(),
            cancelled: BTreeSet::new(),
            next_sequence: 0,
        }
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` at `due_ms`. Non-finite times fire immediately.
    pub fn schedule(&mut self, due_ms: f64, task: T) -> TimerHandle {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let due_ms = if due_ms.is_finite() { due_ms } else { f64::NEG_INFINITY };
        self.heap.push(Entry { due_ms, sequence, task });
        TimerHandle(sequence)
    }

    /// Cancel a pending task. Returns false if it already fired or was
    /// never scheduled here.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        if self.cancelled.contains(&handle.0) {
            return false;
        }
        let pending = self.heap.iter().any(|e| e.sequence == handle.0);
        if pending {
            self.cancelled.insert(handle.0);
        }
        pending
    }

    fn discard_cancelled(&mut self) {
        while let Some(top) = self.heap.peek() {
            if !self.cancelled.remove(&top.sequence) {
                break;
            }
            self.heap.pop();
        }
    }

    pub fn peek_due(&mut self) -> Option<f64> {
        self.discard_cancelled();
        self.heap.peek().map(|e| e.due_ms)
    }

    /// Pop the next live task due at or before `now_ms`.
    pub fn pop_due(&mut self, now_ms: f64) -> Option<T> {
        self.discard_cancelled();
        if self.heap.peek().is_some_and(|e| e.due_ms <= now_ms) {
            self.heap.pop().map(|e| e.task)
        } else {
            None
        }
    }

    /// Every live task due at or before `now_ms`, in firing order.
    pub fn drain_due(&mut self, now_ms: f64) -> Vec<T> {
        let mut due = Vec::new();
        while let Some(task) = self.pop_due(now_ms) {
            due.push(task);
        }
        due
    }

    /// Remove everything, returning live tasks in firing order.
    pub fn drain_all(&mut self) -> Vec<T> {
        self.drain_due(f64::INFINITY)
    }

    /// Number of live pending tasks.
    pub fn len(&self) -> usize {
        self.heap.len() - self.cancelled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
