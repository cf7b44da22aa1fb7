use std::collections::VecDeque;
use tokio::sync::oneshot;

use crate::config::QueueOrder;

/// Returned when the queue is at its limit and refuses another waiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOverflow;

/// A caller parked until a rotation frees a permit
#[derive(Debug)]
pub struct QueuedWaiter<T> {
    pub id: u64,
    tx: oneshot::Sender<T>,
}

impl<T> QueuedWaiter<T> {
    /// Resolve the wait. A caller that already gave up has dropped its
    /// receiver; the value is discarded in that case.
    pub fn complete(self, value: T) {
        let _ = self.tx.send(value);
    }
}

/// Bounded holding area for callers that arrived after the current window's
/// permits ran out.
///
/// Waiters are appended in arrival order; the drain side picks which end to
/// take from. A queue with limit 0 refuses every waiter.
#[derive(Debug)]
pub struct WaitQueue<T> {
    entries: VecDeque<QueuedWaiter<T>>,
    limit: usize,
}

impl<T> WaitQueue<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Park a waiter, refusing it when the queue is at its limit
    pub fn enqueue(&mut self, id: u64, tx: oneshot::Sender<T>) -> Result<(), QueueOverflow> {
        if self.entries.len() >= self.limit {
            return Err(QueueOverflow);
        }
        self.entries.push_back(QueuedWaiter { id, tx });
        Ok(())
    }

    /// Take the next waiter to grant, per the drain policy
    pub fn take_next(&mut self, order: QueueOrder) -> Option<QueuedWaiter<T>> {
        match order {
            QueueOrder::OldestFirst => self.entries.pop_front(),
            QueueOrder::NewestFirst => self.entries.pop_back(),
        }
    }

    /// Pull a parked waiter out by id, e.g. when its timeout fired
    pub fn remove(&mut self, id: u64) -> Option<QueuedWaiter<T>> {
        let pos = self.entries.iter().position(|w| w.id == id)?;
        self.entries.remove(pos)
    }

    /// Empty the queue, handing every waiter back to the caller
    pub fn drain_all(&mut self) -> Vec<QueuedWaiter<T>> {
        self.entries.drain(..).collect()
    }
}
