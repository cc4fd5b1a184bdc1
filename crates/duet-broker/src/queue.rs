//! Waiting queue — connections asking for a partner, oldest first.

use duet_common::id::ConnectionId;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{BrokerError, BrokerResult};

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    id: ConnectionId,
    enqueued_at: Instant,
}

/// FIFO pool of waiting connections. An id is present at most once.
#[derive(Debug, Default)]
pub struct WaitingQueue {
    entries: VecDeque<QueueEntry>,
    members: HashSet<ConnectionId>,
}

impl WaitingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `id` to the back of the queue.
    pub fn enqueue(&mut self, id: ConnectionId, now: Instant) -> BrokerResult<()> {
        if !self.members.insert(id) {
            return Err(BrokerError::AlreadyQueued);
        }
        self.entries.push_back(QueueEntry {
            id,
            enqueued_at: now,
        });
        Ok(())
    }

    /// Put `id` back at the head of the queue, keeping its original enqueue time.
    ///
    /// Used when a dequeued pair could not be matched and the surviving member
    /// must not lose its place in line.
    pub fn requeue_front(&mut self, id: ConnectionId, enqueued_at: Instant) -> BrokerResult<()> {
        if !self.members.insert(id) {
            return Err(BrokerError::AlreadyQueued);
        }
        self.entries.push_front(QueueEntry { id, enqueued_at });
        Ok(())
    }

    /// Take the two longest-waiting entries, oldest first.
    ///
    /// Returns `None` and leaves the queue untouched when fewer than two wait.
    pub fn dequeue_pair(&mut self) -> Option<(ConnectionId, ConnectionId)> {
        if self.entries.len() < 2 {
            return None;
        }
        let first = self.entries.pop_front()?;
        let second = self.entries.pop_front()?;
        self.members.remove(&first.id);
        self.members.remove(&second.id);
        debug_assert_ne!(first.id, second.id);
        Some((first.id, second.id))
    }

    /// Drop `id` from the queue. Returns whether it was present.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        if !self.members.remove(&id) {
            return false;
        }
        self.entries.retain(|e| e.id != id);
        true
    }

    /// Remove every entry that has waited at least `timeout`, oldest first.
    pub fn drain_expired(&mut self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        let mut expired = Vec::new();
        while let Some(front) = self.entries.front() {
            if now.saturating_duration_since(front.enqueued_at) < timeout {
                break;
            }
            let id = front.id;
            self.entries.pop_front();
            self.members.remove(&id);
            expired.push(id);
        }
        expired
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
