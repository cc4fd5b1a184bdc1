//! The compact struct behind the broker's single lock.
//!
//! Registry, queue, and session table live together so that every transition
//! touching more than one of them happens in one critical section. The
//! matchmaker, router, and supervisor are `impl BrokerState` blocks in their
//! own modules.

use duet_common::id::ConnectionId;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;

use crate::BrokerSettings;
use crate::outbound::ServerEvent;
use crate::queue::WaitingQueue;
use crate::registry::Registry;
use crate::session::SessionTable;

pub(crate) struct BrokerState {
    pub(crate) registry: Registry,
    pub(crate) queue: WaitingQueue,
    pub(crate) sessions: SessionTable,
    pub(crate) settings: Arc<BrokerSettings>,
    /// Connections whose outbound queue rejected a push during this critical
    /// section. Torn down by [`BrokerState::settle`] before the lock is released.
    evictions: Vec<ConnectionId>,
}

impl BrokerState {
    pub(crate) fn new(settings: Arc<BrokerSettings>) -> Self {
        Self {
            registry: Registry::new(),
            queue: WaitingQueue::new(),
            sessions: SessionTable::new(),
            settings,
            evictions: Vec::new(),
        }
    }

    /// Push an event to a connection's outbound queue.
    ///
    /// A full or closed queue schedules the connection for eviction and
    /// returns `false`; the caller carries on with its own transition.
    pub(crate) fn notify(&mut self, id: ConnectionId, event: ServerEvent) -> bool {
        let Some(conn) = self.registry.get(id) else {
            return false;
        };
        match conn.push(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(connection = %id, "Outbound queue full, dropping slow connection");
                self.evictions.push(id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(connection = %id, "Outbound queue closed, dropping connection");
                self.evictions.push(id);
                false
            }
        }
    }

    /// Whether `id` has already been scheduled for teardown in this critical section.
    pub(crate) fn is_evicted(&self, id: ConnectionId) -> bool {
        self.evictions.contains(&id)
    }

    /// Tear down every connection evicted during the current critical section.
    ///
    /// Teardown may notify partners, which can in turn evict them, so this
    /// loops until nothing is pending.
    pub(crate) fn settle(&mut self) {
        while let Some(id) = self.evictions.pop() {
            self.disconnect(id);
        }
    }
}
