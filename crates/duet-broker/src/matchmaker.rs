//! Matchmaker — turns pairs of waiting connections into sessions.

use duet_common::id::ConnectionId;
use tokio::time::Instant;

use crate::error::{BrokerError, BrokerResult};
use crate::outbound::ServerEvent;
use crate::registry::ConnectionState;
use crate::session::Role;
use crate::state::BrokerState;

impl BrokerState {
    /// Handle `find-match`: queue an idle connection and try to pair it.
    pub(crate) fn find_match(&mut self, id: ConnectionId, now: Instant) -> BrokerResult<()> {
        match self.registry.state(id) {
            None => Err(BrokerError::UnknownConnection),
            Some(ConnectionState::Waiting { .. }) => Err(BrokerError::AlreadyQueued),
            Some(ConnectionState::Paired { .. }) => Err(BrokerError::AlreadyPaired),
            Some(ConnectionState::Idle) => {
                self.enqueue(id, now)?;
                self.try_match();
                Ok(())
            }
        }
    }

    /// Move an idle connection into the queue and acknowledge with `waiting`.
    pub(crate) fn enqueue(&mut self, id: ConnectionId, now: Instant) -> BrokerResult<()> {
        self.queue.enqueue(id, now)?;
        self.registry
            .set_state(id, ConnectionState::Waiting { since: now });

        tracing::debug!(
            connection = %id,
            depth = self.queue.len(),
            "Connection waiting for a match"
        );

        self.notify(id, ServerEvent::Waiting);
        Ok(())
    }

    /// Pair waiting connections until fewer than two remain.
    ///
    /// The earlier-enqueued member of each pair becomes the initiator. Each
    /// member is told about the match exactly once. Returns the number of
    /// sessions created.
    pub(crate) fn try_match(&mut self) -> usize {
        let mut created = 0;

        while let Some((first, second)) = self.queue.dequeue_pair() {
            let unpairable: Vec<ConnectionId> = [first, second]
                .into_iter()
                .filter(|id| !self.is_pairable(*id))
                .collect();
            if !unpairable.is_empty() {
                self.skip_pair(first, second, &unpairable);
                continue;
            }

            let session_id = self.sessions.open(first, second).id;
            self.registry
                .set_state(first, ConnectionState::Paired { session: session_id });
            self.registry
                .set_state(second, ConnectionState::Paired { session: session_id });

            tracing::info!(
                session = %session_id,
                initiator = %first,
                responder = %second,
                "Match found"
            );

            let ice_servers = self.settings.ice_servers.clone();
            for (id, role) in [(first, Role::Initiator), (second, Role::Responder)] {
                self.notify(
                    id,
                    ServerEvent::MatchFound {
                        session_id,
                        role,
                        ice_servers: ice_servers.clone(),
                    },
                );
            }
            created += 1;
        }

        created
    }

    /// Still waiting and not already on its way out.
    fn is_pairable(&self, id: ConnectionId) -> bool {
        !self.is_evicted(id) && self.registry.state(id).is_some_and(|s| s.is_waiting())
    }

    /// Drop the unpairable members of a dequeued pair and put the other back
    /// at the head of the queue with its original wait time.
    fn skip_pair(&mut self, first: ConnectionId, second: ConnectionId, unpairable: &[ConnectionId]) {
        for id in unpairable {
            if self.is_evicted(*id) {
                tracing::debug!(connection = %id, "Skipping connection pending eviction");
            } else {
                tracing::error!(connection = %id, "Queue held a connection that was not waiting");
            }
        }

        // Reverse order so `first` ends up ahead of `second`.
        for id in [second, first] {
            if unpairable.contains(&id) {
                continue;
            }
            if let Some(ConnectionState::Waiting { since }) = self.registry.state(id) {
                if let Err(e) = self.queue.requeue_front(id, since) {
                    tracing::error!(connection = %id, error = %e, "Failed to requeue waiter");
                }
            }
        }
    }
}
