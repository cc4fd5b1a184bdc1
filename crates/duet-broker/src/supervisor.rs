//! Lifecycle supervisor — disconnect, skip ("next"), leave, cancel, and wait expiry.
//!
//! Every path leaves both former session members either `Idle` or `Waiting`
//! before it returns; nothing keeps pointing at a closed session.

use duet_common::id::{ConnectionId, SessionId};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{BrokerError, BrokerResult};
use crate::outbound::ServerEvent;
use crate::registry::ConnectionState;
use crate::session::SessionState;
use crate::state::BrokerState;

impl BrokerState {
    /// Transport closed (or the connection was evicted). Idempotent.
    pub(crate) fn disconnect(&mut self, id: ConnectionId) {
        let Some(state) = self.registry.state(id) else {
            return;
        };

        match state {
            ConnectionState::Idle => {}
            ConnectionState::Waiting { .. } => {
                self.queue.remove(id);
            }
            ConnectionState::Paired { session } => {
                self.dissolve(session, id);
            }
        }

        if let Some(conn) = self.registry.unregister(id) {
            tracing::info!(
                connection = %id,
                connected_secs = (chrono::Utc::now() - conn.connected_at).num_seconds(),
                "Connection unregistered"
            );
        }
    }

    /// `next`: leave the current partner and go straight back into the queue.
    ///
    /// From `Idle` this is an ordinary `find-match`.
    pub(crate) fn skip(&mut self, id: ConnectionId, now: Instant) -> BrokerResult<()> {
        match self.registry.state(id) {
            None => Err(BrokerError::UnknownConnection),
            Some(ConnectionState::Idle) => self.find_match(id, now),
            Some(ConnectionState::Waiting { .. }) => Err(BrokerError::AlreadyQueued),
            Some(ConnectionState::Paired { session }) => {
                self.dissolve(session, id);
                self.enqueue(id, now)?;
                tracing::debug!(connection = %id, session = %session, "Skipped to next partner");
                self.try_match();
                Ok(())
            }
        }
    }

    /// `leave`: end the current session without asking for another one.
    pub(crate) fn leave(&mut self, id: ConnectionId) -> BrokerResult<()> {
        match self.registry.state(id) {
            None => Err(BrokerError::UnknownConnection),
            Some(ConnectionState::Paired { session }) => {
                self.dissolve(session, id);
                Ok(())
            }
            Some(_) => Err(BrokerError::NoActiveSession),
        }
    }

    /// `cancel`: withdraw a pending match request. A no-op when already idle.
    pub(crate) fn cancel(&mut self, id: ConnectionId) -> BrokerResult<()> {
        match self.registry.state(id) {
            None => Err(BrokerError::UnknownConnection),
            Some(ConnectionState::Idle) => Ok(()),
            Some(ConnectionState::Paired { .. }) => Err(BrokerError::NotWaiting),
            Some(ConnectionState::Waiting { .. }) => {
                self.queue.remove(id);
                self.registry.set_state(id, ConnectionState::Idle);
                tracing::debug!(connection = %id, "Match request cancelled");
                Ok(())
            }
        }
    }

    /// Take waiters older than `timeout` out of the queue and tell them so.
    pub(crate) fn expire_waiting(&mut self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        let expired = self.queue.drain_expired(now, timeout);
        for id in &expired {
            self.registry.set_state(*id, ConnectionState::Idle);
            self.notify(*id, ServerEvent::MatchTimeout);
        }
        expired
    }

    /// Dissolve `session` because `leaver` is going away.
    ///
    /// `leaver` returns to `Idle`; the partner returns to `Idle` and gets
    /// `partner-left`. The caller decides what happens to `leaver` next.
    pub(crate) fn dissolve(&mut self, session_id: SessionId, leaver: ConnectionId) {
        let partner = match self.sessions.get_mut(session_id) {
            Some(session) => {
                session.state = SessionState::Closing;
                session.partner_of(leaver)
            }
            None => {
                tracing::error!(
                    session = %session_id,
                    connection = %leaver,
                    "Connection referenced a session that no longer exists"
                );
                self.release(leaver, session_id);
                return;
            }
        };

        let Some(partner) = partner else {
            tracing::error!(
                session = %session_id,
                connection = %leaver,
                "Connection is not a member of the session it referenced"
            );
            self.release(leaver, session_id);
            self.force_close(session_id);
            return;
        };

        self.release(leaver, session_id);
        if self.release(partner, session_id) {
            self.notify(partner, ServerEvent::PartnerLeft);
        } else {
            tracing::error!(
                session = %session_id,
                connection = %partner,
                "Session member missing during teardown"
            );
        }

        if let Some(closed) = self.sessions.close(session_id) {
            tracing::info!(
                session = %session_id,
                left = %leaver,
                duration_secs = (chrono::Utc::now() - closed.created_at).num_seconds(),
                "Session closed"
            );
        }
    }

    /// Close a malformed session, releasing whichever members still point at it.
    pub(crate) fn force_close(&mut self, session_id: SessionId) {
        let members = match self.sessions.get_mut(session_id) {
            Some(session) => {
                session.state = SessionState::Closing;
                session.members()
            }
            None => return,
        };

        for member in members {
            if self.release(member, session_id) {
                self.notify(member, ServerEvent::PartnerLeft);
            }
        }

        self.sessions.close(session_id);
        tracing::warn!(session = %session_id, "Session force-closed");
    }

    /// Return `id` to `Idle` if it is still paired into `session_id`.
    pub(crate) fn release(&mut self, id: ConnectionId, session_id: SessionId) -> bool {
        match self.registry.get_mut(id) {
            Some(conn) if conn.state.session() == Some(session_id) => {
                conn.state = ConnectionState::Idle;
                conn.last_typing = None;
                true
            }
            _ => false,
        }
    }
}
