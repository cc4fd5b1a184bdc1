//! Signaling router — forwards messages between the two members of a session.

use duet_common::id::ConnectionId;
use tokio::time::Instant;

use crate::error::{BrokerError, BrokerResult};
use crate::outbound::ServerEvent;
use crate::signal::Signal;
use crate::state::BrokerState;

/// What happened to a relayed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the partner's outbound channel.
    Forwarded,
    /// Advisory message dropped because one was forwarded recently.
    Coalesced,
}

impl BrokerState {
    /// Forward `signal` from `sender` to its session partner.
    ///
    /// Messages from one sender reach the partner in arrival order. A partner
    /// whose outbound queue is full or closed is evicted and the call fails
    /// with `TransportFailure`.
    pub(crate) fn relay(
        &mut self,
        sender: ConnectionId,
        signal: Signal,
        now: Instant,
    ) -> BrokerResult<Delivery> {
        let conn = self
            .registry
            .get(sender)
            .ok_or(BrokerError::UnknownConnection)?;
        let session_id = conn.state.session().ok_or(BrokerError::NoActiveSession)?;
        let last_typing = conn.last_typing;

        let Some(session) = self.sessions.get(session_id) else {
            tracing::error!(
                session = %session_id,
                connection = %sender,
                "Paired connection points at a missing session"
            );
            self.release(sender, session_id);
            return Err(BrokerError::NoActiveSession);
        };
        if !session.is_active() {
            return Err(BrokerError::SessionClosing);
        }

        let partner = session.partner_of(sender);
        let partner_attached = partner
            .and_then(|p| self.registry.state(p))
            .and_then(|s| s.session())
            == Some(session_id);
        let Some(partner) = partner.filter(|_| partner_attached) else {
            tracing::error!(
                session = %session_id,
                connection = %sender,
                "Session has a missing member"
            );
            self.force_close(session_id);
            return Err(BrokerError::NoActiveSession);
        };

        signal.validate(self.settings.max_chat_length)?;

        if signal.kind.is_coalescible() {
            let recent = last_typing
                .is_some_and(|last| now.saturating_duration_since(last) < self.settings.typing_interval);
            if recent {
                return Ok(Delivery::Coalesced);
            }
            if let Some(conn) = self.registry.get_mut(sender) {
                conn.last_typing = Some(now);
            }
        }

        let kind = signal.kind;
        if self.notify(partner, ServerEvent::Signal(signal)) {
            tracing::trace!(
                session = %session_id,
                from = %sender,
                kind = kind.event_name(),
                "Relayed signal"
            );
            Ok(Delivery::Forwarded)
        } else {
            Err(BrokerError::TransportFailure)
        }
    }
}
