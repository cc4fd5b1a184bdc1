//! Connection registry — every live client transport and its matchmaking state.
//!
//! The registry owns each [`Connection`], including the only sending half of
//! its outbound queue. Everything else refers to connections by id.

use chrono::{DateTime, Utc};
use duet_common::id::{ConnectionId, SessionId};
use std::collections::HashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;

use crate::outbound::{Outbox, ServerEvent};

/// Where a connection stands in the matchmaking lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Waiting { since: Instant },
    Paired { session: SessionId },
}

impl ConnectionState {
    pub fn session(&self) -> Option<SessionId> {
        match self {
            Self::Paired { session } => Some(*session),
            _ => None,
        }
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Waiting { .. })
    }
}

/// One live client connection.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub state: ConnectionState,
    pub connected_at: DateTime<Utc>,
    /// Last typing notification actually forwarded, for coalescing.
    pub last_typing: Option<Instant>,
    outbox: Outbox,
}

impl Connection {
    /// Queue an event without waiting. Fails when the queue is full or the
    /// writer has gone away.
    pub fn push(&self, event: ServerEvent) -> Result<(), TrySendError<ServerEvent>> {
        self.outbox.try_send(event)
    }
}

/// All live connections, keyed by id.
#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<ConnectionId, Connection>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a freshly established connection in the `Idle` state.
    pub fn register(&mut self, outbox: Outbox) -> ConnectionId {
        let id = ConnectionId::new();
        self.connections.insert(
            id,
            Connection {
                id,
                state: ConnectionState::Idle,
                connected_at: Utc::now(),
                last_typing: None,
                outbox,
            },
        );
        id
    }

    /// Remove a connection. Returns `None` if it was already gone.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.connections.get(&id).map(|c| c.state)
    }

    /// Overwrite a connection's state. Returns `false` if the id is unknown.
    pub fn set_state(&mut self, id: ConnectionId, state: ConnectionState) -> bool {
        match self.connections.get_mut(&id) {
            Some(conn) => {
                conn.state = state;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
