//! Sessions — the pairing of exactly two connections.
//!
//! A session is the single source of truth for who is paired with whom. Its
//! member pair never changes while it is `Active`.

use chrono::{DateTime, Utc};
use duet_common::id::{ConnectionId, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which side opens the WebRTC negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub initiator: ConnectionId,
    pub responder: ConnectionId,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
}

impl Session {
    pub fn new(initiator: ConnectionId, responder: ConnectionId) -> Self {
        Self {
            id: SessionId::new(),
            initiator,
            responder,
            created_at: Utc::now(),
            state: SessionState::Active,
        }
    }

    pub fn members(&self) -> [ConnectionId; 2] {
        [self.initiator, self.responder]
    }

    /// The other member, or `None` if `id` is not in this session.
    pub fn partner_of(&self, id: ConnectionId) -> Option<ConnectionId> {
        if id == self.initiator {
            Some(self.responder)
        } else if id == self.responder {
            Some(self.initiator)
        } else {
            None
        }
    }

    pub fn role_of(&self, id: ConnectionId) -> Option<Role> {
        if id == self.initiator {
            Some(Role::Initiator)
        } else if id == self.responder {
            Some(Role::Responder)
        } else {
            None
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}

/// Live sessions keyed by id.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<SessionId, Session>,
    created_total: u64,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session; the first argument becomes the initiator.
    pub fn open(&mut self, initiator: ConnectionId, responder: ConnectionId) -> &Session {
        let session = Session::new(initiator, responder);
        self.created_total += 1;
        self.sessions.entry(session.id).or_insert(session)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Mark the session `Closed` and drop it from the table.
    pub fn close(&mut self, id: SessionId) -> Option<Session> {
        let mut session = self.sessions.remove(&id)?;
        session.state = SessionState::Closed;
        Some(session)
    }

    /// Any live session that still names `member`.
    pub fn find_by_member(&self, member: ConnectionId) -> Option<&Session> {
        self.sessions
            .values()
            .find(|s| s.members().contains(&member))
    }

    pub fn active_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_active()).count()
    }

    pub fn created_total(&self) -> u64 {
        self.created_total
    }
}
