//! # duet-broker
//!
//! Matchmaking and signaling relay core for Duet.
//!
//! Anonymous participants ask for a partner, wait in a FIFO queue, get paired
//! into two-member sessions, and exchange WebRTC negotiation messages through
//! the broker until one of them skips, leaves, or disconnects.
//!
//! Architecture:
//! ```text
//!   find-match ──▶ Registry ──▶ WaitingQueue ──▶ Matchmaker ──▶ Session
//!                                    ▲                             │
//!                                    └──── Supervisor (next) ◀─────┤
//!   offer/answer/ice/chat ─────────────▶ Router ──▶ partner outbox ┘
//! ```
//!
//! All state sits in one struct behind one async mutex, so every transition
//! is a single critical section and `cancel`/`next` are linearized with
//! matching. Outbound delivery never waits: each connection has a bounded
//! queue and a connection whose queue overflows is dropped as if it had
//! disconnected.

pub mod error;
pub mod outbound;
pub mod queue;
pub mod registry;
pub mod router;
pub mod session;
pub mod signal;
pub mod sweeper;

mod matchmaker;
mod state;
mod supervisor;

#[cfg(test)]
mod tests;

pub use error::{BrokerError, BrokerResult};
pub use outbound::{IceServer, Inbox, ServerEvent};
pub use registry::ConnectionState;
pub use router::Delivery;
pub use session::{Role, Session, SessionState};
pub use signal::{Payload, Signal, SignalKind};

use duet_common::config::AppConfig;
use duet_common::id::{ConnectionId, SessionId};
use serde::Serialize;
use state::BrokerState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;

/// Tunables for the broker.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Bounded outbound queue length per connection. Values below 1 are raised to 1.
    pub outbound_capacity: usize,
    /// Minimum spacing of forwarded typing notifications per sender.
    pub typing_interval: Duration,
    pub max_chat_length: usize,
    /// Sent with every `match-found`.
    pub ice_servers: Arc<[IceServer]>,
}

impl BrokerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            outbound_capacity: config.matchmaking.outbound_capacity,
            typing_interval: Duration::from_millis(config.matchmaking.typing_interval_ms),
            max_chat_length: config.limits.max_chat_length,
            ice_servers: IceServer::from_config(&config.ice).into(),
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            outbound_capacity: 64,
            typing_interval: Duration::from_secs(1),
            max_chat_length: 2_000,
            ice_servers: IceServer::default_stun().into(),
        }
    }
}

/// A newly registered connection: its id and the receiving end of its
/// outbound queue. The queue closes when the broker drops the connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub inbox: Inbox,
}

/// Point-in-time counters.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerStats {
    pub connections: usize,
    pub waiting: usize,
    pub active_sessions: usize,
    pub sessions_created: u64,
}

/// Shared handle to the matchmaking state. Cheap to clone.
#[derive(Clone)]
pub struct Broker {
    state: Arc<Mutex<BrokerState>>,
    settings: Arc<BrokerSettings>,
}

impl Broker {
    pub fn new(mut settings: BrokerSettings) -> Self {
        // A zero-capacity channel cannot be built.
        settings.outbound_capacity = settings.outbound_capacity.max(1);
        let settings = Arc::new(settings);
        Self {
            state: Arc::new(Mutex::new(BrokerState::new(settings.clone()))),
            settings,
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Run one transition under the lock, then tear down anything it evicted.
    ///
    /// Timestamps are taken inside the closure so queue order and enqueue
    /// times always agree.
    async fn transition<R>(&self, f: impl FnOnce(&mut BrokerState) -> R) -> R {
        let mut state = self.state.lock().await;
        let out = f(&mut state);
        state.settle();
        out
    }

    /// Register a new transport. It starts `Idle`.
    pub async fn register(&self) -> ConnectionHandle {
        let (outbox, inbox) = mpsc::channel(self.settings.outbound_capacity);
        let id = self.transition(|s| s.registry.register(outbox)).await;
        tracing::debug!(connection = %id, "Connection registered");
        ConnectionHandle { id, inbox }
    }

    /// Transport closed. Tears down any session and queue entry. Idempotent.
    pub async fn unregister(&self, id: ConnectionId) {
        self.transition(|s| s.disconnect(id)).await
    }

    pub async fn find_match(&self, id: ConnectionId) -> BrokerResult<()> {
        self.transition(|s| s.find_match(id, Instant::now())).await
    }

    /// Skip the current partner and re-queue.
    pub async fn next(&self, id: ConnectionId) -> BrokerResult<()> {
        self.transition(|s| s.skip(id, Instant::now())).await
    }

    pub async fn cancel(&self, id: ConnectionId) -> BrokerResult<()> {
        self.transition(|s| s.cancel(id)).await
    }

    /// End the current session without re-queueing.
    pub async fn leave(&self, id: ConnectionId) -> BrokerResult<()> {
        self.transition(|s| s.leave(id)).await
    }

    pub async fn relay(&self, id: ConnectionId, signal: Signal) -> BrokerResult<Delivery> {
        self.transition(|s| s.relay(id, signal, Instant::now())).await
    }

    /// Return stale waiters to idle; see [`sweeper`].
    pub async fn expire_waiting(&self, timeout: Duration) -> Vec<ConnectionId> {
        self.transition(|s| s.expire_waiting(Instant::now(), timeout)).await
    }

    pub async fn connection_state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.state.lock().await.registry.state(id)
    }

    pub async fn is_queued(&self, id: ConnectionId) -> bool {
        self.state.lock().await.queue.contains(id)
    }

    pub async fn session(&self, id: SessionId) -> Option<Session> {
        self.state.lock().await.sessions.get(id).cloned()
    }

    /// Any live session that still names `id` as a member.
    pub async fn session_of(&self, id: ConnectionId) -> Option<Session> {
        self.state.lock().await.sessions.find_by_member(id).cloned()
    }

    pub async fn stats(&self) -> BrokerStats {
        let state = self.state.lock().await;
        BrokerStats {
            connections: state.registry.len(),
            waiting: state.queue.len(),
            active_sessions: state.sessions.active_count(),
            sessions_created: state.sessions.created_total(),
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerSettings::default())
    }
}
