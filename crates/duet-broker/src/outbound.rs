//! Server → client events and the bounded per-connection outbound channel.

use duet_common::config::IceConfig;
use duet_common::id::SessionId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::session::Role;
use crate::signal::Signal;

/// Sending half of a connection's outbound queue. The registry holds the only
/// copy, so evicting a connection closes its queue.
pub type Outbox = mpsc::Sender<ServerEvent>;

/// Receiving half, drained by the connection's single writer task.
pub type Inbox = mpsc::Receiver<ServerEvent>;

/// Events the broker pushes to a connection.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Enqueue acknowledged.
    Waiting,
    /// Pairing established.
    MatchFound {
        session_id: SessionId,
        role: Role,
        ice_servers: Arc<[IceServer]>,
    },
    /// The session ended because the partner left, skipped, or dropped.
    PartnerLeft,
    /// Waited longer than the configured timeout and was taken out of the queue.
    MatchTimeout,
    /// Relayed from the partner, untouched.
    Signal(Signal),
}

/// ICE server entry handed to clients with `match-found` (STUN/TURN addresses only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Build the client-facing list from configuration. Empty URL groups are skipped.
    pub fn from_config(ice: &IceConfig) -> Vec<Self> {
        let mut servers = Vec::new();
        if !ice.stun_urls.is_empty() {
            servers.push(Self {
                urls: ice.stun_urls.clone(),
                username: None,
                credential: None,
            });
        }
        if !ice.turn_urls.is_empty() {
            servers.push(Self {
                urls: ice.turn_urls.clone(),
                username: ice.turn_username.clone(),
                credential: ice.turn_credential.clone(),
            });
        }
        servers
    }

    /// Public STUN servers, used when no configuration is supplied.
    pub fn default_stun() -> Vec<Self> {
        vec![Self {
            urls: vec![
                "stun:stun.l.google.com:19302".into(),
                "stun:stun1.l.google.com:19302".into(),
            ],
            username: None,
            credential: None,
        }]
    }
}
