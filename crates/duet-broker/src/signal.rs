//! Signaling messages relayed between the two members of a session.
//!
//! Negotiation payloads (SDP offers/answers, ICE candidates) are kept as raw
//! JSON text from the moment they are read off the socket until they are
//! written to the partner. The broker never parses them.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::{BrokerError, BrokerResult};

/// Opaque payload carried by a relayed message, exactly as the sender wrote it.
pub type Payload = Box<RawValue>;

/// Kinds of messages the router forwards within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    #[serde(rename = "chat-message")]
    Chat,
    #[serde(rename = "stranger-typing")]
    Typing,
}

impl SignalKind {
    /// Event name used on the wire, identical in both directions.
    pub fn event_name(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
            Self::Chat => "chat-message",
            Self::Typing => "stranger-typing",
        }
    }

    /// SDP / ICE exchange, forwarded byte-for-byte.
    pub fn is_negotiation(self) -> bool {
        matches!(self, Self::Offer | Self::Answer | Self::IceCandidate)
    }

    /// Advisory kinds that may be dropped when they arrive in bursts.
    pub fn is_coalescible(self) -> bool {
        matches!(self, Self::Typing)
    }
}

/// A message on its single relay hop from one member to the other.
#[derive(Debug, Clone)]
pub struct Signal {
    pub kind: SignalKind,
    pub payload: Option<Payload>,
}

impl Signal {
    pub fn new(kind: SignalKind, payload: Option<Payload>) -> Self {
        Self { kind, payload }
    }

    /// Check the envelope before it is forwarded.
    ///
    /// Negotiation payloads only need to be present. Chat payloads must carry
    /// exactly one of `text` or `emoji`, and text must fit `max_chat_length`.
    pub fn validate(&self, max_chat_length: usize) -> BrokerResult<()> {
        match self.kind {
            kind if kind.is_negotiation() => match &self.payload {
                Some(_) => Ok(()),
                None => Err(BrokerError::InvalidPayload {
                    reason: format!("{} requires a payload", kind.event_name()),
                }),
            },
            SignalKind::Chat => {
                let raw = self.payload.as_ref().ok_or_else(|| BrokerError::InvalidPayload {
                    reason: "chat-message requires a payload".into(),
                })?;
                let body: ChatBody =
                    serde_json::from_str(raw.get()).map_err(|e| BrokerError::InvalidPayload {
                        reason: format!("malformed chat-message: {e}"),
                    })?;
                body.validate(max_chat_length)
            }
            _ => Ok(()),
        }
    }
}

/// Structured side-channel content. Only inspected, never re-serialized.
#[derive(Debug, Deserialize)]
struct ChatBody {
    text: Option<String>,
    emoji: Option<String>,
}

impl ChatBody {
    fn validate(&self, max_chat_length: usize) -> BrokerResult<()> {
        match (self.text.as_deref(), self.emoji.as_deref()) {
            (Some(text), None) => {
                if text.trim().is_empty() {
                    return Err(BrokerError::InvalidPayload {
                        reason: "chat text cannot be empty".into(),
                    });
                }
                if text.chars().count() > max_chat_length {
                    return Err(BrokerError::InvalidPayload {
                        reason: format!("chat text exceeds {max_chat_length} characters"),
                    });
                }
                Ok(())
            }
            (None, Some(emoji)) if !emoji.is_empty() && emoji.chars().count() <= 16 => Ok(()),
            (None, Some(_)) => Err(BrokerError::InvalidPayload {
                reason: "emoji must be a short non-empty string".into(),
            }),
            _ => Err(BrokerError::InvalidPayload {
                reason: "chat-message needs exactly one of text or emoji".into(),
            }),
        }
    }
}
