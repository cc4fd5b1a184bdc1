//! Wire protocol — JSON text frames of the form `{"event": "<name>", "data": ...}`.
//!
//! Relayed payloads are never decoded: the `data` field of `offer`, `answer`,
//! `ice-candidate`, and `chat-message` frames is captured as raw JSON text
//! and written back out byte-for-byte on the partner's socket.

use duet_broker::{BrokerError, IceServer, Role, ServerEvent, Signal, SignalKind};
use duet_common::id::SessionId;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Client → server event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientEvent {
    FindMatch,
    Offer,
    Answer,
    IceCandidate,
    ChatMessage,
    StrangerTyping,
    Next,
    Cancel,
    Leave,
}

#[derive(Deserialize)]
struct Envelope {
    event: ClientEvent,
    #[serde(default)]
    data: Option<Box<RawValue>>,
}

/// A decoded client frame.
#[derive(Debug)]
pub enum ClientMessage {
    FindMatch,
    Next,
    Cancel,
    Leave,
    /// Anything that is forwarded to the partner.
    Signal(Signal),
}

/// Frames the gateway could not make sense of.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Binary frames are not supported")]
    BinaryFrame,
}

impl ProtocolError {
    pub fn code(&self) -> u16 {
        match self {
            Self::Malformed(_) => 4002,
            Self::BinaryFrame => 4003,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "MALFORMED_MESSAGE",
            Self::BinaryFrame => "BINARY_FRAME",
        }
    }
}

/// Decode one text frame.
pub fn parse(text: &str) -> Result<ClientMessage, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let signal = |kind| Ok(ClientMessage::Signal(Signal::new(kind, envelope.data)));

    match envelope.event {
        ClientEvent::FindMatch => Ok(ClientMessage::FindMatch),
        ClientEvent::Next => Ok(ClientMessage::Next),
        ClientEvent::Cancel => Ok(ClientMessage::Cancel),
        ClientEvent::Leave => Ok(ClientMessage::Leave),
        ClientEvent::Offer => signal(SignalKind::Offer),
        ClientEvent::Answer => signal(SignalKind::Answer),
        ClientEvent::IceCandidate => signal(SignalKind::IceCandidate),
        ClientEvent::ChatMessage => signal(SignalKind::Chat),
        // Typing carries nothing worth forwarding.
        ClientEvent::StrangerTyping => Ok(ClientMessage::Signal(Signal::new(
            SignalKind::Typing,
            None,
        ))),
    }
}

#[derive(Serialize)]
struct Frame<'a, T: Serialize> {
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchFoundData<'a> {
    session_id: SessionId,
    role: Role,
    ice_servers: &'a [IceServer],
}

#[derive(Serialize)]
struct ErrorData<'a> {
    code: u16,
    error: &'a str,
    message: String,
}

fn frame<T: Serialize>(event: &str, data: Option<T>) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Frame { event, data })
}

/// Encode a broker event for the socket.
pub fn encode(event: &ServerEvent) -> Result<String, serde_json::Error> {
    match event {
        ServerEvent::Waiting => frame::<()>("waiting", None),
        ServerEvent::PartnerLeft => frame::<()>("partner-left", None),
        ServerEvent::MatchTimeout => frame::<()>("match-timeout", None),
        ServerEvent::MatchFound {
            session_id,
            role,
            ice_servers,
        } => frame(
            "match-found",
            Some(MatchFoundData {
                session_id: *session_id,
                role: *role,
                ice_servers,
            }),
        ),
        ServerEvent::Signal(signal) => frame(signal.kind.event_name(), signal.payload.as_deref()),
    }
}

fn error_frame(code: u16, error: &str, message: String) -> String {
    frame("error", Some(ErrorData { code, error, message }))
        .unwrap_or_else(|_| r#"{"event":"error"}"#.to_string())
}

/// Encode a rejected request.
pub fn encode_broker_error(err: &BrokerError) -> String {
    error_frame(err.code(), err.error_code(), err.to_string())
}

/// Encode an unreadable frame.
pub fn encode_protocol_error(err: &ProtocolError) -> String {
    error_frame(err.code(), err.error_code(), err.to_string())
}
