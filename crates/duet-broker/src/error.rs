//! Broker error taxonomy.
//!
//! Every variant is scoped to a single connection; none of them stops the service.

/// Errors returned by broker operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection is not registered")]
    UnknownConnection,

    #[error("Not in an active session")]
    NoActiveSession,

    #[error("Session is closing")]
    SessionClosing,

    #[error("Already waiting for a match")]
    AlreadyQueued,

    #[error("Already paired with a partner")]
    AlreadyPaired,

    #[error("Not waiting for a match")]
    NotWaiting,

    #[error("Partner transport failed")]
    TransportFailure,

    #[error("Invalid payload: {reason}")]
    InvalidPayload { reason: String },
}

impl BrokerError {
    /// Numeric code reported to clients in `error` events.
    pub fn code(&self) -> u16 {
        match self {
            Self::InvalidPayload { .. } => 4000,
            Self::UnknownConnection => 4001,
            Self::NoActiveSession => 4010,
            Self::SessionClosing => 4011,
            Self::AlreadyQueued => 4020,
            Self::AlreadyPaired => 4021,
            Self::NotWaiting => 4022,
            Self::TransportFailure => 5000,
        }
    }

    /// Stable string code for programmatic handling by clients.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownConnection => "UNKNOWN_CONNECTION",
            Self::NoActiveSession => "NO_ACTIVE_SESSION",
            Self::SessionClosing => "SESSION_CLOSING",
            Self::AlreadyQueued => "ALREADY_QUEUED",
            Self::AlreadyPaired => "ALREADY_PAIRED",
            Self::NotWaiting => "NOT_WAITING",
            Self::TransportFailure => "TRANSPORT_FAILURE",
            Self::InvalidPayload { .. } => "INVALID_PAYLOAD",
        }
    }

    /// Duplicate requests that leave state untouched.
    pub fn is_idempotent_noop(&self) -> bool {
        matches!(self, Self::AlreadyQueued | Self::AlreadyPaired)
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;
