//! Error types shared across the gateway, REST and relay layers

use std::time::Duration;

/// Gateway and transport failures
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The transport was used before it opened or after it closed
    #[error("transport is not connected")]
    NotConnected,

    /// No Hello frame arrived within the handshake bound
    #[error("no hello received within {0:?}")]
    HandshakeTimeout(Duration),

    /// A frame could not be decoded; logged and dropped by the session
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The transport closed before the handshake finished
    #[error("connection closed: {0}")]
    Closed(String),

    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

/// REST call failures
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The referenced thread or channel no longer exists remotely
    #[error("remote resource not found: {0}")]
    RemoteNotFound(String),

    #[error("platform returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::RemoteNotFound(_))
    }
}

/// Why a relay attempt failed
#[derive(Debug, thiserror::Error)]
pub enum RelayCause {
    #[error("gateway session is not ready")]
    SessionUnavailable,

    #[error("thread resolution failed: {0}")]
    ThreadResolution(#[source] ApiError),

    #[error("message submission failed: {0}")]
    Submission(#[source] ApiError),

    /// Some chunks of a long message were posted before a later one failed
    #[error("message partially submitted, {} chunk(s) posted: {cause}", .sent.len())]
    PartialSubmission {
        /// Ids of the chunks already posted, in order
        sent: Vec<String>,
        #[source]
        cause: ApiError,
    },

    #[error("message content is empty")]
    EmptyContent,
}

/// Single failure signal surfaced for one user action
#[derive(Debug, thiserror::Error)]
#[error("relay failed for user {user_id}: {cause}")]
pub struct RelayFailed {
    pub user_id: String,
    #[source]
    pub cause: RelayCause,
}

impl RelayFailed {
    pub fn new(user_id: impl Into<String>, cause: RelayCause) -> Self {
        Self {
            user_id: user_id.into(),
            cause,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
pub type ApiResult<T> = Result<T, ApiError>;
