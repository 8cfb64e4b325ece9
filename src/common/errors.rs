//! Error types for the application

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using our ClientError
pub type Result<T> = std::result::Result<T, ClientError>;

/// Error object carried inside a venue reply frame
///
/// The venue reports rejections (invalid token, insufficient balance,
/// market closed, stale proposal) as a well-formed payload rather than a
/// transport fault.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct VenueError {
    /// Machine-readable error code, e.g. `InvalidToken`
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Optional structured details (field name -> reason)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl VenueError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }
}

/// Main error type for client operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// WebSocket connection errors
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    /// WebSocket send/receive errors
    #[error("WebSocket communication error: {0}")]
    WebSocketCommunication(String),

    /// A request got no reply within the request window
    #[error("Request {req_id} timed out")]
    Timeout { req_id: u64 },

    /// The socket dropped while the request was in flight
    #[error("Connection lost before a reply arrived")]
    ConnectionLost,

    /// The connection is down and no longer reconnecting
    #[error("Not connected to the venue")]
    Disconnected,

    /// Error payload reported by the venue
    #[error("Venue error: {0}")]
    Venue(#[from] VenueError),

    /// JSON serialization/deserialization errors
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Outbound frame could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid API response
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A bot run is already active in this session
    #[error("A bot run is already active in this session")]
    RunConflict,

    /// Lifecycle transition not allowed from the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// True for failures of the connection itself rather than the request
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::WebSocketConnection(_)
                | ClientError::WebSocketCommunication(_)
                | ClientError::Timeout { .. }
                | ClientError::ConnectionLost
                | ClientError::Disconnected
        )
    }

    /// The venue error code, if this error came from the venue
    pub fn venue_code(&self) -> Option<&str> {
        match self {
            ClientError::Venue(err) => Some(err.code.as_str()),
            _ => None,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocketCommunication(err.to_string())
    }
}
