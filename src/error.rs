//! Error types for the event hub
//!
//! Defines hub-level errors and configuration errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::types::ConnectionId;

/// Hub-level errors
///
/// Only registration and request/response calls surface these; publishing is
/// fire-and-forget and never returns an error to the caller.
#[derive(Debug, Error)]
pub enum HubError {
    /// A connection with this id is already registered; retry with a fresh id
    #[error("Connection id already registered: {0}")]
    DuplicateId(ConnectionId),

    /// The connection was never registered or has already been unregistered
    #[error("Connection not registered: {0}")]
    NotRegistered(ConnectionId),

    /// The dispatcher task has stopped
    #[error("Hub is closed")]
    HubClosed,

    /// Inbound frame could not be parsed (closes that connection only)
    #[error("Malformed inbound frame: {0}")]
    MalformedFrame(String),

    /// WebSocket protocol error (fatal for the connection)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// An environment variable holds a value that cannot be used
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}
