//! Basic type definitions for the event hub
//!
//! Provides newtype wrappers for type safety:
//! - `ConnectionId`: opaque per-session identifier
//! - `RoomName`: broadcast target name (`admins`, `user:<id>`, ad hoc)
//! - `ClientKind`: who the connection claims to be
//! - `ConnectionState`: lifecycle tag

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique connection identifier (newtype pattern)
///
/// Usually a UUID v4, but a transport may supply its own string.
/// Implements Hash and Eq for use as HashMap keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Generate a new random connection ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room name
///
/// Rooms are created on first join and exist only while they have members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RoomName(pub String);

impl RoomName {
    /// Room every admin connection joins on identify
    pub const ADMINS: &'static str = "admins";

    pub fn admins() -> Self {
        Self(Self::ADMINS.to_string())
    }

    /// Personal room of a user: `user:<userId>`
    pub fn for_user(user_id: &str) -> Self {
        Self(format!("user:{}", user_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RoomName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&str> for RoomName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl std::fmt::Display for RoomName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of client behind a connection
///
/// Every connection starts `Anonymous`; only `admin` and `user` can be
/// claimed by an identify frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    #[default]
    #[serde(skip_deserializing)]
    Anonymous,
    User,
    Admin,
}

impl ClientKind {
    /// Parse the `type` query parameter / identify field
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Self::Admin),
            "user" => Some(Self::User),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Anonymous => "anonymous",
            Self::User => "user",
            Self::Admin => "admin",
        };
        f.write_str(name)
    }
}

/// Connection lifecycle
///
/// `Connecting` → `Registered` → `Identified` → `Closing` → `Closed`.
/// `Registered` and `Identified` are the active states; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Transport handshake in progress, not yet known to the dispatcher
    Connecting,
    Registered,
    Identified,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Whether publishes may still target this connection
    pub fn is_active(self) -> bool {
        matches!(self, Self::Registered | Self::Identified)
    }
}
