//! Real-time Event Hub for the Restaurant Backend
//!
//! Pushes live order, food and admin events to connected WebSocket clients,
//! grouped into rooms that clients join when they identify themselves.
//!
//! # Features
//! - WebSocket connection handling
//! - Identify handshake (`admin` / `user`)
//! - Rooms: `admins`, `user:<userId>`, and ad hoc names
//! - Publish to a room, a user, all admins, or everyone
//! - Bounded per-connection queues with drop-oldest backpressure
//! - Disconnection handling with exactly-once unregister
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Dispatcher` is the central actor owning the connection registry and rooms
//! - Each connection has a reader task and a writer task
//! - Publishing pushes into per-connection queues and never blocks
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use order_event_hub::{handle_connection, HubHandle, OrderNotifier};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     let hub = HubHandle::spawn(256);
//!
//!     // Business handlers publish through the notifier
//!     let notifier = OrderNotifier::new(hub.clone());
//!     notifier.food_deleted("f-1");
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(stream, hub.clone()));
//!     }
//! }
//! ```

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod message;
pub mod notifier;
pub mod queue;
pub mod room;
pub mod types;

// Re-export main types for convenience
pub use config::HubConfig;
pub use connection::{Activity, Connection, ConnectionHandle};
pub use dispatcher::{
    ConnectionInfo, Dispatcher, HubCommand, HubHandle, HubStats, MembershipSnapshot,
    PublishTarget,
};
pub use error::{ConfigError, HubError};
pub use handler::{handle_connection, ConnectParams};
pub use message::{ClientRequest, EventEnvelope, IdentifyPayload};
pub use notifier::OrderNotifier;
pub use queue::{OutboundQueue, PushOutcome};
pub use room::{Room, RoomIndex};
pub use types::{ClientKind, ConnectionId, ConnectionState, RoomName};
