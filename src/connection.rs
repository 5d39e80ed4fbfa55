//! Connection model
//!
//! `Connection` is the dispatcher-owned record of one client session.
//! `ConnectionHandle` is what the transport side holds: the id, the queue to
//! drain, and a way to ask the dispatcher for changes. It never touches room
//! membership directly.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::dispatcher::{ConnectionInfo, HubHandle};
use crate::error::HubError;
use crate::message::EventEnvelope;
use crate::queue::{OutboundQueue, PushOutcome};
use crate::types::{ClientKind, ConnectionId, ConnectionState, RoomName};

/// Connect time and last inbound activity, shared by the dispatcher and the reader
#[derive(Debug)]
pub struct Activity {
    connected_at: Instant,
    /// Milliseconds after `connected_at` of the last inbound frame
    last_ms: AtomicU64,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            connected_at: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    /// Record inbound activity now
    pub fn touch(&self) {
        let elapsed = self.connected_at.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Time since the last inbound frame (or since connect)
    pub fn idle(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.uptime().saturating_sub(last)
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// Registered connection, as seen by the dispatcher
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: ConnectionId,
    /// Registration number; distinguishes reuses of the same id
    pub session: u64,
    /// Claimed kind (anonymous until identified)
    pub kind: ClientKind,
    /// User id from the identify handshake
    pub user_id: Option<String>,
    /// Rooms this connection belongs to (mirror of the room index)
    pub rooms: HashSet<RoomName>,
    /// Outbound queue shared with the writer task
    pub queue: OutboundQueue,
    /// Touched by the reader task on every inbound frame
    pub activity: Arc<Activity>,
    pub state: ConnectionState,
}

impl Connection {
    /// Create a new anonymous connection
    pub fn new(
        id: ConnectionId,
        session: u64,
        queue: OutboundQueue,
        activity: Arc<Activity>,
    ) -> Self {
        Self {
            id,
            session,
            kind: ClientKind::Anonymous,
            user_id: None,
            rooms: HashSet::new(),
            queue,
            activity,
            state: ConnectionState::Registered,
        }
    }

    /// Set kind and user id, moving to `Identified`
    pub fn identify(&mut self, kind: ClientKind, user_id: Option<String>) {
        self.kind = kind;
        self.user_id = user_id;
        self.state = ConnectionState::Identified;
    }

    /// Rooms implied by the current identity
    pub fn implicit_rooms(&self) -> Vec<RoomName> {
        let mut rooms = Vec::with_capacity(2);
        if self.kind == ClientKind::Admin {
            rooms.push(RoomName::admins());
        }
        if let Some(user_id) = &self.user_id {
            rooms.push(RoomName::for_user(user_id));
        }
        rooms
    }

    /// Enqueue without blocking; full queues drop their oldest entry
    pub fn enqueue(&self, envelope: Arc<EventEnvelope>) -> PushOutcome {
        self.queue.push(envelope)
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

#[derive(Debug)]
struct HandleInner {
    id: ConnectionId,
    session: u64,
    queue: OutboundQueue,
    activity: Arc<Activity>,
    hub: HubHandle,
    closing: AtomicBool,
}

impl HandleInner {
    /// Request unregister unless it was already requested
    fn close(&self) -> bool {
        if self.closing.swap(true, Ordering::AcqRel) {
            return false;
        }

        if !self.hub.send_unregister(self.id.clone(), Some(self.session)) {
            // No dispatcher left to close the queue for us
            self.queue.close();
        }
        true
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if self.close() {
            debug!(connection_id = %self.id, "Handle dropped without close, unregistering");
        }
    }
}

/// Transport-side handle to a registered connection
///
/// Cheap to clone; the reader and writer tasks each hold one. The first
/// `close()` (or dropping the last clone) unregisters the connection; later
/// calls do nothing.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: ConnectionId,
        session: u64,
        queue: OutboundQueue,
        activity: Arc<Activity>,
        hub: HubHandle,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                session,
                queue,
                activity,
                hub,
                closing: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.inner.id
    }

    pub(crate) fn session(&self) -> u64 {
        self.inner.session
    }

    /// Outbound queue drained by the writer task
    pub fn queue(&self) -> &OutboundQueue {
        &self.inner.queue
    }

    /// Wait for the next outbound envelope; `None` once unregistered
    pub async fn next_event(&self) -> Option<Arc<EventEnvelope>> {
        self.inner.queue.pop().await
    }

    /// Enqueue an envelope for this connection only (acks, pongs)
    pub fn enqueue(&self, envelope: EventEnvelope) -> PushOutcome {
        self.inner.queue.push(Arc::new(envelope))
    }

    /// Set kind/user id and join the implied rooms
    pub async fn identify(&self, kind: ClientKind, user_id: Option<String>) -> Result<(), HubError> {
        self.inner.hub.identify(self, kind, user_id).await
    }

    /// Join an ad hoc room
    pub async fn join_room(&self, room: impl Into<RoomName>) -> Result<bool, HubError> {
        self.inner.hub.join_room(self, room).await
    }

    /// Record inbound activity; keeps the idle reaper away
    pub fn touch(&self) {
        self.inner.activity.touch();
    }

    /// Dispatcher's current view of this connection
    pub async fn info(&self) -> Result<Option<ConnectionInfo>, HubError> {
        self.inner.hub.connection_info(self.id()).await
    }

    /// Unregister this connection; returns true only for the first call
    pub fn close(&self) -> bool {
        self.inner.close()
    }

    /// Mark closed without sending `Unregister`; the dispatcher has already
    /// removed (or is removing) the registration itself
    pub(crate) fn mark_closed(&self) {
        self.inner.closing.store(true, Ordering::Release);
    }

    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_creation() {
        let conn = Connection::new(
            ConnectionId::from("c-1"),
            1,
            OutboundQueue::new(4),
            Arc::new(Activity::new()),
        );

        assert_eq!(conn.kind, ClientKind::Anonymous);
        assert!(conn.user_id.is_none());
        assert!(conn.rooms.is_empty());
        assert_eq!(conn.state, ConnectionState::Registered);
        assert!(conn.implicit_rooms().is_empty());
    }

    #[test]
    fn test_admin_with_user_id_implies_two_rooms() {
        let mut conn = Connection::new(
            ConnectionId::from("c-1"),
            1,
            OutboundQueue::new(4),
            Arc::new(Activity::new()),
        );
        conn.identify(ClientKind::Admin, Some("u-9".to_string()));

        assert_eq!(conn.state, ConnectionState::Identified);
        assert_eq!(
            conn.implicit_rooms(),
            vec![RoomName::admins(), RoomName::for_user("u-9")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_tracks_idle_time() {
        let activity = Activity::new();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(activity.idle(), Duration::from_secs(30));

        activity.touch();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(activity.idle(), Duration::from_secs(5));
        assert_eq!(activity.uptime(), Duration::from_secs(35));
    }

    #[test]
    fn test_user_without_id_implies_no_rooms() {
        let mut conn = Connection::new(
            ConnectionId::from("c-1"),
            1,
            OutboundQueue::new(4),
            Arc::new(Activity::new()),
        );
        conn.identify(ClientKind::User, None);
        assert!(conn.implicit_rooms().is_empty());
        assert!(conn.is_active());
    }
}
