//! Dispatcher actor implementation
//!
//! The single serialization point for the hub: it owns the connection
//! registry and the room index, and processes registration, membership and
//! publish commands strictly in arrival order. Publishing only pushes into
//! per-connection queues, which never block, so one slow consumer cannot
//! stall delivery to the others.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::HubConfig;
use crate::connection::{Activity, Connection, ConnectionHandle};
use crate::error::HubError;
use crate::message::{events, EventEnvelope};
use crate::queue::{OutboundQueue, PushOutcome};
use crate::room::RoomIndex;
use crate::types::{ClientKind, ConnectionId, ConnectionState, RoomName};

/// Type alias for the one-shot reply channel used by request commands
pub type Response<T> = oneshot::Sender<Result<T, HubError>>;

/// Where a publish goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishTarget {
    /// Every member of one room
    Room(RoomName),
    /// Shorthand for the room `user:<id>`
    User(String),
    /// Every registered connection
    All,
}

impl PublishTarget {
    /// Room this target resolves to, if it is room-scoped
    pub fn room(&self) -> Option<RoomName> {
        match self {
            PublishTarget::Room(room) => Some(room.clone()),
            PublishTarget::User(user_id) => Some(RoomName::for_user(user_id)),
            PublishTarget::All => None,
        }
    }
}

/// Commands sent to the Dispatcher actor
#[derive(Debug)]
pub enum HubCommand {
    /// Admit a new connection
    Register {
        id: ConnectionId,
        respond_to: Response<ConnectionHandle>,
    },
    /// Set kind/user id and apply the implicit joins
    Identify {
        id: ConnectionId,
        session: u64,
        kind: ClientKind,
        user_id: Option<String>,
        respond_to: Response<()>,
    },
    /// Join an ad hoc room
    JoinRoom {
        id: ConnectionId,
        session: u64,
        room: RoomName,
        respond_to: Response<bool>,
    },
    /// Remove a connection from every room and discard its queue.
    /// `session: None` matches any registration with that id.
    Unregister {
        id: ConnectionId,
        session: Option<u64>,
    },
    /// Fan an envelope out to the resolved members
    Publish {
        target: PublishTarget,
        envelope: Arc<EventEnvelope>,
    },
    /// Describe one connection
    Inspect {
        id: ConnectionId,
        respond_to: oneshot::Sender<Option<ConnectionInfo>>,
    },
    /// Copy both directions of membership
    Snapshot {
        respond_to: oneshot::Sender<MembershipSnapshot>,
    },
    /// Counters
    Stats {
        respond_to: oneshot::Sender<HubStats>,
    },
    /// Close every queue and stop
    Shutdown,
}

/// Hub-wide counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Registered connections
    pub connections: usize,
    /// Non-empty rooms
    pub rooms: usize,
    /// Publish commands processed
    pub published: u64,
    /// Envelopes enqueued across all recipients
    pub delivered: u64,
    /// Envelopes discarded by drop-oldest
    pub dropped: u64,
    /// Connections unregistered for being idle too long
    pub reaped: u64,
}

/// Point-in-time view of one connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub kind: ClientKind,
    pub user_id: Option<String>,
    pub rooms: HashSet<RoomName>,
    pub state: ConnectionState,
    pub queued: usize,
    pub dropped: u64,
    pub connected_at: Instant,
    /// Time since the last inbound frame
    pub idle: Duration,
}

impl ConnectionInfo {
    /// Reply to a `connectionQuality` request
    pub fn quality_report(&self) -> EventEnvelope {
        let mut rooms: Vec<&str> = self.rooms.iter().map(RoomName::as_str).collect();
        rooms.sort_unstable();
        EventEnvelope::new(
            events::CONNECTION_QUALITY,
            json!({
                "connected": self.state.is_active(),
                "uptime": self.connected_at.elapsed().as_millis() as u64,
                "idleTime": self.idle.as_millis() as u64,
                "rooms": rooms,
                "type": self.kind,
            }),
        )
    }
}

/// Both directions of room membership at one instant
#[derive(Debug, Clone, Default)]
pub struct MembershipSnapshot {
    /// Connection → rooms it lists
    pub connections: HashMap<ConnectionId, HashSet<RoomName>>,
    /// Room → connections it lists
    pub rooms: HashMap<RoomName, HashSet<ConnectionId>>,
}

impl MembershipSnapshot {
    /// Every (connection, room) pair appears in both directions or neither
    pub fn is_consistent(&self) -> bool {
        let forward = self.connections.iter().all(|(id, rooms)| {
            rooms
                .iter()
                .all(|room| self.rooms.get(room).is_some_and(|m| m.contains(id)))
        });
        let backward = self.rooms.iter().all(|(room, members)| {
            !members.is_empty()
                && members.iter().all(|id| {
                    self.connections
                        .get(id)
                        .is_some_and(|rooms| rooms.contains(room))
                })
        });
        forward && backward
    }

    pub fn rooms_of(&self, id: &ConnectionId) -> Option<&HashSet<RoomName>> {
        self.connections.get(id)
    }

    pub fn members_of(&self, room: &RoomName) -> Option<&HashSet<ConnectionId>> {
        self.rooms.get(room)
    }
}

/// The Dispatcher actor
///
/// Owns all membership state and processes commands from handles in order.
pub struct Dispatcher {
    /// All registered connections: ConnectionId -> Connection
    connections: HashMap<ConnectionId, Connection>,
    /// Room name -> members
    rooms: RoomIndex,
    /// Command receiver channel
    receiver: mpsc::UnboundedReceiver<HubCommand>,
    /// Lets registration build handles without keeping the channel open
    weak_sender: mpsc::WeakUnboundedSender<HubCommand>,
    /// Capacity of each new outbound queue
    queue_capacity: usize,
    /// Connections idle longer than this are unregistered
    idle_timeout: Option<Duration>,
    /// How often idle connections are looked for
    sweep_interval: Duration,
    next_session: u64,
    stats: HubStats,
}

impl Dispatcher {
    /// Create a dispatcher and the handle used to talk to it
    ///
    /// The command channel is unbounded so that publishers never wait;
    /// memory is bounded by the per-connection queues instead.
    /// No idle reaping; see `from_config`.
    pub fn new(queue_capacity: usize) -> (Self, HubHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let dispatcher = Self {
            connections: HashMap::new(),
            rooms: RoomIndex::new(),
            weak_sender: sender.downgrade(),
            receiver,
            queue_capacity: queue_capacity.max(1),
            idle_timeout: None,
            sweep_interval: Duration::from_secs(60),
            next_session: 0,
            stats: HubStats::default(),
        };
        (dispatcher, HubHandle { sender })
    }

    /// Create a dispatcher with queue capacity and idle reaping from `config`
    pub fn from_config(config: &HubConfig) -> (Self, HubHandle) {
        let (mut dispatcher, handle) = Self::new(config.queue_capacity);
        dispatcher.idle_timeout = config.idle_timeout;
        dispatcher.sweep_interval = config.sweep_interval.max(Duration::from_millis(1));
        (dispatcher, handle)
    }

    /// Run the Dispatcher event loop
    ///
    /// Processes commands until a shutdown command arrives or all handles are dropped.
    /// With an idle timeout set, also sweeps for idle connections every `sweep_interval`.
    pub async fn run(mut self) {
        info!(
            queue_capacity = self.queue_capacity,
            idle_timeout = ?self.idle_timeout,
            "Dispatcher started"
        );

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = sweep.tick(), if self.idle_timeout.is_some() => {
                    self.reap_idle();
                }
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else {
                        break;
                    };
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
            }
        }

        self.close_all();
        info!(
            published = self.stats.published,
            delivered = self.stats.delivered,
            dropped = self.stats.dropped,
            reaped = self.stats.reaped,
            "Dispatcher shutting down"
        );
    }

    /// Process a single command; returns false to stop the loop
    fn handle_command(&mut self, cmd: HubCommand) -> bool {
        match cmd {
            HubCommand::Register { id, respond_to } => {
                let result = self.handle_register(id);
                if let Err(Ok(handle)) = respond_to.send(result) {
                    // Caller gave up before the reply; nobody will ever close this one
                    debug!(connection_id = %handle.id(), "Registration abandoned by caller");
                    handle.mark_closed();
                    self.handle_unregister(handle.id(), Some(handle.session()));
                }
            }
            HubCommand::Identify {
                id,
                session,
                kind,
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_identify(&id, session, kind, user_id));
            }
            HubCommand::JoinRoom {
                id,
                session,
                room,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_join_room(&id, session, room));
            }
            HubCommand::Unregister { id, session } => {
                self.handle_unregister(&id, session);
            }
            HubCommand::Publish { target, envelope } => {
                self.handle_publish(target, envelope);
            }
            HubCommand::Inspect { id, respond_to } => {
                let _ = respond_to.send(self.connection_info(&id));
            }
            HubCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
            HubCommand::Stats { respond_to } => {
                let _ = respond_to.send(self.current_stats());
            }
            HubCommand::Shutdown => {
                info!("Shutdown requested");
                return false;
            }
        }
        true
    }

    /// Handle connection registration
    ///
    /// The returned handle unregisters when dropped, so a reply lost in the
    /// channel cannot leave an orphan registration behind.
    fn handle_register(&mut self, id: ConnectionId) -> Result<ConnectionHandle, HubError> {
        if self.connections.contains_key(&id) {
            warn!(connection_id = %id, "Rejecting duplicate connection id");
            return Err(HubError::DuplicateId(id));
        }
        let sender = self.weak_sender.upgrade().ok_or(HubError::HubClosed)?;

        self.next_session += 1;
        let session = self.next_session;
        let queue = OutboundQueue::new(self.queue_capacity);
        let activity = Arc::new(Activity::new());
        self.connections.insert(
            id.clone(),
            Connection::new(id.clone(), session, queue.clone(), Arc::clone(&activity)),
        );
        let handle = ConnectionHandle::new(
            id.clone(),
            session,
            queue,
            activity,
            HubHandle { sender },
        );

        info!(connection_id = %id, session, "Connection registered");
        debug!(
            "Total connections: {}, Total rooms: {}",
            self.connections.len(),
            self.rooms.len()
        );
        Ok(handle)
    }

    /// Handle identify: overwrite identity, then (re-)apply implicit joins
    fn handle_identify(
        &mut self,
        id: &ConnectionId,
        session: u64,
        kind: ClientKind,
        user_id: Option<String>,
    ) -> Result<(), HubError> {
        let conn = self.active_connection_mut(id, session)?;
        conn.identify(kind, user_id);
        let implicit = conn.implicit_rooms();

        info!(
            connection_id = %id,
            kind = %kind,
            user_id = conn.user_id.as_deref().unwrap_or(""),
            "Connection identified"
        );

        for room in implicit {
            self.join(id, room);
        }
        Ok(())
    }

    /// Handle explicit room join
    fn handle_join_room(
        &mut self,
        id: &ConnectionId,
        session: u64,
        room: RoomName,
    ) -> Result<bool, HubError> {
        self.active_connection_mut(id, session)?;
        Ok(self.join(id, room))
    }

    /// Handle unregister; unknown ids and stale sessions are no-ops
    fn handle_unregister(&mut self, id: &ConnectionId, session: Option<u64>) {
        let Some(conn) = self.connections.get(id) else {
            debug!(connection_id = %id, "Unregister for unknown connection ignored");
            return;
        };

        if session.is_some_and(|s| s != conn.session) {
            debug!(connection_id = %id, "Unregister from stale session ignored");
            return;
        }

        let Some(mut conn) = self.connections.remove(id) else {
            return;
        };

        conn.state = ConnectionState::Closing;
        for room in conn.rooms.drain() {
            self.rooms.leave(&room, id);
        }
        conn.queue.close();
        conn.state = ConnectionState::Closed;

        info!(
            connection_id = %id,
            dropped = conn.queue.dropped(),
            "Connection unregistered"
        );
        debug!(
            "Total connections: {}, Total rooms: {}",
            self.connections.len(),
            self.rooms.len()
        );
    }

    /// Handle publish: resolve members now, enqueue into each
    fn handle_publish(&mut self, target: PublishTarget, envelope: Arc<EventEnvelope>) {
        self.stats.published += 1;

        let mut delivered = 0u64;
        let mut dropped = 0u64;
        let mut enqueue = |conn: &Connection| match conn.enqueue(Arc::clone(&envelope)) {
            PushOutcome::Queued => delivered += 1,
            PushOutcome::DroppedOldest => {
                delivered += 1;
                dropped += 1;
                warn!(
                    connection_id = %conn.id,
                    event = %envelope.event,
                    "Outbound queue full, dropped oldest envelope"
                );
            }
            PushOutcome::Closed => {}
        };

        match target.room() {
            Some(room) => {
                for id in self.rooms.members(&room) {
                    if let Some(conn) = self.connections.get(id) {
                        enqueue(conn);
                    }
                }
            }
            None => {
                for conn in self.connections.values() {
                    enqueue(conn);
                }
            }
        }

        debug!(
            event = %envelope.event,
            target = ?target,
            recipients = delivered,
            "Published"
        );
        self.stats.delivered += delivered;
        self.stats.dropped += dropped;
    }

    /// Helper: add membership in both directions
    fn join(&mut self, id: &ConnectionId, room: RoomName) -> bool {
        let Some(conn) = self.connections.get_mut(id) else {
            return false;
        };

        let added = self.rooms.join(&room, id);
        conn.rooms.insert(room.clone());
        if added {
            debug!(connection_id = %id, room = %room, "Joined room");
        }
        added
    }

    /// Helper: look up a connection that belongs to the given session
    fn active_connection_mut(
        &mut self,
        id: &ConnectionId,
        session: u64,
    ) -> Result<&mut Connection, HubError> {
        match self.connections.get_mut(id) {
            Some(conn) if conn.session == session && conn.is_active() => Ok(conn),
            _ => Err(HubError::NotRegistered(id.clone())),
        }
    }

    fn connection_info(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(id).map(|conn| ConnectionInfo {
            id: conn.id.clone(),
            kind: conn.kind,
            user_id: conn.user_id.clone(),
            rooms: conn.rooms.clone(),
            state: conn.state,
            queued: conn.queue.len(),
            dropped: conn.queue.dropped(),
            connected_at: conn.activity.connected_at(),
            idle: conn.activity.idle(),
        })
    }

    /// Unregister every connection with no inbound activity for `idle_timeout`
    fn reap_idle(&mut self) {
        let Some(idle_timeout) = self.idle_timeout else {
            return;
        };

        let idle: Vec<(ConnectionId, u64)> = self
            .connections
            .values()
            .filter(|conn| conn.activity.idle() > idle_timeout)
            .map(|conn| (conn.id.clone(), conn.session))
            .collect();

        for (id, session) in idle {
            info!(connection_id = %id, "Reaping idle connection");
            self.handle_unregister(&id, Some(session));
            self.stats.reaped += 1;
        }
    }

    fn snapshot(&self) -> MembershipSnapshot {
        MembershipSnapshot {
            connections: self
                .connections
                .values()
                .map(|conn| (conn.id.clone(), conn.rooms.clone()))
                .collect(),
            rooms: self
                .rooms
                .iter()
                .map(|room| (room.name.clone(), room.members.clone()))
                .collect(),
        }
    }

    fn current_stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len(),
            rooms: self.rooms.len(),
            ..self.stats
        }
    }

    /// Helper: discard every queue so writer tasks exit
    fn close_all(&mut self) {
        for (_, mut conn) in self.connections.drain() {
            conn.state = ConnectionState::Closed;
            conn.queue.close();
        }
        self.rooms = RoomIndex::new();
    }
}

/// Client side of the Dispatcher
///
/// Cheap to clone; pass one to every component that registers connections
/// or publishes events.
#[derive(Debug, Clone)]
pub struct HubHandle {
    sender: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Create a dispatcher, spawn it on the current runtime, return its handle
    pub fn spawn(queue_capacity: usize) -> Self {
        let (dispatcher, handle) = Dispatcher::new(queue_capacity);
        tokio::spawn(dispatcher.run());
        handle
    }

    /// Same as `spawn`, with idle reaping configured
    pub fn spawn_with_config(config: &HubConfig) -> Self {
        let (dispatcher, handle) = Dispatcher::from_config(config);
        tokio::spawn(dispatcher.run());
        handle
    }

    /// Register a connection id
    ///
    /// Fails with `DuplicateId` while another connection holds the id.
    pub async fn register(&self, id: ConnectionId) -> Result<ConnectionHandle, HubError> {
        let (respond_to, response) = oneshot::channel();
        self.request(HubCommand::Register { id, respond_to })?;
        response.await.map_err(|_| HubError::HubClosed)?
    }

    /// Set kind/user id; admins join `admins`, a user id joins `user:<id>`
    pub async fn identify(
        &self,
        handle: &ConnectionHandle,
        kind: ClientKind,
        user_id: Option<String>,
    ) -> Result<(), HubError> {
        let (respond_to, response) = oneshot::channel();
        self.request(HubCommand::Identify {
            id: handle.id().clone(),
            session: handle.session(),
            kind,
            user_id,
            respond_to,
        })?;
        response.await.map_err(|_| HubError::HubClosed)?
    }

    /// Join a room; returns false if already a member
    pub async fn join_room(
        &self,
        handle: &ConnectionHandle,
        room: impl Into<RoomName>,
    ) -> Result<bool, HubError> {
        let (respond_to, response) = oneshot::channel();
        self.request(HubCommand::JoinRoom {
            id: handle.id().clone(),
            session: handle.session(),
            room: room.into(),
            respond_to,
        })?;
        response.await.map_err(|_| HubError::HubClosed)?
    }

    /// Unregister a connection (idempotent)
    pub fn unregister(&self, handle: &ConnectionHandle) {
        handle.close();
    }

    /// Unregister whatever connection currently holds `id`; no-op if none
    pub fn disconnect(&self, id: &ConnectionId) {
        self.send_unregister(id.clone(), None);
    }

    pub(crate) fn send_unregister(&self, id: ConnectionId, session: Option<u64>) -> bool {
        self.sender
            .send(HubCommand::Unregister { id, session })
            .is_ok()
    }

    /// Publish an envelope; never blocks and never fails
    pub fn publish(&self, target: PublishTarget, envelope: EventEnvelope) {
        let event = envelope.event.clone();
        let cmd = HubCommand::Publish {
            target,
            envelope: Arc::new(envelope),
        };
        if self.sender.send(cmd).is_err() {
            debug!(event = %event, "Hub closed, publish dropped");
        }
    }

    pub fn publish_to_room<T: Serialize + ?Sized>(
        &self,
        room: impl Into<RoomName>,
        event: &str,
        data: &T,
    ) {
        self.publish_serializable(PublishTarget::Room(room.into()), event, data);
    }

    /// Same as publishing to the room `user:<userId>`
    pub fn publish_to_user<T: Serialize + ?Sized>(&self, user_id: &str, event: &str, data: &T) {
        self.publish_serializable(PublishTarget::User(user_id.to_string()), event, data);
    }

    pub fn publish_to_admins<T: Serialize + ?Sized>(&self, event: &str, data: &T) {
        self.publish_serializable(PublishTarget::Room(RoomName::admins()), event, data);
    }

    pub fn publish_to_all<T: Serialize + ?Sized>(&self, event: &str, data: &T) {
        self.publish_serializable(PublishTarget::All, event, data);
    }

    fn publish_serializable<T: Serialize + ?Sized>(
        &self,
        target: PublishTarget,
        event: &str,
        data: &T,
    ) {
        match EventEnvelope::from_serializable(event, data) {
            Ok(envelope) => self.publish(target, envelope),
            Err(e) => error!(event = %event, "Failed to serialize event payload: {}", e),
        }
    }

    /// Describe a registered connection
    pub async fn connection_info(&self, id: &ConnectionId) -> Result<Option<ConnectionInfo>, HubError> {
        let (respond_to, response) = oneshot::channel();
        self.request(HubCommand::Inspect {
            id: id.clone(),
            respond_to,
        })?;
        response.await.map_err(|_| HubError::HubClosed)
    }

    /// Membership in both directions, as of now
    pub async fn snapshot(&self) -> Result<MembershipSnapshot, HubError> {
        let (respond_to, response) = oneshot::channel();
        self.request(HubCommand::Snapshot { respond_to })?;
        response.await.map_err(|_| HubError::HubClosed)
    }

    /// Counters; also a barrier for earlier publishes from this caller
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (respond_to, response) = oneshot::channel();
        self.request(HubCommand::Stats { respond_to })?;
        response.await.map_err(|_| HubError::HubClosed)
    }

    /// Stop the dispatcher, closing every connection queue
    pub fn shutdown(&self) {
        let _ = self.sender.send(HubCommand::Shutdown);
    }

    fn request(&self, cmd: HubCommand) -> Result<(), HubError> {
        self.sender.send(cmd).map_err(|_| HubError::HubClosed)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::FutureExt;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_abandoned_register_leaves_no_registration() {
        let hub = HubHandle::spawn(16);

        // Poll once so the command is sent, then drop the pending reply
        assert!(hub.register(ConnectionId::from("x")).now_or_never().is_none());

        assert_eq!(hub.stats().await.unwrap().connections, 0);
        let again = hub.register(ConnectionId::from("x")).await.unwrap();
        assert!(hub.connection_info(again.id()).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connections_are_reaped() {
        let config = HubConfig {
            idle_timeout: Some(Duration::from_secs(300)),
            sweep_interval: Duration::from_secs(60),
            ..HubConfig::default()
        };
        let hub = HubHandle::spawn_with_config(&config);
        let a = hub.register(ConnectionId::from("a")).await.unwrap();
        let b = hub.register(ConnectionId::from("b")).await.unwrap();

        tokio::time::advance(Duration::from_secs(200)).await;
        assert_eq!(hub.stats().await.unwrap().connections, 2);

        b.touch();
        tokio::time::advance(Duration::from_secs(161)).await;
        let stats = hub.stats().await.unwrap();

        assert_eq!(stats.connections, 1);
        assert_eq!(stats.reaped, 1);
        assert!(hub.connection_info(a.id()).await.unwrap().is_none());
        let info = hub.connection_info(b.id()).await.unwrap().unwrap();
        assert!(info.idle < Duration::from_secs(300));
        assert!(a.next_event().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reaping_without_idle_timeout() {
        let hub = HubHandle::spawn(16);
        let _conn = hub.register(ConnectionId::from("quiet")).await.unwrap();

        tokio::time::advance(Duration::from_secs(3600)).await;
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.reaped, 0);
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_id() {
        let hub = HubHandle::spawn(16);
        let _first = hub.register(ConnectionId::from("dup")).await.unwrap();

        let second = hub.register(ConnectionId::from("dup")).await;
        assert!(matches!(second, Err(HubError::DuplicateId(id)) if id.as_str() == "dup"));
    }

    #[tokio::test]
    async fn test_id_reusable_after_unregister() {
        let hub = HubHandle::spawn(16);
        let first = hub.register(ConnectionId::from("c")).await.unwrap();
        first.close();

        let second = hub.register(ConnectionId::from("c")).await.unwrap();
        assert!(second.session() > first.session());
        assert!(first.queue().is_closed());
        assert!(!second.queue().is_closed());
    }

    #[tokio::test]
    async fn test_stale_unregister_does_not_remove_new_session() {
        let hub = HubHandle::spawn(16);
        let first = hub.register(ConnectionId::from("c")).await.unwrap();
        let stale_session = first.session();
        first.close();
        let second = hub.register(ConnectionId::from("c")).await.unwrap();

        hub.send_unregister(ConnectionId::from("c"), Some(stale_session));
        let info = hub.connection_info(second.id()).await.unwrap();
        assert!(info.is_some());
    }

    #[tokio::test]
    async fn test_identify_user_joins_personal_room() {
        let hub = HubHandle::spawn(16);
        let conn = hub.register(ConnectionId::generate()).await.unwrap();
        conn.identify(ClientKind::User, Some("42".to_string()))
            .await
            .unwrap();

        let info = hub.connection_info(conn.id()).await.unwrap().unwrap();
        assert_eq!(info.kind, ClientKind::User);
        assert_eq!(info.state, ConnectionState::Identified);
        assert!(info.rooms.contains(&RoomName::for_user("42")));
        assert!(!info.rooms.contains(&RoomName::admins()));
    }

    #[tokio::test]
    async fn test_identify_after_close_fails() {
        let hub = HubHandle::spawn(16);
        let conn = hub.register(ConnectionId::generate()).await.unwrap();
        conn.close();

        let result = conn.identify(ClientKind::Admin, None).await;
        assert!(matches!(result, Err(HubError::NotRegistered(_))));
    }

    #[tokio::test]
    async fn test_join_room_reports_first_join() {
        let hub = HubHandle::spawn(16);
        let conn = hub.register(ConnectionId::generate()).await.unwrap();

        assert!(conn.join_room("kitchen").await.unwrap());
        assert!(!conn.join_room("kitchen").await.unwrap());
    }

    #[tokio::test]
    async fn test_publish_to_empty_room_is_noop() {
        let hub = HubHandle::spawn(16);
        let conn = hub.register(ConnectionId::generate()).await.unwrap();

        hub.publish_to_room("nobody-here", "ping", &json!(null));
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.delivered, 0);
        assert!(conn.queue().is_empty());
    }

    #[tokio::test]
    async fn test_drop_counted_in_stats() {
        let hub = HubHandle::spawn(2);
        let conn = hub.register(ConnectionId::generate()).await.unwrap();

        for n in 0..5 {
            hub.publish_to_all("tick", &n);
        }
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.delivered, 5);
        assert_eq!(stats.dropped, 3);
        assert_eq!(conn.queue().dropped(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_closes_queues_and_rejects_requests() {
        let hub = HubHandle::spawn(16);
        let conn = hub.register(ConnectionId::generate()).await.unwrap();

        hub.shutdown();
        assert!(conn.next_event().await.is_none());
        assert!(matches!(
            hub.register(ConnectionId::generate()).await,
            Err(HubError::HubClosed)
        ));
    }

    #[tokio::test]
    async fn test_dropping_handle_unregisters() {
        let hub = HubHandle::spawn(16);
        let id = ConnectionId::generate();
        let conn = hub.register(id.clone()).await.unwrap();
        conn.identify(ClientKind::Admin, None).await.unwrap();
        drop(conn);

        assert!(hub.connection_info(&id).await.unwrap().is_none());
        assert_eq!(hub.stats().await.unwrap().rooms, 0);
    }

    #[test]
    fn test_snapshot_detects_one_sided_membership() {
        let id = ConnectionId::from("a");
        let mut snapshot = MembershipSnapshot::default();
        snapshot
            .connections
            .insert(id.clone(), HashSet::from([RoomName::admins()]));
        assert!(!snapshot.is_consistent());

        snapshot
            .rooms
            .insert(RoomName::admins(), HashSet::from([id]));
        assert!(snapshot.is_consistent());
    }
}
