//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake, registration
//! with the dispatcher, and the reader/writer task pair.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionHandle;
use crate::dispatcher::HubHandle;
use crate::error::HubError;
use crate::message::{ClientRequest, EventEnvelope};
use crate::types::{ClientKind, ConnectionId};

/// Identity hints carried on the upgrade request
///
/// `/ws?id=<id>&type=admin|user&userId=<id>`; every key is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectParams {
    pub id: Option<ConnectionId>,
    pub kind: Option<ClientKind>,
    pub user_id: Option<String>,
}

impl ConnectParams {
    /// Parse the query string of the upgrade request
    pub fn from_query(query: Option<&str>) -> Self {
        let mut params = Self::default();
        let Some(query) = query else {
            return params;
        };

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "id" => params.id = Some(ConnectionId::from(value.into_owned())),
                "type" => params.kind = ClientKind::parse(&value),
                "userId" => params.user_id = Some(value.into_owned()),
                _ => {}
            }
        }
        params
    }
}

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake, registers with the dispatcher, runs the
/// reader and writer tasks, and unregisters exactly once when either ends.
pub async fn handle_connection(stream: TcpStream, hub: HubHandle) -> Result<(), HubError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake, capturing the query string
    let mut params = ConnectParams::default();
    let capture_query = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        params = ConnectParams::from_query(req.uri().query());
        Ok(resp)
    };
    let mut ws_stream = tokio_tungstenite::accept_hdr_async(stream, capture_query).await?;

    let id = params.id.clone().unwrap_or_else(ConnectionId::generate);

    // Register with the dispatcher
    let handle = match hub.register(id.clone()).await {
        Ok(handle) => handle,
        Err(HubError::DuplicateId(id)) => {
            warn!(connection_id = %id, peer = %peer_addr, "Duplicate connection id, closing");
            let _ = ws_stream
                .close(Some(CloseFrame {
                    code: CloseCode::Policy,
                    reason: "duplicate connection id".into(),
                }))
                .await;
            return Err(HubError::DuplicateId(id));
        }
        Err(e) => {
            error!("Failed to register connection {} - hub closed", id);
            return Err(e);
        }
    };

    info!(connection_id = %id, peer = %peer_addr, "Client connected");

    // Identity supplied on the URL is applied without an acknowledgment
    if let Some(kind) = params.kind {
        handle.identify(kind, params.user_id.clone()).await?;
    }

    let (ws_sender, ws_receiver) = ws_stream.split();

    let mut read_task = tokio::spawn(read_loop(ws_receiver, handle.clone()));
    let mut write_task = tokio::spawn(write_loop(ws_sender, handle.clone()));

    // Wait for either task to complete
    tokio::select! {
        _ = &mut read_task => {
            debug!("Read task completed for {}", id);
            handle.close();
            let _ = write_task.await;
        }
        _ = &mut write_task => {
            debug!("Write task completed for {}", id);
            handle.close();
            read_task.abort();
        }
    }

    info!(connection_id = %id, "Client disconnected");

    Ok(())
}

/// Reader task: inbound frames → dispatcher requests
///
/// Ends on close, transport error, or the first malformed frame.
pub async fn read_loop<S>(mut stream: S, handle: ConnectionHandle)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let id = handle.id().clone();

    while let Some(msg_result) = stream.next().await {
        if msg_result.is_ok() {
            handle.touch();
        }

        let request = match msg_result {
            Ok(Message::Text(text)) => ClientRequest::parse(text.as_bytes()),
            Ok(Message::Binary(bytes)) => ClientRequest::parse(&bytes),
            Ok(Message::Close(_)) => {
                debug!("Client {} sent close frame", id);
                break;
            }
            Ok(_) => {
                // Ping/Pong are answered by tungstenite
                continue;
            }
            Err(e) => {
                debug!("WebSocket error for {}: {}", id, e);
                break;
            }
        };

        match request {
            Ok(ClientRequest::Identify(payload)) => {
                if let Err(e) = handle.identify(payload.kind, payload.user_id()).await {
                    debug!("Identify failed for {}: {}", id, e);
                    break;
                }
                handle.enqueue(EventEnvelope::identified());
            }
            Ok(ClientRequest::Ping(data)) => {
                handle.enqueue(EventEnvelope::pong(data));
            }
            Ok(ClientRequest::ConnectionQuality) => match handle.info().await {
                Ok(Some(info)) => {
                    handle.enqueue(info.quality_report());
                }
                Ok(None) | Err(_) => break,
            },
            Ok(ClientRequest::Other(event)) => {
                debug!("Ignoring event '{}' from {}", event, id);
            }
            Err(e) => {
                warn!(connection_id = %id, "Closing connection: {}", e);
                break;
            }
        }
    }

    handle.close();
    debug!("Read task ended for {}", id);
}

/// Writer task: outbound queue → WebSocket
///
/// Ends when the queue is closed (unregister) or a write fails.
pub async fn write_loop<S>(mut sink: S, handle: ConnectionHandle)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let id = handle.id().clone();

    while let Some(envelope) = handle.next_event().await {
        let json = match serde_json::to_string(envelope.as_ref()) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize event '{}': {}", envelope.event, e);
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(json.into())).await {
            debug!("WebSocket send failed for {}: {}", id, e);
            handle.close();
            break;
        }
    }

    // Send close frame when done
    let _ = sink.close().await;
    debug!("Write task ended for {}", id);
}
