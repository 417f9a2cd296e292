use std::fmt::Display;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_models::auth::UserRole;

use crate::error::HubError;
use crate::models::{event_types, ClientMessage, ConnectionState, Notification};
use crate::services::hub::{EncodedFrame, NotificationHub, Registration};

/// Replies to ping/auth are few; anything beyond this is a misbehaving client.
const CONTROL_BUFFER: usize = 16;

/// Transport-agnostic view of a frame received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Text(String),
    Close,
    Other,
}

/// Transport-agnostic view of a frame written to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    Text(EncodedFrame),
    Close,
}

/// Drives one client connection from registration to release.
///
/// The writer drains the connection's hub buffer plus a private control
/// channel fed by the reader. Whichever half finishes first ends the other,
/// then the connection is released with its own id so a newer connection
/// for the same identity is left alone.
pub async fn serve_connection<S, R, E>(
    hub: NotificationHub,
    identity: Uuid,
    role: UserRole,
    sink: S,
    stream: R,
) -> Result<(), HubError>
where
    S: Sink<ServerFrame> + Unpin,
    S::Error: Display,
    R: Stream<Item = Result<ClientFrame, E>> + Unpin,
    E: Display,
{
    log_state(identity, ConnectionState::Connecting);

    let Registration {
        connection_id,
        outbound,
    } = hub.register(identity, role).await?;
    log_state(identity, ConnectionState::Registered);

    let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER);
    let write_timeout = hub.settings().write_timeout;

    tokio::select! {
        _ = write_loop(sink, outbound, control_rx, write_timeout) => {
            debug!("Writer for {} finished first", identity);
        }
        _ = read_loop(stream, control_tx, identity, role) => {
            debug!("Reader for {} finished first", identity);
        }
    }

    log_state(identity, ConnectionState::Unregistering);
    hub.unregister_connection(identity, connection_id).await;
    log_state(identity, ConnectionState::Closed);

    Ok(())
}

fn log_state(identity: Uuid, state: ConnectionState) {
    debug!("Connection {} -> {:?}", identity, state);
}

async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<EncodedFrame>,
    mut control: mpsc::Receiver<EncodedFrame>,
    write_timeout: Duration,
) where
    S: Sink<ServerFrame> + Unpin,
    S::Error: Display,
{
    loop {
        let frame = tokio::select! {
            biased;
            Some(reply) = control.recv() => reply,
            next = outbound.recv() => match next {
                Some(frame) => frame,
                // Hub dropped our sender: superseded, evicted or shut down.
                None => break,
            },
        };

        match timeout(write_timeout, sink.send(ServerFrame::Text(frame))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Transport write failed: {}", e);
                return;
            }
            Err(_) => {
                warn!("Write timed out after {:?}; dropping connection", write_timeout);
                return;
            }
        }
    }

    if let Ok(Err(e)) = timeout(write_timeout, sink.send(ServerFrame::Close)).await {
        debug!("Close frame not delivered: {}", e);
    }
}

async fn read_loop<R, E>(
    mut stream: R,
    control: mpsc::Sender<EncodedFrame>,
    identity: Uuid,
    role: UserRole,
) where
    R: Stream<Item = Result<ClientFrame, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(ClientFrame::Text(text)) => {
                let Some(reply) = control_reply(&text, identity, role) else {
                    continue;
                };
                let encoded = match reply.to_frame() {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        warn!("Failed to encode {} reply: {}", reply.event_type, e);
                        continue;
                    }
                };
                if control.send(encoded).await.is_err() {
                    break;
                }
            }
            Ok(ClientFrame::Close) => {
                info!("Client {} closed the connection", identity);
                break;
            }
            Ok(ClientFrame::Other) => {}
            Err(e) => {
                debug!("Transport read failed for {}: {}", identity, e);
                break;
            }
        }
    }
}

/// Answers the control messages a client may send. Anything else is ignored.
pub fn control_reply(text: &str, identity: Uuid, role: UserRole) -> Option<Notification> {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            debug!("Ignoring unparseable client message from {}: {}", identity, e);
            return None;
        }
    };

    match message.kind.as_str() {
        "ping" => Some(Notification::new(
            event_types::PONG,
            json!({ "timestamp": message.data.get("timestamp").cloned() }),
        )),
        "auth" => Some(Notification::new(
            event_types::AUTH_RESPONSE,
            json!({
                "status": "authenticated",
                "user_id": identity,
                "role": role,
            }),
        )),
        other => {
            debug!("Unknown client message type '{}' from {}", other, identity);
            None
        }
    }
}
