use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    Extension,
};
use futures::{future, SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use shared_models::{
    auth::{User, UserRole},
    error::AppError,
};

use crate::services::{serve_connection, ClientFrame, NotificationHub, ServerFrame};

/// `GET /ws` - upgrades an authenticated request into a notification stream.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(hub): State<NotificationHub>,
    Extension(user): Extension<User>,
) -> Result<Response, AppError> {
    let identity = user.uuid()?;
    let role = user.user_role()?;

    info!("WebSocket upgrade for {} ({})", identity, role);

    Ok(ws.on_upgrade(move |socket| run_socket(hub, identity, role, socket)))
}

async fn run_socket(hub: NotificationHub, identity: Uuid, role: UserRole, socket: WebSocket) {
    let (sink, stream) = socket.split();

    let sink = sink.with(|frame: ServerFrame| {
        future::ready(Ok::<_, axum::Error>(match frame {
            ServerFrame::Text(text) => Message::Text(text.to_string().into()),
            ServerFrame::Close => Message::Close(None),
        }))
    });

    let stream = stream.map(|message| {
        message.map(|message| match message {
            Message::Text(text) => ClientFrame::Text(text.as_str().to_owned()),
            Message::Close(_) => ClientFrame::Close,
            _ => ClientFrame::Other,
        })
    });

    if let Err(e) = serve_connection(hub, identity, role, sink, stream).await {
        warn!("Connection for {} could not be served: {}", identity, e);
    }
}
