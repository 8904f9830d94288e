//! WebSocket endpoints for the two per-participant connections.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parley_proto::{
    decode, encode, BrokerClientMessage, BrokerServerMessage, ClientMessage, Identity,
    ServerMessage,
};
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::handlers::AppState;
use crate::link::{Outbound, PeerMediaLink, WsLink};

pub async fn signaling_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_signaling(socket, state))
}

pub async fn peer_media_handler(
    ws: WebSocketUpgrade,
    Path(identity): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let identity = Identity::from(identity);
    ws.on_upgrade(move |socket| handle_peer_media(socket, identity, state))
}

async fn handle_signaling(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let (link, rx, shutdown) = WsLink::<ServerMessage>::new();
    tokio::spawn(forward(sender, rx));

    let identity = state.registry.open_signaling(Arc::new(link));
    while let Some(text) = next_text(&mut receiver, &shutdown, &identity).await {
        match decode::<ClientMessage>(&text) {
            Ok(message) => state.world.handle_client(&identity, message),
            Err(err) => {
                warn!(%identity, error = %err, "malformed signaling message");
                state.registry.send_to(
                    &identity,
                    ServerMessage::Error {
                        message: err.to_string(),
                    },
                );
            }
        }
    }
    state.registry.signaling_closed(&identity);
}

async fn handle_peer_media(socket: WebSocket, identity: Identity, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let (link, rx, shutdown) = WsLink::<BrokerServerMessage>::new();
    let link_id = link.link_id();
    tokio::spawn(forward(sender, rx));

    if state
        .registry
        .attach_peer_media(&identity, Arc::new(link))
        .is_err()
    {
        return;
    }
    while let Some(text) = next_text(&mut receiver, &shutdown, &identity).await {
        match decode::<BrokerClientMessage>(&text) {
            Ok(BrokerClientMessage::Relay { to, payload }) => {
                let _ = state.registry.relay(&identity, &to, payload);
            }
            Err(err) => warn!(%identity, error = %err, "malformed broker message"),
        }
    }
    state.registry.peer_media_closed(&identity, link_id);
}

/// Next text frame, or `None` once the client goes away or the server
/// shuts the link.
async fn next_text(
    receiver: &mut SplitStream<WebSocket>,
    shutdown: &Notify,
    identity: &Identity,
) -> Option<String> {
    loop {
        let frame = tokio::select! {
            frame = receiver.next() => frame?,
            _ = shutdown.notified() => return None,
        };
        match frame {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => return Some(text),
                Err(_) => debug!(%identity, "dropping non-utf8 binary frame"),
            },
            Ok(Message::Close(_)) => return None,
            Ok(_) => {}
            Err(err) => {
                debug!(%identity, error = %err, "websocket error");
                return None;
            }
        }
    }
}

async fn forward<M: Serialize>(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound<M>>,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Message(message) => {
                let text = match encode(&message) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "failed to encode outbound message");
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Outbound::Close => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }
    let _ = sender.close().await;
}
