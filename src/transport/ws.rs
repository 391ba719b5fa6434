//! WebSocket connection endpoint. This is the reference implementation of
//! the transport seam spec §1 puts out of scope ("assumed to provide a
//! `ConnectionID`, an authenticated `UserID`, and a duplex frame channel");
//! authentication itself is not this core's concern, so the connection's
//! `user_id` is taken from a query parameter rather than a verified
//! session — a real deployment would replace that one line with its own
//! auth hoop and otherwise reuse everything below unchanged.
//!
//! Grounded on `stream/stream_manager.rs`'s `connect_stream` endpoint: the
//! register-on-enter / `tokio::select!` event loop / unregister-on-exit
//! shape is the same, generalized from a QUIC heartbeat stream + command
//! channel to a single WebSocket carrying both directions of JSON frames.

use futures::{SinkExt, StreamExt};
use salvo::http::StatusError;
use salvo::websocket::{Message, WebSocket, WebSocketUpgrade};
use salvo::{Request, Response, Depot, handler};
use tokio::sync::mpsc;

use crate::hub::Hub;
use crate::ids::ConnectionId;

use super::{CompletionFrame, InvokeFrame};

const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

fn device_label(req: &Request) -> Option<String> {
    req.header::<&str>("User-Agent").and_then(|ua| {
        woothee::parser::Parser::new()
            .parse(ua)
            .map(|info| format!("{} on {} ({})", info.name, info.os, info.category))
    })
}

/// Upgrades the request to a WebSocket and joins the connection to the hub
/// for the lifetime of the socket.
#[handler]
pub async fn connect(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), StatusError> {
    let user_id = req.query::<String>("user_id").unwrap_or_default();
    let connection_id: ConnectionId = req
        .query::<String>("connection_id")
        .unwrap_or_else(|| crate::ids::RequestId::new().to_string());
    let user_agent = if crate::config::get().track_user_agent {
        device_label(req)
    } else {
        None
    };
    let _ = depot;

    WebSocketUpgrade::new()
        .upgrade(req, res, move |ws| async move {
            handle_socket(Hub::global(), ws, user_id, connection_id, user_agent)
                .await;
        })
        .await
}

async fn handle_socket(
    hub: &Hub,
    ws: WebSocket,
    user_id: String,
    connection_id: ConnectionId,
    user_agent: Option<String>,
) {
    if let Err(e) = hub
        .registry
        .on_open(&user_id, &connection_id, user_agent.as_deref())
        .await
    {
        tracing::error!(
            user_id,
            connection_id,
            error = %e,
            "failed to register connection open"
        );
        return;
    }

    let (mut sink, mut stream) = ws.split();
    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<InvokeFrame>(OUTBOUND_CHANNEL_CAPACITY);
    hub.dispatcher.register(connection_id.clone(), outbound_tx);

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let Some(frame) = outbound else { break };
                let payload = match serde_json::to_string(&frame) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode outbound call frame");
                        continue;
                    }
                };
                if sink.send(Message::text(payload)).await.is_err() {
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(message)) => {
                        if let Ok(text) = message.to_str() {
                            match serde_json::from_str::<CompletionFrame>(text) {
                                Ok(frame) => hub.complete(frame.request_id, frame.response),
                                Err(e) => tracing::warn!(
                                    connection_id,
                                    error = %e,
                                    "dropped unparseable inbound frame"
                                ),
                            }
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(connection_id, error = %e, "websocket error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    hub.dispatcher.unregister(&connection_id);
    if let Err(e) = hub.registry.on_close(&user_id, &connection_id).await {
        tracing::error!(
            user_id,
            connection_id,
            error = %e,
            "failed to register connection close"
        );
    }
}
