use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{InboundMessage, OutboundMessage},
    services::session_service,
    state::{ClientConnection, SharedState, outbox::{Delivery, Outbox}},
};

/// Handle the full lifecycle of a player or host WebSocket bound to session `code`.
pub async fn handle_socket(state: SharedState, code: String, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let Some(handle) = session_service::find_session(&state, &code) else {
        debug!(code = %code, "websocket opened for unknown session");
        send_message_to_websocket(
            &outbound_tx,
            &OutboundMessage::error("INVALID_CODE", "no game with this code"),
            "unknown session",
        );
        let _ = outbound_tx.send(Message::Close(None));
        finalize(writer_task, outbound_tx).await;
        return;
    };

    let connection_id = Uuid::new_v4();
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    state.connections().insert(
        connection_id,
        ClientConnection {
            id: connection_id,
            session_code: handle.code.clone(),
            tx: outbound_tx.clone(),
            shutdown: shutdown_tx,
        },
    );
    info!(code = %handle.code, connection = %connection_id, "client connected");

    session_service::open_connection(&state, &handle, connection_id).await;

    let mut closed_by_server = false;
    loop {
        let message = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    closed_by_server = true;
                    break;
                }
                continue;
            }
            message = receiver.next() => message,
        };

        let Some(message) = message else {
            break;
        };

        match message {
            Ok(Message::Text(text)) => match InboundMessage::from_json_str(&text) {
                Ok(inbound) => {
                    session_service::handle_message(&state, &handle, connection_id, inbound).await;
                }
                Err(err) => {
                    warn!(connection = %connection_id, error = %err, "failed to parse client message");
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                debug!(connection = %connection_id, "client closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(connection = %connection_id, error = %err, "websocket error");
                break;
            }
        }
    }

    state.connections().remove(&connection_id);
    if !closed_by_server {
        session_service::close_connection(&state, &handle, connection_id).await;
    }
    info!(code = %handle.code, connection = %connection_id, "client disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Execute the deliveries queued by a session handler.
///
/// Each connection is served independently: a dead socket only loses its own messages.
pub fn dispatch(state: &SharedState, outbox: Outbox) {
    for delivery in outbox.into_deliveries() {
        match delivery {
            Delivery::Message {
                connection,
                message,
            } => {
                let Some(tx) = state.connections().get(&connection).map(|c| c.tx.clone()) else {
                    debug!(connection = %connection, "dropping message for closed connection");
                    continue;
                };
                send_message_to_websocket(&tx, &message, "session update");
            }
            Delivery::Close { connection } => {
                let Some((_, client)) = state.connections().remove(&connection) else {
                    continue;
                };
                let _ = client.tx.send(Message::Close(None));
                let _ = client.shutdown.send(true);
            }
        }
    }
}

/// Serialize a payload and push it onto the provided WebSocket sender.
///
/// Failures are logged and swallowed; the reader loop notices dead sockets on its own.
pub fn send_message_to_websocket<T>(tx: &mpsc::UnboundedSender<Message>, value: &T, context: &str)
where
    T: ?Sized + serde::Serialize,
{
    let payload = match serde_json::to_string(value) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, context, "failed to serialize websocket message");
            return;
        }
    };

    if tx.send(Message::Text(payload.into())).is_err() {
        debug!(context, "websocket writer already closed");
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
