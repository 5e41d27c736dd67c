use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tracing::{info, warn};

use parley_chat::ChatError;
use parley_types::api::Claims;
use parley_types::events::ServerEvent;

use crate::dispatch::Dispatcher;

/// Handle one WebSocket connection for its whole lifetime.
///
/// Authentication already ran against the upgrade request's handshake
/// metadata; its outcome is passed in so a failed credential can still be
/// answered with a single `exception` event before the socket closes.
pub async fn handle_socket(
    socket: WebSocket,
    dispatcher: Dispatcher,
    auth: Result<Claims, ChatError>,
) {
    let (sender, receiver) = socket.split();
    run_socket(sender, receiver, dispatcher, auth).await;
}

/// The connection loop itself, generic over the transport halves so tests
/// can drive it without an HTTP upgrade.
async fn run_socket<S, R>(
    mut sender: S,
    mut receiver: R,
    dispatcher: Dispatcher,
    auth: Result<Claims, ChatError>,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Send,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin + Send + 'static,
{
    let claims = match auth {
        Ok(claims) => claims,
        Err(err) => {
            warn!("Connection rejected: {}", err);
            let exception = ServerEvent::Exception {
                status: err.status().into(),
                message: "Authentication error".into(),
            };
            let _ = sender
                .send(Message::Text(
                    serde_json::to_string(&exception).unwrap().into(),
                ))
                .await;
            let _ = sender.close().await;
            return;
        }
    };

    let user_id = claims.sub;
    let (conn_id, mut outbound) = dispatcher.registry.register(user_id).await;
    info!(
        "Connected! Connection ID -> {}, User ID -> {}, Email -> {}",
        conn_id, user_id, claims.email
    );

    // One-shot initial snapshot: every room the user belongs to, with its
    // latest message page. Subsequent changes arrive via fanout.
    match dispatcher.rooms.find_all_for_user(user_id).await {
        Ok(rooms) => {
            let _ = dispatcher
                .registry
                .send_to_connection(conn_id, ServerEvent::UserRooms(rooms))
                .await;
        }
        Err(err) => warn!("Failed to load room snapshot for user {}: {}", user_id, err),
    }

    // Forward queued outbound events -> client
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = serde_json::to_string(&event).unwrap();
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Read client frames and dispatch them
    let dispatcher_recv = dispatcher.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    dispatcher_recv.handle_frame(user_id, conn_id, &text).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either side to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.registry.deregister(conn_id).await;
    info!("Client disconnected: {} (user {})", conn_id, user_id);
}
