use super::{AppState, Connection};
use crate::protocol::{AckStatus, ClientMessage, ErrorCode, ServerMessage};
use axum::{
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Upper bound on flushing queued frames once a connection ends
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Keepalive and size limits for view connections
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Time between protocol-level pings
    pub ping_interval: Duration,
    /// Grace period after a missed ping before the socket is closed
    pub ping_timeout: Duration,
    pub max_message_size: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            max_message_size: 64 * 1024,
        }
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Serve one view client until it leaves, errors or misses the keepalive
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    let config = state.ws_config.clone();
    info!("New WebSocket connection: {}", connection_id);

    // Every outgoing frame goes through one writer task
    let (tx, mut rx) = mpsc::channel::<Message>(32);

    state.connections.write().await.insert(
        connection_id,
        Connection {
            last_seen: Instant::now(),
        },
    );

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let closing = matches!(frame, Message::Close(_));
            if ws_sender.send(frame).await.is_err() || closing {
                break;
            }
        }
    });

    // Push the current view now and after every engine revision
    let view_tx = tx.clone();
    let view_engine = state.engine.clone();
    let view_task = tokio::spawn(async move {
        let mut changes = view_engine.subscribe();
        changes.borrow_and_update();
        loop {
            let view = view_engine.current_view().await;
            if !send_message(&view_tx, ServerMessage::View { view }).await {
                break;
            }
            if changes.changed().await.is_err() {
                break;
            }
            changes.borrow_and_update();
        }
    });

    // Keepalive: a client that sends nothing, not even a pong, for a full
    // interval plus the grace period is dropped
    let timed_out = CancellationToken::new();
    let ping_task = {
        let ping_tx = tx.clone();
        let ping_state = state.clone();
        let timed_out = timed_out.clone();
        let ping_interval = config.ping_interval;
        let deadline = config.ping_interval + config.ping_timeout;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ping_interval);
            loop {
                interval.tick().await;

                let silent_for = ping_state
                    .connections
                    .read()
                    .await
                    .get(&connection_id)
                    .map(|conn| conn.last_seen.elapsed());
                if !silent_for.is_some_and(|elapsed| elapsed <= deadline) {
                    timed_out.cancel();
                    break;
                }

                if ping_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        })
    };

    loop {
        let result = tokio::select! {
            _ = timed_out.cancelled() => {
                warn!("Connection {} missed keepalive, closing", connection_id);
                counter!("campmap_ws_keepalive_timeouts_total").increment(1);
                let _ = tx
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "keepalive timeout".into(),
                    })))
                    .await;
                break;
            }
            next = ws_receiver.next() => match next {
                Some(result) => result,
                None => break,
            },
        };

        if result.is_ok() {
            touch(&state, connection_id).await;
        }

        match result {
            Ok(Message::Text(text)) => {
                if text.len() > config.max_message_size {
                    warn!("Oversized message from {}: {} bytes", connection_id, text.len());
                    send_message(
                        &tx,
                        ServerMessage::Error {
                            code: ErrorCode::MessageTooLarge,
                            message: format!("Message exceeds {} bytes", config.max_message_size),
                        },
                    )
                    .await;
                    continue;
                }

                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => {
                        handle_client_message(client_msg, connection_id, &state, &tx).await;
                    }
                    Err(e) => {
                        warn!("Failed to parse client message: {}", e);
                        send_message(
                            &tx,
                            ServerMessage::Error {
                                code: ErrorCode::InvalidMessage,
                                message: format!("Invalid message format: {}", e),
                            },
                        )
                        .await;
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                debug!("Ignoring binary message from {}", connection_id);
            }
            // Pings are answered by axum; pongs only refresh liveness
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!("Client {} requested close", connection_id);
                break;
            }
            Err(e) => {
                error!("WebSocket error for {}: {}", connection_id, e);
                break;
            }
        }
    }

    ping_task.abort();
    view_task.abort();
    drop(tx);
    if tokio::time::timeout(DRAIN_TIMEOUT, &mut send_task)
        .await
        .is_err()
    {
        send_task.abort();
    }

    state.connections.write().await.remove(&connection_id);
    info!("WebSocket connection closed: {}", connection_id);
}

/// Record that the client is still there
async fn touch(state: &AppState, connection_id: Uuid) {
    if let Some(conn) = state.connections.write().await.get_mut(&connection_id) {
        conn.last_seen = Instant::now();
    }
}

/// Serialize and queue one protocol message; false once the writer is gone
async fn send_message(tx: &mpsc::Sender<Message>, msg: ServerMessage) -> bool {
    match serde_json::to_string(&msg) {
        Ok(json) => {
            counter!("campmap_ws_messages_sent_total", "type" => msg.message_type()).increment(1);
            tx.send(Message::Text(json)).await.is_ok()
        }
        Err(e) => {
            error!("Failed to serialize message: {}", e);
            true
        }
    }
}

/// Handle a parsed client message
async fn handle_client_message(
    msg: ClientMessage,
    connection_id: Uuid,
    state: &AppState,
    tx: &mpsc::Sender<Message>,
) {
    counter!("campmap_ws_messages_received_total", "type" => msg.message_type()).increment(1);

    match msg {
        ClientMessage::Ping { seq } => {
            send_message(tx, ServerMessage::Pong).await;
            send_message(
                tx,
                ServerMessage::Ack {
                    ack_seq: seq,
                    status: AckStatus::Ok,
                    outcome: None,
                    reason: None,
                },
            )
            .await;
        }
        ClientMessage::Event { seq, event } => {
            let ack = match state.engine.handle_event(event).await {
                Ok(outcome) => ServerMessage::Ack {
                    ack_seq: seq,
                    status: AckStatus::Ok,
                    outcome: Some(outcome),
                    reason: None,
                },
                Err(e) => {
                    debug!("Event {} from {} rejected: {}", seq, connection_id, e);
                    ServerMessage::Ack {
                        ack_seq: seq,
                        status: AckStatus::Rejected,
                        outcome: None,
                        reason: Some(e.to_string()),
                    }
                }
            };
            send_message(tx, ack).await;
        }
    }
}
