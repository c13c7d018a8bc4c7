//! WebSocket endpoint for the event stream.
//!
//! Each connected client gets the same broadcast stream; upstream frames
//! from any client can start a run. A single socket loop combines broadcast
//! forwarding, upstream handling, and ping/pong keepalive: if no Pong
//! arrives within [`PONG_TIMEOUT`] of a Ping, the connection is considered
//! dead and dropped.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use super::pipeline::{self, AnalysisRequest};
use super::ServerState;
use crate::protocol::{self, ClientMessage, ServerEvent, Upstream};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let client_id = Uuid::new_v4().to_string();
    info!(client_id = %client_id, "client connected");

    let (mut sender, receiver) = socket.split();
    let greeting = ServerEvent::ConnectionConfirmed {
        client_id: client_id.clone(),
        message: "Connected to the ensemble orchestrator".to_string(),
    };
    if send_event(&mut sender, &greeting).await.is_err() {
        return;
    }

    let rx = state.sink.subscribe();
    run_socket_loop(sender, receiver, rx, state).await;
    info!(client_id = %client_id, "client disconnected");
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(err) => {
            warn!(error = %err, event_type = event.type_name(), "failed to serialize reply");
            Ok(())
        }
    }
}

async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<String>,
    state: Arc<ServerState>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "slow client; events dropped");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_frame(&state, text.as_str()) {
                            if send_event(&mut sender, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

/// Handle one upstream frame. A returned event is a direct reply to this
/// client only; run progress always goes out over the broadcast stream.
fn handle_frame(state: &Arc<ServerState>, text: &str) -> Option<ServerEvent> {
    match protocol::parse_client_message(text) {
        Ok(Upstream::Message(ClientMessage::StartAnalysis {
            query,
            universal_cot,
            perspective_cots,
        })) => {
            if state.running.swap(true, Ordering::SeqCst) {
                warn!("rejecting start_analysis; a run is already in progress");
                return Some(ServerEvent::Error {
                    message: "An analysis is already in progress".to_string(),
                });
            }
            let request = AnalysisRequest {
                query,
                universal_cot,
                perspective_cots,
            };
            let state = Arc::clone(state);
            tokio::spawn(async move {
                pipeline::run_analysis(request, &state.sink, state.pace).await;
                state.running.store(false, Ordering::SeqCst);
            });
            None
        }
        Ok(Upstream::Message(ClientMessage::Ping)) => Some(ServerEvent::Pong),
        Ok(Upstream::Unknown(ty)) => {
            warn!(message_type = %ty, "unknown upstream message type");
            Some(ServerEvent::Error {
                message: format!("Unknown message type: {ty}"),
            })
        }
        Err(err) => {
            warn!(error = %err, "undecodable upstream frame");
            Some(ServerEvent::Error {
                message: "Invalid JSON format".to_string(),
            })
        }
    }
}
