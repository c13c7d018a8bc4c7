//! WebSocket connection manager for the live display.
//!
//! Owns one logical connection to the orchestrator and re-establishes it
//! transparently on unexpected loss. All socket I/O happens on a spawned
//! task; the consumer sees state transitions and received frames as
//! [`ConnEvent`]s over a channel, never a panic or an error thrown across
//! the interface.
//!
//! Reconnect policy: an abnormal close schedules a retry after
//! `min(base × 2^attempt, max_delay)`, giving up after `max_attempts`
//! retries. A user-initiated close or an explicit `reconnect()` resets the
//! attempt counter. A server close with the normal-closure code is treated
//! as clean and does not trigger a retry.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::errors::ClientError;
use crate::protocol::ClientMessage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Observable lifecycle of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

/// Reconnect backoff parameters. The defaults are the protocol contract;
/// tests shrink them to avoid real waits.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `min(base × 2^attempt, max_delay)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

/// Events delivered to the connection's consumer.
#[derive(Debug, Clone)]
pub enum ConnEvent {
    State(ConnectionState),
    /// One received text frame, undecoded.
    Frame(String),
    RetryScheduled { attempt: u32, delay: Duration },
    /// The retry budget is exhausted; only `reconnect()` will try again.
    GaveUp,
}

enum Command {
    Send(String),
    Reconnect,
    Disconnect,
}

/// Handle to the managed connection. Dropping it tears the connection down.
pub struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    task: tokio::task::JoinHandle<()>,
}

impl ConnectionManager {
    /// Open a connection to `url` with the default retry policy.
    pub fn connect(url: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<ConnEvent>) {
        Self::with_policy(url, RetryPolicy::default())
    }

    pub fn with_policy(
        url: impl Into<String>,
        policy: RetryPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<ConnEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let task = tokio::spawn(run_connection(
            url.into(),
            policy,
            cmd_rx,
            Ctx { state_tx, event_tx },
        ));
        (
            Self {
                cmd_tx,
                state_rx,
                task,
            },
            event_rx,
        )
    }

    /// Last observed connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Serialize and transmit `message`, but only while connected.
    ///
    /// While not connected the message is dropped with a warning, not
    /// queued; callers that need delivery must wait for `Connected`.
    pub fn send(&self, message: &ClientMessage) -> Result<(), ClientError> {
        if self.state() != ConnectionState::Connected {
            warn!("not connected; dropping outgoing message");
            return Ok(());
        }
        let text = serde_json::to_string(message)?;
        self.cmd_tx
            .send(Command::Send(text))
            .map_err(|_| ClientError::ConnectionGone)
    }

    /// Reset the retry counter and re-establish the connection immediately.
    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.cmd_tx
            .send(Command::Reconnect)
            .map_err(|_| ClientError::ConnectionGone)
    }

    /// Close with the normal-closure code and cancel any pending retry.
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.cmd_tx
            .send(Command::Disconnect)
            .map_err(|_| ClientError::ConnectionGone)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Ctx {
    state_tx: watch::Sender<ConnectionState>,
    event_tx: mpsc::UnboundedSender<ConnEvent>,
}

impl Ctx {
    fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
        let _ = self.event_tx.send(ConnEvent::State(state));
    }

    fn emit(&self, event: ConnEvent) {
        let _ = self.event_tx.send(event);
    }
}

enum SocketExit {
    UserDisconnect,
    UserReconnect,
    CleanClose,
    Abnormal,
}

enum UserCmd {
    Reconnect,
    Stop,
}

async fn run_connection(
    url: String,
    policy: RetryPolicy,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    ctx: Ctx,
) {
    let mut attempts: u32 = 0;
    'session: loop {
        ctx.set_state(ConnectionState::Connecting);
        match connect_async(url.as_str()).await {
            Ok((ws, _response)) => {
                attempts = 0;
                info!(url = %url, "connected");
                ctx.set_state(ConnectionState::Connected);
                match drive_socket(ws, &ctx, &mut cmd_rx).await {
                    SocketExit::UserDisconnect => {
                        ctx.set_state(ConnectionState::Disconnected);
                        return;
                    }
                    SocketExit::UserReconnect => {
                        attempts = 0;
                        continue 'session;
                    }
                    SocketExit::CleanClose => {
                        // The server asked for a normal closure; do not
                        // retry behind its back.
                        info!("server closed the connection normally");
                        ctx.set_state(ConnectionState::Disconnected);
                        match wait_for_user(&mut cmd_rx).await {
                            UserCmd::Reconnect => {
                                attempts = 0;
                                continue 'session;
                            }
                            UserCmd::Stop => return,
                        }
                    }
                    SocketExit::Abnormal => {
                        ctx.set_state(ConnectionState::Disconnected);
                    }
                }
            }
            Err(err) => {
                warn!(url = %url, error = %err, "connection attempt failed");
                ctx.set_state(ConnectionState::Error);
            }
        }

        // Abnormal loss or failed attempt: schedule the next retry.
        if attempts >= policy.max_attempts {
            warn!(
                attempts,
                "giving up on automatic reconnection; reconnect() to retry"
            );
            ctx.emit(ConnEvent::GaveUp);
            match wait_for_user(&mut cmd_rx).await {
                UserCmd::Reconnect => {
                    attempts = 0;
                    continue 'session;
                }
                UserCmd::Stop => {
                    ctx.set_state(ConnectionState::Disconnected);
                    return;
                }
            }
        }

        let delay = policy.delay(attempts);
        debug!(attempt = attempts, delay_ms = delay.as_millis() as u64, "retry scheduled");
        ctx.emit(ConnEvent::RetryScheduled {
            attempt: attempts,
            delay,
        });
        attempts += 1;

        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => continue 'session,
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Send(_)) => {
                        warn!("not connected; dropping outgoing message");
                    }
                    Some(Command::Reconnect) => {
                        attempts = 0;
                        continue 'session;
                    }
                    Some(Command::Disconnect) | None => {
                        ctx.set_state(ConnectionState::Disconnected);
                        return;
                    }
                },
            }
        }
    }
}

async fn drive_socket(
    ws: WsStream,
    ctx: &Ctx,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
) -> SocketExit {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    ctx.emit(ConnEvent::Frame(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let clean = frame
                        .as_ref()
                        .is_some_and(|f| f.code == CloseCode::Normal);
                    return if clean {
                        SocketExit::CleanClose
                    } else {
                        SocketExit::Abnormal
                    };
                }
                // Pings are answered by the websocket layer; binary frames
                // are not part of this protocol.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "socket error");
                    return SocketExit::Abnormal;
                }
                None => return SocketExit::Abnormal,
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(text)) => {
                    if let Err(err) = sink.send(Message::Text(text.into())).await {
                        warn!(error = %err, "send failed; connection lost");
                        return SocketExit::Abnormal;
                    }
                }
                Some(Command::Reconnect) => {
                    let _ = sink.send(close_normal()).await;
                    return SocketExit::UserReconnect;
                }
                Some(Command::Disconnect) | None => {
                    let _ = sink.send(close_normal()).await;
                    return SocketExit::UserDisconnect;
                }
            },
        }
    }
}

async fn wait_for_user(cmd_rx: &mut mpsc::UnboundedReceiver<Command>) -> UserCmd {
    loop {
        match cmd_rx.recv().await {
            Some(Command::Send(_)) => {
                warn!("not connected; dropping outgoing message");
            }
            Some(Command::Reconnect) => return UserCmd::Reconnect,
            Some(Command::Disconnect) | None => return UserCmd::Stop,
        }
    }
}

fn close_normal() -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "client closing".into(),
    }))
}
