//! Socket.IO transport over a single websocket.
//!
//! `connect` spawns a background worker that owns the websocket. The worker
//! performs the engine and namespace handshake, answers engine pings,
//! forwards server events, and writes outbound frames in queue order. A
//! server that stays silent longer than its advertised ping interval plus
//! ping timeout is treated as gone. There is no reconnect: once the worker
//! exits the transport reports `Disconnected` and every later call fails.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::config::ChatConfig;
use crate::socketio::packet::{EnginePacket, SocketPacket, DEFAULT_NAMESPACE};
use crate::transport::{ConnectionStatus, InboundEvent, Transport, TransportError, TransportLink};

/// Upper bound on waiting for the server to finish the close handshake.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Completion = oneshot::Sender<Result<(), TransportError>>;

enum Command {
    Emit { frame: String, done: Completion },
    Disconnect { done: Completion },
}

#[derive(Debug)]
enum SessionEnd {
    LocalDisconnect,
    ServerDisconnect,
    TransportClosed,
    HeartbeatLost,
    HandleDropped,
}

/// [`Transport`] backed by a Socket.IO server reached over websockets.
#[derive(Debug)]
pub struct SocketIoTransport {
    config: ChatConfig,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
}

impl SocketIoTransport {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            config,
            commands: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    fn command_sender(&self) -> Result<mpsc::UnboundedSender<Command>, TransportError> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(TransportError::NotConnected)
    }
}

impl Transport for SocketIoTransport {
    async fn connect(&self) -> Result<TransportLink, TransportError> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let url = self.config.socket_url();
        debug!(event = "socketio_connecting", url = %url);

        tokio::spawn(async move {
            connection_worker(url, command_rx, inbound_tx, status_tx, ready_tx).await;
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                *self.commands.lock().unwrap_or_else(PoisonError::into_inner) = Some(command_tx);
                Ok(TransportLink {
                    events: inbound_rx,
                    status: status_rx,
                })
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(TransportError::Protocol(
                "connection worker stopped before initial connect".to_string(),
            )),
        }
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        let commands = self.command_sender()?;
        let frame = SocketPacket::event(event, vec![payload]).into_frame();
        let (done_tx, done_rx) = oneshot::channel();
        commands
            .send(Command::Emit {
                frame,
                done: done_tx,
            })
            .map_err(|_| TransportError::Closed)?;
        done_rx.await.map_err(|_| TransportError::Closed)?
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let commands = self
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(TransportError::NotConnected)?;
        let (done_tx, done_rx) = oneshot::channel();
        commands
            .send(Command::Disconnect { done: done_tx })
            .map_err(|_| TransportError::Closed)?;
        done_rx.await.map_err(|_| TransportError::Closed)?
    }
}

async fn connection_worker(
    url: String,
    mut commands: mpsc::UnboundedReceiver<Command>,
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
    status_tx: mpsc::UnboundedSender<ConnectionStatus>,
    ready_tx: oneshot::Sender<Result<(), TransportError>>,
) {
    let (mut socket, heartbeat) = match open_session(&url).await {
        Ok(opened) => opened,
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };

    let _ = status_tx.send(ConnectionStatus::Connected);
    if ready_tx.send(Ok(())).is_err() {
        let _ = close_session(&mut socket).await;
        let _ = status_tx.send(ConnectionStatus::Disconnected);
        return;
    }

    let end = run_connected_session(&mut socket, heartbeat, &mut commands, &inbound_tx).await;
    debug!(event = "socketio_session_ended", reason = ?end);
    let _ = status_tx.send(ConnectionStatus::Disconnected);
}

async fn open_session(url: &str) -> Result<(Socket, Option<Duration>), TransportError> {
    let (mut socket, _) = connect_async(url).await?;

    let open = recv_handshake_text(&mut socket, "engine open").await?;
    let heartbeat = match EnginePacket::decode(&open)? {
        EnginePacket::Open(info) => {
            debug!(
                event = "socketio_open",
                sid = %info.sid,
                ping_interval_ms = info.ping_interval,
                ping_timeout_ms = info.ping_timeout
            );
            info.heartbeat()
        }
        other => {
            return Err(TransportError::Protocol(format!(
                "expected engine open packet, got {other:?}"
            )));
        }
    };

    send_frame(&mut socket, SocketPacket::connect().into_frame()).await?;

    loop {
        let text = recv_handshake_text(&mut socket, "namespace connect").await?;
        match EnginePacket::decode(&text)? {
            EnginePacket::Ping(data) => {
                send_frame(&mut socket, EnginePacket::Pong(data).encode()).await?;
            }
            EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                SocketPacket::Connect { data, .. } => {
                    debug!(event = "socketio_namespace_connected", data = ?data);
                    return Ok((socket, heartbeat));
                }
                SocketPacket::ConnectError { data, .. } => {
                    return Err(TransportError::Rejected(connect_error_reason(data)));
                }
                other => debug!(event = "socketio_handshake_packet_skipped", packet = ?other),
            },
            EnginePacket::Close => {
                return Err(TransportError::Protocol(
                    "server closed engine session before namespace connect".to_string(),
                ));
            }
            _ => {}
        }
    }
}

async fn run_connected_session(
    socket: &mut Socket,
    heartbeat: Option<Duration>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    inbound_tx: &mpsc::UnboundedSender<InboundEvent>,
) -> SessionEnd {
    let silence = tokio::time::sleep(heartbeat.unwrap_or_default());
    tokio::pin!(silence);

    loop {
        tokio::select! {
            () = &mut silence, if heartbeat.is_some() => {
                warn!(event = "socketio_heartbeat_lost", window = ?heartbeat);
                return SessionEnd::HeartbeatLost;
            }
            command = commands.recv() => {
                match command {
                    Some(Command::Emit { frame, done }) => {
                        let result = send_frame(socket, frame).await;
                        let failed = result.is_err();
                        let _ = done.send(result);
                        if failed {
                            return SessionEnd::TransportClosed;
                        }
                    }
                    Some(Command::Disconnect { done }) => {
                        let _ = done.send(close_session(socket).await);
                        return SessionEnd::LocalDisconnect;
                    }
                    None => {
                        let _ = close_session(socket).await;
                        return SessionEnd::HandleDropped;
                    }
                }
            }
            frame = socket.next() => {
                if let Some(window) = heartbeat {
                    silence.as_mut().reset(Instant::now() + window);
                }
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(end) = handle_text_frame(socket, text.as_str(), inbound_tx).await {
                            return end;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            return SessionEnd::TransportClosed;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::TransportClosed,
                    Some(Ok(_)) => debug!(event = "socketio_non_text_frame_ignored"),
                    Some(Err(err)) => {
                        warn!(event = "socketio_receive_failed", error = %err);
                        return SessionEnd::TransportClosed;
                    }
                }
            }
        }
    }
}

async fn handle_text_frame(
    socket: &mut Socket,
    text: &str,
    inbound_tx: &mpsc::UnboundedSender<InboundEvent>,
) -> Option<SessionEnd> {
    let packet = match EnginePacket::decode(text) {
        Ok(packet) => packet,
        Err(err) => {
            warn!(event = "socketio_frame_invalid", error = %err, raw = text);
            return None;
        }
    };

    match packet {
        EnginePacket::Ping(data) => {
            if send_frame(socket, EnginePacket::Pong(data).encode()).await.is_err() {
                return Some(SessionEnd::TransportClosed);
            }
        }
        EnginePacket::Message(body) => match SocketPacket::decode(&body) {
            Ok(SocketPacket::Event {
                namespace,
                name,
                args,
                ..
            }) => {
                if namespace == DEFAULT_NAMESPACE {
                    let _ = inbound_tx.send(InboundEvent::new(name, args));
                } else {
                    debug!(event = "socketio_foreign_namespace", namespace = %namespace, name = %name);
                }
            }
            Ok(SocketPacket::Disconnect { .. }) => return Some(SessionEnd::ServerDisconnect),
            Ok(other) => debug!(event = "socketio_packet_ignored", packet = ?other),
            Err(err) => warn!(event = "socketio_packet_invalid", error = %err, raw = %body),
        },
        EnginePacket::Close => return Some(SessionEnd::ServerDisconnect),
        _ => {}
    }

    None
}

async fn recv_handshake_text(socket: &mut Socket, stage: &str) -> Result<String, TransportError> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
            Some(Ok(Message::Ping(payload))) => {
                socket.send(Message::Pong(payload)).await?;
            }
            Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) => {
                return Err(TransportError::Protocol(format!(
                    "socket closed before {stage}"
                )));
            }
            Some(Ok(_)) => {
                return Err(TransportError::Protocol(format!(
                    "received non-text frame before {stage}"
                )));
            }
            Some(Err(err)) => return Err(TransportError::WebSocket(err)),
            None => {
                return Err(TransportError::Protocol(format!(
                    "socket ended before {stage}"
                )));
            }
        }
    }
}

async fn send_frame(socket: &mut Socket, frame: String) -> Result<(), TransportError> {
    socket.send(Message::Text(frame.into())).await?;
    Ok(())
}

/// Sends the namespace disconnect, then completes the websocket close
/// handshake so frames already written reach the server before the socket
/// is dropped.
async fn close_session(socket: &mut Socket) -> Result<(), TransportError> {
    let leave = send_frame(socket, SocketPacket::disconnect().into_frame()).await;
    let close = socket.close(None).await.map_err(TransportError::from);
    if timeout(CLOSE_DRAIN_TIMEOUT, drain_until_closed(socket))
        .await
        .is_err()
    {
        warn!(event = "socketio_close_unacknowledged", "server did not finish close handshake");
    }
    leave.and(close)
}

async fn drain_until_closed(socket: &mut Socket) {
    while let Some(frame) = socket.next().await {
        match frame {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

fn connect_error_reason(data: Option<Value>) -> String {
    match data {
        Some(Value::Object(fields)) => fields
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(fields).to_string()),
        Some(other) => other.to_string(),
        None => "no reason given".to_string(),
    }
}
