//! Socket.IO v4 client over a single WebSocket connection.
//!
//! Only the default namespace and text frames are used: `0` open, `2`/`3`
//! ping/pong, `40` namespace connect and `42[...]` events.

use std::sync::Arc;

use chat_core::{Announcement, MESSAGE_SEEN_EVENT, ReconnectPolicy, SeenNotification};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::realtime::{ConnectionStatus, RealtimeError, RealtimeTransport};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// One decoded text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open,
    Close,
    Ping,
    Pong,
    NamespaceConnected,
    NamespaceDisconnected,
    ConnectError(Value),
    Event { name: String, payload: Value },
    Unknown(String),
}

pub fn parse_frame(text: &str) -> Frame {
    let Some(engine_type) = text.chars().next() else {
        return Frame::Unknown(String::new());
    };
    let rest = &text[engine_type.len_utf8()..];

    match engine_type {
        '0' => Frame::Open,
        '1' => Frame::Close,
        '2' => Frame::Ping,
        '3' => Frame::Pong,
        '4' => parse_socket_packet(rest).unwrap_or_else(|| Frame::Unknown(text.to_owned())),
        _ => Frame::Unknown(text.to_owned()),
    }
}

fn parse_socket_packet(packet: &str) -> Option<Frame> {
    let (packet_type, body) = packet.split_at_checked(1)?;
    match packet_type {
        "0" => Some(Frame::NamespaceConnected),
        "1" => Some(Frame::NamespaceDisconnected),
        "4" => Some(Frame::ConnectError(
            serde_json::from_str(body).unwrap_or(Value::Null),
        )),
        "2" => {
            let mut items = match serde_json::from_str::<Value>(body).ok()? {
                Value::Array(items) => items.into_iter(),
                _ => return None,
            };
            let name = match items.next()? {
                Value::String(name) => name,
                _ => return None,
            };
            Some(Frame::Event {
                name,
                payload: items.next().unwrap_or(Value::Null),
            })
        }
        _ => None,
    }
}

pub fn encode_event(name: &str, payload: &Value) -> Result<String, RealtimeError> {
    serde_json::to_string(&json!([name, payload]))
        .map(|body| format!("42{body}"))
        .map_err(|err| RealtimeError::Encode(err.to_string()))
}

fn encode_namespace_connect(auth_token: Option<&str>) -> String {
    match auth_token {
        Some(token) => format!("40{}", json!({ "token": token })),
        None => "40".to_owned(),
    }
}

/// Default realtime endpoint derived from the REST base url.
pub fn default_realtime_url(api_base: &Url) -> Result<Url, url::ParseError> {
    let mut url = api_base.join("/socket.io/?EIO=4&transport=websocket")?;
    let scheme = match api_base.scheme() {
        "http" => "ws",
        _ => "wss",
    };
    // Only fails for cannot-be-a-base urls, which `join` above already rejected.
    let _ = url.set_scheme(scheme);
    Ok(url)
}

/// Socket.IO transport with automatic reconnect.
pub struct SocketIoTransport {
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    seen_tx: broadcast::Sender<SeenNotification>,
    outbound_tx: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
}

impl SocketIoTransport {
    /// Start connecting in the background. Returns immediately.
    pub fn connect(url: Url, auth_token: Option<String>, policy: ReconnectPolicy) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let status_tx = Arc::new(status_tx);
        let (seen_tx, _) = broadcast::channel(64);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let worker = ConnectionWorker {
            url,
            auth_token,
            policy,
            status_tx: Arc::clone(&status_tx),
            seen_tx: seen_tx.clone(),
            outbound_rx,
            shutdown: shutdown.child_token(),
        };
        tokio::spawn(worker.run());

        Self {
            status_tx,
            seen_tx,
            outbound_tx,
            shutdown,
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for SocketIoTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl RealtimeTransport for SocketIoTransport {
    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    fn announce(&self, announcement: &Announcement) -> Result<(), RealtimeError> {
        if *self.status_tx.borrow() != ConnectionStatus::Connected {
            return Err(RealtimeError::NotConnected);
        }
        let frame = encode_event(announcement.event_name(), &announcement.payload())?;
        self.outbound_tx
            .send(frame)
            .map_err(|_| RealtimeError::Closed)
    }

    fn subscribe_seen(&self) -> broadcast::Receiver<SeenNotification> {
        self.seen_tx.subscribe()
    }
}

struct ConnectionWorker {
    url: Url,
    auth_token: Option<String>,
    policy: ReconnectPolicy,
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    seen_tx: broadcast::Sender<SeenNotification>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    shutdown: CancellationToken,
}

impl ConnectionWorker {
    async fn run(mut self) {
        let mut attempt = 0_u32;

        loop {
            let connected = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                connected = connect_async(self.url.as_str()) => connected,
            };

            match connected {
                Ok((socket, _response)) => {
                    info!(url = %self.url, "realtime socket opened");
                    attempt = 0;
                    self.discard_stale_frames();
                    if let Err(err) = self.run_session(socket).await {
                        warn!(error = %err, "realtime session ended with error");
                    }
                    self.status_tx.send_replace(ConnectionStatus::Disconnected);
                }
                Err(err) => warn!(url = %self.url, error = %err, "realtime connect failed"),
            }

            if self.shutdown.is_cancelled() {
                break;
            }
            let delay = self.policy.delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            debug!(?delay, attempt, "scheduling realtime reconnect");
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.status_tx.send_replace(ConnectionStatus::Disconnected);
        debug!("realtime worker stopped");
    }

    /// Frames queued for a previous session are never replayed.
    fn discard_stale_frames(&mut self) {
        let mut dropped = 0_usize;
        while self.outbound_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "discarded frames from previous realtime session");
        }
    }

    async fn run_session(&mut self, socket: Socket) -> Result<(), tungstenite::Error> {
        let (mut write, mut read) = socket.split();
        let mut namespace_ready = false;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                outbound = self.outbound_rx.recv(), if namespace_ready => {
                    let Some(frame) = outbound else {
                        return Ok(());
                    };
                    trace!(%frame, "realtime frame out");
                    write.send(Message::text(frame)).await?;
                }
                inbound = read.next() => {
                    let text = match inbound {
                        None | Some(Ok(Message::Close(_))) => return Ok(()),
                        Some(Err(err)) => return Err(err),
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(_)) => continue,
                    };
                    trace!(frame = %text.as_str(), "realtime frame in");

                    match parse_frame(text.as_str()) {
                        Frame::Open => {
                            let connect = encode_namespace_connect(self.auth_token.as_deref());
                            write.send(Message::text(connect)).await?;
                        }
                        Frame::Ping => write.send(Message::text("3")).await?,
                        Frame::NamespaceConnected => {
                            namespace_ready = true;
                            self.status_tx.send_replace(ConnectionStatus::Connected);
                        }
                        Frame::Close | Frame::NamespaceDisconnected => return Ok(()),
                        Frame::ConnectError(reason) => {
                            warn!(%reason, "realtime namespace connect rejected");
                            return Ok(());
                        }
                        Frame::Event { name, payload } => self.route_event(&name, payload),
                        Frame::Pong | Frame::Unknown(_) => {}
                    }
                }
            }
        }
    }

    fn route_event(&self, name: &str, payload: Value) {
        if name != MESSAGE_SEEN_EVENT {
            trace!(event = name, "ignoring realtime event");
            return;
        }
        match serde_json::from_value::<SeenNotification>(payload) {
            Ok(notification) => {
                let _ = self.seen_tx.send(notification);
            }
            Err(err) => debug!(error = %err, "malformed message-seen payload"),
        }
    }
}
