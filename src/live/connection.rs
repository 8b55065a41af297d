//! The single WebSocket connection and its reconnect loop.

use std::sync::Arc;
use std::time::Duration;

use esav_shared::{ClientMessage, ServerMessage};
use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::context::LiveContext;
use crate::config::ReconnectConfig;
use crate::stores::{DiagnosticLog, LogEntryKind};

/// Connection status, shared by every consumer of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closed,
}

impl ConnectionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionStatus::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Open => "open",
            ConnectionStatus::Closed => "closed",
        }
    }

    /// Non-blocking notice to show while the connection is not open.
    pub fn banner(&self) -> Option<&'static str> {
        match self {
            ConnectionStatus::Open => None,
            ConnectionStatus::Connecting => Some("Connecting to ESAV Live..."),
            ConnectionStatus::Closed => Some("Connection lost. Attempting to reconnect..."),
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle for sending messages through the open connection.
#[derive(Clone)]
pub struct WsHandle {
    sender: UnboundedSender<ClientMessage>,
    log: Arc<DiagnosticLog>,
}

impl WsHandle {
    pub(crate) fn new(sender: UnboundedSender<ClientMessage>, log: Arc<DiagnosticLog>) -> Self {
        Self { sender, log }
    }

    /// Queue a message for the server and record it as outgoing traffic.
    pub fn send(&self, message: ClientMessage) -> Result<(), String> {
        tracing::debug!("WsHandle::send: {:?}", message);
        let payload = serde_json::to_value(&message).unwrap_or(Value::Null);
        self.sender
            .unbounded_send(message)
            .map_err(|e| format!("Failed to send: {}", e))?;
        self.log.append(LogEntryKind::Outgoing, payload);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Handle one inbound text frame. Returns the reply to send, if any.
///
/// Nothing here can fail the connection: frames that do not parse are
/// logged and dropped.
pub(crate) fn dispatch(ctx: &LiveContext, text: &str) -> Option<ClientMessage> {
    match ServerMessage::parse(text) {
        Ok(ServerMessage::QueryDelta { documents, queries }) => {
            ctx.log.append(LogEntryKind::Incoming, raw_payload(text));
            ctx.apply_delta(documents.unwrap_or_default(), queries.unwrap_or_default());
            None
        }
        Ok(ServerMessage::Ping) => {
            let reply = ClientMessage::Pong;
            let payload = serde_json::to_value(&reply).unwrap_or(Value::Null);
            ctx.log.append(LogEntryKind::Outgoing, payload);
            Some(reply)
        }
        Ok(ServerMessage::Error { error }) => {
            ctx.log.append(LogEntryKind::Incoming, raw_payload(text));
            tracing::error!("Received error from server: {}", error);
            None
        }
        Err(e) => {
            tracing::warn!("Failed to parse message from server: {}", e);
            ctx.log.append(
                LogEntryKind::Error,
                json!({ "error": e.to_string(), "raw": text }),
            );
            None
        }
    }
}

fn raw_payload(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Closed by the server or a transport fault.
    Lost,
    /// Closed because the client is shutting down.
    Shutdown,
}

/// A running connection loop. Dropping it stops the loop.
pub struct LiveConnection {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl LiveConnection {
    /// Spawn the connection loop on the current tokio runtime.
    pub fn start(ctx: Arc<LiveContext>, endpoint: Url, reconnect: ReconnectConfig) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(ctx, endpoint, reconnect, shutdown_rx));
        Self {
            shutdown,
            task: Some(task),
        }
    }

    /// Stop reconnecting, close the transport and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Connection task failed: {}", e);
            }
        }
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn run(
    ctx: Arc<LiveContext>,
    endpoint: Url,
    reconnect: ReconnectConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt = 0u32;

    loop {
        if *shutdown.borrow() {
            break;
        }

        tracing::info!("Connecting to {} (attempt {})", endpoint, attempt + 1);
        ctx.set_status(ConnectionStatus::Connecting);

        let connected = tokio::select! {
            result = connect_async(endpoint.as_str()) => result,
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok((stream, _response)) => {
                tracing::info!("WebSocket connection opened to {}", endpoint);
                attempt = 0;
                if run_session(&ctx, stream, &mut shutdown).await == SessionEnd::Shutdown {
                    break;
                }
                tracing::info!("WebSocket connection to {} closed", endpoint);
            }
            Err(e) => {
                tracing::error!("WebSocket error for {}: {}", endpoint, e);
            }
        }

        ctx.set_status(ConnectionStatus::Closed);

        let delay = reconnect.delay_for_attempt(attempt);
        attempt = attempt.saturating_add(1);
        tracing::info!("Will attempt to reconnect in {}ms", delay);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
            _ = shutdown.changed() => break,
        }
    }

    ctx.subscriptions.detach();
    ctx.set_status(ConnectionStatus::Closed);
    tracing::info!("Connection loop for {} stopped", endpoint);
}

async fn run_session<S>(
    ctx: &LiveContext,
    stream: tokio_tungstenite::WebSocketStream<S>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = stream.split();
    let (sender, mut outgoing) = unbounded::<ClientMessage>();

    let resent = ctx.attach(WsHandle::new(sender, ctx.log.clone()));
    if resent > 0 {
        tracing::info!("Resubscribed {} queries", resent);
    }
    ctx.set_status(ConnectionStatus::Open);

    let end = loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!("WebSocket received: {}", text.as_str());
                    if let Some(reply) = dispatch(ctx, text.as_str()) {
                        if let Err(e) = send_frame(&mut write, &reply).await {
                            tracing::error!("Send failed: {}", e);
                            break SessionEnd::Lost;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break SessionEnd::Lost,
                // Protocol-level pings are answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!("WebSocket read error: {}", e);
                    break SessionEnd::Lost;
                }
            },
            message = outgoing.next() => {
                let Some(message) = message else {
                    break SessionEnd::Lost;
                };
                if let Err(e) = send_frame(&mut write, &message).await {
                    tracing::error!("Send failed: {}", e);
                    break SessionEnd::Lost;
                }
            },
            _ = shutdown.changed() => break SessionEnd::Shutdown,
        }
    };

    // Detached before closing so the deliberate close cannot be mistaken
    // for a lost connection.
    ctx.subscriptions.detach();
    if end == SessionEnd::Shutdown {
        let _ = write.send(Message::Close(None)).await;
        let _ = write.close().await;
    }
    end
}

async fn send_frame<W>(write: &mut W, message: &ClientMessage) -> Result<(), String>
where
    W: futures_util::Sink<Message> + Unpin,
    W::Error: std::fmt::Display,
{
    let json = message.to_json().map_err(|e| e.to_string())?;
    tracing::debug!("Sending: {}", json);
    write
        .send(Message::text(json))
        .await
        .map_err(|e| e.to_string())
}
