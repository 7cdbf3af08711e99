//! WebSocket transport speaking the JSON hub protocol

use super::protocol::{self, HubMessage};
use super::{Transport, TransportError, TransportEvents, TransportFactory};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingInvocations =
    Arc<parking_lot::Mutex<HashMap<String, oneshot::Sender<Result<Value, TransportError>>>>>;

/// Default keep-alive interval
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(15);

/// Default wait for an invocation's completion
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Rewrite an `http(s)://` hub endpoint to its `ws(s)://` form
pub fn to_websocket_url(endpoint: &str) -> String {
    if let Some(rest) = endpoint.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = endpoint.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        endpoint.to_string()
    }
}

/// Builds [`WebSocketTransport`] instances
#[derive(Debug, Clone)]
pub struct WebSocketTransportFactory {
    ping_interval: Duration,
    invoke_timeout: Duration,
}

impl WebSocketTransportFactory {
    pub fn new(ping_interval: Duration) -> Self {
        Self {
            ping_interval,
            invoke_timeout: DEFAULT_INVOKE_TIMEOUT,
        }
    }

    /// Bound the wait for invocation completions
    pub fn invoke_timeout(mut self, d: Duration) -> Self {
        self.invoke_timeout = d;
        self
    }
}

impl Default for WebSocketTransportFactory {
    fn default() -> Self {
        Self::new(DEFAULT_PING_INTERVAL)
    }
}

impl TransportFactory for WebSocketTransportFactory {
    fn create(&self, endpoint: &str, events: TransportEvents) -> Arc<dyn Transport> {
        Arc::new(
            WebSocketTransport::new(endpoint, events, self.ping_interval)
                .with_invoke_timeout(self.invoke_timeout),
        )
    }
}

/// Live socket plus its background tasks
struct Link {
    outgoing: mpsc::UnboundedSender<Message>,
    stopping: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Link {
    fn is_open(&self) -> bool {
        !self.reader.is_finished()
    }

    fn abort(self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.reader.abort();
        self.writer.abort();
    }
}

/// Hub connection over a single WebSocket
pub struct WebSocketTransport {
    url: String,
    events: TransportEvents,
    ping_interval: Duration,
    invoke_timeout: Duration,
    /// Serializes `start()` calls; held across the handshake
    opening: tokio::sync::Mutex<()>,
    /// Only locked briefly, so `stop()` never waits on a handshake
    link: tokio::sync::Mutex<Option<Link>>,
    /// Bumped by every `stop()`; a start that sees it change discards its socket
    stops: AtomicU64,
    pending: PendingInvocations,
    next_invocation_id: AtomicU64,
}

impl WebSocketTransport {
    pub fn new(endpoint: &str, events: TransportEvents, ping_interval: Duration) -> Self {
        Self {
            url: to_websocket_url(endpoint),
            events,
            ping_interval,
            invoke_timeout: DEFAULT_INVOKE_TIMEOUT,
            opening: tokio::sync::Mutex::new(()),
            link: tokio::sync::Mutex::new(None),
            stops: AtomicU64::new(0),
            pending: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            next_invocation_id: AtomicU64::new(1),
        }
    }

    pub fn with_invoke_timeout(mut self, d: Duration) -> Self {
        self.invoke_timeout = d;
        self
    }

    /// Socket URL this transport dials
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send_frame(&self, frame: String) -> Result<(), TransportError> {
        let link = self.link.lock().await;
        let link = link
            .as_ref()
            .filter(|link| link.is_open())
            .ok_or(TransportError::NotOpen)?;
        link.outgoing
            .send(Message::Text(frame))
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    /// Open the socket and complete the protocol handshake. Returns any
    /// frames that arrived together with the handshake answer.
    async fn open(&self) -> Result<(WsStream, String), TransportError> {
        tracing::info!(url = %self.url, "Connecting to hub");

        let (mut ws, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Start(e.to_string()))?;

        ws.send(Message::Text(protocol::handshake_request()))
            .await
            .map_err(|e| TransportError::Start(e.to_string()))?;

        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let rest = protocol::parse_handshake_response(&text)
                        .map_err(|e| TransportError::Start(e.to_string()))?;
                    return Ok((ws, rest.to_string()));
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(TransportError::Start(
                        "Connection closed during handshake".into(),
                    ));
                }
                Some(Err(e)) => return Err(TransportError::Start(e.to_string())),
                Some(Ok(_)) => {}
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let _opening = self.opening.lock().await;
        {
            let mut link = self.link.lock().await;
            if link.as_ref().is_some_and(Link::is_open) {
                return Ok(());
            }
            if let Some(stale) = link.take() {
                stale.abort();
            }
        }

        let stops = self.stops.load(Ordering::SeqCst);
        let (ws, leftover) = self.open().await?;
        let (write, read) = ws.split();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let stopping = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(run_writer(write, outgoing_rx, self.ping_interval));
        let reader = tokio::spawn(run_reader(
            read,
            leftover,
            self.events.clone(),
            self.pending.clone(),
            stopping.clone(),
        ));

        let opened = Link {
            outgoing,
            stopping,
            reader,
            writer,
        };

        let mut link = self.link.lock().await;
        if self.stops.load(Ordering::SeqCst) != stops {
            opened.abort();
            return Err(TransportError::Closed("Transport stopped while opening".into()));
        }
        tracing::debug!(url = %self.url, "Hub socket open");
        *link = Some(opened);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        let Some(link) = self.link.lock().await.take() else {
            return Ok(());
        };

        link.stopping.store(true, Ordering::SeqCst);
        // Writer exits after flushing the close frame
        let _ = link.outgoing.send(Message::Close(None));
        drop(link.outgoing);
        let flushed = link.writer.await;
        link.reader.abort();
        fail_pending(&self.pending, "Transport stopped");

        flushed.map_err(|e| TransportError::Closed(e.to_string()))
    }

    async fn send(&self, method: &str, args: Vec<Value>) -> Result<(), TransportError> {
        self.send_frame(protocol::encode_invocation(method, &args, None))
            .await
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, TransportError> {
        let id = self
            .next_invocation_id
            .fetch_add(1, Ordering::Relaxed)
            .to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        let frame = protocol::encode_invocation(method, &args, Some(&id));
        if let Err(e) = self.send_frame(frame).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        // The reader may have failed pending invocations just before this
        // id was registered; the bound keeps such a call from hanging
        match tokio::time::timeout(self.invoke_timeout, rx).await {
            Ok(completion) => completion
                .unwrap_or_else(|_| Err(TransportError::Closed("Invocation abandoned".into()))),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(TransportError::Timeout(self.invoke_timeout))
            }
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.abort();
        }
    }
}

/// Forward queued frames and send periodic keep-alive pings
async fn run_writer(
    mut write: SplitSink<WsStream, Message>,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    ping_interval: Duration,
) {
    let mut ping = tokio::time::interval(ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick completes immediately
    ping.tick().await;

    loop {
        tokio::select! {
            msg = outgoing.recv() => {
                let Some(msg) = msg else { break };
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    tracing::debug!(error = %e, "Hub write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = write.send(Message::Text(protocol::encode_ping())).await {
                    tracing::debug!(error = %e, "Hub ping failed");
                    break;
                }
            }
        }
    }

    let _ = write.close().await;
}

/// Decode inbound frames until the connection ends, then report the drop
/// unless `stop()` initiated it.
async fn run_reader(
    mut read: SplitStream<WsStream>,
    leftover: String,
    events: TransportEvents,
    pending: PendingInvocations,
    stopping: Arc<AtomicBool>,
) {
    let mut reason = handle_text(&leftover, &events, &pending);

    while reason.is_none() {
        reason = match read.next().await {
            Some(Ok(Message::Text(text))) => handle_text(&text, &events, &pending),
            Some(Ok(Message::Close(frame))) => Some(TransportError::Closed(
                frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "Close frame received".into()),
            )),
            Some(Ok(_)) => None,
            Some(Err(e)) => Some(TransportError::Closed(e.to_string())),
            None => Some(TransportError::Closed("Stream ended unexpectedly".into())),
        };
    }

    fail_pending(&pending, "Connection lost");

    if !stopping.load(Ordering::SeqCst) {
        tracing::warn!(reason = ?reason, "Hub connection dropped");
        events.closed(reason);
    }
}

/// Handle one text message. Returns the close reason when the hub ends
/// the connection.
fn handle_text(
    text: &str,
    events: &TransportEvents,
    pending: &PendingInvocations,
) -> Option<TransportError> {
    for frame in protocol::decode_frames(text) {
        match frame {
            Ok(HubMessage::Invocation { target, arguments }) => {
                events.message(&target, &arguments);
            }
            Ok(HubMessage::Completion {
                invocation_id,
                result,
            }) => {
                if let Some(tx) = pending.lock().remove(&invocation_id) {
                    let _ = tx.send(result.map_err(TransportError::Invocation));
                } else {
                    tracing::debug!(invocation_id = %invocation_id, "Completion for unknown invocation");
                }
            }
            Ok(HubMessage::Ping) => {}
            Ok(HubMessage::Close { error }) => {
                return Some(TransportError::Closed(
                    error.unwrap_or_else(|| "Hub closed the connection".into()),
                ));
            }
            Ok(HubMessage::Other(kind)) => {
                tracing::debug!(kind, "Ignoring hub message");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed hub frame");
            }
        }
    }
    None
}

fn fail_pending(pending: &PendingInvocations, reason: &str) {
    for (_, tx) in pending.lock().drain() {
        let _ = tx.send(Err(TransportError::Closed(reason.to_string())));
    }
}
