//! Reconnecting client transport.
//!
//! A [`ReconnectingTransport`] owns at most one WebSocket at a time. The
//! socket lives inside a single actor task; callers talk to it through a
//! cloneable [`TransportHandle`] and observe it through a [`TransportEvent`]
//! channel plus a `watch` of [`TransportStatus`].
//!
//! Lifecycle:
//!
//! ```text
//! Idle --connect()--> Connecting --handshake--> Open
//!                        ^                       |
//!                        |        socket lost    v
//!                        +------- backoff <------+
//!
//! any state --close()--> Closing --> Closed
//! backoff with no attempts left --> Closed
//! ```
//!
//! Envelopes sent while the socket is not open are queued and flushed in
//! order as soon as it opens. Once `Closed`, the transport is finished and
//! every call returns [`TransportError::Closed`].

use std::fmt;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::reconnect::ReconnectionConfig;
use crate::core::envelope::{ClientEnvelope, EnvelopeError, ServerEnvelope};
use crate::core::queue::{CommandQueue, DEFAULT_QUEUE_LIMIT, QueueError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Capacity of the command and event channels.
const CHANNEL_CAPACITY: usize = 256;

/// Upper bound on a single connection attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Relay endpoint, e.g. `ws://localhost:3001/relay`
    pub url: String,

    #[serde(default)]
    pub reconnection: ReconnectionConfig,

    /// Maximum number of envelopes held while the socket is not open
    #[serde(default = "default_queue_limit")]
    pub queue_limit: usize,
}

fn default_queue_limit() -> usize {
    DEFAULT_QUEUE_LIMIT
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnection: ReconnectionConfig::default(),
            queue_limit: DEFAULT_QUEUE_LIMIT,
        }
    }
}

// =============================================================================
// State, events and errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Idle,
    /// Handshaking, or waiting out a backoff delay before the next attempt
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Idle => write!(f, "idle"),
            TransportState::Connecting => write!(f, "connecting"),
            TransportState::Open => write!(f, "open"),
            TransportState::Closing => write!(f, "closing"),
            TransportState::Closed => write!(f, "closed"),
        }
    }
}

/// Snapshot of the transport published after every transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportStatus {
    pub state: TransportState,
    /// Reconnect attempts since the socket was last open
    pub reconnect_attempt: u32,
    /// When the pending reconnect attempt fires, if one is scheduled
    pub next_retry_at: Option<Instant>,
    /// Envelopes waiting for the socket to open
    pub queued: usize,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    /// A connection attempt failed; a retry may follow
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Backoff gave up; the transport is closed
    #[error("Reconnection failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// The transport was closed
    #[error("Transport closed")]
    Closed,

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Socket error: {0}")]
    Socket(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The socket opened; `reconnected` is false only for the first open
    Open { reconnected: bool },
    /// The socket closed, either for good or before a reconnect attempt
    Close { reason: Option<String> },
    Message(ServerEnvelope),
    Error(TransportError),
}

// =============================================================================
// Handle
// =============================================================================

enum Command {
    Connect,
    Send(ClientEnvelope, oneshot::Sender<Result<(), TransportError>>),
    Close,
}

/// Cloneable handle to a running transport.
#[derive(Clone)]
pub struct TransportHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<TransportStatus>,
}

impl TransportHandle {
    /// Start connecting. No-op unless the transport is idle.
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.ensure_not_closed()?;
        self.commands
            .send(Command::Connect)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Send an envelope now, or queue it until the socket opens.
    pub async fn send(&self, envelope: ClientEnvelope) -> Result<(), TransportError> {
        self.ensure_not_closed()?;
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Send(envelope, tx))
            .await
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    /// Close the socket, cancel any pending reconnect and wait for `Closed`.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close).await;
        let mut status = self.status.clone();
        let _ = status
            .wait_for(|s| s.state == TransportState::Closed)
            .await;
    }

    pub fn status(&self) -> TransportStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> TransportState {
        self.status.borrow().state
    }

    fn ensure_not_closed(&self) -> Result<(), TransportError> {
        match self.state() {
            TransportState::Closed => Err(TransportError::Closed),
            _ => Ok(()),
        }
    }

    /// Watch every status change.
    pub fn subscribe(&self) -> watch::Receiver<TransportStatus> {
        self.status.clone()
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("status", &*self.status.borrow())
            .finish()
    }
}

// =============================================================================
// Actor
// =============================================================================

pub struct ReconnectingTransport;

impl ReconnectingTransport {
    /// Spawn the transport task in the `Idle` state.
    pub fn spawn(config: TransportConfig) -> (TransportHandle, mpsc::Receiver<TransportEvent>) {
        let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(TransportStatus::default());

        let actor = TransportActor {
            queue: CommandQueue::new(config.queue_limit),
            config,
            commands: command_rx,
            events: event_tx,
            status: status_tx,
            attempt: 0,
            has_opened: false,
        };
        tokio::spawn(actor.run());

        (
            TransportHandle {
                commands: command_tx,
                status: status_rx,
            },
            event_rx,
        )
    }
}

enum Phase {
    Idle,
    Connecting,
    Open(Box<WsStream>),
    /// Socket lost or attempt failed; schedule the next attempt
    Backoff,
    Closed,
}

struct TransportActor {
    config: TransportConfig,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<TransportEvent>,
    status: watch::Sender<TransportStatus>,
    queue: CommandQueue<ClientEnvelope>,
    attempt: u32,
    has_opened: bool,
}

impl TransportActor {
    async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Connecting => self.connecting().await,
                Phase::Open(ws) => self.open(*ws).await,
                Phase::Backoff => self.backoff().await,
                Phase::Closed => break,
            };
        }
        tracing::debug!(url = %self.config.url, "Transport task finished");
    }

    async fn idle(&mut self) -> Phase {
        loop {
            match self.commands.recv().await {
                Some(Command::Connect) => return Phase::Connecting,
                Some(Command::Send(envelope, reply)) => self.enqueue(envelope, reply),
                Some(Command::Close) => return self.finish(None).await,
                // Every handle dropped
                None => return self.finish(None).await,
            }
        }
    }

    async fn connecting(&mut self) -> Phase {
        self.status.send_modify(|s| {
            s.state = TransportState::Connecting;
            s.next_retry_at = None;
        });
        tracing::debug!(url = %self.config.url, attempt = self.attempt, "Connecting");

        let url = self.config.url.clone();
        let connect = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(url));
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    let error = match result {
                        Ok(Ok((ws, _response))) => return Phase::Open(Box::new(ws)),
                        Ok(Err(e)) => e.to_string(),
                        Err(_) => format!("timed out after {}s", CONNECT_TIMEOUT.as_secs()),
                    };
                    tracing::warn!(url = %self.config.url, "Connection attempt failed: {}", error);
                    self.emit(TransportEvent::Error(TransportError::Connect(error))).await;
                    return Phase::Backoff;
                }
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => {}
                    Some(Command::Send(envelope, reply)) => self.enqueue(envelope, reply),
                    Some(Command::Close) | None => return self.finish(None).await,
                }
            }
        }
    }

    async fn open(&mut self, ws: WsStream) -> Phase {
        let reconnected = self.has_opened;
        self.has_opened = true;
        self.attempt = 0;
        self.status.send_modify(|s| {
            s.state = TransportState::Open;
            s.reconnect_attempt = 0;
            s.next_retry_at = None;
        });
        tracing::info!(url = %self.config.url, reconnected, "Transport open");
        self.emit(TransportEvent::Open { reconnected }).await;

        let (mut sink, mut source) = ws.split();

        if let Err(reason) = self.flush(&mut sink).await {
            return self.dropped(Some(reason)).await;
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => {}
                    Some(Command::Send(envelope, reply)) => {
                        match write(&mut sink, &envelope).await {
                            Ok(()) => {
                                let _ = reply.send(Ok(()));
                            }
                            Err(TransportError::Socket(reason)) => {
                                // Kept for the next connection
                                self.queue.push_front(envelope);
                                self.publish_queue_len();
                                let _ = reply.send(Ok(()));
                                return self.dropped(Some(reason)).await;
                            }
                            Err(e) => {
                                let _ = reply.send(Err(e));
                            }
                        }
                    }
                    Some(Command::Close) | None => {
                        self.status.send_modify(|s| s.state = TransportState::Closing);
                        let _ = sink.send(Message::Close(None)).await;
                        let _ = sink.close().await;
                        return self.finish(None).await;
                    }
                },
                frame = source.next() => {
                    if let Some(reason) = self.on_frame(frame, &mut sink).await {
                        return self.dropped(reason).await;
                    }
                }
            }
        }
    }

    /// Handle one inbound frame. Returns `Some(reason)` when the socket is gone.
    async fn on_frame(
        &mut self,
        frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
        sink: &mut WsSink,
    ) -> Option<Option<String>> {
        match frame {
            Some(Ok(Message::Text(text))) => {
                match ServerEnvelope::parse(&text) {
                    Ok(envelope) => self.emit(TransportEvent::Message(envelope)).await,
                    Err(EnvelopeError::UnknownType(kind)) => {
                        tracing::debug!(kind = %kind, "Ignoring unknown envelope type");
                    }
                    Err(e) => tracing::warn!("Dropping invalid envelope: {}", e),
                }
                None
            }
            Some(Ok(Message::Ping(data))) => {
                if let Err(e) = sink.send(Message::Pong(data)).await {
                    tracing::debug!("Failed to send pong: {}", e);
                }
                None
            }
            Some(Ok(Message::Close(frame))) => {
                Some(frame.map(|f| f.reason.as_str().to_string()))
            }
            Some(Ok(_)) => None,
            Some(Err(e)) => Some(Some(e.to_string())),
            None => Some(None),
        }
    }

    /// Send everything queued while the socket was down, oldest first.
    async fn flush(&mut self, sink: &mut WsSink) -> Result<(), String> {
        let mut flushed = 0usize;
        // Re-checks the queue on every pass, so nothing enqueued meanwhile is skipped
        while let Some(envelope) = self.queue.pop_front() {
            match write(sink, &envelope).await {
                Ok(()) => flushed += 1,
                Err(TransportError::Socket(reason)) => {
                    self.queue.push_front(envelope);
                    self.publish_queue_len();
                    return Err(reason);
                }
                Err(e) => tracing::error!("Dropping queued {}: {}", envelope.kind(), e),
            }
        }
        if flushed > 0 {
            tracing::debug!(flushed, "Flushed queued envelopes");
        }
        self.publish_queue_len();
        Ok(())
    }

    /// The socket went away without a local close.
    async fn dropped(&mut self, reason: Option<String>) -> Phase {
        tracing::warn!(url = %self.config.url, reason = ?reason, "Transport connection lost");
        self.emit(TransportEvent::Close { reason }).await;
        Phase::Backoff
    }

    async fn backoff(&mut self) -> Phase {
        let policy = &self.config.reconnection;
        if !policy.should_retry(self.attempt) {
            let attempts = self.attempt;
            tracing::error!(url = %self.config.url, attempts, "Giving up on reconnection");
            self.emit(TransportEvent::Error(TransportError::RetriesExhausted { attempts }))
                .await;
            return self
                .finish(Some("reconnection attempts exhausted".to_string()))
                .await;
        }

        self.attempt += 1;
        let delay = policy.delay_for(self.attempt);
        let deadline = Instant::now() + delay;
        let attempt = self.attempt;
        self.status.send_modify(|s| {
            s.state = TransportState::Connecting;
            s.reconnect_attempt = attempt;
            s.next_retry_at = Some(deadline);
        });
        tracing::info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnection"
        );

        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Phase::Connecting,
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => {}
                    Some(Command::Send(envelope, reply)) => self.enqueue(envelope, reply),
                    Some(Command::Close) | None => return self.finish(None).await,
                }
            }
        }
    }

    async fn finish(&mut self, reason: Option<String>) -> Phase {
        let dropped = self.queue.clear();
        if dropped > 0 {
            tracing::warn!(dropped, "Discarding queued envelopes on close");
        }
        self.status.send_modify(|s| {
            s.state = TransportState::Closed;
            s.next_retry_at = None;
            s.queued = 0;
        });
        self.emit(TransportEvent::Close { reason }).await;
        Phase::Closed
    }

    fn enqueue(
        &mut self,
        envelope: ClientEnvelope,
        reply: oneshot::Sender<Result<(), TransportError>>,
    ) {
        let kind = envelope.kind();
        let result = self.queue.enqueue(envelope).map_err(TransportError::from);
        match &result {
            Ok(()) => tracing::trace!(kind, queued = self.queue.len(), "Queued envelope"),
            Err(e) => tracing::warn!(kind, "Rejected envelope: {}", e),
        }
        self.publish_queue_len();
        let _ = reply.send(result);
    }

    fn publish_queue_len(&self) {
        let queued = self.queue.len();
        self.status.send_if_modified(|s| {
            let changed = s.queued != queued;
            s.queued = queued;
            changed
        });
    }

    async fn emit(&self, event: TransportEvent) {
        if self.events.send(event).await.is_err() {
            tracing::trace!("Transport event receiver dropped");
        }
    }
}

async fn write(sink: &mut WsSink, envelope: &ClientEnvelope) -> Result<(), TransportError> {
    let json = serde_json::to_string(envelope)
        .map_err(|e| TransportError::Serialization(e.to_string()))?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| TransportError::Socket(e.to_string()))
}
