//! Realtime channel adapter.
//!
//! Maintains one WebSocket connection to the collaboration server for as long
//! as the session holds an access token, and turns pushed events into
//! [`TaskStore`] mutations.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──token──▶ Connecting ──handshake──▶ Connected
//!      ▲                      │                        │
//!      └──── token cleared ───┴──── socket closed ─────┘
//! ```
//!
//! The channel connects to `{ws_url}/ws?token=<access token>`. A failed or
//! dropped connection is retried with exponential backoff (1s → 30s, ±25%
//! jitter). A token change tears the connection down and reconnects at once
//! with the new credentials. Dropping the token sender ends [`RealtimeChannel::run`].
//!
//! # Wire format
//!
//! Every frame is a JSON envelope `{"event": <name>, "data": <payload>}`.
//! Inbound frames named `"event"` carry a [`RealtimeEvent`]; others are ignored.
//! Outbound intents use the intent name with `{"taskId": ...}` as data.
//!
//! | Event            | Store effect                              |
//! |------------------|-------------------------------------------|
//! | `task-created`   | [`TaskStore::insert_from_event`]          |
//! | `task-updated`   | [`TaskStore::apply_optimistic`] (replace) |
//! | `task-deleted`   | [`TaskStore::remove_from_event`]          |
//! | presence, typing | logged only                               |

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::store::TaskStore;
use crate::types::{RealtimeEvent, TaskId, TaskMutation};

/// Envelope name of inbound frames that carry a [`RealtimeEvent`].
pub const EVENT_FRAME: &str = "event";

/// Path appended to the configured WebSocket base URL.
const WS_PATH: &str = "/ws";

/// Initial reconnect delay in seconds.
const INITIAL_RECONNECT_DELAY_SECS: u64 = 1;

/// Maximum reconnect delay in seconds.
const MAX_RECONNECT_DELAY_SECS: u64 = 30;

/// Jitter factor (±25%).
const JITTER_FACTOR: f64 = 0.25;

/// Outbound intents buffered while a send is in progress.
const INTENT_BUFFER: usize = 64;

/// Errors from the realtime channel.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// The configured WebSocket URL cannot be parsed.
    #[error("invalid realtime URL: {0}")]
    InvalidUrl(String),

    /// A frame is not a valid JSON envelope.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    /// An `event` frame whose payload is not a recognized event.
    #[error("unrecognized event: {0}")]
    UnknownEvent(#[source] serde_json::Error),
}

/// Connection status, observable through [`RealtimeHandle::state_updates`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// A frame on the wire, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Client-to-server presence signals. Fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    JoinTask(TaskId),
    LeaveTask(TaskId),
    TypingStarted(TaskId),
    TypingStopped(TaskId),
}

impl Intent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinTask(_) => "join-task",
            Self::LeaveTask(_) => "leave-task",
            Self::TypingStarted(_) => "typing-started",
            Self::TypingStopped(_) => "typing-stopped",
        }
    }

    #[must_use]
    pub fn task_id(&self) -> &str {
        match self {
            Self::JoinTask(id) | Self::LeaveTask(id) | Self::TypingStarted(id) | Self::TypingStopped(id) => id,
        }
    }

    #[must_use]
    pub fn to_frame(&self) -> Frame {
        Frame {
            event: self.name().to_string(),
            data: json!({ "taskId": self.task_id() }),
        }
    }
}

/// Routes one decoded event into the store.
pub fn dispatch(store: &TaskStore, event: RealtimeEvent) {
    let kind = event.kind();
    match event {
        RealtimeEvent::TaskCreated { task } => store.insert_from_event(task),
        RealtimeEvent::TaskUpdated { task } => {
            let id = task.id.clone();
            store.apply_optimistic(&id, TaskMutation::Replace(task));
        }
        RealtimeEvent::TaskDeleted { task_id } => store.remove_from_event(&task_id),
        RealtimeEvent::UserJoined(payload)
        | RealtimeEvent::UserLeft(payload)
        | RealtimeEvent::PresenceUpdated(payload)
        | RealtimeEvent::TypingStarted(payload)
        | RealtimeEvent::TypingStopped(payload) => {
            debug!(kind, payload = %payload, "Presence event");
        }
    }
}

/// Decodes a text frame and dispatches it.
///
/// Frames with an envelope name other than [`EVENT_FRAME`] are ignored.
///
/// # Errors
///
/// Returns [`RealtimeError::MalformedFrame`] for invalid envelopes and
/// [`RealtimeError::UnknownEvent`] for event kinds outside [`RealtimeEvent`].
/// The store is not touched in either case.
pub fn handle_frame(store: &TaskStore, text: &str) -> Result<(), RealtimeError> {
    let frame: Frame = serde_json::from_str(text).map_err(RealtimeError::MalformedFrame)?;
    if frame.event != EVENT_FRAME {
        trace!(event = %frame.event, "Ignoring frame");
        return Ok(());
    }

    let event: RealtimeEvent =
        serde_json::from_value(frame.data).map_err(RealtimeError::UnknownEvent)?;
    dispatch(store, event);
    Ok(())
}

/// Exponential reconnect delay with jitter.
#[derive(Debug)]
struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            current: Duration::from_secs(INITIAL_RECONNECT_DELAY_SECS),
        }
    }

    /// Returns the jittered current delay and doubles the next one, up to the cap.
    fn next_delay(&mut self) -> Duration {
        let delay = add_jitter(self.current);
        let next = (self.current.as_secs() * 2).min(MAX_RECONNECT_DELAY_SECS);
        self.current = Duration::from_secs(next);
        delay
    }

    fn reset(&mut self) {
        self.current = Duration::from_secs(INITIAL_RECONNECT_DELAY_SECS);
    }
}

fn add_jitter(duration: Duration) -> Duration {
    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * JITTER_FACTOR;
    let jitter = rng.random_range(-jitter_range..=jitter_range);
    Duration::from_secs_f64((duration.as_secs_f64() + jitter).max(0.1))
}

/// Why a connected session ended.
enum SessionEnd {
    Closed,
    TokenChanged,
    TokenDropped,
}

/// Cheap handle for emitting intents and observing the connection.
#[derive(Debug, Clone)]
pub struct RealtimeHandle {
    intent_tx: mpsc::Sender<Intent>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl RealtimeHandle {
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_updates(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn join_task(&self, task_id: &str) {
        self.emit(Intent::JoinTask(task_id.to_string()));
    }

    pub fn leave_task(&self, task_id: &str) {
        self.emit(Intent::LeaveTask(task_id.to_string()));
    }

    pub fn typing_started(&self, task_id: &str) {
        self.emit(Intent::TypingStarted(task_id.to_string()));
    }

    pub fn typing_stopped(&self, task_id: &str) {
        self.emit(Intent::TypingStopped(task_id.to_string()));
    }

    /// Queues an intent if connected; otherwise it is dropped.
    pub fn emit(&self, intent: Intent) {
        if self.state() != ConnectionState::Connected {
            trace!(intent = intent.name(), "Not connected, dropping intent");
            return;
        }
        if let Err(e) = self.intent_tx.try_send(intent) {
            debug!(error = %e, "Intent queue unavailable, dropping intent");
        }
    }
}

/// The realtime connection driver.
///
/// Obtain handles with [`handle`](Self::handle) before moving the channel
/// into [`run`](Self::run).
#[derive(Debug)]
pub struct RealtimeChannel {
    endpoint: Url,
    store: TaskStore,
    state_tx: watch::Sender<ConnectionState>,
    intent_tx: mpsc::Sender<Intent>,
    intent_rx: mpsc::Receiver<Intent>,
}

impl RealtimeChannel {
    /// Creates a channel for the server at `ws_url` that feeds `store`.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::InvalidUrl`] if `ws_url` is not a `ws://` or
    /// `wss://` URL.
    pub fn new(ws_url: &str, store: TaskStore) -> Result<Self, RealtimeError> {
        let endpoint = Url::parse(&format!("{}{WS_PATH}", ws_url.trim_end_matches('/')))
            .map_err(|e| RealtimeError::InvalidUrl(format!("{ws_url}: {e}")))?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(RealtimeError::InvalidUrl(format!(
                "{ws_url}: scheme must be ws or wss"
            )));
        }

        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (intent_tx, intent_rx) = mpsc::channel(INTENT_BUFFER);
        Ok(Self {
            endpoint,
            store,
            state_tx,
            intent_tx,
            intent_rx,
        })
    }

    #[must_use]
    pub fn handle(&self) -> RealtimeHandle {
        RealtimeHandle {
            intent_tx: self.intent_tx.clone(),
            state_rx: self.state_tx.subscribe(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Drives the connection until `token_rx`'s sender is dropped.
    ///
    /// Connects whenever the watched token is present and non-empty, and
    /// disconnects when it is cleared.
    pub async fn run(mut self, mut token_rx: watch::Receiver<Option<String>>) {
        let mut backoff = Backoff::new();

        loop {
            let token = token_rx
                .borrow_and_update()
                .clone()
                .filter(|t| !t.is_empty());

            let Some(token) = token else {
                self.set_state(ConnectionState::Disconnected);
                backoff.reset();
                if token_rx.changed().await.is_err() {
                    break;
                }
                continue;
            };

            self.set_state(ConnectionState::Connecting);
            let url = self.connect_url(&token);
            let connected = tokio::select! {
                result = connect_async(url) => Some(result),
                changed = token_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    None
                }
            };
            let Some(connected) = connected else {
                debug!("Token changed while connecting, restarting");
                continue;
            };

            let end = match connected {
                Ok((ws, _response)) => {
                    info!(endpoint = %self.endpoint, "Realtime channel connected");
                    backoff.reset();
                    self.set_state(ConnectionState::Connected);
                    run_session(ws, &self.store, &mut self.intent_rx, &mut token_rx).await
                }
                Err(e) => {
                    warn!(error = %e, "Realtime connection failed");
                    SessionEnd::Closed
                }
            };

            self.set_state(ConnectionState::Disconnected);
            self.drain_intents();

            match end {
                SessionEnd::TokenChanged => continue,
                SessionEnd::TokenDropped => break,
                SessionEnd::Closed => {
                    let delay = backoff.next_delay();
                    debug!(delay_ms = delay.as_millis(), "Waiting before reconnect");
                    tokio::select! {
                        () = sleep(delay) => {}
                        changed = token_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!("Realtime channel stopped");
    }

    fn connect_url(&self, token: &str) -> String {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("token", token);
        url.to_string()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = ?*current, to = ?state, "Realtime state changed");
            *current = state;
            true
        });
    }

    /// Discards intents queued for a connection that no longer exists.
    fn drain_intents(&mut self) {
        while self.intent_rx.try_recv().is_ok() {}
    }
}

/// Pumps one open connection until it closes or the token changes.
async fn run_session(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    store: &TaskStore,
    intent_rx: &mut mpsc::Receiver<Intent>,
    token_rx: &mut watch::Receiver<Option<String>>,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = handle_frame(store, &text) {
                        warn!(error = %e, "Dropping realtime frame");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Realtime channel closed by server");
                    return SessionEnd::Closed;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Realtime connection error");
                    return SessionEnd::Closed;
                }
                None => return SessionEnd::Closed,
            },
            Some(intent) = intent_rx.recv() => {
                match serde_json::to_string(&intent.to_frame()) {
                    Ok(json) => {
                        if let Err(e) = sink.send(Message::Text(json)).await {
                            debug!(error = %e, intent = intent.name(), "Failed to send intent");
                        }
                    }
                    Err(e) => debug!(error = %e, "Failed to encode intent"),
                }
            }
            changed = token_rx.changed() => {
                if let Err(e) = sink.close().await {
                    trace!(error = %e, "Close handshake failed");
                }
                return if changed.is_err() {
                    SessionEnd::TokenDropped
                } else {
                    SessionEnd::TokenChanged
                };
            }
        }
    }
}
