//! CDP Client - one WebSocket, many flattened sessions
//!
//! Commands are matched to responses by id through a oneshot per request.
//! Events go through an `EventRouter`, which also remembers which child session
//! was auto-attached under which, so page-level listeners hear their iframes.
//! No retries: a failed or timed-out command is reported to the caller.

use dashmap::DashMap;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::protocol::*;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// How long a command may wait for its response
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Chrome's answer when a frame shares its parent's renderer
const SAME_PROCESS_FRAME_MESSAGE: &str = "does not have a separate CDP session";

#[derive(Error, Debug)]
pub enum CDPError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CDP protocol error: {code} - {message}")]
    Protocol { code: i32, message: String },

    #[error("Request timeout")]
    Timeout,

    #[error("Connection closed")]
    Closed,

    #[error("Invalid response for request {0}")]
    InvalidResponse(RequestId),

    #[error("Target {0} has no separate CDP session (same-process frame)")]
    SessionUnsupported(TargetId),
}

impl CDPError {
    /// True when the engine refuses a dedicated session for a frame.
    /// Callers recover by reusing the parent's session.
    pub fn is_session_unsupported(&self) -> bool {
        match self {
            CDPError::SessionUnsupported(_) => true,
            CDPError::Protocol { message, .. } => message.contains(SAME_PROCESS_FRAME_MESSAGE),
            _ => false,
        }
    }
}

/// Result type for CDP operations
pub type Result<T> = std::result::Result<T, CDPError>;

/// Event subscriber callback
pub type EventCallback = Arc<dyn Fn(CDPEvent) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe
pub type SubscriptionId = u64;

struct Subscriber {
    id: SubscriptionId,
    /// Only events from this session or sessions attached beneath it
    scope: Option<SessionId>,
    callback: EventCallback,
}

/// Event fan-out shared by the client and its sessions
///
/// Also remembers which flattened session was auto-attached under which, so a
/// page-scoped subscription sees its out-of-process iframes' events too.
pub struct EventRouter {
    next_subscription: AtomicU64,

    /// Key: method name (e.g., "Page.loadEventFired")
    subscribers: DashMap<String, Vec<Subscriber>>,

    /// Key: child session, Value: session it was attached under
    parents: DashMap<SessionId, SessionId>,
}

impl EventRouter {
    /// Deeper than any real frame tree; stops cycles in bad input
    const MAX_SESSION_DEPTH: usize = 32;

    pub fn new() -> Self {
        Self {
            next_subscription: AtomicU64::new(1),
            subscribers: DashMap::new(),
            parents: DashMap::new(),
        }
    }

    pub fn subscribe(
        &self,
        method: impl Into<String>,
        scope: Option<SessionId>,
        callback: EventCallback,
    ) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .entry(method.into())
            .or_default()
            .push(Subscriber {
                id,
                scope,
                callback,
            });
        id
    }

    /// Returns false if `id` was not subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for mut entry in self.subscribers.iter_mut() {
            let before = entry.len();
            entry.retain(|s| s.id != id);
            removed |= entry.len() != before;
        }
        self.subscribers.retain(|_, subs| !subs.is_empty());
        removed
    }

    pub fn subscriber_count(&self, method: &str) -> usize {
        self.subscribers.get(method).map(|s| s.len()).unwrap_or(0)
    }

    /// Subscriptions across all methods
    pub fn total_subscribers(&self) -> usize {
        self.subscribers.iter().map(|entry| entry.len()).sum()
    }

    /// True if `session` is `scope` or was attached (transitively) under it
    pub fn is_within(&self, session: &str, scope: &str) -> bool {
        let mut current = session.to_string();
        for _ in 0..Self::MAX_SESSION_DEPTH {
            if current == scope {
                return true;
            }
            match self.parents.get(&current) {
                Some(parent) => current = parent.value().clone(),
                None => return false,
            }
        }
        false
    }

    /// Update the session tree, then deliver `event` to matching subscribers
    pub fn dispatch(&self, event: &CDPEvent) {
        self.track_sessions(event);

        // Collect first: callbacks may subscribe/unsubscribe re-entrantly
        let callbacks: Vec<EventCallback> = match self.subscribers.get(&event.method) {
            Some(subs) => subs
                .iter()
                .filter(|s| match (&s.scope, &event.session_id) {
                    (None, _) => true,
                    (Some(scope), Some(session)) => self.is_within(session, scope),
                    (Some(_), None) => false,
                })
                .map(|s| s.callback.clone())
                .collect(),
            None => return,
        };

        for callback in callbacks {
            callback(event.clone());
        }
    }

    fn track_sessions(&self, event: &CDPEvent) {
        match event.method.as_str() {
            "Target.attachedToTarget" => {
                if let (Some(parent), Some(attached)) =
                    (&event.session_id, event.parse::<AttachedToTarget>())
                {
                    tracing::debug!(
                        "Session {} ({}) attached under {}",
                        attached.session_id,
                        attached.target_info.target_type,
                        parent
                    );
                    self.parents.insert(attached.session_id, parent.clone());
                }
            }
            "Target.detachedFromTarget" => {
                if let Some(detached) = event.parse::<DetachedFromTarget>() {
                    self.parents.remove(&detached.session_id);
                }
            }
            _ => {}
        }
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// CDP Client - manages single WebSocket connection to browser
pub struct CDPClient {
    /// Monotonic request ID counter
    next_id: AtomicU64,

    /// Pending requests waiting for responses
    /// Key: request_id, Value: oneshot sender for response
    pending: Arc<DashMap<RequestId, oneshot::Sender<CDPResponse>>>,

    /// Event subscribers and session tree
    router: Arc<EventRouter>,

    /// WebSocket write half (wrapped for concurrent sending)
    ws_sink: Arc<RwLock<WsSink>>,

    /// Stops the receiver task
    shutdown_tx: mpsc::Sender<()>,

    request_timeout: Duration,
}

impl CDPClient {
    /// Connect to Chrome DevTools Protocol endpoint
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>> {
        Self::connect_with_timeout(ws_url, DEFAULT_REQUEST_TIMEOUT).await
    }

    pub async fn connect_with_timeout(ws_url: &str, request_timeout: Duration) -> Result<Arc<Self>> {
        let (ws_stream, _) = connect_async(ws_url).await?;
        let (sink, mut stream) = ws_stream.split();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let client = Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
            router: Arc::new(EventRouter::new()),
            ws_sink: Arc::new(RwLock::new(sink)),
            shutdown_tx,
            request_timeout,
        });

        // The receiver only holds what it routes into, not the client itself
        let pending = client.pending.clone();
        let router = client.router.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let Err(e) = route_message(&pending, &router, &text) {
                                    tracing::error!("Failed to handle message: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::info!("WebSocket closed");
                                break;
                            }
                            Some(Err(e)) => {
                                tracing::error!("WebSocket error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                }
            }

            // Dropping the senders fails every waiter with `Closed`
            pending.clear();
        });

        Ok(client)
    }

    /// Send CDP request and wait for response
    pub async fn send_request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: Option<SessionId>,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CDPRequest {
            id,
            method: method.into(),
            params,
            session_id,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        // Serialize and send
        let json = serde_json::to_string(&request)?;
        let mut sink = self.ws_sink.write().await;
        if let Err(e) = sink.send(Message::Text(json)).await {
            self.pending.remove(&id);
            return Err(CDPError::WebSocket(e));
        }
        drop(sink); // Release lock immediately

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(CDPError::Closed),
            Err(_) => {
                self.pending.remove(&id);
                tracing::warn!("{} timed out after {:?}", request.method, self.request_timeout);
                return Err(CDPError::Timeout);
            }
        };

        if let Some(error) = response.error {
            return Err(CDPError::Protocol {
                code: error.code,
                message: error.message,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Subscribe to CDP events from every session
    pub fn subscribe(&self, method: impl Into<String>, callback: EventCallback) -> SubscriptionId {
        self.router.subscribe(method, None, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.router.unsubscribe(id)
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    /// Close connection gracefully
    pub async fn close(&self) -> Result<()> {
        let _ = self.shutdown_tx.try_send(());
        let mut sink = self.ws_sink.write().await;
        sink.close().await?;
        Ok(())
    }
}

/// Handle incoming WebSocket message
fn route_message(
    pending: &DashMap<RequestId, oneshot::Sender<CDPResponse>>,
    router: &EventRouter,
    text: &str,
) -> Result<()> {
    let msg: CDPMessage = serde_json::from_str(text)?;

    match msg {
        CDPMessage::Response(response) => {
            if let Some((_, tx)) = pending.remove(&response.id) {
                let _ = tx.send(response); // Ignore send errors (receiver dropped)
            } else {
                tracing::warn!("Received response for unknown request: {}", response.id);
            }
        }
        CDPMessage::Event(event) => router.dispatch(&event),
    }

    Ok(())
}
