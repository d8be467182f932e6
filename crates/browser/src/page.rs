//! Settling Page - the page-level API
//!
//! Wraps one browser page with the operations automation code needs before it
//! touches the DOM: wait for settlement, get the right protocol session for a
//! frame, turn (frame, node) pairs into portable addresses and back, and look
//! elements up through shadow roots.
//!
//! Registry entries and ordinals follow the page's lifecycle: a main-frame
//! navigation starts a new ordinal epoch and drops every frame session, a
//! detached frame or target loses its session.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use frame_dom::pierce::DEFAULT_ENGINE_NAME;
use frame_dom::{
    BackendNodeId, DomArena, DomError, DomService, ElementAddress, FrameOrdinals, FrameRef, NodeId,
    SelectorEngineRegistry,
};

use crate::cdp::protocol::{DetachedFromTarget, FrameEvent, FrameNavigated, TargetId, TargetInfo};
use crate::cdp::{CDPClient, CDPError, CDPEvent, EventCallback, SharedSession, SubscriptionId};
use crate::events::{EventBus, PageEvent};
use crate::registry::{CdpSessionFactory, SessionFactory, SessionRegistry, Target};
use crate::settle::{SettleConfig, SettleDetector, SettleOutcome};

const LIFECYCLE_EVENTS: [&str; 3] = [
    "Page.frameNavigated",
    "Page.frameDetached",
    "Target.detachedFromTarget",
];

#[derive(Error, Debug)]
pub enum PageError {
    #[error(transparent)]
    Cdp(#[from] CDPError),

    #[error(transparent)]
    Dom(#[from] DomError),

    #[error("No frame has ordinal {0}")]
    UnknownOrdinal(u32),

    #[error("Frame {0} is not in the document")]
    FrameNotFound(String),

    #[error("Invalid CDP endpoint {0:?}")]
    InvalidEndpoint(String),
}

pub type Result<T> = std::result::Result<T, PageError>;

/// Page configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    pub id: String,
    /// Browser-level DevTools WebSocket URL
    pub cdp_url: String,
    /// Page to attach to; the first open page (or a new one) when unset
    pub target_id: Option<TargetId>,
    /// Name the piercing selector engine is registered under
    pub selector_engine: String,
    pub settle: SettleConfig,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            cdp_url: "ws://localhost:9222".to_string(),
            target_id: None,
            selector_engine: DEFAULT_ENGINE_NAME.to_string(),
            settle: SettleConfig::default(),
        }
    }
}

/// Lifecycle subscriptions on the main session and the task consuming them
struct Lifecycle {
    session: SharedSession,
    subscriptions: Vec<SubscriptionId>,
    task: JoinHandle<()>,
}

impl Lifecycle {
    fn stop(self) {
        for id in self.subscriptions {
            self.session.unsubscribe(id);
        }
        self.task.abort();
    }
}

/// One browser page with settlement, frame addressing and piercing lookup
pub struct SettlingPage {
    config: PageConfig,
    main: Target,
    registry: SessionRegistry,
    engines: Arc<SelectorEngineRegistry>,
    ordinals: RwLock<FrameOrdinals>,
    event_bus: EventBus,

    /// Only set for pages opened with `connect`
    client: Option<Arc<CDPClient>>,
    lifecycle: Mutex<Option<Lifecycle>>,
}

impl SettlingPage {
    pub fn new(
        config: PageConfig,
        main: Target,
        factory: Arc<dyn SessionFactory>,
        engines: Arc<SelectorEngineRegistry>,
    ) -> Arc<Self> {
        Self::build(config, main, factory, engines, None)
    }

    fn build(
        config: PageConfig,
        main: Target,
        factory: Arc<dyn SessionFactory>,
        engines: Arc<SelectorEngineRegistry>,
        client: Option<Arc<CDPClient>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry: SessionRegistry::new(factory, main.clone()),
            main,
            engines,
            ordinals: RwLock::new(FrameOrdinals::new()),
            event_bus: EventBus::new(),
            client,
            lifecycle: Mutex::new(None),
        })
    }

    /// Connect to a browser, pick or open a page, and start it
    pub async fn connect(config: PageConfig, engines: Arc<SelectorEngineRegistry>) -> Result<Arc<Self>> {
        let endpoint = url::Url::parse(&config.cdp_url)
            .map_err(|_| PageError::InvalidEndpoint(config.cdp_url.clone()))?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(PageError::InvalidEndpoint(config.cdp_url.clone()));
        }

        let client = CDPClient::connect(endpoint.as_str()).await?;
        let target_id = match &config.target_id {
            Some(id) => id.clone(),
            None => Self::find_or_create_page(&client).await?,
        };
        tracing::info!("[SettlingPage] {} using target {}", config.id, target_id);

        let factory = Arc::new(CdpSessionFactory::new(client.clone()));
        let page = Self::build(config, Target::page(target_id), factory, engines, Some(client));
        page.start().await?;
        Ok(page)
    }

    async fn find_or_create_page(client: &CDPClient) -> Result<TargetId> {
        let result = client.send_request("Target.getTargets", None, None).await?;
        let targets: Vec<TargetInfo> =
            serde_json::from_value(result["targetInfos"].clone()).map_err(CDPError::from)?;
        if let Some(page) = targets.into_iter().find(|t| t.target_type == "page") {
            return Ok(page.target_id);
        }

        let created = client
            .send_request(
                "Target.createTarget",
                Some(json!({ "url": "about:blank" })),
                None,
            )
            .await?;
        created["targetId"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| CDPError::InvalidResponse(0).into())
    }

    /// Register the selector engine and follow the main session's lifecycle.
    /// Calling it again is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Ok(());
        }

        if self.engines.ensure_initialized(&self.config.selector_engine) {
            tracing::info!(
                "[SettlingPage] Selector engine {:?} registered",
                self.config.selector_engine
            );
        }

        let session = self.registry.acquire_main().await?;
        session.send("Page.enable", None).await?;

        let (tx, mut rx) = mpsc::unbounded_channel::<CDPEvent>();
        let callback: EventCallback = Arc::new(move |event: CDPEvent| {
            let _ = tx.send(event);
        });
        let subscriptions = LIFECYCLE_EVENTS
            .iter()
            .map(|method| session.subscribe(method, callback.clone()))
            .collect();

        let page = Arc::downgrade(self);
        let main_session = session.session_id().to_string();
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(page) = page.upgrade() else {
                    break;
                };
                page.on_lifecycle_event(&main_session, event).await;
            }
        });

        *lifecycle = Some(Lifecycle {
            session,
            subscriptions,
            task,
        });
        tracing::debug!("[SettlingPage] {} started", self.config.id);
        Ok(())
    }

    async fn on_lifecycle_event(&self, main_session: &str, event: CDPEvent) {
        match event.method.as_str() {
            "Page.frameNavigated" => {
                let Some(navigated) = event.parse::<FrameNavigated>() else {
                    return;
                };
                let from_main = event.session_id.as_deref() == Some(main_session);
                if navigated.frame.parent_id.is_none() && from_main {
                    self.ordinals.write().await.reset();
                    let dropped = self.registry.retain_main().await;
                    tracing::info!(
                        "[SettlingPage] Main frame navigated to {} ({} frame session(s) dropped)",
                        navigated.frame.url,
                        dropped
                    );
                    self.event_bus.publish(PageEvent::MainFrameNavigated {
                        url: navigated.frame.url,
                    });
                    self.event_bus.publish(PageEvent::OrdinalsReset);
                }
            }
            "Page.frameDetached" => {
                if let Some(frame) = event.parse::<FrameEvent>() {
                    self.invalidate(&frame.frame_id).await;
                }
            }
            "Target.detachedFromTarget" => {
                if let Some(target_id) = event
                    .parse::<DetachedFromTarget>()
                    .and_then(|detached| detached.target_id)
                {
                    self.invalidate(&target_id).await;
                }
            }
            _ => {}
        }
    }

    async fn invalidate(&self, target_id: &str) {
        if target_id == self.main.id {
            return;
        }
        if self.registry.invalidate(target_id).await {
            self.event_bus.publish(PageEvent::SessionInvalidated {
                target_id: target_id.to_string(),
            });
        }
    }

    /// Unsubscribe, drop all sessions and close the connection if this page owns one
    pub async fn close(&self) -> Result<()> {
        if let Some(lifecycle) = self.lifecycle.lock().await.take() {
            lifecycle.stop();
        }
        self.registry.clear().await;
        if let Some(client) = &self.client {
            client.close().await?;
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn main_target(&self) -> &Target {
        &self.main
    }

    pub fn selector_engine_name(&self) -> &str {
        &self.config.selector_engine
    }

    pub fn events(&self) -> broadcast::Receiver<PageEvent> {
        self.event_bus.subscribe()
    }

    /// Session for `target`, the main target when `None`
    pub async fn session(&self, target: Option<&Target>) -> Result<SharedSession> {
        let target = match target {
            Some(target) if target.id != self.main.id => target,
            _ => return Ok(self.registry.acquire_main().await?),
        };

        let cached = self.registry.contains(&target.id).await;
        let session = self.registry.acquire(target).await?;
        if !cached && self.registry.is_aliased(&target.id).await {
            self.event_bus.publish(PageEvent::SessionAliased {
                frame_id: target.id.clone(),
            });
        }
        Ok(session)
    }

    /// Send a command on the main session
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.send_to(None, method, params).await
    }

    pub async fn send_to(
        &self,
        target: Option<&Target>,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value> {
        let session = self.session(target).await?;
        Ok(session.send(method, params).await?)
    }

    /// `<domain>.enable` on the target's session
    pub async fn enable_domain(&self, domain: &str, target: Option<&Target>) -> Result<()> {
        self.send_to(target, &format!("{domain}.enable"), None).await?;
        Ok(())
    }

    pub async fn disable_domain(&self, domain: &str, target: Option<&Target>) -> Result<()> {
        self.send_to(target, &format!("{domain}.disable"), None).await?;
        Ok(())
    }

    /// Subscribe to `method` on the main session and the sessions attached under it
    pub async fn subscribe(&self, method: &str, callback: EventCallback) -> Result<SubscriptionId> {
        let session = self.registry.acquire_main().await?;
        Ok(session.subscribe(method, callback))
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        let session = self.registry.acquire_main().await?;
        Ok(session.unsubscribe(id))
    }

    /// Wait until the page settles or the guard expires.
    ///
    /// Only obtaining the main session can fail; the wait itself always resolves.
    pub async fn await_settled(&self, timeout: Option<Duration>) -> Result<SettleOutcome> {
        let session = self.registry.acquire_main().await?;
        let outcome = SettleDetector::new(session, self.config.settle.clone())
            .await_settled(timeout)
            .await;
        self.event_bus.publish(PageEvent::Settled {
            reason: outcome.reason,
            pending: outcome.pending,
            elapsed: outcome.elapsed,
        });
        Ok(outcome)
    }

    pub async fn ordinal_for(&self, frame_id: Option<&str>) -> u32 {
        self.ordinals.write().await.ordinal_for(frame_id)
    }

    pub async fn encode(&self, frame_id: Option<&str>, backend_node_id: BackendNodeId) -> ElementAddress {
        self.ordinals.write().await.encode(frame_id, backend_node_id)
    }

    pub async fn reset_ordinals(&self) {
        self.ordinals.write().await.reset();
        self.event_bus.publish(PageEvent::OrdinalsReset);
    }

    /// Frame an ordinal points at; `None` for the main frame
    async fn frame_target(&self, ordinal: u32) -> Result<Option<Target>> {
        let ordinals = self.ordinals.read().await;
        match ordinals.frame_for(ordinal) {
            Some(FrameRef::Main) => Ok(None),
            Some(FrameRef::Frame(frame_id)) => Ok(Some(Target::frame(frame_id))),
            None => Err(PageError::UnknownOrdinal(ordinal)),
        }
    }

    /// Remote object for an address, resolved in its frame's session
    pub async fn resolve_address(&self, address: &ElementAddress) -> Result<Value> {
        let frame = self.frame_target(address.ordinal).await?;
        let result = self
            .send_to(
                frame.as_ref(),
                "DOM.resolveNode",
                Some(json!({ "backendNodeId": address.backend_node_id })),
            )
            .await?;
        Ok(result["object"].clone())
    }

    /// Full DOM of the target's session, shadow roots and iframes included
    pub async fn snapshot(&self, target: Option<&Target>) -> Result<DomArena> {
        let document = self
            .send_to(
                target,
                "DOM.getDocument",
                Some(json!({ "depth": -1, "pierce": true })),
            )
            .await?;

        let mut service = DomService::new();
        service.parse_cdp_dom_tree(&document)?;
        Ok(service.into_arena())
    }

    /// Snapshot plus the node queries for `target` start from.
    ///
    /// A same-process frame shares the main session, so its document is the
    /// content document of its owner element in the main snapshot.
    async fn document(&self, target: Option<&Target>) -> Result<(DomArena, NodeId)> {
        let arena = self.snapshot(target).await?;
        let root = match target {
            Some(frame) if frame.id != self.main.id && self.registry.is_aliased(&frame.id).await => arena
                .frame_document(&frame.id)
                .ok_or_else(|| PageError::FrameNotFound(frame.id.clone()))?,
            _ => arena
                .root_id()
                .ok_or_else(|| DomError::CdpError("Snapshot has no root".to_string()))?,
        };
        Ok((arena, root))
    }

    /// Backend id of the first element matching `selector`, piercing shadow roots
    pub async fn query_selector(
        &self,
        target: Option<&Target>,
        selector: &str,
    ) -> Result<Option<BackendNodeId>> {
        let (arena, root) = self.document(target).await?;
        let query = format!("{}={}", self.config.selector_engine, selector);
        match self.engines.query(&arena, root, &query)? {
            Some(node_id) => Ok(Some(arena.get(node_id)?.backend_node_id)),
            None => Ok(None),
        }
    }

    /// Backend ids of every element matching `selector`, in traversal order
    pub async fn query_selector_all(
        &self,
        target: Option<&Target>,
        selector: &str,
    ) -> Result<Vec<BackendNodeId>> {
        let (arena, root) = self.document(target).await?;
        let query = format!("{}={}", self.config.selector_engine, selector);
        self.engines
            .query_all(&arena, root, &query)?
            .into_iter()
            .map(|node_id| Ok(arena.get(node_id)?.backend_node_id))
            .collect()
    }
}

impl Drop for SettlingPage {
    fn drop(&mut self) {
        if let Some(lifecycle) = self.lifecycle.get_mut().take() {
            lifecycle.stop();
        }
    }
}
