//! Settlement Detector - decides when a page has stopped loading
//!
//! A page is settled once no tracked network request has been in flight for a
//! full quiet window. Long-lived connections (WebSocket, EventSource) are never
//! tracked, stalled requests are evicted by a periodic sweep, and a guard timer
//! bounds the whole wait.
//!
//! ```text
//!            request                    quiet deadline reached
//! Collecting <-------- Quieting{deadline} -------------------> Settled
//!      |  last request done   ^
//!      +----------------------+            guard: * -> Settled
//! ```
//!
//! `SettleTracker` is the pure state machine; `SettleDetector` drives it from
//! protocol events and timers on a single task.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cdp::protocol::{
    FrameEvent, NetworkRequestId, RequestDone, RequestWillBeSent, ResourceType, ResponseReceived,
};
use crate::cdp::{CDPEvent, EventCallback, SharedSession, SubscriptionId};

/// Events the detector listens to on the page session
const SETTLE_EVENTS: [&str; 6] = [
    "Network.requestWillBeSent",
    "Network.loadingFinished",
    "Network.loadingFailed",
    "Network.requestServedFromCache",
    "Network.responseReceived",
    "Page.frameStoppedLoading",
];

/// Stand-in for deadlines too far out to represent as an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Settlement timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    /// Idle time with nothing in flight before the page counts as settled
    pub quiet_window_ms: u64,
    /// Requests open this long are evicted
    pub stall_threshold_ms: u64,
    pub sweep_interval_ms: u64,
    /// Default guard when `await_settled` gets no explicit timeout
    pub timeout_ms: u64,
    /// URLs are cut to this many characters in logs
    pub url_log_limit: usize,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            quiet_window_ms: 500,
            stall_threshold_ms: 2_000,
            sweep_interval_ms: 500,
            timeout_ms: 30_000,
            url_log_limit: 120,
        }
    }
}

impl SettleConfig {
    pub fn quiet_window(&self) -> Duration {
        Duration::from_millis(self.quiet_window_ms)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_threshold_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlePhase {
    /// Requests in flight, no quiet timer
    Collecting,
    /// Nothing in flight; settles at `deadline` unless a request arrives
    Quieting { deadline: Instant },
    Settled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettleReason {
    /// Quiet window elapsed
    Quiet,
    /// Guard fired first
    Timeout,
}

/// How a settlement wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettleOutcome {
    pub reason: SettleReason,
    /// Requests still in flight at resolution
    pub pending: usize,
    /// Requests dropped by the stall sweep
    pub evicted: usize,
    pub elapsed: Duration,
}

impl SettleOutcome {
    pub fn is_quiet(&self) -> bool {
        self.reason == SettleReason::Quiet
    }
}

#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub url: String,
    pub resource_type: Option<ResourceType>,
    pub started: Instant,
}

/// Decoded protocol events that move the state machine
#[derive(Debug, Clone)]
pub enum SettleEvent {
    Requested(RequestWillBeSent),
    Done(NetworkRequestId),
    Responded(ResponseReceived),
    FrameStoppedLoading(String),
}

impl SettleEvent {
    pub fn decode(event: &CDPEvent) -> Option<Self> {
        match event.method.as_str() {
            "Network.requestWillBeSent" => event.parse().map(SettleEvent::Requested),
            "Network.loadingFinished"
            | "Network.loadingFailed"
            | "Network.requestServedFromCache" => event
                .parse::<RequestDone>()
                .map(|done| SettleEvent::Done(done.request_id)),
            "Network.responseReceived" => event.parse().map(SettleEvent::Responded),
            "Page.frameStoppedLoading" => event
                .parse::<FrameEvent>()
                .map(|frame| SettleEvent::FrameStoppedLoading(frame.frame_id)),
            _ => None,
        }
    }
}

/// In-flight bookkeeping and phase transitions, no I/O and no timers
pub struct SettleTracker {
    quiet_window: Duration,
    stall_threshold: Duration,
    phase: SettlePhase,
    inflight: HashMap<NetworkRequestId, PendingRequest>,
    /// frame id -> its current document request
    frame_documents: HashMap<String, NetworkRequestId>,
}

impl SettleTracker {
    pub fn new(config: &SettleConfig) -> Self {
        Self {
            quiet_window: config.quiet_window(),
            stall_threshold: config.stall_threshold(),
            phase: SettlePhase::Collecting,
            inflight: HashMap::new(),
            frame_documents: HashMap::new(),
        }
    }

    pub fn phase(&self) -> SettlePhase {
        self.phase
    }

    pub fn pending(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_settled(&self) -> bool {
        self.phase == SettlePhase::Settled
    }

    pub fn quiet_deadline(&self) -> Option<Instant> {
        match self.phase {
            SettlePhase::Quieting { deadline } => Some(deadline),
            _ => None,
        }
    }

    pub fn apply(&mut self, event: SettleEvent, now: Instant) {
        match event {
            SettleEvent::Requested(request) => self.on_request(request, now),
            SettleEvent::Done(request_id) => {
                self.finish(&request_id, now);
            }
            SettleEvent::Responded(response) => self.on_response(response, now),
            SettleEvent::FrameStoppedLoading(frame_id) => {
                self.on_frame_stopped_loading(&frame_id, now);
            }
        }
    }

    pub fn on_request(&mut self, request: RequestWillBeSent, now: Instant) {
        if self.is_settled() {
            return;
        }
        if request.resource_type.map_or(false, ResourceType::is_long_lived) {
            tracing::debug!("[SettleDetector] Ignoring long-lived {}", request.request.url);
            return;
        }

        if request.resource_type == Some(ResourceType::Document) {
            if let Some(frame_id) = request.frame_id {
                self.frame_documents.insert(frame_id, request.request_id.clone());
            }
        }
        self.inflight.insert(
            request.request_id,
            PendingRequest {
                url: request.request.url,
                resource_type: request.resource_type,
                started: now,
            },
        );
        self.phase = SettlePhase::Collecting;
    }

    /// Drop a request however it ended. Unknown ids are ignored.
    pub fn finish(&mut self, request_id: &str, now: Instant) -> Option<PendingRequest> {
        let done = self.inflight.remove(request_id);
        self.frame_documents.retain(|_, id| id.as_str() != request_id);
        if let Some(request) = &done {
            tracing::debug!(
                "[SettleDetector] Done in {:?}: {}",
                now.saturating_duration_since(request.started),
                request.url
            );
        }
        self.arm_if_idle(now);
        done
    }

    /// Some responses never get a loading-finished event; `data:` is one of them
    pub fn on_response(&mut self, response: ResponseReceived, now: Instant) {
        if response.response.url.starts_with("data:") {
            self.finish(&response.request_id, now);
        }
    }

    /// Force-complete the document request of a frame that stopped loading
    pub fn on_frame_stopped_loading(&mut self, frame_id: &str, now: Instant) -> bool {
        match self.frame_documents.remove(frame_id) {
            Some(request_id) => {
                self.finish(&request_id, now);
                true
            }
            None => false,
        }
    }

    /// Evict requests open at least the stall threshold, then re-arm
    pub fn sweep(&mut self, now: Instant) -> Vec<PendingRequest> {
        let threshold = self.stall_threshold;
        let stalled: Vec<NetworkRequestId> = self
            .inflight
            .iter()
            .filter(|(_, request)| now.saturating_duration_since(request.started) >= threshold)
            .map(|(id, _)| id.clone())
            .collect();

        let mut evicted = Vec::with_capacity(stalled.len());
        for id in stalled {
            if let Some(request) = self.inflight.remove(&id) {
                evicted.push(request);
            }
            self.frame_documents.retain(|_, doc| *doc != id);
        }
        self.arm_if_idle(now);
        evicted
    }

    /// Start the quiet window if nothing is in flight and none is running
    pub fn arm_if_idle(&mut self, now: Instant) {
        if self.phase == SettlePhase::Collecting && self.inflight.is_empty() {
            self.phase = SettlePhase::Quieting {
                deadline: deadline_after(now, self.quiet_window),
            };
        }
    }

    /// Settle if the quiet deadline has passed. True only on the transition.
    pub fn poll_quiet(&mut self, now: Instant) -> bool {
        match self.phase {
            SettlePhase::Quieting { deadline } if now >= deadline => {
                self.phase = SettlePhase::Settled;
                true
            }
            _ => false,
        }
    }

    /// Guard expiry. True only on the transition.
    pub fn force_settle(&mut self) -> bool {
        if self.is_settled() {
            return false;
        }
        self.phase = SettlePhase::Settled;
        true
    }
}

/// Cut `url` to at most `limit` characters
pub(crate) fn truncate_url(url: &str, limit: usize) -> &str {
    match url.char_indices().nth(limit) {
        Some((idx, _)) => &url[..idx],
        None => url,
    }
}

/// `start + after`, saturating at a far-future instant instead of overflowing
pub(crate) fn deadline_after(start: Instant, after: Duration) -> Instant {
    start
        .checked_add(after)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

/// Waits for one page session to settle
pub struct SettleDetector {
    session: SharedSession,
    config: SettleConfig,
}

impl SettleDetector {
    pub fn new(session: SharedSession, config: SettleConfig) -> Self {
        Self { session, config }
    }

    /// Resolve once the page is quiet or `timeout` (default from config) elapses.
    ///
    /// Never fails: enable errors are logged and settlement proceeds on
    /// whatever events still arrive.
    pub async fn await_settled(&self, timeout: Option<Duration>) -> SettleOutcome {
        let started = Instant::now();
        let guard = deadline_after(started, timeout.unwrap_or_else(|| self.config.timeout()));

        let (tx, mut rx) = mpsc::unbounded_channel::<SettleEvent>();
        let callback: EventCallback = std::sync::Arc::new(move |event: CDPEvent| {
            if let Some(decoded) = SettleEvent::decode(&event) {
                let _ = tx.send(decoded);
            }
        });
        let subscriptions: Vec<SubscriptionId> = SETTLE_EVENTS
            .iter()
            .map(|method| self.session.subscribe(method, callback.clone()))
            .collect();
        drop(callback);

        let mut tracker = SettleTracker::new(&self.config);
        let mut evicted = 0;

        let reason = if tokio::time::timeout_at(guard, self.enable_domains())
            .await
            .is_err()
        {
            tracing::warn!("[SettleDetector] Guard expired while enabling domains");
            tracker.force_settle();
            SettleReason::Timeout
        } else {
            tracker.arm_if_idle(Instant::now());

            let sweep_every = self.config.sweep_interval();
            let mut sweep =
                tokio::time::interval_at(deadline_after(Instant::now(), sweep_every), sweep_every);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let quiet = tracker.quiet_deadline();

                tokio::select! {
                    biased;

                    _ = tokio::time::sleep_until(guard) => {
                        if tracker.force_settle() {
                            break SettleReason::Timeout;
                        }
                    }

                    Some(event) = rx.recv() => {
                        tracker.apply(event, Instant::now());
                    }

                    _ = sweep.tick() => {
                        for request in tracker.sweep(Instant::now()) {
                            evicted += 1;
                            tracing::warn!(
                                "[SettleDetector] Evicting stalled request after {:?}: {}",
                                request.started.elapsed(),
                                truncate_url(&request.url, self.config.url_log_limit)
                            );
                        }
                    }

                    _ = tokio::time::sleep_until(quiet.unwrap_or(guard)), if quiet.is_some() => {
                        if tracker.poll_quiet(Instant::now()) {
                            break SettleReason::Quiet;
                        }
                    }
                }
            }
        };

        for id in subscriptions {
            self.session.unsubscribe(id);
        }

        let outcome = SettleOutcome {
            reason,
            pending: tracker.pending(),
            evicted,
            elapsed: started.elapsed(),
        };
        match outcome.reason {
            SettleReason::Quiet => tracing::debug!(
                "[SettleDetector] Settled after {:?} ({} evicted)",
                outcome.elapsed,
                outcome.evicted
            ),
            SettleReason::Timeout if outcome.pending > 0 => tracing::warn!(
                "[SettleDetector] Timed out after {:?} with {} request(s) outstanding",
                outcome.elapsed,
                outcome.pending
            ),
            SettleReason::Timeout => {
                tracing::warn!("[SettleDetector] Timed out after {:?}", outcome.elapsed)
            }
        }
        outcome
    }

    async fn enable_domains(&self) {
        let auto_attach = serde_json::json!({
            "autoAttach": true,
            "waitForDebuggerOnStart": false,
            "flatten": true,
            "filter": [
                { "type": "worker", "exclude": true },
                { "type": "shared_worker", "exclude": true },
            ],
        });

        let commands = [
            ("Network.enable", None),
            ("Page.enable", None),
            ("Target.setAutoAttach", Some(auto_attach)),
        ];
        for (method, params) in commands {
            if let Err(e) = self.session.send(method, params).await {
                tracing::warn!("[SettleDetector] {} failed, continuing: {}", method, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSession;
    use serde_json::json;
    use std::sync::Arc;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn request(id: &str, resource_type: ResourceType, frame_id: Option<&str>) -> RequestWillBeSent {
        RequestWillBeSent {
            request_id: id.to_string(),
            request: crate::cdp::protocol::RequestInfo {
                url: format!("https://example.com/{id}"),
                method: "GET".into(),
            },
            resource_type: Some(resource_type),
            frame_id: frame_id.map(String::from),
        }
    }

    fn spawn_detector(
        session: &Arc<MockSession>,
        timeout: Option<Duration>,
    ) -> tokio::task::JoinHandle<SettleOutcome> {
        let detector = SettleDetector::new(session.clone(), SettleConfig::default());
        tokio::spawn(async move { detector.await_settled(timeout).await })
    }

    /// Let the detector subscribe and enable its domains before scripting events
    async fn wait_started(session: &MockSession) {
        for _ in 0..100 {
            if session
                .sent_methods()
                .iter()
                .any(|m| m == "Target.setAutoAttach")
            {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("detector never enabled its domains");
    }

    #[test]
    fn test_tracker_phases() {
        let t0 = Instant::now();
        let mut tracker = SettleTracker::new(&SettleConfig::default());
        assert_eq!(tracker.phase(), SettlePhase::Collecting);

        tracker.on_request(request("1", ResourceType::Script, None), t0);
        tracker.arm_if_idle(t0);
        assert_eq!(tracker.phase(), SettlePhase::Collecting);

        tracker.finish("1", t0 + ms(100));
        assert_eq!(tracker.quiet_deadline(), Some(t0 + ms(600)));
        assert!(!tracker.poll_quiet(t0 + ms(599)));

        // new activity cancels the window
        tracker.on_request(request("2", ResourceType::Xhr, None), t0 + ms(300));
        assert_eq!(tracker.phase(), SettlePhase::Collecting);
        assert!(!tracker.poll_quiet(t0 + ms(700)));

        tracker.finish("2", t0 + ms(400));
        assert!(tracker.poll_quiet(t0 + ms(900)));
        assert!(tracker.is_settled());

        // only the first completion counts
        assert!(!tracker.poll_quiet(t0 + ms(2000)));
        assert!(!tracker.force_settle());
    }

    #[test]
    fn test_tracker_unknown_finish_is_noop() {
        let t0 = Instant::now();
        let mut tracker = SettleTracker::new(&SettleConfig::default());
        tracker.on_request(request("1", ResourceType::Image, None), t0);

        assert!(tracker.finish("missing", t0).is_none());
        assert_eq!(tracker.pending(), 1);
        assert_eq!(tracker.phase(), SettlePhase::Collecting);
    }

    #[test]
    fn test_tracker_ignores_long_lived() {
        let t0 = Instant::now();
        let mut tracker = SettleTracker::new(&SettleConfig::default());
        tracker.on_request(request("ws", ResourceType::WebSocket, None), t0);
        tracker.on_request(request("sse", ResourceType::EventSource, None), t0);
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_tracker_sweep_evicts_only_stalled() {
        let t0 = Instant::now();
        let mut tracker = SettleTracker::new(&SettleConfig::default());
        tracker.on_request(request("doc", ResourceType::Document, Some("F")), t0);
        tracker.on_request(request("img", ResourceType::Image, None), t0 + ms(1000));

        assert!(tracker.sweep(t0 + ms(1999)).is_empty());

        let evicted = tracker.sweep(t0 + ms(2000));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].url, "https://example.com/doc");
        assert_eq!(tracker.pending(), 1);
        // the frame no longer points at the evicted document
        assert!(!tracker.on_frame_stopped_loading("F", t0 + ms(2000)));

        tracker.sweep(t0 + ms(3000));
        assert_eq!(tracker.quiet_deadline(), Some(t0 + ms(3500)));
    }

    #[test]
    fn test_tracker_frame_document_replaced() {
        let t0 = Instant::now();
        let mut tracker = SettleTracker::new(&SettleConfig::default());
        tracker.on_request(request("a", ResourceType::Document, Some("F")), t0);
        tracker.on_request(request("b", ResourceType::Document, Some("F")), t0);

        assert!(tracker.on_frame_stopped_loading("F", t0));
        // "a" was superseded in the frame map and stays in flight
        assert_eq!(tracker.pending(), 1);
        assert!(!tracker.on_frame_stopped_loading("F", t0));
    }

    #[test]
    fn test_decode() {
        let event = CDPEvent {
            method: "Network.requestServedFromCache".into(),
            params: Some(json!({ "requestId": "7" })),
            session_id: None,
        };
        assert!(matches!(SettleEvent::decode(&event), Some(SettleEvent::Done(id)) if id == "7"));

        let other = CDPEvent {
            method: "Page.loadEventFired".into(),
            params: Some(json!({ "timestamp": 1.0 })),
            session_id: None,
        };
        assert!(SettleEvent::decode(&other).is_none());
    }

    #[test]
    fn test_truncate_url() {
        assert_eq!(truncate_url("https://a.b/", 120), "https://a.b/");
        assert_eq!(truncate_url("abcdef", 3), "abc");
        assert_eq!(truncate_url("ééé", 2), "éé");
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: SettleConfig = serde_json::from_value(json!({ "timeout_ms": 5000 })).unwrap();
        assert_eq!(config.timeout(), ms(5000));
        assert_eq!(config.quiet_window(), ms(500));
        assert_eq!(config.stall_threshold(), ms(2000));
        assert_eq!(config.sweep_interval(), ms(500));
        assert_eq!(config.url_log_limit, 120);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settles_one_quiet_window_after_last_request() {
        let session = MockSession::new("PAGE");
        let handle = spawn_detector(&session, None);
        wait_started(&session).await;

        session.request("1", "Script", None);
        tokio::time::sleep(ms(200)).await;
        session.finish("1");

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.reason, SettleReason::Quiet);
        assert_eq!(outcome.elapsed, ms(700));
        assert_eq!(outcome.pending, 0);
        assert_eq!(session.subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_page_settles_after_quiet_window() {
        let session = MockSession::new("PAGE");
        let outcome = spawn_detector(&session, None).await.unwrap();

        assert!(outcome.is_quiet());
        assert_eq!(outcome.elapsed, ms(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_lived_connections_do_not_block() {
        let session = MockSession::new("PAGE");
        let handle = spawn_detector(&session, None);
        wait_started(&session).await;

        session.request("ws", "WebSocket", None);
        session.request("sse", "EventSource", None);

        let outcome = handle.await.unwrap();
        assert!(outcome.is_quiet());
        assert_eq!(outcome.elapsed, ms(500));
        assert_eq!(outcome.pending, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_document_is_evicted() {
        let session = MockSession::new("PAGE");
        let handle = spawn_detector(&session, None);
        wait_started(&session).await;

        session.request("doc", "Document", Some("F1"));

        let outcome = handle.await.unwrap();
        assert!(outcome.is_quiet());
        assert_eq!(outcome.evicted, 1);
        assert!(outcome.elapsed >= ms(2000) && outcome.elapsed <= ms(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_stopped_loading_completes_document() {
        let session = MockSession::new("PAGE");
        let handle = spawn_detector(&session, None);
        wait_started(&session).await;

        session.request("doc", "Document", Some("F1"));
        tokio::time::sleep(ms(100)).await;
        session.emit("Page.frameStoppedLoading", json!({ "frameId": "F1" }));

        let outcome = handle.await.unwrap();
        assert!(outcome.is_quiet());
        assert_eq!(outcome.elapsed, ms(600));
        assert_eq!(outcome.evicted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_url_response_completes_request() {
        let session = MockSession::new("PAGE");
        let handle = spawn_detector(&session, None);
        wait_started(&session).await;

        session.request("img", "Image", None);
        tokio::time::sleep(ms(100)).await;
        session.emit(
            "Network.responseReceived",
            json!({ "requestId": "img", "response": { "url": "data:image/png;base64,AAAA" } }),
        );

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.elapsed, ms(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_session_traffic_counts() {
        let session = MockSession::new("PAGE");
        let handle = spawn_detector(&session, None);
        wait_started(&session).await;

        session.emit(
            "Target.attachedToTarget",
            json!({
                "sessionId": "OOPIF",
                "targetInfo": { "targetId": "F2", "type": "iframe" },
                "waitingForDebugger": false
            }),
        );
        session.emit_from(
            "OOPIF",
            "Network.requestWillBeSent",
            json!({ "requestId": "sub", "request": { "url": "https://ads.example/" }, "type": "Script" }),
        );
        tokio::time::sleep(ms(300)).await;
        session.emit_from("OOPIF", "Network.loadingFailed", json!({ "requestId": "sub" }));

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.elapsed, ms(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_fires_under_endless_traffic() {
        let session = MockSession::new("PAGE");
        let handle = spawn_detector(&session, Some(ms(1000)));
        wait_started(&session).await;

        let traffic = {
            let session = session.clone();
            tokio::spawn(async move {
                for i in 0..30 {
                    session.request(&format!("poll-{i}"), "XHR", None);
                    tokio::time::sleep(ms(100)).await;
                }
            })
        };

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.reason, SettleReason::Timeout);
        assert_eq!(outcome.elapsed, ms(1000));
        assert!(outcome.pending >= 10);
        assert_eq!(outcome.evicted, 0);
        assert_eq!(session.subscriptions(), 0);
        traffic.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_failure_is_tolerated() {
        let session = MockSession::new("PAGE");
        session.fail_on("Network.enable");
        session.fail_on("Target.setAutoAttach");

        let outcome = spawn_detector(&session, None).await.unwrap();
        assert!(outcome.is_quiet());
        assert_eq!(
            session.sent_methods(),
            vec!["Network.enable", "Page.enable", "Target.setAutoAttach"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_bounds_unresponsive_enable() {
        let session = MockSession::new("PAGE");
        for method in ["Network.enable", "Page.enable", "Target.setAutoAttach"] {
            session.stall_on(method, Duration::from_secs(30));
        }

        let outcome = spawn_detector(&session, Some(ms(1000))).await.unwrap();
        assert_eq!(outcome.reason, SettleReason::Timeout);
        assert_eq!(outcome.elapsed, ms(1000));
        assert_eq!(session.sent_methods(), vec!["Network.enable"]);
        assert_eq!(session.subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_enable_delays_quiet_window() {
        let session = MockSession::new("PAGE");
        session.stall_on("Network.enable", ms(200));

        let outcome = spawn_detector(&session, Some(ms(1000))).await.unwrap();
        assert!(outcome.is_quiet());
        assert_eq!(outcome.elapsed, ms(700));
    }

    #[test]
    fn test_deadline_after_saturates() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, ms(500)), now + ms(500));
        assert!(deadline_after(now, Duration::MAX) >= now + FAR_FUTURE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_settles_quietly() {
        let session = MockSession::new("PAGE");
        let outcome = spawn_detector(&session, Some(Duration::MAX)).await.unwrap();
        assert!(outcome.is_quiet());
        assert_eq!(outcome.elapsed, ms(500));

        let config = SettleConfig {
            timeout_ms: u64::MAX,
            ..SettleConfig::default()
        };
        let outcome = SettleDetector::new(session.clone(), config)
            .await_settled(None)
            .await;
        assert!(outcome.is_quiet());
        assert_eq!(outcome.elapsed, ms(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_attach_excludes_workers() {
        let session = MockSession::new("PAGE");
        spawn_detector(&session, None).await.unwrap();

        let params = session.last_params("Target.setAutoAttach").unwrap();
        assert_eq!(params["autoAttach"], json!(true));
        assert_eq!(params["waitForDebuggerOnStart"], json!(false));
        assert_eq!(params["flatten"], json!(true));
        assert_eq!(
            params["filter"],
            json!([
                { "type": "worker", "exclude": true },
                { "type": "shared_worker", "exclude": true }
            ])
        );
    }
}
