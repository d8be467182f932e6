//! In-memory sessions for unit tests; no browser required

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cdp::protocol::TargetId;
use crate::cdp::{CDPError, CDPEvent, EventCallback, EventRouter, ProtocolSession, Result};
use crate::cdp::{SharedSession, SubscriptionId};
use crate::registry::{SessionFactory, Target};

/// Records commands and replays scripted events through a real `EventRouter`
pub(crate) struct MockSession {
    id: String,
    router: EventRouter,
    sent: Mutex<Vec<(String, Option<Value>)>>,
    responses: Mutex<HashMap<String, Value>>,
    failing: Mutex<HashSet<String>>,
    stalled: Mutex<HashMap<String, Duration>>,
}

impl MockSession {
    pub(crate) fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            router: EventRouter::new(),
            sent: Mutex::new(Vec::new()),
            responses: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            stalled: Mutex::new(HashMap::new()),
        })
    }

    /// Deliver an event as if it came from this session
    pub(crate) fn emit(&self, method: &str, params: Value) {
        self.emit_from(&self.id, method, params);
    }

    pub(crate) fn emit_from(&self, session_id: &str, method: &str, params: Value) {
        self.router.dispatch(&CDPEvent {
            method: method.to_string(),
            params: Some(params),
            session_id: Some(session_id.to_string()),
        });
    }

    pub(crate) fn request(&self, request_id: &str, resource_type: &str, frame_id: Option<&str>) {
        let mut params = json!({
            "requestId": request_id,
            "request": { "url": format!("https://example.com/{request_id}"), "method": "GET" },
            "type": resource_type,
        });
        if let Some(frame_id) = frame_id {
            params["frameId"] = json!(frame_id);
        }
        self.emit("Network.requestWillBeSent", params);
    }

    pub(crate) fn finish(&self, request_id: &str) {
        self.emit("Network.loadingFinished", json!({ "requestId": request_id }));
    }

    pub(crate) fn respond_with(&self, method: &str, result: Value) {
        self.responses.lock().unwrap().insert(method.to_string(), result);
    }

    pub(crate) fn fail_on(&self, method: &str) {
        self.failing.lock().unwrap().insert(method.to_string());
    }

    /// Hold `method` for `delay`, then time it out like an unresponsive browser
    pub(crate) fn stall_on(&self, method: &str, delay: Duration) {
        self.stalled.lock().unwrap().insert(method.to_string(), delay);
    }

    pub(crate) fn sent_methods(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    /// Params of the last `method` command sent
    pub(crate) fn last_params(&self, method: &str) -> Option<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(m, _)| m == method)
            .and_then(|(_, p)| p.clone())
    }

    pub(crate) fn subscriptions(&self) -> usize {
        self.router.total_subscribers()
    }
}

#[async_trait]
impl ProtocolSession for MockSession {
    fn session_id(&self) -> &str {
        &self.id
    }

    async fn send(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.sent.lock().unwrap().push((method.to_string(), params));
        let stall = self.stalled.lock().unwrap().get(method).copied();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
            return Err(CDPError::Timeout);
        }
        if self.failing.lock().unwrap().contains(method) {
            return Err(CDPError::Protocol {
                code: -32601,
                message: format!("'{method}' wasn't found"),
            });
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(method)
            .cloned()
            .unwrap_or_else(|| json!({})))
    }

    fn subscribe(&self, method: &str, callback: EventCallback) -> SubscriptionId {
        self.router.subscribe(method, Some(self.id.clone()), callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.router.unsubscribe(id)
    }
}

/// Hands out `MockSession`s and can refuse specific targets
#[derive(Default)]
pub(crate) struct MockFactory {
    sessions: Mutex<HashMap<TargetId, Arc<MockSession>>>,
    same_process: HashSet<TargetId>,
    broken: HashSet<TargetId>,
    attempts: Mutex<Vec<TargetId>>,
}

impl MockFactory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Frames the engine refuses a dedicated session for
    pub(crate) fn same_process(mut self, target_id: &str) -> Self {
        self.same_process.insert(target_id.to_string());
        self
    }

    /// Targets whose creation fails outright
    pub(crate) fn broken(mut self, target_id: &str) -> Self {
        self.broken.insert(target_id.to_string());
        self
    }

    pub(crate) fn attempts(&self, target_id: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.as_str() == target_id)
            .count()
    }

    pub(crate) fn session(&self, target_id: &str) -> Option<Arc<MockSession>> {
        self.sessions.lock().unwrap().get(target_id).cloned()
    }
}

#[async_trait]
impl SessionFactory for MockFactory {
    async fn create_session(&self, target: &Target) -> Result<SharedSession> {
        self.attempts.lock().unwrap().push(target.id.clone());

        if self.same_process.contains(&target.id) {
            return Err(CDPError::SessionUnsupported(target.id.clone()));
        }
        if self.broken.contains(&target.id) {
            return Err(CDPError::Protocol {
                code: -32000,
                message: "Target closed".into(),
            });
        }

        let session = MockSession::new(&format!("session-{}", target.id));
        self.sessions
            .lock()
            .unwrap()
            .insert(target.id.clone(), session.clone());
        Ok(session)
    }
}
