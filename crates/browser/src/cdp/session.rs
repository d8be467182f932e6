//! CDP Session - Represents a connection to a specific browser target
//!
//! Design: Lightweight wrapper around CDPClient with target-specific context.
//! All sessions share the same WebSocket - no per-session connection overhead.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::client::{CDPClient, EventCallback, Result, SubscriptionId};
use super::protocol::{AttachToTargetResult, SessionId, TargetId, TargetInfo};

/// A live protocol channel bound to one target
///
/// Everything above the transport (registry, settlement, page façade) talks to
/// sessions through this trait only.
#[async_trait]
pub trait ProtocolSession: Send + Sync {
    /// Session ID assigned by the browser
    fn session_id(&self) -> &str;

    /// Send command within this session's context
    async fn send(&self, method: &str, params: Option<Value>) -> Result<Value>;

    /// Receive `method` events from this session and sessions auto-attached beneath it
    fn subscribe(&self, method: &str, callback: EventCallback) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Sessions are shared between the registry and everyone using them
pub type SharedSession = Arc<dyn ProtocolSession>;

/// CDP Session bound to a specific target
#[derive(Clone)]
pub struct CDPSession {
    /// Shared CDP client
    client: Arc<CDPClient>,

    /// Target this session is attached to
    pub target_id: TargetId,

    /// Session ID assigned by Chrome
    pub session_id: SessionId,

    /// Cached target info
    pub title: String,
    pub url: String,
}

impl CDPSession {
    /// Attach to a target and create session
    ///
    /// No domains are enabled here; callers enable what they consume.
    pub async fn attach(client: Arc<CDPClient>, target_id: TargetId) -> Result<Self> {
        let result = client
            .send_request(
                "Target.attachToTarget",
                Some(json!({
                    "targetId": target_id,
                    "flatten": true,
                })),
                None,
            )
            .await?;

        let attach_result: AttachToTargetResult = serde_json::from_value(result)?;
        let session_id = attach_result.session_id;

        let info_result = client
            .send_request(
                "Target.getTargetInfo",
                Some(json!({ "targetId": &target_id })),
                None,
            )
            .await?;

        let target_info: TargetInfo = serde_json::from_value(info_result["targetInfo"].clone())?;

        tracing::debug!(
            "Attached to {} target {} as session {}",
            target_info.target_type,
            target_id,
            session_id
        );

        Ok(Self {
            client,
            target_id,
            session_id,
            title: target_info.title,
            url: target_info.url,
        })
    }
}

#[async_trait]
impl ProtocolSession for CDPSession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn send(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.client
            .send_request(method, params, Some(self.session_id.clone()))
            .await
    }

    fn subscribe(&self, method: &str, callback: EventCallback) -> SubscriptionId {
        self.client
            .router()
            .subscribe(method, Some(self.session_id.clone()), callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.client.unsubscribe(id)
    }
}
