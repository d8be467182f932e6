//! Session Registry - one protocol session per navigation target
//!
//! Out-of-process iframes get their own session. Same-process iframes cannot:
//! the engine refuses, and the registry answers with the main target's session
//! instead, remembering the alias so the refused path is never retried.
//!
//! ```text
//! acquire(frame F)
//!   cached?                  -> cached session
//!   factory.create(F) ok     -> cache[F] = new
//!   factory.create(F) refuse -> cache[F] = acquire(main)   (alias)
//!   factory.create(F) error  -> Err (unchanged)
//! ```
//!
//! Entries are purged explicitly (`invalidate`, `retain_main`, `clear`) when a
//! target's lifecycle ends; nothing is evicted behind the caller's back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::cdp::protocol::TargetId;
use crate::cdp::{CDPClient, CDPError, CDPSession, Result, SharedSession};

/// Chrome's attach error for a frame id that is not a target of its own
const NO_SUCH_TARGET_MESSAGE: &str = "No target with given id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    /// Top-level page
    Page,
    /// Subframe, possibly out-of-process
    Frame,
}

/// A navigable browsing context
///
/// For out-of-process frames the CDP target id equals the frame id, so `id` is
/// also the frame id for `Frame` targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub kind: TargetKind,
}

impl Target {
    pub fn page(id: impl Into<TargetId>) -> Self {
        Self {
            id: id.into(),
            kind: TargetKind::Page,
        }
    }

    pub fn frame(frame_id: impl Into<TargetId>) -> Self {
        Self {
            id: frame_id.into(),
            kind: TargetKind::Frame,
        }
    }
}

/// Where new sessions come from
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a dedicated session for `target`.
    ///
    /// Must fail with an error whose `is_session_unsupported()` is true when the
    /// engine cannot give the target a session of its own.
    async fn create_session(&self, target: &Target) -> Result<SharedSession>;
}

/// Creates sessions with `Target.attachToTarget` on a live browser
pub struct CdpSessionFactory {
    client: Arc<CDPClient>,
}

impl CdpSessionFactory {
    pub fn new(client: Arc<CDPClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SessionFactory for CdpSessionFactory {
    async fn create_session(&self, target: &Target) -> Result<SharedSession> {
        match CDPSession::attach(self.client.clone(), target.id.clone()).await {
            Ok(session) => Ok(Arc::new(session)),
            // A same-process frame has a frame id but no target behind it
            Err(CDPError::Protocol { message, .. })
                if target.kind == TargetKind::Frame && message.contains(NO_SUCH_TARGET_MESSAGE) =>
            {
                Err(CDPError::SessionUnsupported(target.id.clone()))
            }
            Err(e) => Err(e),
        }
    }
}

/// Cache of target → session with same-process fallback
pub struct SessionRegistry {
    factory: Arc<dyn SessionFactory>,
    main: Target,

    /// Held across creation so one target never gets two sessions
    sessions: Mutex<HashMap<TargetId, SharedSession>>,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn SessionFactory>, main: Target) -> Self {
        Self {
            factory,
            main,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn main_target(&self) -> &Target {
        &self.main
    }

    /// Session for `target`, creating (or aliasing) it on first use
    pub async fn acquire(&self, target: &Target) -> Result<SharedSession> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&target.id) {
            return Ok(session.clone());
        }

        match self.factory.create_session(target).await {
            Ok(session) => {
                tracing::debug!("[SessionRegistry] New session for {}", target.id);
                sessions.insert(target.id.clone(), session.clone());
                Ok(session)
            }
            Err(e) if e.is_session_unsupported() && target.id != self.main.id => {
                let main = self.main_locked(&mut sessions).await?;
                tracing::debug!(
                    "[SessionRegistry] {} shares the main target's session ({})",
                    target.id,
                    e
                );
                sessions.insert(target.id.clone(), main.clone());
                Ok(main)
            }
            Err(e) => Err(e),
        }
    }

    /// Session for the main target
    pub async fn acquire_main(&self) -> Result<SharedSession> {
        let mut sessions = self.sessions.lock().await;
        self.main_locked(&mut sessions).await
    }

    async fn main_locked(&self, sessions: &mut HashMap<TargetId, SharedSession>) -> Result<SharedSession> {
        if let Some(session) = sessions.get(&self.main.id) {
            return Ok(session.clone());
        }
        let session = self.factory.create_session(&self.main).await?;
        sessions.insert(self.main.id.clone(), session.clone());
        Ok(session)
    }

    /// True if `target_id` is served by the main target's session without being it
    pub async fn is_aliased(&self, target_id: &str) -> bool {
        let sessions = self.sessions.lock().await;
        if target_id == self.main.id {
            return false;
        }
        match (sessions.get(target_id), sessions.get(&self.main.id)) {
            (Some(session), Some(main)) => Arc::ptr_eq(session, main),
            _ => false,
        }
    }

    /// Forget the entry for `target_id`. Returns true if there was one.
    pub async fn invalidate(&self, target_id: &str) -> bool {
        let removed = self.sessions.lock().await.remove(target_id).is_some();
        if removed {
            tracing::debug!("[SessionRegistry] Invalidated {}", target_id);
        }
        removed
    }

    /// Drop every entry except the main target's; used after main-frame navigation
    pub async fn retain_main(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|id, _| *id == self.main.id);
        before - sessions.len()
    }

    pub async fn clear(&self) {
        self.sessions.lock().await.clear();
    }

    pub async fn contains(&self, target_id: &str) -> bool {
        self.sessions.lock().await.contains_key(target_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
