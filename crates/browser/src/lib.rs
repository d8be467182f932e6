//! Page settlement and frame addressing over the Chrome DevTools Protocol
//!
//! Answers three questions automation code asks before touching a page:
//!
//! 1. **Is it done loading?** `SettleDetector` watches network traffic on the
//!    page and its auto-attached frames and resolves after a quiet window.
//! 2. **Which session talks to this frame?** `SessionRegistry` keeps one
//!    session per target and falls back to the page's own session for
//!    same-process frames.
//! 3. **How do I name this node later?** Frame ordinals plus backend node ids
//!    give compact addresses; the piercing selector engine finds elements
//!    inside open and closed shadow roots.
//!
//! # Architecture
//!
//! ```text
//! SettlingPage ──> SessionRegistry ──> SessionFactory ──> CDPSession ──> CDPClient (1 WebSocket)
//!      │                                                      ↑
//!      ├──> SettleDetector ───── ProtocolSession (trait) ─────┘
//!      └──> frame_dom: FrameOrdinals, DomService, SelectorEngineRegistry
//! ```

pub mod cdp;
pub mod events;
pub mod page;
pub mod registry;
pub mod settle;

#[cfg(test)]
pub(crate) mod testing;

pub use cdp::{CDPClient, CDPError, CDPSession, ProtocolSession, SharedSession};
pub use events::{EventBus, PageEvent};
pub use page::{PageConfig, PageError, SettlingPage};
pub use registry::{CdpSessionFactory, SessionFactory, SessionRegistry, Target, TargetKind};
pub use settle::{SettleConfig, SettleDetector, SettleOutcome, SettleReason, SettleTracker};
