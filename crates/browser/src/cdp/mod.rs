//! Chrome DevTools Protocol transport
//!
//! `CDPClient` owns the socket; everything above it talks to a
//! `ProtocolSession`.

pub mod client;
pub mod protocol;
pub mod session;

pub use client::{CDPClient, CDPError, EventCallback, EventRouter, Result, SubscriptionId};
pub use protocol::{CDPEvent, CDPRequest, CDPResponse};
pub use session::{CDPSession, ProtocolSession, SharedSession};
