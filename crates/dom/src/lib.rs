//! Frame-relative DOM addressing and shadow-piercing lookup
//!
//! Everything here is plain data plus algorithms: no sockets, no async.
//!
//! ## Core Design
//!
//! ```text
//! DOM.getDocument (pierce) → DomService → DomArena → PiercingWalker → NodeId
//!                                             ↓
//!                    FrameOrdinals + backendNodeId → ElementAddress "3-417"
//! ```

pub mod arena;
pub mod error;
pub mod ordinals;
pub mod pierce;
pub mod service;
pub mod types;

pub use arena::DomArena;
pub use error::{DomError, Result};
pub use ordinals::{ElementAddress, FrameOrdinals, FrameRef};
pub use pierce::{
    ArenaClosedRoots, ClosedShadowResolver, NoClosedRoots, PierceEngine, PiercingWalker, Selector,
    SelectorEngine, SelectorEngineRegistry,
};
pub use service::DomService;
pub use types::*;
