//! Frame ordinals and element addresses
//!
//! CDP frame ids are long opaque strings. Element addresses use a small
//! per-frame integer instead, handed out in discovery order:
//!
//! ```text
//! (no frame)          -> 0
//! "8A3F...E1" (first) -> 1
//! "C09B...44" (next)  -> 2
//!
//! address = "<ordinal>-<backendNodeId>"   e.g. "2-417"
//! ```
//!
//! Addresses are only unique within one epoch; `reset()` starts a new one.

use crate::error::{DomError, Result};
use crate::types::{BackendNodeId, FrameId};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordinal of the implicit frame (no frame id given)
pub const DEFAULT_FRAME_ORDINAL: u32 = 0;

/// What an ordinal points back to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRef<'a> {
    /// The implicit default frame
    Main,
    Frame(&'a str),
}

/// Bidirectional frame id ↔ ordinal map
#[derive(Debug, Clone)]
pub struct FrameOrdinals {
    by_frame: AHashMap<FrameId, u32>,
    /// Index = ordinal; slot 0 is the implicit frame
    frames: Vec<Option<FrameId>>,
}

impl FrameOrdinals {
    pub fn new() -> Self {
        Self {
            by_frame: AHashMap::new(),
            frames: vec![None],
        }
    }

    /// Ordinal for `frame_id`, assigning the next free one on first sight
    pub fn ordinal_for(&mut self, frame_id: Option<&str>) -> u32 {
        let Some(frame_id) = frame_id else {
            return DEFAULT_FRAME_ORDINAL;
        };
        if let Some(&ordinal) = self.by_frame.get(frame_id) {
            return ordinal;
        }

        let ordinal = self.frames.len() as u32;
        self.by_frame.insert(frame_id.to_string(), ordinal);
        self.frames.push(Some(frame_id.to_string()));
        ordinal
    }

    /// Ordinal already assigned to `frame_id`, without assigning one
    pub fn get(&self, frame_id: Option<&str>) -> Option<u32> {
        match frame_id {
            None => Some(DEFAULT_FRAME_ORDINAL),
            Some(id) => self.by_frame.get(id).copied(),
        }
    }

    pub fn frame_for(&self, ordinal: u32) -> Option<FrameRef<'_>> {
        match self.frames.get(ordinal as usize)? {
            None => Some(FrameRef::Main),
            Some(id) => Some(FrameRef::Frame(id)),
        }
    }

    /// Build the address of `backend_node_id` inside `frame_id`
    pub fn encode(&mut self, frame_id: Option<&str>, backend_node_id: BackendNodeId) -> ElementAddress {
        ElementAddress {
            ordinal: self.ordinal_for(frame_id),
            backend_node_id,
        }
    }

    /// Forget every assignment except the implicit frame
    pub fn reset(&mut self) {
        self.by_frame.clear();
        self.frames.truncate(1);
    }

    /// Number of ordinals handed out, the implicit one included
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Always false; the implicit frame is never removed
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Default for FrameOrdinals {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame-relative element address, written `"<ordinal>-<backendNodeId>"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ElementAddress {
    pub ordinal: u32,
    pub backend_node_id: BackendNodeId,
}

impl ElementAddress {
    pub fn new(ordinal: u32, backend_node_id: BackendNodeId) -> Self {
        Self {
            ordinal,
            backend_node_id,
        }
    }
}

impl fmt::Display for ElementAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ordinal, self.backend_node_id)
    }
}

impl FromStr for ElementAddress {
    type Err = DomError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || DomError::InvalidAddress(s.to_string());
        let (ordinal, backend) = s.split_once('-').ok_or_else(invalid)?;
        // u32/u64 parsing accepts a leading '+', addresses never carry one
        if !is_decimal(ordinal) || !is_decimal(backend) {
            return Err(invalid());
        }
        Ok(Self {
            ordinal: ordinal.parse().map_err(|_| invalid())?,
            backend_node_id: backend.parse().map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for ElementAddress {
    type Error = DomError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ElementAddress> for String {
    fn from(address: ElementAddress) -> Self {
        address.to_string()
    }
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
