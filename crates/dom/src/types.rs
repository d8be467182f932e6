//! Core type definitions for DOM snapshots taken over CDP
//!
//! Key design principles:
//! 1. Use u32 for arena indices (4 bytes vs 8 bytes pointer)
//! 2. Use SmallVec for small arrays (avoid heap allocation)
//! 3. Keep only what lookup and addressing need

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Node identifier (index into arena)
/// u32 allows 4 billion nodes, enough for any webpage
pub type NodeId = u32;

/// Engine-assigned node id, stable for the node's lifetime (`backendNodeId`)
pub type BackendNodeId = u64;

/// Frame identifier from CDP
pub type FrameId = String;

/// Node type matching DOM specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeType {
    Element = 1,
    Attribute = 2,
    Text = 3,
    CdataSection = 4,
    EntityReference = 5,
    Entity = 6,
    ProcessingInstruction = 7,
    Comment = 8,
    Document = 9,
    DocumentType = 10,
    DocumentFragment = 11,
    Notation = 12,
}

impl NodeType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(NodeType::Element),
            2 => Some(NodeType::Attribute),
            3 => Some(NodeType::Text),
            4 => Some(NodeType::CdataSection),
            5 => Some(NodeType::EntityReference),
            6 => Some(NodeType::Entity),
            7 => Some(NodeType::ProcessingInstruction),
            8 => Some(NodeType::Comment),
            9 => Some(NodeType::Document),
            10 => Some(NodeType::DocumentType),
            11 => Some(NodeType::DocumentFragment),
            12 => Some(NodeType::Notation),
            _ => None,
        }
    }
}

/// Shadow root type from CDP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShadowRootType {
    UserAgent,
    Open,
    Closed,
}

impl ShadowRootType {
    /// Parse the `shadowRootType` string CDP reports on shadow root nodes
    pub fn from_cdp(value: &str) -> Option<Self> {
        match value {
            "user-agent" => Some(ShadowRootType::UserAgent),
            "open" => Some(ShadowRootType::Open),
            "closed" => Some(ShadowRootType::Closed),
            _ => None,
        }
    }
}

/// One node of a DOM snapshot
///
/// Shadow roots are stored as `DocumentFragment` nodes hanging off their host
/// through `shadow_root_ids`, never through `children_ids`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomNode {
    /// Arena index, assigned by `DomArena::add_node`
    pub node_id: NodeId,
    pub backend_node_id: BackendNodeId,
    pub node_type: NodeType,

    // Navigation indices
    pub parent_id: Option<NodeId>,
    pub children_ids: SmallVec<[NodeId; 4]>, // Most nodes have <4 children

    pub node_name: String,
    pub node_value: String,
    pub attributes: HashMap<String, String>,

    /// Set on documents and iframe owners
    pub frame_id: Option<FrameId>,

    // Special DOM structures
    pub content_document_id: Option<NodeId>,
    pub shadow_root_type: Option<ShadowRootType>,
    pub shadow_root_ids: Option<SmallVec<[NodeId; 2]>>,
}

impl DomNode {
    /// Create a new node with required fields
    pub fn new(backend_node_id: BackendNodeId, node_type: NodeType, node_name: String) -> Self {
        Self {
            node_id: 0,
            backend_node_id,
            node_type,
            node_name,
            node_value: String::new(),
            attributes: HashMap::new(),
            parent_id: None,
            children_ids: SmallVec::new(),
            frame_id: None,
            content_document_id: None,
            shadow_root_type: None,
            shadow_root_ids: None,
        }
    }

    /// Check if node is an element
    pub fn is_element(&self) -> bool {
        self.node_type == NodeType::Element
    }

    /// Get attribute value
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|s| s.as_str())
    }

    /// Shadow roots attached to this host, in CDP order
    pub fn shadow_roots(&self) -> &[NodeId] {
        self.shadow_root_ids.as_deref().unwrap_or(&[])
    }
}
