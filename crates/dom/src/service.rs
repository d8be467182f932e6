//! DOM Service - builds a `DomArena` from CDP responses
//!
//! This handles:
//! - Parsing `DOM.getDocument` (`depth: -1, pierce: true`) output
//! - Keeping light children, iframe content documents and shadow roots apart
//! - Tagging shadow roots as user-agent / open / closed

use crate::arena::DomArena;
use crate::error::{DomError, Result};
use crate::types::*;
use serde_json::Value;
use smallvec::SmallVec;
use std::collections::HashMap;

/// Main DOM service
pub struct DomService {
    arena: DomArena,
}

impl DomService {
    pub fn new() -> Self {
        Self {
            arena: DomArena::new(),
        }
    }

    /// Get reference to internal arena
    pub fn arena(&self) -> &DomArena {
        &self.arena
    }

    /// Give up the service and keep the arena
    pub fn into_arena(self) -> DomArena {
        self.arena
    }

    /// Parse CDP DOM tree response and build arena
    ///
    /// Input format matches CDP's DOM.getDocument response:
    /// ```json
    /// {
    ///   "root": {
    ///     "nodeId": 1,
    ///     "backendNodeId": 1,
    ///     "nodeType": 9,
    ///     "nodeName": "#document",
    ///     "children": [...]
    ///   }
    /// }
    /// ```
    pub fn parse_cdp_dom_tree(&mut self, cdp_response: &Value) -> Result<NodeId> {
        let root = cdp_response
            .get("root")
            .ok_or_else(|| DomError::CdpError("Missing 'root' in CDP response".to_string()))?;

        self.arena.clear();
        let root_id = self.parse_node(root, None)?;
        self.arena.set_root(root_id)?;

        Ok(root_id)
    }

    /// Recursively parse a CDP node
    fn parse_node(&mut self, cdp_node: &Value, parent_id: Option<NodeId>) -> Result<NodeId> {
        let backend_node_id = cdp_node["backendNodeId"]
            .as_u64()
            .ok_or_else(|| DomError::CdpError("Missing backendNodeId".to_string()))?;

        let node_type_val = cdp_node["nodeType"]
            .as_u64()
            .ok_or_else(|| DomError::CdpError("Missing nodeType".to_string()))?;

        let node_type = u8::try_from(node_type_val)
            .ok()
            .and_then(NodeType::from_u8)
            .ok_or_else(|| DomError::InvalidNodeType {
                expected: "valid NodeType".to_string(),
                actual: node_type_val.to_string(),
            })?;

        let node_name = cdp_node["nodeName"].as_str().unwrap_or("").to_string();

        // Attributes come as a flat [name, value, name, value, ...] list
        let mut attributes = HashMap::new();
        if let Some(attrs) = cdp_node["attributes"].as_array() {
            for pair in attrs.chunks_exact(2) {
                if let (Some(key), Some(value)) = (pair[0].as_str(), pair[1].as_str()) {
                    attributes.insert(key.to_string(), value.to_string());
                }
            }
        }

        let mut node = DomNode::new(backend_node_id, node_type, node_name);
        node.node_value = cdp_node["nodeValue"].as_str().unwrap_or("").to_string();
        node.attributes = attributes;
        node.parent_id = parent_id;
        node.frame_id = cdp_node["frameId"].as_str().map(String::from);
        node.shadow_root_type = cdp_node
            .get("shadowRootType")
            .and_then(|v| v.as_str())
            .and_then(ShadowRootType::from_cdp);

        let current_node_id = self.arena.add_node(node);

        if let Some(children) = cdp_node["children"].as_array() {
            let mut child_ids = SmallVec::new();
            for child in children {
                child_ids.push(self.parse_node(child, Some(current_node_id))?);
            }
            self.arena.get_mut(current_node_id)?.children_ids = child_ids;
        }

        // Parse content document (iframe)
        if let Some(content_doc) = cdp_node.get("contentDocument") {
            let doc_id = self.parse_node(content_doc, Some(current_node_id))?;
            self.arena.get_mut(current_node_id)?.content_document_id = Some(doc_id);
        }

        if let Some(shadow_roots) = cdp_node["shadowRoots"].as_array() {
            let mut shadow_ids = SmallVec::new();
            for shadow in shadow_roots {
                shadow_ids.push(self.parse_node(shadow, Some(current_node_id))?);
            }
            self.arena.get_mut(current_node_id)?.shadow_root_ids = Some(shadow_ids);
        }

        Ok(current_node_id)
    }
}

impl Default for DomService {
    fn default() -> Self {
        Self::new()
    }
}
