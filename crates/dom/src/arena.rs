//! Arena-based DOM tree storage
//!
//! Nodes live in one `Vec` and refer to each other by `u32` index. No Rc/Arc,
//! no recursive ownership, and a snapshot is dropped in one deallocation.
//!
//! ```text
//! Arena: Vec<DomNode>
//!        [Node0][Node1][Node2]...
//!         ↑ 4-byte index, not 8-byte pointer
//! ```

use crate::error::{DomError, Result};
use crate::types::{BackendNodeId, DomNode, NodeId, ShadowRootType};
use ahash::AHashMap;

/// Arena allocator for DOM nodes
///
/// Design:
/// - Single Vec<DomNode> for sequential allocation
/// - HashMap for backend_node_id → NodeId lookup (CDP uses backend IDs)
/// - No Rc/Arc: use indices everywhere
#[derive(Debug)]
pub struct DomArena {
    /// All nodes stored sequentially (cache-friendly)
    nodes: Vec<DomNode>,

    /// Backend node ID → NodeId lookup (for CDP integration)
    backend_id_map: AHashMap<BackendNodeId, NodeId>,

    /// Root node ID (if set)
    root_id: Option<NodeId>,
}

impl DomArena {
    /// Create a new empty arena
    pub fn new() -> Self {
        Self::with_capacity(1024) // Pre-allocate for typical page
    }

    /// Create arena with specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            backend_id_map: AHashMap::with_capacity(capacity),
            root_id: None,
        }
    }

    /// Add a node to the arena, returns its ID
    pub fn add_node(&mut self, mut node: DomNode) -> NodeId {
        let node_id = self.nodes.len() as NodeId;
        node.node_id = node_id;
        self.backend_id_map.insert(node.backend_node_id, node_id);
        self.nodes.push(node);
        node_id
    }

    /// Get node by ID (immutable)
    pub fn get(&self, node_id: NodeId) -> Result<&DomNode> {
        self.nodes
            .get(node_id as usize)
            .ok_or(DomError::NodeNotFound(node_id as u64))
    }

    /// Get node by ID (mutable)
    pub fn get_mut(&mut self, node_id: NodeId) -> Result<&mut DomNode> {
        self.nodes
            .get_mut(node_id as usize)
            .ok_or(DomError::NodeNotFound(node_id as u64))
    }

    /// Get node by backend node ID (from CDP)
    pub fn get_by_backend_id(&self, backend_id: BackendNodeId) -> Result<&DomNode> {
        let node_id = self
            .backend_id_map
            .get(&backend_id)
            .ok_or(DomError::NodeNotFound(backend_id))?;
        self.get(*node_id)
    }

    /// Get node ID by backend node ID
    pub fn node_id_by_backend(&self, backend_id: BackendNodeId) -> Option<NodeId> {
        self.backend_id_map.get(&backend_id).copied()
    }

    /// Set root node
    pub fn set_root(&mut self, node_id: NodeId) -> Result<()> {
        // Verify node exists
        self.get(node_id)?;
        self.root_id = Some(node_id);
        Ok(())
    }

    /// Get root node ID
    pub fn root_id(&self) -> Option<NodeId> {
        self.root_id
    }

    /// Total number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if arena is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First shadow root of `host` with the given mode
    pub fn shadow_root(&self, host: NodeId, mode: ShadowRootType) -> Option<NodeId> {
        let node = self.get(host).ok()?;
        node.shadow_roots().iter().copied().find(|&root_id| {
            self.get(root_id)
                .map(|root| root.shadow_root_type == Some(mode))
                .unwrap_or(false)
        })
    }

    /// Find nodes matching predicate
    pub fn find<F>(&self, predicate: F) -> Vec<NodeId>
    where
        F: Fn(&DomNode) -> bool,
    {
        self.nodes
            .iter()
            .filter(|node| predicate(node))
            .map(|node| node.node_id)
            .collect()
    }

    /// Content document of the frame owner element for `frame_id`
    pub fn frame_document(&self, frame_id: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|node| node.frame_id.as_deref() == Some(frame_id) && node.content_document_id.is_some())
            .and_then(|node| node.content_document_id)
    }

    /// Clear arena (reuse allocation)
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.backend_id_map.clear();
        self.root_id = None;
    }
}

impl Default for DomArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeType;
    use smallvec::smallvec;

    fn element(backend_id: BackendNodeId, name: &str) -> DomNode {
        DomNode::new(backend_id, NodeType::Element, name.to_string())
    }

    #[test]
    fn test_arena_basic() {
        let mut arena = DomArena::new();

        let id = arena.add_node(element(100, "DIV"));
        assert_eq!(id, 0);

        let retrieved = arena.get(id).unwrap();
        assert_eq!(retrieved.node_name, "DIV");
        assert_eq!(retrieved.node_id, 0);
        assert_eq!(retrieved.backend_node_id, 100);
    }

    #[test]
    fn test_backend_lookup() {
        let mut arena = DomArena::new();
        arena.add_node(element(7, "SPAN"));
        arena.add_node(element(100, "DIV"));

        let found = arena.get_by_backend_id(100).unwrap();
        assert_eq!(found.node_name, "DIV");
        assert_eq!(arena.node_id_by_backend(7), Some(0));
        assert!(matches!(
            arena.get_by_backend_id(5),
            Err(DomError::NodeNotFound(5))
        ));
    }

    #[test]
    fn test_shadow_root_by_mode() {
        let mut arena = DomArena::new();
        let host = arena.add_node(element(1, "X-HOST"));

        let mut open = DomNode::new(2, NodeType::DocumentFragment, "#document-fragment".into());
        open.shadow_root_type = Some(ShadowRootType::Open);
        let open_id = arena.add_node(open);

        let mut closed = DomNode::new(3, NodeType::DocumentFragment, "#document-fragment".into());
        closed.shadow_root_type = Some(ShadowRootType::Closed);
        let closed_id = arena.add_node(closed);

        arena.get_mut(host).unwrap().shadow_root_ids = Some(smallvec![open_id, closed_id]);

        assert_eq!(arena.shadow_root(host, ShadowRootType::Open), Some(open_id));
        assert_eq!(arena.shadow_root(host, ShadowRootType::Closed), Some(closed_id));
        assert_eq!(arena.shadow_root(host, ShadowRootType::UserAgent), None);
        assert_eq!(arena.shadow_root(open_id, ShadowRootType::Open), None);
    }

    #[test]
    fn test_frame_document() {
        let mut arena = DomArena::new();
        let mut iframe = element(1, "IFRAME");
        iframe.frame_id = Some("F1".into());
        let owner = arena.add_node(iframe);
        let doc = arena.add_node(DomNode::new(2, NodeType::Document, "#document".into()));
        arena.get_mut(owner).unwrap().content_document_id = Some(doc);

        assert_eq!(arena.frame_document("F1"), Some(doc));
        assert_eq!(arena.frame_document("F2"), None);
    }

    #[test]
    fn test_clear_resets_lookup() {
        let mut arena = DomArena::new();
        let id = arena.add_node(element(9, "P"));
        arena.set_root(id).unwrap();

        arena.clear();

        assert!(arena.is_empty());
        assert!(arena.root_id().is_none());
        assert!(arena.node_id_by_backend(9).is_none());
    }
}
