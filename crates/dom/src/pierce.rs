//! Shadow-piercing selector engine
//!
//! Native CSS lookup stops at shadow boundaries. This engine walks the whole
//! snapshot instead: light children, open shadow roots, and closed shadow roots
//! that an injected resolver can reach.
//!
//! Selector grammar:
//!
//! ```text
//! x              -> data-__stagehand-id == "x"
//! name=value     -> name == value
//! name="value"   -> quotes around the value are stripped
//! ```
//!
//! Downstream query strings prefix the engine name: `stagehand=x`.

use crate::arena::DomArena;
use crate::error::{DomError, Result};
use crate::types::{NodeId, ShadowRootType};
use ahash::AHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Engine name used in downstream query strings
pub const DEFAULT_ENGINE_NAME: &str = "stagehand";

/// Attribute matched by a bare selector
pub const DEFAULT_ID_ATTRIBUTE: &str = "data-__stagehand-id";

/// Parsed `name=value` selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub name: String,
    pub value: String,
}

impl Selector {
    pub fn parse(selector: &str) -> Self {
        match selector.split_once('=') {
            None => Self {
                name: DEFAULT_ID_ATTRIBUTE.to_string(),
                value: selector.trim().to_string(),
            },
            Some((name, value)) => Self {
                name: name.trim().to_string(),
                value: strip_quotes(value.trim()).to_string(),
            },
        }
    }

    pub fn matches(&self, arena: &DomArena, node_id: NodeId) -> bool {
        arena
            .get(node_id)
            .map(|node| node.attr(&self.name) == Some(self.value.as_str()))
            .unwrap_or(false)
    }
}

/// Strips one leading and one trailing quote, independently
fn strip_quotes(value: &str) -> &str {
    let value = value
        .strip_prefix(|c: char| c == '"' || c == '\'')
        .unwrap_or(value);
    value
        .strip_suffix(|c: char| c == '"' || c == '\'')
        .unwrap_or(value)
}

/// Capability for reaching into closed shadow roots
///
/// Page script cannot see a closed root through `element.shadowRoot`; the host
/// has to hand it over. Walkers only descend into closed content this returns.
pub trait ClosedShadowResolver: Send + Sync {
    fn closed_shadow_root(&self, arena: &DomArena, host: NodeId) -> Option<NodeId>;
}

/// Resolves closed roots captured in the snapshot (`DOM.getDocument` with `pierce`)
#[derive(Debug, Default, Clone, Copy)]
pub struct ArenaClosedRoots;

impl ClosedShadowResolver for ArenaClosedRoots {
    fn closed_shadow_root(&self, arena: &DomArena, host: NodeId) -> Option<NodeId> {
        arena.shadow_root(host, ShadowRootType::Closed)
    }
}

/// Resolves nothing; closed content stays hidden
#[derive(Debug, Default, Clone, Copy)]
pub struct NoClosedRoots;

impl ClosedShadowResolver for NoClosedRoots {
    fn closed_shadow_root(&self, _arena: &DomArena, _host: NodeId) -> Option<NodeId> {
        None
    }
}

/// Depth-first walk over every element below a root, crossing shadow boundaries
///
/// For each element: the element itself, then its open shadow content, then its
/// closed shadow content, then its light children. The root is expanded but not
/// yielded. Iframe content documents are not entered.
pub struct PiercingWalker<'a> {
    arena: &'a DomArena,
    resolver: &'a dyn ClosedShadowResolver,
    stack: Vec<NodeId>,
}

impl<'a> PiercingWalker<'a> {
    pub fn new(arena: &'a DomArena, root: NodeId, resolver: &'a dyn ClosedShadowResolver) -> Self {
        let mut walker = Self {
            arena,
            resolver,
            stack: Vec::with_capacity(64),
        };
        walker.expand(root);
        walker
    }

    /// Push what lies below `node_id`, last-visited first
    fn expand(&mut self, node_id: NodeId) {
        let arena = self.arena;
        let Ok(node) = arena.get(node_id) else {
            return;
        };

        self.stack.extend(node.children_ids.iter().rev().copied());

        if node.is_element() {
            if let Some(closed) = self.resolver.closed_shadow_root(arena, node_id) {
                self.stack.push(closed);
            }
            if let Some(open) = arena.shadow_root(node_id, ShadowRootType::Open) {
                self.stack.push(open);
            }
        }
    }
}

impl Iterator for PiercingWalker<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while let Some(node_id) = self.stack.pop() {
            self.expand(node_id);
            if self.arena.get(node_id).map(|n| n.is_element()).unwrap_or(false) {
                return Some(node_id);
            }
        }
        None
    }
}

/// A named lookup strategy usable in `<name>=<selector>` query strings
pub trait SelectorEngine: Send + Sync {
    fn name(&self) -> &str;

    /// First match in traversal order
    fn query(&self, arena: &DomArena, root: NodeId, selector: &str) -> Option<NodeId>;

    /// All matches in traversal order
    fn query_all(&self, arena: &DomArena, root: NodeId, selector: &str) -> Vec<NodeId>;
}

/// Attribute selector engine that pierces open and closed shadow roots
pub struct PierceEngine {
    name: String,
    resolver: Arc<dyn ClosedShadowResolver>,
}

impl PierceEngine {
    pub fn new(name: impl Into<String>, resolver: Arc<dyn ClosedShadowResolver>) -> Self {
        Self {
            name: name.into(),
            resolver,
        }
    }

    pub fn walk<'a>(&'a self, arena: &'a DomArena, root: NodeId) -> PiercingWalker<'a> {
        PiercingWalker::new(arena, root, self.resolver.as_ref())
    }
}

impl Default for PierceEngine {
    fn default() -> Self {
        Self::new(DEFAULT_ENGINE_NAME, Arc::new(ArenaClosedRoots))
    }
}

impl SelectorEngine for PierceEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn query(&self, arena: &DomArena, root: NodeId, selector: &str) -> Option<NodeId> {
        let selector = Selector::parse(selector);
        self.walk(arena, root).find(|&id| selector.matches(arena, id))
    }

    fn query_all(&self, arena: &DomArena, root: NodeId, selector: &str) -> Vec<NodeId> {
        let selector = Selector::parse(selector);
        self.walk(arena, root)
            .filter(|&id| selector.matches(arena, id))
            .collect()
    }
}

/// Named selector engines, shared for the life of the process
///
/// `ensure_initialized` is safe to call from every page start; only the first
/// call installs the piercing engine.
#[derive(Default)]
pub struct SelectorEngineRegistry {
    engines: RwLock<AHashMap<String, Arc<dyn SelectorEngine>>>,
    initialized: AtomicBool,
}

impl SelectorEngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the piercing engine under `name` once.
    ///
    /// Returns true only if this call installed it. An engine already
    /// registered under `name` is kept and the registry still counts as
    /// initialized.
    pub fn ensure_initialized(&self, name: &str) -> bool {
        let mut engines = self.engines.write().unwrap_or_else(PoisonError::into_inner);
        if self.initialized.load(Ordering::SeqCst) {
            return false;
        }
        self.initialized.store(true, Ordering::SeqCst);

        if engines.contains_key(name) {
            tracing::debug!("Keeping existing selector engine: {}", name);
            return false;
        }
        engines.insert(
            name.to_string(),
            Arc::new(PierceEngine::new(name, Arc::new(ArenaClosedRoots))),
        );
        tracing::debug!("Registered selector engine: {}", name);
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Add an engine. A taken name leaves the existing engine in place and returns false.
    pub fn register(&self, engine: Arc<dyn SelectorEngine>) -> bool {
        let mut engines = self.engines.write().unwrap_or_else(PoisonError::into_inner);
        let name = engine.name().to_string();
        if engines.contains_key(&name) {
            tracing::debug!("Selector engine already registered: {}", name);
            return false;
        }
        tracing::debug!("Registered selector engine: {}", name);
        engines.insert(name, engine);
        true
    }

    pub fn engine(&self, name: &str) -> Option<Arc<dyn SelectorEngine>> {
        self.engines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Run `<engine>=<selector>` and return the first match
    pub fn query(&self, arena: &DomArena, root: NodeId, query: &str) -> Result<Option<NodeId>> {
        let (engine, selector) = self.split_query(query)?;
        Ok(engine.query(arena, root, selector))
    }

    /// Run `<engine>=<selector>` and return every match
    pub fn query_all(&self, arena: &DomArena, root: NodeId, query: &str) -> Result<Vec<NodeId>> {
        let (engine, selector) = self.split_query(query)?;
        Ok(engine.query_all(arena, root, selector))
    }

    fn split_query<'q>(&self, query: &'q str) -> Result<(Arc<dyn SelectorEngine>, &'q str)> {
        let (name, selector) = query
            .split_once('=')
            .ok_or_else(|| DomError::UnknownEngine(query.to_string()))?;
        let engine = self
            .engine(name.trim())
            .ok_or_else(|| DomError::UnknownEngine(name.trim().to_string()))?;
        Ok((engine, selector))
    }
}
