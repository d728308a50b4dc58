//! Narrow contracts the engine consumes from the tree/render subsystem.
//!
//! The tree owns its nodes top-down. The engine never does: events, update
//! batches and subscriptions only hold [`Weak`] references, and a node that
//! has been dropped counts as unmounted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use url::Url;

use crate::error::TreeError;
use crate::page::Page;

/// Shared handle to a tree node.
pub type NodeRef = Arc<dyn Node>;

/// Non-owning handle to a tree node.
pub type WeakNode = Weak<dyn Node>;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Allocate a fresh id. Ids are never reused within a process.
    pub fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Any node of the tree.
pub trait Node: Send + Sync + 'static {
    fn id(&self) -> NodeId;

    /// Whether the node is currently attached to the tree.
    fn mounted(&self) -> bool;

    /// The parent node. Must return `None` once the node is detached.
    fn parent(&self) -> Option<NodeRef>;

    /// Re-render capability. Component boundaries return `Some(self)`,
    /// structural nodes keep the default.
    fn as_composer(&self) -> Option<&dyn Composer> {
        None
    }
}

/// A component boundary: a node that can re-render its own subtree.
pub trait Composer: Node {
    /// Re-render this component. An error here is fatal to the update pass.
    fn update_root(&self) -> Result<(), TreeError>;
}

/// The root element owned by the engine.
pub trait Body: Node {
    /// Attach the body itself to the tree.
    fn mount(&self) -> Result<(), TreeError>;

    /// Detach the body and its whole subtree.
    fn dismount(&self);

    fn replace_child_at(&self, index: usize, node: NodeRef) -> Result<(), TreeError>;

    /// Patch the child at `index` towards `node`. Fails with
    /// [`TreeError::Replace`] when the kinds differ.
    fn update_child_at(&self, index: usize, node: NodeRef) -> Result<(), TreeError>;

    fn pre_render(&self, page: &dyn Page);

    fn on_nav(&self, url: &Url);

    fn on_app_update(&self);

    fn on_resize(&self);
}

/// Walk from `node` up to the root, `node` included.
pub fn ancestors(node: NodeRef) -> Ancestors {
    Ancestors { next: Some(node) }
}

/// Iterator returned by [`ancestors`].
pub struct Ancestors {
    next: Option<NodeRef>,
}

impl Iterator for Ancestors {
    type Item = NodeRef;

    fn next(&mut self) -> Option<NodeRef> {
        let current = self.next.take()?;
        self.next = current.parent();
        Some(current)
    }
}

pub(crate) fn upgrade_mounted(node: &WeakNode) -> Option<NodeRef> {
    node.upgrade().filter(|n| n.mounted())
}
