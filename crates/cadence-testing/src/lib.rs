//! In-memory component tree for driving a cadence engine in tests.
//!
//! [`TestBody`] is the root, [`TestNode`]s are either structural nodes or
//! composers. Every re-render, patch and body notification is recorded in a
//! shared [`RenderLog`], so tests can assert on ordering.
//!
//! ```ignore
//! let body = TestBody::new();
//! let app = body.composer("app");
//! body.attach(&app);
//!
//! let engine = Engine::builder(body.clone()).build();
//! engine.init()?;
//! engine.dispatch(&app.node(), |_| {});
//! engine.consume()?;
//!
//! assert_eq!(body.log().entries(), vec!["render:app"]);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use anyhow::anyhow;
use cadence_core::{Body, Composer, Node, NodeId, NodeRef, Page, TreeError, WeakNode};
use url::Url;

type RenderHook = Box<dyn Fn(&TestNode) -> Result<(), TreeError> + Send + Sync>;

/// Ordered record of everything the tree was asked to do.
#[derive(Debug, Default)]
pub struct RenderLog {
    entries: Mutex<Vec<String>>,
}

impl RenderLog {
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Entries starting with `prefix`, prefix stripped.
    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter_map(|entry| entry.strip_prefix(prefix).map(str::to_string))
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

/// A structural node or a composer.
pub struct TestNode {
    id: NodeId,
    name: String,
    composer: bool,
    mounted: AtomicBool,
    parent: Mutex<Option<WeakNode>>,
    children: Mutex<Vec<Arc<TestNode>>>,
    renders: AtomicUsize,
    hook: Mutex<Option<RenderHook>>,
    log: Arc<RenderLog>,
}

impl TestNode {
    fn new(log: Arc<RenderLog>, name: &str, composer: bool) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::next(),
            name: name.to_string(),
            composer,
            mounted: AtomicBool::new(false),
            parent: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            renders: AtomicUsize::new(0),
            hook: Mutex::new(None),
            log,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// This node as a tree handle.
    pub fn node(self: &Arc<Self>) -> NodeRef {
        self.clone()
    }

    /// Append `child`, mounting it if this node is mounted.
    pub fn append(self: &Arc<Self>, child: &Arc<TestNode>) {
        let parent: WeakNode = Arc::downgrade(self) as WeakNode;
        child.link(parent, self.mounted());
        self.children.lock().unwrap().push(Arc::clone(child));
    }

    /// Detach the child with `id`, unmounting its subtree.
    pub fn remove_child(&self, id: NodeId) -> Option<Arc<TestNode>> {
        let mut children = self.children.lock().unwrap();
        let index = children.iter().position(|child| child.id == id)?;
        let child = children.remove(index);
        child.unlink();
        Some(child)
    }

    pub fn children(&self) -> Vec<Arc<TestNode>> {
        self.children.lock().unwrap().clone()
    }

    /// Number of `update_root` calls so far.
    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    /// Run `hook` at the end of every re-render.
    pub fn on_render(
        &self,
        hook: impl Fn(&TestNode) -> Result<(), TreeError> + Send + Sync + 'static,
    ) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Make every following re-render fail.
    pub fn fail_renders(&self) {
        let name = self.name.clone();
        self.on_render(move |_| Err(TreeError::Other(anyhow!("render of {name} failed"))));
    }

    fn link(&self, parent: WeakNode, mounted: bool) {
        *self.parent.lock().unwrap() = Some(parent);
        self.set_mounted(mounted);
    }

    fn unlink(&self) {
        *self.parent.lock().unwrap() = None;
        self.set_mounted(false);
    }

    fn set_mounted(&self, mounted: bool) {
        self.mounted.store(mounted, Ordering::SeqCst);
        for child in self.children.lock().unwrap().iter() {
            child.set_mounted(mounted);
        }
    }
}

impl Node for TestNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    fn parent(&self) -> Option<NodeRef> {
        self.parent.lock().unwrap().as_ref()?.upgrade()
    }

    fn as_composer(&self) -> Option<&dyn Composer> {
        if self.composer {
            Some(self)
        } else {
            None
        }
    }
}

impl Composer for TestNode {
    fn update_root(&self) -> Result<(), TreeError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        self.log.record(format!("render:{}", self.name));
        match self.hook.lock().unwrap().as_ref() {
            Some(hook) => hook(self),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for TestNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("composer", &self.composer)
            .field("mounted", &self.mounted())
            .finish()
    }
}

/// Root of a test tree.
///
/// Nodes handed to [`Body::replace_child_at`] and [`Body::update_child_at`]
/// must have been created through this body.
pub struct TestBody {
    id: NodeId,
    this: Weak<TestBody>,
    mounted: AtomicBool,
    children: Mutex<Vec<Arc<TestNode>>>,
    nodes: Mutex<HashMap<NodeId, Arc<TestNode>>>,
    log: Arc<RenderLog>,
    fail_mount: AtomicBool,
    navs: Mutex<Vec<Url>>,
}

impl TestBody {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: NodeId::next(),
            this: this.clone(),
            mounted: AtomicBool::new(false),
            children: Mutex::new(Vec::new()),
            nodes: Mutex::new(HashMap::new()),
            log: Arc::new(RenderLog::default()),
            fail_mount: AtomicBool::new(false),
            navs: Mutex::new(Vec::new()),
        })
    }

    /// A body whose `mount` fails.
    pub fn failing() -> Arc<Self> {
        let body = Self::new();
        body.fail_mount.store(true, Ordering::SeqCst);
        body
    }

    pub fn log(&self) -> Arc<RenderLog> {
        Arc::clone(&self.log)
    }

    pub fn node(self: &Arc<Self>) -> NodeRef {
        self.clone()
    }

    pub fn structural(&self, name: &str) -> Arc<TestNode> {
        self.register(TestNode::new(self.log(), name, false))
    }

    pub fn composer(&self, name: &str) -> Arc<TestNode> {
        self.register(TestNode::new(self.log(), name, true))
    }

    /// Append `child` directly under the body.
    pub fn attach(&self, child: &Arc<TestNode>) {
        child.link(self.weak_node(), self.mounted());
        self.children.lock().unwrap().push(Arc::clone(child));
    }

    /// The child in the content slot.
    pub fn content(&self) -> Option<Arc<TestNode>> {
        self.children.lock().unwrap().first().cloned()
    }

    pub fn navs(&self) -> Vec<Url> {
        self.navs.lock().unwrap().clone()
    }

    fn register(&self, node: Arc<TestNode>) -> Arc<TestNode> {
        self.nodes.lock().unwrap().insert(node.id, Arc::clone(&node));
        node
    }

    fn lookup(&self, node: &NodeRef) -> Result<Arc<TestNode>, TreeError> {
        self.nodes
            .lock()
            .unwrap()
            .get(&node.id())
            .cloned()
            .ok_or_else(|| TreeError::Other(anyhow!("{} does not belong to this tree", node.id())))
    }

    fn weak_node(&self) -> WeakNode {
        self.this.clone() as WeakNode
    }
}

impl Node for TestBody {
    fn id(&self) -> NodeId {
        self.id
    }

    fn mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    fn parent(&self) -> Option<NodeRef> {
        None
    }
}

impl Body for TestBody {
    fn mount(&self) -> Result<(), TreeError> {
        if self.fail_mount.load(Ordering::SeqCst) {
            return Err(TreeError::Other(anyhow!("body refused to mount")));
        }
        self.mounted.store(true, Ordering::SeqCst);
        for child in self.children.lock().unwrap().iter() {
            child.set_mounted(true);
        }
        self.log.record("mount:body");
        Ok(())
    }

    fn dismount(&self) {
        self.mounted.store(false, Ordering::SeqCst);
        for child in self.children.lock().unwrap().drain(..) {
            child.unlink();
        }
        self.log.record("dismount:body");
    }

    fn replace_child_at(&self, index: usize, node: NodeRef) -> Result<(), TreeError> {
        let replacement = self.lookup(&node)?;
        let mut children = self.children.lock().unwrap();
        if index > children.len() {
            return Err(TreeError::Other(anyhow!(
                "child index {index} out of range ({} children)",
                children.len()
            )));
        }

        replacement.link(self.weak_node(), self.mounted());
        if index == children.len() {
            children.push(replacement);
        } else {
            let previous = std::mem::replace(&mut children[index], replacement);
            previous.unlink();
        }
        self.log.record(format!("replace:{}", children[index].name));
        Ok(())
    }

    fn update_child_at(&self, index: usize, node: NodeRef) -> Result<(), TreeError> {
        let incoming = self.lookup(&node)?;
        let children = self.children.lock().unwrap();
        let current = children
            .get(index)
            .ok_or_else(|| TreeError::Other(anyhow!("no child at index {index}")))?;

        if current.name != incoming.name {
            return Err(TreeError::Replace);
        }
        self.log.record(format!("patch:{}", current.name));
        Ok(())
    }

    fn pre_render(&self, page: &dyn Page) {
        self.log.record(format!("pre_render:{}", page.url()));
    }

    fn on_nav(&self, url: &Url) {
        self.navs.lock().unwrap().push(url.clone());
        self.log.record(format!("nav:{}", url.path()));
    }

    fn on_app_update(&self) {
        self.log.record("app_update");
    }

    fn on_resize(&self) {
        self.log.record("resize");
    }
}

impl std::fmt::Debug for TestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestBody")
            .field("id", &self.id)
            .field("mounted", &self.mounted())
            .finish_non_exhaustive()
    }
}
