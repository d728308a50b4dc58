//! The context handed to event functions and message handlers.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::bus::{MsgHandler, SubscriptionKey};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::node::NodeRef;
use crate::page::Page;
use crate::storage::Storage;

/// Built from an event's source right before its function runs.
///
/// Everything scheduled through a context targets that source node.
#[derive(Clone)]
pub struct Context {
    src: NodeRef,
    engine: Engine,
}

impl Context {
    pub(crate) fn new(src: NodeRef, engine: Engine) -> Self {
        Self { src, engine }
    }

    /// The node this context was built for.
    pub fn src(&self) -> &NodeRef {
        &self.src
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn dispatch(&self, function: impl FnOnce(&Context) + Send + 'static) {
        self.engine.dispatch(&self.src, function);
    }

    pub fn defer(&self, function: impl FnOnce(&Context) + Send + 'static) {
        self.engine.defer(&self.src, function);
    }

    pub fn emit(&self, function: impl FnOnce()) {
        self.engine.emit(&self.src, function);
    }

    pub fn post<T: Any + Send + Sync>(&self, topic: &str, value: T) {
        self.engine.post(topic, value);
    }

    /// Subscribe the source node to `topic`.
    pub fn handle(&self, topic: impl Into<String>, handler: MsgHandler) -> SubscriptionKey {
        self.engine.handle(topic, &self.src, handler)
    }

    /// Run `function` off the loop. Tree mutations must go back through
    /// [`Context::dispatch`].
    pub fn spawn(&self, function: impl FnOnce() + Send + 'static) -> Result<(), EngineError> {
        self.engine.spawn(function)
    }

    pub fn page(&self) -> &dyn Page {
        self.engine.page()
    }

    pub fn local_storage(&self) -> &Arc<dyn Storage> {
        self.engine.local_storage()
    }

    pub fn session_storage(&self) -> &Arc<dyn Storage> {
        self.engine.session_storage()
    }

    pub fn resolve_static_resource(&self, path: &str) -> String {
        self.engine.resolve_static_resource(path)
    }

    pub fn runs_in_server(&self) -> bool {
        self.engine.runs_in_server()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("src", &self.src.id())
            .finish_non_exhaustive()
    }
}
