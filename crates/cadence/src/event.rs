//! Units of work flowing through the engine queue.

use std::fmt;

use tracing::trace;

use crate::context::Context;
use crate::engine::Engine;
use crate::error::TreeError;
use crate::node::{upgrade_mounted, NodeId, WeakNode};

/// Work attached to an event. Only engine-internal jobs (mounting) can fail.
pub(crate) type Job = Box<dyn FnOnce(&Context) -> Result<(), TreeError> + Send + 'static>;

/// A unit of work targeting a tree node.
///
/// The event never owns its source. Whether the source is still mounted is
/// checked right before the function runs, not when the event is queued.
pub(crate) struct Event {
    /// What produced the event; used for logs and error context.
    pub(crate) op: &'static str,
    pub(crate) source: WeakNode,
    pub(crate) source_id: NodeId,
    pub(crate) deferable: bool,
    pub(crate) function: Option<Job>,
}

impl Event {
    /// Run the event against its source. Consumes the event, so it runs at
    /// most once. An unmounted source is skipped silently.
    pub(crate) fn run(self, engine: &Engine) -> Result<(), TreeError> {
        let Some(source) = upgrade_mounted(&self.source) else {
            trace!(op = self.op, source = %self.source_id, "source unmounted, event dropped");
            return Ok(());
        };

        match self.function {
            Some(function) => function(&Context::new(source, engine.clone())),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("op", &self.op)
            .field("source", &self.source_id)
            .field("deferable", &self.deferable)
            .field("has_function", &self.function.is_some())
            .finish()
    }
}
