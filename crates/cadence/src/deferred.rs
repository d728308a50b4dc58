//! Events parked until after the next update flush.

use crate::engine::Engine;
use crate::error::TreeError;
use crate::event::Event;

/// FIFO buffer of deferrable events.
///
/// Drained right after every update flush, so deferred work observes the
/// tree as this cycle's re-renders left it.
#[derive(Debug, Default)]
pub(crate) struct DeferredEvents {
    events: Vec<Event>,
}

impl DeferredEvents {
    pub(crate) fn push(&mut self, event: Event) {
        debug_assert!(event.deferable, "only deferable events are parked");
        self.events.push(event);
    }

    /// Run every parked event whose source is still mounted, in arrival order.
    /// Returns how many events were drained.
    pub(crate) fn run_all(&mut self, engine: &Engine) -> Result<usize, TreeError> {
        let drained = self.events.len();
        for event in self.events.drain(..) {
            event.run(engine)?;
        }
        Ok(drained)
    }
}
