//! Draining the queue: the synchronous drains and the continuous loop.

use std::future::Future;
use std::pin::pin;
use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, info_span, Instrument};

use crate::deferred::DeferredEvents;
use crate::engine::Engine;
use crate::error::{Diagnostics, EngineError};
use crate::event::Event;
use crate::queue::EventQueue;
use crate::scheduler::UpdateScheduler;
use crate::sync::lock;

/// State only the loop driver touches.
#[derive(Debug, Default)]
pub(crate) struct LoopState {
    scheduler: UpdateScheduler,
    deferred: DeferredEvents,
}

impl LoopState {
    pub(crate) fn diagnostics(&self, queue: &EventQueue) -> Diagnostics {
        Diagnostics {
            events_count: queue.len(),
            events_capacity: queue.capacity(),
            updates_count: self.scheduler.pending_len(),
            updates_queue_len: self.scheduler.batch_len(),
        }
    }

    /// Run a non-deferable event and schedule its source, or park a
    /// deferable one.
    fn process(&mut self, engine: &Engine, event: Event) -> Result<(), EngineError> {
        if event.deferable {
            self.deferred.push(event);
            return Ok(());
        }

        let op = event.op;
        let source = event.source.upgrade();
        if let Err(err) = event.run(engine) {
            let diagnostics = self.diagnostics(&engine.shared.queue);
            error!(op, %diagnostics, error = %err, "event failed");
            return Err(EngineError::structural(op, diagnostics, err));
        }

        if let Some(source) = source {
            self.scheduler.schedule(&source);
        }
        Ok(())
    }

    /// Flush pending updates, then run the deferred events against the
    /// updated tree.
    fn flush(&mut self, engine: &Engine) -> Result<(), EngineError> {
        let rendered = self.scheduler.flush().map_err(|source| {
            let diagnostics = self.diagnostics(&engine.shared.queue);
            error!(%diagnostics, error = %source, "component update failed");
            EngineError::structural("updating components", diagnostics, source)
        })?;

        let deferred = self.deferred.run_all(engine).map_err(|source| {
            let diagnostics = self.diagnostics(&engine.shared.queue);
            error!(%diagnostics, error = %source, "deferred event failed");
            EngineError::structural("running deferred events", diagnostics, source)
        })?;

        if rendered > 0 || deferred > 0 {
            debug!(rendered, deferred, "flushed updates");
        }
        Ok(())
    }
}

impl Engine {
    /// Process every queued event, then flush updates and deferred events.
    ///
    /// Returns once the queue is empty. Must not be called from inside an
    /// event function.
    pub fn consume(&self) -> Result<(), EngineError> {
        let mut state = lock(&self.shared.loop_state);
        while let Some(event) = self.shared.queue.try_pop() {
            state.process(self, event)?;
        }
        state.flush(self)
    }

    /// Process at most one queued event, then flush. Returns whether an
    /// event was processed.
    pub fn consume_next(&self) -> Result<bool, EngineError> {
        let mut state = lock(&self.shared.loop_state);
        let Some(event) = self.shared.queue.try_pop() else {
            return Ok(false);
        };
        state.process(self, event)?;
        state.flush(self)?;
        Ok(true)
    }

    /// Run the engine loop until `shutdown` resolves or the queue is closed.
    ///
    /// Initializes the engine if needed. Only the first call runs the loop;
    /// later calls return immediately. Events still queued when `shutdown`
    /// fires stay queued until [`Engine::close`] drops them.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<(), EngineError> {
        self.init()?;
        if !self.claim_start() {
            debug!("engine loop already started");
            return Ok(());
        }

        self.run_loop(shutdown)
            .instrument(info_span!("engine.run"))
            .await
    }

    async fn run_loop(&self, shutdown: impl Future<Output = ()>) -> Result<(), EngineError> {
        let config = &self.shared.config;
        let update_interval = config.update_interval();
        let idle_interval = config.idle_interval.max(update_interval);

        let mut current = update_interval;
        let mut updates = ticker(current);
        let mut prune = ticker(config.prune_interval.max(Duration::from_millis(1)));
        let mut shutdown = pin!(shutdown);

        info!(?update_interval, ?idle_interval, "engine loop started");

        loop {
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    info!(queued = self.shared.queue.len(), "engine loop cancelled");
                    return Ok(());
                }

                _ = updates.tick() => {
                    lock(&self.shared.loop_state).flush(self)?;

                    if self.shared.queue.is_empty() && current != idle_interval {
                        current = idle_interval;
                        updates = ticker(current);
                    }
                }

                _ = prune.tick() => {
                    self.shared.bus.prune();
                }

                received = self.shared.queue.pop() => {
                    let Some(event) = received else {
                        info!("event queue closed, engine loop exiting");
                        return Ok(());
                    };

                    if current != update_interval {
                        current = update_interval;
                        updates = ticker(current);
                    }

                    lock(&self.shared.loop_state).process(self, event)?;
                }
            }
        }
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
