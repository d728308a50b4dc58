//! The engine: composition root and public surface.
//!
//! ```text
//! any thread ── dispatch / defer / post / spawn ──► EventQueue (bounded)
//!                                                       │
//!                         consume() / run() ◄───────────┘
//!                               │
//!         non-deferable ──► run now ──► UpdateScheduler::schedule(source)
//!         deferable     ──► DeferredEvents
//!                               │
//!                  tick / drain ──► flush updates ──► run deferred
//! ```
//!
//! All tree mutation happens on whichever caller currently drives the loop
//! (`run`, `consume`, `consume_next` or `close`). The loop state sits behind
//! a lock only so that those entry points can be called from any thread; it
//! is never contended by producers.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use tracing::{debug, info, trace};
use url::Url;

use crate::bus::{MessageBus, MsgHandler, Payload, SubscriptionKey};
use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::{Diagnostics, EngineError};
use crate::event::{Event, Job};
use crate::inflight::InflightTracker;
use crate::node::{ancestors, Body, NodeRef};
use crate::page::{Page, RequestPage};
use crate::queue::EventQueue;
use crate::runtime::LoopState;
use crate::storage::{MemoryStorage, Storage};
use crate::sync::{lock, read, write};

/// Maps a static resource path to the URL it is served from.
pub type StaticResolver = Arc<dyn Fn(&str) -> String + Send + Sync + 'static>;

/// Lifecycle of an engine. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Built, body not mounted yet.
    Uninitialized,
    /// Body mounted, loop not started.
    Ready,
    /// The continuous loop has been started.
    Running,
    /// Closed; every operation is a no-op.
    Closed,
}

pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) phase: Mutex<Phase>,
    /// Held by the closing caller for the whole teardown.
    teardown: Mutex<()>,
    pub(crate) queue: EventQueue,
    pub(crate) bus: MessageBus,
    pub(crate) inflight: Arc<InflightTracker>,
    pub(crate) loop_state: Mutex<LoopState>,
    body: RwLock<Option<Arc<dyn Body>>>,
    mounted_once: AtomicBool,
    page: Arc<dyn Page>,
    local_storage: Arc<dyn Storage>,
    session_storage: Arc<dyn Storage>,
    resolve_static: StaticResolver,
}

/// Handle to an engine. Cheap to clone; every clone drives the same engine.
#[derive(Clone)]
pub struct Engine {
    pub(crate) shared: Arc<Shared>,
}

impl Engine {
    pub fn builder(body: Arc<dyn Body>) -> EngineBuilder {
        EngineBuilder::new(body)
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Mount the body and move to [`Phase::Ready`]. Runs at most once; later
    /// and concurrent calls wait for the first and return `Ok`.
    pub fn init(&self) -> Result<(), EngineError> {
        let mut phase = lock(&self.shared.phase);
        if *phase != Phase::Uninitialized {
            return Ok(());
        }

        if let Some(body) = self.body_handle() {
            body.mount().map_err(|source| {
                let diagnostics = Diagnostics {
                    events_count: self.shared.queue.len(),
                    events_capacity: self.shared.queue.capacity(),
                    ..Diagnostics::default()
                };
                EngineError::structural("mounting engine body", diagnostics, source)
            })?;
        }

        *phase = Phase::Ready;
        info!(
            update_rate = self.shared.config.update_rate,
            queue_capacity = self.shared.queue.capacity(),
            "engine initialized"
        );
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        *lock(&self.shared.phase)
    }

    /// Claim the `Ready → Running` transition. `false` if the loop was
    /// already started or the engine is closed.
    pub(crate) fn claim_start(&self) -> bool {
        let mut phase = lock(&self.shared.phase);
        if *phase != Phase::Ready {
            return false;
        }
        *phase = Phase::Running;
        true
    }

    /// Shut the engine down.
    ///
    /// Drains the queue one last time, waits for spawned work, tears down the
    /// message bus, dismounts the body and closes the queue. Only the first
    /// call does any of this; concurrent callers block until it has finished.
    /// A structural error from the final drain is returned, to the first
    /// caller only, after the teardown has completed.
    ///
    /// Must not be called from inside an event function or spawned work.
    pub fn close(&self) -> Result<(), EngineError> {
        let _teardown = {
            let mut phase = lock(&self.shared.phase);
            if *phase == Phase::Closed {
                drop(phase);
                drop(lock(&self.shared.teardown));
                return Ok(());
            }
            // Taken before the phase lock is released, so any caller that
            // sees `Closed` waits for this teardown.
            let teardown = lock(&self.shared.teardown);
            *phase = Phase::Closed;
            teardown
        };

        info!("closing engine");
        let drained = self.consume();
        self.wait();

        self.shared.bus.prune();
        self.shared.bus.clear();

        if let Some(body) = write(&self.shared.body).take() {
            body.dismount();
        }

        let dropped = self.shared.queue.close();
        info!(dropped, "engine closed");
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == Phase::Closed
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    /// Queue `function` to run against `src` on the loop, then re-render the
    /// component enclosing `src`.
    ///
    /// No-op when `src` is not mounted. Blocks while the queue is full, so
    /// event functions running on the loop must not flood it.
    pub fn dispatch(&self, src: &NodeRef, function: impl FnOnce(&Context) + Send + 'static) {
        self.enqueue("dispatch", src, false, Some(infallible(function)));
    }

    /// Queue `function` to run against `src` after the next update flush.
    ///
    /// No-op when `src` is not mounted. Blocks while the queue is full.
    pub fn defer(&self, src: &NodeRef, function: impl FnOnce(&Context) + Send + 'static) {
        self.enqueue("defer", src, true, Some(infallible(function)));
    }

    /// Run `function` right now, then schedule a re-render of every component
    /// above the one enclosing `src`.
    ///
    /// The enclosing component itself is not rescheduled: `emit` is meant to
    /// be called from that component's own render or event handling, which
    /// already picks up the change. Use [`Engine::dispatch`] from anywhere
    /// else.
    pub fn emit(&self, src: &NodeRef, function: impl FnOnce()) {
        if !src.mounted() {
            return;
        }

        function();

        let composers = ancestors(src.clone()).filter(|node| node.as_composer().is_some());
        for composer in composers.skip(1) {
            self.enqueue("emit", &composer, false, None);
        }
    }

    pub(crate) fn enqueue(
        &self,
        op: &'static str,
        src: &NodeRef,
        deferable: bool,
        function: Option<Job>,
    ) {
        if !src.mounted() {
            trace!(op, source = %src.id(), "source unmounted, event not queued");
            return;
        }

        let event = Event {
            op,
            source: Arc::downgrade(src),
            source_id: src.id(),
            deferable,
            function,
        };
        if !self.shared.queue.push(event) {
            trace!(op, source = %src.id(), "queue closed, event dropped");
        }
    }

    // ---------------------------------------------------------------------
    // Messages
    // ---------------------------------------------------------------------

    /// Subscribe `src` to `topic`. Registering the same (node, handler) pair
    /// again replaces the previous registration.
    pub fn handle(
        &self,
        topic: impl Into<String>,
        src: &NodeRef,
        handler: MsgHandler,
    ) -> SubscriptionKey {
        self.shared.bus.subscribe(topic, src, handler)
    }

    /// Publish `value` on `topic`. Each live subscriber's handler is
    /// dispatched through the queue with that subscriber as its source.
    pub fn post<T: Any + Send + Sync>(&self, topic: &str, value: T) {
        let deliveries = self.shared.bus.deliveries(topic);
        if deliveries.is_empty() {
            trace!(topic, "no subscribers");
            return;
        }

        let payload: Payload = Arc::new(value);
        for (subscriber, handler) in deliveries {
            let payload = Arc::clone(&payload);
            self.enqueue(
                "post",
                &subscriber,
                false,
                Some(infallible(move |ctx| handler.call(ctx, &payload))),
            );
        }
    }

    pub fn bus(&self) -> &MessageBus {
        &self.shared.bus
    }

    // ---------------------------------------------------------------------
    // Async work
    // ---------------------------------------------------------------------

    /// Run `function` on its own thread. [`Engine::wait`] and
    /// [`Engine::close`] block until it has returned.
    pub fn spawn(&self, function: impl FnOnce() + Send + 'static) -> Result<(), EngineError> {
        let guard = self.shared.inflight.begin();
        thread::Builder::new()
            .name("cadence-async".into())
            .spawn(move || {
                let _guard = guard;
                function();
            })?;
        Ok(())
    }

    /// Block until all spawned work has finished.
    pub fn wait(&self) {
        self.shared.inflight.wait();
    }

    pub fn inflight(&self) -> usize {
        self.shared.inflight.count()
    }

    // ---------------------------------------------------------------------
    // Body notifications
    // ---------------------------------------------------------------------

    /// Mount `node` as the body's content.
    ///
    /// The first mount replaces the placeholder child. Later mounts patch the
    /// existing content and fall back to a wholesale replacement when the
    /// kinds differ. Any other failure is fatal.
    pub fn mount(&self, node: NodeRef) {
        let Some(body) = self.body_handle() else {
            return;
        };
        let engine = self.clone();
        let target: Arc<dyn Body> = Arc::clone(&body);

        self.enqueue(
            "mounting ui element",
            &(body as NodeRef),
            false,
            Some(Box::new(move |_ctx| {
                if !engine.shared.mounted_once.load(Ordering::Acquire) {
                    target.replace_child_at(0, node)?;
                    engine.shared.mounted_once.store(true, Ordering::Release);
                    return Ok(());
                }

                match target.update_child_at(0, Arc::clone(&node)) {
                    Ok(()) => Ok(()),
                    Err(err) if err.is_replace() => {
                        debug!("content kind changed, replacing");
                        target.replace_child_at(0, node)
                    }
                    Err(err) => Err(err),
                }
            })),
        );
    }

    pub fn pre_render(&self) {
        self.notify_body("pre_render", |body, page| body.pre_render(page));
    }

    /// Record `url` as the current page URL and notify the body.
    pub fn nav(&self, url: &Url) {
        self.shared.page.replace_url(url);
        let url = url.clone();
        self.notify_body("nav", move |body, _| body.on_nav(&url));
    }

    pub fn app_update(&self) {
        self.notify_body("app_update", |body, _| body.on_app_update());
    }

    pub fn app_resize(&self) {
        self.notify_body("app_resize", |body, _| body.on_resize());
    }

    fn notify_body(
        &self,
        op: &'static str,
        notify: impl FnOnce(&dyn Body, &dyn Page) + Send + 'static,
    ) {
        let Some(body) = self.body_handle() else {
            return;
        };
        let target = Arc::clone(&body);
        let page = Arc::clone(&self.shared.page);

        self.enqueue(
            op,
            &(body as NodeRef),
            false,
            Some(infallible(move |_| notify(target.as_ref(), page.as_ref()))),
        );
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    /// The body as a tree node; `None` once the engine is closed.
    pub fn body(&self) -> Option<NodeRef> {
        self.body_handle().map(|body| body as NodeRef)
    }

    fn body_handle(&self) -> Option<Arc<dyn Body>> {
        read(&self.shared.body).clone()
    }

    /// A context rooted at the body.
    pub fn context(&self) -> Option<Context> {
        self.body().map(|body| Context::new(body, self.clone()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn page(&self) -> &dyn Page {
        self.shared.page.as_ref()
    }

    pub fn local_storage(&self) -> &Arc<dyn Storage> {
        &self.shared.local_storage
    }

    pub fn session_storage(&self) -> &Arc<dyn Storage> {
        &self.shared.session_storage
    }

    pub fn resolve_static_resource(&self, path: &str) -> String {
        (self.shared.resolve_static)(path)
    }

    pub fn runs_in_server(&self) -> bool {
        self.shared.config.runs_in_server
    }

    /// Snapshot of queue and scheduler sizes.
    ///
    /// Takes the loop lock: do not call from inside an event function.
    pub fn diagnostics(&self) -> Diagnostics {
        lock(&self.shared.loop_state).diagnostics(&self.shared.queue)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("phase", &self.phase())
            .field("queued", &self.shared.queue.len())
            .field("closed_queue", &self.shared.queue.is_closed())
            .finish_non_exhaustive()
    }
}

fn infallible(function: impl FnOnce(&Context) + Send + 'static) -> Job {
    Box::new(move |ctx| {
        function(ctx);
        Ok(())
    })
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    body: Arc<dyn Body>,
    config: EngineConfig,
    page: Option<Arc<dyn Page>>,
    local_storage: Option<Arc<dyn Storage>>,
    session_storage: Option<Arc<dyn Storage>>,
    resolve_static: Option<StaticResolver>,
}

impl EngineBuilder {
    pub fn new(body: Arc<dyn Body>) -> Self {
        Self {
            body,
            config: EngineConfig::default(),
            page: None,
            local_storage: None,
            session_storage: None,
            resolve_static: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Update flushes per second under load. `0` keeps the default.
    pub fn with_update_rate(mut self, rate: u32) -> Self {
        self.config.update_rate = rate;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn with_page(mut self, page: Arc<dyn Page>) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_local_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.local_storage = Some(storage);
        self
    }

    pub fn with_session_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.session_storage = Some(storage);
        self
    }

    pub fn with_static_resolver(
        mut self,
        resolve: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.resolve_static = Some(Arc::new(resolve));
        self
    }

    pub fn runs_in_server(mut self, runs_in_server: bool) -> Self {
        self.config.runs_in_server = runs_in_server;
        self
    }

    /// Build the engine in [`Phase::Uninitialized`].
    pub fn build(self) -> Engine {
        let queue = EventQueue::bounded(self.config.queue_capacity());

        Engine {
            shared: Arc::new(Shared {
                phase: Mutex::new(Phase::Uninitialized),
                teardown: Mutex::new(()),
                queue,
                bus: MessageBus::new(),
                inflight: InflightTracker::new(),
                loop_state: Mutex::new(LoopState::default()),
                body: RwLock::new(Some(self.body)),
                mounted_once: AtomicBool::new(false),
                page: self
                    .page
                    .unwrap_or_else(|| Arc::new(RequestPage::default())),
                local_storage: self
                    .local_storage
                    .unwrap_or_else(|| Arc::new(MemoryStorage::new())),
                session_storage: self
                    .session_storage
                    .unwrap_or_else(|| Arc::new(MemoryStorage::new())),
                resolve_static: self
                    .resolve_static
                    .unwrap_or_else(|| Arc::new(|path: &str| path.to_string())),
                config: self.config,
            }),
        }
    }
}
