//! # Cadence
//!
//! The event and update scheduler behind a component tree: one owner, one
//! queue, batched re-renders.
//!
//! ## Core Concepts
//!
//! - Every tree mutation is an **event** travelling through one bounded queue.
//! - Running an event schedules the **composer** (component boundary)
//!   enclosing its source for re-render. Scheduling is deduplicated.
//! - Re-renders are **flushed** in batches, root-closest first, so a parent
//!   that replaces its subtree makes the children's stale updates disappear.
//! - **Deferred** events run right after a flush and see the updated tree.
//! - A **message bus** fans published values out to subscribers through the
//!   same queue, and forgets subscribers that left the tree.
//!
//! ## Architecture
//!
//! ```text
//! dispatch / defer / post (any thread)
//!     │
//!     ▼
//! EventQueue (bounded, blocks when full)
//!     │
//!     ▼ run() loop / consume()
//! ┌───────────────────────────────────────┐
//! │ event.deferable?                      │
//! │   no  ─► run ─► UpdateScheduler       │
//! │   yes ─► DeferredEvents               │
//! └───────────────────────────────────────┘
//!     │ tick (60/s under load, idle otherwise)
//!     ▼
//! flush updates (by depth) ─► run deferred events
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One writer** - tree mutation only happens on the loop driver
//! 2. **At most once** - an event runs once, and only if its source is still mounted
//! 3. **Dedup** - a composer is pending at most once per flush
//! 4. **Root first** - flush order follows depth from the root
//! 5. **Backpressure** - a full queue blocks producers, it never drops work
//! 6. **Structural errors are fatal** - they surface with diagnostics, never repaired
//!
//! ## Example
//!
//! ```ignore
//! use cadence_core::{Engine, MsgHandler};
//!
//! let engine = Engine::builder(body).with_update_rate(30).build();
//! engine.init()?;
//!
//! engine.handle("cart", &cart_badge, MsgHandler::typed(|ctx, count: &u32| {
//!     // runs on the loop, with the badge as ctx.src()
//! }));
//!
//! engine.dispatch(&button, |ctx| {
//!     ctx.post("cart", 3u32);
//! });
//!
//! tokio::spawn({
//!     let engine = engine.clone();
//!     async move { engine.run(shutdown_signal()).await }
//! });
//! ```

mod bus;
mod config;
mod context;
mod deferred;
mod engine;
mod error;
mod event;
mod inflight;
mod node;
mod page;
mod queue;
mod runtime;
mod scheduler;
mod storage;
mod sync;

// Re-export node contracts
pub use node::{ancestors, Ancestors, Body, Composer, Node, NodeId, NodeRef, WeakNode};

// Re-export engine types (primary entry point)
pub use engine::{Engine, EngineBuilder, Phase, StaticResolver};

// Re-export config
pub use config::{EngineConfig, DEFAULT_QUEUE_CAPACITY, DEFAULT_UPDATE_RATE};

// Re-export context
pub use context::Context;

// Re-export bus types
pub use bus::{HandlerId, MessageBus, MsgHandler, Payload, SubscriptionKey};

// Re-export error types
pub use error::{Diagnostics, EngineError, StorageError, TreeError};

// Re-export async tracking
pub use inflight::{InflightGuard, InflightTracker};

// Re-export collaborators
pub use page::{Page, RequestPage, DEFAULT_PAGE_URL};
pub use storage::{MemoryStorage, Storage};

// Re-export commonly used external types
pub use url::Url;
