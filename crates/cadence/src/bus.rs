//! Topic-based message bus with garbage collection of dead subscribers.
//!
//! A subscription is keyed by (subscriber, handler) identity. The same
//! subscriber may register several handlers, and one handler may be shared by
//! several subscribers, without collision. Registering an existing key
//! replaces its handler.
//!
//! Entries are never removed explicitly. A subscriber that leaves the tree is
//! dropped the next time its topic is published, or by the periodic
//! [`MessageBus::prune`] pass.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::context::Context;
use crate::node::{upgrade_mounted, NodeId, NodeRef, WeakNode};
use crate::sync::lock;

/// Value carried by a published message.
pub type Payload = Arc<dyn Any + Send + Sync>;

type HandlerFn = dyn Fn(&Context, &Payload) + Send + Sync + 'static;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`MsgHandler`]. Clones of a handler share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// Composite identity of one registration under a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub subscriber: NodeId,
    pub handler: HandlerId,
}

/// A message handler with a stable identity.
#[derive(Clone)]
pub struct MsgHandler {
    id: HandlerId,
    function: Arc<HandlerFn>,
}

impl MsgHandler {
    pub fn new(function: impl Fn(&Context, &Payload) + Send + Sync + 'static) -> Self {
        Self {
            id: HandlerId(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed)),
            function: Arc::new(function),
        }
    }

    /// Handler for messages of type `T`. Messages of any other type are
    /// ignored.
    pub fn typed<T: Any>(function: impl Fn(&Context, &T) + Send + Sync + 'static) -> Self {
        Self::new(move |ctx, payload| match payload.downcast_ref::<T>() {
            Some(value) => function(ctx, value),
            None => trace!(
                expected = std::any::type_name::<T>(),
                "message payload type mismatch, handler skipped"
            ),
        })
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub(crate) fn call(&self, ctx: &Context, payload: &Payload) {
        (self.function)(ctx, payload);
    }
}

impl fmt::Debug for MsgHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsgHandler").field("id", &self.id).finish()
    }
}

struct Subscription {
    subscriber: WeakNode,
    handler: MsgHandler,
}

/// Registry of topic → subscriptions, guarded by its own lock.
#[derive(Default)]
pub struct MessageBus {
    topics: Mutex<HashMap<String, HashMap<SubscriptionKey, Subscription>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `subscriber` under `topic`, replacing any
    /// previous registration with the same key.
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        subscriber: &NodeRef,
        handler: MsgHandler,
    ) -> SubscriptionKey {
        let key = SubscriptionKey {
            subscriber: subscriber.id(),
            handler: handler.id(),
        };

        lock(&self.topics).entry(topic.into()).or_default().insert(
            key,
            Subscription {
                subscriber: Arc::downgrade(subscriber),
                handler,
            },
        );
        key
    }

    /// Live subscribers of `topic` with their handlers. Entries whose
    /// subscriber is gone are removed and not returned.
    ///
    /// The lock is released before returning, so callers can enqueue the
    /// deliveries without holding it.
    pub fn deliveries(&self, topic: &str) -> Vec<(NodeRef, MsgHandler)> {
        let mut topics = lock(&self.topics);
        let Some(subscriptions) = topics.get_mut(topic) else {
            return Vec::new();
        };

        let mut live = Vec::with_capacity(subscriptions.len());
        subscriptions.retain(|key, subscription| match upgrade_mounted(&subscription.subscriber) {
            Some(node) => {
                live.push((node, subscription.handler.clone()));
                true
            }
            None => {
                trace!(topic, subscriber = %key.subscriber, "dropping unmounted subscriber");
                false
            }
        });

        if subscriptions.is_empty() {
            topics.remove(topic);
        }
        live
    }

    /// Remove every subscription whose subscriber is no longer mounted.
    /// Returns the number of removed subscriptions.
    pub fn prune(&self) -> usize {
        let mut topics = lock(&self.topics);
        let mut removed = 0;

        topics.retain(|_, subscriptions| {
            let before = subscriptions.len();
            subscriptions
                .retain(|_, subscription| upgrade_mounted(&subscription.subscriber).is_some());
            removed += before - subscriptions.len();
            !subscriptions.is_empty()
        });

        if removed > 0 {
            debug!(removed, "pruned message handlers");
        }
        removed
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        lock(&self.topics).clear();
    }

    /// Number of subscriptions registered under `topic`, live or not.
    pub fn subscription_count(&self, topic: &str) -> usize {
        lock(&self.topics).get(topic).map_or(0, HashMap::len)
    }

    pub fn topic_count(&self) -> usize {
        lock(&self.topics).len()
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("topics", &self.topic_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use std::sync::atomic::AtomicBool;

    struct Leaf {
        id: NodeId,
        mounted: AtomicBool,
    }

    impl Node for Leaf {
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

    fn leaf() -> Arc<Leaf> {
        Arc::new(Leaf {
            id: NodeId::next(),
            mounted: AtomicBool::new(true),
        })
    }

    fn noop() -> MsgHandler {
        MsgHandler::new(|_, _| {})
    }

    #[test]
    fn same_key_replaces_instead_of_appending() {
        let bus = MessageBus::new();
        let node: NodeRef = leaf();
        let handler = noop();

        let first = bus.subscribe("x", &node, handler.clone());
        let second = bus.subscribe("x", &node, handler);
        assert_eq!(first, second);
        assert_eq!(bus.subscription_count("x"), 1);
    }

    #[test]
    fn handlers_and_subscribers_do_not_collide() {
        let bus = MessageBus::new();
        let a: NodeRef = leaf();
        let b: NodeRef = leaf();
        let shared = noop();

        bus.subscribe("x", &a, shared.clone());
        bus.subscribe("x", &b, shared);
        bus.subscribe("x", &a, noop());
        assert_eq!(bus.subscription_count("x"), 3);
        assert_eq!(bus.deliveries("x").len(), 3);
    }

    #[test]
    fn deliveries_drop_unmounted_subscribers() {
        let bus = MessageBus::new();
        let alive = leaf();
        let gone = leaf();
        bus.subscribe("x", &(alive.clone() as NodeRef), noop());
        bus.subscribe("x", &(gone.clone() as NodeRef), noop());

        gone.mounted.store(false, Ordering::SeqCst);
        let live = bus.deliveries("x");
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].0.id(), alive.id);
        assert_eq!(bus.subscription_count("x"), 1);
    }

    #[test]
    fn publishing_to_unknown_topic_is_empty() {
        let bus = MessageBus::new();
        assert!(bus.deliveries("x").is_empty());
        assert_eq!(bus.topic_count(), 0);
    }

    #[test]
    fn prune_removes_dead_entries_and_empty_topics() {
        let bus = MessageBus::new();
        let alive = leaf();
        let dropped = leaf();
        bus.subscribe("a", &(alive.clone() as NodeRef), noop());
        bus.subscribe("b", &(dropped.clone() as NodeRef), noop());
        bus.subscribe("b", &(alive.clone() as NodeRef), noop());
        drop(dropped);

        assert_eq!(bus.prune(), 1);
        assert_eq!(bus.topic_count(), 2);

        alive.mounted.store(false, Ordering::SeqCst);
        assert_eq!(bus.prune(), 2);
        assert_eq!(bus.topic_count(), 0);
    }
}
