//! The bounded event queue: the single serialization point for tree mutations.
//!
//! Producers on any thread block in [`EventQueue::push`] while the queue is
//! full. That is the engine's backpressure: a flooding caller is slowed down,
//! its events are never dropped.

use std::sync::Mutex;

use flume::{Receiver, Sender};

use crate::event::Event;
use crate::sync::lock;

pub(crate) struct EventQueue {
    sender: Mutex<Option<Sender<Event>>>,
    receiver: Receiver<Event>,
    capacity: usize,
}

impl EventQueue {
    pub(crate) fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = flume::bounded(capacity);
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            capacity,
        }
    }

    /// Enqueue an event, blocking while the queue is full. Returns `false`
    /// once the queue has been closed.
    pub(crate) fn push(&self, event: Event) -> bool {
        // Clone the sender out so a blocked producer never holds the lock.
        let Some(sender) = lock(&self.sender).clone() else {
            return false;
        };
        sender.send(event).is_ok()
    }

    pub(crate) fn try_pop(&self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }

    /// Wait for the next event. `None` once the queue is closed and empty.
    pub(crate) async fn pop(&self) -> Option<Event> {
        self.receiver.recv_async().await.ok()
    }

    pub(crate) fn len(&self) -> usize {
        self.receiver.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn is_closed(&self) -> bool {
        lock(&self.sender).is_none()
    }

    /// Stop accepting events and drop whatever is still queued. Returns the
    /// number of dropped events.
    pub(crate) fn close(&self) -> usize {
        drop(lock(&self.sender).take());
        self.receiver.drain().count()
    }
}
