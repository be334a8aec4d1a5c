//! # Snapshot slots
//!
//! A [Latest] holds the most recent value produced by a single task and read by any number of consumers. Values are
//! stored behind an [Arc] and replaced whole, so a reader always sees a complete snapshot and never waits for the
//! writer.

use std::sync::Arc;

use tokio::sync::watch;

/// # Most recent value slot
///
/// Cloning a [Latest] gives another handle to the same slot.
#[derive(Debug)]
pub struct Latest<T> {
    sender: Arc<watch::Sender<Option<Arc<T>>>>,
}

impl<T> Clone for Latest<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> Default for Latest<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Latest<T> {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Replace the current value
    pub fn publish(&self, value: T) {
        self.publish_arc(Arc::new(value));
    }

    pub fn publish_arc(&self, value: Arc<T>) {
        self.sender.send_replace(Some(value));
    }

    /// The current value, `None` until something has been published
    pub fn get(&self) -> Option<Arc<T>> {
        self.sender.borrow().clone()
    }

    /// Watch the slot for new values
    ///
    /// The receiver sees the current value as already seen, [watch::Receiver::changed()] resolves on the next
    /// publish.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<T>>> {
        self.sender.subscribe()
    }
}
