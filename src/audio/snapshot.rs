use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::trace;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::analysis::AudioAnalysis;

/// Per-subscriber buffer used by [`Publisher::subscribe`].
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 16;

/// Most recent analysis, written by the analysis lane and read by anyone.
///
/// Writers swap in a whole `Arc`, so readers always see a complete
/// snapshot and never hold the lock while using it.
#[derive(Clone)]
pub struct LatestAnalysis {
    inner: Arc<RwLock<Arc<AudioAnalysis>>>,
}

impl Default for LatestAnalysis {
    fn default() -> Self {
        Self::new()
    }
}

impl LatestAnalysis {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(AudioAnalysis::minimal(0.0)))),
        }
    }

    pub fn store(&self, analysis: Arc<AudioAnalysis>) {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *slot = analysis;
    }

    pub fn load(&self) -> Arc<AudioAnalysis> {
        let slot = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&slot)
    }
}

/// Fan-out of events to any number of subscribers.
///
/// Each subscriber gets a bounded channel. Delivery follows subscription
/// order and is at most once: a subscriber whose buffer is full misses the
/// event, and one whose receiver was dropped is removed.
pub struct Publisher<T> {
    subscribers: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Publisher<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Receiver<T> {
        self.subscribe_with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn subscribe_with_capacity(&self, capacity: usize) -> Receiver<T> {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }

    /// Deliver `event` to every live subscriber, returning how many received it.
    pub fn publish(&self, event: T) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;

        subscribers.retain(|sender| match sender.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                trace!("Subscriber buffer full, event skipped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub type AnalysisPublisher = Publisher<Arc<AudioAnalysis>>;
