//! Bounded, non-blocking publish/subscribe.
//!
//! Publishing appends an activity entry to a 100-slot ring (oldest
//! overwritten) and hands the event to every subscriber over a bounded
//! channel. Delivery is best-effort from the publisher's thread: a
//! subscriber that cannot keep up has events dropped rather than
//! back-pressuring the publisher.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::protocol::BusEvent;
use hm_core::types::ActivityEntry;

/// Ring capacity for the activity feed.
pub const ACTIVITY_RING_CAP: usize = 100;

/// Per-subscriber buffered events before the bus starts dropping.
const SUBSCRIBER_BUFFER: usize = 256;

/// An event paired with the activity entry minted for it.
#[derive(Debug, Clone)]
pub struct Published {
    pub event: BusEvent,
    pub entry: ActivityEntry,
}

struct BusInner {
    subscribers: Mutex<Vec<flume::Sender<Arc<Published>>>>,
    activity: Mutex<VecDeque<ActivityEntry>>,
    next_id: AtomicU64,
}

/// Cheaply clonable handle to the process-wide event bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                activity: Mutex::new(VecDeque::with_capacity(ACTIVITY_RING_CAP)),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a subscriber; it receives every event published from this
    /// point forward, minus any it was too slow to drain.
    pub fn subscribe(&self) -> flume::Receiver<Arc<Published>> {
        let (tx, rx) = flume::bounded(SUBSCRIBER_BUFFER);
        self.inner
            .subscribers
            .lock()
            .expect("EventBus lock poisoned")
            .push(tx);
        rx
    }

    /// Publish an event: mint an activity entry, append it to the ring,
    /// and fan out without ever blocking. Disconnected subscribers are
    /// pruned; full subscribers lose this event.
    pub fn publish(&self, event: BusEvent) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = event.to_activity(id);

        {
            let mut ring = self.inner.activity.lock().expect("EventBus lock poisoned");
            if ring.len() == ACTIVITY_RING_CAP {
                ring.pop_front();
            }
            ring.push_back(entry.clone());
        }

        let published = Arc::new(Published { event, entry });
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .expect("EventBus lock poisoned");
        subscribers.retain(|tx| match tx.try_send(Arc::clone(&published)) {
            Ok(()) => true,
            Err(flume::TrySendError::Full(_)) => {
                debug!(tag = published.event.tag(), "slow subscriber, event dropped");
                true
            }
            Err(flume::TrySendError::Disconnected(_)) => false,
        });
    }

    /// The newest `n` activity entries, oldest first.
    pub fn recent_activity(&self, n: usize) -> Vec<ActivityEntry> {
        let ring = self.inner.activity.lock().expect("EventBus lock poisoned");
        let skip = ring.len().saturating_sub(n);
        ring.iter().skip(skip).cloned().collect()
    }

    /// Number of currently connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .expect("EventBus lock poisoned")
            .len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
