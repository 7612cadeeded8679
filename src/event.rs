//! Engine lifecycle events.
//!
//! A simplified cousin of the teacher's `store::event` (`StoreEvents` +
//! listener registration), trimmed to a plain closure list since the core
//! engine has no need for the teacher's full `basu`-backed event bus.

use parking_lot::Mutex;
use std::sync::Arc;

/// Lifecycle events fired by [`crate::engine::Engine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A MemTable was flushed to a new shard, identified by filename.
    Flushed { table_id: u64, shard_filename: String },
    /// A compaction replaced `input` shards with `output`.
    Compacted { table_id: u64, input: Vec<String>, output: String },
    /// WAL replay completed during open; `replayed` records were re-applied.
    Recovered { table_id: u64, replayed: u64 },
    /// A new manifest version was published.
    ManifestPublished { global_max_lsn: u64 },
}

type Listener = Box<dyn Fn(&EngineEvent) + Send + Sync>;

/// Registry of event listeners, notified synchronously and in registration
/// order. Registering a listener is the only mutation; there is no
/// unsubscribe, matching the teacher's append-only listener list.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus { listeners: Mutex::new(Vec::new()) }
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Box::new(listener));
    }

    pub fn publish(&self, event: EngineEvent) {
        for listener in self.listeners.lock().iter() {
            listener(&event);
        }
    }
}

/// Shareable handle to an [`EventBus`], cloned into every component that
/// needs to fire events.
pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn listeners_fire_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        bus.subscribe(move |ev| seen2.lock().push(ev.clone()));

        bus.publish(EngineEvent::Recovered { table_id: 1, replayed: 3 });
        bus.publish(EngineEvent::ManifestPublished { global_max_lsn: 7 });

        let log = seen.lock();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], EngineEvent::Recovered { table_id: 1, replayed: 3 });
    }

    #[test]
    fn no_listeners_is_a_no_op() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _ = count.load(Ordering::Relaxed);
        bus.publish(EngineEvent::Flushed { table_id: 0, shard_filename: "x".into() });
    }
}
