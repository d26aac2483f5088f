use std::sync::{Arc, Mutex};

use harvd_domain::{HistoryEntry, TimestampedHistory};
use harvd_events::{Event, EventBus, EventKind, ListenerId};

const EVENT_LOG_CAPACITY: usize = 100;

/// Bounded in-memory record of recent bus events, for the `/events`
/// inspection endpoint. Oldest entries fall off; nothing is persisted.
pub struct EventLog {
    history: Mutex<TimestampedHistory<Event>>,
    bus: EventBus,
    listeners: Mutex<Vec<(EventKind, ListenerId)>>,
}

impl EventLog {
    pub fn new(bus: EventBus) -> Self {
        Self {
            // The seed value is only the empty-history default and is
            // never surfaced; entries are read through `recent()`.
            history: Mutex::new(TimestampedHistory::new(
                Event::StartHarvest,
                EVENT_LOG_CAPACITY,
            )),
            bus,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Observe every event kind on the bus.
    pub fn attach(self: Arc<Self>) {
        let mut collected = Vec::new();
        for kind in EventKind::ALL {
            let log = Arc::clone(&self);
            let id = self.bus.add_listener(kind, move |event| {
                log.history
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .add_value(event.clone());
            });
            collected.push((kind, id));
        }
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(collected);
    }

    pub fn detach(&self) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for (kind, id) in listeners.drain(..) {
            self.bus.remove_listener(kind, id);
        }
    }

    /// Recorded events, oldest first.
    pub fn recent(&self) -> Vec<HistoryEntry<Event>> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .to_vec()
    }

    pub fn len(&self) -> usize {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
