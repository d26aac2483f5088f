use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::event::{Event, EventKind};
use crate::query::{Answer, Query, QueryKind};

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;
type Responder = Arc<dyn Fn(&Query) -> Answer + Send + Sync>;

/// Token returned by [`EventBus::add_listener`], used to detach that
/// registration again. Each registration gets its own id, so the same
/// closure registered twice is invoked twice and removed one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registries {
    listeners: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
    responders: HashMap<QueryKind, Responder>,
}

/// Decoupled pub/sub and request/response between service components.
///
/// Sends are synchronous: every listener runs on the sender's thread,
/// in registration order. The registry lock is released before any
/// callback is invoked, so listeners may freely call back into the bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<RwLock<Registries>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Asynchronous events ───────────────────────────────────────────────────

    /// Register `listener` for events of `kind`. Registrations are not
    /// deduplicated: adding the same closure twice means two invocations.
    pub fn add_listener<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .listeners
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Detach one registration. Unknown ids are ignored.
    pub fn remove_listener(&self, kind: EventKind, id: ListenerId) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = inner.listeners.get_mut(&kind) {
            list.retain(|(lid, _)| *lid != id);
        }
    }

    /// Detach every listener registered for `kind`.
    pub fn remove_all_listeners(&self, kind: EventKind) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.listeners.remove(&kind);
    }

    /// Deliver `event` to all listeners of its kind, in registration
    /// order, on the calling thread.
    pub fn send(&self, event: &Event) {
        // Snapshot under the read lock; invoke outside it.
        let snapshot: Vec<Listener> = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            match inner.listeners.get(&event.kind()) {
                Some(list) => list.iter().map(|(_, l)| Arc::clone(l)).collect(),
                None => Vec::new(),
            }
        };
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn has_listeners(&self) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.listeners.values().any(|l| !l.is_empty())
    }

    // ── Synchronous queries ───────────────────────────────────────────────────

    /// Register the single responder for `kind`, replacing any previous
    /// one.
    pub fn add_responder<F>(&self, kind: QueryKind, responder: F)
    where
        F: Fn(&Query) -> Answer + Send + Sync + 'static,
    {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.responders.insert(kind, Arc::new(responder));
    }

    pub fn remove_responder(&self, kind: QueryKind) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.responders.remove(&kind);
    }

    /// Run the registered responder for this query. `None` when no
    /// responder is registered.
    pub fn query(&self, query: &Query) -> Option<Answer> {
        let responder: Option<Responder> = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            inner.responders.get(&query.kind()).cloned()
        };
        responder.map(|r| r(query))
    }

    pub fn has_responders(&self) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        !inner.responders.is_empty()
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// Clear both registries.
    pub fn reset(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.listeners.clear();
        inner.responders.clear();
    }
}
