use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Callback attached directly to an [`EventSource`]
pub type Listener = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Called with `(event, args)` for every emission, whether or not the event
/// has listeners
pub type Tap = Arc<dyn Fn(&str, &[Value]) + Send + Sync>;

/// Handle returned when attaching a listener, used to detach it again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Entry {
    id: ListenerId,
    once: bool,
    listener: Listener,
}

/// A plain named-event emitter
///
/// Listeners for one event are called in the order they were attached.
/// The listener table is not locked while listeners run, so a listener may
/// emit further events on the same source. Taps run before any listener.
pub struct EventSource {
    listeners: Mutex<HashMap<String, Vec<Entry>>>,
    taps: RwLock<Vec<(ListenerId, Tap)>>,
    next_id: AtomicU64,
}

impl EventSource {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            taps: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Attach a listener that is called for every emission of `event`
    pub fn on(&self, event: impl Into<String>, listener: Listener) -> ListenerId {
        self.attach(event.into(), listener, false)
    }

    /// Attach a listener that is detached after its first call
    pub fn once(&self, event: impl Into<String>, listener: Listener) -> ListenerId {
        self.attach(event.into(), listener, true)
    }

    /// Detach a listener. Returns false if it was not attached.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(entries) = listeners.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Attach a tap that sees every emission on this source
    pub fn tap(&self, tap: Tap) -> ListenerId {
        let id = self.next_id();
        self.taps.write().push((id, tap));
        id
    }

    /// Detach a tap. Returns false if it was not attached.
    pub fn untap(&self, id: ListenerId) -> bool {
        let mut taps = self.taps.write();
        let before = taps.len();
        taps.retain(|(tap_id, _)| *tap_id != id);
        taps.len() != before
    }

    pub fn tap_count(&self) -> usize {
        self.taps.read().len()
    }

    /// Number of listeners currently attached to `event`
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .lock()
            .get(event)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    /// Run every tap, then call every listener attached to `event`
    ///
    /// Returns true if the event had listeners.
    pub fn emit(&self, event: &str, args: &[Value]) -> bool {
        let taps: Vec<Tap> = self.taps.read().iter().map(|(_, tap)| tap.clone()).collect();
        for tap in &taps {
            tap(event, args);
        }

        let to_call: Vec<Listener> = {
            let mut listeners = self.listeners.lock();
            let Some(entries) = listeners.get_mut(event) else {
                return false;
            };
            let to_call = entries.iter().map(|e| e.listener.clone()).collect();
            entries.retain(|entry| !entry.once);
            if entries.is_empty() {
                listeners.remove(event);
            }
            to_call
        };

        for listener in &to_call {
            listener(args);
        }
        !to_call.is_empty()
    }

    fn attach(&self, event: String, listener: Listener, once: bool) -> ListenerId {
        let id = self.next_id();
        self.listeners.lock().entry(event).or_default().push(Entry {
            id,
            once,
            listener,
        });
        id
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for EventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.lock();
        f.debug_struct("EventSource")
            .field("events", &listeners.keys().collect::<Vec<_>>())
            .field("taps", &self.tap_count())
            .finish()
    }
}
