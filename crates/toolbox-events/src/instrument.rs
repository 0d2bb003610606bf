use parking_lot::RwLock;
use serde_json::Value;
use std::sync::{Arc, Weak};

use crate::source::{EventSource, ListenerId};

type Observers = RwLock<Vec<Arc<dyn EventObserver>>>;

/// Receives every event emitted by an instrumented source
pub trait EventObserver: Send + Sync {
    fn observe(&self, source: &str, event: &str, args: &[Value]);
}

// Allow closures to be used as observers
impl<F> EventObserver for F
where
    F: Fn(&str, &str, &[Value]) + Send + Sync,
{
    fn observe(&self, source: &str, event: &str, args: &[Value]) {
        (self)(source, event, args)
    }
}

/// A named event source whose emissions are also reported to observers
///
/// The wrapper taps the source itself, so events emitted on the original
/// handle are observed exactly like events emitted through the wrapper.
/// Observers run before the source's own listeners, which keep working as
/// before. Dropping the wrapper removes the tap.
pub struct InstrumentedSource {
    name: String,
    source: Arc<EventSource>,
    observers: Arc<Observers>,
    tap: ListenerId,
}

/// Wrap `source` under `name`
pub fn instrument(name: impl Into<String>, source: Arc<EventSource>) -> Arc<InstrumentedSource> {
    Arc::new(InstrumentedSource::new(name, source))
}

impl InstrumentedSource {
    pub fn new(name: impl Into<String>, source: Arc<EventSource>) -> Self {
        let name = name.into();
        let observers: Arc<Observers> = Arc::new(RwLock::new(Vec::new()));

        let reported = name.clone();
        let weak: Weak<Observers> = Arc::downgrade(&observers);
        let tap = source.tap(Arc::new(move |event: &str, args: &[Value]| {
            let Some(observers) = weak.upgrade() else {
                return;
            };
            let observers = observers.read().clone();
            for observer in &observers {
                observer.observe(&reported, event, args);
            }
        }));

        Self {
            name,
            source,
            observers,
            tap,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wrapped source, for attaching ordinary listeners
    pub fn source(&self) -> &Arc<EventSource> {
        &self.source
    }

    /// Register an observer for every event the source emits
    pub fn observe_all(&self, observer: Arc<dyn EventObserver>) {
        self.observers.write().push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Emit on the wrapped source; observers see it through the tap
    ///
    /// Returns what the wrapped source returns.
    pub fn emit(&self, event: &str, args: &[Value]) -> bool {
        self.source.emit(event, args)
    }
}

impl Drop for InstrumentedSource {
    fn drop(&mut self) {
        self.source.untap(self.tap);
    }
}

impl std::fmt::Debug for InstrumentedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentedSource")
            .field("name", &self.name)
            .field("observers", &self.observer_count())
            .finish()
    }
}
