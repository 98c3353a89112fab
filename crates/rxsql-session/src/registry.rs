//! Ordered listener sequences, keyed by event kind.

use crate::combinator::StepFuture;
use crate::event::{Event, EventKind};
use crate::listeners::{
    DefaultFlushListener, DefaultLoadListener, DefaultPersistListener, DefaultRemoveListener,
};
use crate::state::SessionState;
use asupersync::Cx;
use rxsql_core::Connection;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Future returned by a listener.
pub type ListenerFuture<'a> = StepFuture<'a>;

/// Handler for one kind of lifecycle event.
///
/// Listeners registered for the same kind run one after another in
/// registration order; each sees the event and session state as left by the
/// previous one. Returning `Outcome::Err` stops the remaining listeners.
pub trait EventListener<C: Connection>: Send + Sync {
    fn handle<'a>(
        &'a self,
        cx: &'a Cx,
        event: &'a mut Event,
        session: &'a mut SessionState<C>,
    ) -> ListenerFuture<'a>;

    /// Name used in diagnostics.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Listener sequences for every event kind.
///
/// Built once, typically by the session factory, and shared read-only by all
/// sessions through `Arc`.
pub struct ListenerRegistry<C: Connection> {
    listeners: HashMap<EventKind, Vec<Arc<dyn EventListener<C>>>>,
}

impl<C: Connection + 'static> ListenerRegistry<C> {
    /// An empty registry: every dispatch settles without doing anything.
    pub fn new() -> Self {
        Self {
            listeners: HashMap::new(),
        }
    }

    /// A registry with the built-in load, persist, remove and flush handling.
    pub fn with_defaults() -> Self {
        let persist: Arc<dyn EventListener<C>> = Arc::new(DefaultPersistListener);
        let mut registry = Self::new();
        registry.append(EventKind::Load, Arc::new(DefaultLoadListener));
        registry.append(EventKind::Persist, Arc::clone(&persist));
        registry.append(EventKind::PersistOnFlush, persist);
        registry.append(EventKind::Remove, Arc::new(DefaultRemoveListener));
        registry.append(EventKind::Flush, Arc::new(DefaultFlushListener));
        registry
    }

    /// Register a listener to run after the existing ones.
    pub fn append(&mut self, kind: EventKind, listener: Arc<dyn EventListener<C>>) {
        tracing::trace!(%kind, listener = listener.name(), "Appending listener");
        self.listeners.entry(kind).or_default().push(listener);
    }

    /// Register a listener to run before the existing ones.
    pub fn prepend(&mut self, kind: EventKind, listener: Arc<dyn EventListener<C>>) {
        tracing::trace!(%kind, listener = listener.name(), "Prepending listener");
        self.listeners.entry(kind).or_default().insert(0, listener);
    }

    /// Builder form of [`append`](Self::append).
    #[must_use]
    pub fn with_listener(mut self, kind: EventKind, listener: Arc<dyn EventListener<C>>) -> Self {
        self.append(kind, listener);
        self
    }

    /// Remove every listener for `kind`.
    pub fn clear(&mut self, kind: EventKind) {
        self.listeners.remove(&kind);
    }

    pub fn listeners_for(&self, kind: EventKind) -> &[Arc<dyn EventListener<C>>] {
        self.listeners.get(&kind).map_or(&[], Vec::as_slice)
    }
}

impl<C: Connection + 'static> Default for ListenerRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> fmt::Debug for ListenerRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in EventKind::ALL {
            if let Some(listeners) = self.listeners.get(&kind) {
                let names: Vec<&'static str> = listeners.iter().map(|l| l.name()).collect();
                map.entry(&kind, &names);
            }
        }
        map.finish()
    }
}
