//! Lifecycle events dispatched through the listener pipeline.

use crate::entity::EntityRef;
use rxsql_core::{LockOptions, Value};
use std::fmt;

/// Tag identifying which listener sequence handles an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Load,
    Persist,
    PersistOnFlush,
    Remove,
    Flush,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Load,
        EventKind::Persist,
        EventKind::PersistOnFlush,
        EventKind::Remove,
        EventKind::Flush,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            EventKind::Load => "load",
            EventKind::Persist => "persist",
            EventKind::PersistOnFlush => "persist-on-flush",
            EventKind::Remove => "remove",
            EventKind::Flush => "flush",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a load treats a missing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadType {
    /// Plain lookup: a missing row leaves the result empty.
    Get,
    /// The row must exist: a missing row is an `ObjectNotFound` failure.
    ImmediateLoad,
    /// Reference narrowing: a missing row is left to the not-found delegate.
    Reference,
}

/// Request to load one entity by identifier.
///
/// The result slot is written by listeners and read back by the caller after
/// the dispatch settles.
#[derive(Debug)]
pub struct LoadEvent {
    pub entity_name: &'static str,
    pub id: Value,
    pub lock_options: Option<LockOptions>,
    pub read_only: bool,
    pub load_type: LoadType,
    result: Option<EntityRef>,
}

impl LoadEvent {
    pub fn new(entity_name: &'static str, id: Value, load_type: LoadType) -> Self {
        Self {
            entity_name,
            id,
            lock_options: None,
            read_only: false,
            load_type,
            result: None,
        }
    }

    #[must_use]
    pub fn lock_options(mut self, lock_options: Option<LockOptions>) -> Self {
        self.lock_options = lock_options;
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn result(&self) -> Option<&EntityRef> {
        self.result.as_ref()
    }

    /// Store the loaded entity.
    ///
    /// A slot already holding a different instance is left alone and `false`
    /// is returned; the first listener to resolve the load wins.
    pub fn set_result(&mut self, entity: EntityRef) -> bool {
        match &self.result {
            Some(existing) if !existing.ptr_eq(&entity) => {
                tracing::debug!(
                    entity = self.entity_name,
                    id = %self.id,
                    "Load result already set, keeping first instance"
                );
                false
            }
            _ => {
                self.result = Some(entity);
                true
            }
        }
    }

    pub fn take_result(&mut self) -> Option<EntityRef> {
        self.result.take()
    }
}

/// Request to make an entity managed.
#[derive(Debug, Clone)]
pub struct PersistEvent {
    pub entity_name: &'static str,
    pub entity: EntityRef,
}

impl PersistEvent {
    pub fn new(entity: EntityRef) -> Self {
        Self {
            entity_name: entity.entity_name(),
            entity,
        }
    }
}

/// Request to remove a managed entity.
#[derive(Debug, Clone)]
pub struct RemoveEvent {
    pub entity_name: &'static str,
    pub entity: EntityRef,
}

impl RemoveEvent {
    pub fn new(entity: EntityRef) -> Self {
        Self {
            entity_name: entity.entity_name(),
            entity,
        }
    }
}

/// Request to write pending actions to the store.
///
/// Listeners fill in the counts of what they executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushEvent {
    pub inserted: usize,
    pub deleted: usize,
}

/// A lifecycle event, tagged by kind.
#[derive(Debug)]
pub enum Event {
    Load(LoadEvent),
    Persist(PersistEvent),
    PersistOnFlush(PersistEvent),
    Remove(RemoveEvent),
    Flush(FlushEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Load(_) => EventKind::Load,
            Event::Persist(_) => EventKind::Persist,
            Event::PersistOnFlush(_) => EventKind::PersistOnFlush,
            Event::Remove(_) => EventKind::Remove,
            Event::Flush(_) => EventKind::Flush,
        }
    }
}
