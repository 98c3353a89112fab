//! Persistence context: the session's identity map.
//!
//! Every entity the session knows about is registered here under its entity
//! name and identifier, so loading the same row twice yields the same
//! instance. Removed entities stay in the context, marked deleted, until the
//! delete is flushed.

use crate::entity::EntityRef;
use rxsql_core::Value;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

/// Identity of a tracked entity: entity name plus identifier hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityKey {
    entity_name: &'static str,
    id_hash: u64,
}

impl EntityKey {
    pub fn new(entity_name: &'static str, id: &Value) -> Self {
        let mut hasher = DefaultHasher::new();
        id.hash_into(&mut hasher);
        Self {
            entity_name,
            id_hash: hasher.finish(),
        }
    }

    pub fn entity_name(&self) -> &'static str {
        self.entity_name
    }
}

/// Lifecycle status of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Managed,
    Deleted,
}

/// Result of an identity-map lookup.
#[derive(Debug, Clone)]
pub enum ContextLookup {
    Managed(EntityRef),
    Deleted,
    Absent,
}

#[derive(Debug)]
struct ContextEntry {
    entity: EntityRef,
    id: Value,
    status: EntryStatus,
}

#[derive(Debug, Default)]
pub struct PersistenceContext {
    entries: HashMap<EntityKey, ContextEntry>,
}

impl PersistenceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `entity` as managed and return the canonical instance.
    ///
    /// If a managed instance already exists for the key it wins and is
    /// returned; a deleted entry is replaced.
    pub fn add_managed(&mut self, id: Value, entity: EntityRef) -> EntityRef {
        let key = EntityKey::new(entity.entity_name(), &id);
        match self.entries.get(&key) {
            Some(existing) if existing.status == EntryStatus::Managed => existing.entity.clone(),
            _ => {
                tracing::trace!(entity = entity.entity_name(), id = %id, "Tracking entity");
                self.entries.insert(
                    key,
                    ContextEntry {
                        entity: entity.clone(),
                        id,
                        status: EntryStatus::Managed,
                    },
                );
                entity
            }
        }
    }

    pub fn lookup(&self, entity_name: &'static str, id: &Value) -> ContextLookup {
        match self.entries.get(&EntityKey::new(entity_name, id)) {
            Some(entry) if entry.status == EntryStatus::Managed => {
                ContextLookup::Managed(entry.entity.clone())
            }
            Some(_) => ContextLookup::Deleted,
            None => ContextLookup::Absent,
        }
    }

    pub fn status(&self, entity_name: &'static str, id: &Value) -> Option<EntryStatus> {
        self.entries
            .get(&EntityKey::new(entity_name, id))
            .map(|entry| entry.status)
    }

    /// Mark a managed entity deleted. Returns false if it was not managed.
    pub fn mark_deleted(&mut self, entity_name: &'static str, id: &Value) -> bool {
        match self.entries.get_mut(&EntityKey::new(entity_name, id)) {
            Some(entry) if entry.status == EntryStatus::Managed => {
                entry.status = EntryStatus::Deleted;
                true
            }
            _ => false,
        }
    }

    /// Stop tracking an entity, whatever its status.
    pub fn evict(&mut self, entity_name: &'static str, id: &Value) -> Option<EntityRef> {
        self.entries
            .remove(&EntityKey::new(entity_name, id))
            .map(|entry| entry.entity)
    }

    pub fn contains(&self, entity_name: &'static str, id: &Value) -> bool {
        matches!(self.lookup(entity_name, id), ContextLookup::Managed(_))
    }

    pub fn is_deleted(&self, entity_name: &'static str, id: &Value) -> bool {
        self.status(entity_name, id) == Some(EntryStatus::Deleted)
    }

    /// Identifiers of all managed entities of one type.
    pub fn managed_ids(&self, entity_name: &str) -> Vec<Value> {
        self.entries
            .iter()
            .filter(|(key, entry)| {
                key.entity_name == entity_name && entry.status == EntryStatus::Managed
            })
            .map(|(_, entry)| entry.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
