//! Queue of pending entity writes, executed in order on flush.

use crate::entity::{EntityDescriptor, EntityRef};
use rxsql_core::Value;
use std::collections::VecDeque;
use std::hash::{DefaultHasher, Hasher};
use std::sync::Arc;

/// A pending write.
#[derive(Debug, Clone)]
pub enum EntityAction {
    /// Insert a managed entity.
    Insert {
        descriptor: Arc<EntityDescriptor>,
        id: Value,
        entity: EntityRef,
    },
    /// Delete a removed entity.
    Delete {
        descriptor: Arc<EntityDescriptor>,
        id: Value,
    },
}

impl EntityAction {
    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        match self {
            EntityAction::Insert { descriptor, .. } | EntityAction::Delete { descriptor, .. } => {
                descriptor
            }
        }
    }

    pub fn id(&self) -> &Value {
        match self {
            EntityAction::Insert { id, .. } | EntityAction::Delete { id, .. } => id,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, EntityAction::Insert { .. })
    }

    fn targets(&self, entity_name: &str, id: &Value) -> bool {
        self.descriptor().name() == entity_name && same_id(self.id(), id)
    }
}

fn id_hash(id: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    id.hash_into(&mut hasher);
    hasher.finish()
}

fn same_id(a: &Value, b: &Value) -> bool {
    id_hash(a) == id_hash(b)
}

#[derive(Debug, Default)]
pub struct ActionQueue {
    actions: VecDeque<EntityAction>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: EntityAction) {
        tracing::trace!(
            entity = action.descriptor().name(),
            insert = action.is_insert(),
            "Queued entity action"
        );
        self.actions.push_back(action);
    }

    /// Drop a queued insert. Returns true if one was pending.
    pub fn cancel_insert(&mut self, entity_name: &str, id: &Value) -> bool {
        self.cancel(entity_name, id, true)
    }

    /// Drop a queued delete. Returns true if one was pending.
    pub fn cancel_delete(&mut self, entity_name: &str, id: &Value) -> bool {
        self.cancel(entity_name, id, false)
    }

    fn cancel(&mut self, entity_name: &str, id: &Value, insert: bool) -> bool {
        let before = self.actions.len();
        self.actions
            .retain(|action| !(action.is_insert() == insert && action.targets(entity_name, id)));
        self.actions.len() != before
    }

    /// The oldest pending action.
    pub fn front(&self) -> Option<&EntityAction> {
        self.actions.front()
    }

    /// Remove the oldest pending action once it has been executed.
    pub fn pop_front(&mut self) -> Option<EntityAction> {
        self.actions.pop_front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityAction> {
        self.actions.iter()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }
}
