//! Explicitly resolved lazy references.
//!
//! A [`LazyRef`] is never loaded behind the caller's back: reading an
//! uninitialized one fails, and resolving it takes a call to
//! `Session::fetch`.

use rxsql_core::{Error, Model, Result, Value};
use std::fmt;
use std::sync::Arc;

/// Placeholder for a lazily loaded collection owned by another entity.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionPlaceholder {
    pub owner: &'static str,
    pub role: String,
    pub owner_id: Value,
}

/// A reference to an entity that may not be loaded yet.
pub enum LazyRef<M: Model> {
    /// Only the identifier is known.
    Uninitialized { entity_name: &'static str, id: Value },
    /// The entity is loaded.
    Initialized(Arc<M>),
    /// A collection association that has not been loaded.
    Collection(CollectionPlaceholder),
}

impl<M: Model> LazyRef<M> {
    pub fn uninitialized(id: impl Into<Value>) -> Self {
        LazyRef::Uninitialized {
            entity_name: M::ENTITY_NAME,
            id: id.into(),
        }
    }

    pub fn initialized(entity: Arc<M>) -> Self {
        LazyRef::Initialized(entity)
    }

    pub fn collection(owner: &'static str, role: impl Into<String>, owner_id: Value) -> Self {
        LazyRef::Collection(CollectionPlaceholder {
            owner,
            role: role.into(),
            owner_id,
        })
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self, LazyRef::Initialized(_))
    }

    /// Identifier of the referenced entity, if this is an entity reference.
    pub fn id(&self) -> Option<Value> {
        match self {
            LazyRef::Uninitialized { id, .. } => Some(id.clone()),
            LazyRef::Initialized(entity) => Some(entity.primary_key_value()),
            LazyRef::Collection(_) => None,
        }
    }

    /// The loaded entity.
    ///
    /// Fails with a lazy-initialization error unless the reference has been
    /// resolved.
    #[allow(clippy::result_large_err)]
    pub fn get(&self) -> Result<&Arc<M>> {
        match self {
            LazyRef::Initialized(entity) => Ok(entity),
            LazyRef::Uninitialized { entity_name, id } => Err(Error::LazyInitialization(format!(
                "could not initialize reference [{}#{}]: resolve it with Session::fetch",
                entity_name, id
            ))),
            LazyRef::Collection(placeholder) => Err(Error::LazyInitialization(format!(
                "collection {}.{} of [{}#{}] is not loaded",
                placeholder.owner, placeholder.role, placeholder.owner, placeholder.owner_id
            ))),
        }
    }
}

impl<M: Model> Clone for LazyRef<M> {
    fn clone(&self) -> Self {
        match self {
            LazyRef::Uninitialized { entity_name, id } => LazyRef::Uninitialized {
                entity_name: *entity_name,
                id: id.clone(),
            },
            LazyRef::Initialized(entity) => LazyRef::Initialized(Arc::clone(entity)),
            LazyRef::Collection(placeholder) => LazyRef::Collection(placeholder.clone()),
        }
    }
}

impl<M: Model> fmt::Debug for LazyRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LazyRef::Uninitialized { entity_name, id } => f
                .debug_struct("Uninitialized")
                .field("entity_name", entity_name)
                .field("id", id)
                .finish(),
            LazyRef::Initialized(_) => f
                .debug_tuple("Initialized")
                .field(&M::ENTITY_NAME)
                .finish(),
            LazyRef::Collection(placeholder) => {
                f.debug_tuple("Collection").field(placeholder).finish()
            }
        }
    }
}
