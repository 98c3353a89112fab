//! Type-erased entity handles and the entity metamodel.
//!
//! Events, the persistence context and the action queue all carry entities as
//! [`EntityRef`]s so listeners can work on any mapped type. The facade narrows
//! them back to `Arc<M>` with [`EntityRef::downcast`].

use rxsql_core::{Error, LockOptions, Model, Result, Row, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A shared, type-erased entity instance tagged with its entity name.
#[derive(Clone)]
pub struct EntityRef {
    entity_name: &'static str,
    instance: Arc<dyn Any + Send + Sync>,
}

impl EntityRef {
    pub fn new<M: Model>(entity: Arc<M>) -> Self {
        Self {
            entity_name: M::ENTITY_NAME,
            instance: entity,
        }
    }

    pub fn entity_name(&self) -> &'static str {
        self.entity_name
    }

    /// Narrow to the concrete model type.
    pub fn downcast<M: Model>(&self) -> Option<Arc<M>> {
        Arc::clone(&self.instance).downcast::<M>().ok()
    }

    pub fn downcast_ref<M: Model>(&self) -> Option<&M> {
        self.instance.downcast_ref::<M>()
    }

    /// Whether both handles point at the same instance.
    pub fn ptr_eq(&self, other: &EntityRef) -> bool {
        Arc::ptr_eq(&self.instance, &other.instance)
    }

    /// Whether this handle is the only one to its instance.
    pub fn is_exclusive(&mut self) -> bool {
        Arc::get_mut(&mut self.instance).is_some()
    }

    fn get_mut<M: Model>(&mut self) -> Option<&mut M> {
        Arc::get_mut(&mut self.instance).and_then(|any| any.downcast_mut::<M>())
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRef")
            .field("entity_name", &self.entity_name)
            .field("instance", &Arc::as_ptr(&self.instance))
            .finish()
    }
}

/// Mapping metadata for one entity type.
///
/// Built from a [`Model`] with [`EntityDescriptor::of`]; the row mapping is
/// kept as plain function pointers so descriptors can be shared across
/// sessions without generics.
pub struct EntityDescriptor {
    name: &'static str,
    table: &'static str,
    primary_key: &'static str,
    type_id: TypeId,
    type_name: &'static str,
    materialize: fn(&Row) -> Result<EntityRef>,
    columns: fn(&EntityRef) -> Option<Vec<(&'static str, Value)>>,
    identifier: fn(&EntityRef) -> Option<Value>,
    assign_key: fn(&mut EntityRef, i64) -> bool,
}

fn materialize_as<M: Model>(row: &Row) -> Result<EntityRef> {
    M::from_row(row).map(|entity| EntityRef::new(Arc::new(entity)))
}

fn columns_of<M: Model>(entity: &EntityRef) -> Option<Vec<(&'static str, Value)>> {
    entity.downcast_ref::<M>().map(M::to_row)
}

fn identifier_of<M: Model>(entity: &EntityRef) -> Option<Value> {
    entity.downcast_ref::<M>().map(M::primary_key_value)
}

fn assign_key_to<M: Model>(entity: &mut EntityRef, key: i64) -> bool {
    match entity.get_mut::<M>() {
        Some(model) => {
            model.set_generated_key(key);
            true
        }
        None => false,
    }
}

impl EntityDescriptor {
    pub fn of<M: Model>() -> Self {
        Self {
            name: M::ENTITY_NAME,
            table: M::TABLE_NAME,
            primary_key: M::PRIMARY_KEY,
            type_id: TypeId::of::<M>(),
            type_name: std::any::type_name::<M>(),
            materialize: materialize_as::<M>,
            columns: columns_of::<M>,
            identifier: identifier_of::<M>,
            assign_key: assign_key_to::<M>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn primary_key(&self) -> &'static str {
        self.primary_key
    }

    pub fn model_type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Build an entity from a row.
    #[allow(clippy::result_large_err)]
    pub fn materialize(&self, row: &Row) -> Result<EntityRef> {
        (self.materialize)(row)
    }

    /// Identifier of `entity`, or a cast error if it is not of this type.
    #[allow(clippy::result_large_err)]
    pub fn identifier(&self, entity: &EntityRef) -> Result<Value> {
        (self.identifier)(entity).ok_or_else(|| self.cast_error(entity))
    }

    /// Column values of `entity`, or a cast error if it is not of this type.
    #[allow(clippy::result_large_err)]
    pub fn columns(&self, entity: &EntityRef) -> Result<Vec<(&'static str, Value)>> {
        (self.columns)(entity).ok_or_else(|| self.cast_error(entity))
    }

    /// Store a generated key. Fails if the instance is already shared.
    pub fn assign_key(&self, entity: &mut EntityRef, key: i64) -> bool {
        (self.assign_key)(entity, key)
    }

    fn cast_error(&self, entity: &EntityRef) -> Error {
        Error::cast(entity.entity_name(), self.type_name)
    }

    /// `SELECT` by primary key, with the lock clause the options call for.
    pub fn select_by_id_sql(&self, lock: Option<&LockOptions>) -> String {
        let mut sql = format!(
            "SELECT * FROM \"{}\" WHERE \"{}\" = $1 LIMIT 1",
            self.table, self.primary_key
        );
        if let Some(clause) = lock.and_then(LockOptions::lock_clause) {
            sql.push(' ');
            sql.push_str(&clause);
        }
        sql
    }

    /// `INSERT` for the given columns, with `$n` placeholders in order.
    pub fn insert_sql(&self, columns: &[(&'static str, Value)]) -> String {
        let names: Vec<String> = columns.iter().map(|(c, _)| format!("\"{}\"", c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
        format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            self.table,
            names.join(", "),
            placeholders.join(", ")
        )
    }

    pub fn delete_sql(&self) -> String {
        format!(
            "DELETE FROM \"{}\" WHERE \"{}\" = $1",
            self.table, self.primary_key
        )
    }
}

impl fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Registry of entity descriptors, resolvable by name or by type.
#[derive(Debug, Default)]
pub struct Metamodel {
    by_name: HashMap<&'static str, Arc<EntityDescriptor>>,
    by_type: HashMap<TypeId, Arc<EntityDescriptor>>,
}

impl Metamodel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `M` (builder pattern).
    #[must_use]
    pub fn with<M: Model>(mut self) -> Self {
        self.register::<M>();
        self
    }

    pub fn register<M: Model>(&mut self) -> Arc<EntityDescriptor> {
        let descriptor = Arc::new(EntityDescriptor::of::<M>());
        self.by_name
            .insert(descriptor.name(), Arc::clone(&descriptor));
        self.by_type
            .insert(TypeId::of::<M>(), Arc::clone(&descriptor));
        descriptor
    }

    /// Resolve a descriptor by entity name.
    #[allow(clippy::result_large_err)]
    pub fn entity(&self, name: &str) -> Result<Arc<EntityDescriptor>> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| Error::unknown_entity(name))
    }

    /// Resolve the descriptor registered for `M`.
    #[allow(clippy::result_large_err)]
    pub fn entity_of<M: Model>(&self) -> Result<Arc<EntityDescriptor>> {
        self.by_type
            .get(&TypeId::of::<M>())
            .cloned()
            .ok_or_else(|| Error::unknown_entity(M::ENTITY_NAME))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxsql_core::{LockMode, MappingErrorKind};

    #[derive(Debug)]
    struct Book {
        isbn: Option<i64>,
        title: String,
    }

    impl Model for Book {
        const TABLE_NAME: &'static str = "books";
        const PRIMARY_KEY: &'static str = "isbn";
        const ENTITY_NAME: &'static str = "Book";

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![
                ("isbn", Value::from(self.isbn)),
                ("title", Value::from(self.title.as_str())),
            ]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                isbn: row.get_named("isbn")?,
                title: row.get_named("title")?,
            })
        }

        fn primary_key_value(&self) -> Value {
            Value::from(self.isbn)
        }

        fn set_generated_key(&mut self, id: i64) {
            self.isbn = Some(id);
        }
    }

    #[derive(Debug)]
    struct Shelf;

    impl Model for Shelf {
        const TABLE_NAME: &'static str = "shelves";
        const PRIMARY_KEY: &'static str = "id";

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![]
        }

        fn from_row(_row: &Row) -> Result<Self> {
            Ok(Shelf)
        }

        fn primary_key_value(&self) -> Value {
            Value::Null
        }
    }

    #[test]
    fn sql_shapes() {
        let descriptor = EntityDescriptor::of::<Book>();
        assert_eq!(
            descriptor.select_by_id_sql(None),
            "SELECT * FROM \"books\" WHERE \"isbn\" = $1 LIMIT 1"
        );
        let lock = LockOptions::new(LockMode::PessimisticWrite).nowait();
        assert_eq!(
            descriptor.select_by_id_sql(Some(&lock)),
            "SELECT * FROM \"books\" WHERE \"isbn\" = $1 LIMIT 1 FOR UPDATE NOWAIT"
        );
        let columns = vec![("isbn", Value::BigInt(1)), ("title", Value::from("Dune"))];
        assert_eq!(
            descriptor.insert_sql(&columns),
            "INSERT INTO \"books\" (\"isbn\", \"title\") VALUES ($1, $2)"
        );
        assert_eq!(
            descriptor.delete_sql(),
            "DELETE FROM \"books\" WHERE \"isbn\" = $1"
        );
    }

    #[test]
    fn erased_access_round_trips_through_descriptor() {
        let descriptor = EntityDescriptor::of::<Book>();
        let row = Row::new(
            vec!["isbn".to_string(), "title".to_string()],
            vec![Value::BigInt(9), Value::from("Emma")],
        );
        let entity = descriptor.materialize(&row).unwrap();
        assert_eq!(entity.entity_name(), "Book");
        assert_eq!(descriptor.identifier(&entity).unwrap(), Value::BigInt(9));
        assert_eq!(entity.downcast::<Book>().unwrap().title, "Emma");
        assert!(entity.downcast::<Shelf>().is_none());

        let shelf = EntityRef::new(Arc::new(Shelf));
        match descriptor.identifier(&shelf) {
            Err(Error::Mapping(e)) => assert_eq!(e.kind, MappingErrorKind::Cast),
            other => panic!("expected cast error, got {other:?}"),
        }
    }

    #[test]
    fn generated_key_requires_unique_handle() {
        let descriptor = EntityDescriptor::of::<Book>();
        let mut entity = EntityRef::new(Arc::new(Book {
            isbn: None,
            title: "Draft".to_string(),
        }));
        assert!(descriptor.assign_key(&mut entity, 77));
        assert_eq!(descriptor.identifier(&entity).unwrap(), Value::BigInt(77));

        let _shared = entity.clone();
        assert!(!descriptor.assign_key(&mut entity, 78));
    }

    #[test]
    fn metamodel_resolution() {
        let metamodel = Metamodel::new().with::<Book>();
        assert_eq!(metamodel.len(), 1);
        assert_eq!(metamodel.entity("Book").unwrap().table(), "books");
        let by_type = metamodel.entity_of::<Book>().unwrap();
        assert_eq!(by_type.name(), "Book");
        assert_eq!(by_type.model_type_id(), TypeId::of::<Book>());
        assert!(Arc::ptr_eq(&by_type, &metamodel.entity("Book").unwrap()));
        assert!(matches!(
            metamodel.entity_of::<Shelf>(),
            Err(Error::Config(_))
        ));
        assert!(metamodel.entity("Nope").is_err());
    }
}
