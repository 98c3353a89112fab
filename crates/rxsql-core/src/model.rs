//! Entity/row mapping.

use crate::Result;
use crate::row::Row;
use crate::value::Value;

/// Trait for types that map to a single table row.
///
/// The session works with entities through this trait only: it reads the
/// identifier, renders the column list for inserts and materializes rows
/// returned by by-id loads.
pub trait Model: Sized + Send + Sync + 'static {
    /// The name of the database table.
    const TABLE_NAME: &'static str;

    /// The primary key column.
    const PRIMARY_KEY: &'static str;

    /// Entity name used by the metamodel, events and error messages.
    const ENTITY_NAME: &'static str = Self::TABLE_NAME;

    /// Convert this instance to column-value pairs for insertion.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Construct an instance from a database row.
    #[allow(clippy::result_large_err)]
    fn from_row(row: &Row) -> Result<Self>;

    /// Get the value of the primary key.
    fn primary_key_value(&self) -> Value;

    /// Check if this is a new record whose key the store will generate.
    fn is_new(&self) -> bool {
        self.primary_key_value().is_null()
    }

    /// Store a key generated by the database on insert.
    #[allow(unused_variables)]
    fn set_generated_key(&mut self, id: i64) {}
}
