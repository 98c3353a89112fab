//! Core types and traits for rxsql.
//!
//! This crate provides the foundational abstractions shared by the pool and
//! the session:
//!
//! - `Connection` trait for non-blocking statement execution
//! - `Model` trait for entity/row mapping
//! - `Error` taxonomy, including the business-error family produced by the
//!   session's exception converter
//! - `LockOptions` and `LockMode` for pessimistic/optimistic locking hints
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Budget, Cx, Outcome};

pub mod connection;
pub mod error;
pub mod lock;
pub mod model;
pub mod row;
pub mod value;

pub use connection::{Connection, ConnectionConfig};
pub use error::{
    ArgumentError, ConfigError, ConnectionError, ConnectionErrorKind, Error, LookupError,
    LookupErrorKind, MappingError, MappingErrorKind, PersistenceError, PersistenceErrorKind,
    PoolError, PoolErrorKind, QueryError, QueryErrorKind, Result, TypeError,
};
pub use lock::{LockMode, LockOptions};
pub use model::Model;
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
