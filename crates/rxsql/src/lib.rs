//! rxsql - non-blocking persistence sessions for relational stores.
//!
//! rxsql keeps a unit of work in memory and talks to the store only through
//! a non-blocking [`Connection`]:
//!
//! - One canonical instance per entity identity within a session
//! - Lifecycle events (load, persist, remove, flush) handled by ordered,
//!   strictly sequential listener chains
//! - By-identifier loads with lock, cache-mode and entity graph overrides
//! - Failures translated into a single persistence error family
//! - Connection pooling with structured concurrency
//!
//! # Quick Start
//!
//! ```ignore
//! use rxsql::prelude::*;
//!
//! async fn shelve(cx: &Cx, pool: &Pool<MyFactory>) -> Outcome<FlushEvent, Error> {
//!     let Outcome::Ok(lease) = pool.acquire(cx).await else {
//!         return Outcome::Err(Error::Custom("no connection".into()));
//!     };
//!     let sessions = SessionFactory::new(Metamodel::new().with::<Book>());
//!     let mut session = sessions.open_session(lease);
//!
//!     // Inserted right away so the store can generate the key.
//!     let book = session.persist(cx, Arc::new(Book::draft("Dune"))).await;
//!     session.flush(cx).await
//! }
//! ```

pub use rxsql_core::{
    ArgumentError, Budget, ColumnInfo, ConfigError, Connection, ConnectionConfig,
    ConnectionError, ConnectionErrorKind, Cx, Error, FromValue, LockMode, LockOptions,
    LookupError, LookupErrorKind, MappingError, MappingErrorKind, Model, Outcome,
    PersistenceError, PersistenceErrorKind, PoolError, PoolErrorKind, QueryError,
    QueryErrorKind, Result, Row, TypeError, Value,
};

pub use rxsql_pool::{
    ChainReport, CommandChain, ConnectionFactory, Lease, Pool, PoolConfig, PoolStats,
    PooledConnection, Statement,
};

// Session layer
pub use rxsql_session::{
    CacheMode, EffectiveGraph, EntityGraph, EntityRef, Event, EventKind, EventListener,
    ExceptionConverter, FindOptions, FlushEvent, GraphSemantic, IdentifierLoadAccess, LazyRef,
    ListenerFuture, ListenerRegistry, LoadEvent, LoadType, Metamodel, NotFoundDelegate,
    PersistEvent, RemoveEvent, Session, SessionConfig, SessionFactory, SessionState,
    StandardExceptionConverter, StandardNotFoundDelegate,
};

/// The session modules, for listener authors who need the lower layers.
pub use rxsql_session as session;

/// Everything needed to open a session and work with it.
///
/// ```ignore
/// use rxsql::prelude::*;
/// ```
pub mod prelude {
    // asupersync
    pub use crate::{Budget, Cx, Outcome};

    // Core traits and types
    pub use crate::{Connection, Error, LockMode, LockOptions, Model, Result, Row, Value};

    // Pool
    pub use crate::{Lease, Pool, PoolConfig};

    // Session
    pub use crate::{
        CacheMode, EntityGraph, FindOptions, FlushEvent, LazyRef, Metamodel, Session,
        SessionConfig, SessionFactory,
    };

    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[derive(Debug)]
    struct Shelf {
        id: i64,
    }

    impl Model for Shelf {
        const TABLE_NAME: &'static str = "shelves";
        const PRIMARY_KEY: &'static str = "id";
        const ENTITY_NAME: &'static str = "Shelf";

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![("id", Value::BigInt(self.id))]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_named("id")?,
            })
        }

        fn primary_key_value(&self) -> Value {
            Value::BigInt(self.id)
        }
    }

    #[test]
    fn prelude_covers_session_setup() {
        let metamodel = Metamodel::new().with::<Shelf>();
        assert_eq!(metamodel.len(), 1);
        assert!(metamodel.entity("Shelf").is_ok());

        let options = FindOptions::new()
            .lock(LockOptions::new(LockMode::PessimisticRead))
            .cache_mode(CacheMode::Ignore)
            .load_graph(EntityGraph::new("Shelf").with("books"));
        assert_eq!(options.cache_mode, Some(CacheMode::Ignore));

        let lazy = LazyRef::<Shelf>::initialized(Arc::new(Shelf { id: 4 }));
        assert_eq!(lazy.id(), Some(Value::BigInt(4)));
        assert_eq!(SessionConfig::default().cache_mode, CacheMode::Normal);
        assert_eq!(PoolConfig::new(2).max_connections, 2);
    }
}
