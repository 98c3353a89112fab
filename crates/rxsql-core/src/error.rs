//! Error types for rxsql operations.

use crate::lock::LockOptions;
use crate::value::Value;
use std::fmt;

/// The primary error type for all rxsql operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, disconnect, refused)
    Connection(ConnectionError),
    /// Statement execution errors reported by the store
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Pool errors
    Pool(PoolError),
    /// Configuration errors, raised before any I/O is attempted
    Config(ConfigError),
    /// Mapping metadata errors (unknown entity, descriptor cast)
    Mapping(MappingError),
    /// Entity lookup failures (not found, deleted, dangling reference)
    Lookup(LookupError),
    /// Illegal argument, usually wrapping the failure that exposed it
    InvalidArgument(ArgumentError),
    /// Business error produced by the exception converter
    Persistence(PersistenceError),
    /// Operation not supported by a non-blocking session
    Unsupported(String),
    /// Access to an uninitialized lazy reference
    LazyInitialization(String),
    /// I/O errors
    Io(std::io::Error),
    /// Operation timed out
    Timeout,
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Authentication failed
    Authentication,
    /// Connection lost during operation
    Disconnected,
    /// Connection refused
    Refused,
    /// Connection pool exhausted
    PoolExhausted,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Deadlock detected
    Deadlock,
    /// Serialization failure
    Serialization,
    /// Statement or lock wait timeout
    Timeout,
    /// Cancelled
    Cancelled,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
    pub rust_type: Option<&'static str>,
}

#[derive(Debug)]
pub struct PoolError {
    pub kind: PoolErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolErrorKind {
    Exhausted,
    Timeout,
    Closed,
    Config,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct MappingError {
    pub kind: MappingErrorKind,
    pub entity: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingErrorKind {
    /// A loaded instance could not be narrowed to the requested type
    Cast,
    /// Descriptor metadata is inconsistent (e.g. missing primary key)
    Metadata,
}

#[derive(Debug)]
pub struct LookupError {
    pub kind: LookupErrorKind,
    pub entity: String,
    pub id: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupErrorKind {
    /// Entity not found while narrowing a reference
    EntityNotFound,
    /// Entity was already removed in this session's context
    ObjectDeleted,
    /// A referenced entity was expected to exist but is absent
    ObjectNotFound,
}

#[derive(Debug)]
pub struct ArgumentError {
    pub message: String,
    pub source: Option<Box<Error>>,
}

#[derive(Debug)]
pub struct PersistenceError {
    pub kind: PersistenceErrorKind,
    pub message: String,
    pub lock_options: Option<LockOptions>,
    pub source: Option<Box<Error>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceErrorKind {
    /// The store or driver rejected the operation
    Store,
    /// A lock could not be acquired in time
    LockTimeout,
    /// The caller supplied an illegal argument
    Argument,
    /// An entity lookup failed
    Lookup,
    /// Any other runtime failure
    Runtime,
}

impl Error {
    /// Build a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }

    pub fn entity_not_found(entity: impl Into<String>, id: Value) -> Self {
        Error::Lookup(LookupError {
            kind: LookupErrorKind::EntityNotFound,
            entity: entity.into(),
            id,
        })
    }

    pub fn object_deleted(entity: impl Into<String>, id: Value) -> Self {
        Error::Lookup(LookupError {
            kind: LookupErrorKind::ObjectDeleted,
            entity: entity.into(),
            id,
        })
    }

    pub fn object_not_found(entity: impl Into<String>, id: Value) -> Self {
        Error::Lookup(LookupError {
            kind: LookupErrorKind::ObjectNotFound,
            entity: entity.into(),
            id,
        })
    }

    /// No descriptor is registered under the requested name or type.
    pub fn unknown_entity(entity: impl Into<String>) -> Self {
        Error::config(format!("unknown entity '{}'", entity.into()))
    }

    pub fn cast(entity: impl Into<String>, target: &'static str) -> Self {
        let entity = entity.into();
        Error::Mapping(MappingError {
            kind: MappingErrorKind::Cast,
            message: format!("instance of '{}' is not a {}", entity, target),
            entity: Some(entity),
        })
    }

    /// Wrap `source` in an illegal-argument error.
    pub fn invalid_argument(message: impl Into<String>, source: Option<Error>) -> Self {
        Error::InvalidArgument(ArgumentError {
            message: message.into(),
            source: source.map(Box::new),
        })
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::Unsupported(message.into())
    }

    /// Whether the failure originates in the store, the driver or the pool.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Query(_) | Error::Pool(_) | Error::Io(_) | Error::Timeout
        )
    }

    /// Whether this error already belongs to the converted business family.
    pub fn is_business(&self) -> bool {
        matches!(self, Error::Persistence(_))
    }

    pub fn lookup_kind(&self) -> Option<LookupErrorKind> {
        match self {
            Error::Lookup(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn persistence_kind(&self) -> Option<PersistenceErrorKind> {
        match self {
            Error::Persistence(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Query(q) => q.kind == QueryErrorKind::Timeout,
            Error::Pool(p) => p.kind == PoolErrorKind::Timeout,
            Error::Timeout => true,
            _ => false,
        }
    }

    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Pool(e) => write!(f, "Pool error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Mapping(e) => write!(f, "Mapping error: {}", e.message),
            Error::Lookup(e) => write!(f, "{}", e),
            Error::InvalidArgument(e) => write!(f, "Illegal argument: {}", e.message),
            Error::Persistence(e) => write!(f, "Persistence error: {}", e.message),
            Error::Unsupported(msg) => write!(f, "Unsupported operation: {}", msg),
            Error::LazyInitialization(msg) => write!(f, "Lazy initialization error: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Pool(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::InvalidArgument(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Persistence(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LookupErrorKind::EntityNotFound => {
                write!(f, "Unable to find {} with id {}", self.entity, self.id)
            }
            LookupErrorKind::ObjectDeleted => write!(
                f,
                "Entity {} with id {} was deleted in this session",
                self.entity, self.id
            ),
            LookupErrorKind::ObjectNotFound => write!(
                f,
                "No row with the given identifier exists: [{}#{}]",
                self.entity, self.id
            ),
        }
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        Error::Pool(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<LookupError> for Error {
    fn from(err: LookupError) -> Self {
        Error::Lookup(err)
    }
}

impl From<PersistenceError> for Error {
    fn from(err: PersistenceError) -> Self {
        Error::Persistence(err)
    }
}

/// Result type alias for rxsql operations.
pub type Result<T> = std::result::Result<T, Error>;
