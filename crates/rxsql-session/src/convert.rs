//! Error conversion policy and not-found handling.
//!
//! Failures that reach callers through `find` or `flush` are translated into
//! the [`Error::Persistence`] family by an [`ExceptionConverter`]. Errors that
//! already belong to that family pass through untouched, so converting twice
//! is harmless.

use rxsql_core::{
    Error, LockOptions, LookupErrorKind, PersistenceError, PersistenceErrorKind, Result, Value,
};

/// Translates raw failures into persistence errors.
pub trait ExceptionConverter: Send + Sync {
    fn convert(&self, error: Error) -> Error;

    /// Convert a failure raised while the given lock options were in effect.
    fn convert_with_lock(&self, error: Error, lock_options: Option<&LockOptions>) -> Error;
}

/// Default converter.
///
/// Store failures become `Store`, or `LockTimeout` when a lock was requested
/// and the store timed out. Argument and lookup failures keep their family;
/// anything else is `Runtime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardExceptionConverter;

impl ExceptionConverter for StandardExceptionConverter {
    fn convert(&self, error: Error) -> Error {
        self.convert_with_lock(error, None)
    }

    fn convert_with_lock(&self, error: Error, lock_options: Option<&LockOptions>) -> Error {
        if error.is_business() {
            return error;
        }
        let kind = if error.is_store_error() {
            if lock_options.is_some() && error.is_timeout() {
                PersistenceErrorKind::LockTimeout
            } else {
                PersistenceErrorKind::Store
            }
        } else {
            match &error {
                Error::InvalidArgument(_) => PersistenceErrorKind::Argument,
                Error::Lookup(_) => PersistenceErrorKind::Lookup,
                _ => PersistenceErrorKind::Runtime,
            }
        };
        Error::Persistence(PersistenceError {
            kind,
            message: error.to_string(),
            lock_options: lock_options.copied(),
            source: Some(Box::new(error)),
        })
    }
}

/// Decides whether a load that found nothing is a failure.
pub trait NotFoundDelegate: Send + Sync {
    #[allow(clippy::result_large_err)]
    fn handle_not_found(&self, entity_name: &str, id: &Value) -> Result<()>;
}

/// Raises `EntityNotFound` for every miss.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardNotFoundDelegate;

impl NotFoundDelegate for StandardNotFoundDelegate {
    fn handle_not_found(&self, entity_name: &str, id: &Value) -> Result<()> {
        tracing::warn!(entity = entity_name, id = %id, "Entity not found");
        Err(Error::entity_not_found(entity_name, id.clone()))
    }
}

/// Classify a failed lookup by identifier.
///
/// Returns `None` when the failure means "no such entity" and the caller
/// should see an empty result; otherwise returns the error to surface.
/// Configuration errors surface unconverted.
pub fn classify_find_failure(
    converter: &dyn ExceptionConverter,
    error: Error,
    lock_options: Option<&LockOptions>,
) -> Option<Error> {
    match error.lookup_kind() {
        Some(LookupErrorKind::EntityNotFound | LookupErrorKind::ObjectDeleted) => {
            tracing::debug!(error = %error, "Lookup miss treated as empty result");
            return None;
        }
        Some(LookupErrorKind::ObjectNotFound) => {
            return Some(Error::invalid_argument(error.to_string(), Some(error)));
        }
        None => {}
    }
    match error {
        Error::Config(_) => Some(error),
        Error::Mapping(_) | Error::Type(_) => {
            let argument = Error::invalid_argument(error.to_string(), Some(error));
            Some(converter.convert(argument))
        }
        e if e.is_store_error() => Some(converter.convert_with_lock(e, lock_options)),
        e => Some(converter.convert(e)),
    }
}
