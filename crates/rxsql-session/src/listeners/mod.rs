//! Built-in listeners registered by [`ListenerRegistry::with_defaults`].
//!
//! [`ListenerRegistry::with_defaults`]: crate::registry::ListenerRegistry::with_defaults

mod flush;
mod load;
mod persist;
mod remove;

pub use flush::DefaultFlushListener;
pub use load::DefaultLoadListener;
pub use persist::DefaultPersistListener;
pub use remove::DefaultRemoveListener;

use crate::event::EventKind;
use rxsql_core::Error;

fn unexpected_event(listener: &str, expected: EventKind, actual: EventKind) -> Error {
    Error::config(format!(
        "{} handles {} events, got {}",
        listener, expected, actual
    ))
}
