use super::unexpected_event;
use crate::action::EntityAction;
use crate::context::ContextLookup;
use crate::event::{Event, EventKind, RemoveEvent};
use crate::registry::{EventListener, ListenerFuture};
use crate::state::SessionState;
use asupersync::{Cx, Outcome};
use rxsql_core::{Connection, Error, Result};
use std::future::ready;

/// Schedules a managed entity for deletion.
///
/// Removing an entity whose insert is still queued just cancels the insert.
/// Removing it twice is a no-op; removing a detached or unknown instance is
/// an argument error.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRemoveListener;

impl<C: Connection + 'static> EventListener<C> for DefaultRemoveListener {
    fn handle<'a>(
        &'a self,
        _cx: &'a Cx,
        event: &'a mut Event,
        session: &'a mut SessionState<C>,
    ) -> ListenerFuture<'a> {
        let result = match event {
            Event::Remove(remove) => remove_entity(session, remove),
            other => Err(unexpected_event(
                "remove listener",
                EventKind::Remove,
                other.kind(),
            )),
        };
        Box::pin(ready(match result {
            Ok(()) => Outcome::Ok(()),
            Err(e) => Outcome::Err(e),
        }))
    }
}

#[allow(clippy::result_large_err)]
fn remove_entity<C: Connection>(session: &mut SessionState<C>, remove: &RemoveEvent) -> Result<()> {
    let entity_name = remove.entity_name;
    let descriptor = session.metamodel().entity(entity_name)?;
    let id = descriptor.identifier(&remove.entity)?;
    if id.is_null() {
        return Err(Error::invalid_argument(
            format!("cannot remove a transient {} without identifier", entity_name),
            None,
        ));
    }
    match session.context().lookup(entity_name, &id) {
        ContextLookup::Managed(existing) if !existing.ptr_eq(&remove.entity) => {
            Err(Error::invalid_argument(
                format!("Removing a detached instance {}#{}", entity_name, id),
                None,
            ))
        }
        ContextLookup::Managed(_) => {
            if session.actions_mut().cancel_insert(entity_name, &id) {
                tracing::debug!(entity = entity_name, id = %id, "Cancelled pending insert");
                session.context_mut().evict(entity_name, &id);
            } else {
                session.context_mut().mark_deleted(entity_name, &id);
                session.actions_mut().push(EntityAction::Delete { descriptor, id });
            }
            Ok(())
        }
        ContextLookup::Deleted => {
            tracing::trace!(entity = entity_name, id = %id, "Already removed");
            Ok(())
        }
        ContextLookup::Absent => Err(Error::invalid_argument(
            format!(
                "Removing an instance not managed by this session {}#{}",
                entity_name, id
            ),
            None,
        )),
    }
}
