use super::unexpected_event;
use crate::action::EntityAction;
use crate::context::ContextLookup;
use crate::entity::EntityDescriptor;
use crate::event::{Event, EventKind, PersistEvent};
use crate::registry::{EventListener, ListenerFuture};
use crate::state::SessionState;
use asupersync::{Cx, Outcome};
use rxsql_core::{Connection, Error, Value};
use std::sync::Arc;

/// Makes an entity managed.
///
/// An entity without an identifier is inserted right away so the store can
/// generate its key; everything else is queued for the next flush. Handles
/// both `Persist` and `PersistOnFlush`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPersistListener;

impl<C: Connection + 'static> EventListener<C> for DefaultPersistListener {
    fn handle<'a>(
        &'a self,
        cx: &'a Cx,
        event: &'a mut Event,
        session: &'a mut SessionState<C>,
    ) -> ListenerFuture<'a> {
        Box::pin(async move {
            let actual = event.kind();
            let persist = match event {
                Event::Persist(persist) | Event::PersistOnFlush(persist) => persist,
                _ => {
                    return Outcome::Err(unexpected_event(
                        "persist listener",
                        EventKind::Persist,
                        actual,
                    ));
                }
            };
            let descriptor = match session.metamodel().entity(persist.entity_name) {
                Ok(descriptor) => descriptor,
                Err(e) => return Outcome::Err(e),
            };
            let id = match descriptor.identifier(&persist.entity) {
                Ok(id) => id,
                Err(e) => return Outcome::Err(e),
            };
            if id.is_null() {
                return insert_generated(cx, session, &descriptor, persist).await;
            }
            match persist_with_id(session, &descriptor, persist, id) {
                Ok(()) => Outcome::Ok(()),
                Err(e) => Outcome::Err(e),
            }
        })
    }
}

async fn insert_generated<C: Connection>(
    cx: &Cx,
    session: &mut SessionState<C>,
    descriptor: &Arc<EntityDescriptor>,
    persist: &mut PersistEvent,
) -> Outcome<(), Error> {
    if !persist.entity.is_exclusive() {
        return Outcome::Err(shared_instance(persist.entity_name));
    }
    let columns = match descriptor.columns(&persist.entity) {
        Ok(columns) => columns,
        Err(e) => return Outcome::Err(e),
    };
    let columns: Vec<_> = columns
        .into_iter()
        .filter(|(column, _)| *column != descriptor.primary_key())
        .collect();
    let sql = descriptor.insert_sql(&columns);
    let params: Vec<Value> = columns.into_iter().map(|(_, value)| value).collect();
    session.log_sql(&sql);

    let key = match session.connection().insert(cx, &sql, &params).await {
        Outcome::Ok(Some(key)) => key,
        Outcome::Ok(None) => {
            return Outcome::Err(Error::Custom(format!(
                "store returned no generated key for {}",
                persist.entity_name
            )));
        }
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };
    if !descriptor.assign_key(&mut persist.entity, key) {
        return Outcome::Err(shared_instance(persist.entity_name));
    }
    let id = match descriptor.identifier(&persist.entity) {
        Ok(id) => id,
        Err(e) => return Outcome::Err(e),
    };
    tracing::debug!(entity = persist.entity_name, id = %id, "Inserted entity with generated key");
    persist.entity = session.context_mut().add_managed(id, persist.entity.clone());
    Outcome::Ok(())
}

fn shared_instance(entity_name: &str) -> Error {
    Error::invalid_argument(
        format!(
            "cannot assign a generated key to a shared {} instance",
            entity_name
        ),
        None,
    )
}

#[allow(clippy::result_large_err)]
fn persist_with_id<C: Connection>(
    session: &mut SessionState<C>,
    descriptor: &Arc<EntityDescriptor>,
    persist: &mut PersistEvent,
    id: Value,
) -> rxsql_core::Result<()> {
    let entity_name = persist.entity_name;
    match session.context().lookup(entity_name, &id) {
        ContextLookup::Managed(existing) if existing.ptr_eq(&persist.entity) => {
            tracing::trace!(entity = entity_name, id = %id, "Already managed");
            Ok(())
        }
        ContextLookup::Managed(_) => Err(Error::invalid_argument(
            format!(
                "a different {} instance with id {} is already managed by this session",
                entity_name, id
            ),
            None,
        )),
        ContextLookup::Deleted => {
            if !session.actions_mut().cancel_delete(entity_name, &id) {
                queue_insert(session, descriptor, persist, id.clone());
            }
            persist.entity = session.context_mut().add_managed(id, persist.entity.clone());
            Ok(())
        }
        ContextLookup::Absent => {
            persist.entity = session
                .context_mut()
                .add_managed(id.clone(), persist.entity.clone());
            queue_insert(session, descriptor, persist, id);
            Ok(())
        }
    }
}

fn queue_insert<C: Connection>(
    session: &mut SessionState<C>,
    descriptor: &Arc<EntityDescriptor>,
    persist: &PersistEvent,
    id: Value,
) {
    session.actions_mut().push(EntityAction::Insert {
        descriptor: Arc::clone(descriptor),
        id,
        entity: persist.entity.clone(),
    });
}
