use super::unexpected_event;
use crate::context::ContextLookup;
use crate::entity::EntityDescriptor;
use crate::event::{Event, EventKind, LoadType};
use crate::registry::{EventListener, ListenerFuture};
use crate::state::SessionState;
use asupersync::{Cx, Outcome};
use rxsql_core::{Connection, Error, LockOptions, Row, Value};

/// Resolves a load from the persistence context, falling back to the store.
///
/// The context is consulted first. A managed entity is returned as is; when
/// the requested lock mode has to be acquired in the store, the lock
/// statement is issued for it first. An entity removed in this session fails with
/// `ObjectDeleted`. A missing row leaves the result empty, except for an
/// immediate load, which fails with `ObjectNotFound`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLoadListener;

impl<C: Connection + 'static> EventListener<C> for DefaultLoadListener {
    fn handle<'a>(
        &'a self,
        cx: &'a Cx,
        event: &'a mut Event,
        session: &'a mut SessionState<C>,
    ) -> ListenerFuture<'a> {
        Box::pin(async move {
            let actual = event.kind();
            let Event::Load(load) = event else {
                return Outcome::Err(unexpected_event("load listener", EventKind::Load, actual));
            };
            if load.result().is_some() {
                return Outcome::Ok(());
            }
            let descriptor = match session.metamodel().entity(load.entity_name) {
                Ok(descriptor) => descriptor,
                Err(e) => return Outcome::Err(e),
            };
            if let Some(graph) = session.influencers().effective_graph() {
                tracing::trace!(
                    entity = load.entity_name,
                    graph = graph.graph.root(),
                    hint = graph.semantic.hint_name(),
                    "Loading with entity graph"
                );
            }

            let lock = load.lock_options;
            let store_lock = lock.is_some_and(|lock| lock.mode.requires_store());
            match session.context().lookup(load.entity_name, &load.id) {
                ContextLookup::Deleted => {
                    return Outcome::Err(Error::object_deleted(load.entity_name, load.id.clone()));
                }
                ContextLookup::Managed(entity) => {
                    if store_lock {
                        // Take the row lock; the managed instance stays canonical
                        // even if its insert has not been flushed yet.
                        let locked =
                            select_by_id(cx, session, &descriptor, &load.id, lock.as_ref()).await;
                        match locked {
                            Outcome::Ok(_) => {}
                            Outcome::Err(e) => return Outcome::Err(e),
                            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                            Outcome::Panicked(p) => return Outcome::Panicked(p),
                        }
                        tracing::trace!(
                            entity = load.entity_name,
                            id = %load.id,
                            "Locked managed entity"
                        );
                    } else {
                        tracing::trace!(
                            entity = load.entity_name,
                            id = %load.id,
                            "Resolved from context"
                        );
                    }
                    load.set_result(entity);
                    return Outcome::Ok(());
                }
                ContextLookup::Absent => {}
            }

            let row = match select_by_id(cx, session, &descriptor, &load.id, lock.as_ref()).await {
                Outcome::Ok(row) => row,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };

            let Some(row) = row else {
                tracing::debug!(entity = load.entity_name, id = %load.id, "No row for identifier");
                return match load.load_type {
                    LoadType::ImmediateLoad => Outcome::Err(Error::object_not_found(
                        load.entity_name,
                        load.id.clone(),
                    )),
                    LoadType::Get | LoadType::Reference => Outcome::Ok(()),
                };
            };
            let entity = match descriptor.materialize(&row) {
                Ok(entity) => entity,
                Err(e) => return Outcome::Err(e),
            };
            let canonical = session.context_mut().add_managed(load.id.clone(), entity);
            load.set_result(canonical);
            Outcome::Ok(())
        })
    }
}

async fn select_by_id<C: Connection>(
    cx: &Cx,
    session: &SessionState<C>,
    descriptor: &EntityDescriptor,
    id: &Value,
    lock_options: Option<&LockOptions>,
) -> Outcome<Option<Row>, Error> {
    let sql = descriptor.select_by_id_sql(lock_options);
    session.log_sql(&sql);
    session
        .connection()
        .query_one(cx, &sql, std::slice::from_ref(id))
        .await
}
