use super::unexpected_event;
use crate::action::EntityAction;
use crate::event::{Event, EventKind, FlushEvent};
use crate::registry::{EventListener, ListenerFuture};
use crate::state::SessionState;
use asupersync::{Cx, Outcome};
use rxsql_core::{Connection, Error, Value};

/// Executes the queued actions in order.
///
/// Stops at the first failing statement; that action and everything after it
/// stay queued for the next flush. The same holds when the flush future is
/// dropped mid-statement.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFlushListener;

impl<C: Connection + 'static> EventListener<C> for DefaultFlushListener {
    fn handle<'a>(
        &'a self,
        cx: &'a Cx,
        event: &'a mut Event,
        session: &'a mut SessionState<C>,
    ) -> ListenerFuture<'a> {
        Box::pin(async move {
            let actual = event.kind();
            let Event::Flush(flush) = event else {
                return Outcome::Err(unexpected_event("flush listener", EventKind::Flush, actual));
            };
            flush_actions(cx, session, flush).await
        })
    }
}

#[tracing::instrument(level = "debug", skip_all, fields(pending = session.actions().len()))]
async fn flush_actions<C: Connection>(
    cx: &Cx,
    session: &mut SessionState<C>,
    flush: &mut FlushEvent,
) -> Outcome<(), Error> {
    // An action leaves the queue only once its statement succeeded.
    while let Some(action) = session.actions().front().cloned() {
        match execute(cx, session, &action).await {
            Outcome::Ok(()) => {}
            failed => {
                tracing::warn!(
                    remaining = session.actions().len(),
                    "Flush stopped, actions kept queued"
                );
                return failed;
            }
        }
        session.actions_mut().pop_front();
        match action {
            EntityAction::Insert { .. } => flush.inserted += 1,
            EntityAction::Delete { descriptor, id } => {
                session.context_mut().evict(descriptor.name(), &id);
                flush.deleted += 1;
            }
        }
    }
    tracing::info!(
        inserted = flush.inserted,
        deleted = flush.deleted,
        "Flush complete"
    );
    Outcome::Ok(())
}

async fn execute<C: Connection>(
    cx: &Cx,
    session: &SessionState<C>,
    action: &EntityAction,
) -> Outcome<(), Error> {
    let (sql, params) = match action {
        EntityAction::Insert {
            descriptor, entity, ..
        } => {
            let columns = match descriptor.columns(entity) {
                Ok(columns) => columns,
                Err(e) => return Outcome::Err(e),
            };
            let sql = descriptor.insert_sql(&columns);
            let params: Vec<Value> = columns.into_iter().map(|(_, value)| value).collect();
            (sql, params)
        }
        EntityAction::Delete { descriptor, id } => (descriptor.delete_sql(), vec![id.clone()]),
    };
    session.log_sql(&sql);
    match session.connection().execute(cx, &sql, &params).await {
        Outcome::Ok(rows) => {
            tracing::trace!(rows, "Statement executed");
            Outcome::Ok(())
        }
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}
