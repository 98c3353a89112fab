//! Event dispatch through the registered listener sequence.

use crate::combinator::{Step, StepFuture, sequence};
use crate::convert::ExceptionConverter;
use crate::event::{Event, EventKind};
use crate::registry::{EventListener, ListenerRegistry};
use crate::state::SessionState;
use asupersync::{Cx, Outcome};
use rxsql_core::{Connection, Error};
use std::fmt;
use std::sync::Arc;

/// The state threaded through one dispatch: the event and the session.
pub struct Dispatch<'e, C: Connection> {
    pub event: &'e mut Event,
    pub session: &'e mut SessionState<C>,
}

impl<'e, C: Connection + 'static> Step<Dispatch<'e, C>> for dyn EventListener<C> {
    fn run<'a>(&'a self, cx: &'a Cx, state: &'a mut Dispatch<'e, C>) -> StepFuture<'a> {
        self.handle(cx, &mut *state.event, &mut *state.session)
    }
}

/// Runs the listener sequence registered for an event kind.
pub struct EventPipeline<C: Connection> {
    registry: Arc<ListenerRegistry<C>>,
    converter: Arc<dyn ExceptionConverter>,
}

impl<C: Connection> Clone for EventPipeline<C> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            converter: Arc::clone(&self.converter),
        }
    }
}

impl<C: Connection> fmt::Debug for EventPipeline<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPipeline")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl<C: Connection + 'static> EventPipeline<C> {
    pub fn new(registry: Arc<ListenerRegistry<C>>, converter: Arc<dyn ExceptionConverter>) -> Self {
        Self {
            registry,
            converter,
        }
    }

    pub fn registry(&self) -> &ListenerRegistry<C> {
        &self.registry
    }

    pub fn converter(&self) -> &dyn ExceptionConverter {
        self.converter.as_ref()
    }

    /// Run every listener registered for `kind`, in order.
    ///
    /// Settles with the first listener failure. Flush failures are passed
    /// through the exception converter; cancellation and panics are returned
    /// unchanged. A load result is left in the event for the caller.
    #[tracing::instrument(level = "debug", skip_all, fields(kind = %kind, listeners))]
    pub async fn dispatch(
        &self,
        cx: &Cx,
        kind: EventKind,
        event: &mut Event,
        session: &mut SessionState<C>,
    ) -> Outcome<(), Error> {
        if event.kind() != kind {
            return Outcome::Err(Error::config(format!(
                "{} event dispatched as {}",
                event.kind(),
                kind
            )));
        }
        let listeners = self.registry.listeners_for(kind);
        tracing::Span::current().record("listeners", listeners.len());

        let mut state = Dispatch { event, session };
        let outcome = sequence(cx, &mut state, listeners.iter().map(|l| l.as_ref())).await;
        match outcome {
            Outcome::Err(e) if kind == EventKind::Flush => {
                Outcome::Err(self.converter.convert(e))
            }
            other => other,
        }
    }
}
