//! Loading a single entity by identifier.
//!
//! [`IdentifierLoadAccess`] is configured fluently (lock options, cache mode,
//! entity graph) and then runs one of three operations that differ only in
//! the [`LoadType`] they put into the load event:
//!
//! | Operation       | Load type       | Missing row                       |
//! |-----------------|-----------------|-----------------------------------|
//! | `load`          | `Get`           | `None`                            |
//! | `fetch`         | `ImmediateLoad` | `None` (dangling-proxy rule)      |
//! | `get_reference` | `Reference`     | decided by the not-found delegate |
//!
//! With lock options set every failure propagates and the delegate is not
//! consulted.

use crate::convert::NotFoundDelegate;
use crate::entity::{EntityDescriptor, EntityRef};
use crate::event::{Event, EventKind, LoadEvent, LoadType};
use crate::influencers::{CacheMode, EntityGraph, GraphSemantic};
use crate::pipeline::EventPipeline;
use crate::scoped::{CacheModeOverride, GraphOverride};
use crate::state::SessionState;
use asupersync::{Cx, Outcome};
use rxsql_core::{Connection, Error, LockOptions, LookupErrorKind, Value};
use std::sync::Arc;

/// Whether `error` is the "row behind a reference is gone" failure that an
/// unlocked `load`/`fetch` treats as an empty result.
pub fn is_dangling_proxy_miss(error: &Error) -> bool {
    error.lookup_kind() == Some(LookupErrorKind::ObjectNotFound)
}

/// Load access for one entity type, bound to a session.
pub struct IdentifierLoadAccess<'s, C: Connection> {
    pipeline: &'s EventPipeline<C>,
    session: &'s mut SessionState<C>,
    not_found: &'s dyn NotFoundDelegate,
    descriptor: Arc<EntityDescriptor>,
    lock_options: Option<LockOptions>,
    cache_mode: Option<CacheMode>,
    graph: Option<EntityGraph>,
    semantic: Option<GraphSemantic>,
}

impl<'s, C: Connection + 'static> IdentifierLoadAccess<'s, C> {
    pub(crate) fn new(
        pipeline: &'s EventPipeline<C>,
        session: &'s mut SessionState<C>,
        not_found: &'s dyn NotFoundDelegate,
        descriptor: Arc<EntityDescriptor>,
    ) -> Self {
        Self {
            pipeline,
            session,
            not_found,
            descriptor,
            lock_options: None,
            cache_mode: None,
            graph: None,
            semantic: None,
        }
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    /// Lock the row while loading it.
    #[must_use]
    pub fn with_lock(mut self, lock_options: LockOptions) -> Self {
        self.lock_options = Some(lock_options);
        self
    }

    /// Use `mode` for this load only.
    #[must_use]
    pub fn with_cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = Some(mode);
        self
    }

    /// Apply an entity graph for this load only.
    ///
    /// A semantic without a graph is rejected as soon as a load operation is
    /// called.
    #[must_use]
    pub fn with_graph(mut self, graph: Option<EntityGraph>, semantic: GraphSemantic) -> Self {
        self.graph = graph;
        self.semantic = Some(semantic);
        self
    }

    #[must_use]
    pub fn fetch_graph(self, graph: EntityGraph) -> Self {
        self.with_graph(Some(graph), GraphSemantic::Fetch)
    }

    #[must_use]
    pub fn load_graph(self, graph: EntityGraph) -> Self {
        self.with_graph(Some(graph), GraphSemantic::Load)
    }

    /// Load the entity, or `None` if there is no row for `id`.
    pub fn load(
        &mut self,
        cx: &Cx,
        id: impl Into<Value>,
    ) -> impl Future<Output = Outcome<Option<EntityRef>, Error>> {
        self.start(cx, id.into(), LoadType::Get)
    }

    /// Load the entity, requiring the row to exist.
    ///
    /// On the unlocked path a missing row still yields `None`.
    pub fn fetch(
        &mut self,
        cx: &Cx,
        id: impl Into<Value>,
    ) -> impl Future<Output = Outcome<Option<EntityRef>, Error>> {
        self.start(cx, id.into(), LoadType::ImmediateLoad)
    }

    /// Narrow a reference to the entity.
    ///
    /// On the unlocked path an empty result is handed to the not-found
    /// delegate, which may turn it into a failure.
    pub fn get_reference(
        &mut self,
        cx: &Cx,
        id: impl Into<Value>,
    ) -> impl Future<Output = Outcome<Option<EntityRef>, Error>> {
        self.start(cx, id.into(), LoadType::Reference)
    }

    /// Check the configuration now and run the load when polled.
    ///
    /// An invalid configuration yields a future that is ready with the
    /// error and touches neither the session nor the store.
    fn start(
        &mut self,
        cx: &Cx,
        id: Value,
        load_type: LoadType,
    ) -> impl Future<Output = Outcome<Option<EntityRef>, Error>> {
        let checked = self.validate();
        async move {
            if let Err(e) = checked {
                return Outcome::Err(e);
            }
            self.perform(cx, id, load_type).await
        }
    }

    #[allow(clippy::result_large_err)]
    fn validate(&self) -> rxsql_core::Result<()> {
        if self.semantic.is_some() && self.graph.is_none() {
            return Err(Error::config(
                "graph semantic specified without an entity graph",
            ));
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, cx), fields(entity = self.descriptor.name()))]
    async fn perform(
        &mut self,
        cx: &Cx,
        id: Value,
        load_type: LoadType,
    ) -> Outcome<Option<EntityRef>, Error> {
        // Both guards restore the session settings when dropped, whatever
        // way this future ends.
        let influencers = Arc::clone(self.session.influencers());
        let _cache_mode = CacheModeOverride::apply(&influencers, self.cache_mode);
        let graph = self.graph.clone().zip(self.semantic);
        let _graph = GraphOverride::apply(&influencers, graph);

        match load_type {
            LoadType::Reference => self.do_get_reference(cx, id).await,
            LoadType::Get | LoadType::ImmediateLoad => self.do_load(cx, id, load_type).await,
        }
    }

    async fn do_load(
        &mut self,
        cx: &Cx,
        id: Value,
        load_type: LoadType,
    ) -> Outcome<Option<EntityRef>, Error> {
        match self.fire_load(cx, id, load_type).await {
            Outcome::Err(e) if self.lock_options.is_none() && is_dangling_proxy_miss(&e) => {
                tracing::debug!(error = %e, "Dangling reference treated as empty result");
                Outcome::Ok(None)
            }
            other => other,
        }
    }

    async fn do_get_reference(&mut self, cx: &Cx, id: Value) -> Outcome<Option<EntityRef>, Error> {
        let locked = self.lock_options.is_some();
        match self.fire_load(cx, id.clone(), LoadType::Reference).await {
            Outcome::Ok(None) if !locked => {
                match self.not_found.handle_not_found(self.descriptor.name(), &id) {
                    Ok(()) => Outcome::Ok(None),
                    Err(e) => Outcome::Err(e),
                }
            }
            other => other,
        }
    }

    async fn fire_load(
        &mut self,
        cx: &Cx,
        id: Value,
        load_type: LoadType,
    ) -> Outcome<Option<EntityRef>, Error> {
        let load = LoadEvent::new(self.descriptor.name(), id, load_type)
            .lock_options(self.lock_options)
            .read_only(self.session.influencers().read_only());
        let mut event = Event::Load(load);
        match self
            .pipeline
            .dispatch(cx, EventKind::Load, &mut event, &mut *self.session)
            .await
        {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        match event {
            Event::Load(mut load) => Outcome::Ok(load.take_result()),
            _ => Outcome::Ok(None),
        }
    }
}
