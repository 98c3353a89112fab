//! Event-driven persistence sessions for rxsql.
//!
//! `rxsql-session` is the **session layer**. Every facade operation builds a
//! lifecycle event and runs it through the listener sequence registered for
//! its kind; listeners share the session's persistence context, action queue
//! and connection.
//!
//! # Role In The Architecture
//!
//! - **Event pipeline**: ordered, strictly sequential listeners per event kind.
//! - **Identifier load access**: by-id loads with lock, cache-mode and entity
//!   graph overrides that are always restored.
//! - **Persistence context**: one canonical instance per entity identity.
//! - **Error conversion**: failures surfaced by `find` and `flush` are
//!   translated into the persistence error family.
//!
//! # Example
//!
//! ```ignore
//! let factory = SessionFactory::new(Metamodel::new().with::<Book>());
//! let mut session = factory.open_session(conn);
//!
//! // Insert right away (generated key) and track.
//! let book = session.persist(&cx, Arc::new(Book::draft("Dune"))).await?;
//!
//! // By-id lookup; a missing or removed entity is `None`.
//! let same = session.find::<Book>(&cx, 1_i64).await?;
//!
//! // Queue a delete and write it.
//! session.remove(&cx, &book).await?;
//! session.flush(&cx).await?;
//! ```

pub mod action;
pub mod combinator;
pub mod context;
pub mod convert;
pub mod entity;
pub mod event;
pub mod influencers;
pub mod lazy;
pub mod listeners;
pub mod load_access;
pub mod pipeline;
pub mod registry;
pub mod scoped;
pub mod state;

pub use action::{ActionQueue, EntityAction};
pub use combinator::{Step, StepFuture, completed, sequence};
pub use context::{ContextLookup, EntityKey, EntryStatus, PersistenceContext};
pub use convert::{
    ExceptionConverter, NotFoundDelegate, StandardExceptionConverter, StandardNotFoundDelegate,
    classify_find_failure,
};
pub use entity::{EntityDescriptor, EntityRef, Metamodel};
pub use event::{Event, EventKind, FlushEvent, LoadEvent, LoadType, PersistEvent, RemoveEvent};
pub use influencers::{CacheMode, EffectiveGraph, EntityGraph, GraphSemantic, LoadQueryInfluencers};
pub use lazy::{CollectionPlaceholder, LazyRef};
pub use listeners::{
    DefaultFlushListener, DefaultLoadListener, DefaultPersistListener, DefaultRemoveListener,
};
pub use load_access::{IdentifierLoadAccess, is_dangling_proxy_miss};
pub use pipeline::{Dispatch, EventPipeline};
pub use registry::{EventListener, ListenerFuture, ListenerRegistry};
pub use scoped::{CacheModeOverride, GraphOverride};
pub use state::SessionState;

use asupersync::{Cx, Outcome};
use rxsql_core::{Connection, Error, LockOptions, Model, Value};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Cache mode a new session starts with.
    pub cache_mode: CacheMode,
    /// Whether loaded entities are read-only by default.
    pub read_only: bool,
    /// Whether every statement the session issues is logged at debug level.
    pub show_sql: bool,
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default cache mode (builder pattern).
    #[must_use]
    pub fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    /// Set the default read-only flag (builder pattern).
    #[must_use]
    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Enable statement logging (builder pattern).
    #[must_use]
    pub fn show_sql(mut self, value: bool) -> Self {
        self.show_sql = value;
        self
    }
}

/// Options for `Session::find_with()`.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Lock the row while loading it.
    pub lock: Option<LockOptions>,
    /// Cache mode for this lookup only.
    pub cache_mode: Option<CacheMode>,
    /// Entity graph hint for this lookup only.
    pub graph: Option<(EntityGraph, GraphSemantic)>,
}

impl FindOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lock(mut self, lock: LockOptions) -> Self {
        self.lock = Some(lock);
        self
    }

    #[must_use]
    pub fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = Some(mode);
        self
    }

    #[must_use]
    pub fn fetch_graph(mut self, graph: EntityGraph) -> Self {
        self.graph = Some((graph, GraphSemantic::Fetch));
        self
    }

    #[must_use]
    pub fn load_graph(mut self, graph: EntityGraph) -> Self {
        self.graph = Some((graph, GraphSemantic::Load));
        self
    }
}

// ============================================================================
// Session Factory
// ============================================================================

/// Shared, immutable setup for opening sessions.
///
/// Owns the metamodel, the listener registry, the exception converter and the
/// not-found delegate. Cloning is cheap; every session opened from a factory
/// shares the same listeners.
pub struct SessionFactory<C: Connection> {
    metamodel: Arc<Metamodel>,
    registry: Arc<ListenerRegistry<C>>,
    converter: Arc<dyn ExceptionConverter>,
    not_found: Arc<dyn NotFoundDelegate>,
    config: SessionConfig,
}

impl<C: Connection + 'static> SessionFactory<C> {
    /// A factory with the default listeners, converter and delegate.
    pub fn new(metamodel: Metamodel) -> Self {
        Self {
            metamodel: Arc::new(metamodel),
            registry: Arc::new(ListenerRegistry::with_defaults()),
            converter: Arc::new(StandardExceptionConverter),
            not_found: Arc::new(StandardNotFoundDelegate),
            config: SessionConfig::default(),
        }
    }

    #[must_use]
    pub fn with_listeners(mut self, registry: ListenerRegistry<C>) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    #[must_use]
    pub fn with_converter(mut self, converter: impl ExceptionConverter + 'static) -> Self {
        self.converter = Arc::new(converter);
        self
    }

    #[must_use]
    pub fn with_not_found_delegate(mut self, delegate: impl NotFoundDelegate + 'static) -> Self {
        self.not_found = Arc::new(delegate);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metamodel(&self) -> &Metamodel {
        &self.metamodel
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open a session over `connection`.
    pub fn open_session(&self, connection: C) -> Session<C> {
        tracing::debug!(entities = self.metamodel.len(), "Opening session");
        Session {
            pipeline: EventPipeline::new(Arc::clone(&self.registry), Arc::clone(&self.converter)),
            state: SessionState::new(connection, Arc::clone(&self.metamodel), self.config.clone()),
            not_found: Arc::clone(&self.not_found),
        }
    }
}

impl<C: Connection> Clone for SessionFactory<C> {
    fn clone(&self) -> Self {
        Self {
            metamodel: Arc::clone(&self.metamodel),
            registry: Arc::clone(&self.registry),
            converter: Arc::clone(&self.converter),
            not_found: Arc::clone(&self.not_found),
            config: self.config.clone(),
        }
    }
}

impl<C: Connection> fmt::Debug for SessionFactory<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("metamodel", &self.metamodel)
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session
// ============================================================================

/// A persistence session over one connection.
///
/// Not meant for concurrent use: every asynchronous operation takes
/// `&mut self`, so one operation settles before the next can start.
pub struct Session<C: Connection> {
    pipeline: EventPipeline<C>,
    state: SessionState<C>,
    not_found: Arc<dyn NotFoundDelegate>,
}

#[allow(clippy::result_large_err)]
fn narrow<M: Model>(entity: &EntityRef) -> rxsql_core::Result<Arc<M>> {
    entity
        .downcast::<M>()
        .ok_or_else(|| Error::cast(entity.entity_name(), std::any::type_name::<M>()))
}

fn narrow_outcome<M: Model>(outcome: Outcome<Option<EntityRef>, Error>) -> Outcome<Option<Arc<M>>, Error> {
    match outcome {
        Outcome::Ok(Some(entity)) => match narrow::<M>(&entity) {
            Ok(model) => Outcome::Ok(Some(model)),
            Err(e) => Outcome::Err(e),
        },
        Outcome::Ok(None) => Outcome::Ok(None),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

impl<C: Connection + 'static> Session<C> {
    // ========================================================================
    // Load Access
    // ========================================================================

    /// Load access for `M`.
    #[allow(clippy::result_large_err)]
    pub fn by_id<M: Model>(&mut self) -> rxsql_core::Result<IdentifierLoadAccess<'_, C>> {
        let descriptor = self.state.metamodel().entity_of::<M>()?;
        Ok(IdentifierLoadAccess::new(
            &self.pipeline,
            &mut self.state,
            self.not_found.as_ref(),
            descriptor,
        ))
    }

    /// Load access for the entity registered under `entity_name`.
    #[allow(clippy::result_large_err)]
    pub fn by_entity_name(
        &mut self,
        entity_name: &str,
    ) -> rxsql_core::Result<IdentifierLoadAccess<'_, C>> {
        let descriptor = self.state.metamodel().entity(entity_name)?;
        Ok(IdentifierLoadAccess::new(
            &self.pipeline,
            &mut self.state,
            self.not_found.as_ref(),
            descriptor,
        ))
    }

    /// Look up an entity by identifier.
    ///
    /// Returns `None` when the entity does not exist or was removed in this
    /// session. Other failures are converted into persistence errors.
    pub async fn find<M: Model>(
        &mut self,
        cx: &Cx,
        id: impl Into<Value>,
    ) -> Outcome<Option<Arc<M>>, Error> {
        self.find_with::<M>(cx, id, FindOptions::default()).await
    }

    /// [`find`](Self::find) with lock, cache-mode and graph options.
    #[tracing::instrument(level = "debug", skip(self, cx, id), fields(entity = M::ENTITY_NAME))]
    pub async fn find_with<M: Model>(
        &mut self,
        cx: &Cx,
        id: impl Into<Value>,
        options: FindOptions,
    ) -> Outcome<Option<Arc<M>>, Error> {
        let lock = options.lock;
        match self.find_entity::<M>(cx, id.into(), options).await {
            Outcome::Err(e) => {
                match classify_find_failure(self.pipeline.converter(), e, lock.as_ref()) {
                    None => Outcome::Ok(None),
                    Some(e) => Outcome::Err(e),
                }
            }
            other => other,
        }
    }

    async fn find_entity<M: Model>(
        &mut self,
        cx: &Cx,
        id: Value,
        options: FindOptions,
    ) -> Outcome<Option<Arc<M>>, Error> {
        let mut access = match self.by_id::<M>() {
            Ok(access) => access,
            Err(e) => return Outcome::Err(e),
        };
        if let Some(lock) = options.lock {
            access = access.with_lock(lock);
        }
        if let Some(mode) = options.cache_mode {
            access = access.with_cache_mode(mode);
        }
        if let Some((graph, semantic)) = options.graph {
            access = access.with_graph(Some(graph), semantic);
        }
        narrow_outcome(access.load(cx, id).await)
    }

    /// Resolve a lazy reference.
    ///
    /// An initialized reference is returned as is; an uninitialized one is
    /// resolved from the persistence context or, failing that, loaded with
    /// an immediate load. Collection placeholders cannot be fetched.
    #[tracing::instrument(level = "debug", skip(self, cx, lazy), fields(entity = M::ENTITY_NAME))]
    pub async fn fetch<M: Model>(
        &mut self,
        cx: &Cx,
        lazy: &LazyRef<M>,
    ) -> Outcome<Option<Arc<M>>, Error> {
        match lazy {
            LazyRef::Initialized(entity) => Outcome::Ok(Some(Arc::clone(entity))),
            LazyRef::Collection(placeholder) => Outcome::Err(Error::unsupported(format!(
                "fetching collection {}.{} is not supported",
                placeholder.owner, placeholder.role
            ))),
            LazyRef::Uninitialized { entity_name, id } => {
                if let ContextLookup::Managed(entity) =
                    self.state.context().lookup(*entity_name, id)
                {
                    return match narrow::<M>(&entity) {
                        Ok(model) => Outcome::Ok(Some(model)),
                        Err(e) => Outcome::Err(e),
                    };
                }
                let mut access = match self.by_entity_name(entity_name) {
                    Ok(access) => access,
                    Err(e) => return Outcome::Err(e),
                };
                narrow_outcome(access.fetch(cx, id.clone()).await)
            }
        }
    }

    /// A lazy reference to `M` with the given identifier, without any I/O.
    ///
    /// Initialized if the entity is already managed by this session.
    pub fn reference<M: Model>(&self, id: impl Into<Value>) -> LazyRef<M> {
        let id = id.into();
        match self.state.context().lookup(M::ENTITY_NAME, &id) {
            ContextLookup::Managed(entity) => match entity.downcast::<M>() {
                Some(model) => LazyRef::Initialized(model),
                None => LazyRef::uninitialized(id),
            },
            ContextLookup::Deleted | ContextLookup::Absent => LazyRef::uninitialized(id),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Make `entity` managed and return the managed instance.
    ///
    /// An entity without an identifier is inserted immediately so the store
    /// can generate its key; the handle passed in must not be shared for that
    /// to work.
    #[tracing::instrument(level = "debug", skip(self, cx, entity), fields(entity = M::ENTITY_NAME))]
    pub async fn persist<M: Model>(&mut self, cx: &Cx, entity: Arc<M>) -> Outcome<Arc<M>, Error> {
        self.persist_as(cx, EventKind::Persist, entity).await
    }

    /// Like [`persist`](Self::persist), dispatched as a persist-on-flush event.
    #[tracing::instrument(level = "debug", skip(self, cx, entity), fields(entity = M::ENTITY_NAME))]
    pub async fn persist_on_flush<M: Model>(
        &mut self,
        cx: &Cx,
        entity: Arc<M>,
    ) -> Outcome<Arc<M>, Error> {
        self.persist_as(cx, EventKind::PersistOnFlush, entity).await
    }

    async fn persist_as<M: Model>(
        &mut self,
        cx: &Cx,
        kind: EventKind,
        entity: Arc<M>,
    ) -> Outcome<Arc<M>, Error> {
        let persist = PersistEvent::new(EntityRef::new(entity));
        let mut event = if kind == EventKind::PersistOnFlush {
            Event::PersistOnFlush(persist)
        } else {
            Event::Persist(persist)
        };
        match self.dispatch(cx, kind, &mut event).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        match event {
            Event::Persist(persist) | Event::PersistOnFlush(persist) => {
                match narrow::<M>(&persist.entity) {
                    Ok(model) => Outcome::Ok(model),
                    Err(e) => Outcome::Err(e),
                }
            }
            other => Outcome::Err(Error::config(format!(
                "persist dispatch returned a {} event",
                other.kind()
            ))),
        }
    }

    /// Schedule a managed entity for deletion on the next flush.
    #[tracing::instrument(level = "debug", skip(self, cx, entity), fields(entity = M::ENTITY_NAME))]
    pub async fn remove<M: Model>(&mut self, cx: &Cx, entity: &Arc<M>) -> Outcome<(), Error> {
        let mut event = Event::Remove(RemoveEvent::new(EntityRef::new(Arc::clone(entity))));
        self.dispatch(cx, EventKind::Remove, &mut event).await
    }

    /// Write every queued action to the store, in order.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn flush(&mut self, cx: &Cx) -> Outcome<FlushEvent, Error> {
        let mut event = Event::Flush(FlushEvent::default());
        match self.dispatch(cx, EventKind::Flush, &mut event).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        match event {
            Event::Flush(flush) => Outcome::Ok(flush),
            _ => Outcome::Ok(FlushEvent::default()),
        }
    }

    /// Dispatch a caller-built event through the session's pipeline.
    pub async fn dispatch(
        &mut self,
        cx: &Cx,
        kind: EventKind,
        event: &mut Event,
    ) -> Outcome<(), Error> {
        self.pipeline.dispatch(cx, kind, event, &mut self.state).await
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Whether an entity of type `M` with this identifier is managed.
    pub fn contains<M: Model>(&self, id: impl Into<Value>) -> bool {
        self.state.context().contains(M::ENTITY_NAME, &id.into())
    }

    /// Whether an entity of type `M` with this identifier was removed in this
    /// session and the delete has not been flushed yet.
    pub fn is_deleted<M: Model>(&self, id: impl Into<Value>) -> bool {
        self.state.context().is_deleted(M::ENTITY_NAME, &id.into())
    }

    pub fn pending_actions(&self) -> usize {
        self.state.actions().len()
    }

    pub fn cache_mode(&self) -> CacheMode {
        self.state.influencers().cache_mode()
    }

    pub fn set_cache_mode(&mut self, mode: CacheMode) {
        self.state.influencers().set_cache_mode(mode);
    }

    pub fn effective_graph(&self) -> Option<EffectiveGraph> {
        self.state.influencers().effective_graph()
    }

    pub fn is_read_only(&self) -> bool {
        self.state.influencers().read_only()
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.state.influencers().set_read_only(read_only);
    }

    /// Forget every tracked entity and queued action.
    pub fn clear(&mut self) {
        tracing::debug!(
            tracked = self.state.context().len(),
            pending = self.state.actions().len(),
            "Clearing session"
        );
        self.state.context_mut().clear();
        self.state.actions_mut().clear();
    }

    pub fn state(&self) -> &SessionState<C> {
        &self.state
    }

    pub fn connection(&self) -> &C {
        self.state.connection()
    }

    /// Close the session and hand back its connection.
    pub fn into_connection(self) -> C {
        if !self.state.actions().is_empty() {
            tracing::warn!(
                pending = self.state.actions().len(),
                "Session closed with unflushed actions"
            );
        }
        self.state.into_connection()
    }
}

impl<C: Connection> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("pipeline", &self.pipeline)
            .field("tracked", &self.state.context().len())
            .field("pending", &self.state.actions().len())
            .field("config", self.state.config())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
