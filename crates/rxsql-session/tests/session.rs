//! Facade behavior: find classification, lifecycle operations, lazy
//! references and sessions over pooled connections.

mod fixtures;

use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};
use fixtures::{
    Author, Book, MockStore, expect_err, factory, metamodel, query_error, unwrap_outcome,
};
use rxsql_core::{
    ConnectionConfig, Error, LockMode, LockOptions, PersistenceErrorKind, QueryErrorKind, Row,
    Value,
};
use rxsql_pool::{ConnectionFactory, Lease, Pool, PoolConfig, PooledConnection};
use rxsql_session::{
    Event, EventKind, EventListener, FindOptions, FlushEvent, LazyRef, ListenerFuture,
    ListenerRegistry, SessionFactory, SessionState,
};
use std::sync::Arc;
use std::task::{Context, Waker};

fn seeded_store() -> MockStore {
    let store = MockStore::new();
    store.seed(
        "books",
        vec![("id", Value::BigInt(3)), ("title", Value::from("Dune"))],
    );
    store.seed(
        "authors",
        vec![("id", Value::BigInt(1)), ("name", Value::from("Herbert"))],
    );
    store
}

fn write_lock() -> LockOptions {
    LockOptions::new(LockMode::PessimisticWrite)
}

/// Load listener that fails every load with a fixed error.
struct FailingLoad(fn() -> Error);

impl EventListener<MockStore> for FailingLoad {
    fn handle<'a>(
        &'a self,
        _cx: &'a Cx,
        _event: &'a mut Event,
        _session: &'a mut SessionState<MockStore>,
    ) -> ListenerFuture<'a> {
        let error = (self.0)();
        Box::pin(async move { Outcome::Err(error) })
    }
}

fn failing_loads(error: fn() -> Error) -> SessionFactory<MockStore> {
    factory().with_listeners(
        ListenerRegistry::new().with_listener(EventKind::Load, Arc::new(FailingLoad(error))),
    )
}

// ============================================================================
// find
// ============================================================================

#[test]
fn find_returns_none_for_missing_and_removed_entities() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let mut session = factory().open_session(seeded_store());

    rt.block_on(async {
        assert!(unwrap_outcome(session.find::<Book>(&cx, 99_i64).await).is_none());

        let book = unwrap_outcome(session.find::<Book>(&cx, 3_i64).await).expect("seeded");
        assert_eq!(book.title, "Dune");
        unwrap_outcome(session.remove(&cx, &book).await);
        assert!(unwrap_outcome(session.find::<Book>(&cx, 3_i64).await).is_none());
    });
}

#[test]
fn find_returns_the_managed_instance() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = seeded_store();
    let mut session = factory().open_session(store.clone());

    rt.block_on(async {
        let first = unwrap_outcome(session.find::<Author>(&cx, 1_i64).await).expect("seeded");
        let second = unwrap_outcome(session.find::<Author>(&cx, 1_i64).await).expect("seeded");
        assert!(Arc::ptr_eq(&first, &second));
    });
    assert_eq!(store.call_count(), 1);
    assert!(session.contains::<Author>(1_i64));
}

#[test]
fn lock_timeout_is_reported_with_the_lock_options() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = seeded_store();
    store.fail_when("FOR UPDATE", || {
        query_error(QueryErrorKind::Timeout, "lock wait timeout exceeded")
    });
    let mut session = factory().open_session(store);

    rt.block_on(async {
        let options = FindOptions::new().lock(write_lock());
        let err = expect_err(session.find_with::<Book>(&cx, 3_i64, options).await);
        match err {
            Error::Persistence(e) => {
                assert_eq!(e.kind, PersistenceErrorKind::LockTimeout);
                assert_eq!(e.lock_options, Some(write_lock()));
            }
            other => panic!("expected persistence error, got {other:?}"),
        }
    });
}

#[test]
fn store_failure_is_converted_to_store_error() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = seeded_store();
    store.fail_when("SELECT", || query_error(QueryErrorKind::Syntax, "bad syntax"));
    let mut session = factory().open_session(store);

    rt.block_on(async {
        let err = expect_err(session.find::<Book>(&cx, 3_i64).await);
        assert_eq!(err.persistence_kind(), Some(PersistenceErrorKind::Store));
    });
}

#[test]
fn row_that_does_not_map_is_an_argument_error() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MockStore::new();
    store.answer_with(
        "FROM \"books\"",
        Row::new(
            vec!["id".to_string(), "title".to_string()],
            vec![Value::BigInt(3), Value::BigInt(17)],
        ),
    );
    let mut session = factory().open_session(store);

    rt.block_on(async {
        let err = expect_err(session.find::<Book>(&cx, 3_i64).await);
        assert_eq!(err.persistence_kind(), Some(PersistenceErrorKind::Argument));
    });
    assert!(!session.contains::<Book>(3_i64));
}

#[test]
fn object_not_found_under_a_lock_is_an_invalid_argument() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let mut session = failing_loads(|| Error::object_not_found("Book", Value::BigInt(3)))
        .open_session(MockStore::new());

    rt.block_on(async {
        let options = FindOptions::new().lock(write_lock());
        let err = expect_err(session.find_with::<Book>(&cx, 3_i64, options).await);
        assert!(matches!(err, Error::InvalidArgument(_)));

        // Without a lock it is a dangling reference and reads as absent.
        assert!(unwrap_outcome(session.find::<Book>(&cx, 3_i64).await).is_none());
    });
}

#[test]
fn other_failures_become_runtime_errors() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let mut session =
        failing_loads(|| Error::Custom("listener exploded".to_string())).open_session(MockStore::new());

    rt.block_on(async {
        let err = expect_err(session.find::<Book>(&cx, 3_i64).await);
        assert_eq!(err.persistence_kind(), Some(PersistenceErrorKind::Runtime));
        assert!(err.to_string().contains("listener exploded"));
    });
}

// ============================================================================
// persist / remove / flush
// ============================================================================

#[test]
fn persist_without_id_inserts_immediately() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MockStore::new();
    let mut session = factory().open_session(store.clone());

    rt.block_on(async {
        let book = unwrap_outcome(session.persist(&cx, Arc::new(Book::draft("Dune"))).await);
        assert_eq!(book.id, Some(1));
        assert!(store.contains("books", 1));
        assert_eq!(session.pending_actions(), 0);

        let found = unwrap_outcome(session.find::<Book>(&cx, 1_i64).await).expect("managed");
        assert!(Arc::ptr_eq(&book, &found));
    });
    assert_eq!(store.calls(), vec!["insert INSERT INTO \"books\" (\"title\") VALUES ($1)"]);
}

#[test]
fn persist_of_a_shared_draft_is_rejected_before_insert() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MockStore::new();
    let mut session = factory().open_session(store.clone());

    rt.block_on(async {
        let draft = Arc::new(Book::draft("Dune"));
        let err = expect_err(session.persist(&cx, Arc::clone(&draft)).await);
        assert!(matches!(err, Error::InvalidArgument(_)));
    });
    assert_eq!(store.call_count(), 0);
}

#[test]
fn persisted_entity_is_inserted_on_flush() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MockStore::new();
    let mut session = factory().open_session(store.clone());

    rt.block_on(async {
        let book = unwrap_outcome(
            session
                .persist_on_flush(&cx, Arc::new(Book::with_id(7, "Emma")))
                .await,
        );
        assert!(session.contains::<Book>(7_i64));
        assert_eq!(session.pending_actions(), 1);
        assert!(!store.contains("books", 7));

        // Persisting the same instance again is a no-op.
        unwrap_outcome(session.persist(&cx, Arc::clone(&book)).await);
        assert_eq!(session.pending_actions(), 1);

        let flushed = unwrap_outcome(session.flush(&cx).await);
        assert_eq!(
            flushed,
            FlushEvent {
                inserted: 1,
                deleted: 0
            }
        );
    });
    assert!(store.contains("books", 7));
    assert_eq!(session.pending_actions(), 0);
}

#[test]
fn dropped_flush_keeps_unexecuted_actions_queued() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MockStore::new();
    store.stall_when("INSERT");
    let mut session = factory().open_session(store.clone());

    rt.block_on(async {
        unwrap_outcome(session.persist(&cx, Arc::new(Book::with_id(1, "Dune"))).await);
        unwrap_outcome(session.persist(&cx, Arc::new(Book::with_id(2, "Emma"))).await);
    });
    assert_eq!(session.pending_actions(), 2);

    let mut flush = Box::pin(session.flush(&cx));
    let mut context = Context::from_waker(Waker::noop());
    assert!(flush.as_mut().poll(&mut context).is_pending());
    drop(flush);

    assert_eq!(store.call_count(), 1);
    assert_eq!(session.pending_actions(), 2);
    assert!(session.contains::<Book>(1_i64));
    assert!(session.contains::<Book>(2_i64));

    store.release_stalls();
    rt.block_on(async {
        let flushed = unwrap_outcome(session.flush(&cx).await);
        assert_eq!(
            flushed,
            FlushEvent {
                inserted: 2,
                deleted: 0
            }
        );
    });
    assert_eq!(session.pending_actions(), 0);
    assert_eq!(store.rows("books"), 2);
}

#[test]
fn failed_flush_keeps_the_failing_action_and_the_rest() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = seeded_store();
    store.fail_when("DELETE", || {
        query_error(QueryErrorKind::Constraint, "author still referenced")
    });
    let mut session = factory().open_session(store.clone());

    rt.block_on(async {
        let author = unwrap_outcome(session.find::<Author>(&cx, 1_i64).await).expect("seeded");
        unwrap_outcome(session.persist(&cx, Arc::new(Book::with_id(4, "Ubik"))).await);
        unwrap_outcome(session.remove(&cx, &author).await);
        unwrap_outcome(session.persist(&cx, Arc::new(Book::with_id(5, "Emma"))).await);
        assert_eq!(session.pending_actions(), 3);

        let err = expect_err(session.flush(&cx).await);
        assert_eq!(err.persistence_kind(), Some(PersistenceErrorKind::Store));
    });

    assert_eq!(session.pending_actions(), 2);
    assert!(store.contains("books", 4));
    assert!(!store.contains("books", 5));
    assert!(store.contains("authors", 1));
    assert!(session.is_deleted::<Author>(1_i64));
}

#[test]
fn remove_of_unflushed_entity_cancels_its_insert() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MockStore::new();
    let mut session = factory().open_session(store.clone());

    rt.block_on(async {
        let book = unwrap_outcome(session.persist(&cx, Arc::new(Book::with_id(7, "Emma"))).await);
        unwrap_outcome(session.remove(&cx, &book).await);
        assert_eq!(session.pending_actions(), 0);
        assert!(!session.contains::<Book>(7_i64));

        let flushed = unwrap_outcome(session.flush(&cx).await);
        assert_eq!(flushed, FlushEvent::default());
    });
    assert_eq!(store.call_count(), 0);
}

#[test]
fn removed_entity_is_deleted_on_flush() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = seeded_store();
    let mut session = factory().open_session(store.clone());

    rt.block_on(async {
        let book = unwrap_outcome(session.find::<Book>(&cx, 3_i64).await).expect("seeded");
        unwrap_outcome(session.remove(&cx, &book).await);
        assert!(session.is_deleted::<Book>(3_i64));
        // Removing twice is harmless.
        unwrap_outcome(session.remove(&cx, &book).await);
        assert_eq!(session.pending_actions(), 1);

        let flushed = unwrap_outcome(session.flush(&cx).await);
        assert_eq!(flushed.deleted, 1);
    });
    assert!(!session.is_deleted::<Book>(3_i64));
    assert!(!store.contains("books", 3));
}

#[test]
fn persist_after_remove_revives_the_entity() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = seeded_store();
    let mut session = factory().open_session(store.clone());

    rt.block_on(async {
        let book = unwrap_outcome(session.find::<Book>(&cx, 3_i64).await).expect("seeded");
        unwrap_outcome(session.remove(&cx, &book).await);
        unwrap_outcome(session.persist(&cx, Arc::clone(&book)).await);
        assert!(!session.is_deleted::<Book>(3_i64));
        assert_eq!(session.pending_actions(), 0);
    });
    assert!(store.contains("books", 3));
}

#[test]
fn detached_and_unmanaged_instances_are_rejected() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let mut session = factory().open_session(seeded_store());

    rt.block_on(async {
        unwrap_outcome(session.find::<Book>(&cx, 3_i64).await).expect("seeded");

        let detached = Arc::new(Book::with_id(3, "Dune"));
        let err = expect_err(session.remove(&cx, &detached).await);
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = expect_err(session.persist(&cx, detached).await);
        assert!(matches!(err, Error::InvalidArgument(_)));

        let stranger = Arc::new(Book::with_id(50, "Solaris"));
        let err = expect_err(session.remove(&cx, &stranger).await);
        assert!(matches!(err, Error::InvalidArgument(_)));

        let transient = Arc::new(Book::draft("Untitled"));
        let err = expect_err(session.remove(&cx, &transient).await);
        assert!(matches!(err, Error::InvalidArgument(_)));
    });
    assert_eq!(session.pending_actions(), 0);
}

#[test]
fn clear_forgets_tracked_entities_and_actions() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let mut session = factory().open_session(seeded_store());

    rt.block_on(async {
        unwrap_outcome(session.persist(&cx, Arc::new(Book::with_id(8, "Ubik"))).await);
    });
    session.clear();
    assert!(!session.contains::<Book>(8_i64));
    assert_eq!(session.pending_actions(), 0);
}

// ============================================================================
// Lazy references
// ============================================================================

#[test]
fn uninitialized_reference_resolves_through_fetch() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = seeded_store();
    let mut session = factory().open_session(store.clone());

    let lazy: LazyRef<Book> = session.reference(3_i64);
    assert!(!lazy.is_initialized());
    assert!(matches!(lazy.get(), Err(Error::LazyInitialization(_))));
    assert_eq!(store.call_count(), 0);

    rt.block_on(async {
        let book = unwrap_outcome(session.fetch(&cx, &lazy).await).expect("seeded");
        assert_eq!(book.title, "Dune");

        let now = session.reference::<Book>(3_i64);
        assert!(Arc::ptr_eq(now.get().expect("initialized"), &book));

        // Served from the context this time.
        let again = unwrap_outcome(session.fetch(&cx, &lazy).await).expect("managed");
        assert!(Arc::ptr_eq(&again, &book));
    });
    assert_eq!(store.call_count(), 1);
}

#[test]
fn fetch_of_missing_reference_is_none_and_collections_are_unsupported() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let mut session = factory().open_session(MockStore::new());

    rt.block_on(async {
        let missing = LazyRef::<Book>::uninitialized(404_i64);
        assert!(unwrap_outcome(session.fetch(&cx, &missing).await).is_none());

        let books = LazyRef::<Book>::collection("Author", "books", Value::BigInt(1));
        let err = expect_err(session.fetch(&cx, &books).await);
        assert!(matches!(err, Error::Unsupported(_)));
    });
}

// ============================================================================
// Pooled connections
// ============================================================================

struct SharedStoreFactory {
    store: MockStore,
}

impl ConnectionFactory for SharedStoreFactory {
    type Conn = MockStore;

    #[allow(clippy::manual_async_fn)]
    fn connect(
        &self,
        _cx: &Cx,
        _config: &ConnectionConfig,
    ) -> impl Future<Output = Outcome<MockStore, Error>> + Send {
        let store = self.store.clone();
        async move { Outcome::Ok(store) }
    }
}

#[test]
fn session_runs_over_a_pooled_lease() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MockStore::new();
    let pool = Pool::new(
        SharedStoreFactory {
            store: store.clone(),
        },
        PoolConfig::new(2),
    )
    .expect("valid pool config");
    let sessions: SessionFactory<PooledConnection<MockStore>> = SessionFactory::new(metamodel());

    rt.block_on(async {
        let lease = unwrap_outcome(pool.acquire(&cx).await);
        let mut session = sessions.open_session(lease);

        let author = unwrap_outcome(
            session
                .persist(
                    &cx,
                    Arc::new(Author {
                        id: 12,
                        name: "Le Guin".to_string(),
                    }),
                )
                .await,
        );
        unwrap_outcome(session.flush(&cx).await);
        let found = unwrap_outcome(session.find::<Author>(&cx, 12_i64).await).expect("managed");
        assert!(Arc::ptr_eq(&author, &found));

        let lease = session.into_connection();
        lease.release(&cx).await.expect("release lease");
    });

    assert!(store.contains("authors", 12));
    let stats = pool.stats();
    assert_eq!(stats.acquired, 1);
    assert_eq!(stats.released, 1);
    assert_eq!(stats.active_connections, 0);
}
