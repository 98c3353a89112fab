//! Connection pooling for rxsql using asupersync.
//!
//! [`Pool`] keeps idle connections for reuse and creates new ones through a
//! [`ConnectionFactory`] up to `max_connections`. A [`PooledConnection`] is a
//! lease: it implements [`Connection`] by delegation, so a session can run on
//! it directly, and it goes back to the idle set either through
//! [`Lease::release`] or on drop.
//!
//! [`CommandChain`] runs a queue of statements on exactly one lease and
//! releases it once the last statement settled.

pub mod chain;

pub use chain::{ChainReport, CommandChain, Statement};

use rxsql_core::error::{PoolError, PoolErrorKind};
use rxsql_core::{Connection, ConnectionConfig, Cx, Error, Outcome, Result, Row, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of connections created by [`Pool::warm_up`]
    pub min_connections: usize,
    /// Maximum number of connections (idle plus leased)
    pub max_connections: usize,
    /// Idle connections older than this are closed on checkout (0 disables)
    pub idle_timeout_ms: u64,
    /// Connections older than this are retired on release (0 disables)
    pub max_lifetime_ms: u64,
    /// Ping idle connections before handing them out
    pub test_on_checkout: bool,
    /// Settings handed to the factory for every new connection
    pub connection: ConnectionConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            idle_timeout_ms: 600_000,   // 10 minutes
            max_lifetime_ms: 1_800_000, // 30 minutes
            test_on_checkout: true,
            connection: ConnectionConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Create a new pool config with the given max connections.
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            ..Default::default()
        }
    }

    pub fn min_connections(mut self, n: usize) -> Self {
        self.min_connections = n;
        self
    }

    pub fn idle_timeout(mut self, ms: u64) -> Self {
        self.idle_timeout_ms = ms;
        self
    }

    pub fn max_lifetime(mut self, ms: u64) -> Self {
        self.max_lifetime_ms = ms;
        self
    }

    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }

    pub fn connection(mut self, config: ConnectionConfig) -> Self {
        self.connection = config;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(pool_error(
                PoolErrorKind::Config,
                "max_connections must be at least 1",
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(pool_error(
                PoolErrorKind::Config,
                format!(
                    "min_connections ({}) exceeds max_connections ({})",
                    self.min_connections, self.max_connections
                ),
            ));
        }
        Ok(())
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total_connections: usize,
    pub idle_connections: usize,
    pub active_connections: usize,
    /// Leases handed out
    pub acquired: u64,
    /// Connections opened through the factory
    pub created: u64,
    /// Leases returned, explicitly or on drop
    pub released: u64,
    /// Leases satisfied from the idle set
    pub reused: u64,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} active, {} idle, {} acquired, {} created, {} reused",
            self.active_connections,
            self.total_connections,
            self.idle_connections,
            self.acquired,
            self.created,
            self.reused
        )
    }
}

/// Opens new connections for a [`Pool`].
pub trait ConnectionFactory: Send + Sync + 'static {
    type Conn: Connection + 'static;

    fn connect(
        &self,
        cx: &Cx,
        config: &ConnectionConfig,
    ) -> impl Future<Output = Outcome<Self::Conn, Error>> + Send;
}

/// A leased connection that must be handed back exactly once.
pub trait Lease: Connection {
    /// Return the connection to its owner.
    fn release(self, cx: &Cx) -> impl Future<Output = Result<()>> + Send;
}

struct IdleConnection<C> {
    conn: C,
    created_at: Instant,
    returned_at: Instant,
}

struct PoolShared<C> {
    config: PoolConfig,
    idle: Mutex<VecDeque<IdleConnection<C>>>,
    total: AtomicUsize,
    closed: AtomicBool,
    acquired: AtomicU64,
    created: AtomicU64,
    released: AtomicU64,
    reused: AtomicU64,
}

impl<C> PoolShared<C> {
    fn lock_idle(&self) -> MutexGuard<'_, VecDeque<IdleConnection<C>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_reserve(&self) -> bool {
        let max = self.config.max_connections;
        self.total
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .is_ok()
    }

    fn forget(&self) {
        self.total.fetch_sub(1, Ordering::SeqCst);
    }

    fn outlived(&self, created_at: Instant) -> bool {
        self.config.max_lifetime_ms > 0
            && created_at.elapsed() > Duration::from_millis(self.config.max_lifetime_ms)
    }

    fn idled_out(&self, returned_at: Instant) -> bool {
        self.config.idle_timeout_ms > 0
            && returned_at.elapsed() > Duration::from_millis(self.config.idle_timeout_ms)
    }

    /// Pop the next usable idle connection, collecting stale ones to close.
    fn checkout(&self, stale: &mut Vec<C>) -> Option<IdleConnection<C>> {
        let mut idle = self.lock_idle();
        while let Some(candidate) = idle.pop_front() {
            if self.outlived(candidate.created_at) || self.idled_out(candidate.returned_at) {
                self.forget();
                stale.push(candidate.conn);
                continue;
            }
            return Some(candidate);
        }
        None
    }

    /// Put a connection back; hands it back to the caller if it must be closed.
    fn checkin(&self, conn: C, created_at: Instant) -> Option<C> {
        self.released.fetch_add(1, Ordering::Relaxed);
        if self.closed.load(Ordering::SeqCst) || self.outlived(created_at) {
            self.forget();
            return Some(conn);
        }
        self.lock_idle().push_back(IdleConnection {
            conn,
            created_at,
            returned_at: Instant::now(),
        });
        None
    }
}

fn pool_error(kind: PoolErrorKind, message: impl Into<String>) -> Error {
    Error::Pool(PoolError {
        kind,
        message: message.into(),
        source: None,
    })
}

async fn close_quietly<C: Connection>(cx: &Cx, conn: C) {
    if let Err(e) = conn.close(cx).await {
        tracing::warn!(error = %e, "Failed to close pooled connection");
    }
}

/// A connection pool.
pub struct Pool<F: ConnectionFactory> {
    factory: Arc<F>,
    shared: Arc<PoolShared<F::Conn>>,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create a new pool. No connection is opened until the first acquire.
    #[allow(clippy::result_large_err)]
    pub fn new(factory: F, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            factory: Arc::new(factory),
            shared: Arc::new(PoolShared {
                config,
                idle: Mutex::new(VecDeque::new()),
                total: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                acquired: AtomicU64::new(0),
                created: AtomicU64::new(0),
                released: AtomicU64::new(0),
                reused: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> PoolStats {
        let total = self.shared.total.load(Ordering::SeqCst);
        let idle = self.shared.lock_idle().len();
        PoolStats {
            total_connections: total,
            idle_connections: idle,
            active_connections: total.saturating_sub(idle),
            acquired: self.shared.acquired.load(Ordering::Relaxed),
            created: self.shared.created.load(Ordering::Relaxed),
            released: self.shared.released.load(Ordering::Relaxed),
            reused: self.shared.reused.load(Ordering::Relaxed),
        }
    }

    pub fn at_capacity(&self) -> bool {
        self.shared.total.load(Ordering::SeqCst) >= self.shared.config.max_connections
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Open connections until `min_connections` exist.
    pub async fn warm_up(&self, cx: &Cx) -> Outcome<(), Error> {
        while self.shared.total.load(Ordering::SeqCst) < self.shared.config.min_connections {
            let conn = match self.open(cx).await {
                Outcome::Ok(conn) => conn,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            let now = Instant::now();
            self.shared.lock_idle().push_back(IdleConnection {
                conn,
                created_at: now,
                returned_at: now,
            });
        }
        Outcome::Ok(())
    }

    /// Lease a connection, reusing an idle one when possible.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn acquire(&self, cx: &Cx) -> Outcome<PooledConnection<F::Conn>, Error> {
        if self.is_closed() {
            return Outcome::Err(pool_error(PoolErrorKind::Closed, "pool is closed"));
        }

        loop {
            let mut stale = Vec::new();
            let candidate = self.shared.checkout(&mut stale);
            for conn in stale {
                tracing::debug!("Closing expired idle connection");
                close_quietly(cx, conn).await;
            }
            let Some(idle) = candidate else {
                break;
            };
            if self.shared.config.test_on_checkout && !idle.conn.is_valid(cx).await {
                tracing::debug!("Discarding idle connection that failed validation");
                self.shared.forget();
                close_quietly(cx, idle.conn).await;
                continue;
            }
            self.shared.acquired.fetch_add(1, Ordering::Relaxed);
            self.shared.reused.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("Reusing idle connection");
            return Outcome::Ok(PooledConnection::new(
                idle.conn,
                idle.created_at,
                Arc::clone(&self.shared),
            ));
        }

        match self.open(cx).await {
            Outcome::Ok(conn) => {
                self.shared.acquired.fetch_add(1, Ordering::Relaxed);
                Outcome::Ok(PooledConnection::new(
                    conn,
                    Instant::now(),
                    Arc::clone(&self.shared),
                ))
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    async fn open(&self, cx: &Cx) -> Outcome<F::Conn, Error> {
        if !self.shared.try_reserve() {
            return Outcome::Err(pool_error(
                PoolErrorKind::Exhausted,
                format!(
                    "pool exhausted: {} connections in use",
                    self.shared.config.max_connections
                ),
            ));
        }
        match self.factory.connect(cx, &self.shared.config.connection).await {
            Outcome::Ok(conn) => {
                self.shared.created.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Opened new pooled connection");
                Outcome::Ok(conn)
            }
            Outcome::Err(e) => {
                self.shared.forget();
                Outcome::Err(e)
            }
            Outcome::Cancelled(r) => {
                self.shared.forget();
                Outcome::Cancelled(r)
            }
            Outcome::Panicked(p) => {
                self.shared.forget();
                Outcome::Panicked(p)
            }
        }
    }

    /// Close every idle connection and refuse further acquires.
    ///
    /// Leases still outstanding are closed when they come back.
    pub async fn close(&self, cx: &Cx) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let drained: Vec<_> = self.shared.lock_idle().drain(..).collect();
        tracing::info!(count = drained.len(), "Closing pool");
        for idle in drained {
            self.shared.forget();
            close_quietly(cx, idle.conn).await;
        }
    }
}

/// A connection leased from a [`Pool`].
pub struct PooledConnection<C> {
    conn: Option<C>,
    created_at: Instant,
    shared: Arc<PoolShared<C>>,
}

impl<C> PooledConnection<C> {
    fn new(conn: C, created_at: Instant, shared: Arc<PoolShared<C>>) -> Self {
        Self {
            conn: Some(conn),
            created_at,
            shared,
        }
    }

    fn show_sql(&self, sql: &str) {
        if self.shared.config.connection.show_sql {
            tracing::debug!(sql = %sql, "Executing statement");
        }
    }
}

impl<C> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("leased", &self.conn.is_some())
            .field("age", &self.created_at.elapsed())
            .finish()
    }
}

fn returned_error() -> Error {
    pool_error(
        PoolErrorKind::Closed,
        "connection was already returned to the pool",
    )
}

impl<C: Connection> Connection for PooledConnection<C> {
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        self.show_sql(sql);
        async move {
            match self.conn.as_ref() {
                Some(conn) => conn.query(cx, sql, params).await,
                None => Outcome::Err(returned_error()),
            }
        }
    }

    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        self.show_sql(sql);
        async move {
            match self.conn.as_ref() {
                Some(conn) => conn.execute(cx, sql, params).await,
                None => Outcome::Err(returned_error()),
            }
        }
    }

    fn insert(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<i64>, Error>> + Send {
        self.show_sql(sql);
        async move {
            match self.conn.as_ref() {
                Some(conn) => conn.insert(cx, sql, params).await,
                None => Outcome::Err(returned_error()),
            }
        }
    }

    fn ping(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        async move {
            match self.conn.as_ref() {
                Some(conn) => conn.ping(cx).await,
                None => Outcome::Err(returned_error()),
            }
        }
    }

    /// Close the underlying connection instead of returning it to the pool.
    fn close(mut self, cx: &Cx) -> impl Future<Output = Result<()>> + Send {
        let conn = self.conn.take();
        if conn.is_some() {
            self.shared.released.fetch_add(1, Ordering::Relaxed);
            self.shared.forget();
        }
        async move {
            match conn {
                Some(conn) => conn.close(cx).await,
                None => Ok(()),
            }
        }
    }
}

impl<C: Connection> Lease for PooledConnection<C> {
    /// Return the connection to the idle set, closing it if it outlived the
    /// pool's `max_lifetime` or the pool was closed.
    fn release(mut self, cx: &Cx) -> impl Future<Output = Result<()>> + Send {
        let retired = self
            .conn
            .take()
            .and_then(|conn| self.shared.checkin(conn, self.created_at));
        async move {
            match retired {
                Some(conn) => {
                    tracing::debug!("Retiring connection on release");
                    conn.close(cx).await
                }
                None => Ok(()),
            }
        }
    }
}

impl<C> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.shared.checkin(conn, self.created_at).is_some() {
                tracing::debug!("Dropping retired connection without close");
            }
        }
    }
}
