//! Single-lease command chains.
//!
//! A [`CommandChain`] leases one connection, collects statements, and on
//! [`CommandChain::release`] runs them strictly in order. A failing statement
//! is logged and the chain moves on to the next one; the lease is handed back
//! exactly once, after the last statement settled.

use crate::{ConnectionFactory, Lease, Pool, PooledConnection};
use rxsql_core::{Connection, Cx, Error, Outcome, Value};

/// A queued statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Self::new(sql, Vec::new())
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Self::new(sql, Vec::new())
    }
}

/// Summary of a drained chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainReport {
    /// Statements that completed successfully
    pub executed: usize,
    /// Statements that failed and were skipped over
    pub failed: usize,
    /// Rows affected across all successful statements
    pub rows_affected: u64,
}

/// Statements queued against one leased connection.
pub struct CommandChain<L: Lease> {
    lease: L,
    queued: Vec<Statement>,
}

impl<L: Lease> std::fmt::Debug for CommandChain<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChain")
            .field("queued", &self.queued)
            .finish_non_exhaustive()
    }
}

impl<C: Connection> CommandChain<PooledConnection<C>> {
    /// Lease a connection from `pool` for the lifetime of the chain.
    pub async fn prepare<F>(cx: &Cx, pool: &Pool<F>) -> Outcome<Self, Error>
    where
        F: ConnectionFactory<Conn = C>,
    {
        match pool.acquire(cx).await {
            Outcome::Ok(lease) => Outcome::Ok(Self::new(lease)),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}

impl<L: Lease> CommandChain<L> {
    /// Wrap an already leased connection.
    pub fn new(lease: L) -> Self {
        Self {
            lease,
            queued: Vec::new(),
        }
    }

    /// Queue a statement. Nothing runs until [`release`](Self::release).
    pub fn accept(&mut self, statement: impl Into<Statement>) {
        self.queued.push(statement.into());
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Run every queued statement in order, then hand the lease back.
    ///
    /// `Err` outcomes are logged and counted. A cancelled or panicked
    /// statement stops the chain; the lease is still released before that
    /// outcome is returned.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(statements = self.queued.len()))]
    pub async fn release(self, cx: &Cx) -> Outcome<ChainReport, Error> {
        let Self { lease, queued } = self;
        let mut report = ChainReport::default();
        let mut interrupted = None;

        for statement in &queued {
            match lease.execute(cx, &statement.sql, &statement.params).await {
                Outcome::Ok(rows) => {
                    report.executed += 1;
                    report.rows_affected += rows;
                }
                Outcome::Err(e) => {
                    tracing::warn!(sql = %statement.sql, error = %e, "Command failed");
                    report.failed += 1;
                }
                Outcome::Cancelled(r) => {
                    interrupted = Some(Outcome::Cancelled(r));
                    break;
                }
                Outcome::Panicked(p) => {
                    interrupted = Some(Outcome::Panicked(p));
                    break;
                }
            }
        }

        if let Err(e) = lease.release(cx).await {
            tracing::warn!(error = %e, "Failed to release chain connection");
        }

        if let Some(outcome) = interrupted {
            return outcome;
        }

        tracing::info!(
            executed = report.executed,
            failed = report.failed,
            "Command chain drained"
        );
        Outcome::Ok(report)
    }
}
