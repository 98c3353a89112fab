//! Shared fixtures: an in-memory store speaking the session's SQL shapes,
//! plus a couple of models.

#![allow(dead_code)]
#![allow(clippy::manual_async_fn)] // Mock trait impls must match trait signatures

use asupersync::{Cx, Outcome};
use rxsql_core::{Connection, Error, Model, QueryError, QueryErrorKind, Result, Row, Value};
use rxsql_session::{Metamodel, SessionConfig, SessionFactory};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

pub fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        other => panic!("unexpected outcome: {other:?}"),
    }
}

pub fn expect_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        other => panic!("expected an error, got: {other:?}"),
    }
}

pub fn query_error(kind: QueryErrorKind, message: &str) -> Error {
    Error::Query(QueryError {
        kind,
        sql: None,
        sqlstate: None,
        message: message.to_string(),
        source: None,
    })
}

// ============================================================================
// Models
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Book {
    pub id: Option<i64>,
    pub title: String,
}

impl Book {
    pub fn draft(title: &str) -> Self {
        Self {
            id: None,
            title: title.to_string(),
        }
    }

    pub fn with_id(id: i64, title: &str) -> Self {
        Self {
            id: Some(id),
            title: title.to_string(),
        }
    }
}

impl Model for Book {
    const TABLE_NAME: &'static str = "books";
    const PRIMARY_KEY: &'static str = "id";
    const ENTITY_NAME: &'static str = "Book";

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::from(self.id)),
            ("title", Value::from(self.title.as_str())),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            title: row.get_named("title")?,
        })
    }

    fn primary_key_value(&self) -> Value {
        Value::from(self.id)
    }

    fn set_generated_key(&mut self, id: i64) {
        self.id = Some(id);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Author {
    pub id: i64,
    pub name: String,
}

impl Model for Author {
    const TABLE_NAME: &'static str = "authors";
    const PRIMARY_KEY: &'static str = "id";
    const ENTITY_NAME: &'static str = "Author";

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::BigInt(self.id)),
            ("name", Value::from(self.name.as_str())),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            name: row.get_named("name")?,
        })
    }

    fn primary_key_value(&self) -> Value {
        Value::BigInt(self.id)
    }
}

pub fn metamodel() -> Metamodel {
    Metamodel::new().with::<Book>().with::<Author>()
}

pub fn factory() -> SessionFactory<MockStore> {
    SessionFactory::new(metamodel()).with_config(SessionConfig::new().show_sql(true))
}

// ============================================================================
// Mock store
// ============================================================================

type Table = BTreeMap<i64, Vec<(String, Value)>>;

#[derive(Debug, Default)]
pub struct StoreState {
    tables: HashMap<String, Table>,
    next_key: i64,
    /// Every statement issued, prefixed with the connection method.
    pub calls: Vec<String>,
    /// Statements containing the pattern fail with the produced error.
    failures: Vec<(String, fn() -> Error)>,
    /// Statements containing the pattern are answered with this raw row.
    overrides: Vec<(String, Row)>,
    /// Statements containing the pattern never complete.
    stalls: Vec<String>,
}

/// In-memory store understanding the statements the session renders.
///
/// Tables are keyed by their `id` column.
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<StoreState>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<Mutex<StoreState>> {
        Arc::clone(&self.state)
    }

    pub fn seed(&self, table: &str, row: Vec<(&str, Value)>) {
        let mut guard = self.state.lock().expect("lock poisoned");
        let id = row
            .iter()
            .find(|(column, _)| *column == "id")
            .and_then(|(_, value)| value.as_i64())
            .expect("seeded row needs an id");
        guard.next_key = guard.next_key.max(id);
        guard.tables.entry(table.to_string()).or_default().insert(
            id,
            row.into_iter()
                .map(|(column, value)| (column.to_string(), value))
                .collect(),
        );
    }

    pub fn fail_when(&self, pattern: &str, error: fn() -> Error) {
        let mut guard = self.state.lock().expect("lock poisoned");
        guard.failures.push((pattern.to_string(), error));
    }

    pub fn answer_with(&self, pattern: &str, row: Row) {
        let mut guard = self.state.lock().expect("lock poisoned");
        guard.overrides.push((pattern.to_string(), row));
    }

    pub fn stall_when(&self, pattern: &str) {
        let mut guard = self.state.lock().expect("lock poisoned");
        guard.stalls.push(pattern.to_string());
    }

    pub fn release_stalls(&self) {
        self.state.lock().expect("lock poisoned").stalls.clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().expect("lock poisoned").calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().expect("lock poisoned").calls.len()
    }

    pub fn contains(&self, table: &str, id: i64) -> bool {
        self.state
            .lock()
            .expect("lock poisoned")
            .tables
            .get(table)
            .is_some_and(|t| t.contains_key(&id))
    }

    pub fn rows(&self, table: &str) -> usize {
        self.state
            .lock()
            .expect("lock poisoned")
            .tables
            .get(table)
            .map_or(0, BTreeMap::len)
    }
}

/// Quoted identifiers in statement order: table first, then columns.
fn identifiers(sql: &str) -> Vec<&str> {
    sql.split('"').skip(1).step_by(2).collect()
}

impl StoreState {
    fn record(&mut self, method: &str, sql: &str) -> Option<Error> {
        self.calls.push(format!("{method} {sql}"));
        self.failures
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, error)| error())
    }

    fn stalls(&self, sql: &str) -> bool {
        self.stalls.iter().any(|pattern| sql.contains(pattern.as_str()))
    }

    fn select(&self, sql: &str, params: &[Value]) -> Vec<Row> {
        if let Some((_, row)) = self.overrides.iter().find(|(p, _)| sql.contains(p.as_str())) {
            return vec![row.clone()];
        }
        let table = identifiers(sql)[0];
        let Some(id) = params.first().and_then(Value::as_i64) else {
            return vec![];
        };
        self.tables
            .get(table)
            .and_then(|t| t.get(&id))
            .map(|columns| {
                let (names, values): (Vec<String>, Vec<Value>) = columns.iter().cloned().unzip();
                Row::new(names, values)
            })
            .into_iter()
            .collect()
    }

    fn write(&mut self, sql: &str, params: &[Value], generated: Option<i64>) -> u64 {
        let idents = identifiers(sql);
        let table = idents[0].to_string();
        if sql.starts_with("DELETE") {
            let id = params.first().and_then(Value::as_i64).unwrap_or_default();
            return u64::from(
                self.tables
                    .get_mut(&table)
                    .and_then(|t| t.remove(&id))
                    .is_some(),
            );
        }
        let mut columns: Vec<(String, Value)> = idents[1..]
            .iter()
            .map(|c| (*c).to_string())
            .zip(params.iter().cloned())
            .collect();
        if let Some(key) = generated {
            columns.insert(0, ("id".to_string(), Value::BigInt(key)));
        }
        let id = columns
            .iter()
            .find(|(c, _)| c == "id")
            .and_then(|(_, v)| v.as_i64())
            .unwrap_or_default();
        self.tables.entry(table).or_default().insert(id, columns);
        1
    }
}

impl Connection for MockStore {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            let answer = {
                let mut guard = state.lock().expect("lock poisoned");
                match guard.record("query", &sql) {
                    Some(e) => Some(Outcome::Err(e)),
                    None if guard.stalls(&sql) => None,
                    None => Some(Outcome::Ok(guard.select(&sql, &params))),
                }
            };
            match answer {
                Some(outcome) => outcome,
                None => std::future::pending().await,
            }
        }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            let answer = {
                let mut guard = state.lock().expect("lock poisoned");
                match guard.record("execute", &sql) {
                    Some(e) => Some(Outcome::Err(e)),
                    None if guard.stalls(&sql) => None,
                    None => Some(Outcome::Ok(guard.write(&sql, &params, None))),
                }
            };
            match answer {
                Some(outcome) => outcome,
                None => std::future::pending().await,
            }
        }
    }

    fn insert(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<i64>, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            let answer = {
                let mut guard = state.lock().expect("lock poisoned");
                match guard.record("insert", &sql) {
                    Some(e) => Some(Outcome::Err(e)),
                    None if guard.stalls(&sql) => None,
                    None => {
                        guard.next_key += 1;
                        let key = guard.next_key;
                        guard.write(&sql, &params, Some(key));
                        Some(Outcome::Ok(Some(key)))
                    }
                }
            };
            match answer {
                Some(outcome) => outcome,
                None => std::future::pending().await,
            }
        }
    }

    fn ping(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        async { Outcome::Ok(()) }
    }

    fn close(self, _cx: &Cx) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}
